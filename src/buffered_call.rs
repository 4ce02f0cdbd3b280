use log::trace;

use crate::err::{ERROR_INSUFFICIENT_BUFFER, NativeError, SizedCallError};

/// Run a native call that writes into `buf` and reports the size it needs on overflow.
///
/// When the first attempt reports a required size larger than `buf`, `buf` is grown to exactly
/// that size and the call is retried once. `buf` never shrinks, so callers that keep it around
/// amortize the growth over many calls.
///
/// Returns the number of bytes written into `buf`.
pub fn invoke_with_growth<F>(
    call_name: &'static str,
    buf: &mut Vec<u8>,
    mut call: F,
) -> Result<usize, NativeError>
where
    F: FnMut(&mut [u8]) -> Result<usize, SizedCallError>,
{
    let required = match call(buf.as_mut_slice()) {
        Ok(used) => return Ok(used),
        Err(SizedCallError::Native(e)) => return Err(e),
        Err(SizedCallError::InsufficientBuffer { required }) => required,
    };

    if required <= buf.len() {
        return Err(NativeError::new(call_name, ERROR_INSUFFICIENT_BUFFER));
    }

    trace!(
        "{}: growing buffer from {} to {} bytes",
        call_name,
        buf.len(),
        required
    );
    buf.resize(required, 0);

    match call(buf.as_mut_slice()) {
        Ok(used) => Ok(used),
        Err(SizedCallError::Native(e)) => Err(e),
        Err(SizedCallError::InsufficientBuffer { .. }) => {
            Err(NativeError::new(call_name, ERROR_INSUFFICIENT_BUFFER))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn fill(buf: &mut [u8], payload: &[u8]) -> Result<usize, SizedCallError> {
        if buf.len() < payload.len() {
            return Err(SizedCallError::InsufficientBuffer {
                required: payload.len(),
            });
        }
        buf[..payload.len()].copy_from_slice(payload);
        Ok(payload.len())
    }

    #[test]
    fn test_fits_without_growing() {
        let mut buf = vec![0; 16];
        let used = invoke_with_growth("EvtRender", &mut buf, |b| fill(b, b"abc")).unwrap();

        assert_eq!(used, 3);
        assert_eq!(&buf[..used], b"abc");
        assert_eq!(buf.len(), 16);
    }

    #[test]
    fn test_grows_once_to_exact_size() {
        let mut buf = vec![0; 2];
        let mut calls = 0;
        let used = invoke_with_growth("EvtRender", &mut buf, |b| {
            calls += 1;
            fill(b, b"0123456789")
        })
        .unwrap();

        assert_eq!(calls, 2);
        assert_eq!(used, 10);
        assert_eq!(buf.len(), 10);
    }

    #[test]
    fn test_never_shrinks() {
        let mut buf = vec![0; 64];
        invoke_with_growth("EvtRender", &mut buf, |b| fill(b, b"tiny")).unwrap();

        assert_eq!(buf.len(), 64);
    }

    #[test]
    fn test_non_increasing_required_size_fails() {
        let mut buf = vec![0; 8];
        let mut calls = 0;
        let err = invoke_with_growth("EvtFormatMessage", &mut buf, |_| {
            calls += 1;
            Err(SizedCallError::InsufficientBuffer { required: 8 })
        })
        .unwrap_err();

        assert_eq!(calls, 1);
        assert_eq!(err, NativeError::new("EvtFormatMessage", ERROR_INSUFFICIENT_BUFFER));
        assert_eq!(buf.len(), 8);
    }

    #[test]
    fn test_at_most_one_resize() {
        let mut buf = vec![0; 4];
        let mut calls = 0;
        let err = invoke_with_growth("EvtRender", &mut buf, |b| {
            calls += 1;
            Err(SizedCallError::InsufficientBuffer {
                required: b.len() * 2,
            })
        })
        .unwrap_err();

        assert_eq!(calls, 2);
        assert_eq!(err.code, ERROR_INSUFFICIENT_BUFFER);
        assert_eq!(buf.len(), 8);
    }

    #[test]
    fn test_native_error_is_passed_through() {
        let mut buf = vec![0; 4];
        let err = invoke_with_growth("EvtRender", &mut buf, |_| {
            Err(SizedCallError::Native(NativeError::new("EvtRender", 87)))
        })
        .unwrap_err();

        assert_eq!(err.code, 87);
    }
}
