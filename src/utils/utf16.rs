#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub(crate) enum Utf16LeDecodeError {
    OddLength,
    InvalidData,
}

impl Utf16LeDecodeError {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Utf16LeDecodeError::OddLength => "odd number of bytes",
            Utf16LeDecodeError::InvalidData => "unpaired surrogate",
        }
    }
}

fn units_from_le_bytes(bytes: &[u8]) -> Result<Vec<u16>, Utf16LeDecodeError> {
    if !bytes.len().is_multiple_of(2) {
        return Err(Utf16LeDecodeError::OddLength);
    }

    Ok(bytes
        .chunks_exact(2)
        .map(|chunk| u16::from_le_bytes([chunk[0], chunk[1]]))
        .collect())
}

/// Decode a UTF-16LE byte slice until the first NUL (0x0000), if present.
pub(crate) fn decode_utf16le_bytes_z(bytes: &[u8]) -> Result<String, Utf16LeDecodeError> {
    let units = units_from_le_bytes(bytes)?;
    decode_utf16_units_z(&units)
}

/// Decode UTF-16 code units until the first NUL (0x0000), if present.
pub(crate) fn decode_utf16_units_z(units: &[u16]) -> Result<String, Utf16LeDecodeError> {
    let end = units.iter().position(|&c| c == 0).unwrap_or(units.len());
    let slice = &units[..end];

    // Pure ASCII converts without surrogate handling.
    if slice.iter().all(|&c| c <= 0x7F) {
        return Ok(slice.iter().map(|&c| c as u8 as char).collect());
    }

    String::from_utf16(slice).map_err(|_| Utf16LeDecodeError::InvalidData)
}

/// Decode a UTF-16LE list of NUL-terminated strings (`a\0b\0\0`), skipping empty entries.
pub(crate) fn decode_utf16le_multi_sz(bytes: &[u8]) -> Result<Vec<String>, Utf16LeDecodeError> {
    let units = units_from_le_bytes(bytes)?;

    units
        .split(|&c| c == 0)
        .filter(|s| !s.is_empty())
        .map(decode_utf16_units_z)
        .collect()
}

/// Encode `s` as NUL-terminated UTF-16LE bytes, the way the native render calls fill buffers.
pub(crate) fn encode_utf16le_z(s: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity((s.len() + 1) * 2);
    for cu in s.encode_utf16().chain(std::iter::once(0)) {
        out.extend_from_slice(&cu.to_le_bytes());
    }
    out
}
