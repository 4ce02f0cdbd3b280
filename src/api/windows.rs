//! [`EventLogApi`] over `wevtapi.dll`.

use std::cell::RefCell;
use std::ptr;

use hashbrown::HashMap;
use log::{trace, warn};
use windows_sys::Win32::Foundation::{CloseHandle, GetLastError, HANDLE};
use windows_sys::Win32::System::EventLog::{
    EVT_HANDLE, EvtClose, EvtFormatMessage, EvtFormatMessageEvent, EvtFormatMessageKeyword,
    EvtFormatMessageLevel, EvtFormatMessageOpcode, EvtFormatMessageTask, EvtNext,
    EvtOpenPublisherMetadata, EvtRender, EvtRenderEventXml, EvtSubscribe,
    EvtSubscribeToFutureEvents,
};
use windows_sys::Win32::System::Threading::CreateEventW;

use super::{EventLogApi, FormatKind, Pull, SubscriptionTarget};
use crate::err::{
    ERROR_INSUFFICIENT_BUFFER, ERROR_INVALID_OPERATION, ERROR_NO_MORE_ITEMS, NativeError,
    SizedCallError,
};

fn to_wide(s: &str) -> Vec<u16> {
    s.encode_utf16().chain(std::iter::once(0)).collect()
}

fn last_error(call: &'static str) -> NativeError {
    // Safety: reads thread-local state only.
    NativeError::new(call, unsafe { GetLastError() })
}

fn sized_error(call: &'static str, required: usize) -> SizedCallError {
    let err = last_error(call);
    if err.code == ERROR_INSUFFICIENT_BUFFER {
        SizedCallError::InsufficientBuffer { required }
    } else {
        SizedCallError::Native(err)
    }
}

/// The local machine's event log service.
///
/// Each subscription owns the wait event it was created with; both are closed together.
#[derive(Debug, Default)]
pub struct WindowsEventLog {
    signals: RefCell<HashMap<EVT_HANDLE, HANDLE>>,
}

impl WindowsEventLog {
    pub fn new() -> Self {
        WindowsEventLog::default()
    }
}

fn close_signal(signal: HANDLE) {
    // Safety: `signal` was created by `subscribe` and is closed exactly once.
    if unsafe { CloseHandle(signal) } == 0 {
        warn!("failed to close subscription signal: {}", last_error("CloseHandle"));
    }
}

impl EventLogApi for WindowsEventLog {
    type Handle = EVT_HANDLE;

    fn subscribe(&self, target: &SubscriptionTarget) -> Result<EVT_HANDLE, NativeError> {
        let (channel, query) = match target {
            SubscriptionTarget::Channel(name) => (Some(name.as_str()), "*"),
            SubscriptionTarget::Query { channel, query } => {
                // Structured queries name their channels themselves.
                if target.is_structured() || channel.is_empty() {
                    (None, query.as_str())
                } else {
                    (Some(channel.as_str()), query.as_str())
                }
            }
        };

        let channel_w = channel.map(to_wide);
        let query_w = to_wide(query);

        // Safety: plain auto-reset event, no name, default security.
        let signal = unsafe { CreateEventW(ptr::null(), 0, 0, ptr::null()) };
        if signal.is_null() {
            return Err(last_error("CreateEventW"));
        }

        // Safety: every pointer is either null or a NUL-terminated buffer that outlives the call.
        let handle = unsafe {
            EvtSubscribe(
                0,
                signal,
                channel_w.as_ref().map_or(ptr::null(), |c| c.as_ptr()),
                query_w.as_ptr(),
                0,
                ptr::null(),
                None,
                EvtSubscribeToFutureEvents as u32,
            )
        };
        if handle == 0 {
            let err = last_error("EvtSubscribe");
            close_signal(signal);
            return Err(err);
        }

        self.signals.borrow_mut().insert(handle, signal);
        Ok(handle)
    }

    fn next_batch(
        &self,
        subscription: EVT_HANDLE,
        max: usize,
    ) -> Result<Pull<EVT_HANDLE>, NativeError> {
        let mut handles: Vec<EVT_HANDLE> = vec![0; max];
        let mut returned = 0u32;

        // Safety: `handles` has room for `max` handles.
        let ok = unsafe {
            EvtNext(
                subscription,
                max as u32,
                handles.as_mut_ptr(),
                0,
                0,
                &mut returned,
            )
        };

        if ok == 0 {
            let err = last_error("EvtNext");
            return match err.code {
                ERROR_NO_MORE_ITEMS => Ok(Pull::Exhausted),
                ERROR_INVALID_OPERATION if returned == 0 => Ok(Pull::Exhausted),
                _ => Err(err),
            };
        }

        handles.truncate(returned as usize);
        trace!("EvtNext returned {} handles", handles.len());
        Ok(Pull::Events(handles))
    }

    fn render_xml(&self, event: EVT_HANDLE, buf: &mut [u8]) -> Result<usize, SizedCallError> {
        let mut used = 0u32;
        let mut property_count = 0u32;

        // Safety: `buf` is valid for `buf.len()` bytes.
        let ok = unsafe {
            EvtRender(
                0,
                event,
                EvtRenderEventXml as u32,
                buf.len() as u32,
                buf.as_mut_ptr().cast(),
                &mut used,
                &mut property_count,
            )
        };

        if ok == 0 {
            return Err(sized_error("EvtRender", used as usize));
        }
        Ok(used as usize)
    }

    fn open_publisher_metadata(
        &self,
        publisher: &str,
        locale: u32,
    ) -> Result<EVT_HANDLE, NativeError> {
        let publisher_w = to_wide(publisher);

        // Safety: `publisher_w` is NUL-terminated and outlives the call.
        let handle =
            unsafe { EvtOpenPublisherMetadata(0, publisher_w.as_ptr(), ptr::null(), locale, 0) };
        if handle == 0 {
            return Err(last_error("EvtOpenPublisherMetadata"));
        }
        Ok(handle)
    }

    fn format_message(
        &self,
        publisher: EVT_HANDLE,
        event: EVT_HANDLE,
        kind: FormatKind,
        buf: &mut [u8],
    ) -> Result<usize, SizedCallError> {
        let flags = match kind {
            FormatKind::Event => EvtFormatMessageEvent,
            FormatKind::Level => EvtFormatMessageLevel,
            FormatKind::Task => EvtFormatMessageTask,
            FormatKind::Opcode => EvtFormatMessageOpcode,
            FormatKind::Keyword => EvtFormatMessageKeyword,
        };

        // Sizes are exchanged in UTF-16 code units.
        let capacity = (buf.len() / 2) as u32;
        let out = if capacity == 0 {
            ptr::null_mut()
        } else {
            buf.as_mut_ptr().cast::<u16>()
        };
        let mut used = 0u32;

        // Safety: `out` is null or valid for `capacity` code units.
        let ok = unsafe {
            EvtFormatMessage(
                publisher,
                event,
                0,
                0,
                ptr::null(),
                flags as u32,
                capacity,
                out,
                &mut used,
            )
        };

        if ok == 0 {
            return Err(sized_error("EvtFormatMessage", used as usize * 2));
        }
        Ok(used as usize * 2)
    }

    fn close(&self, handle: EVT_HANDLE) -> Result<(), NativeError> {
        // Safety: handles passed here come from this API and are closed once.
        let failed = (unsafe { EvtClose(handle) } == 0).then(|| last_error("EvtClose"));

        if let Some(signal) = self.signals.borrow_mut().remove(&handle) {
            close_signal(signal);
        }
        match failed {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
