//! An in-memory [`EventLogApi`].
//!
//! Serves previously captured event XML through the same handle protocol as the native API, so
//! the whole pipeline (subscription, buffer growth, handle release) can run on any host. Captures
//! are the XML `wevtutil qe <channel> /f:xml` prints: a stream of `<Event>` documents.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::path::Path;

use hashbrown::HashMap;
use log::{debug, trace};

use crate::api::{EventLogApi, FormatKind, Pull, SubscriptionTarget};
use crate::err::{
    ERROR_EVT_MESSAGE_NOT_FOUND, ERROR_EVT_PUBLISHER_METADATA_NOT_FOUND, ERROR_INVALID_HANDLE,
    NativeError, Result, SizedCallError,
};
use crate::utils::utf16::encode_utf16le_z;

const EVENT_END: &str = "</Event>";

/// Text a publisher resolves for its events. Empty strings are reported as missing messages.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublisherText {
    pub message: String,
    pub level: String,
    pub task: String,
    pub opcode: String,
    pub keywords: Vec<String>,
}

#[derive(Debug, Clone)]
enum Opened {
    Subscription,
    Event(String),
    Publisher(String),
}

#[derive(Debug, Default)]
pub struct ReplayEventLog {
    pending: RefCell<VecDeque<String>>,
    publishers: HashMap<String, PublisherText>,
    open: RefCell<HashMap<u64, Opened>>,
    last_handle: Cell<u64>,
}

impl ReplayEventLog {
    pub fn new() -> Self {
        ReplayEventLog::default()
    }

    pub fn from_documents<I, S>(documents: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let log = ReplayEventLog::new();
        for doc in documents {
            log.push(doc);
        }
        log
    }

    /// Split a capture of concatenated `<Event>` documents.
    pub fn from_xml(capture: &str) -> Self {
        ReplayEventLog::from_documents(split_events(capture))
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let capture = std::fs::read_to_string(path.as_ref())?;
        let log = ReplayEventLog::from_xml(&capture);
        debug!(
            "loaded {} events from `{}`",
            log.pending(),
            path.as_ref().display()
        );
        Ok(log)
    }

    /// Resolve text for events of `publisher` instead of reporting missing metadata.
    pub fn with_publisher(mut self, publisher: impl Into<String>, text: PublisherText) -> Self {
        self.publishers.insert(publisher.into(), text);
        self
    }

    /// Queue an event for the next pull.
    pub fn push(&self, document: impl Into<String>) {
        self.pending.borrow_mut().push_back(document.into());
    }

    /// Number of events not yet pulled.
    pub fn pending(&self) -> usize {
        self.pending.borrow().len()
    }

    /// Number of handles handed out and not closed yet.
    pub fn open_handles(&self) -> usize {
        self.open.borrow().len()
    }

    fn allocate(&self, opened: Opened) -> u64 {
        let handle = self.last_handle.get() + 1;
        self.last_handle.set(handle);
        trace!("opened handle {}: {:?}", handle, opened);
        self.open.borrow_mut().insert(handle, opened);
        handle
    }

    fn lookup(&self, call: &'static str, handle: u64) -> std::result::Result<Opened, NativeError> {
        self.open
            .borrow()
            .get(&handle)
            .cloned()
            .ok_or(NativeError::new(call, ERROR_INVALID_HANDLE))
    }
}

/// Copy `bytes` into `buf` the way the sized native calls do.
fn fill(buf: &mut [u8], bytes: &[u8]) -> std::result::Result<usize, SizedCallError> {
    if buf.len() < bytes.len() {
        return Err(SizedCallError::InsufficientBuffer {
            required: bytes.len(),
        });
    }
    buf[..bytes.len()].copy_from_slice(bytes);
    Ok(bytes.len())
}

impl EventLogApi for ReplayEventLog {
    type Handle = u64;

    fn subscribe(&self, target: &SubscriptionTarget) -> std::result::Result<u64, NativeError> {
        debug!("replaying {} events for `{}`", self.pending(), target);
        Ok(self.allocate(Opened::Subscription))
    }

    fn next_batch(
        &self,
        subscription: u64,
        max: usize,
    ) -> std::result::Result<Pull<u64>, NativeError> {
        match self.lookup("EvtNext", subscription)? {
            Opened::Subscription => {}
            _ => return Err(NativeError::new("EvtNext", ERROR_INVALID_HANDLE)),
        }

        let batch: Vec<String> = {
            let mut pending = self.pending.borrow_mut();
            let n = max.min(pending.len());
            pending.drain(..n).collect()
        };
        if batch.is_empty() {
            return Ok(Pull::Exhausted);
        }

        Ok(Pull::Events(
            batch
                .into_iter()
                .map(|doc| self.allocate(Opened::Event(doc)))
                .collect(),
        ))
    }

    fn render_xml(&self, event: u64, buf: &mut [u8]) -> std::result::Result<usize, SizedCallError> {
        match self.lookup("EvtRender", event)? {
            Opened::Event(xml) => fill(buf, &encode_utf16le_z(&xml)),
            _ => Err(NativeError::new("EvtRender", ERROR_INVALID_HANDLE).into()),
        }
    }

    fn open_publisher_metadata(
        &self,
        publisher: &str,
        _locale: u32,
    ) -> std::result::Result<u64, NativeError> {
        if !self.publishers.contains_key(publisher) {
            return Err(NativeError::new(
                "EvtOpenPublisherMetadata",
                ERROR_EVT_PUBLISHER_METADATA_NOT_FOUND,
            ));
        }
        Ok(self.allocate(Opened::Publisher(publisher.to_string())))
    }

    fn format_message(
        &self,
        publisher: u64,
        event: u64,
        kind: FormatKind,
        buf: &mut [u8],
    ) -> std::result::Result<usize, SizedCallError> {
        const CALL: &str = "EvtFormatMessage";

        let name = match self.lookup(CALL, publisher)? {
            Opened::Publisher(name) => name,
            _ => return Err(NativeError::new(CALL, ERROR_INVALID_HANDLE).into()),
        };
        if !matches!(self.lookup(CALL, event)?, Opened::Event(_)) {
            return Err(NativeError::new(CALL, ERROR_INVALID_HANDLE).into());
        }
        let text = self
            .publishers
            .get(&name)
            .ok_or(NativeError::new(CALL, ERROR_INVALID_HANDLE))?;
        let not_found = || SizedCallError::from(NativeError::new(CALL, ERROR_EVT_MESSAGE_NOT_FOUND));

        let bytes = match kind {
            FormatKind::Keyword => {
                if text.keywords.is_empty() {
                    return Err(not_found());
                }
                let mut bytes: Vec<u8> = text
                    .keywords
                    .iter()
                    .flat_map(|k| encode_utf16le_z(k))
                    .collect();
                bytes.extend_from_slice(&[0, 0]);
                bytes
            }
            _ => {
                let s = match kind {
                    FormatKind::Event => &text.message,
                    FormatKind::Level => &text.level,
                    FormatKind::Task => &text.task,
                    _ => &text.opcode,
                };
                if s.is_empty() {
                    return Err(not_found());
                }
                encode_utf16le_z(s)
            }
        };

        fill(buf, &bytes)
    }

    fn close(&self, handle: u64) -> std::result::Result<(), NativeError> {
        match self.open.borrow_mut().remove(&handle) {
            Some(opened) => {
                trace!("closed handle {}: {:?}", handle, opened);
                Ok(())
            }
            None => Err(NativeError::new("EvtClose", ERROR_INVALID_HANDLE)),
        }
    }
}

/// Start of the next `<Event>` element, skipping `<Events>` wrappers and `<EventData>`.
fn find_event_start(s: &str) -> Option<usize> {
    let mut from = 0;
    while let Some(pos) = s[from..].find("<Event") {
        let at = from + pos;
        match s[at + "<Event".len()..].chars().next() {
            Some(c) if c == '>' || c.is_whitespace() => return Some(at),
            _ => from = at + 1,
        }
    }
    None
}

fn split_events(capture: &str) -> Vec<String> {
    let mut events = Vec::new();
    let mut rest = capture;

    while let Some(start) = find_event_start(rest) {
        let Some(len) = rest[start..].find(EVENT_END) else {
            debug!("ignoring truncated event at the end of the capture");
            break;
        };
        let end = start + len + EVENT_END.len();
        events.push(rest[start..end].to_string());
        rest = &rest[end..];
    }

    events
}
