//! The native event log calls the collector is built on.
//!
//! [`EventLogApi`] mirrors the handful of `wevtapi` calls the pipeline needs (subscribe, pull,
//! render, open publisher metadata, format message, close). Handles are plain `Copy` values;
//! ownership is expressed with [`OwnedHandle`], which closes its handle when dropped.

#[cfg(windows)]
pub mod windows;

use std::fmt::Debug;

use log::warn;

use crate::err::{NativeError, SizedCallError};

/// Kind of text requested from publisher metadata for an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FormatKind {
    Event,
    Level,
    Task,
    Opcode,
    Keyword,
}

impl FormatKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FormatKind::Event => "message",
            FormatKind::Level => "level",
            FormatKind::Task => "task",
            FormatKind::Opcode => "opcode",
            FormatKind::Keyword => "keyword",
        }
    }
}

/// What a subscription is bound to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionTarget {
    /// Every event of a channel.
    Channel(String),
    /// An XPath filter (optionally scoped to a channel) or a structured `<QueryList>` query.
    Query { channel: String, query: String },
}

impl SubscriptionTarget {
    /// A query takes precedence over a bare channel name.
    pub fn resolve(eventlog_name: &str, query: &str) -> Option<Self> {
        if !query.trim().is_empty() {
            Some(SubscriptionTarget::Query {
                channel: eventlog_name.to_string(),
                query: query.to_string(),
            })
        } else if !eventlog_name.trim().is_empty() {
            Some(SubscriptionTarget::Channel(eventlog_name.to_string()))
        } else {
            None
        }
    }

    /// Whether the query is a structured XML query rather than an XPath expression.
    pub fn is_structured(&self) -> bool {
        match self {
            SubscriptionTarget::Channel(_) => false,
            SubscriptionTarget::Query { query, .. } => query.trim_start().starts_with('<'),
        }
    }
}

impl std::fmt::Display for SubscriptionTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SubscriptionTarget::Channel(name) => write!(f, "{name}"),
            SubscriptionTarget::Query { channel, query } if channel.is_empty() => {
                write!(f, "{}", query.trim())
            }
            SubscriptionTarget::Query { channel, query } => {
                write!(f, "{}: {}", channel, query.trim())
            }
        }
    }
}

/// Result of pulling from a subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pull<H> {
    Events(Vec<H>),
    /// No more events are available right now.
    Exhausted,
}

pub trait EventLogApi {
    /// A native handle. `Default` is the null handle.
    type Handle: Copy + Eq + Debug + Default;

    /// Subscribe to future events of `target`.
    fn subscribe(&self, target: &SubscriptionTarget) -> Result<Self::Handle, NativeError>;

    /// Pull up to `max` event handles from `subscription`.
    fn next_batch(
        &self,
        subscription: Self::Handle,
        max: usize,
    ) -> Result<Pull<Self::Handle>, NativeError>;

    /// Render `event` as UTF-16LE XML into `buf`, returning the number of bytes written.
    fn render_xml(&self, event: Self::Handle, buf: &mut [u8]) -> Result<usize, SizedCallError>;

    fn open_publisher_metadata(
        &self,
        publisher: &str,
        locale: u32,
    ) -> Result<Self::Handle, NativeError>;

    /// Format a UTF-16LE string of `kind` for `event` into `buf`, returning the number of bytes
    /// written.
    fn format_message(
        &self,
        publisher: Self::Handle,
        event: Self::Handle,
        kind: FormatKind,
        buf: &mut [u8],
    ) -> Result<usize, SizedCallError>;

    fn close(&self, handle: Self::Handle) -> Result<(), NativeError>;
}

/// A handle that is closed when dropped.
pub struct OwnedHandle<'a, A: EventLogApi + ?Sized> {
    api: &'a A,
    handle: A::Handle,
}

impl<'a, A: EventLogApi + ?Sized> OwnedHandle<'a, A> {
    pub fn new(api: &'a A, handle: A::Handle) -> Self {
        OwnedHandle { api, handle }
    }

    pub fn get(&self) -> A::Handle {
        self.handle
    }

    pub fn is_null(&self) -> bool {
        self.handle == A::Handle::default()
    }

    /// Close now, reporting the failure instead of logging it.
    pub fn close(self) -> Result<(), NativeError> {
        let this = std::mem::ManuallyDrop::new(self);
        if this.is_null() {
            return Ok(());
        }
        this.api.close(this.handle)
    }
}

impl<A: EventLogApi + ?Sized> Drop for OwnedHandle<'_, A> {
    fn drop(&mut self) {
        if self.is_null() {
            return;
        }
        if let Err(e) = self.api.close(self.handle) {
            warn!("failed to close handle {:?}: {}", self.handle, e);
        }
    }
}
