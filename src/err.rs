use thiserror::Error;

use std::fmt;
use std::io;

pub type Result<T> = std::result::Result<T, EventLogError>;

/// `ERROR_ACCESS_DENIED`
pub const ERROR_ACCESS_DENIED: u32 = 5;
/// `ERROR_INVALID_HANDLE`
pub const ERROR_INVALID_HANDLE: u32 = 6;
/// `ERROR_INSUFFICIENT_BUFFER`
pub const ERROR_INSUFFICIENT_BUFFER: u32 = 122;
/// `ERROR_NO_MORE_ITEMS`
pub const ERROR_NO_MORE_ITEMS: u32 = 259;
/// `ERROR_INVALID_OPERATION`
pub const ERROR_INVALID_OPERATION: u32 = 4317;
/// `ERROR_EVT_PUBLISHER_METADATA_NOT_FOUND`
pub const ERROR_EVT_PUBLISHER_METADATA_NOT_FOUND: u32 = 15002;
/// `ERROR_EVT_MESSAGE_NOT_FOUND`
pub const ERROR_EVT_MESSAGE_NOT_FOUND: u32 = 15027;

/// A failed native call, carrying the raw Win32 error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("{call} failed with error code {code}")]
pub struct NativeError {
    pub call: &'static str,
    pub code: u32,
}

impl NativeError {
    pub fn new(call: &'static str, code: u32) -> Self {
        NativeError { call, code }
    }

    pub fn is_access_denied(&self) -> bool {
        self.code == ERROR_ACCESS_DENIED
    }
}

/// Outcome of a native call writing into a caller-sized buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizedCallError {
    /// The buffer was too small. `required` is the byte size the call asked for.
    InsufficientBuffer { required: usize },
    Native(NativeError),
}

impl From<NativeError> for SizedCallError {
    fn from(err: NativeError) -> Self {
        SizedCallError::Native(err)
    }
}

impl fmt::Display for SizedCallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SizedCallError::InsufficientBuffer { required } => {
                write!(f, "insufficient buffer, {required} bytes required")
            }
            SizedCallError::Native(e) => e.fmt(f),
        }
    }
}

#[derive(Debug, Error)]
pub enum EventLogError {
    #[error("invalid settings: {message}")]
    InvalidSettings { message: String },

    #[error(transparent)]
    Native(#[from] NativeError),

    #[error("failed to subscribe to `{target}`: {source}")]
    Subscribe {
        target: String,
        #[source]
        source: NativeError,
    },

    #[error("failed to decode event XML: {message}")]
    XmlDecode { message: String },

    #[error("rendered buffer is not valid UTF-16: {message}")]
    Utf16 { message: &'static str },

    #[error("an I/O error has occurred: {0}")]
    Io(#[from] io::Error),
}

impl From<quick_xml::Error> for EventLogError {
    fn from(err: quick_xml::Error) -> Self {
        EventLogError::XmlDecode {
            message: err.to_string(),
        }
    }
}

impl From<quick_xml::events::attributes::AttrError> for EventLogError {
    fn from(err: quick_xml::events::attributes::AttrError) -> Self {
        EventLogError::XmlDecode {
            message: err.to_string(),
        }
    }
}
