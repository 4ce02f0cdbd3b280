//! Collects events from a Windows event log subscription and projects them into
//! tagged, typed metric records.
//!
//! ```no_run
//! use win_eventlog::{CollectorSettings, EventLogCollector, ProjectedRecord, ReplayEventLog};
//!
//! let settings = CollectorSettings::new()
//!     .eventlog_name("Application")
//!     .event_tags(&["Source", "Level*"]);
//! let api = ReplayEventLog::from_path("application.xml").unwrap();
//! let mut collector = EventLogCollector::new(api, &settings).unwrap();
//!
//! let mut records: Vec<ProjectedRecord> = Vec::new();
//! collector.gather(&mut records).unwrap();
//! for record in records {
//!     println!("{} {:?} {:?}", record.name, record.tags, record.fields);
//! }
//! ```

pub mod api;
pub mod buffered_call;
pub mod collector;
pub mod err;
pub mod event;
pub mod filter;
pub mod projection;
pub mod render;
pub mod replay;
pub mod unroll;

mod settings;
mod utils;

pub use api::{EventLogApi, FormatKind, OwnedHandle, Pull, SubscriptionTarget};
#[cfg(windows)]
pub use api::windows::WindowsEventLog;
pub use collector::{EVENT_BATCH_SIZE, EventLogCollector};
pub use err::{EventLogError, NativeError, Result, SizedCallError};
pub use event::{Event, PartialEvent};
pub use filter::{FieldClass, GlobFilterSet};
pub use projection::{Accumulator, FieldValue, MEASUREMENT, ProjectedRecord, RecordProjector};
pub use render::{EventRenderer, RenderedEvent};
pub use replay::{PublisherText, ReplayEventLog};
pub use settings::CollectorSettings;
pub use unroll::{FieldNamer, UnrolledField, unroll};
