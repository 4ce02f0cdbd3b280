use std::collections::BTreeMap;
use std::fmt;

use jiff::Timestamp;
use log::{trace, warn};
use serde::Serialize;

use crate::CollectorSettings;
use crate::event::Event;
use crate::filter::{FieldClass, GlobFilterSet};
use crate::unroll::FieldNamer;

/// Measurement name of every projected record.
pub const MEASUREMENT: &str = "win_event";

/// A typed field value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    String(String),
    Int(i64),
    UInt(u64),
    Time(Timestamp),
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::String(s) => f.write_str(s),
            FieldValue::Int(i) => write!(f, "{i}"),
            FieldValue::UInt(u) => write!(f, "{u}"),
            FieldValue::Time(t) => write!(f, "{t}"),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::String(s.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        FieldValue::String(s)
    }
}

impl From<i64> for FieldValue {
    fn from(i: i64) -> Self {
        FieldValue::Int(i)
    }
}

impl From<u64> for FieldValue {
    fn from(u: u64) -> Self {
        FieldValue::UInt(u)
    }
}

/// One event, ready to be handed to an [`Accumulator`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProjectedRecord {
    pub name: String,
    pub tags: BTreeMap<String, String>,
    pub fields: BTreeMap<String, FieldValue>,
    pub timestamp: Timestamp,
}

/// Receives projected records.
pub trait Accumulator {
    fn add_fields(
        &mut self,
        name: &str,
        fields: BTreeMap<String, FieldValue>,
        tags: BTreeMap<String, String>,
        timestamp: Timestamp,
    );
}

impl Accumulator for Vec<ProjectedRecord> {
    fn add_fields(
        &mut self,
        name: &str,
        fields: BTreeMap<String, FieldValue>,
        tags: BTreeMap<String, String>,
        timestamp: Timestamp,
    ) {
        self.push(ProjectedRecord {
            name: name.to_string(),
            tags,
            fields,
            timestamp,
        });
    }
}

/// Projects [`Event`]s into tags and fields.
#[derive(Debug, Clone)]
pub struct RecordProjector {
    filter: GlobFilterSet,
    separator: String,
    process_userdata: bool,
    process_eventdata: bool,
    timestamp_from_event: bool,
}

impl RecordProjector {
    pub fn new(settings: &CollectorSettings) -> Self {
        RecordProjector::with_filter(settings, GlobFilterSet::from_settings(settings))
    }

    pub fn with_filter(settings: &CollectorSettings, filter: GlobFilterSet) -> Self {
        RecordProjector {
            filter,
            separator: settings.get_separator().to_string(),
            process_userdata: settings.should_process_userdata(),
            process_eventdata: settings.should_process_eventdata(),
            timestamp_from_event: settings.should_use_event_timestamp(),
        }
    }

    pub fn filter(&self) -> &GlobFilterSet {
        &self.filter
    }

    /// Every name/value pair of `event` that is a candidate for projection, in order.
    ///
    /// Unrolled `UserData`/`EventData` names never repeat a System or summary name: a clash is
    /// suffixed (`Level_2`) instead.
    pub fn candidates(&self, event: &Event) -> Vec<(String, FieldValue)> {
        self.candidates_at(event, parse_event_time(&event.time_created))
    }

    fn candidates_at(&self, event: &Event, time: Option<Timestamp>) -> Vec<(String, FieldValue)> {
        let created = match time {
            Some(ts) => FieldValue::Time(ts),
            None => FieldValue::from(event.time_created.as_str()),
        };

        let mut out: Vec<(String, FieldValue)> = vec![
            ("Source".into(), event.source.as_str().into()),
            ("EventID".into(), event.event_id.into()),
            ("Version".into(), event.version.into()),
            ("Level".into(), event.level.into()),
            ("LevelText".into(), event.level_text.as_str().into()),
            ("Task".into(), event.task.into()),
            ("TaskText".into(), event.task_text.as_str().into()),
            ("Opcode".into(), event.opcode.into()),
            ("OpcodeText".into(), event.opcode_text.as_str().into()),
            ("Keywords".into(), event.keywords.as_str().into()),
            ("TimeCreated".into(), event.time_created.as_str().into()),
            ("EventRecordID".into(), event.event_record_id.into()),
            ("ActivityID".into(), event.activity_id.as_str().into()),
            ("RelatedActivityID".into(), event.related_activity_id.as_str().into()),
            ("ProcessID".into(), event.process_id.into()),
            ("ThreadID".into(), event.thread_id.into()),
            ("Channel".into(), event.channel.as_str().into()),
            ("Computer".into(), event.computer.as_str().into()),
            ("UserID".into(), event.user_id.as_str().into()),
            ("Message".into(), event.message.as_str().into()),
            ("record_id".into(), event.event_record_id.into()),
            ("event_id".into(), event.event_id.into()),
            ("level".into(), event.level.into()),
            ("message".into(), event.message.as_str().into()),
            ("description".into(), event.description.as_str().into()),
            ("source".into(), event.source.as_str().into()),
            ("created".into(), created),
        ];

        let mut namer = FieldNamer::new(&self.separator);
        for (name, _) in &out {
            namer.reserve(name);
        }
        let sections = [
            (self.process_userdata, &event.user_data),
            (self.process_eventdata, &event.event_data),
        ];
        for (enabled, section) in sections {
            if let (true, Some(xml)) = (enabled, section) {
                out.extend(
                    namer
                        .unroll(xml)
                        .into_iter()
                        .map(|f| (f.name, FieldValue::String(f.value))),
                );
            }
        }

        out
    }

    pub fn project(&self, event: &Event) -> ProjectedRecord {
        let mut tags = BTreeMap::new();
        let mut fields = BTreeMap::new();
        let time = parse_event_time(&event.time_created);

        for (name, value) in self.candidates_at(event, time) {
            if tags.contains_key(&name) || fields.contains_key(&name) {
                trace!("`{}` was already projected, skipping duplicate", name);
                continue;
            }

            let class = self.filter.classify(&name);
            if class == FieldClass::Excluded || self.filter.should_suppress_empty(&name, &value) {
                continue;
            }

            if class == FieldClass::Tag {
                tags.insert(name, value.to_string());
            } else {
                fields.insert(name, value);
            }
        }

        ProjectedRecord {
            name: MEASUREMENT.to_string(),
            tags,
            fields,
            timestamp: self.timestamp(event, time),
        }
    }

    fn timestamp(&self, event: &Event, time: Option<Timestamp>) -> Timestamp {
        if !self.timestamp_from_event {
            return Timestamp::now();
        }

        match time {
            Some(ts) => ts,
            None => {
                warn!(
                    "failed to parse event time `{}`, using the current time",
                    event.time_created
                );
                Timestamp::now()
            }
        }
    }
}

/// Parse `TimeCreated/@SystemTime`, an RFC 3339 timestamp with up to 9 fractional digits.
pub fn parse_event_time(system_time: &str) -> Option<Timestamp> {
    system_time.trim().parse().ok()
}
