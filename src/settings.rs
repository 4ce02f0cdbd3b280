use serde::Deserialize;

use crate::api::SubscriptionTarget;
use crate::err::{EventLogError, Result};

/// Options of one collector instance.
///
/// Built either with the builder methods or deserialized (every key is optional):
///
/// ```
/// use win_eventlog::CollectorSettings;
///
/// let settings: CollectorSettings = serde_json::from_str(
///     r#"{ "eventlog_name": "Application", "event_tags": ["Source", "Level*"] }"#,
/// ).unwrap();
/// assert_eq!(settings.get_separator(), "_");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CollectorSettings {
    locale: u32,
    eventlog_name: String,
    xpath_query: String,
    process_userdata: bool,
    process_eventdata: bool,
    separator: String,
    only_first_line_of_message: bool,
    timestamp_from_event: bool,
    event_tags: Vec<String>,
    event_fields: Vec<String>,
    exclude_fields: Vec<String>,
    exclude_empty: Vec<String>,
}

fn strings(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

impl Default for CollectorSettings {
    fn default() -> Self {
        CollectorSettings {
            locale: 0,
            eventlog_name: String::new(),
            xpath_query: String::new(),
            process_userdata: true,
            process_eventdata: true,
            separator: "_".to_string(),
            only_first_line_of_message: true,
            timestamp_from_event: true,
            event_tags: strings(&[
                "Source", "EventID", "Level", "LevelText", "Keywords", "Channel", "Computer",
            ]),
            event_fields: strings(&["*"]),
            exclude_fields: Vec::new(),
            exclude_empty: strings(&["Task", "Opcode", "*ActivityID", "UserID"]),
        }
    }
}

impl CollectorSettings {
    pub fn new() -> Self {
        CollectorSettings::default()
    }

    /// LCID used to resolve text from publisher metadata, `0` for the host default.
    pub fn locale(mut self, locale: u32) -> Self {
        self.locale = locale;
        self
    }

    /// Channel to subscribe to, used when no query is set.
    pub fn eventlog_name(mut self, name: impl Into<String>) -> Self {
        self.eventlog_name = name.into();
        self
    }

    /// XPath (`Event/System[EventID=999]`) or structured `<QueryList>` query.
    pub fn xpath_query(mut self, query: impl Into<String>) -> Self {
        self.xpath_query = query.into();
        self
    }

    pub fn process_userdata(mut self, enabled: bool) -> Self {
        self.process_userdata = enabled;
        self
    }

    pub fn process_eventdata(mut self, enabled: bool) -> Self {
        self.process_eventdata = enabled;
        self
    }

    /// Separator between the components of unrolled field names.
    pub fn separator(mut self, separator: impl Into<String>) -> Self {
        self.separator = separator.into();
        self
    }

    pub fn only_first_line_of_message(mut self, enabled: bool) -> Self {
        self.only_first_line_of_message = enabled;
        self
    }

    /// Use `TimeCreated` as the record timestamp instead of the time of collection.
    pub fn timestamp_from_event(mut self, enabled: bool) -> Self {
        self.timestamp_from_event = enabled;
        self
    }

    pub fn event_tags<S: AsRef<str>>(mut self, patterns: &[S]) -> Self {
        self.event_tags = patterns.iter().map(|p| p.as_ref().to_string()).collect();
        self
    }

    pub fn event_fields<S: AsRef<str>>(mut self, patterns: &[S]) -> Self {
        self.event_fields = patterns.iter().map(|p| p.as_ref().to_string()).collect();
        self
    }

    pub fn exclude_fields<S: AsRef<str>>(mut self, patterns: &[S]) -> Self {
        self.exclude_fields = patterns.iter().map(|p| p.as_ref().to_string()).collect();
        self
    }

    pub fn exclude_empty<S: AsRef<str>>(mut self, patterns: &[S]) -> Self {
        self.exclude_empty = patterns.iter().map(|p| p.as_ref().to_string()).collect();
        self
    }

    /// Check the settings that cannot be recovered from at collection time.
    pub fn validate(&self) -> Result<()> {
        if self.target().is_none() {
            return Err(EventLogError::InvalidSettings {
                message: "one of `eventlog_name` or `xpath_query` must be set".to_string(),
            });
        }
        if self.separator.is_empty() {
            return Err(EventLogError::InvalidSettings {
                message: "`separator` must not be empty".to_string(),
            });
        }
        Ok(())
    }

    pub fn target(&self) -> Option<SubscriptionTarget> {
        SubscriptionTarget::resolve(&self.eventlog_name, &self.xpath_query)
    }

    pub fn get_locale(&self) -> u32 {
        self.locale
    }

    pub fn get_separator(&self) -> &str {
        &self.separator
    }

    pub fn should_process_userdata(&self) -> bool {
        self.process_userdata
    }

    pub fn should_process_eventdata(&self) -> bool {
        self.process_eventdata
    }

    pub fn should_keep_only_first_line_of_message(&self) -> bool {
        self.only_first_line_of_message
    }

    pub fn should_use_event_timestamp(&self) -> bool {
        self.timestamp_from_event
    }

    pub fn get_event_tags(&self) -> &[String] {
        &self.event_tags
    }

    pub fn get_event_fields(&self) -> &[String] {
        &self.event_fields
    }

    pub fn get_exclude_fields(&self) -> &[String] {
        &self.exclude_fields
    }

    pub fn get_exclude_empty(&self) -> &[String] {
        &self.exclude_empty
    }
}
