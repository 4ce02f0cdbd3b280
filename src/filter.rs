//! Glob based tag/field selection.
//!
//! Every candidate name of an event goes through [`GlobFilterSet::classify`]. Tag patterns are
//! checked first and always win, so a name can be kept as a tag even if it is also listed in
//! `exclude_fields`. Exclusion only applies to names that would otherwise become fields.

use glob::{MatchOptions, Pattern};
use log::{error, trace};

use crate::projection::FieldValue;

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: false,
    require_literal_leading_dot: false,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldClass {
    Tag,
    Field,
    Excluded,
}

/// An ordered list of compiled patterns.
///
/// Patterns that fail to compile are kept out of the list (they never match); the failure is
/// logged once when the list is built.
#[derive(Debug, Clone, Default)]
pub struct PatternList {
    patterns: Vec<Pattern>,
}

impl PatternList {
    pub fn new<S: AsRef<str>>(list: &'static str, patterns: &[S]) -> Self {
        let patterns = patterns
            .iter()
            .filter_map(|p| match Pattern::new(p.as_ref()) {
                Ok(pattern) => Some(pattern),
                Err(e) => {
                    error!(
                        "invalid glob pattern `{}` in `{}`, it will never match: {}",
                        p.as_ref(),
                        list,
                        e
                    );
                    None
                }
            })
            .collect();

        PatternList { patterns }
    }

    /// First pattern that matches `name`, if any.
    pub fn first_match(&self, name: &str) -> Option<&Pattern> {
        self.patterns
            .iter()
            .find(|p| p.matches_with(name, MATCH_OPTIONS))
    }

    pub fn matches(&self, name: &str) -> bool {
        self.first_match(name).is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct GlobFilterSet {
    tags: PatternList,
    fields: PatternList,
    exclude: PatternList,
    exclude_empty: PatternList,
}

impl GlobFilterSet {
    pub fn new<S: AsRef<str>>(
        event_tags: &[S],
        event_fields: &[S],
        exclude_fields: &[S],
        exclude_empty: &[S],
    ) -> Self {
        GlobFilterSet {
            tags: PatternList::new("event_tags", event_tags),
            fields: PatternList::new("event_fields", event_fields),
            exclude: PatternList::new("exclude_fields", exclude_fields),
            exclude_empty: PatternList::new("exclude_empty", exclude_empty),
        }
    }

    pub fn from_settings(settings: &crate::CollectorSettings) -> Self {
        GlobFilterSet::new(
            settings.get_event_tags(),
            settings.get_event_fields(),
            settings.get_exclude_fields(),
            settings.get_exclude_empty(),
        )
    }

    pub fn classify(&self, name: &str) -> FieldClass {
        if let Some(p) = self.tags.first_match(name) {
            trace!("`{}` is a tag (matched `{}`)", name, p);
            return FieldClass::Tag;
        }

        if self.fields.matches(name) {
            if let Some(p) = self.exclude.first_match(name) {
                trace!("`{}` is excluded (matched `{}`)", name, p);
                return FieldClass::Excluded;
            }
            return FieldClass::Field;
        }

        FieldClass::Excluded
    }

    /// Whether `value` should be dropped because it is empty and `name` is listed in
    /// `exclude_empty`.
    pub fn should_suppress_empty(&self, name: &str, value: &FieldValue) -> bool {
        if !self.exclude_empty.matches(name) {
            return false;
        }

        match value {
            FieldValue::String(s) => s.is_empty(),
            FieldValue::Int(i) => *i == 0,
            FieldValue::UInt(u) => *u == 0,
            FieldValue::Time(_) => false,
        }
    }
}
