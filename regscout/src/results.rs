use serde::Serialize;
use std::cmp::Ordering;
use std::time::Duration;

use crate::store::ValueType;

/// Name shown for a key's unnamed (default) value.
pub const DEFAULT_VALUE_NAME: &str = "(Default)";

/// Type label shown for key results.
pub const KEY_TYPE_LABEL: &str = "Key";

/// Which displayed field of a result the match sits in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchField {
    #[default]
    None,
    /// The key's full path (key results).
    Path,
    /// The value's display name.
    Name,
    /// The value's formatted data.
    Data,
}

/// Where to highlight a match, in `char`s of the field's displayed text.
/// A zero length means the match could not be positioned.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MatchLocation {
    pub field: MatchField,
    pub start: usize,
    pub len: usize,
}

impl MatchLocation {
    pub fn new(field: MatchField, start: usize, len: usize) -> Self {
        Self { field, start, len }
    }

    /// A match in `field` whose position is unknown.
    pub fn unpositioned(field: MatchField) -> Self {
        Self::new(field, 0, 0)
    }

    pub fn is_positioned(&self) -> bool {
        self.field != MatchField::None && self.len > 0
    }
}

/// One match, emitted as soon as it is found.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SearchResult {
    /// Full display path of the key holding the match.
    pub key_path: String,
    /// Leaf name of that key.
    pub key_name: String,
    /// Value name; empty for key results and for the default value.
    pub value_name: String,
    /// `value_name`, or `(Default)` for the unnamed value.
    pub display_name: String,
    /// Raw type code; `None` for key results.
    pub value_type: Option<ValueType>,
    pub type_label: String,
    pub data_text: String,
    pub size_text: String,
    pub modified_text: String,
    pub is_key: bool,
    pub location: MatchLocation,
}

impl SearchResult {
    /// Display name for a value name, substituting `(Default)` for the
    /// unnamed value.
    pub fn display_name_for(value_name: &str) -> String {
        if value_name.is_empty() {
            DEFAULT_VALUE_NAME.to_string()
        } else {
            value_name.to_string()
        }
    }

    /// Ordering used when a stable result order is needed: path, then value
    /// name, keys before their values.
    pub fn sort_order(&self, other: &Self) -> Ordering {
        self.key_path
            .cmp(&other.key_path)
            .then_with(|| other.is_key.cmp(&self.is_key))
            .then_with(|| self.value_name.cmp(&other.value_name))
    }
}

/// Aggregate statistics for one completed search.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SearchStats {
    /// Keys dequeued, including excluded ones.
    pub keys_searched: u64,
    /// Keys discovered.
    pub keys_total: u64,
    /// Results delivered to the caller.
    pub results: u64,
    /// Whether the search ended early (cancelled, stopped by the caller, or
    /// stop-on-first).
    pub stopped: bool,
    pub threads: usize,
    pub elapsed: Duration,
}

/// Results collected from one search, plus its statistics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SearchReport {
    pub results: Vec<SearchResult>,
    pub stats: SearchStats,
}

impl SearchReport {
    pub fn new(mut results: Vec<SearchResult>, stats: SearchStats) -> Self {
        results.sort_by(SearchResult::sort_order);
        Self { results, stats }
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn key_results(&self) -> impl Iterator<Item = &SearchResult> {
        self.results.iter().filter(|r| r.is_key)
    }

    pub fn value_results(&self) -> impl Iterator<Item = &SearchResult> {
        self.results.iter().filter(|r| !r.is_key)
    }
}
