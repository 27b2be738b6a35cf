//! Lineage report model
//!
//! This is the JSON document written by the CLI. Keys of `errors` and
//! `lineage` are target table FQNs (or `"script"` for whole-script parse
//! failures); maps keep script order.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Error key used when the whole script failed to parse
pub const SCRIPT_ERROR_KEY: &str = "script";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineageReport {
    pub date_parsed: DateTime<Utc>,
    pub errors: IndexMap<String, Vec<String>>,
    pub lineage: IndexMap<String, TableLineage>,
}

/// Lineage of one target table
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableLineage {
    pub depends_on: Vec<String>,
    pub columns: IndexMap<String, ColumnLineage>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnLineage {
    pub lineage: Vec<String>,
}

impl Default for LineageReport {
    fn default() -> Self {
        Self::new()
    }
}

impl LineageReport {
    pub fn new() -> Self {
        Self {
            date_parsed: Utc::now(),
            errors: IndexMap::new(),
            lineage: IndexMap::new(),
        }
    }

    pub fn add_error(&mut self, key: impl Into<String>, message: impl Into<String>) {
        self.errors.entry(key.into()).or_default().push(message.into());
    }

    /// Merge a per-file report, prefixing its errors with `[file_name]`
    ///
    /// Dictionary union: lineage entries overwrite, error lists append.
    pub fn merge_file(&mut self, file_name: &str, other: LineageReport) {
        self.lineage.extend(other.lineage);
        for (key, messages) in other.errors {
            self.errors.entry(key).or_default().extend(
                messages
                    .into_iter()
                    .map(|message| format!("[{}] {}", file_name, message)),
            );
        }
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Tables with lineage and no recorded error
    pub fn successful_tables(&self) -> Vec<&str> {
        self.lineage
            .keys()
            .filter(|table| !self.errors.contains_key(*table))
            .map(String::as_str)
            .collect()
    }

    pub fn errored_tables(&self) -> Vec<&str> {
        self.errors.keys().map(String::as_str).collect()
    }

    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
