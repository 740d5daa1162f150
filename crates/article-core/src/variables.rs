//! Variable inspection cache.
//!
//! Each cell keeps the variable list and the previews the user has expanded
//! so far. Previews are fetched lazily from the inspection service and served
//! from here afterwards. Re-executing the cell discards the whole cache since
//! the underlying values may have changed.
//!
//! A failed fetch is shown as [`VariablePreview::Error`] but never cached, so
//! expanding the variable again retries the fetch.

use std::collections::HashMap;

use log::debug;
use serde::{Deserialize, Serialize};

/// Default bound for scalar and string previews, in characters.
pub const DEFAULT_PREVIEW_CHAR_LIMIT: usize = 2000;

/// Variable name and category as reported by the inspection service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariableSummary {
    pub name: String,
    /// e.g. "dataframe", "array", "scalar", "module"
    pub category: String,
}

/// Typed preview of one variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum VariablePreview {
    Table {
        shape: Vec<usize>,
        columns: Vec<String>,
        #[serde(default)]
        dtypes: Vec<String>,
        /// First rows, one JSON value per column
        #[serde(default)]
        sample: Vec<Vec<serde_json::Value>>,
    },
    Array {
        shape: Vec<usize>,
        dtype: String,
        #[serde(default)]
        sample: serde_json::Value,
    },
    Scalar {
        type_name: String,
        value: String,
        #[serde(default)]
        truncated: bool,
    },
    /// The fetch failed; shown inline instead of the value.
    Error { message: String },
}

impl VariablePreview {
    pub fn is_error(&self) -> bool {
        matches!(self, VariablePreview::Error { .. })
    }

    /// Cut scalar values down to `limit` characters.
    pub fn truncated(self, limit: usize) -> Self {
        match self {
            VariablePreview::Scalar {
                type_name, value, ..
            } if value.chars().count() > limit => VariablePreview::Scalar {
                type_name,
                value: value.chars().take(limit).collect(),
                truncated: true,
            },
            other => other,
        }
    }
}

/// Per-cell cache of fetched variable data.
#[derive(Debug, Clone, Default)]
pub struct VariableCache {
    names: Option<Vec<VariableSummary>>,
    previews: HashMap<String, VariablePreview>,
    /// Bumped on every clear; a fetch started under an older epoch is
    /// dropped instead of cached.
    epoch: u64,
}

impl VariableCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn names(&self) -> Option<&[VariableSummary]> {
        self.names.as_deref()
    }

    pub fn set_names(&mut self, names: Vec<VariableSummary>) {
        self.names = Some(names);
    }

    pub fn preview(&self, name: &str) -> Option<&VariablePreview> {
        let hit = self.previews.get(name);
        if hit.is_some() {
            debug!("[variables] Cache hit for {}", name);
        }
        hit
    }

    /// Store a fetched preview. Error payloads are not stored.
    pub fn insert(&mut self, name: impl Into<String>, preview: VariablePreview) -> bool {
        if preview.is_error() {
            return false;
        }
        self.previews.insert(name.into(), preview);
        true
    }

    pub fn clear(&mut self) {
        self.names = None;
        self.previews.clear();
        self.epoch += 1;
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }
}
