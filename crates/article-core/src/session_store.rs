//! Per-notebook persistence of cell version history.
//!
//! Each notebook gets one JSON file named after its id. Loading and saving
//! are explicit calls made by whoever owns the store; nothing is written
//! implicitly.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Result;
use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::ledger::VersionLedger;

/// Stored history for one notebook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    /// Schema version for forward compatibility
    pub schema_version: u32,
    /// ISO 8601 timestamp when the record was saved
    pub saved_at: String,
    pub notebook_id: String,
    /// Version ledger per cell id
    #[serde(default)]
    pub ledgers: BTreeMap<String, VersionLedger>,
}

impl SessionRecord {
    /// Current schema version
    pub const CURRENT_SCHEMA_VERSION: u32 = 1;

    pub fn new(notebook_id: impl Into<String>, ledgers: BTreeMap<String, VersionLedger>) -> Self {
        Self {
            schema_version: Self::CURRENT_SCHEMA_VERSION,
            saved_at: chrono::Utc::now().to_rfc3339(),
            notebook_id: notebook_id.into(),
            ledgers,
        }
    }
}

/// Directory of session records, one file per notebook id.
#[derive(Debug, Clone)]
pub struct SessionStore {
    dir: PathBuf,
}

impl SessionStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Default location under the user's data directory.
    pub fn default_dir() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(crate::APP_DIR_NAME)
            .join("sessions")
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, notebook_id: &str) -> PathBuf {
        let safe: String = notebook_id
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("{safe}.json"))
    }

    pub fn save(&self, record: &SessionRecord) -> Result<PathBuf> {
        let path = self.path_for(&record.notebook_id);
        std::fs::create_dir_all(&self.dir)?;
        let json = serde_json::to_string_pretty(record)?;
        std::fs::write(&path, format!("{json}\n"))?;
        info!(
            "[session] Saved history for {} cell(s) to {}",
            record.ledgers.len(),
            path.display()
        );
        Ok(path)
    }

    /// Load the record for a notebook.
    ///
    /// Returns None if:
    /// - No file exists for the notebook
    /// - The file cannot be read or parsed
    /// - The file belongs to another notebook id
    pub fn load(&self, notebook_id: &str) -> Option<SessionRecord> {
        let path = self.path_for(notebook_id);
        if !path.exists() {
            info!("[session] No session file found at {}", path.display());
            return None;
        }

        let contents = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) => {
                warn!("[session] Failed to read session file: {}", e);
                return None;
            }
        };

        let record: SessionRecord = match serde_json::from_str(&contents) {
            Ok(r) => r,
            Err(e) => {
                warn!("[session] Failed to parse session file: {}", e);
                return None;
            }
        };

        if record.notebook_id != notebook_id {
            warn!(
                "[session] Session file {} belongs to notebook {}, ignoring",
                path.display(),
                record.notebook_id
            );
            return None;
        }

        info!(
            "[session] Loaded history for {} cell(s) of {}",
            record.ledgers.len(),
            notebook_id
        );
        Some(record)
    }

    /// Remove the stored record, if any.
    pub fn clear(&self, notebook_id: &str) {
        let path = self.path_for(notebook_id);
        if path.exists() {
            if let Err(e) = std::fs::remove_file(&path) {
                warn!("[session] Failed to remove session file: {}", e);
            } else {
                info!("[session] Cleared session file for {}", notebook_id);
            }
        }
    }
}
