//! Append-only version history of a cell's code.
//!
//! Every generation, accepted manual edit and automatic fix adds a
//! [`CodeVersion`]. Nothing is ever removed; resetting an editor buffer
//! reads the original version back without writing to the ledger.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

/// Where a version came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum VersionOrigin {
    /// Produced by generation from the prompt
    Original,
    /// Edited by hand and accepted
    Manual,
    /// Produced by an AI-assisted or automatic repair
    AiFix,
}

impl std::fmt::Display for VersionOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VersionOrigin::Original => write!(f, "original"),
            VersionOrigin::Manual => write!(f, "manual"),
            VersionOrigin::AiFix => write!(f, "ai_fix"),
        }
    }
}

/// Immutable snapshot of a cell's code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeVersion {
    /// Position in the ledger, starting at 1.
    pub version: u32,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub origin: VersionOrigin,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionLedger {
    versions: Vec<CodeVersion>,
}

impl VersionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn commit(
        &mut self,
        content: impl Into<String>,
        origin: VersionOrigin,
        description: Option<String>,
    ) -> &CodeVersion {
        let version = self.versions.len() as u32 + 1;
        self.versions.push(CodeVersion {
            version,
            content: content.into(),
            created_at: Utc::now(),
            origin,
            description,
        });
        &self.versions[self.versions.len() - 1]
    }

    /// All versions, newest first.
    pub fn history(&self) -> Vec<&CodeVersion> {
        self.versions.iter().rev().collect()
    }

    pub fn latest(&self) -> Option<&CodeVersion> {
        self.versions.last()
    }

    /// The version a reset returns to: the most recent generation from the
    /// prompt, or the first version when the cell was never generated.
    pub fn original(&self) -> Option<&CodeVersion> {
        self.versions
            .iter()
            .rev()
            .find(|v| v.origin == VersionOrigin::Original)
            .or_else(|| self.versions.first())
    }

    /// Fold a restored ledger into this one without losing anything.
    ///
    /// A ledger that only holds the version seeded from the cell's current
    /// code is replaced when the restored one contains that code. Otherwise
    /// restored versions not already present (same `created_at` and
    /// `content`) are added, everything is ordered by `created_at` and
    /// renumbered. Returns the number of versions gained.
    pub fn merge(&mut self, restored: VersionLedger) -> usize {
        let before = self.versions.len();
        let seeded_only = match self.versions.as_slice() {
            [] => true,
            [seed] => restored.versions.iter().any(|v| v.content == seed.content),
            _ => false,
        };
        if seeded_only {
            if restored.versions.len() >= before {
                self.versions = restored.versions;
                self.renumber();
            }
            return self.versions.len() - before;
        }

        for version in restored.versions {
            let known = self
                .versions
                .iter()
                .any(|v| v.created_at == version.created_at && v.content == version.content);
            if !known {
                self.versions.push(version);
            }
        }
        self.versions.sort_by_key(|v| v.created_at);
        self.renumber();
        self.versions.len() - before
    }

    fn renumber(&mut self) {
        for (i, version) in self.versions.iter_mut().enumerate() {
            version.version = i as u32 + 1;
        }
    }

    pub fn len(&self) -> usize {
        self.versions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }
}
