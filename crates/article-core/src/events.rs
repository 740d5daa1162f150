//! Events broadcast by the engine to presentation collaborators.
//!
//! Subscribers get every state change as it happens; a full picture is
//! always available via [`crate::engine::ArticleEngine::snapshots`].

use serde::{Deserialize, Serialize};

use crate::cell::CellSnapshot;
use crate::invalidation::InvalidationPolicy;
use crate::ledger::VersionOrigin;
use crate::queue::QueueState;

/// Capacity of the engine's broadcast channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ArticleEvent {
    // ── Cell state ───────────────────────────────────────────────────────
    CellUpdated {
        snapshot: CellSnapshot,
    },

    CellDeleted {
        cell_id: String,
        index: usize,
    },

    // ── Auto-repair ──────────────────────────────────────────────────────
    RetryProgress {
        cell_id: String,
        attempt: u32,
        cap: u32,
    },

    RetryExhausted {
        cell_id: String,
        attempts: u32,
        cancelled: bool,
    },

    // ── Downstream handling ──────────────────────────────────────────────
    CellsInvalidated {
        changed_cell_id: String,
        cell_ids: Vec<String>,
        policy: InvalidationPolicy,
    },

    QueueChanged {
        state: QueueState,
    },

    // ── History ──────────────────────────────────────────────────────────
    VersionCommitted {
        cell_id: String,
        version: u32,
        origin: VersionOrigin,
    },
}
