//! Queue for re-running downstream cells in order.
//!
//! Holds the pending cell ids and the one currently executing. The engine
//! takes cells off the front one at a time and only dequeues the next after
//! the current one completes, so later cells always see the state produced
//! by earlier ones.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use ts_rs::TS;

/// Status of a queued cell
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum CellQueueStatus {
    /// Waiting in queue
    Pending,
    /// Currently executing
    Executing,
}

/// A cell in the re-run queue
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, TS)]
#[ts(export)]
pub struct QueuedCell {
    pub cell_id: String,
    pub status: CellQueueStatus,
    /// Position in queue (0 = currently executing or next)
    pub position: usize,
}

/// Queue state published to the presentation layer
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, TS)]
#[ts(export)]
pub struct QueueState {
    /// Is the queue processing (has pending or executing cells)?
    pub processing: bool,
    /// Cells currently in queue (pending + executing)
    pub cells: Vec<QueuedCell>,
    /// ID of currently executing cell (if any)
    pub executing_cell_id: Option<String>,
}

#[derive(Debug, Default)]
pub struct DownstreamQueue {
    /// Pending cell IDs (FIFO)
    pending: VecDeque<String>,
    /// Currently executing cell ID
    executing: Option<String>,
}

impl DownstreamQueue {
    /// Queue a set of cells in the given order, dropping duplicates.
    pub fn from_cells(cell_ids: impl IntoIterator<Item = String>) -> Self {
        let mut queue = Self::default();
        for cell_id in cell_ids {
            queue.enqueue(cell_id);
        }
        queue
    }

    /// Enqueue a cell; ignored if it is already queued or executing.
    pub fn enqueue(&mut self, cell_id: String) {
        if self.executing.as_deref() == Some(cell_id.as_str()) || self.pending.contains(&cell_id) {
            return;
        }
        self.pending.push_back(cell_id);
    }

    /// Get next cell to execute (if queue is non-empty and nothing executing)
    pub fn dequeue(&mut self) -> Option<String> {
        if self.executing.is_some() {
            return None;
        }
        let cell_id = self.pending.pop_front()?;
        self.executing = Some(cell_id.clone());
        Some(cell_id)
    }

    /// Mark current execution as complete
    pub fn complete(&mut self, cell_id: &str) {
        if self.executing.as_deref() == Some(cell_id) {
            self.executing = None;
        }
    }

    /// Clear all pending (but not currently executing)
    pub fn clear_pending(&mut self) -> Vec<String> {
        self.pending.drain(..).collect()
    }

    /// Check if queue is empty (no pending and no executing)
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty() && self.executing.is_none()
    }

    pub fn get_state(&self) -> QueueState {
        let executing = self.executing.iter().map(|id| (id, CellQueueStatus::Executing));
        let pending = self.pending.iter().map(|id| (id, CellQueueStatus::Pending));

        let cells = executing
            .chain(pending)
            .enumerate()
            .map(|(position, (cell_id, status))| QueuedCell {
                cell_id: cell_id.clone(),
                status,
                position,
            })
            .collect();

        QueueState {
            processing: !self.is_empty(),
            cells,
            executing_cell_id: self.executing.clone(),
        }
    }
}
