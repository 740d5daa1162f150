//! Cell lifecycle transitions.
//!
//! ```text
//!            begin_execution                 complete_success
//!   Fresh ─────────────────▶ Executing ─────────────────────────▶ Fresh
//!   Stale ─────────────────▶     │
//!     ▲                          │ enter_retry (autofix)
//!     │ mark_stale               ▼
//!     │                       Retrying ──── complete_success ───▶ Fresh
//!     │                          │
//!     └──── complete_failure ────┘   (back to the state held before)
//! ```
//!
//! These are the only functions that write a cell's execution metadata.
//! Invariants kept by every transition:
//! - `is_executing` and `is_retrying` are never both true
//! - `cell_state == Executing` iff `is_executing`
//! - a Stale cell always records the upstream cell that caused it

use log::debug;

use crate::cell::{Cell, CellState, ExecutionResult};
use crate::error::ArticleError;

/// Result of asking a cell to become stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkStale {
    Marked,
    AlreadyStale,
    /// The cell is executing or retrying and was left alone.
    Busy,
}

impl Cell {
    /// Check the execute preconditions without changing anything.
    pub(crate) fn can_begin(&self) -> Result<(), ArticleError> {
        if !self.cell_type.is_executable() {
            return Err(ArticleError::NotExecutable {
                cell_id: self.id.clone(),
                cell_type: self.cell_type,
            });
        }
        if self.is_busy() {
            return Err(ArticleError::AlreadyExecuting(self.id.clone()));
        }
        Ok(())
    }

    /// Start a user-initiated (or queued) execution cycle.
    ///
    /// Fails if the cell cannot run or a cycle is already in progress.
    /// Resets `retry_count` and replaces the previous result with a pending
    /// one so stale error output is no longer shown.
    pub(crate) fn begin_execution(&mut self) -> Result<(), ArticleError> {
        self.can_begin()?;

        let exec = &mut self.execution;
        exec.resume_state = exec.cell_state;
        exec.cell_state = CellState::Executing;
        exec.is_executing = true;
        exec.is_retrying = false;
        exec.retry_count = 0;
        exec.last_result = Some(ExecutionResult::pending());
        debug!("[lifecycle] {} -> executing", self.id);
        Ok(())
    }

    /// Hand the failed cycle over to automatic repair.
    pub(crate) fn enter_retry(&mut self, attempt: u32, failed: ExecutionResult) {
        let exec = &mut self.execution;
        exec.is_executing = false;
        exec.is_retrying = true;
        exec.cell_state = exec.resume_state;
        exec.retry_count = attempt;
        exec.last_result = Some(failed);
        debug!("[lifecycle] {} -> retrying (attempt {})", self.id, attempt);
    }

    /// Finish the cycle with a successful result.
    ///
    /// Returns true when the output differs from the previous successful
    /// run (or there was none), i.e. downstream cells may be affected.
    pub(crate) fn complete_success(&mut self, result: ExecutionResult) -> bool {
        let exec = &mut self.execution;
        let changed = exec
            .last_success
            .as_ref()
            .map_or(true, |previous| !previous.same_output(&result));

        exec.is_executing = false;
        exec.is_retrying = false;
        exec.cell_state = CellState::Fresh;
        exec.resume_state = CellState::Fresh;
        exec.stale_cause = None;
        exec.execution_count += 1;
        exec.last_success = Some(result.clone());
        exec.last_result = Some(result);
        debug!("[lifecycle] {} -> fresh (changed: {})", self.id, changed);
        changed
    }

    /// Finish the cycle with a terminal error. The cell stays usable and
    /// returns to the state it had before the cycle started.
    pub(crate) fn complete_failure(&mut self, result: ExecutionResult) {
        let exec = &mut self.execution;
        exec.is_executing = false;
        exec.is_retrying = false;
        exec.cell_state = exec.resume_state;
        exec.execution_count += 1;
        exec.last_result = Some(result);
        debug!("[lifecycle] {} -> errored", self.id);
    }

    /// Mark the cell stale because `cause` (an upstream cell) changed.
    pub(crate) fn mark_stale(&mut self, cause: &str) -> MarkStale {
        if self.is_busy() {
            return MarkStale::Busy;
        }
        let exec = &mut self.execution;
        if exec.cell_state == CellState::Stale {
            return MarkStale::AlreadyStale;
        }
        exec.cell_state = CellState::Stale;
        exec.resume_state = CellState::Stale;
        exec.stale_cause = Some(cause.to_string());
        MarkStale::Marked
    }

    /// Check the lifecycle invariants.
    pub fn invariants_hold(&self) -> bool {
        let exec = &self.execution;
        let exclusive = !(exec.is_executing && exec.is_retrying);
        let executing_matches = (exec.cell_state == CellState::Executing) == exec.is_executing;
        let stale_has_cause = exec.cell_state != CellState::Stale || exec.stale_cause.is_some();
        exclusive && executing_matches && stale_has_cause
    }
}
