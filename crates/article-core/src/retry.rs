//! Bounded automatic repair of failed executions.
//!
//! The [`RetryController`] counts attempts for one execution cycle and
//! decides whether another regenerate-and-run attempt may start. It never
//! exceeds its cap and checks the cancellation token before each attempt.
//! The engine owns the loop; this type owns the policy.

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use ts_rs::TS;

use crate::cell::{ErrorInfo, ExecutionResult};
use crate::services::{GenerationRequest, UpstreamContext};

/// Default number of automatic repair attempts per execution cycle.
pub const DEFAULT_RETRY_CAP: u32 = 5;

/// Upper bound accepted from configuration.
pub const MAX_RETRY_CAP: u32 = 10;

pub const RETRY_EXHAUSTED_MESSAGE: &str = "All retry attempts have been exhausted";

pub const RETRY_CANCELLED_MESSAGE: &str = "Automatic retries were cancelled";

/// What the controller allows next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Run attempt number `n` (1-based).
    Attempt(u32),
    /// The cap was reached after this many attempts.
    Exhausted(u32),
    /// Cancelled before the next attempt; this many attempts ran.
    Cancelled(u32),
}

/// Progress reported to the UI while a cell is retrying.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct RetryProgress {
    pub cell_id: String,
    pub attempt: u32,
    pub cap: u32,
}

#[derive(Debug, Clone)]
pub struct RetryController {
    cell_id: String,
    cap: u32,
    attempts: u32,
    cancel: CancellationToken,
}

impl RetryController {
    pub fn new(cell_id: impl Into<String>, cap: u32, cancel: CancellationToken) -> Self {
        Self {
            cell_id: cell_id.into(),
            cap: cap.min(MAX_RETRY_CAP),
            attempts: 0,
            cancel,
        }
    }

    pub fn cap(&self) -> u32 {
        self.cap
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Claim the next attempt, if any is left.
    pub fn next_attempt(&mut self) -> RetryDecision {
        if self.cancel.is_cancelled() {
            return RetryDecision::Cancelled(self.attempts);
        }
        if self.attempts >= self.cap {
            return RetryDecision::Exhausted(self.attempts);
        }
        self.attempts += 1;
        RetryDecision::Attempt(self.attempts)
    }

    pub fn progress(&self) -> RetryProgress {
        RetryProgress {
            cell_id: self.cell_id.clone(),
            attempt: self.attempts,
            cap: self.cap,
        }
    }

    /// Regeneration request for the next attempt: the failing code, its
    /// error trace, and the original prompt and comment.
    pub fn repair_request(
        &self,
        prompt: &str,
        context: UpstreamContext,
        failing_code: &str,
        error: &ErrorInfo,
        comment: Option<String>,
    ) -> GenerationRequest {
        GenerationRequest {
            cell_id: self.cell_id.clone(),
            prompt: prompt.to_string(),
            context,
            prior_code: Some(failing_code.to_string()),
            error_trace: Some(error.trace_for_repair()),
            comment,
        }
    }

    /// Terminal result once no attempt is left. Keeps the last error's type
    /// and trace so the user can still fix the code by hand.
    pub fn terminal_result(&self, decision: RetryDecision, last: &ErrorInfo) -> ExecutionResult {
        let headline = match decision {
            RetryDecision::Cancelled(_) => RETRY_CANCELLED_MESSAGE,
            _ => RETRY_EXHAUSTED_MESSAGE,
        };
        ExecutionResult::failure(ErrorInfo {
            error_type: last.error_type.clone(),
            message: format!(
                "{headline} after {} attempt(s). Last error: {}",
                self.attempts, last.message
            ),
            traceback: last.traceback.clone(),
        })
    }
}
