//! Error types for the article engine.
//!
//! Two layers:
//! - [`ArticleError`]: precondition violations reported to the caller
//!   (unknown cell, cell already busy, invalid fix request). No remote call
//!   has been issued when one of these is returned.
//! - [`ServiceError`]: failures of a remote collaborator. These never escape
//!   an execution; the engine converts them into an error result attached to
//!   the cell (see [`ServiceError::error_type`]).

use crate::cell::CellType;

/// Error type for engine operations.
#[derive(Debug, thiserror::Error)]
pub enum ArticleError {
    #[error("Cell not found: {0}")]
    CellNotFound(String),

    #[error("Cell {0} is already executing")]
    AlreadyExecuting(String),

    #[error("Cell {cell_id} of type {cell_type} cannot be executed")]
    NotExecutable { cell_id: String, cell_type: CellType },

    #[error("Cell {0} has no prompt to generate code from")]
    MissingPrompt(String),

    #[error("Invalid selection: lines {start}-{end} (buffer has {line_count} lines)")]
    InvalidSelection {
        start: usize,
        end: usize,
        line_count: usize,
    },

    #[error("Fix request has no instruction")]
    EmptyFixRequest,

    #[error("Remote service failed: {0}")]
    Service(#[from] ServiceError),
}

/// Error returned by a remote collaborator (generation, execution,
/// variable inspection).
#[derive(Debug, Clone, thiserror::Error)]
pub enum ServiceError {
    #[error("Failed to reach service: {0}")]
    Transport(String),

    #[error("Service returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Malformed response: {0}")]
    InvalidResponse(String),
}

impl ServiceError {
    /// Error type recorded on a cell result when this failure is attached
    /// to it.
    pub fn error_type(&self) -> &'static str {
        "APIError"
    }
}

pub type Result<T, E = ArticleError> = std::result::Result<T, E>;
