//! article-core - Cell dependency and execution state machine for digital
//! articles.
//!
//! A digital article is a linear notebook of prompt, code, markdown and
//! methodology cells. Each cell may depend on state produced by the cells
//! above it. This crate tracks every cell through generation, execution,
//! failure, bounded automatic repair and downstream invalidation, and keeps
//! an append-only history of each cell's code.
//!
//! Code generation, code execution and variable inspection are remote
//! collaborators behind the async traits in [`services`]. The
//! [`engine::ArticleEngine`] wires them to the local state machine.

pub mod cell;
pub mod diff;
pub mod editor;
pub mod engine;
pub mod error;
pub mod events;
pub mod invalidation;
pub mod ledger;
pub mod lifecycle;
pub mod notebook;
pub mod queue;
pub mod retry;
pub mod services;
pub mod session_store;
pub mod settings;
pub mod variables;

pub use cell::{Cell, CellSnapshot, CellState, CellType, CellUpdate, DisplayStatus, ExecutionResult};
pub use engine::{ArticleEngine, ExecuteMode, ExecuteOptions, ExecutionOutcome};
pub use error::{ArticleError, ServiceError};
pub use invalidation::{Invalidation, InvalidationPolicy, InvalidationReport};
pub use notebook::{Notebook, NotebookMetadata};

/// Directory name used under the platform config and data directories.
pub const APP_DIR_NAME: &str = "digital-article";

