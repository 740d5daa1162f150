//! Cell model: content, execution metadata, and typed results.
//!
//! A [`Cell`]'s content fields are public and freely editable. Its execution
//! metadata is private and only changes through the transitions in
//! [`crate::lifecycle`]; everything else reads it through accessors or a
//! [`CellSnapshot`].

use serde::{Deserialize, Serialize};
use ts_rs::TS;
use uuid::Uuid;

use crate::error::ServiceError;

/// Kind of cell. Decides which content field is authoritative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "lowercase")]
#[ts(export)]
pub enum CellType {
    /// Natural-language prompt; `code` holds the generated artifact.
    Prompt,
    /// Hand-written code.
    Code,
    Markdown,
    /// Methodology write-up; rendered like markdown, never executed.
    Methodology,
}

impl CellType {
    /// Whether cells of this type can be sent to the execution service.
    pub fn is_executable(self) -> bool {
        matches!(self, CellType::Prompt | CellType::Code)
    }
}

impl std::fmt::Display for CellType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CellType::Prompt => write!(f, "prompt"),
            CellType::Code => write!(f, "code"),
            CellType::Markdown => write!(f, "markdown"),
            CellType::Methodology => write!(f, "methodology"),
        }
    }
}

impl std::str::FromStr for CellType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "prompt" => Ok(CellType::Prompt),
            "code" => Ok(CellType::Code),
            "markdown" | "md" => Ok(CellType::Markdown),
            "methodology" => Ok(CellType::Methodology),
            other => Err(format!("unknown cell type: {other}")),
        }
    }
}

/// Lifecycle state tracked per cell.
///
/// Errored is not a state: a failed cell keeps its previous state and
/// carries an error [`ExecutionResult`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum CellState {
    #[default]
    Fresh,
    Stale,
    Executing,
}

/// Status shown to the user, derived from state, flags and last result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum DisplayStatus {
    Idle,
    Executing,
    Retrying,
    Errored,
    Stale,
}

/// Outcome status of an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum ResultStatus {
    Pending,
    Success,
    Error,
}

/// Structured error attached to a failed result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Exception class or failure category, e.g. `NameError`, `APIError`
    pub error_type: String,
    pub message: String,
    /// Full trace as reported by the execution service
    #[serde(default)]
    pub traceback: String,
}

impl ErrorInfo {
    pub fn new(error_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error_type: error_type.into(),
            message: message.into(),
            traceback: String::new(),
        }
    }

    pub fn with_traceback(mut self, traceback: impl Into<String>) -> Self {
        self.traceback = traceback.into();
        self
    }

    /// Text handed to the generation service when asking for a fix.
    pub fn trace_for_repair(&self) -> String {
        if self.traceback.is_empty() {
            format!("{}: {}", self.error_type, self.message)
        } else {
            format!("{}: {}\n{}", self.error_type, self.message, self.traceback)
        }
    }
}

/// One rich output produced by an execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OutputPayload {
    Table {
        columns: Vec<String>,
        rows: Vec<Vec<serde_json::Value>>,
    },
    Plot {
        /// Plot library that produced `figure`, e.g. `plotly`
        library: String,
        figure: serde_json::Value,
    },
    Image {
        mime_type: String,
        /// Base64-encoded image bytes
        data: String,
    },
    Scalar {
        repr: String,
    },
    Error(ErrorInfo),
}

/// Result of the most recent execution of a cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub status: ResultStatus,
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
    #[serde(default)]
    pub outputs: Vec<OutputPayload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

impl ExecutionResult {
    pub fn pending() -> Self {
        Self {
            status: ResultStatus::Pending,
            stdout: String::new(),
            stderr: String::new(),
            outputs: Vec::new(),
            error: None,
        }
    }

    pub fn success(stdout: impl Into<String>, outputs: Vec<OutputPayload>) -> Self {
        Self {
            status: ResultStatus::Success,
            stdout: stdout.into(),
            stderr: String::new(),
            outputs,
            error: None,
        }
    }

    pub fn failure(error: ErrorInfo) -> Self {
        Self {
            status: ResultStatus::Error,
            stdout: String::new(),
            stderr: String::new(),
            outputs: Vec::new(),
            error: Some(error),
        }
    }

    /// Error result for a remote call that never produced a response.
    pub fn from_service_error(err: &ServiceError) -> Self {
        Self::failure(ErrorInfo::new(err.error_type(), err.to_string()))
    }

    pub fn is_success(&self) -> bool {
        self.status == ResultStatus::Success
    }

    pub fn is_error(&self) -> bool {
        self.status == ResultStatus::Error
    }

    /// Whether two successful results show the same thing to the user.
    /// stderr is ignored: warnings vary between runs.
    pub fn same_output(&self, other: &ExecutionResult) -> bool {
        self.stdout == other.stdout && self.outputs == other.outputs
    }
}

/// Execution metadata owned by a cell. Mutated only by `lifecycle`.
#[derive(Debug, Clone, Default)]
pub(crate) struct ExecutionState {
    pub(crate) execution_count: u32,
    pub(crate) retry_count: u32,
    pub(crate) is_executing: bool,
    pub(crate) is_retrying: bool,
    pub(crate) cell_state: CellState,
    /// State to fall back to when an execution ends without success.
    pub(crate) resume_state: CellState,
    /// Id of the upstream cell whose change made this cell stale.
    pub(crate) stale_cause: Option<String>,
    pub(crate) last_result: Option<ExecutionResult>,
    pub(crate) last_success: Option<ExecutionResult>,
}

/// A single step of the article pipeline.
#[derive(Debug, Clone)]
pub struct Cell {
    pub id: String,
    pub cell_type: CellType,
    pub prompt: String,
    /// Code text; for prompt cells this is the generated artifact.
    pub code: Option<String>,
    /// Markdown or methodology text.
    pub markdown: String,
    pub(crate) execution: ExecutionState,
}

impl Cell {
    pub fn new(cell_type: CellType) -> Self {
        Self::with_id(Uuid::new_v4().to_string(), cell_type)
    }

    pub fn with_id(id: impl Into<String>, cell_type: CellType) -> Self {
        Self {
            id: id.into(),
            cell_type,
            prompt: String::new(),
            code: None,
            markdown: String::new(),
            execution: ExecutionState::default(),
        }
    }

    pub fn prompt_cell(prompt: impl Into<String>) -> Self {
        let mut cell = Self::new(CellType::Prompt);
        cell.prompt = prompt.into();
        cell
    }

    pub fn code_cell(code: impl Into<String>) -> Self {
        let mut cell = Self::new(CellType::Code);
        cell.code = Some(code.into());
        cell
    }

    pub fn markdown_cell(text: impl Into<String>) -> Self {
        let mut cell = Self::new(CellType::Markdown);
        cell.markdown = text.into();
        cell
    }

    pub fn execution_count(&self) -> u32 {
        self.execution.execution_count
    }

    pub fn retry_count(&self) -> u32 {
        self.execution.retry_count
    }

    pub fn is_executing(&self) -> bool {
        self.execution.is_executing
    }

    pub fn is_retrying(&self) -> bool {
        self.execution.is_retrying
    }

    /// True while an execution cycle (first attempt or retries) is running.
    pub fn is_busy(&self) -> bool {
        self.execution.is_executing || self.execution.is_retrying
    }

    pub fn cell_state(&self) -> CellState {
        self.execution.cell_state
    }

    pub fn stale_cause(&self) -> Option<&str> {
        self.execution.stale_cause.as_deref()
    }

    pub fn last_result(&self) -> Option<&ExecutionResult> {
        self.execution.last_result.as_ref()
    }

    pub fn display_status(&self) -> DisplayStatus {
        if self.execution.is_retrying {
            DisplayStatus::Retrying
        } else if self.execution.is_executing {
            DisplayStatus::Executing
        } else if self.last_result().is_some_and(ExecutionResult::is_error) {
            DisplayStatus::Errored
        } else if self.execution.cell_state == CellState::Stale {
            DisplayStatus::Stale
        } else {
            DisplayStatus::Idle
        }
    }

    pub fn snapshot(&self, index: usize) -> CellSnapshot {
        CellSnapshot {
            id: self.id.clone(),
            index,
            cell_type: self.cell_type,
            prompt: self.prompt.clone(),
            code: self.code.clone(),
            markdown: self.markdown.clone(),
            cell_state: self.execution.cell_state,
            status: self.display_status(),
            execution_count: self.execution.execution_count,
            retry_count: self.execution.retry_count,
            is_executing: self.execution.is_executing,
            is_retrying: self.execution.is_retrying,
            stale_cause: self.execution.stale_cause.clone(),
            last_result: self.execution.last_result.clone(),
        }
    }
}

/// Read-only copy of a cell for rendering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellSnapshot {
    pub id: String,
    pub index: usize,
    pub cell_type: CellType,
    pub prompt: String,
    pub code: Option<String>,
    pub markdown: String,
    pub cell_state: CellState,
    pub status: DisplayStatus,
    pub execution_count: u32,
    pub retry_count: u32,
    pub is_executing: bool,
    pub is_retrying: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stale_cause: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_result: Option<ExecutionResult>,
}

/// Partial content update for [`crate::engine::ArticleEngine::update_cell`].
/// `None` fields are left untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CellUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cell_type: Option<CellType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub markdown: Option<String>,
}

impl CellUpdate {
    pub fn apply(self, cell: &mut Cell) {
        if let Some(cell_type) = self.cell_type {
            cell.cell_type = cell_type;
        }
        if let Some(prompt) = self.prompt {
            cell.prompt = prompt;
        }
        if let Some(code) = self.code {
            cell.code = Some(code);
        }
        if let Some(markdown) = self.markdown {
            cell.markdown = markdown;
        }
    }
}
