//! Contracts for the remote collaborators the engine drives.
//!
//! Implement these to plug in a backend (HTTP client, local kernel, test
//! double). All calls are async and fallible; the engine converts failures
//! into results attached to cells, so implementations should return a
//! [`ServiceError`] rather than panic.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::cell::{CellType, ErrorInfo, ExecutionResult, OutputPayload, ResultStatus};
use crate::error::ServiceError;
use crate::variables::{VariablePreview, VariableSummary};

/// A cell above the one being generated or executed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpstreamCell {
    pub id: String,
    pub cell_type: CellType,
    pub prompt: String,
    pub code: Option<String>,
    pub markdown: String,
    pub last_status: Option<ResultStatus>,
}

/// Everything above a cell, in order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpstreamContext {
    pub notebook_id: String,
    pub cells: Vec<UpstreamCell>,
}

/// Request for code generation or regeneration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub cell_id: String,
    pub prompt: String,
    pub context: UpstreamContext,
    /// Code to improve on. `None` for fresh and clean generations.
    pub prior_code: Option<String>,
    /// Failure text when asking for a repair.
    pub error_trace: Option<String>,
    /// Short user instruction scoping the regeneration (guided rerun).
    pub comment: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRequest {
    pub cell_id: String,
    pub code: String,
    pub context: UpstreamContext,
}

/// Raw response from the execution service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResponse {
    pub success: bool,
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
    #[serde(default)]
    pub outputs: Vec<OutputPayload>,
    #[serde(default)]
    pub error_type: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub traceback: Option<String>,
}

impl From<ExecutionResponse> for ExecutionResult {
    fn from(resp: ExecutionResponse) -> Self {
        let error = if resp.success {
            None
        } else {
            Some(ErrorInfo {
                error_type: resp.error_type.unwrap_or_else(|| "ExecutionError".to_string()),
                message: resp.error_message.unwrap_or_default(),
                traceback: resp.traceback.unwrap_or_default(),
            })
        };
        ExecutionResult {
            status: if resp.success {
                ResultStatus::Success
            } else {
                ResultStatus::Error
            },
            stdout: resp.stdout,
            stderr: resp.stderr,
            outputs: resp.outputs,
            error,
        }
    }
}

/// Produces code from a prompt, optionally repairing earlier code.
#[async_trait]
pub trait CodeGenerator: Send + Sync {
    async fn generate(&self, request: GenerationRequest) -> Result<String, ServiceError>;
}

/// Runs code against the state established by upstream cells.
///
/// Calling it twice with the same code must be safe.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn run(&self, request: ExecutionRequest) -> Result<ExecutionResponse, ServiceError>;
}

/// Lists and previews runtime variables left behind by a cell.
#[async_trait]
pub trait VariableInspector: Send + Sync {
    async fn list_variables(&self, cell_id: &str) -> Result<Vec<VariableSummary>, ServiceError>;

    async fn get_variable_content(
        &self,
        cell_id: &str,
        name: &str,
    ) -> Result<VariablePreview, ServiceError>;
}
