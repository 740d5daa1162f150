//! Scripted fake collaborators shared by the integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use article_core::cell::{Cell, CellType};
use article_core::events::ArticleEvent;
use article_core::services::{
    CodeGenerator, ExecutionRequest, ExecutionResponse, Executor, GenerationRequest,
    VariableInspector,
};
use article_core::settings::EngineSettings;
use article_core::variables::{VariablePreview, VariableSummary};
use article_core::{ArticleEngine, Notebook, NotebookMetadata, ServiceError};
use async_trait::async_trait;
use tokio::sync::{broadcast, Notify};

// =============================================================================
// Code generation
// =============================================================================

/// Returns scripted results in order, then `generated_N = N` forever.
#[derive(Default)]
pub struct FakeGenerator {
    script: Mutex<VecDeque<Result<String, ServiceError>>>,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl FakeGenerator {
    pub fn push(&self, result: Result<String, ServiceError>) {
        self.script.lock().unwrap().push_back(result);
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl CodeGenerator for FakeGenerator {
    async fn generate(&self, request: GenerationRequest) -> Result<String, ServiceError> {
        let n = {
            let mut requests = self.requests.lock().unwrap();
            requests.push(request);
            requests.len()
        };
        tokio::task::yield_now().await;
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(format!("generated_{n} = {n}")))
    }
}

// =============================================================================
// Execution
// =============================================================================

/// Returns scripted responses in order, then succeeds echoing the code.
/// Records `start <id>` / `end <id>` around every run.
#[derive(Default)]
pub struct FakeExecutor {
    script: Mutex<VecDeque<Result<ExecutionResponse, ServiceError>>>,
    log: Mutex<Vec<String>>,
    requests: Mutex<Vec<ExecutionRequest>>,
    gate: Option<Arc<Notify>>,
}

impl FakeExecutor {
    /// Every run waits for a permit on `gate` before finishing.
    pub fn gated(gate: Arc<Notify>) -> Self {
        Self {
            gate: Some(gate),
            ..Default::default()
        }
    }

    pub fn push(&self, result: Result<ExecutionResponse, ServiceError>) {
        self.script.lock().unwrap().push_back(result);
    }

    pub fn push_many(&self, n: usize, response: ExecutionResponse) {
        for _ in 0..n {
            self.push(Ok(response.clone()));
        }
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<ExecutionRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }
}

#[async_trait]
impl Executor for FakeExecutor {
    async fn run(&self, request: ExecutionRequest) -> Result<ExecutionResponse, ServiceError> {
        let cell_id = request.cell_id.clone();
        let code = request.code.clone();
        self.log.lock().unwrap().push(format!("start {cell_id}"));
        self.requests.lock().unwrap().push(request);

        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        tokio::task::yield_now().await;

        let scripted = self.script.lock().unwrap().pop_front();
        self.log.lock().unwrap().push(format!("end {cell_id}"));
        scripted.unwrap_or_else(|| Ok(ok(&format!("ok: {code}\n"))))
    }
}

pub fn ok(stdout: &str) -> ExecutionResponse {
    ExecutionResponse {
        success: true,
        stdout: stdout.to_string(),
        ..Default::default()
    }
}

pub fn name_error() -> ExecutionResponse {
    ExecutionResponse {
        success: false,
        error_type: Some("NameError".into()),
        error_message: Some("name 'df' is not defined".into()),
        traceback: Some("Traceback (most recent call last):\n  line 1".into()),
        ..Default::default()
    }
}

// =============================================================================
// Variable inspection
// =============================================================================

#[derive(Default)]
pub struct FakeInspector {
    list_calls: AtomicUsize,
    fetches: AtomicUsize,
    fail_next: AtomicBool,
}

impl FakeInspector {
    pub fn fail_next_fetch(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VariableInspector for FakeInspector {
    async fn list_variables(&self, _cell_id: &str) -> Result<Vec<VariableSummary>, ServiceError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        Ok(vec![
            VariableSummary {
                name: "df".into(),
                category: "dataframe".into(),
            },
            VariableSummary {
                name: "x".into(),
                category: "scalar".into(),
            },
        ])
    }

    async fn get_variable_content(
        &self,
        _cell_id: &str,
        name: &str,
    ) -> Result<VariablePreview, ServiceError> {
        let n = self.fetches.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(ServiceError::Status {
                status: 503,
                message: "kernel busy".into(),
            });
        }
        Ok(VariablePreview::Scalar {
            type_name: "int".into(),
            value: format!("{name}#{n}"),
            truncated: false,
        })
    }
}

// =============================================================================
// Harness
// =============================================================================

pub struct Harness {
    pub engine: ArticleEngine,
    pub generator: Arc<FakeGenerator>,
    pub executor: Arc<FakeExecutor>,
    pub inspector: Arc<FakeInspector>,
}

pub fn harness(cells: Vec<Cell>) -> Harness {
    harness_with(cells, EngineSettings::default(), FakeExecutor::default())
}

pub fn harness_with(cells: Vec<Cell>, settings: EngineSettings, executor: FakeExecutor) -> Harness {
    notebook_harness(
        Notebook::from_cells(NotebookMetadata::default(), cells),
        settings,
        executor,
    )
}

pub fn notebook_harness(
    notebook: Notebook,
    settings: EngineSettings,
    executor: FakeExecutor,
) -> Harness {
    let generator = Arc::new(FakeGenerator::default());
    let executor = Arc::new(executor);
    let inspector = Arc::new(FakeInspector::default());
    let engine = ArticleEngine::new(
        notebook,
        generator.clone(),
        executor.clone(),
        inspector.clone(),
    )
    .with_settings(settings);
    Harness {
        engine,
        generator,
        executor,
        inspector,
    }
}

/// `cell-0..cell-{n-1}`, code cells running `step_i()`.
pub fn code_cells(n: usize) -> Vec<Cell> {
    (0..n)
        .map(|i| {
            let mut cell = Cell::with_id(format!("cell-{i}"), CellType::Code);
            cell.code = Some(format!("step_{i}()"));
            cell
        })
        .collect()
}

pub fn prompt_cell(id: &str, prompt: &str) -> Cell {
    let mut cell = Cell::with_id(id, CellType::Prompt);
    cell.prompt = prompt.to_string();
    cell
}

pub fn drain(rx: &mut broadcast::Receiver<ArticleEvent>) -> Vec<ArticleEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
