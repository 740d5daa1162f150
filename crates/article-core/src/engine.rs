//! Orchestration of cell execution, repair and downstream handling.
//!
//! [`ArticleEngine`] owns the notebook and the per-cell resources (version
//! ledger, variable cache) behind a single mutex. The lock is only taken for
//! synchronous transitions and is always released before a remote call is
//! awaited, so other cells stay usable while one executes. The precondition
//! check and the switch to Executing happen under one lock acquisition, so a
//! second execute request for a busy cell is always rejected.
//!
//! Remote failures never escape an execution: they are attached to the cell
//! as an `APIError` result. Only precondition violations are returned as
//! [`ArticleError`].

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use ts_rs::TS;

use crate::cell::{Cell, CellSnapshot, CellType, CellUpdate, ErrorInfo, ExecutionResult};
use crate::editor::{AcceptedEdit, CodeEditor, FixRequest};
use crate::error::{ArticleError, Result};
use crate::events::{ArticleEvent, EVENT_CHANNEL_CAPACITY};
use crate::invalidation::{
    ChangeKind, ChangeSite, Invalidation, InvalidationPolicy, InvalidationReport, Resolver,
};
use crate::ledger::{VersionLedger, VersionOrigin};
use crate::notebook::{Notebook, NotebookMetadata};
use crate::queue::DownstreamQueue;
use crate::retry::{RetryController, RetryDecision};
use crate::services::{
    CodeGenerator, ExecutionRequest, Executor, GenerationRequest, UpstreamContext,
    VariableInspector,
};
use crate::session_store::{SessionRecord, SessionStore};
use crate::settings::EngineSettings;
use crate::variables::{VariableCache, VariablePreview, VariableSummary};

/// How an execution obtains the code it runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum ExecuteMode {
    /// Run the cell's current code. A prompt cell without code is generated
    /// first.
    ExecuteExisting,
    /// Generate new code from the prompt, passing the current code and the
    /// optional comment along (guided rerun).
    Regenerate,
    /// Generate from the prompt and upstream cells only, ignoring the cell's
    /// own previous code.
    CleanRegenerate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecuteOptions {
    /// Repair failures automatically, up to the configured retry cap
    #[serde(default = "default_autofix")]
    pub autofix: bool,
    /// Short instruction scoping a regeneration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

fn default_autofix() -> bool {
    true
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self {
            autofix: true,
            comment: None,
        }
    }
}

/// Result of one execution cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionOutcome {
    pub snapshot: CellSnapshot,
    /// Set when the cell succeeded with a different result than before and
    /// has cells below it. The caller decides how to resolve it.
    pub invalidation: Option<Invalidation>,
}

#[derive(Debug, Default)]
struct CellResources {
    ledger: VersionLedger,
    variables: VariableCache,
}

struct EngineState {
    notebook: Notebook,
    resources: HashMap<String, CellResources>,
}

impl EngineState {
    fn resources(&mut self, cell_id: &str) -> &mut CellResources {
        self.resources.entry(cell_id.to_string()).or_default()
    }

    fn cell_index(&self, cell_id: &str) -> Result<usize> {
        self.notebook
            .find_cell_index(cell_id)
            .ok_or_else(|| ArticleError::CellNotFound(cell_id.to_string()))
    }

    fn snapshot(&self, cell_id: &str) -> Option<CellSnapshot> {
        let index = self.notebook.find_cell_index(cell_id)?;
        self.notebook.cell_at(index).map(|c| c.snapshot(index))
    }
}

/// Everything a cycle needs, captured when it starts.
struct CyclePlan {
    cell_id: String,
    prompt: String,
    code: String,
    context: UpstreamContext,
    generation: Option<GenerationRequest>,
}

/// A cell disappeared while one of its cycles was in flight.
fn removed_mid_cycle(cell_id: &str) -> ArticleError {
    warn!("[engine] Cell {} was deleted while executing", cell_id);
    ArticleError::CellNotFound(cell_id.to_string())
}

#[derive(Clone)]
pub struct ArticleEngine {
    state: Arc<Mutex<EngineState>>,
    generator: Arc<dyn CodeGenerator>,
    executor: Arc<dyn Executor>,
    inspector: Arc<dyn VariableInspector>,
    settings: EngineSettings,
    resolver: Resolver,
    events: broadcast::Sender<ArticleEvent>,
}

impl ArticleEngine {
    pub fn new(
        notebook: Notebook,
        generator: Arc<dyn CodeGenerator>,
        executor: Arc<dyn Executor>,
        inspector: Arc<dyn VariableInspector>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let mut state = EngineState {
            notebook,
            resources: HashMap::new(),
        };
        let seeded: Vec<(String, String)> = state
            .notebook
            .cells()
            .iter()
            .filter_map(|c| c.code.clone().map(|code| (c.id.clone(), code)))
            .collect();
        for (cell_id, code) in seeded {
            state
                .resources(&cell_id)
                .ledger
                .commit(code, VersionOrigin::Original, None);
        }

        Self {
            state: Arc::new(Mutex::new(state)),
            generator,
            executor,
            inspector,
            settings: EngineSettings::default(),
            resolver: Resolver::default(),
            events,
        }
    }

    pub fn with_settings(mut self, settings: EngineSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Replace the dependency model used to compute affected cells.
    pub fn with_resolver(mut self, resolver: Resolver) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ArticleEvent> {
        self.events.subscribe()
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut EngineState) -> R) -> R {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut state)
    }

    fn emit(&self, event: ArticleEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn emit_snapshot(&self, snapshot: CellSnapshot) {
        self.emit(ArticleEvent::CellUpdated { snapshot });
    }

    fn emit_version(&self, cell_id: &str, version: u32, origin: VersionOrigin) {
        self.emit(ArticleEvent::VersionCommitted {
            cell_id: cell_id.to_string(),
            version,
            origin,
        });
    }

    // ── Reads ────────────────────────────────────────────────────────────

    pub fn notebook_id(&self) -> String {
        self.with_state(|state| state.notebook.id.clone())
    }

    pub fn metadata(&self) -> NotebookMetadata {
        self.with_state(|state| state.notebook.metadata.clone())
    }

    pub fn snapshots(&self) -> Vec<CellSnapshot> {
        self.with_state(|state| state.notebook.snapshots())
    }

    pub fn snapshot(&self, cell_id: &str) -> Option<CellSnapshot> {
        self.with_state(|state| state.snapshot(cell_id))
    }

    /// Copy of the cell's version history.
    pub fn ledger(&self, cell_id: &str) -> Result<VersionLedger> {
        self.with_state(|state| -> Result<_> {
            state.cell_index(cell_id)?;
            Ok(state.resources(cell_id).ledger.clone())
        })
    }

    // ── Local edits ──────────────────────────────────────────────────────

    /// Insert a new empty cell after `after_cell_id`, or at the end.
    pub fn add_cell(&self, cell_type: CellType, after_cell_id: Option<&str>) -> CellSnapshot {
        let snapshot = self.with_state(|state| state.notebook.add_cell(cell_type, after_cell_id));
        debug!("[engine] Added {} cell {}", snapshot.cell_type, snapshot.id);
        self.emit_snapshot(snapshot.clone());
        snapshot
    }

    /// Insert an existing cell. Code it already carries becomes its first
    /// version.
    pub fn insert_cell(&self, cell: Cell, after_cell_id: Option<&str>) -> CellSnapshot {
        let snapshot = self.with_state(|state| {
            let cell_id = cell.id.clone();
            let code = cell.code.clone();
            let snapshot = state.notebook.insert_cell(cell, after_cell_id);
            if let Some(code) = code {
                state
                    .resources(&cell_id)
                    .ledger
                    .commit(code, VersionOrigin::Original, None);
            }
            snapshot
        });
        debug!("[engine] Added {} cell {}", snapshot.cell_type, snapshot.id);
        self.emit_snapshot(snapshot.clone());
        snapshot
    }

    /// Apply a partial content change. Does not evaluate invalidation; that
    /// happens on execute, delete or an explicit `invalidate_cells`.
    ///
    /// Code and type changes are refused while the cell executes or retries.
    pub fn update_cell(&self, cell_id: &str, update: CellUpdate) -> Result<CellSnapshot> {
        let snapshot = self.with_state(|state| -> Result<_> {
            let index = state.cell_index(cell_id)?;
            let cell = state
                .notebook
                .cell_mut(cell_id)
                .ok_or_else(|| ArticleError::CellNotFound(cell_id.to_string()))?;
            if cell.is_busy() && (update.code.is_some() || update.cell_type.is_some()) {
                return Err(ArticleError::AlreadyExecuting(cell_id.to_string()));
            }
            update.apply(cell);
            let snapshot = cell.snapshot(index);
            state.notebook.dirty = true;
            Ok(snapshot)
        })?;
        self.emit_snapshot(snapshot.clone());
        Ok(snapshot)
    }

    /// Remove a cell and report every cell that was below it.
    pub fn delete_cell(&self, cell_id: &str) -> Result<Invalidation> {
        let (index, invalidation) = self.with_state(|state| -> Result<_> {
            let (index, cell) = state
                .notebook
                .remove_cell(cell_id)
                .ok_or_else(|| ArticleError::CellNotFound(cell_id.to_string()))?;
            if cell.is_busy() {
                warn!("[engine] Deleting {} while it is executing", cell_id);
            }
            state.resources.remove(cell_id);
            let invalidation = self.resolver.invalidation(
                &state.notebook,
                cell_id,
                ChangeKind::Deleted,
                ChangeSite::Removed(index),
            );
            Ok((index, invalidation))
        })?;

        info!(
            "[engine] Deleted {} at index {}, {} cell(s) downstream",
            cell_id,
            index,
            invalidation.affected.len()
        );
        self.emit(ArticleEvent::CellDeleted {
            cell_id: cell_id.to_string(),
            index,
        });
        Ok(invalidation)
    }

    /// Report the cells downstream of an accepted edit.
    pub fn invalidate_cells(&self, cell_id: &str) -> Result<Invalidation> {
        self.with_state(|state| -> Result<_> {
            let index = state.cell_index(cell_id)?;
            Ok(self.resolver.invalidation(
                &state.notebook,
                cell_id,
                ChangeKind::Edited,
                ChangeSite::At(index),
            ))
        })
    }

    // ── Editor workflow ──────────────────────────────────────────────────

    /// Open an editor on the cell's current code.
    pub fn open_editor(&self, cell_id: &str) -> Result<CodeEditor> {
        let code = self.with_state(|state| {
            state
                .notebook
                .cell(cell_id)
                .map(|c| c.code.clone().unwrap_or_default())
                .ok_or_else(|| ArticleError::CellNotFound(cell_id.to_string()))
        })?;
        Ok(CodeEditor::open(code, self.settings.diff_algorithm))
    }

    /// Put the cell's original version back into the editor buffer. The
    /// ledger is left untouched.
    pub fn reset_editor(&self, cell_id: &str, editor: &mut CodeEditor) -> Result<bool> {
        self.with_state(|state| -> Result<_> {
            state.cell_index(cell_id)?;
            Ok(editor.reset(&state.resources(cell_id).ledger))
        })
    }

    /// Write accepted editor content to the cell and record it as a new
    /// version.
    pub fn accept_edit(&self, cell_id: &str, edit: AcceptedEdit) -> Result<Invalidation> {
        let origin = edit.origin;
        let (snapshot, version, invalidation) = self.with_state(|state| -> Result<_> {
            let index = state.cell_index(cell_id)?;
            let cell = state
                .notebook
                .cell_mut(cell_id)
                .ok_or_else(|| ArticleError::CellNotFound(cell_id.to_string()))?;
            if cell.is_busy() {
                return Err(ArticleError::AlreadyExecuting(cell_id.to_string()));
            }
            cell.code = Some(edit.content.clone());
            let snapshot = cell.snapshot(index);
            state.notebook.dirty = true;

            let version = state
                .resources(cell_id)
                .ledger
                .commit(edit.content, edit.origin, edit.description)
                .version;
            let invalidation = self.resolver.invalidation(
                &state.notebook,
                cell_id,
                ChangeKind::Edited,
                ChangeSite::At(index),
            );
            Ok((snapshot, version, invalidation))
        })?;

        info!(
            "[engine] Accepted {} edit for {} as version {}",
            origin, cell_id, version
        );
        self.emit_version(cell_id, version, origin);
        self.emit_snapshot(snapshot);
        Ok(invalidation)
    }

    /// Ask the generation service for a fix of `buffer` scoped by the
    /// request. Leaves the cell's lifecycle state alone.
    pub async fn assist(
        &self,
        cell_id: &str,
        buffer: &str,
        request: &FixRequest,
    ) -> Result<String> {
        request.validate()?;

        let generation = self.with_state(|state| -> Result<_> {
            let index = state.cell_index(cell_id)?;
            let cell = state
                .notebook
                .cell(cell_id)
                .ok_or_else(|| ArticleError::CellNotFound(cell_id.to_string()))?;
            let error_trace = cell
                .last_result()
                .and_then(|r| r.error.as_ref())
                .map(ErrorInfo::trace_for_repair);
            Ok(GenerationRequest {
                cell_id: cell_id.to_string(),
                prompt: cell.prompt.clone(),
                context: state.notebook.upstream_context(index),
                prior_code: Some(buffer.to_string()),
                error_trace,
                comment: Some(request.comment()),
            })
        })?;

        info!("[engine] Requesting assisted fix for {}", cell_id);
        let code = self.generator.generate(generation).await.map_err(|e| {
            error!("[engine] Assisted fix for {} failed: {}", cell_id, e);
            e
        })?;
        Ok(code)
    }

    // ── Execution ────────────────────────────────────────────────────────

    /// Run one execution cycle for a cell: optional generation, execution,
    /// and bounded automatic repair.
    ///
    /// Returns `Err` only if the cell cannot start (unknown, busy, not
    /// executable, nothing to generate from) or was deleted mid-cycle.
    pub async fn execute(
        &self,
        cell_id: &str,
        mode: ExecuteMode,
        options: ExecuteOptions,
        cancel: &CancellationToken,
    ) -> Result<ExecutionOutcome> {
        let plan = self.begin_cycle(cell_id, mode, &options)?;
        info!("[engine] Executing {} ({:?})", cell_id, mode);

        let code = match plan.generation.clone() {
            Some(request) => match self.generator.generate(request).await {
                Ok(code) => self.store_generated(cell_id, code)?,
                Err(e) => {
                    error!("[engine] Code generation failed for {}: {}", cell_id, e);
                    return self.finish_failure(cell_id, ExecutionResult::from_service_error(&e));
                }
            },
            None => plan.code.clone(),
        };

        self.run_with_repair(&plan, code, &options, cancel).await
    }

    fn begin_cycle(
        &self,
        cell_id: &str,
        mode: ExecuteMode,
        options: &ExecuteOptions,
    ) -> Result<CyclePlan> {
        let (plan, snapshot) = self.with_state(|state| -> Result<_> {
            let index = state.cell_index(cell_id)?;
            let context = state.notebook.upstream_context(index);
            let cell = state
                .notebook
                .cell_mut(cell_id)
                .ok_or_else(|| ArticleError::CellNotFound(cell_id.to_string()))?;
            cell.can_begin()?;

            let existing = cell.code.clone().filter(|c| !c.trim().is_empty());
            let needs_generation = match mode {
                ExecuteMode::ExecuteExisting => {
                    existing.is_none() && cell.cell_type == CellType::Prompt
                }
                ExecuteMode::Regenerate | ExecuteMode::CleanRegenerate => true,
            };
            if needs_generation && cell.prompt.trim().is_empty() {
                return Err(ArticleError::MissingPrompt(cell_id.to_string()));
            }

            cell.begin_execution()?;
            let prompt = cell.prompt.clone();
            let snapshot = cell.snapshot(index);
            state.resources(cell_id).variables.clear();

            let generation = needs_generation.then(|| GenerationRequest {
                cell_id: cell_id.to_string(),
                prompt: prompt.clone(),
                context: context.clone(),
                prior_code: match mode {
                    ExecuteMode::Regenerate => existing.clone(),
                    _ => None,
                },
                error_trace: None,
                comment: options.comment.clone(),
            });
            let plan = CyclePlan {
                cell_id: cell_id.to_string(),
                prompt,
                code: existing.unwrap_or_default(),
                context,
                generation,
            };
            Ok((plan, snapshot))
        })?;

        self.emit_snapshot(snapshot);
        Ok(plan)
    }

    /// Attach freshly generated code to the cell and record it.
    fn store_generated(&self, cell_id: &str, code: String) -> Result<String> {
        let version = self.with_state(|state| -> Result<_> {
            let cell = state
                .notebook
                .cell_mut(cell_id)
                .ok_or_else(|| removed_mid_cycle(cell_id))?;
            cell.code = Some(code.clone());
            state.notebook.dirty = true;
            Ok(state
                .resources(cell_id)
                .ledger
                .commit(code.clone(), VersionOrigin::Original, None)
                .version)
        })?;
        self.emit_version(cell_id, version, VersionOrigin::Original);
        Ok(code)
    }

    async fn run_with_repair(
        &self,
        plan: &CyclePlan,
        mut code: String,
        options: &ExecuteOptions,
        cancel: &CancellationToken,
    ) -> Result<ExecutionOutcome> {
        let cell_id = plan.cell_id.as_str();
        let mut retry = RetryController::new(
            cell_id,
            self.settings.effective_retry_cap(),
            cancel.clone(),
        );

        loop {
            let request = ExecutionRequest {
                cell_id: cell_id.to_string(),
                code: code.clone(),
                context: plan.context.clone(),
            };
            let result: ExecutionResult = match self.executor.run(request).await {
                Ok(response) => response.into(),
                Err(e) => {
                    error!("[engine] Execution service failed for {}: {}", cell_id, e);
                    return self.finish_failure(cell_id, ExecutionResult::from_service_error(&e));
                }
            };

            if result.is_success() {
                return self.finish_success(cell_id, result, code, retry.attempts());
            }

            let failure = result
                .error
                .clone()
                .unwrap_or_else(|| ErrorInfo::new("ExecutionError", "execution failed"));
            warn!(
                "[engine] {} failed: {}: {}",
                cell_id, failure.error_type, failure.message
            );
            if !options.autofix {
                return self.finish_failure(cell_id, result);
            }

            let attempt = match retry.next_attempt() {
                RetryDecision::Attempt(n) => n,
                decision => {
                    let cancelled = matches!(decision, RetryDecision::Cancelled(_));
                    info!(
                        "[retry] Giving up on {} after {} attempt(s){}",
                        cell_id,
                        retry.attempts(),
                        if cancelled { " (cancelled)" } else { "" }
                    );
                    self.emit(ArticleEvent::RetryExhausted {
                        cell_id: cell_id.to_string(),
                        attempts: retry.attempts(),
                        cancelled,
                    });
                    return self.finish_failure(cell_id, retry.terminal_result(decision, &failure));
                }
            };

            let snapshot = self.with_state(|state| -> Result<_> {
                let index = state.cell_index(cell_id).map_err(|_| removed_mid_cycle(cell_id))?;
                let cell = state
                    .notebook
                    .cell_mut(cell_id)
                    .ok_or_else(|| removed_mid_cycle(cell_id))?;
                cell.enter_retry(attempt, result);
                Ok(cell.snapshot(index))
            })?;
            info!("[retry] Attempt {}/{} for {}", attempt, retry.cap(), cell_id);
            self.emit_snapshot(snapshot);
            let progress = retry.progress();
            self.emit(ArticleEvent::RetryProgress {
                cell_id: progress.cell_id,
                attempt: progress.attempt,
                cap: progress.cap,
            });

            let request = retry.repair_request(
                &plan.prompt,
                plan.context.clone(),
                &code,
                &failure,
                options.comment.clone(),
            );
            code = match self.generator.generate(request).await {
                Ok(fixed) => fixed,
                Err(e) => {
                    error!("[retry] Regeneration failed for {}: {}", cell_id, e);
                    return self.finish_failure(cell_id, ExecutionResult::from_service_error(&e));
                }
            };
            self.with_state(|state| -> Result<_> {
                let cell = state
                    .notebook
                    .cell_mut(cell_id)
                    .ok_or_else(|| removed_mid_cycle(cell_id))?;
                cell.code = Some(code.clone());
                Ok(())
            })?;
        }
    }

    fn finish_success(
        &self,
        cell_id: &str,
        result: ExecutionResult,
        code: String,
        attempts: u32,
    ) -> Result<ExecutionOutcome> {
        let (snapshot, invalidation, version) = self.with_state(|state| -> Result<_> {
            let index = state.cell_index(cell_id).map_err(|_| removed_mid_cycle(cell_id))?;
            let cell = state
                .notebook
                .cell_mut(cell_id)
                .ok_or_else(|| removed_mid_cycle(cell_id))?;
            let changed = cell.complete_success(result);
            let snapshot = cell.snapshot(index);

            let resources = state.resources(cell_id);
            resources.variables.clear();
            let version = (attempts > 0).then(|| {
                resources
                    .ledger
                    .commit(
                        code,
                        VersionOrigin::AiFix,
                        Some(format!("Automatic fix after {attempts} attempt(s)")),
                    )
                    .version
            });

            let invalidation = changed
                .then(|| {
                    self.resolver.invalidation(
                        &state.notebook,
                        cell_id,
                        ChangeKind::Executed,
                        ChangeSite::At(index),
                    )
                })
                .filter(|inv| !inv.is_empty());
            Ok((snapshot, invalidation, version))
        })?;

        info!(
            "[engine] {} succeeded (execution {}, {} repair attempt(s))",
            cell_id, snapshot.execution_count, attempts
        );
        if let Some(version) = version {
            self.emit_version(cell_id, version, VersionOrigin::AiFix);
        }
        self.emit_snapshot(snapshot.clone());
        Ok(ExecutionOutcome {
            snapshot,
            invalidation,
        })
    }

    fn finish_failure(&self, cell_id: &str, result: ExecutionResult) -> Result<ExecutionOutcome> {
        let snapshot = self.with_state(|state| -> Result<_> {
            let index = state.cell_index(cell_id).map_err(|_| removed_mid_cycle(cell_id))?;
            let cell = state
                .notebook
                .cell_mut(cell_id)
                .ok_or_else(|| removed_mid_cycle(cell_id))?;
            cell.complete_failure(result);
            let snapshot = cell.snapshot(index);
            state.resources(cell_id).variables.clear();
            Ok(snapshot)
        })?;
        self.emit_snapshot(snapshot.clone());
        Ok(ExecutionOutcome {
            snapshot,
            invalidation: None,
        })
    }

    // ── Downstream resolution ────────────────────────────────────────────

    /// Apply the user's choice to every cell of a pending invalidation.
    pub async fn resolve(
        &self,
        invalidation: &Invalidation,
        policy: InvalidationPolicy,
        cancel: &CancellationToken,
    ) -> InvalidationReport {
        let report = match policy {
            InvalidationPolicy::DoNothing => self.resolver.do_nothing(invalidation),
            InvalidationPolicy::MarkStale => {
                let (report, snapshots) = self.with_state(|state| {
                    let report = self.resolver.mark_stale(&mut state.notebook, invalidation);
                    let snapshots: Vec<_> = report
                        .marked
                        .iter()
                        .filter_map(|id| state.snapshot(id))
                        .collect();
                    (report, snapshots)
                });
                for snapshot in snapshots {
                    self.emit_snapshot(snapshot);
                }
                report
            }
            InvalidationPolicy::RerunAll => self.rerun_all(invalidation, cancel).await,
        };

        self.emit(ArticleEvent::CellsInvalidated {
            changed_cell_id: invalidation.changed_cell_id.clone(),
            cell_ids: invalidation.affected.clone(),
            policy,
        });
        report
    }

    /// Execute affected cells one at a time in pipeline order. A cell is
    /// only dequeued after the previous one finished.
    async fn rerun_all(
        &self,
        invalidation: &Invalidation,
        cancel: &CancellationToken,
    ) -> InvalidationReport {
        let mut report = InvalidationReport::new(InvalidationPolicy::RerunAll);
        let runnable: Vec<String> = self.with_state(|state| {
            invalidation
                .affected
                .iter()
                .filter(|id| match state.notebook.cell(id) {
                    None => {
                        report.missing.push(id.to_string());
                        false
                    }
                    Some(cell) if !cell.cell_type.is_executable() => {
                        debug!("[queue] Skipping {} cell {}", cell.cell_type, id);
                        false
                    }
                    Some(_) => true,
                })
                .cloned()
                .collect()
        });
        let mut queue = DownstreamQueue::from_cells(runnable);
        info!(
            "[queue] Re-running {} cell(s) downstream of {}",
            queue.get_state().cells.len(),
            invalidation.changed_cell_id
        );

        let options = ExecuteOptions {
            autofix: self.settings.autofix,
            comment: None,
        };
        loop {
            if cancel.is_cancelled() {
                let skipped = queue.clear_pending();
                if !skipped.is_empty() {
                    info!("[queue] Cancelled with {} cell(s) not run", skipped.len());
                }
                report.not_run.extend(skipped);
                break;
            }
            let Some(cell_id) = queue.dequeue() else {
                break;
            };
            self.emit(ArticleEvent::QueueChanged {
                state: queue.get_state(),
            });

            let outcome = self
                .execute(&cell_id, ExecuteMode::ExecuteExisting, options.clone(), cancel)
                .await;
            queue.complete(&cell_id);

            let failed = match outcome {
                Ok(outcome)
                    if outcome
                        .snapshot
                        .last_result
                        .as_ref()
                        .is_some_and(ExecutionResult::is_success) =>
                {
                    report.succeeded.push(cell_id.clone());
                    false
                }
                Ok(_) => {
                    report.failed.push(cell_id.clone());
                    true
                }
                Err(ArticleError::AlreadyExecuting(_)) => {
                    report.skipped_busy.push(cell_id.clone());
                    false
                }
                Err(ArticleError::CellNotFound(_)) => {
                    report.missing.push(cell_id.clone());
                    false
                }
                Err(e) => {
                    warn!("[queue] Could not re-run {}: {}", cell_id, e);
                    report.failed.push(cell_id.clone());
                    true
                }
            };

            if failed && self.settings.stop_rerun_on_error {
                let skipped = queue.clear_pending();
                info!(
                    "[queue] Stopping after failure of {}, {} cell(s) not run",
                    cell_id,
                    skipped.len()
                );
                report.not_run.extend(skipped);
                break;
            }
        }

        self.emit(ArticleEvent::QueueChanged {
            state: queue.get_state(),
        });
        report
    }

    // ── Variable inspection ──────────────────────────────────────────────

    pub async fn list_variables(&self, cell_id: &str) -> Result<Vec<VariableSummary>> {
        let (cached, epoch) = self.with_state(|state| -> Result<_> {
            state.cell_index(cell_id)?;
            let variables = &state.resources(cell_id).variables;
            Ok((variables.names().map(<[_]>::to_vec), variables.epoch()))
        })?;
        if let Some(names) = cached {
            debug!("[variables] Serving variable list of {} from cache", cell_id);
            return Ok(names);
        }

        let names = self.inspector.list_variables(cell_id).await.map_err(|e| {
            error!("[variables] Listing variables of {} failed: {}", cell_id, e);
            e
        })?;
        self.with_state(|state| {
            if let Some(resources) = state.resources.get_mut(cell_id) {
                if resources.variables.epoch() == epoch {
                    resources.variables.set_names(names.clone());
                }
            }
        });
        Ok(names)
    }

    /// Preview of one variable, fetched on first use and cached until the
    /// cell runs again. A failed fetch comes back as an error preview.
    pub async fn inspect_variable(&self, cell_id: &str, name: &str) -> Result<VariablePreview> {
        let (cached, epoch) = self.with_state(|state| -> Result<_> {
            state.cell_index(cell_id)?;
            let variables = &state.resources(cell_id).variables;
            Ok((variables.preview(name).cloned(), variables.epoch()))
        })?;
        if let Some(preview) = cached {
            return Ok(preview);
        }

        let preview = match self.inspector.get_variable_content(cell_id, name).await {
            Ok(preview) => preview.truncated(self.settings.preview_char_limit),
            Err(e) => {
                error!("[variables] Fetching {} of {} failed: {}", name, cell_id, e);
                return Ok(VariablePreview::Error {
                    message: e.to_string(),
                });
            }
        };

        self.with_state(|state| {
            if let Some(resources) = state.resources.get_mut(cell_id) {
                if resources.variables.epoch() == epoch {
                    resources.variables.insert(name, preview.clone());
                } else {
                    debug!("[variables] Dropping preview of {} fetched before re-execution", name);
                }
            }
        });
        Ok(preview)
    }

    // ── History persistence ──────────────────────────────────────────────

    /// Snapshot every cell's version history.
    pub fn export_session(&self) -> SessionRecord {
        self.with_state(|state| {
            let ledgers: BTreeMap<String, VersionLedger> = state
                .notebook
                .cells()
                .iter()
                .filter_map(|c| {
                    state
                        .resources
                        .get(&c.id)
                        .filter(|r| !r.ledger.is_empty())
                        .map(|r| (c.id.clone(), r.ledger.clone()))
                })
                .collect();
            SessionRecord::new(state.notebook.id.clone(), ledgers)
        })
    }

    /// Restore version histories from a record. Returns how many cells got
    /// their history back; entries for unknown cells are skipped. Restored
    /// versions are merged into the live ledgers, which never get shorter.
    pub fn import_session(&self, record: SessionRecord) -> usize {
        self.with_state(|state| {
            if record.notebook_id != state.notebook.id {
                warn!(
                    "[session] Record for {} does not match notebook {}",
                    record.notebook_id, state.notebook.id
                );
                return 0;
            }
            let mut restored = 0;
            for (cell_id, ledger) in record.ledgers {
                if state.notebook.cell(&cell_id).is_none() {
                    debug!("[session] Skipping history of unknown cell {}", cell_id);
                    continue;
                }
                let live = &mut state.resources(&cell_id).ledger;
                let before = live.len();
                let gained = live.merge(ledger);
                debug!(
                    "[session] Merged history of {}: {} -> {} version(s)",
                    cell_id,
                    before,
                    before + gained
                );
                restored += 1;
            }
            restored
        })
    }

    pub fn save_history(&self, store: &SessionStore) -> anyhow::Result<PathBuf> {
        store.save(&self.export_session())
    }

    pub fn restore_history(&self, store: &SessionStore) -> usize {
        store
            .load(&self.notebook_id())
            .map(|record| self.import_session(record))
            .unwrap_or(0)
    }
}
