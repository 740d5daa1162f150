//! Downstream handling: invalidation, the three resolution policies, the
//! sequential re-run queue and lazily fetched variables.

mod common;

use article_core::cell::CellState;
use article_core::events::ArticleEvent;
use article_core::invalidation::ChangeKind;
use article_core::queue::CellQueueStatus;
use article_core::settings::EngineSettings;
use article_core::variables::VariablePreview;
use article_core::{
    ArticleError, Cell, CellType, ExecuteMode, ExecuteOptions, Invalidation, InvalidationPolicy,
};
use common::*;
use tokio_util::sync::CancellationToken;

fn manual_settings() -> EngineSettings {
    EngineSettings {
        autofix: false,
        ..Default::default()
    }
}

async fn run(h: &Harness, cell_id: &str) -> Option<Invalidation> {
    h.engine
        .execute(
            cell_id,
            ExecuteMode::ExecuteExisting,
            ExecuteOptions::default(),
            &CancellationToken::new(),
        )
        .await
        .unwrap()
        .invalidation
}

// =============================================================================
// Mark stale / do nothing
// =============================================================================

#[tokio::test]
async fn test_regenerated_prompt_marks_downstream_stale() {
    let mut cells = vec![prompt_cell("cell-0", "load the iris dataset")];
    cells.extend(code_cells(4).into_iter().skip(1));
    let h = harness(cells);

    let invalidation = h
        .engine
        .execute(
            "cell-0",
            ExecuteMode::Regenerate,
            ExecuteOptions::default(),
            &CancellationToken::new(),
        )
        .await
        .unwrap()
        .invalidation
        .unwrap();
    assert_eq!(invalidation.kind, ChangeKind::Executed);

    let report = h
        .engine
        .resolve(&invalidation, InvalidationPolicy::MarkStale, &CancellationToken::new())
        .await;
    assert_eq!(report.marked, vec!["cell-1", "cell-2", "cell-3"]);

    for id in ["cell-1", "cell-2", "cell-3"] {
        let snapshot = h.engine.snapshot(id).unwrap();
        assert_eq!(snapshot.cell_state, CellState::Stale);
        assert_eq!(snapshot.stale_cause.as_deref(), Some("cell-0"));
    }
    assert_eq!(h.engine.snapshot("cell-0").unwrap().cell_state, CellState::Fresh);

    // marking never reaches the remote services
    assert_eq!(h.executor.calls(), 1);
    assert_eq!(h.generator.calls(), 1);
}

#[tokio::test]
async fn test_mark_stale_twice_is_idempotent() {
    let h = harness(code_cells(3));
    let invalidation = run(&h, "cell-0").await.unwrap();
    let token = CancellationToken::new();

    h.engine
        .resolve(&invalidation, InvalidationPolicy::MarkStale, &token)
        .await;
    let before = h.engine.snapshots();
    let report = h
        .engine
        .resolve(&invalidation, InvalidationPolicy::MarkStale, &token)
        .await;

    assert!(report.marked.is_empty());
    assert_eq!(report.already_stale, vec!["cell-1", "cell-2"]);
    assert_eq!(h.engine.snapshots(), before);
}

#[tokio::test]
async fn test_stale_cell_becomes_fresh_when_run() {
    let h = harness(code_cells(3));
    let invalidation = run(&h, "cell-0").await.unwrap();
    h.engine
        .resolve(&invalidation, InvalidationPolicy::MarkStale, &CancellationToken::new())
        .await;

    run(&h, "cell-1").await;
    let snapshot = h.engine.snapshot("cell-1").unwrap();
    assert_eq!(snapshot.cell_state, CellState::Fresh);
    assert!(snapshot.stale_cause.is_none());
    assert_eq!(h.engine.snapshot("cell-2").unwrap().cell_state, CellState::Stale);
}

#[tokio::test]
async fn test_failed_run_keeps_cell_stale() {
    let h = harness_with(code_cells(3), manual_settings(), FakeExecutor::default());
    let invalidation = run(&h, "cell-0").await.unwrap();
    h.engine
        .resolve(&invalidation, InvalidationPolicy::MarkStale, &CancellationToken::new())
        .await;

    h.executor.push(Ok(name_error()));
    h.engine
        .execute(
            "cell-1",
            ExecuteMode::ExecuteExisting,
            ExecuteOptions {
                autofix: false,
                comment: None,
            },
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    assert_eq!(h.engine.snapshot("cell-1").unwrap().cell_state, CellState::Stale);
}

#[tokio::test]
async fn test_do_nothing_changes_nothing() {
    let h = harness(code_cells(3));
    let invalidation = run(&h, "cell-0").await.unwrap();
    let before = h.engine.snapshots();
    let mut events = h.engine.subscribe();

    let report = h
        .engine
        .resolve(&invalidation, InvalidationPolicy::DoNothing, &CancellationToken::new())
        .await;

    assert_eq!(report.policy, InvalidationPolicy::DoNothing);
    assert!(report.marked.is_empty() && report.succeeded.is_empty());
    assert_eq!(h.engine.snapshots(), before);
    assert_eq!(h.executor.calls(), 1);

    let events = drain(&mut events);
    assert_eq!(events.len(), 1);
    assert!(matches!(
        &events[0],
        ArticleEvent::CellsInvalidated {
            policy: InvalidationPolicy::DoNothing,
            ..
        }
    ));
}

// =============================================================================
// Structural changes
// =============================================================================

#[tokio::test]
async fn test_delete_affects_only_cells_below() {
    let h = harness(code_cells(4));
    let mut events = h.engine.subscribe();

    let invalidation = h.engine.delete_cell("cell-2").unwrap();

    assert_eq!(invalidation.kind, ChangeKind::Deleted);
    assert_eq!(invalidation.affected, vec!["cell-3"]);
    assert!(h.engine.snapshot("cell-2").is_none());
    assert!(matches!(h.engine.ledger("cell-2"), Err(ArticleError::CellNotFound(_))));
    assert!(drain(&mut events).iter().any(|e| matches!(
        e,
        ArticleEvent::CellDeleted { cell_id, index: 2 } if cell_id == "cell-2"
    )));
}

#[tokio::test]
async fn test_delete_last_cell_affects_nothing() {
    let h = harness(code_cells(2));
    assert!(h.engine.delete_cell("cell-1").unwrap().is_empty());
    assert!(matches!(
        h.engine.delete_cell("cell-1"),
        Err(ArticleError::CellNotFound(_))
    ));
}

#[tokio::test]
async fn test_add_cell_appends_or_inserts_after_anchor() {
    let h = harness(code_cells(2));

    let appended = h.engine.add_cell(CellType::Markdown, None);
    assert_eq!(appended.index, 2);

    let inserted = h.engine.add_cell(CellType::Prompt, Some("cell-0"));
    assert_eq!(inserted.index, 1);

    let ids: Vec<_> = h.engine.snapshots().into_iter().map(|s| s.id).collect();
    assert_eq!(ids, vec!["cell-0".to_string(), inserted.id, "cell-1".into(), appended.id]);
}

#[tokio::test]
async fn test_explicit_invalidation_after_edit() {
    let h = harness(code_cells(3));
    let invalidation = h.engine.invalidate_cells("cell-0").unwrap();
    assert_eq!(invalidation.kind, ChangeKind::Edited);
    assert_eq!(invalidation.affected, vec!["cell-1", "cell-2"]);
}

// =============================================================================
// Re-run queue
// =============================================================================

#[tokio::test]
async fn test_rerun_all_runs_in_order_one_at_a_time() {
    let h = harness(code_cells(4));
    let invalidation = run(&h, "cell-1").await.unwrap();
    assert_eq!(invalidation.affected, vec!["cell-2", "cell-3"]);
    let mut events = h.engine.subscribe();

    let report = h
        .engine
        .resolve(&invalidation, InvalidationPolicy::RerunAll, &CancellationToken::new())
        .await;

    assert_eq!(report.succeeded, vec!["cell-2", "cell-3"]);
    assert!(report.failed.is_empty() && report.not_run.is_empty());
    assert_eq!(
        h.executor.log()[2..],
        ["start cell-2", "end cell-2", "start cell-3", "end cell-3"]
    );

    let queue_states: Vec<_> = drain(&mut events)
        .into_iter()
        .filter_map(|e| match e {
            ArticleEvent::QueueChanged { state } => Some(state),
            _ => None,
        })
        .collect();
    assert_eq!(queue_states.len(), 3);
    let first = &queue_states[0];
    assert_eq!(first.executing_cell_id.as_deref(), Some("cell-2"));
    assert_eq!(first.cells[1].cell_id, "cell-3");
    assert_eq!(first.cells[1].status, CellQueueStatus::Pending);
    let last = queue_states.last().unwrap();
    assert!(!last.processing);
    assert!(last.cells.is_empty());
}

#[tokio::test]
async fn test_rerun_continues_past_failures_by_default() {
    let h = harness_with(code_cells(4), manual_settings(), FakeExecutor::default());
    let invalidation = run(&h, "cell-0").await.unwrap();
    h.executor.push(Ok(name_error()));

    let report = h
        .engine
        .resolve(&invalidation, InvalidationPolicy::RerunAll, &CancellationToken::new())
        .await;

    assert_eq!(report.failed, vec!["cell-1"]);
    assert_eq!(report.succeeded, vec!["cell-2", "cell-3"]);
}

#[tokio::test]
async fn test_rerun_stops_on_error_when_configured() {
    let settings = EngineSettings {
        stop_rerun_on_error: true,
        ..manual_settings()
    };
    let h = harness_with(code_cells(4), settings, FakeExecutor::default());
    let invalidation = run(&h, "cell-0").await.unwrap();
    h.executor.push(Ok(name_error()));

    let report = h
        .engine
        .resolve(&invalidation, InvalidationPolicy::RerunAll, &CancellationToken::new())
        .await;

    assert_eq!(report.failed, vec!["cell-1"]);
    assert_eq!(report.not_run, vec!["cell-2", "cell-3"]);
    assert_eq!(h.executor.calls(), 2);
}

#[tokio::test]
async fn test_rerun_repairs_failures_when_autofix_enabled() {
    let h = harness(code_cells(3));
    let invalidation = run(&h, "cell-0").await.unwrap();
    h.executor.push(Ok(name_error()));

    let report = h
        .engine
        .resolve(&invalidation, InvalidationPolicy::RerunAll, &CancellationToken::new())
        .await;

    assert_eq!(report.succeeded, vec!["cell-1", "cell-2"]);
    assert_eq!(h.generator.calls(), 1);
    assert_eq!(h.engine.snapshot("cell-1").unwrap().retry_count, 1);
}

#[tokio::test]
async fn test_cancelled_rerun_runs_nothing() {
    let h = harness(code_cells(4));
    let invalidation = run(&h, "cell-0").await.unwrap();
    let token = CancellationToken::new();
    token.cancel();

    let report = h
        .engine
        .resolve(&invalidation, InvalidationPolicy::RerunAll, &token)
        .await;

    assert!(report.succeeded.is_empty());
    assert_eq!(report.not_run, vec!["cell-1", "cell-2", "cell-3"]);
    assert_eq!(h.executor.calls(), 1);
}

#[tokio::test]
async fn test_rerun_skips_non_executable_and_missing_cells() {
    let mut cells = code_cells(2);
    let mut notes = Cell::with_id("notes", CellType::Markdown);
    notes.markdown = "## Results".into();
    cells.insert(1, notes);
    let h = harness(cells);

    let invalidation = run(&h, "cell-0").await.unwrap();
    assert_eq!(invalidation.affected, vec!["notes", "cell-1"]);
    h.engine.delete_cell("cell-1").unwrap();

    let report = h
        .engine
        .resolve(&invalidation, InvalidationPolicy::RerunAll, &CancellationToken::new())
        .await;

    assert!(report.succeeded.is_empty());
    assert_eq!(report.missing, vec!["cell-1"]);
    assert_eq!(h.executor.calls(), 1);
}

// =============================================================================
// Variables
// =============================================================================

#[tokio::test]
async fn test_variable_list_is_cached_until_rerun() {
    let h = harness(code_cells(1));
    run(&h, "cell-0").await;

    let names = h.engine.list_variables("cell-0").await.unwrap();
    assert_eq!(names.len(), 2);
    h.engine.list_variables("cell-0").await.unwrap();
    assert_eq!(h.inspector.list_calls(), 1);

    run(&h, "cell-0").await;
    h.engine.list_variables("cell-0").await.unwrap();
    assert_eq!(h.inspector.list_calls(), 2);
}

#[tokio::test]
async fn test_variable_content_fetched_once_per_execution() {
    let h = harness(code_cells(1));
    run(&h, "cell-0").await;

    let first = h.engine.inspect_variable("cell-0", "df").await.unwrap();
    let again = h.engine.inspect_variable("cell-0", "df").await.unwrap();
    assert_eq!(first, again);
    assert_eq!(h.inspector.fetches(), 1);

    run(&h, "cell-0").await;
    let fresh = h.engine.inspect_variable("cell-0", "df").await.unwrap();
    assert_eq!(h.inspector.fetches(), 2);
    assert_ne!(fresh, first);
}

#[tokio::test]
async fn test_failed_fetch_is_shown_inline_and_not_cached() {
    let h = harness(code_cells(1));
    h.inspector.fail_next_fetch();

    let preview = h.engine.inspect_variable("cell-0", "df").await.unwrap();
    match preview {
        VariablePreview::Error { message } => assert!(message.contains("503")),
        other => panic!("expected error preview, got {other:?}"),
    }

    let retried = h.engine.inspect_variable("cell-0", "df").await.unwrap();
    assert!(!retried.is_error());
    assert_eq!(h.inspector.fetches(), 2);
}

#[tokio::test]
async fn test_large_previews_are_truncated() {
    let settings = EngineSettings {
        preview_char_limit: 3,
        ..Default::default()
    };
    let h = harness_with(code_cells(1), settings, FakeExecutor::default());

    let preview = h.engine.inspect_variable("cell-0", "df").await.unwrap();
    assert_eq!(
        preview,
        VariablePreview::Scalar {
            type_name: "int".into(),
            value: "df#".into(),
            truncated: true,
        }
    );
}

#[tokio::test]
async fn test_variables_of_unknown_cell() {
    let h = harness(code_cells(1));
    assert!(matches!(
        h.engine.inspect_variable("nope", "df").await,
        Err(ArticleError::CellNotFound(_))
    ));
    assert_eq!(h.inspector.fetches(), 0);
}
