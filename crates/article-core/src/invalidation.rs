//! Deciding which cells a change affects and what to do about them.
//!
//! Which cells depend on which is a [`DependencyModel`]. The default,
//! [`LinearDependencies`], treats every cell as depending on every cell
//! above it, so a change at index `k` affects all of `k+1..`. A finer
//! data-flow model can be plugged in without touching the engine.
//!
//! A change produces an [`Invalidation`]: the changed cell and the affected
//! cell ids, captured by id so later reordering cannot shift the set. The
//! user resolves it with one [`InvalidationPolicy`] applied to the whole set.

use std::sync::Arc;

use log::info;
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::lifecycle::MarkStale;
use crate::notebook::Notebook;

/// The three choices offered for downstream cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum InvalidationPolicy {
    /// Execute every affected cell in order, one at a time.
    RerunAll,
    /// Flag every affected cell as stale without executing anything.
    MarkStale,
    /// Leave everything as is.
    DoNothing,
}

impl std::fmt::Display for InvalidationPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InvalidationPolicy::RerunAll => write!(f, "rerun_all"),
            InvalidationPolicy::MarkStale => write!(f, "mark_stale"),
            InvalidationPolicy::DoNothing => write!(f, "do_nothing"),
        }
    }
}

/// What happened to the changed cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum ChangeKind {
    /// Re-executed with a different result than before
    Executed,
    /// Code or prompt edited and accepted
    Edited,
    Deleted,
}

/// Where a change happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeSite {
    /// The cell at this index changed and is still there.
    At(usize),
    /// The cell that was at this index has been removed; cells from this
    /// index on were below it.
    Removed(usize),
}

impl ChangeSite {
    /// First index that lies downstream of the change.
    pub fn first_downstream(self) -> usize {
        match self {
            ChangeSite::At(k) => k + 1,
            ChangeSite::Removed(k) => k,
        }
    }
}

/// Decides which cells depend on a change.
pub trait DependencyModel: Send + Sync {
    /// Indices of affected cells, ascending.
    fn affected(&self, notebook: &Notebook, site: ChangeSite) -> Vec<usize>;
}

/// Every cell depends on every cell above it.
#[derive(Debug, Clone, Copy, Default)]
pub struct LinearDependencies;

impl DependencyModel for LinearDependencies {
    fn affected(&self, notebook: &Notebook, site: ChangeSite) -> Vec<usize> {
        (site.first_downstream()..notebook.len()).collect()
    }
}

/// A pending downstream decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invalidation {
    pub changed_cell_id: String,
    pub kind: ChangeKind,
    /// Affected cell ids in pipeline order.
    pub affected: Vec<String>,
}

impl Invalidation {
    pub fn is_empty(&self) -> bool {
        self.affected.is_empty()
    }
}

/// Outcome of resolving an [`Invalidation`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvalidationReport {
    pub policy: InvalidationPolicy,
    /// Cells newly marked stale
    #[serde(default)]
    pub marked: Vec<String>,
    #[serde(default)]
    pub already_stale: Vec<String>,
    /// Cells left alone because they were executing or retrying
    #[serde(default)]
    pub skipped_busy: Vec<String>,
    /// Cells no longer in the notebook
    #[serde(default)]
    pub missing: Vec<String>,
    /// Re-run cells that ended in success
    #[serde(default)]
    pub succeeded: Vec<String>,
    /// Re-run cells that ended in a terminal error
    #[serde(default)]
    pub failed: Vec<String>,
    /// Cells never started because the chain was cancelled or stopped
    #[serde(default)]
    pub not_run: Vec<String>,
}

impl InvalidationReport {
    pub fn new(policy: InvalidationPolicy) -> Self {
        Self {
            policy,
            marked: Vec::new(),
            already_stale: Vec::new(),
            skipped_busy: Vec::new(),
            missing: Vec::new(),
            succeeded: Vec::new(),
            failed: Vec::new(),
            not_run: Vec::new(),
        }
    }
}

#[derive(Clone)]
pub struct Resolver {
    model: Arc<dyn DependencyModel>,
}

impl Default for Resolver {
    fn default() -> Self {
        Self::new(Arc::new(LinearDependencies))
    }
}

impl Resolver {
    pub fn new(model: Arc<dyn DependencyModel>) -> Self {
        Self { model }
    }

    /// Build the pending decision for a change. Indices are resolved against
    /// `notebook` as it is now (after removal, for deletions).
    pub fn invalidation(
        &self,
        notebook: &Notebook,
        changed_cell_id: &str,
        kind: ChangeKind,
        site: ChangeSite,
    ) -> Invalidation {
        let affected = self
            .model
            .affected(notebook, site)
            .into_iter()
            .filter_map(|i| notebook.cell_at(i).map(|c| c.id.clone()))
            .collect();
        Invalidation {
            changed_cell_id: changed_cell_id.to_string(),
            kind,
            affected,
        }
    }

    /// Apply the mark-stale policy. Applying it again is a no-op.
    pub fn mark_stale(
        &self,
        notebook: &mut Notebook,
        invalidation: &Invalidation,
    ) -> InvalidationReport {
        let mut report = InvalidationReport::new(InvalidationPolicy::MarkStale);
        for id in &invalidation.affected {
            let Some(cell) = notebook.cell_mut(id) else {
                report.missing.push(id.clone());
                continue;
            };
            match cell.mark_stale(&invalidation.changed_cell_id) {
                MarkStale::Marked => report.marked.push(id.clone()),
                MarkStale::AlreadyStale => report.already_stale.push(id.clone()),
                MarkStale::Busy => report.skipped_busy.push(id.clone()),
            }
        }
        info!(
            "[invalidate] Marked {} cell(s) stale after change to {} ({} already stale, {} busy)",
            report.marked.len(),
            invalidation.changed_cell_id,
            report.already_stale.len(),
            report.skipped_busy.len()
        );
        report
    }

    /// Apply the do-nothing policy: log the override, change nothing.
    pub fn do_nothing(&self, invalidation: &Invalidation) -> InvalidationReport {
        info!(
            "[invalidate] User chose to leave {} downstream cell(s) of {} unchanged",
            invalidation.affected.len(),
            invalidation.changed_cell_id
        );
        InvalidationReport::new(InvalidationPolicy::DoNothing)
    }
}
