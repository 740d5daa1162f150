//! The ordered cell sequence of an article plus its metadata.
//!
//! Position is meaningful: a cell depends on every cell above it. The
//! notebook owns its cells outright; callers get snapshots, and mutation
//! goes through the engine.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::cell::{Cell, CellSnapshot, CellType};
use crate::services::{UpstreamCell, UpstreamContext};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotebookMetadata {
    pub title: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone)]
pub struct Notebook {
    pub id: String,
    pub metadata: NotebookMetadata,
    cells: Vec<Cell>,
    /// Set by any structural or content change, cleared by the owner after saving.
    pub dirty: bool,
}

impl Notebook {
    pub fn new(metadata: NotebookMetadata) -> Self {
        Self::with_id(Uuid::new_v4().to_string(), metadata)
    }

    pub fn with_id(id: impl Into<String>, metadata: NotebookMetadata) -> Self {
        Self {
            id: id.into(),
            metadata,
            cells: Vec::new(),
            dirty: false,
        }
    }

    /// Build a notebook from existing cells, in order.
    pub fn from_cells(metadata: NotebookMetadata, cells: Vec<Cell>) -> Self {
        let mut notebook = Self::new(metadata);
        notebook.cells = cells;
        notebook
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    pub fn find_cell_index(&self, cell_id: &str) -> Option<usize> {
        self.cells.iter().position(|c| c.id == cell_id)
    }

    pub fn cell(&self, cell_id: &str) -> Option<&Cell> {
        self.cells.iter().find(|c| c.id == cell_id)
    }

    pub(crate) fn cell_mut(&mut self, cell_id: &str) -> Option<&mut Cell> {
        self.cells.iter_mut().find(|c| c.id == cell_id)
    }

    pub fn cell_at(&self, index: usize) -> Option<&Cell> {
        self.cells.get(index)
    }

    /// Insert a new empty cell after `after_cell_id`, or at the end when no
    /// anchor is given or the anchor does not exist.
    pub fn add_cell(&mut self, cell_type: CellType, after_cell_id: Option<&str>) -> CellSnapshot {
        self.insert_cell(Cell::new(cell_type), after_cell_id)
    }

    /// Insert an existing cell value; same placement rules as [`Self::add_cell`].
    pub fn insert_cell(&mut self, cell: Cell, after_cell_id: Option<&str>) -> CellSnapshot {
        let idx = after_cell_id
            .and_then(|id| self.find_cell_index(id))
            .map(|i| i + 1)
            .unwrap_or(self.cells.len());

        let snapshot = cell.snapshot(idx);
        self.cells.insert(idx, cell);
        self.dirty = true;
        snapshot
    }

    /// Remove a cell, returning its former index and the cell itself.
    pub(crate) fn remove_cell(&mut self, cell_id: &str) -> Option<(usize, Cell)> {
        let idx = self.find_cell_index(cell_id)?;
        let cell = self.cells.remove(idx);
        self.dirty = true;
        Some((idx, cell))
    }

    /// Context handed to remote services for the cell at `index`: every cell
    /// strictly above it.
    pub fn upstream_context(&self, index: usize) -> UpstreamContext {
        let cells = self
            .cells
            .iter()
            .take(index)
            .map(|c| UpstreamCell {
                id: c.id.clone(),
                cell_type: c.cell_type,
                prompt: c.prompt.clone(),
                code: c.code.clone(),
                markdown: c.markdown.clone(),
                last_status: c.last_result().map(|r| r.status),
            })
            .collect();
        UpstreamContext {
            notebook_id: self.id.clone(),
            cells,
        }
    }

    pub fn snapshots(&self) -> Vec<CellSnapshot> {
        self.cells
            .iter()
            .enumerate()
            .map(|(i, c)| c.snapshot(i))
            .collect()
    }
}
