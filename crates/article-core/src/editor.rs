//! Non-destructive code editing for a single cell.
//!
//! A [`CodeEditor`] holds a working buffer next to the baseline it was
//! opened with. Edits (typed or AI-assisted) only touch the buffer; the diff
//! against the baseline is shown until the user accepts or rejects. Accepting
//! yields an [`AcceptedEdit`] for the engine to commit. Changing mode always
//! drops the current [`Selection`].

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::diff::{has_changes, DiffAlgorithm, DiffLine};
use crate::error::ArticleError;
use crate::ledger::{VersionLedger, VersionOrigin};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum EditMode {
    #[default]
    View,
    Edit,
    AiAssist,
}

/// Range of lines (1-based, inclusive) in the working buffer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Selection {
    pub start_line: usize,
    pub end_line: usize,
    pub text: String,
}

/// An AI-assisted fix to submit for a cell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixRequest {
    pub selection: Option<Selection>,
    pub instruction: String,
}

impl FixRequest {
    /// Text the request box opens with: the selected range and its lines.
    pub fn draft_text(&self) -> String {
        match &self.selection {
            Some(sel) => format!(
                "Lines {}-{}:\n```\n{}\n```\n\n",
                sel.start_line, sel.end_line, sel.text
            ),
            None => String::new(),
        }
    }

    /// Checked before anything is sent to the generation service.
    pub fn validate(&self) -> Result<(), ArticleError> {
        if self.instruction.trim().is_empty() {
            return Err(ArticleError::EmptyFixRequest);
        }
        Ok(())
    }

    /// Comment passed to the generation service.
    pub fn comment(&self) -> String {
        format!("{}{}", self.draft_text(), self.instruction.trim())
    }
}

/// An edit the user accepted; commit it with
/// [`crate::engine::ArticleEngine::accept_edit`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcceptedEdit {
    pub content: String,
    pub origin: VersionOrigin,
    pub description: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CodeEditor {
    baseline: String,
    buffer: String,
    mode: EditMode,
    selection: Option<Selection>,
    algorithm: DiffAlgorithm,
    /// Origin to record if the buffer is accepted as is.
    pending_origin: VersionOrigin,
    pending_description: Option<String>,
}

impl CodeEditor {
    pub fn open(code: impl Into<String>, algorithm: DiffAlgorithm) -> Self {
        let code = code.into();
        Self {
            baseline: code.clone(),
            buffer: code,
            mode: EditMode::View,
            selection: None,
            algorithm,
            pending_origin: VersionOrigin::Manual,
            pending_description: None,
        }
    }

    pub fn mode(&self) -> EditMode {
        self.mode
    }

    pub fn buffer(&self) -> &str {
        &self.buffer
    }

    pub fn baseline(&self) -> &str {
        &self.baseline
    }

    pub fn selection(&self) -> Option<&Selection> {
        self.selection.as_ref()
    }

    pub fn set_mode(&mut self, mode: EditMode) {
        if self.mode != mode {
            self.selection = None;
        }
        self.mode = mode;
    }

    /// Replace the working buffer with typed content.
    pub fn edit(&mut self, text: impl Into<String>) {
        self.set_mode(EditMode::Edit);
        self.buffer = text.into();
        self.pending_origin = VersionOrigin::Manual;
        self.pending_description = None;
    }

    /// Select lines `start..=end` (1-based) of the buffer.
    pub fn select(&mut self, start: usize, end: usize) -> Result<&Selection, ArticleError> {
        let lines: Vec<&str> = self.buffer.split('\n').collect();
        let line_count = lines.len();
        if start == 0 || end < start || end > line_count {
            return Err(ArticleError::InvalidSelection {
                start,
                end,
                line_count,
            });
        }
        let text = lines[start - 1..end].join("\n");
        let selection = self.selection.insert(Selection {
            start_line: start,
            end_line: end,
            text,
        });
        Ok(&*selection)
    }

    /// Open the AI assist box. The current selection moves into the returned
    /// request; the user fills in `instruction` before submitting.
    pub fn begin_assist(&mut self) -> FixRequest {
        let selection = self.selection.take();
        self.set_mode(EditMode::AiAssist);
        FixRequest {
            selection,
            instruction: String::new(),
        }
    }

    /// Load code returned for a fix request and go back to view mode with
    /// the diff against the baseline visible.
    pub fn apply_fix(&mut self, code: impl Into<String>, request: &FixRequest) {
        self.buffer = code.into();
        self.pending_origin = VersionOrigin::AiFix;
        self.pending_description = Some(request.instruction.trim().to_string());
        self.set_mode(EditMode::View);
        self.selection = None;
    }

    pub fn has_changes(&self) -> bool {
        has_changes(&self.baseline, &self.buffer)
    }

    /// Diff highlighting is shown in view mode whenever the buffer differs.
    pub fn diff_visible(&self) -> bool {
        self.mode == EditMode::View && self.has_changes()
    }

    pub fn diff(&self) -> Vec<DiffLine> {
        self.algorithm.engine().compute(&self.baseline, &self.buffer)
    }

    /// Accept the buffer. Returns `None` when there is nothing to commit.
    pub fn accept(&mut self) -> Option<AcceptedEdit> {
        self.set_mode(EditMode::View);
        if !self.has_changes() {
            return None;
        }
        self.baseline = self.buffer.clone();
        let accepted = AcceptedEdit {
            content: self.buffer.clone(),
            origin: self.pending_origin,
            description: self.pending_description.take(),
        };
        self.pending_origin = VersionOrigin::Manual;
        Some(accepted)
    }

    /// Throw away the buffer and return to the baseline.
    pub fn reject(&mut self) {
        self.buffer = self.baseline.clone();
        self.pending_origin = VersionOrigin::Manual;
        self.pending_description = None;
        self.set_mode(EditMode::View);
    }

    /// Copy the ledger's original version into the buffer. The ledger is
    /// not written; accept the buffer to record the reset.
    pub fn reset(&mut self, ledger: &VersionLedger) -> bool {
        let Some(original) = ledger.original() else {
            return false;
        };
        self.buffer = original.content.clone();
        self.pending_origin = VersionOrigin::Manual;
        self.pending_description = Some(format!("Reset to version {}", original.version));
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::DiffKind;

    fn sixteen_lines() -> String {
        (1..=16)
            .map(|i| format!("line_{i} = {i}"))
            .collect::<Vec<_>>()
            .join("\n")
    }

    #[test]
    fn test_open_starts_in_view_without_changes() {
        let editor = CodeEditor::open("x = 1", DiffAlgorithm::Positional);
        assert_eq!(editor.mode(), EditMode::View);
        assert!(!editor.has_changes());
        assert!(!editor.diff_visible());
    }

    #[test]
    fn test_select_extracts_text() {
        let mut editor = CodeEditor::open(sixteen_lines(), DiffAlgorithm::Positional);
        editor.set_mode(EditMode::Edit);
        let sel = editor.select(10, 14).unwrap().clone();

        assert_eq!(sel.start_line, 10);
        assert_eq!(sel.end_line, 14);
        assert_eq!(
            sel.text,
            "line_10 = 10\nline_11 = 11\nline_12 = 12\nline_13 = 13\nline_14 = 14"
        );
    }

    #[test]
    fn test_select_rejects_out_of_range() {
        let mut editor = CodeEditor::open("a\nb", DiffAlgorithm::Positional);
        assert!(matches!(
            editor.select(0, 1),
            Err(ArticleError::InvalidSelection { .. })
        ));
        assert!(matches!(
            editor.select(2, 1),
            Err(ArticleError::InvalidSelection { .. })
        ));
        assert!(matches!(
            editor.select(1, 3),
            Err(ArticleError::InvalidSelection { line_count: 2, .. })
        ));
        assert!(editor.selection().is_none());
    }

    #[test]
    fn test_mode_change_clears_selection() {
        let mut editor = CodeEditor::open("a\nb", DiffAlgorithm::Positional);
        editor.set_mode(EditMode::Edit);
        editor.select(1, 2).unwrap();
        editor.set_mode(EditMode::Edit);
        assert!(editor.selection().is_some());

        editor.set_mode(EditMode::View);
        assert!(editor.selection().is_none());
    }

    #[test]
    fn test_assist_request_is_prepopulated_with_selection() {
        let mut editor = CodeEditor::open(sixteen_lines(), DiffAlgorithm::Positional);
        editor.set_mode(EditMode::Edit);
        editor.select(10, 14).unwrap();

        let request = editor.begin_assist();
        assert_eq!(editor.mode(), EditMode::AiAssist);
        assert!(editor.selection().is_none());

        let draft = request.draft_text();
        assert!(draft.starts_with("Lines 10-14:\n"));
        assert!(draft.contains("line_10 = 10\n"));
        assert!(draft.contains("line_14 = 14"));
        assert!(!draft.contains("line_15"));
        assert!(!draft.contains("line_9 "));
    }

    #[test]
    fn test_empty_instruction_is_rejected() {
        let mut editor = CodeEditor::open("a", DiffAlgorithm::Positional);
        let mut request = editor.begin_assist();
        request.instruction = "   ".into();
        assert!(matches!(
            request.validate(),
            Err(ArticleError::EmptyFixRequest)
        ));

        request.instruction = "use numpy".into();
        assert!(request.validate().is_ok());
    }

    #[test]
    fn test_apply_fix_returns_to_view_with_diff() {
        let mut editor = CodeEditor::open("a\nb\nc", DiffAlgorithm::Positional);
        editor.set_mode(EditMode::Edit);
        editor.select(2, 2).unwrap();
        let mut request = editor.begin_assist();
        request.instruction = "uppercase b".into();

        editor.apply_fix("a\nB\nc", &request);

        assert_eq!(editor.mode(), EditMode::View);
        assert!(editor.selection().is_none());
        assert!(editor.diff_visible());
        let diff = editor.diff();
        assert_eq!(diff[1].kind, DiffKind::Modified);
    }

    #[test]
    fn test_apply_fix_with_identical_code_shows_no_diff() {
        let mut editor = CodeEditor::open("a", DiffAlgorithm::Positional);
        let mut request = editor.begin_assist();
        request.instruction = "nothing".into();
        editor.apply_fix("a", &request);
        assert!(!editor.diff_visible());
    }

    #[test]
    fn test_accept_produces_edit_with_origin() {
        let mut editor = CodeEditor::open("a", DiffAlgorithm::Positional);
        let mut request = editor.begin_assist();
        request.instruction = "fix it".into();
        editor.apply_fix("b", &request);

        let accepted = editor.accept().unwrap();
        assert_eq!(accepted.content, "b");
        assert_eq!(accepted.origin, VersionOrigin::AiFix);
        assert_eq!(accepted.description.as_deref(), Some("fix it"));
        assert_eq!(editor.baseline(), "b");
        assert!(!editor.has_changes());

        editor.edit("c");
        assert_eq!(editor.accept().unwrap().origin, VersionOrigin::Manual);
    }

    #[test]
    fn test_accept_without_changes_is_none() {
        let mut editor = CodeEditor::open("a", DiffAlgorithm::Positional);
        editor.edit("a");
        assert!(editor.accept().is_none());
    }

    #[test]
    fn test_reject_restores_baseline() {
        let mut editor = CodeEditor::open("a", DiffAlgorithm::Positional);
        editor.edit("b");
        editor.reject();
        assert_eq!(editor.buffer(), "a");
        assert_eq!(editor.mode(), EditMode::View);
    }

    #[test]
    fn test_reset_copies_original_without_touching_ledger() {
        let mut ledger = VersionLedger::new();
        ledger.commit("generated", VersionOrigin::Original, None);
        ledger.commit("edited", VersionOrigin::Manual, None);

        let mut editor = CodeEditor::open("edited", DiffAlgorithm::Positional);
        assert!(editor.reset(&ledger));

        assert_eq!(editor.buffer(), "generated");
        assert_eq!(ledger.len(), 2);
        assert!(editor.has_changes());
    }

    #[test]
    fn test_reset_with_empty_ledger_is_noop() {
        let mut editor = CodeEditor::open("x", DiffAlgorithm::Positional);
        assert!(!editor.reset(&VersionLedger::new()));
        assert_eq!(editor.buffer(), "x");
    }
}
