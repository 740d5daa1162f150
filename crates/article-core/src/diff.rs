//! Line-level diff between an original and a current text snapshot.
//!
//! [`PositionalDiff`] is the default: it compares line `i` of one side with
//! line `i` of the other. It is exact for small in-place edits but reports a
//! block insertion as a run of modified lines. [`LcsDiff`] aligns on the
//! longest common subsequence instead and can be selected through
//! [`DiffAlgorithm`]. Both are pure; callers only see [`DiffEngine`].

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use ts_rs::TS;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum DiffKind {
    Unchanged,
    Added,
    Removed,
    Modified,
}

/// One line of diff output. Derived on demand, never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct DiffLine {
    /// 1-based line number. Refers to the current text, except for
    /// `Removed` lines from [`LcsDiff`], which use the original numbering.
    pub line_number: usize,
    pub kind: DiffKind,
    /// Current line; the original line for `Removed`.
    pub content: String,
    /// Original line, set for `Modified` only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub previous: Option<String>,
}

/// Line counts per classification.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffSummary {
    pub unchanged: usize,
    pub added: usize,
    pub removed: usize,
    pub modified: usize,
}

impl DiffSummary {
    pub fn from_lines(lines: &[DiffLine]) -> Self {
        let mut summary = Self::default();
        for line in lines {
            match line.kind {
                DiffKind::Unchanged => summary.unchanged += 1,
                DiffKind::Added => summary.added += 1,
                DiffKind::Removed => summary.removed += 1,
                DiffKind::Modified => summary.modified += 1,
            }
        }
        summary
    }

    pub fn changed(&self) -> usize {
        self.added + self.removed + self.modified
    }
}

/// A diff algorithm.
pub trait DiffEngine: Send + Sync {
    fn compute(&self, original: &str, current: &str) -> Vec<DiffLine>;
}

/// Which [`DiffEngine`] to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum DiffAlgorithm {
    #[default]
    Positional,
    Lcs,
}

impl DiffAlgorithm {
    pub fn engine(self) -> &'static dyn DiffEngine {
        match self {
            DiffAlgorithm::Positional => &PositionalDiff,
            DiffAlgorithm::Lcs => &LcsDiff,
        }
    }
}

impl std::fmt::Display for DiffAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DiffAlgorithm::Positional => write!(f, "positional"),
            DiffAlgorithm::Lcs => write!(f, "lcs"),
        }
    }
}

impl std::str::FromStr for DiffAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "positional" | "naive" => Ok(DiffAlgorithm::Positional),
            "lcs" => Ok(DiffAlgorithm::Lcs),
            other => Err(format!("unknown diff algorithm: {other}")),
        }
    }
}

/// Split on `\n` so that empty text is one empty line and a trailing
/// newline shows up as a final empty line, matching editor line numbering.
fn split_lines(text: &str) -> Vec<&str> {
    text.split('\n').collect()
}

/// Index-by-index comparison.
#[derive(Debug, Clone, Copy, Default)]
pub struct PositionalDiff;

impl DiffEngine for PositionalDiff {
    fn compute(&self, original: &str, current: &str) -> Vec<DiffLine> {
        let original_lines = split_lines(original);
        let current_lines = split_lines(current);
        let max_len = original_lines.len().max(current_lines.len());

        (0..max_len)
            .map(|i| {
                let orig = original_lines.get(i).copied().unwrap_or("");
                let curr = current_lines.get(i).copied().unwrap_or("");
                let line_number = i + 1;

                if orig == curr {
                    DiffLine {
                        line_number,
                        kind: DiffKind::Unchanged,
                        content: curr.to_string(),
                        previous: None,
                    }
                } else if orig.is_empty() {
                    DiffLine {
                        line_number,
                        kind: DiffKind::Added,
                        content: curr.to_string(),
                        previous: None,
                    }
                } else if curr.is_empty() {
                    DiffLine {
                        line_number,
                        kind: DiffKind::Removed,
                        content: orig.to_string(),
                        previous: None,
                    }
                } else {
                    DiffLine {
                        line_number,
                        kind: DiffKind::Modified,
                        content: curr.to_string(),
                        previous: Some(orig.to_string()),
                    }
                }
            })
            .collect()
    }
}

/// Longest-common-subsequence alignment.
///
/// Quadratic in line count; intended for cell-sized snippets.
#[derive(Debug, Clone, Copy, Default)]
pub struct LcsDiff;

impl DiffEngine for LcsDiff {
    fn compute(&self, original: &str, current: &str) -> Vec<DiffLine> {
        let a = split_lines(original);
        let b = split_lines(current);
        let (n, m) = (a.len(), b.len());

        // table[i][j] = LCS length of a[i..] and b[j..]
        let mut table = vec![vec![0usize; m + 1]; n + 1];
        for i in (0..n).rev() {
            for j in (0..m).rev() {
                table[i][j] = if a[i] == b[j] {
                    table[i + 1][j + 1] + 1
                } else {
                    table[i + 1][j].max(table[i][j + 1])
                };
            }
        }

        let mut out = Vec::with_capacity(n.max(m));
        let (mut i, mut j) = (0, 0);
        while i < n || j < m {
            if i < n && j < m && a[i] == b[j] {
                out.push(DiffLine {
                    line_number: j + 1,
                    kind: DiffKind::Unchanged,
                    content: b[j].to_string(),
                    previous: None,
                });
                i += 1;
                j += 1;
            } else if j < m && (i == n || table[i][j + 1] >= table[i + 1][j]) {
                out.push(DiffLine {
                    line_number: j + 1,
                    kind: DiffKind::Added,
                    content: b[j].to_string(),
                    previous: None,
                });
                j += 1;
            } else {
                out.push(DiffLine {
                    line_number: i + 1,
                    kind: DiffKind::Removed,
                    content: a[i].to_string(),
                    previous: None,
                });
                i += 1;
            }
        }
        out
    }
}

/// Positional diff of two snapshots.
pub fn compute_diff(original: &str, current: &str) -> Vec<DiffLine> {
    PositionalDiff.compute(original, current)
}

/// Whether the two snapshots differ at all. Independent of diff granularity.
pub fn has_changes(original: &str, current: &str) -> bool {
    original != current
}
