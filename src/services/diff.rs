//! Line diffs between consecutive snapshots and change significance.

use serde::Serialize;

use crate::extract::Classifier;
use crate::models::Snapshot;

/// Lines longer than this are truncated in diff text.
pub const MAX_LINE_CHARS: usize = 400;
/// Diff text stops after this many lines.
pub const MAX_DIFF_LINES: usize = 2000;
/// Above this many cells the LCS table is skipped and the changed middle
/// is reported as one replacement.
const MAX_LCS_CELLS: usize = 4_000_000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiffResult {
    pub diff_text: String,
    pub significance: i32,
    pub added: usize,
    pub removed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Equal,
    Delete,
    Insert,
}

/// A run of changes: old lines `[old_start, old_start+old_len)` replaced
/// by new lines `[new_start, new_start+new_len)`, zero-based.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Hunk {
    old_start: usize,
    old_len: usize,
    new_start: usize,
    new_len: usize,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DiffEngine {
    classifier: Classifier,
}

impl DiffEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run [`diff`](Self::diff) on the blocking pool.
    pub async fn diff_blocking(
        self,
        prev: Snapshot,
        new: Snapshot,
    ) -> Result<DiffResult, tokio::task::JoinError> {
        tokio::task::spawn_blocking(move || self.diff(&prev, &new)).await
    }

    /// Diff `prev` against `new` and score the change.
    pub fn diff(&self, prev: &Snapshot, new: &Snapshot) -> DiffResult {
        let old: Vec<&str> = prev.normalized_text.lines().collect();
        let cur: Vec<&str> = new.normalized_text.lines().collect();
        let hunks = hunks(&old, &cur);

        let mut changed = Vec::new();
        let (mut added, mut removed) = (0, 0);
        for h in &hunks {
            removed += h.old_len;
            added += h.new_len;
            changed.extend_from_slice(&old[h.old_start..h.old_start + h.old_len]);
            changed.extend_from_slice(&cur[h.new_start..h.new_start + h.new_len]);
        }

        let mut significance = new.score + magnitude(added + removed, old.len() + cur.len());
        significance += self.classifier.keyword_hits(&changed.join("\n")) as i32;
        if prev.effective_date != new.effective_date {
            significance += 2;
        }
        if prev.form_id != new.form_id {
            significance += 2;
        }

        DiffResult {
            diff_text: render(&hunks, &old, &cur),
            significance,
            added,
            removed,
        }
    }
}

/// 0-3 by share of lines touched.
fn magnitude(changed: usize, total: usize) -> i32 {
    if changed == 0 {
        return 0;
    }
    let ratio = changed as f64 / total.max(1) as f64;
    match ratio {
        r if r >= 0.5 => 3,
        r if r >= 0.2 => 2,
        r if r >= 0.05 => 1,
        _ => 0,
    }
}

fn hunks(old: &[&str], new: &[&str]) -> Vec<Hunk> {
    let prefix = old.iter().zip(new).take_while(|(a, b)| a == b).count();
    let suffix = old[prefix..]
        .iter()
        .rev()
        .zip(new[prefix..].iter().rev())
        .take_while(|(a, b)| a == b)
        .count();

    let old_mid = &old[prefix..old.len() - suffix];
    let new_mid = &new[prefix..new.len() - suffix];
    if old_mid.is_empty() && new_mid.is_empty() {
        return Vec::new();
    }

    let ops = if old_mid.len().saturating_mul(new_mid.len()) > MAX_LCS_CELLS {
        let mut ops = vec![Op::Delete; old_mid.len()];
        ops.extend(std::iter::repeat(Op::Insert).take(new_mid.len()));
        ops
    } else {
        lcs_ops(old_mid, new_mid)
    };

    let mut out = Vec::new();
    let (mut i, mut j) = (prefix, prefix);
    let mut current: Option<Hunk> = None;
    for op in ops {
        match op {
            Op::Equal => {
                out.extend(current.take());
                i += 1;
                j += 1;
            }
            Op::Delete => {
                current
                    .get_or_insert(Hunk {
                        old_start: i,
                        old_len: 0,
                        new_start: j,
                        new_len: 0,
                    })
                    .old_len += 1;
                i += 1;
            }
            Op::Insert => {
                current
                    .get_or_insert(Hunk {
                        old_start: i,
                        old_len: 0,
                        new_start: j,
                        new_len: 0,
                    })
                    .new_len += 1;
                j += 1;
            }
        }
    }
    out.extend(current);
    out
}

/// Edit script from a longest-common-subsequence table. Deletions come
/// before insertions within a replaced run.
fn lcs_ops(old: &[&str], new: &[&str]) -> Vec<Op> {
    let (n, m) = (old.len(), new.len());
    let width = m + 1;
    let mut table = vec![0u32; (n + 1) * width];
    for i in (0..n).rev() {
        for j in (0..m).rev() {
            table[i * width + j] = if old[i] == new[j] {
                table[(i + 1) * width + j + 1] + 1
            } else {
                table[(i + 1) * width + j].max(table[i * width + j + 1])
            };
        }
    }

    let mut ops = Vec::with_capacity(n + m);
    let (mut i, mut j) = (0, 0);
    while i < n && j < m {
        if old[i] == new[j] {
            ops.push(Op::Equal);
            i += 1;
            j += 1;
        } else if table[(i + 1) * width + j] >= table[i * width + j + 1] {
            ops.push(Op::Delete);
            i += 1;
        } else {
            ops.push(Op::Insert);
            j += 1;
        }
    }
    ops.extend(std::iter::repeat(Op::Delete).take(n - i));
    ops.extend(std::iter::repeat(Op::Insert).take(m - j));
    ops
}

/// `@@ -a,b +c,d @@` headers (1-based; the start is the preceding line
/// when a side is empty) followed by `- ` and `+ ` lines.
fn render(hunks: &[Hunk], old: &[&str], new: &[&str]) -> String {
    let mut lines: Vec<String> = Vec::new();
    for h in hunks {
        if lines.len() >= MAX_DIFF_LINES {
            break;
        }
        lines.push(format!(
            "@@ -{},{} +{},{} @@",
            header_start(h.old_start, h.old_len),
            h.old_len,
            header_start(h.new_start, h.new_len),
            h.new_len
        ));
        for line in &old[h.old_start..h.old_start + h.old_len] {
            lines.push(format!("- {}", cap_line(line)));
        }
        for line in &new[h.new_start..h.new_start + h.new_len] {
            lines.push(format!("+ {}", cap_line(line)));
        }
    }
    lines.truncate(MAX_DIFF_LINES);
    lines.join("\n")
}

fn header_start(start: usize, len: usize) -> usize {
    if len == 0 {
        start
    } else {
        start + 1
    }
}

fn cap_line(line: &str) -> String {
    if line.chars().count() <= MAX_LINE_CHARS {
        line.to_string()
    } else {
        line.chars().take(MAX_LINE_CHARS).collect()
    }
}
