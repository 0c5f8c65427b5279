//! Unified diff generation
//!
//! Builds line-level unified diffs between two versions of a file. The diff
//! is report metadata and also feeds the change-size term of the scorer.

use std::fmt;

const CONTEXT_LINES: usize = 3;

/// Above this many cells the LCS table is skipped and the differing middle
/// is reported as one replaced block.
const MAX_LCS_CELLS: usize = 4_000_000;

/// A single line in a diff hunk
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiffLine {
    Context(String),
    Add(String),
    Remove(String),
}

/// A hunk in a unified diff
#[derive(Debug, Clone, PartialEq)]
pub struct DiffHunk {
    pub old_start: usize,
    pub old_count: usize,
    pub new_start: usize,
    pub new_count: usize,
    pub lines: Vec<DiffLine>,
}

impl DiffHunk {
    /// Get a summary of changes in this hunk
    pub fn summary(&self) -> (usize, usize) {
        let adds = self
            .lines
            .iter()
            .filter(|l| matches!(l, DiffLine::Add(_)))
            .count();
        let removes = self
            .lines
            .iter()
            .filter(|l| matches!(l, DiffLine::Remove(_)))
            .count();
        (adds, removes)
    }
}

/// A unified diff between two texts
#[derive(Debug, Clone, PartialEq)]
pub struct UnifiedDiff {
    pub old_path: String,
    pub new_path: String,
    pub hunks: Vec<DiffHunk>,
}

impl UnifiedDiff {
    /// Get total additions and deletions
    pub fn stats(&self) -> (usize, usize) {
        self.hunks.iter().fold((0, 0), |acc, h| {
            let (a, r) = h.summary();
            (acc.0 + a, acc.1 + r)
        })
    }

    /// Number of lines touched, counting a replaced line once.
    pub fn changed_lines(&self) -> usize {
        let (adds, removes) = self.stats();
        adds.max(removes)
    }

    pub fn is_empty(&self) -> bool {
        self.hunks.is_empty()
    }
}

impl fmt::Display for UnifiedDiff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.hunks.is_empty() {
            return Ok(());
        }
        writeln!(f, "--- a/{}", self.old_path)?;
        writeln!(f, "+++ b/{}", self.new_path)?;
        for hunk in &self.hunks {
            writeln!(
                f,
                "@@ -{} +{} @@",
                format_range(hunk.old_start, hunk.old_count),
                format_range(hunk.new_start, hunk.new_count)
            )?;
            for line in &hunk.lines {
                match line {
                    DiffLine::Context(s) => writeln!(f, " {}", s)?,
                    DiffLine::Add(s) => writeln!(f, "+{}", s)?,
                    DiffLine::Remove(s) => writeln!(f, "-{}", s)?,
                }
            }
        }
        Ok(())
    }
}

fn format_range(start: usize, count: usize) -> String {
    if count == 1 {
        start.to_string()
    } else {
        format!("{},{}", start, count)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Keep,
    Add,
    Remove,
}

/// Diff `before` against `after`, labelling both sides with `path`.
pub fn unified_diff(path: &str, before: &str, after: &str) -> UnifiedDiff {
    let old: Vec<&str> = before.lines().collect();
    let new: Vec<&str> = after.lines().collect();
    let mut ops = line_ops(&old, &new);

    // `lines()` hides a change that only touches the final newline.
    if ops.iter().all(|op| *op == Op::Keep) && before != after {
        if let Some(last) = ops.last_mut() {
            *last = Op::Remove;
            ops.push(Op::Add);
        }
    }

    UnifiedDiff {
        old_path: path.to_string(),
        new_path: path.to_string(),
        hunks: build_hunks(&ops, &old, &new),
    }
}

fn line_ops(old: &[&str], new: &[&str]) -> Vec<Op> {
    let prefix = old
        .iter()
        .zip(new.iter())
        .take_while(|(a, b)| a == b)
        .count();
    let suffix = old[prefix..]
        .iter()
        .rev()
        .zip(new[prefix..].iter().rev())
        .take_while(|(a, b)| a == b)
        .count();

    let old_mid = &old[prefix..old.len() - suffix];
    let new_mid = &new[prefix..new.len() - suffix];

    let mut ops = vec![Op::Keep; prefix];
    if old_mid.len().saturating_mul(new_mid.len()) > MAX_LCS_CELLS {
        ops.extend(std::iter::repeat(Op::Remove).take(old_mid.len()));
        ops.extend(std::iter::repeat(Op::Add).take(new_mid.len()));
    } else {
        ops.extend(lcs_ops(old_mid, new_mid));
    }
    ops.extend(std::iter::repeat(Op::Keep).take(suffix));
    ops
}

fn lcs_ops(old: &[&str], new: &[&str]) -> Vec<Op> {
    let (n, m) = (old.len(), new.len());
    // table[i][j] = LCS length of old[i..] and new[j..]
    let mut table = vec![vec![0u32; m + 1]; n + 1];
    for i in (0..n).rev() {
        for j in (0..m).rev() {
            table[i][j] = if old[i] == new[j] {
                table[i + 1][j + 1] + 1
            } else {
                table[i + 1][j].max(table[i][j + 1])
            };
        }
    }

    let mut ops = Vec::with_capacity(n + m);
    let (mut i, mut j) = (0, 0);
    while i < n && j < m {
        if old[i] == new[j] {
            ops.push(Op::Keep);
            i += 1;
            j += 1;
        } else if table[i + 1][j] >= table[i][j + 1] {
            ops.push(Op::Remove);
            i += 1;
        } else {
            ops.push(Op::Add);
            j += 1;
        }
    }
    ops.extend(std::iter::repeat(Op::Remove).take(n - i));
    ops.extend(std::iter::repeat(Op::Add).take(m - j));
    ops
}

fn build_hunks(ops: &[Op], old: &[&str], new: &[&str]) -> Vec<DiffHunk> {
    // Line positions (old, new) before each op.
    let mut positions = Vec::with_capacity(ops.len() + 1);
    let (mut oi, mut ni) = (0usize, 0usize);
    for op in ops {
        positions.push((oi, ni));
        match op {
            Op::Keep => {
                oi += 1;
                ni += 1;
            }
            Op::Remove => oi += 1,
            Op::Add => ni += 1,
        }
    }
    positions.push((oi, ni));

    let changed: Vec<usize> = ops
        .iter()
        .enumerate()
        .filter(|(_, op)| **op != Op::Keep)
        .map(|(i, _)| i)
        .collect();

    // Group changed ops whose context windows touch.
    let mut groups: Vec<(usize, usize)> = Vec::new();
    for idx in changed {
        let lo = idx.saturating_sub(CONTEXT_LINES);
        let hi = (idx + CONTEXT_LINES + 1).min(ops.len());
        match groups.last_mut() {
            Some(last) if lo <= last.1 => last.1 = hi,
            _ => groups.push((lo, hi)),
        }
    }

    groups
        .into_iter()
        .map(|(lo, hi)| {
            let (old_at, new_at) = positions[lo];
            let mut lines = Vec::with_capacity(hi - lo);
            let (mut old_count, mut new_count) = (0, 0);
            for (k, op) in ops[lo..hi].iter().enumerate() {
                let (o, n) = positions[lo + k];
                match op {
                    Op::Keep => {
                        lines.push(DiffLine::Context(old[o].to_string()));
                        old_count += 1;
                        new_count += 1;
                    }
                    Op::Remove => {
                        lines.push(DiffLine::Remove(old[o].to_string()));
                        old_count += 1;
                    }
                    Op::Add => {
                        lines.push(DiffLine::Add(new[n].to_string()));
                        new_count += 1;
                    }
                }
            }
            DiffHunk {
                old_start: hunk_start(old_at, old_count),
                old_count,
                new_start: hunk_start(new_at, new_count),
                new_count,
                lines,
            }
        })
        .collect()
}

/// Unified diff convention: an empty side reports the line before it.
fn hunk_start(at: usize, count: usize) -> usize {
    if count == 0 {
        at
    } else {
        at + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_line_replacement() {
        let diff = unified_diff("hello.ps1", "Write-Host \"hi\"", "Write-Output \"hi\"");
        assert_eq!(diff.stats(), (1, 1));
        assert_eq!(diff.changed_lines(), 1);
        assert_eq!(
            diff.to_string(),
            "--- a/hello.ps1\n+++ b/hello.ps1\n@@ -1 +1 @@\n-Write-Host \"hi\"\n+Write-Output \"hi\"\n"
        );
    }

    #[test]
    fn test_identical_content_has_no_hunks() {
        let diff = unified_diff("a.ps1", "a\nb\n", "a\nb\n");
        assert!(diff.is_empty());
        assert_eq!(diff.to_string(), "");
    }

    #[test]
    fn test_context_window_and_counts() {
        let before = "1\n2\n3\n4\n5\n6\n7\n8\n9\n10\n";
        let after = "1\n2\n3\n4\n5\nsix\n7\n8\n9\n10\n";
        let diff = unified_diff("n.ps1", before, after);
        assert_eq!(diff.hunks.len(), 1);
        let hunk = &diff.hunks[0];
        assert_eq!((hunk.old_start, hunk.old_count), (3, 7));
        assert_eq!((hunk.new_start, hunk.new_count), (3, 7));
        assert_eq!(hunk.summary(), (1, 1));
    }

    #[test]
    fn test_distant_changes_split_into_hunks() {
        let before: String = (1..=20).map(|i| format!("line{}\n", i)).collect();
        let after = before.replace("line2\n", "LINE2\n").replace("line19\n", "LINE19\n");
        let diff = unified_diff("f.ps1", &before, &after);
        assert_eq!(diff.hunks.len(), 2);
        assert_eq!(diff.stats(), (2, 2));
    }

    #[test]
    fn test_pure_insertion_hunk_header() {
        let diff = unified_diff("f.ps1", "", "new line\n");
        assert_eq!(diff.hunks.len(), 1);
        assert_eq!(diff.hunks[0].old_start, 0);
        assert_eq!(diff.hunks[0].old_count, 0);
        assert_eq!(diff.hunks[0].new_start, 1);
        assert_eq!(diff.stats(), (1, 0));
    }

    #[test]
    fn test_trailing_newline_change_is_visible() {
        let diff = unified_diff("f.ps1", "a\nb", "a\nb\n");
        assert!(!diff.is_empty());
    }
}
