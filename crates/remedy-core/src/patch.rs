//! Patch engine
//!
//! Applies a batch of byte-offset edits to one content snapshot. Edits are
//! walked from the highest start offset to the lowest so an applied edit never
//! shifts the offsets of the ones still waiting. An edit that overlaps one
//! already applied is dropped and reported, never merged.

use crate::model::{Edit, SkippedEdit};
use std::cmp::Ordering;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PatchError {
    #[error("edit range {start}..{end} is invalid for content of {len} bytes")]
    InvalidRange { start: usize, end: usize, len: usize },
    #[error("edit offset {offset} does not fall on a character boundary")]
    NotCharBoundary { offset: usize },
}

/// Outcome of applying an edit set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Patched {
    pub content: String,
    pub applied: usize,
    pub skipped: Vec<SkippedEdit>,
}

impl Patched {
    pub fn changed_from(&self, original: &str) -> bool {
        self.content != original
    }
}

/// Apply `edits` to `content`.
///
/// Every edit is bounds-checked against the snapshot before anything is
/// applied, so an invalid edit leaves no partial result behind.
pub fn apply(content: &str, edits: &[Edit]) -> Result<Patched, PatchError> {
    for edit in edits {
        check_bounds(content, edit)?;
    }

    let mut order: Vec<usize> = (0..edits.len()).collect();
    order.sort_by(|&a, &b| descending(edits, a, b));

    let mut out = content.to_string();
    let mut last_applied: Option<&Edit> = None;
    let mut applied = 0;
    let mut skipped = Vec::new();

    for idx in order {
        let edit = &edits[idx];
        if let Some(prev) = last_applied {
            if edit.overlaps(prev) {
                tracing::debug!(edit = %edit, conflicts_with = %prev, "dropping overlapping edit");
                skipped.push(SkippedEdit {
                    edit: edit.clone(),
                    conflicts_with: prev.clone(),
                });
                continue;
            }
        }
        out.replace_range(edit.start..edit.end, &edit.replacement);
        last_applied = Some(edit);
        applied += 1;
    }

    // Report skipped edits in the order they were proposed.
    skipped.sort_by_key(|s| (s.edit.start, s.edit.end));

    Ok(Patched {
        content: out,
        applied,
        skipped,
    })
}

fn check_bounds(content: &str, edit: &Edit) -> Result<(), PatchError> {
    if edit.start > edit.end || edit.end > content.len() {
        return Err(PatchError::InvalidRange {
            start: edit.start,
            end: edit.end,
            len: content.len(),
        });
    }
    for offset in [edit.start, edit.end] {
        if !content.is_char_boundary(offset) {
            return Err(PatchError::NotCharBoundary { offset });
        }
    }
    Ok(())
}

/// Walk order: start descending, wider range first on a shared start.
///
/// Identical replacements keep proposal order, so the first proposal wins the
/// conflict. Identical insertions run last-proposed first, which leaves their
/// text in proposal order once all of them land at the same offset.
fn descending(edits: &[Edit], a: usize, b: usize) -> Ordering {
    let (ea, eb) = (&edits[a], &edits[b]);
    eb.start
        .cmp(&ea.start)
        .then(eb.end.cmp(&ea.end))
        .then_with(|| {
            if ea.is_insertion() {
                b.cmp(&a)
            } else {
                a.cmp(&b)
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Splice non-overlapping edits into the original by walking it forwards.
    fn splice_forward(original: &str, edits: &[Edit]) -> String {
        let mut sorted: Vec<&Edit> = edits.iter().collect();
        sorted.sort_by_key(|e| (e.start, e.end));
        let mut out = String::new();
        let mut cursor = 0;
        for e in sorted {
            out.push_str(&original[cursor..e.start]);
            out.push_str(&e.replacement);
            cursor = e.end;
        }
        out.push_str(&original[cursor..]);
        out
    }

    #[test]
    fn test_offsets_refer_to_original_snapshot() {
        let original = "Write-Host 'a'; Write-Host 'b'";
        let edits = vec![
            Edit::replace(0..10, "Write-Output"),
            Edit::replace(16..26, "Write-Output"),
        ];
        let patched = apply(original, &edits).unwrap();
        assert_eq!(patched.content, "Write-Output 'a'; Write-Output 'b'");
        assert_eq!(patched.content, splice_forward(original, &edits));
        assert_eq!(patched.applied, 2);
        assert!(patched.skipped.is_empty());
    }

    #[test]
    fn test_mixed_insert_delete_replace_matches_forward_splice() {
        let original = "function Get-Thing {\n  gci ;\n}\n";
        let edits = vec![
            Edit::insert(0, "# header\n"),
            Edit::replace(23..26, "Get-ChildItem"),
            Edit::delete(26..28),
            Edit::insert(original.len(), "\n"),
        ];
        let patched = apply(original, &edits).unwrap();
        assert_eq!(patched.content, splice_forward(original, &edits));
        assert_eq!(
            patched.content,
            "# header\nfunction Get-Thing {\n  Get-ChildItem\n}\n\n"
        );
    }

    #[test]
    fn test_identical_ranges_apply_exactly_one() {
        let original = "Write-Host 'hi'";
        let first = Edit::replace(0..10, "Write-Output");
        let second = Edit::replace(0..10, "Write-Verbose");
        let patched = apply(original, &[first.clone(), second.clone()]).unwrap();

        assert_eq!(patched.content, "Write-Output 'hi'");
        assert_eq!(patched.applied, 1);
        assert_eq!(patched.skipped.len(), 1);
        assert_eq!(patched.skipped[0].edit, second);
        assert_eq!(patched.skipped[0].conflicts_with, first);
    }

    #[test]
    fn test_partial_overlap_drops_lower_edit() {
        let original = "abcdefghij";
        let upper = Edit::replace(4..8, "XX");
        let lower = Edit::replace(2..6, "YY");
        let patched = apply(original, &[lower.clone(), upper]).unwrap();

        assert_eq!(patched.content, "abcdXXij");
        assert_eq!(patched.skipped.len(), 1);
        assert_eq!(patched.skipped[0].edit, lower);
    }

    #[test]
    fn test_insertions_at_same_offset_keep_proposal_order() {
        let patched = apply("ab", &[Edit::insert(1, "1"), Edit::insert(1, "2")]).unwrap();
        assert_eq!(patched.content, "a12b");
        assert!(patched.skipped.is_empty());
    }

    #[test]
    fn test_insertion_inside_replacement_conflicts() {
        let patched = apply("abcdef", &[Edit::replace(1..5, "Z"), Edit::insert(3, "!")]).unwrap();
        assert_eq!(patched.content, "abc!def");
        assert_eq!(patched.skipped.len(), 1);
    }

    #[test]
    fn test_invalid_ranges_are_errors() {
        assert_eq!(
            apply("abc", &[Edit::replace(2..9, "x")]),
            Err(PatchError::InvalidRange {
                start: 2,
                end: 9,
                len: 3
            })
        );
        assert!(matches!(
            apply("abc", &[Edit::replace(2..1, "x")]),
            Err(PatchError::InvalidRange { .. })
        ));
        assert_eq!(
            apply("é", &[Edit::insert(1, "x")]),
            Err(PatchError::NotCharBoundary { offset: 1 })
        );
    }

    #[test]
    fn test_empty_edit_set_is_identity() {
        let patched = apply("unchanged", &[]).unwrap();
        assert_eq!(patched.content, "unchanged");
        assert!(!patched.changed_from("unchanged"));
    }
}
