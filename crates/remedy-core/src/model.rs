//! Domain records shared by every stage of the fix pipeline.

use crate::score::ConfidenceScore;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Range;

/// Severity reported by the violation detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Severity {
    Error,
    Warning,
    Information,
}

impl Severity {
    /// Parse the severity names emitted by common analyzers.
    ///
    /// `ParseError` is folded into `Error`; anything unrecognized is treated as
    /// `Information` so a noisy detector never escalates a finding.
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "error" | "parseerror" | "fatal" => Severity::Error,
            "warning" | "warn" => Severity::Warning,
            _ => Severity::Information,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Error => "error",
            Severity::Warning => "warning",
            Severity::Information => "information",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a violation was found. Lines and columns are 1-based.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Location {
    pub line: usize,
    pub column: usize,
    /// Byte range into the content the detector saw, when it reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub span: Option<Range<usize>>,
}

impl Location {
    pub fn at(line: usize, column: usize) -> Self {
        Self {
            line,
            column,
            span: None,
        }
    }

    pub fn with_span(mut self, span: Range<usize>) -> Self {
        self.span = Some(span);
        self
    }
}

/// A finding produced by the external detector. Read-only to the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    pub rule_id: String,
    pub severity: Severity,
    pub location: Location,
    pub message: String,
}

impl Violation {
    pub fn new(rule_id: impl Into<String>, severity: Severity, location: Location) -> Self {
        Self {
            rule_id: rule_id.into(),
            severity,
            location,
            message: String::new(),
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }
}

/// A single proposed text change against the *current* content.
///
/// Offsets are byte offsets, `end` is exclusive. An empty replacement is a
/// deletion; `start == end` is a pure insertion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edit {
    pub start: usize,
    pub end: usize,
    pub replacement: String,
}

impl Edit {
    pub fn replace(range: Range<usize>, replacement: impl Into<String>) -> Self {
        Self {
            start: range.start,
            end: range.end,
            replacement: replacement.into(),
        }
    }

    pub fn insert(at: usize, text: impl Into<String>) -> Self {
        Self {
            start: at,
            end: at,
            replacement: text.into(),
        }
    }

    pub fn delete(range: Range<usize>) -> Self {
        Self::replace(range, String::new())
    }

    pub fn range(&self) -> Range<usize> {
        self.start..self.end
    }

    pub fn is_insertion(&self) -> bool {
        self.start == self.end
    }

    /// True when `self` and `other` cannot both be applied to one snapshot.
    ///
    /// Touching ranges do not overlap, and insertions only collide with a
    /// replacement that strictly contains their offset.
    pub fn overlaps(&self, other: &Edit) -> bool {
        if self.start == other.start && self.end == other.end {
            return !self.is_insertion();
        }
        self.start < other.end && other.start < self.end
    }
}

impl fmt::Display for Edit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}..{}) -> {:?}", self.start, self.end, self.replacement)
    }
}

/// An edit the Patch Engine refused to apply because it overlapped an edit
/// that had already been applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedEdit {
    pub edit: Edit,
    pub conflicts_with: Edit,
}

impl SkippedEdit {
    pub fn note(&self) -> String {
        format!(
            "skipped edit {} (overlaps applied edit {})",
            self.edit, self.conflicts_with
        )
    }
}

/// Result of one fix function invocation inside a chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixOutcome {
    pub rule_id: String,
    /// Line of the violation that triggered the fix.
    pub line: usize,
    /// The fix changed the content and that change is part of the result.
    pub applied: bool,
    /// The fix changed the content, but the validation gate discarded the
    /// file's candidate, so the change did not survive.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub rejected: bool,
    pub description: String,
    pub content_before: String,
    pub content_after: String,
    pub unified_diff: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skipped_edits: Vec<SkippedEdit>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<ConfidenceScore>,
}

impl FixOutcome {
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Record that the change was discarded with the rest of the candidate.
    pub fn mark_rejected(&mut self) {
        if self.applied {
            self.applied = false;
            self.rejected = true;
        }
    }
}

/// Why a violation did not reach a fix function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnhandledReason {
    /// No fix function is registered for the rule id.
    UnknownRule,
    /// A fix exists but the rule is not in the enabled set.
    Disabled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Unhandled {
    pub rule_id: String,
    pub line: usize,
    pub reason: UnhandledReason,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_labels() {
        assert_eq!(Severity::from_label("Warning"), Severity::Warning);
        assert_eq!(Severity::from_label("ParseError"), Severity::Error);
        assert_eq!(Severity::from_label("Information"), Severity::Information);
        assert_eq!(Severity::from_label("whatever"), Severity::Information);
    }

    #[test]
    fn test_edit_overlap_rules() {
        let a = Edit::replace(0..5, "x");
        let b = Edit::replace(5..8, "y");
        assert!(!a.overlaps(&b), "touching ranges are independent");

        let c = Edit::replace(3..6, "z");
        assert!(a.overlaps(&c));

        let ins = Edit::insert(5, "!");
        assert!(!a.overlaps(&ins));
        assert!(!ins.overlaps(&Edit::insert(5, "?")));

        let inner = Edit::insert(2, "!");
        assert!(a.overlaps(&inner));
        assert!(a.overlaps(&Edit::replace(0..5, "other")));
    }
}
