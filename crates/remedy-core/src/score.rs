//! Confidence scoring for accepted fixes
//!
//! The score is advisory. It never gates acceptance; only the syntax check in
//! [`crate::validate`] does that.

use crate::diff::UnifiedDiff;
use crate::parser::ParseReport;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

pub const SYNTAX_WEIGHT: f64 = 0.5;
pub const STRUCTURE_WEIGHT: f64 = 0.2;
pub const CHANGE_SIZE_WEIGHT: f64 = 0.2;
pub const DANGER_WEIGHT: f64 = 0.1;

/// Files shorter than this are measured as if they had this many lines, so a
/// one-line fix in a tiny script does not count as a rewrite.
pub const SMALL_FILE_BASELINE_LINES: usize = 10;

/// Constructs a fix must never introduce silently.
const DANGEROUS_PATTERNS: &[(&str, &str)] = &[
    ("invoke-expression", r"(?i)\b(invoke-expression|iex)\b"),
    (
        "execution-policy-bypass",
        r"(?i)\bset-executionpolicy\b[^\n]*\b(bypass|unrestricted)\b",
    ),
    ("download-string", r"(?i)\.downloadstring\s*\("),
    (
        "plaintext-securestring",
        r"(?i)\bconvertto-securestring\b[^\n]*-asplaintext",
    ),
    (
        "recursive-force-delete",
        r"(?i)\b(remove-item|rm|del|rmdir)\b[^\n]*-recurse\b[^\n]*-force\b|\b(remove-item|rm|del|rmdir)\b[^\n]*-force\b[^\n]*-recurse\b",
    ),
    (
        "elevated-start-process",
        r"(?i)\bstart-process\b[^\n]*-verb\s+runas\b",
    ),
];

fn dangerous_patterns() -> &'static [(&'static str, Regex)] {
    static COMPILED: OnceLock<Vec<(&'static str, Regex)>> = OnceLock::new();
    COMPILED.get_or_init(|| {
        DANGEROUS_PATTERNS
            .iter()
            .filter_map(|(name, pattern)| Regex::new(pattern).ok().map(|re| (*name, re)))
            .collect()
    })
}

/// Component values, each in [0, 1], before weighting.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreComponents {
    pub syntax_valid: f64,
    pub structure_preserved: f64,
    pub change_size: f64,
    pub no_dangerous_pattern: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceScore {
    pub value: f64,
    pub components: ScoreComponents,
    /// Names of dangerous constructs present after the fix but not before.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub introduced_patterns: Vec<String>,
}

impl ConfidenceScore {
    pub fn from_components(components: ScoreComponents, introduced_patterns: Vec<String>) -> Self {
        let raw = SYNTAX_WEIGHT * components.syntax_valid
            + STRUCTURE_WEIGHT * components.structure_preserved
            + CHANGE_SIZE_WEIGHT * components.change_size
            + DANGER_WEIGHT * components.no_dangerous_pattern;
        Self {
            value: round4(raw.clamp(0.0, 1.0)),
            components,
            introduced_patterns,
        }
    }

    pub fn label(&self) -> &'static str {
        if self.value >= 0.9 {
            "high"
        } else if self.value >= 0.7 {
            "medium"
        } else {
            "low"
        }
    }
}

/// Rate the change from `original` to `candidate`.
pub fn score(
    before: &ParseReport,
    after: &ParseReport,
    original: &str,
    candidate: &str,
    diff: &UnifiedDiff,
) -> ConfidenceScore {
    let introduced = introduced_dangerous_patterns(original, candidate);
    let components = ScoreComponents {
        syntax_valid: if after.error_count <= before.error_count {
            1.0
        } else {
            0.0
        },
        structure_preserved: structural_similarity(
            before.top_level_declaration_count,
            after.top_level_declaration_count,
        ),
        change_size: change_size_tier(diff.changed_lines(), original.lines().count()),
        no_dangerous_pattern: if introduced.is_empty() { 1.0 } else { 0.0 },
    };
    ConfidenceScore::from_components(components, introduced)
}

pub fn structural_similarity(before: usize, after: usize) -> f64 {
    match before.abs_diff(after) {
        0 => 1.0,
        1 => 0.5,
        _ => 0.0,
    }
}

/// Step function over the share of lines touched.
pub fn change_size_tier(changed_lines: usize, total_lines: usize) -> f64 {
    let denominator = total_lines.max(SMALL_FILE_BASELINE_LINES) as f64;
    let ratio = changed_lines as f64 / denominator;
    if ratio <= 0.10 {
        1.0
    } else if ratio <= 0.25 {
        0.75
    } else if ratio <= 0.50 {
        0.5
    } else if ratio <= 0.80 {
        0.25
    } else {
        0.0
    }
}

/// Dangerous constructs that occur more often in `candidate` than in `original`.
pub fn introduced_dangerous_patterns(original: &str, candidate: &str) -> Vec<String> {
    dangerous_patterns()
        .iter()
        .filter(|(_, re)| re.find_iter(candidate).count() > re.find_iter(original).count())
        .map(|(name, _)| name.to_string())
        .collect()
}

fn round4(v: f64) -> f64 {
    (v * 10_000.0).round() / 10_000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::unified_diff;

    fn report(errors: usize, decls: usize) -> ParseReport {
        ParseReport {
            success: errors == 0,
            error_count: errors,
            top_level_declaration_count: decls,
            ..Default::default()
        }
    }

    #[test]
    fn test_single_line_fix_in_small_file_scores_full() {
        let before = "Write-Host \"hi\"";
        let after = "Write-Output \"hi\"";
        let diff = unified_diff("a.ps1", before, after);
        let s = score(&report(0, 0), &report(0, 0), before, after, &diff);
        assert_eq!(s.value, 1.0);
        assert!(s.introduced_patterns.is_empty());
        assert_eq!(s.label(), "high");
    }

    #[test]
    fn test_structure_term() {
        assert_eq!(structural_similarity(3, 3), 1.0);
        assert_eq!(structural_similarity(3, 2), 0.5);
        assert_eq!(structural_similarity(3, 5), 0.0);
    }

    #[test]
    fn test_change_size_tiers() {
        assert_eq!(change_size_tier(1, 1), 1.0);
        assert_eq!(change_size_tier(10, 100), 1.0);
        assert_eq!(change_size_tier(20, 100), 0.75);
        assert_eq!(change_size_tier(50, 100), 0.5);
        assert_eq!(change_size_tier(80, 100), 0.25);
        assert_eq!(change_size_tier(81, 100), 0.0);
    }

    #[test]
    fn test_introduced_danger_lowers_score() {
        let before = "Write-Output $cmd\n";
        let after = "Invoke-Expression $cmd\n";
        let diff = unified_diff("a.ps1", before, after);
        let s = score(&report(0, 0), &report(0, 0), before, after, &diff);
        assert_eq!(s.introduced_patterns, vec!["invoke-expression".to_string()]);
        assert_eq!(s.components.no_dangerous_pattern, 0.0);
        assert_eq!(s.value, 0.9);
    }

    #[test]
    fn test_preexisting_danger_is_not_counted() {
        let before = "iex $a\nWrite-Host 'x'\n";
        let after = "iex $a\nWrite-Output 'x'\n";
        assert!(introduced_dangerous_patterns(before, after).is_empty());
    }

    #[test]
    fn test_weights_sum_to_one() {
        let total = SYNTAX_WEIGHT + STRUCTURE_WEIGHT + CHANGE_SIZE_WEIGHT + DANGER_WEIGHT;
        assert!((total - 1.0).abs() < 1e-9);
    }
}
