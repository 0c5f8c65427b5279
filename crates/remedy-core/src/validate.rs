//! Validation gate
//!
//! Re-parses a candidate and refuses it when the edit introduced parse errors
//! that the original did not have. A rejected candidate must be discarded by
//! the caller; the original content is what survives.

use crate::diff::unified_diff;
use crate::parser::{ParseReport, ParserError, SourceParser};
use crate::score::{self, ConfidenceScore};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub accepted: bool,
    /// Only computed for accepted candidates.
    pub score: Option<ConfidenceScore>,
    pub reason: String,
    pub before: ParseReport,
    pub after: ParseReport,
}

/// Parse both sides and decide whether `candidate` may replace `original`.
///
/// Parser failures are returned as errors rather than rejections so the
/// caller can tell "broken edit" apart from "no parser".
pub fn validate_and_score(
    parser: &dyn SourceParser,
    original: &str,
    candidate: &str,
) -> Result<ValidationResult, ParserError> {
    let before = parser.parse(original)?;
    validate_against(parser, &before, original, candidate)
}

/// Like [`validate_and_score`] with the original already parsed.
pub fn validate_against(
    parser: &dyn SourceParser,
    before: &ParseReport,
    original: &str,
    candidate: &str,
) -> Result<ValidationResult, ParserError> {
    let after = parser.parse(candidate)?;

    let introduced = after.new_problems_since(before);
    if !introduced.is_empty() {
        let mut reason = format!(
            "candidate introduces {} new parse error{}",
            introduced.len(),
            if introduced.len() == 1 { "" } else { "s" }
        );
        let detail = after
            .diagnostics
            .iter()
            .find(|d| introduced.iter().any(|kind| d.ends_with(kind.as_str())))
            .or_else(|| after.diagnostics.first());
        if let Some(detail) = detail {
            reason.push_str(&format!(" ({})", detail));
        }
        tracing::debug!(parser = parser.name(), %reason, "validation rejected candidate");
        return Ok(ValidationResult {
            accepted: false,
            score: None,
            reason,
            before: before.clone(),
            after,
        });
    }

    let diff = unified_diff("candidate", original, candidate);
    let score = score::score(before, &after, original, candidate, &diff);
    Ok(ValidationResult {
        accepted: true,
        score: Some(score),
        reason: "syntax preserved".to_string(),
        before: before.clone(),
        after,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::ScriptParser;

    #[test]
    fn test_accepts_valid_candidate_with_score() {
        let result =
            validate_and_score(&ScriptParser, "Write-Host \"hi\"", "Write-Output \"hi\"").unwrap();
        assert!(result.accepted);
        assert!(result.score.unwrap().value >= 0.9);
        assert_eq!(result.after.error_count, 0);
    }

    #[test]
    fn test_rejects_unbalanced_braces() {
        let original = "if ($a) { Write-Output 'a' }";
        let candidate = "if ($a) { Write-Output 'a' ";
        let result = validate_and_score(&ScriptParser, original, candidate).unwrap();
        assert!(!result.accepted);
        assert!(result.score.is_none());
        assert!(result.reason.contains("1 new parse error"));
        assert!(result.reason.contains("unclosed '{'"));
    }

    #[test]
    fn test_preexisting_errors_do_not_block() {
        let original = "function A {\nWrite-Host 'x'\n";
        let candidate = "function A {\nWrite-Output 'x'\n";
        let result = validate_and_score(&ScriptParser, original, candidate).unwrap();
        assert!(result.accepted);
        assert_eq!(result.before.error_count, 1);
        assert_eq!(result.after.error_count, 1);
    }

    #[test]
    fn test_swapped_error_is_still_rejected() {
        let original = "Write-Output 'a' }\n";
        let candidate = "Write-Output 'a\n";
        let result = validate_and_score(&ScriptParser, original, candidate).unwrap();
        assert_eq!(result.before.error_count, 1);
        assert_eq!(result.after.error_count, 1);
        assert!(!result.accepted);
        assert!(result.reason.contains("unterminated"), "{}", result.reason);
    }

    #[test]
    fn test_preexisting_error_may_move_lines() {
        let original = "Write-Host 'x'\n\nif ($a) {\n";
        let candidate = "Write-Output 'x'\nif ($a) {\n";
        let result = validate_and_score(&ScriptParser, original, candidate).unwrap();
        assert!(result.accepted, "{}", result.reason);
    }
}
