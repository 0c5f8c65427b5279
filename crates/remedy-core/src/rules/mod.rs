//! Built-in PowerShell fix rules
//!
//! Each rule is one [`ScriptRule`] that finds offending code and says what to
//! replace it with. The same findings drive both halves of the rule: the
//! detector reports them as violations and the fixer turns them into edits.
//! Fixers rescan the current content on every call, fix everything they find
//! and return `None` once nothing is left, which keeps chains idempotent.

mod aliases;
mod null_comparison;
mod quotes;
mod whitespace;
mod write_host;

pub use aliases::{canonical_command, AliasRule};
pub use null_comparison::NullComparisonRule;
pub use quotes::ConstantStringQuotesRule;
pub use whitespace::{SemicolonRule, TrailingWhitespaceRule};
pub use write_host::WriteHostRule;

use crate::model::{Edit, Location, Severity, Violation};
use crate::parser::script::Lexed;
use crate::registry::{
    Check, FixContext, FixError, Fixer, ProposedFix, RegistryError, RuleRegistry, RuleSpec,
};
use std::ops::Range;
use std::sync::Arc;

pub const AVOID_ALIASES: &str = "PSAvoidUsingCmdletAliases";
pub const AVOID_WRITE_HOST: &str = "PSAvoidUsingWriteHost";
pub const NULL_COMPARISON: &str = "PSPossibleIncorrectComparisonWithNull";
pub const AVOID_SEMICOLONS: &str = "PSAvoidSemicolonsAsLineTerminators";
pub const TRAILING_WHITESPACE: &str = "PSAvoidTrailingWhitespace";
pub const CONSTANT_STRING_QUOTES: &str = "PSAvoidUsingDoubleQuotesForConstantString";

/// One piece of offending code and its replacement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finding {
    pub range: Range<usize>,
    pub replacement: String,
    pub message: String,
}

/// A rule over PowerShell source.
pub trait ScriptRule: Send + Sync + 'static {
    fn id(&self) -> &'static str;

    fn severity(&self) -> Severity {
        Severity::Warning
    }

    /// Human-readable summary of a fix touching `count` sites.
    fn describe(&self, count: usize) -> String;

    /// Non-overlapping findings, in source order.
    fn findings(&self, content: &str, lexed: &Lexed) -> Vec<Finding>;
}

struct ScriptRuleAdapter<R>(R);

impl<R: ScriptRule> Fixer for ScriptRuleAdapter<R> {
    fn propose(&self, ctx: &FixContext<'_>) -> Result<Option<ProposedFix>, FixError> {
        let findings = self.0.findings(ctx.content(), ctx.lexed());
        let description = self.0.describe(findings.len());
        let edits = findings
            .into_iter()
            .map(|f| Edit::replace(f.range, f.replacement))
            .collect();
        Ok(ProposedFix::non_empty(edits, description))
    }
}

impl<R: ScriptRule> Check for ScriptRuleAdapter<R> {
    fn check(&self, content: &str, lexed: &Lexed) -> Vec<Violation> {
        self.0
            .findings(content, lexed)
            .into_iter()
            .map(|f| {
                let (line, column) = line_col(content, f.range.start);
                Violation::new(
                    self.0.id(),
                    self.0.severity(),
                    Location::at(line, column).with_span(f.range),
                )
                .with_message(f.message)
            })
            .collect()
    }
}

fn script_rule<R: ScriptRule>(rule: R, summary: &str, priority: i32) -> RuleSpec {
    let id = rule.id();
    let shared = Arc::new(ScriptRuleAdapter(rule));
    RuleSpec::new(id, shared.clone())
        .check(shared)
        .summary(summary)
        .priority(priority)
}

/// The built-in rule set in registration order.
pub fn builtin_rules() -> Vec<RuleSpec> {
    vec![
        script_rule(AliasRule, "Expand cmdlet aliases to full command names", 20),
        script_rule(WriteHostRule, "Replace Write-Host with Write-Output", 10),
        script_rule(
            NullComparisonRule,
            "Put $null on the left side of equality comparisons",
            0,
        ),
        script_rule(SemicolonRule, "Drop semicolons that end a line", -10),
        script_rule(TrailingWhitespaceRule, "Strip trailing whitespace", -20),
        script_rule(
            ConstantStringQuotesRule,
            "Use single quotes for strings without expansions",
            -5,
        )
        .opt_in(),
    ]
}

pub fn builtin_registry() -> Result<RuleRegistry, RegistryError> {
    builtin_rules()
        .into_iter()
        .fold(RuleRegistry::builder(), |b, spec| b.rule(spec))
        .build()
}

/// 1-based line and character column of a byte offset.
pub fn line_col(content: &str, offset: usize) -> (usize, usize) {
    let prefix = content.get(..offset).unwrap_or(content);
    let line_start = prefix.rfind('\n').map(|i| i + 1).unwrap_or(0);
    let line = prefix.bytes().filter(|b| *b == b'\n').count() + 1;
    (line, prefix[line_start..].chars().count() + 1)
}

/// Bytes that may appear in a bare command name or argument word.
pub(crate) fn is_token_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.' | b':' | b'\\' | b'/') || b >= 0x80
}

fn is_blank(b: u8) -> bool {
    matches!(b, b' ' | b'\t' | b'\r')
}

/// Offset and value of the last non-blank byte before `at`.
pub(crate) fn prev_non_blank(bytes: &[u8], at: usize) -> Option<(usize, u8)> {
    bytes[..at.min(bytes.len())]
        .iter()
        .rposition(|b| !is_blank(*b))
        .map(|i| (i, bytes[i]))
}

pub(crate) fn next_non_blank(bytes: &[u8], at: usize) -> Option<u8> {
    bytes
        .get(at..)
        .and_then(|rest| rest.iter().find(|b| !matches!(b, b' ' | b'\t')))
        .copied()
}

/// Maximal runs of token bytes inside code spans.
pub(crate) fn code_tokens(content: &str, lexed: &Lexed) -> Vec<Range<usize>> {
    let bytes = content.as_bytes();
    let mut tokens = Vec::new();
    for range in lexed.code_ranges() {
        let mut i = range.start;
        while i < range.end {
            if !is_token_byte(bytes[i]) {
                i += 1;
                continue;
            }
            let start = i;
            while i < range.end && is_token_byte(bytes[i]) {
                i += 1;
            }
            // A token continuing past the span edge is not a bare word.
            let glued = (start > 0 && is_token_byte(bytes[start - 1]))
                || (i < bytes.len() && is_token_byte(bytes[i]));
            if !glued {
                tokens.push(start..i);
            }
        }
    }
    tokens
}

/// True when a word starting at `start` would be parsed as a command name.
pub(crate) fn in_command_position(bytes: &[u8], start: usize) -> bool {
    match prev_non_blank(bytes, start) {
        None => true,
        Some((_, b)) => matches!(b, b'\n' | b'|' | b';' | b'{' | b'(' | b'=' | b'&'),
    }
}

/// Byte ranges of each line without its terminator (`\n` or `\r\n`).
pub(crate) fn line_bodies(content: &str) -> Vec<Range<usize>> {
    let bytes = content.as_bytes();
    let mut lines = Vec::new();
    let mut start = 0;
    for (i, b) in bytes.iter().enumerate() {
        if *b == b'\n' {
            let end = if i > start && bytes[i - 1] == b'\r' { i - 1 } else { i };
            lines.push(start..end);
            start = i + 1;
        }
    }
    if start < bytes.len() {
        lines.push(start..bytes.len());
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::script::lex;

    #[test]
    fn test_builtin_registry_chain_order() {
        let registry = builtin_registry().unwrap();
        let order: Vec<&str> = registry
            .in_chain_order()
            .iter()
            .map(|e| e.id.as_str())
            .collect();
        assert_eq!(
            order,
            vec![
                AVOID_ALIASES,
                AVOID_WRITE_HOST,
                NULL_COMPARISON,
                CONSTANT_STRING_QUOTES,
                AVOID_SEMICOLONS,
                TRAILING_WHITESPACE,
            ]
        );
        assert!(!registry.default_enabled().contains(CONSTANT_STRING_QUOTES));
        assert!(registry.in_chain_order().iter().all(|e| e.check().is_some()));
    }

    #[test]
    fn test_check_reports_line_and_column() {
        let registry = builtin_registry().unwrap();
        let content = "$a = 1\n  Write-Host 'x'\n";
        let check = registry.get(AVOID_WRITE_HOST).unwrap().check().unwrap();
        let found = check.check(content, &lex(content));
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].location.line, 2);
        assert_eq!(found[0].location.column, 3);
        assert_eq!(found[0].location.span, Some(9..19));
    }

    #[test]
    fn test_line_col_counts_characters() {
        assert_eq!(line_col("é gci", 3), (1, 3));
        assert_eq!(line_col("a\r\nb", 3), (2, 1));
    }

    #[test]
    fn test_line_bodies() {
        let content = "a\r\nbb\n\nc";
        let bodies: Vec<&str> = line_bodies(content)
            .into_iter()
            .map(|r| &content[r])
            .collect();
        assert_eq!(bodies, vec!["a", "bb", "", "c"]);
    }

    #[test]
    fn test_code_tokens_skip_strings_and_comments() {
        let content = "gci 'ls' # dir\ncat";
        let lexed = lex(content);
        let tokens: Vec<&str> = code_tokens(content, &lexed)
            .into_iter()
            .map(|r| &content[r])
            .collect();
        assert_eq!(tokens, vec!["gci", "cat"]);
    }
}
