use super::{is_token_byte, prev_non_blank, Finding, ScriptRule, NULL_COMPARISON};
use crate::parser::script::Lexed;
use regex::Regex;
use std::sync::OnceLock;

fn comparison() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)(\$[a-z_][a-z0-9_:]*(?:\.[a-z_][a-z0-9_]*)*)([ \t]+)-([ci]?(?:eq|ne))([ \t]+)\$null\b",
        )
        .ok()
    })
    .as_ref()
}

/// `PSPossibleIncorrectComparisonWithNull`
///
/// Only simple comparisons are rewritten: the left side must be a plain
/// variable or property path, and the comparison must stand alone between
/// statement separators or logical operators, so swapping operands cannot
/// regroup the expression.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullComparisonRule;

impl ScriptRule for NullComparisonRule {
    fn id(&self) -> &'static str {
        NULL_COMPARISON
    }

    fn describe(&self, count: usize) -> String {
        format!(
            "moved $null to the left side of {} comparison{}",
            count,
            if count == 1 { "" } else { "s" }
        )
    }

    fn findings(&self, content: &str, lexed: &Lexed) -> Vec<Finding> {
        let Some(re) = comparison() else {
            return Vec::new();
        };
        let bytes = content.as_bytes();
        re.captures_iter(content)
            .filter_map(|caps| {
                let whole = caps.get(0)?;
                let lhs = caps.get(1)?.as_str();
                if lhs.eq_ignore_ascii_case("$null")
                    || !lexed.is_code_range(&whole.range())
                    || !opens_operand(bytes, whole.start())
                    || !closes_operand(bytes, whole.end())
                {
                    return None;
                }
                let replacement = format!(
                    "$null{}-{}{}{}",
                    &caps[2], &caps[3], &caps[4], lhs
                );
                Some(Finding {
                    range: whole.range(),
                    replacement,
                    message: format!("$null should be on the left side of -{}", &caps[3]),
                })
            })
            .collect()
    }
}

const LOGICAL_OPERATORS: &[&str] = &["-and", "-or", "-xor", "return"];

/// Nothing before `at` binds tighter than the comparison.
fn opens_operand(bytes: &[u8], at: usize) -> bool {
    if at > 0 {
        let prev = bytes[at - 1];
        if is_token_byte(prev) || matches!(prev, b'$' | b']' | b')' | b'`') {
            return false;
        }
    }
    match prev_non_blank(bytes, at) {
        None => true,
        Some((_, b'(' | b'{' | b';' | b'|' | b'\n' | b',' | b'=')) => true,
        // `-not` binds tighter than `-eq`, so only binary logical operators qualify.
        Some((end, b)) if b.is_ascii_alphabetic() => {
            let start = bytes[..=end]
                .iter()
                .rposition(|c| !is_token_byte(*c))
                .map(|i| i + 1)
                .unwrap_or(0);
            std::str::from_utf8(&bytes[start..=end])
                .map(|w| LOGICAL_OPERATORS.iter().any(|op| op.eq_ignore_ascii_case(w)))
                .unwrap_or(false)
        }
        _ => false,
    }
}

/// Nothing after `at` binds tighter than the comparison.
fn closes_operand(bytes: &[u8], at: usize) -> bool {
    if matches!(bytes.get(at), Some(b'.' | b'[')) {
        return false;
    }
    let rest = &bytes[at..];
    let skip = rest.iter().take_while(|b| matches!(b, b' ' | b'\t')).count();
    match rest.get(skip) {
        None => true,
        Some(b')' | b'}' | b']' | b';' | b'|' | b'\r' | b'\n' | b',' | b'#') => true,
        Some(b'-') => {
            let word: String = rest[skip + 1..]
                .iter()
                .take_while(|b| b.is_ascii_alphabetic())
                .map(|b| b.to_ascii_lowercase() as char)
                .collect();
            matches!(word.as_str(), "and" | "or" | "xor")
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::script::lex;

    fn fix(content: &str) -> String {
        let lexed = lex(content);
        let mut out = content.to_string();
        for f in NullComparisonRule.findings(content, &lexed).into_iter().rev() {
            out.replace_range(f.range, &f.replacement);
        }
        out
    }

    #[test]
    fn test_swaps_simple_comparisons() {
        assert_eq!(fix("if ($x -eq $null) { 1 }"), "if ($null -eq $x) { 1 }");
        assert_eq!(
            fix("$ok = $user.Name -ne $null"),
            "$ok = $null -ne $user.Name"
        );
        assert_eq!(
            fix("if ($a -eq $null -and $b -NE $null) {}"),
            "if ($null -eq $a -and $null -NE $b) {}"
        );
        assert_eq!(fix("$script:cache -eq $null\n"), "$null -eq $script:cache\n");
    }

    #[test]
    fn test_leaves_ambiguous_expressions_alone() {
        let untouched = [
            "$a + $b -eq $null",
            "-not $x -eq $null",
            "!$x -eq $null",
            "$x -eq $null + 1",
            "$items[0] -eq $null",
            "'$x -eq $null'",
            "# $x -eq $null",
            "$null -eq $null",
            "$x -eq $nullable",
        ];
        for src in untouched {
            assert_eq!(fix(src), src, "{src}");
        }
    }

    #[test]
    fn test_idempotent() {
        let once = fix("while ($line -ne $null) { $line = $r.ReadLine() }");
        assert_eq!(once, "while ($null -ne $line) { $line = $r.ReadLine() }");
        assert_eq!(fix(&once), once);
    }
}
