use super::{line_bodies, Finding, ScriptRule, AVOID_SEMICOLONS, TRAILING_WHITESPACE};
use crate::model::Severity;
use crate::parser::script::{Lexed, SpanKind};
use std::ops::Range;

/// `PSAvoidSemicolonsAsLineTerminators`
#[derive(Debug, Default, Clone, Copy)]
pub struct SemicolonRule;

impl ScriptRule for SemicolonRule {
    fn id(&self) -> &'static str {
        AVOID_SEMICOLONS
    }

    fn describe(&self, count: usize) -> String {
        format!(
            "removed {} line-terminating semicolon{}",
            count,
            if count == 1 { "" } else { "s" }
        )
    }

    fn findings(&self, content: &str, lexed: &Lexed) -> Vec<Finding> {
        let bytes = content.as_bytes();
        let mut out = Vec::new();
        for line in line_bodies(content) {
            let Some(end) = code_end(lexed, &line) else {
                continue;
            };
            let mut i = end;
            while i > line.start {
                let b = bytes[i - 1];
                if !matches!(b, b' ' | b'\t' | b';') || !lexed.is_code(i - 1) {
                    break;
                }
                i -= 1;
            }
            // A backtick escapes the byte after it; that byte stays, or the
            // backtick would become a line continuation.
            let start = if i > line.start && bytes[i - 1] == b'`' {
                i + 1
            } else {
                i
            };
            if start >= end || !bytes[start..end].contains(&b';') {
                continue;
            }
            // The whole run goes so no trailing blanks are left behind. A
            // comment after it still needs one blank to stay separate.
            let replacement = if end < line.end && start > line.start {
                " "
            } else {
                ""
            };
            out.push(Finding {
                range: start..end,
                replacement: replacement.to_string(),
                message: "line ends with a semicolon".to_string(),
            });
        }
        out
    }
}

/// End of the code part of a line, before any trailing line comment.
/// `None` when the line ends inside a comment opened on an earlier line.
fn code_end(lexed: &Lexed, line: &Range<usize>) -> Option<usize> {
    if line.is_empty() {
        return Some(line.end);
    }
    match lexed.span_at(line.end - 1) {
        Some(span) if span.kind == SpanKind::Comment => {
            (span.range.start >= line.start).then_some(span.range.start)
        }
        _ => Some(line.end),
    }
}

/// `PSAvoidTrailingWhitespace`
#[derive(Debug, Default, Clone, Copy)]
pub struct TrailingWhitespaceRule;

impl ScriptRule for TrailingWhitespaceRule {
    fn id(&self) -> &'static str {
        TRAILING_WHITESPACE
    }

    fn severity(&self) -> Severity {
        Severity::Information
    }

    fn describe(&self, count: usize) -> String {
        format!(
            "stripped trailing whitespace from {} line{}",
            count,
            if count == 1 { "" } else { "s" }
        )
    }

    fn findings(&self, content: &str, lexed: &Lexed) -> Vec<Finding> {
        let bytes = content.as_bytes();
        line_bodies(content)
            .into_iter()
            .filter_map(|line| {
                let blanks = bytes[line.clone()]
                    .iter()
                    .rev()
                    .take_while(|b| matches!(b, b' ' | b'\t'))
                    .count();
                let run = line.end - blanks..line.end;
                if blanks == 0 || !lexed.is_within(&[SpanKind::Code, SpanKind::Comment], &run) {
                    return None;
                }
                // A backtick before the blanks escapes them; removing them would
                // turn it into a line continuation.
                if run.start > 0 && bytes[run.start - 1] == b'`' {
                    return None;
                }
                Some(Finding {
                    range: run,
                    replacement: String::new(),
                    message: "line has trailing whitespace".to_string(),
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::script::lex;

    fn fix(rule: &dyn ScriptRule, content: &str) -> String {
        let lexed = lex(content);
        let mut out = content.to_string();
        for f in rule.findings(content, &lexed).into_iter().rev() {
            out.replace_range(f.range, &f.replacement);
        }
        out
    }

    #[test]
    fn test_semicolons_at_line_end_are_removed() {
        assert_eq!(fix(&SemicolonRule, "$a = 1;\n$b = 2;"), "$a = 1\n$b = 2");
        assert_eq!(fix(&SemicolonRule, "$a = 1; # set a\r\n"), "$a = 1 # set a\r\n");
        assert_eq!(fix(&SemicolonRule, "$a = 1 ; ;\n"), "$a = 1\n");
        assert_eq!(fix(&SemicolonRule, "$a = 1;# set a\n"), "$a = 1 # set a\n");
        assert_eq!(fix(&SemicolonRule, " ;"), "");
        assert_eq!(fix(&SemicolonRule, "ls-and|\t;"), "ls-and|");
        assert_eq!(fix(&SemicolonRule, "Write-Output a` ;\n"), "Write-Output a` \n");
    }

    #[test]
    fn test_inner_and_quoted_semicolons_stay() {
        let untouched = [
            "$a = 1; $b = 2",
            "for ($i = 0; $i -lt 3; $i++) { }",
            "Write-Output 'a;'",
            "# done;",
            "<# a;\nb; #>",
            "$t = @\"\nline;\n\"@",
        ];
        for src in untouched {
            assert_eq!(fix(&SemicolonRule, src), src, "{src:?}");
        }
    }

    #[test]
    fn test_trailing_whitespace_is_stripped_outside_strings() {
        assert_eq!(
            fix(&TrailingWhitespaceRule, "$a = 1  \n# note\t\n\n  \r\nfoo"),
            "$a = 1\n# note\n\n\r\nfoo"
        );
        let here = "$t = @\"\nkeep   \n\"@\n";
        assert_eq!(fix(&TrailingWhitespaceRule, here), here);
        let quoted = "$s = \"a   \nb\"";
        assert_eq!(fix(&TrailingWhitespaceRule, quoted), quoted);
        let escaped = "Write-Output a` \n";
        assert_eq!(fix(&TrailingWhitespaceRule, escaped), escaped);
    }

    #[test]
    fn test_semicolon_fix_leaves_nothing_for_a_second_pass() {
        for src in ["$x = 1 ;\n", " ;", "ls-and|\t;", "$a = 1\t; # c\n", "  ; # c"] {
            let once = fix(&SemicolonRule, src);
            assert_eq!(fix(&SemicolonRule, &once), once, "{src:?}");
            assert_eq!(fix(&TrailingWhitespaceRule, &once), once, "{src:?}");
        }
    }

    #[test]
    fn test_semicolon_then_whitespace_chain() {
        let once = fix(&SemicolonRule, "$a = 1 ;\n");
        let twice = fix(&TrailingWhitespaceRule, &once);
        assert_eq!(twice, "$a = 1\n");
        assert_eq!(fix(&SemicolonRule, &twice), twice);
        assert_eq!(fix(&TrailingWhitespaceRule, &twice), twice);
    }
}
