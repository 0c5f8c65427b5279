//! PowerShell script lexer and structural parser
//!
//! This is not a full PowerShell grammar. It recognizes exactly what the
//! validation gate and the fix rules need: where strings, here-strings and
//! comments begin and end, whether brackets balance, and how many named
//! declarations sit at the top level of the script.
//!
//! All delimiters are ASCII, so scanning bytes never splits a UTF-8 sequence
//! at a span boundary.

use super::{ParseReport, ParserError, SourceParser};
use std::ops::Range;

const DECLARATION_KEYWORDS: &[&str] = &[
    "function",
    "filter",
    "workflow",
    "configuration",
    "class",
    "enum",
];

/// Classification of a region of script text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpanKind {
    Code,
    /// `'...'` literal string.
    SingleQuoted,
    /// `"..."` expandable string, including any `$( ... )` it contains.
    DoubleQuoted,
    HereString,
    Comment,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Span {
    pub kind: SpanKind,
    pub range: Range<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntaxProblem {
    pub offset: usize,
    pub message: String,
}

/// Result of lexing one script.
#[derive(Debug, Clone, Default)]
pub struct Lexed {
    pub spans: Vec<Span>,
    pub problems: Vec<SyntaxProblem>,
    pub top_level_declarations: usize,
}

impl Lexed {
    pub fn code_ranges(&self) -> impl Iterator<Item = Range<usize>> + '_ {
        self.spans_of(SpanKind::Code)
    }

    pub fn spans_of(&self, kind: SpanKind) -> impl Iterator<Item = Range<usize>> + '_ {
        self.spans
            .iter()
            .filter(move |s| s.kind == kind)
            .map(|s| s.range.clone())
    }

    /// True when `offset` lies inside a code span.
    pub fn is_code(&self, offset: usize) -> bool {
        self.kind_at(offset) == Some(SpanKind::Code)
    }

    pub fn kind_at(&self, offset: usize) -> Option<SpanKind> {
        self.span_at(offset).map(|s| s.kind)
    }

    pub fn span_at(&self, offset: usize) -> Option<&Span> {
        let idx = self.spans.partition_point(|s| s.range.end <= offset);
        self.spans.get(idx).filter(|s| s.range.start <= offset)
    }

    /// True when the whole byte range is code.
    pub fn is_code_range(&self, range: &Range<usize>) -> bool {
        self.is_within(&[SpanKind::Code], range)
    }

    /// True when `range` sits inside a single span of one of `kinds`.
    pub fn is_within(&self, kinds: &[SpanKind], range: &Range<usize>) -> bool {
        match self.span_at(range.start) {
            Some(span) => kinds.contains(&span.kind) && range.end <= span.range.end,
            None => false,
        }
    }
}

/// Lex a script into spans and structural problems.
pub fn lex(content: &str) -> Lexed {
    Lexer::new(content.as_bytes()).run()
}

/// Parser for PowerShell scripts backed by [`lex`].
#[derive(Debug, Default, Clone, Copy)]
pub struct ScriptParser;

impl SourceParser for ScriptParser {
    fn name(&self) -> &str {
        "powershell"
    }

    fn parse(&self, content: &str) -> Result<ParseReport, ParserError> {
        let lexed = lex(content);
        let diagnostics = lexed
            .problems
            .iter()
            .take(5)
            .map(|p| format!("line {}: {}", line_of(content, p.offset), p.message))
            .collect();
        Ok(ParseReport {
            success: lexed.problems.is_empty(),
            error_count: lexed.problems.len(),
            top_level_declaration_count: lexed.top_level_declarations,
            diagnostics,
            problem_kinds: lexed.problems.into_iter().map(|p| p.message).collect(),
        })
    }
}

/// 1-based line number of a byte offset.
pub fn line_of(content: &str, offset: usize) -> usize {
    let end = offset.min(content.len());
    content.as_bytes()[..end]
        .iter()
        .filter(|b| **b == b'\n')
        .count()
        + 1
}

struct Lexer<'a> {
    src: &'a [u8],
    pos: usize,
    code_start: usize,
    stack: Vec<(u8, usize)>,
    out: Lexed,
}

impl<'a> Lexer<'a> {
    fn new(src: &'a [u8]) -> Self {
        Self {
            src,
            pos: 0,
            code_start: 0,
            stack: Vec::new(),
            out: Lexed::default(),
        }
    }

    fn peek(&self, ahead: usize) -> Option<u8> {
        self.src.get(self.pos + ahead).copied()
    }

    fn run(mut self) -> Lexed {
        while self.pos < self.src.len() {
            let b = self.src[self.pos];
            match b {
                b'<' if self.peek(1) == Some(b'#') => self.block_comment(),
                b'#' if self.comment_can_start() => self.line_comment(),
                b'@' if matches!(self.peek(1), Some(b'"') | Some(b'\''))
                    && here_string_opens(self.src, self.pos) =>
                {
                    self.here_string()
                }
                b'\'' => {
                    let end = scan_single(self.src, self.pos);
                    self.string_span(SpanKind::SingleQuoted, end, "unterminated string");
                }
                b'"' => {
                    let end = scan_double(self.src, self.pos);
                    self.string_span(SpanKind::DoubleQuoted, end, "unterminated string");
                }
                b'`' => self.pos = (self.pos + 2).min(self.src.len()),
                b'{' | b'(' | b'[' => {
                    self.stack.push((b, self.pos));
                    self.pos += 1;
                }
                b'}' | b')' | b']' => {
                    self.close(b);
                    self.pos += 1;
                }
                _ if b.is_ascii_alphabetic() && self.at_word_boundary() => self.word(),
                _ => self.pos += 1,
            }
        }
        self.flush_code(self.src.len());

        for (open, offset) in std::mem::take(&mut self.stack) {
            self.problem(offset, format!("unclosed '{}'", open as char));
        }
        self.out.problems.sort_by_key(|p| p.offset);
        self.out
    }

    fn flush_code(&mut self, end: usize) {
        if end > self.code_start {
            self.out.spans.push(Span {
                kind: SpanKind::Code,
                range: self.code_start..end,
            });
        }
    }

    fn push_span(&mut self, kind: SpanKind, start: usize, end: usize) {
        self.flush_code(start);
        self.out.spans.push(Span {
            kind,
            range: start..end,
        });
        self.pos = end;
        self.code_start = end;
    }

    fn problem(&mut self, offset: usize, message: impl Into<String>) {
        self.out.problems.push(SyntaxProblem {
            offset,
            message: message.into(),
        });
    }

    fn string_span(&mut self, kind: SpanKind, end: Option<usize>, message: &str) {
        let start = self.pos;
        let end = match end {
            Some(end) => end,
            None => {
                self.problem(start, message);
                self.src.len()
            }
        };
        self.push_span(kind, start, end);
    }

    fn comment_can_start(&self) -> bool {
        self.pos == 0
            || matches!(
                self.src[self.pos - 1],
                b' ' | b'\t' | b'\r' | b'\n' | b';' | b'{' | b'}' | b'(' | b')' | b'|' | b'='
            )
    }

    fn line_comment(&mut self) {
        let start = self.pos;
        let end = self.src[start..]
            .iter()
            .position(|b| *b == b'\n')
            .map(|i| start + i)
            .unwrap_or(self.src.len());
        let end = if end > start && self.src[end - 1] == b'\r' && end - 1 > start {
            end - 1
        } else {
            end
        };
        self.push_span(SpanKind::Comment, start, end);
    }

    fn block_comment(&mut self) {
        let start = self.pos;
        match find(self.src, start + 2, b"#>") {
            Some(i) => self.push_span(SpanKind::Comment, start, i + 2),
            None => {
                self.problem(start, "unterminated block comment");
                self.push_span(SpanKind::Comment, start, self.src.len());
            }
        }
    }

    fn here_string(&mut self) {
        let start = self.pos;
        let quote = self.src[start + 1];
        let terminator = [b'\n', quote, b'@'];
        match find(self.src, start + 2, &terminator) {
            Some(i) => self.push_span(SpanKind::HereString, start, i + 3),
            None => {
                self.problem(start, "unterminated here-string");
                self.push_span(SpanKind::HereString, start, self.src.len());
            }
        }
    }

    fn close(&mut self, close: u8) {
        let open = matching_open(close);
        match self.stack.last() {
            Some((top, _)) if *top == open => {
                self.stack.pop();
            }
            Some(_) if self.stack.iter().any(|(o, _)| *o == open) => {
                // Everything opened after the matching bracket is left unclosed.
                while let Some((top, offset)) = self.stack.pop() {
                    if top == open {
                        break;
                    }
                    self.problem(offset, format!("unclosed '{}'", top as char));
                }
            }
            _ => self.problem(self.pos, format!("unexpected '{}'", close as char)),
        }
    }

    fn at_word_boundary(&self) -> bool {
        self.pos == 0 || !is_word_byte(self.src[self.pos - 1])
    }

    fn word(&mut self) {
        let start = self.pos;
        let mut end = start;
        while end < self.src.len() && is_word_byte(self.src[end]) {
            end += 1;
        }
        if self.stack.is_empty() && self.declares_name(start, end) {
            self.out.top_level_declarations += 1;
        }
        self.pos = end;
    }

    fn declares_name(&self, start: usize, end: usize) -> bool {
        let Ok(word) = std::str::from_utf8(&self.src[start..end]) else {
            return false;
        };
        if !DECLARATION_KEYWORDS
            .iter()
            .any(|k| k.eq_ignore_ascii_case(word))
        {
            return false;
        }
        let rest = &self.src[end..];
        let gap = rest
            .iter()
            .take_while(|b| matches!(b, b' ' | b'\t'))
            .count();
        gap > 0
            && rest
                .get(gap)
                .map(|b| b.is_ascii_alphabetic() || *b == b'_' || *b >= 0x80)
                .unwrap_or(false)
    }
}

fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'$' | b':' | b'.') || b >= 0x80
}

fn matching_open(close: u8) -> u8 {
    match close {
        b'}' => b'{',
        b')' => b'(',
        _ => b'[',
    }
}

fn find(haystack: &[u8], from: usize, needle: &[u8]) -> Option<usize> {
    if from >= haystack.len() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|i| from + i)
}

/// `@"` / `@'` only opens a here-string when nothing but blanks follow it
/// on the same line.
fn here_string_opens(src: &[u8], at: usize) -> bool {
    src[at + 2..]
        .iter()
        .take_while(|b| **b != b'\n')
        .all(|b| matches!(b, b' ' | b'\t' | b'\r'))
        && src[at + 2..].contains(&b'\n')
}

/// End offset (exclusive) of the single-quoted string opening at `at`.
fn scan_single(src: &[u8], at: usize) -> Option<usize> {
    let mut i = at + 1;
    while i < src.len() {
        if src[i] == b'\'' {
            if src.get(i + 1) == Some(&b'\'') {
                i += 2;
                continue;
            }
            return Some(i + 1);
        }
        i += 1;
    }
    None
}

/// End offset (exclusive) of the double-quoted string opening at `at`.
fn scan_double(src: &[u8], at: usize) -> Option<usize> {
    let mut i = at + 1;
    while i < src.len() {
        match src[i] {
            b'`' => i += 2,
            b'"' if src.get(i + 1) == Some(&b'"') => i += 2,
            b'"' => return Some(i + 1),
            b'$' if src.get(i + 1) == Some(&b'(') => i = skip_subexpression(src, i + 2)?,
            _ => i += 1,
        }
    }
    None
}

/// Skip a `$( ... )` body starting just after the opening paren.
fn skip_subexpression(src: &[u8], from: usize) -> Option<usize> {
    let mut depth = 1usize;
    let mut i = from;
    while i < src.len() {
        match src[i] {
            b'(' => {
                depth += 1;
                i += 1;
            }
            b')' => {
                depth -= 1;
                i += 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            b'"' => i = scan_double(src, i)?,
            b'\'' => i = scan_single(src, i)?,
            b'`' => i += 2,
            _ => i += 1,
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(src: &str) -> ParseReport {
        ScriptParser.parse(src).unwrap()
    }

    #[test]
    fn test_simple_command_parses() {
        let r = report("Write-Host \"hi\"");
        assert!(r.success);
        assert_eq!(r.error_count, 0);
        assert_eq!(r.top_level_declaration_count, 0);
    }

    #[test]
    fn test_unbalanced_braces_are_errors() {
        let r = report("function Get-A {\n  if ($x) { 'a'\n}\n");
        assert!(!r.success);
        assert_eq!(r.error_count, 1);

        let r = report("Write-Output 'a' }");
        assert_eq!(r.error_count, 1);
        assert!(r.diagnostics[0].contains("unexpected '}'"));
    }

    #[test]
    fn test_brackets_inside_strings_and_comments_are_ignored() {
        let src = "Write-Output '{ (' # ) }\n<# { #>\n$s = \"[ $(Get-Date -Format \"yyyy\") \"\n";
        let r = report(src);
        assert!(r.success, "{:?}", r.diagnostics);
    }

    #[test]
    fn test_unterminated_string_and_comment() {
        assert_eq!(report("Write-Output 'oops").error_count, 1);
        assert_eq!(report("Write-Output \"oops").error_count, 1);
        assert_eq!(report("<# never closed").error_count, 1);
    }

    #[test]
    fn test_here_strings() {
        let src = "$t = @\"\n{ not code\n\"@\nWrite-Output $t\n";
        let lexed = lex(src);
        assert!(lexed.problems.is_empty());
        assert_eq!(lexed.spans_of(SpanKind::HereString).count(), 1);

        assert_eq!(report("$t = @'\nunterminated\n").error_count, 1);
    }

    #[test]
    fn test_doubled_quotes_and_escapes() {
        assert!(report("'it''s'").success);
        assert!(report("\"say \"\"hi\"\" `\"now`\"\"").success);
    }

    #[test]
    fn test_top_level_declarations() {
        let src = "function A { function Inner {} }\nfilter B { $_ }\nclass C {}\n'function D {}'\n# function E\n";
        assert_eq!(report(src).top_level_declaration_count, 3);
    }

    #[test]
    fn test_span_queries() {
        let src = "gci # gci\n'gci'";
        let lexed = lex(src);
        assert!(lexed.is_code(0));
        assert_eq!(lexed.kind_at(5), Some(SpanKind::Comment));
        assert_eq!(lexed.kind_at(11), Some(SpanKind::SingleQuoted));
        assert!(lexed.is_code_range(&(0..3)));
        assert!(!lexed.is_code_range(&(11..14)));
    }

    #[test]
    fn test_hash_inside_token_is_not_a_comment() {
        let lexed = lex("$a#b = 1");
        assert_eq!(lexed.spans_of(SpanKind::Comment).count(), 0);
    }

    #[test]
    fn test_line_of() {
        assert_eq!(line_of("a\nb\nc", 0), 1);
        assert_eq!(line_of("a\nb\nc", 2), 2);
        assert_eq!(line_of("a\nb\nc", 99), 3);
    }
}
