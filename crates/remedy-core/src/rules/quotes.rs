use super::{Finding, ScriptRule, CONSTANT_STRING_QUOTES};
use crate::model::Severity;
use crate::parser::script::{Lexed, SpanKind};

/// `PSAvoidUsingDoubleQuotesForConstantString`
#[derive(Debug, Default, Clone, Copy)]
pub struct ConstantStringQuotesRule;

impl ScriptRule for ConstantStringQuotesRule {
    fn id(&self) -> &'static str {
        CONSTANT_STRING_QUOTES
    }

    fn severity(&self) -> Severity {
        Severity::Information
    }

    fn describe(&self, count: usize) -> String {
        format!(
            "single-quoted {} constant string{}",
            count,
            if count == 1 { "" } else { "s" }
        )
    }

    fn findings(&self, content: &str, lexed: &Lexed) -> Vec<Finding> {
        lexed
            .spans_of(SpanKind::DoubleQuoted)
            .filter_map(|range| {
                let text = &content[range.clone()];
                let inner = text.strip_prefix('"')?.strip_suffix('"')?;
                if text.len() < 2 || !is_constant(inner) {
                    return None;
                }
                Some(Finding {
                    range,
                    replacement: format!("'{}'", inner),
                    message: format!("{} has nothing to expand", text),
                })
            })
            .collect()
    }
}

/// No expansions, escapes or characters that would need quoting again.
fn is_constant(inner: &str) -> bool {
    !inner.chars().any(|c| {
        matches!(c, '$' | '`' | '\'' | '"' | '\n' | '\r') || ('\u{2018}'..='\u{201E}').contains(&c)
    })
}
