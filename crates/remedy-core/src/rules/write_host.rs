use super::{code_tokens, in_command_position, Finding, ScriptRule, AVOID_WRITE_HOST};
use crate::parser::script::Lexed;

/// Host-only parameters with no `Write-Output` equivalent.
const HOST_ONLY_PARAMETERS: &[&str] = &[
    "foregroundcolor",
    "backgroundcolor",
    "nonewline",
    "separator",
    "object",
];

/// `PSAvoidUsingWriteHost`
///
/// Calls that use host-only parameters are reported by neither half: rewriting
/// them would change what the script prints.
#[derive(Debug, Default, Clone, Copy)]
pub struct WriteHostRule;

impl ScriptRule for WriteHostRule {
    fn id(&self) -> &'static str {
        AVOID_WRITE_HOST
    }

    fn describe(&self, count: usize) -> String {
        if count == 1 {
            "replaced Write-Host with Write-Output".to_string()
        } else {
            format!("replaced {} Write-Host calls with Write-Output", count)
        }
    }

    fn findings(&self, content: &str, lexed: &Lexed) -> Vec<Finding> {
        let bytes = content.as_bytes();
        code_tokens(content, lexed)
            .into_iter()
            .filter(|t| content[t.clone()].eq_ignore_ascii_case("write-host"))
            .filter(|t| in_command_position(bytes, t.start))
            .filter(|t| !uses_host_only_parameter(content, lexed, t.end))
            .map(|range| Finding {
                range,
                replacement: "Write-Output".to_string(),
                message: "Write-Host writes to the host instead of the pipeline".to_string(),
            })
            .collect()
    }
}

fn uses_host_only_parameter(content: &str, lexed: &Lexed, from: usize) -> bool {
    let end = statement_end(content, lexed, from);
    code_tokens(content, lexed)
        .into_iter()
        .filter(|t| t.start >= from && t.end <= end)
        .filter_map(|t| content[t].strip_prefix('-').map(str::to_ascii_lowercase))
        .any(|name| {
            name.len() >= 2 && HOST_ONLY_PARAMETERS.iter().any(|p| p.starts_with(name.as_str()))
        })
}

/// End of the statement starting before `from`: the first code-level line
/// break, `;` or `|`. Backtick line continuations are followed.
fn statement_end(content: &str, lexed: &Lexed, from: usize) -> usize {
    let bytes = content.as_bytes();
    let mut i = from;
    while i < bytes.len() {
        match bytes[i] {
            b'\n' if lexed.is_code(i) => {
                let continued = bytes[..i]
                    .iter()
                    .rev()
                    .find(|b| **b != b'\r')
                    .is_some_and(|b| *b == b'`');
                if !continued {
                    return i;
                }
            }
            b';' | b'|' if lexed.is_code(i) => return i,
            _ => {}
        }
        i += 1;
    }
    bytes.len()
}
