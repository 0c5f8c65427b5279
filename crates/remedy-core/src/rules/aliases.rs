use super::{
    code_tokens, in_command_position, is_token_byte, next_non_blank, prev_non_blank, Finding,
    ScriptRule, AVOID_ALIASES,
};
use crate::parser::script::Lexed;

/// Alias → command. Lookups are case-insensitive.
const ALIASES: &[(&str, &str)] = &[
    ("ac", "Add-Content"),
    ("cat", "Get-Content"),
    ("cd", "Set-Location"),
    ("chdir", "Set-Location"),
    ("clear", "Clear-Host"),
    ("cls", "Clear-Host"),
    ("copy", "Copy-Item"),
    ("cp", "Copy-Item"),
    ("del", "Remove-Item"),
    ("dir", "Get-ChildItem"),
    ("echo", "Write-Output"),
    ("erase", "Remove-Item"),
    ("fl", "Format-List"),
    ("ft", "Format-Table"),
    ("gc", "Get-Content"),
    ("gci", "Get-ChildItem"),
    ("gi", "Get-Item"),
    ("gl", "Get-Location"),
    ("gm", "Get-Member"),
    ("gps", "Get-Process"),
    ("group", "Group-Object"),
    ("gsv", "Get-Service"),
    ("icm", "Invoke-Command"),
    ("iex", "Invoke-Expression"),
    ("irm", "Invoke-RestMethod"),
    ("iwr", "Invoke-WebRequest"),
    ("kill", "Stop-Process"),
    ("ls", "Get-ChildItem"),
    ("measure", "Measure-Object"),
    ("move", "Move-Item"),
    ("mv", "Move-Item"),
    ("ni", "New-Item"),
    ("ps", "Get-Process"),
    ("pwd", "Get-Location"),
    ("ri", "Remove-Item"),
    ("rm", "Remove-Item"),
    ("rmdir", "Remove-Item"),
    ("saps", "Start-Process"),
    ("select", "Select-Object"),
    ("sl", "Set-Location"),
    ("sleep", "Start-Sleep"),
    ("sort", "Sort-Object"),
    ("spps", "Stop-Process"),
    ("start", "Start-Process"),
    ("tee", "Tee-Object"),
    ("type", "Get-Content"),
    ("write", "Write-Output"),
];

/// Aliases that are keywords or operators outside a pipeline.
const PIPELINE_ONLY: &[(&str, &str)] = &[
    ("%", "ForEach-Object"),
    ("?", "Where-Object"),
    ("foreach", "ForEach-Object"),
    ("where", "Where-Object"),
];

/// Full command name for an alias, if it is one we expand.
pub fn canonical_command(alias: &str) -> Option<&'static str> {
    ALIASES
        .iter()
        .chain(PIPELINE_ONLY)
        .find(|(a, _)| a.eq_ignore_ascii_case(alias))
        .map(|(_, c)| *c)
}

/// `PSAvoidUsingCmdletAliases`
#[derive(Debug, Default, Clone, Copy)]
pub struct AliasRule;

impl ScriptRule for AliasRule {
    fn id(&self) -> &'static str {
        AVOID_ALIASES
    }

    fn describe(&self, count: usize) -> String {
        format!("expanded {} alias{}", count, if count == 1 { "" } else { "es" })
    }

    fn findings(&self, content: &str, lexed: &Lexed) -> Vec<Finding> {
        let bytes = content.as_bytes();
        let mut out = Vec::new();

        for token in code_tokens(content, lexed) {
            let word = &content[token.clone()];
            let after_pipe = matches!(prev_non_blank(bytes, token.start), Some((_, b'|')));
            let command = if let Some((_, c)) = lookup(ALIASES, word) {
                // `name {` outside a pipeline is a switch label or a definition.
                let block_follows = matches!(next_non_blank(bytes, token.end), Some(b'{'));
                (in_command_position(bytes, token.start) && (after_pipe || !block_follows))
                    .then_some(c)
            } else if let Some((_, c)) = lookup(PIPELINE_ONLY, word) {
                after_pipe.then_some(c)
            } else {
                None
            };
            let Some(command) = command else { continue };
            if !ends_bare(bytes, token.end) {
                continue;
            }
            out.push(Finding {
                message: format!("'{}' is an alias of '{}'", word, command),
                range: token,
                replacement: command.to_string(),
            });
        }

        for range in lexed.code_ranges() {
            for i in range {
                let b = bytes[i];
                if !matches!(b, b'%' | b'?') {
                    continue;
                }
                let glued = i > 0 && is_token_byte(bytes[i - 1]);
                let piped = matches!(prev_non_blank(bytes, i), Some((_, b'|')));
                let spaced = matches!(bytes.get(i + 1), None | Some(b' ' | b'\t' | b'{'));
                if glued || !piped || !spaced {
                    continue;
                }
                if let Some((alias, command)) = lookup(PIPELINE_ONLY, &content[i..i + 1]) {
                    out.push(Finding {
                        range: i..i + 1,
                        replacement: command.to_string(),
                        message: format!("'{}' is an alias of '{}'", alias, command),
                    });
                }
            }
        }

        out.sort_by_key(|f| f.range.start);
        out
    }
}

fn lookup(
    table: &'static [(&'static str, &'static str)],
    word: &str,
) -> Option<(&'static str, &'static str)> {
    table
        .iter()
        .find(|(alias, _)| alias.eq_ignore_ascii_case(word))
        .copied()
}

/// The word is followed by a separator and is not a hashtable key or call.
fn ends_bare(bytes: &[u8], end: usize) -> bool {
    let separated = matches!(
        bytes.get(end),
        None | Some(b' ' | b'\t' | b'\r' | b'\n' | b'|' | b';' | b')' | b'}')
    );
    separated && !matches!(next_non_blank(bytes, end), Some(b'='))
}
