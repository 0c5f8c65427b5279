//! Console and JSON rendering of run reports.

use remedy_core::registry::RuleRegistry;
use remedy_engine::{FileRunResult, FileState, RunReport};
use std::collections::BTreeSet;
use std::io::{self, Write};

pub fn print_rules(registry: &RuleRegistry, enabled: &BTreeSet<String>) {
    let width = registry
        .in_chain_order()
        .iter()
        .map(|e| e.id.len())
        .max()
        .unwrap_or(0);
    for entry in registry.in_chain_order() {
        let marker = if enabled.contains(&entry.id) { "+" } else { " " };
        println!(
            "  {} {:<width$}  {:>4}  {}",
            marker,
            entry.id,
            entry.priority,
            entry.summary,
            width = width
        );
    }
}

pub fn print_json(report: &RunReport, include_content: bool) -> anyhow::Result<()> {
    let value = report.to_json(include_content)?;
    let stdout = io::stdout();
    let mut out = stdout.lock();
    serde_json::to_writer_pretty(&mut out, &value)?;
    writeln!(out)?;
    Ok(())
}

pub fn print_human(report: &RunReport, show_diff: bool) {
    for result in &report.results {
        if let Some(line) = file_line(result, report.dry_run) {
            println!("{}", line);
        }
        for outcome in result.outcomes.iter().filter(|o| o.is_error()) {
            println!(
                "      ! {} (line {}): {}",
                outcome.rule_id,
                outcome.line,
                outcome.error.as_deref().unwrap_or_default()
            );
        }
        if show_diff && result.is_changed() && !result.diff.is_empty() {
            print!("{}", result.diff);
            if !result.diff.ends_with('\n') {
                println!();
            }
        }
    }

    let counts = &report.counts;
    println!();
    println!(
        "  {} file{} checked, {} {}, {} failed{}",
        counts.files_processed,
        if counts.files_processed == 1 { "" } else { "s" },
        counts.files_changed,
        if report.dry_run { "would change" } else { "changed" },
        counts.files_failed,
        if counts.files_skipped > 0 {
            format!(", {} skipped", counts.files_skipped)
        } else {
            String::new()
        }
    );
    println!(
        "  {} fix{} applied, {} rejected, {} errored",
        counts.fixes_applied,
        if counts.fixes_applied == 1 { "" } else { "es" },
        counts.fixes_rejected,
        counts.fix_errors
    );
    if report.cancelled {
        println!("  run cancelled before all files were processed");
    }
    if let Some(reason) = &report.aborted {
        println!("  run aborted: {}", reason);
    }
}

/// One status line per file worth mentioning. Untouched files stay quiet.
fn file_line(result: &FileRunResult, dry_run: bool) -> Option<String> {
    let path = result.path.display();
    let line = match result.state {
        FileState::Written | FileState::WouldChange => {
            let verb = if dry_run { "would fix" } else { "fixed" };
            let score = result
                .score
                .as_ref()
                .map(|s| format!(" [confidence {:.2} {}]", s.value, s.label()))
                .unwrap_or_default();
            let backup = result
                .backup
                .as_ref()
                .map(|b| format!(" (backup: {})", b.backup_path.display()))
                .unwrap_or_default();
            format!(
                "  + {} {}: {} fix{}{}{}",
                verb,
                path,
                result.applied_fixes(),
                if result.applied_fixes() == 1 { "" } else { "es" },
                score,
                backup
            )
        }
        FileState::Rejected => {
            let reason = result
                .validation
                .as_ref()
                .map(|v| v.reason.as_str())
                .unwrap_or("validation failed");
            format!("  ~ kept {}: {}", path, reason)
        }
        FileState::Failed(kind) => {
            let message = result
                .error
                .as_ref()
                .map(|e| e.message.as_str())
                .unwrap_or_default();
            let recovery = result
                .backup
                .as_ref()
                .map(|b| format!(" (original saved at {})", b.backup_path.display()))
                .unwrap_or_default();
            format!("  x {} [{}]: {}{}", path, kind.as_str(), message, recovery)
        }
        FileState::Unchanged | FileState::Skipped | FileState::Pending => return None,
    };
    Some(line)
}

#[cfg(test)]
mod tests {
    use super::*;
    use remedy_engine::FailureKind;
    use std::path::Path;

    #[test]
    fn test_file_lines() {
        let mut unchanged = FileRunResult::new(Path::new("a.ps1"));
        unchanged.state = FileState::Unchanged;
        assert!(file_line(&unchanged, false).is_none());

        let failed = FileRunResult::failed(Path::new("b.ps1"), FailureKind::Backup, "disk full");
        let line = file_line(&failed, false).unwrap();
        assert!(line.contains("b.ps1 [backup]: disk full"));
    }
}
