//! Per-file results and run-level counts handed to the reporting layer.

use chrono::{DateTime, Utc};
use remedy_adapters::backup::BackupRecord;
use remedy_core::parser::Language;
use remedy_core::score::ConfidenceScore;
use remedy_core::validate::ValidationResult;
use remedy_core::{FixOutcome, Unhandled};
use serde::Serialize;
use std::path::{Path, PathBuf};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Io,
    Encoding,
    Detector,
    Parser,
    Backup,
    Write,
    StaleContent,
    Timeout,
    Panicked,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Io => "io",
            FailureKind::Encoding => "encoding",
            FailureKind::Detector => "detector",
            FailureKind::Parser => "parser",
            FailureKind::Backup => "backup",
            FailureKind::Write => "write",
            FailureKind::StaleContent => "stale_content",
            FailureKind::Timeout => "timeout",
            FailureKind::Panicked => "panicked",
        }
    }
}

/// Where a file's pipeline ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FileState {
    /// Not started, or stopped before anything was decided.
    Pending,
    Written,
    /// No fix changed the content.
    Unchanged,
    /// Dry run: the content would have been written.
    WouldChange,
    /// The validation gate refused the candidate; the original stands.
    Rejected,
    /// Never started because the run was cancelled.
    Skipped,
    Failed(FailureKind),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileError {
    pub kind: FailureKind,
    pub message: String,
    /// Set when the failure means no other file can succeed either.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub fatal: bool,
}

/// Terminal record for one file. Owned by a single pipeline instance until
/// it is handed back to the coordinator.
#[derive(Debug, Clone, Serialize)]
pub struct FileRunResult {
    pub path: PathBuf,
    pub language: Language,
    pub state: FileState,
    #[serde(skip)]
    pub original_content: String,
    #[serde(skip)]
    pub final_content: String,
    pub outcomes: Vec<FixOutcome>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub unhandled: Vec<Unhandled>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation: Option<ValidationResult>,
    /// Score of the net change to the file.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<ConfidenceScore>,
    /// Net diff from the original to the final content.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub diff: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup: Option<BackupRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<FileError>,
    pub elapsed_ms: u64,
}

impl FileRunResult {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            language: Language::from_path(path),
            state: FileState::Pending,
            original_content: String::new(),
            final_content: String::new(),
            outcomes: Vec::new(),
            unhandled: Vec::new(),
            validation: None,
            score: None,
            diff: String::new(),
            backup: None,
            error: None,
            elapsed_ms: 0,
        }
    }

    pub fn skipped(path: &Path) -> Self {
        Self {
            state: FileState::Skipped,
            ..Self::new(path)
        }
    }

    pub fn failed(path: &Path, kind: FailureKind, message: impl Into<String>) -> Self {
        let mut result = Self::new(path);
        result.fail(kind, message, false);
        result
    }

    pub fn fail(&mut self, kind: FailureKind, message: impl Into<String>, fatal: bool) {
        self.state = FileState::Failed(kind);
        self.error = Some(FileError {
            kind,
            message: message.into(),
            fatal,
        });
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.state, FileState::Failed(_))
    }

    /// The content on disk differs (or would differ, in a dry run) after the run.
    pub fn is_changed(&self) -> bool {
        matches!(self.state, FileState::Written | FileState::WouldChange)
    }

    pub fn aborts_run(&self) -> bool {
        self.error.as_ref().is_some_and(|e| e.fatal)
    }

    pub fn applied_fixes(&self) -> usize {
        self.outcomes.iter().filter(|o| o.applied).count()
    }

    pub fn rejected_fixes(&self) -> usize {
        self.outcomes.iter().filter(|o| o.rejected).count()
    }

    pub fn fix_errors(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_error()).count()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunCounts {
    pub files_processed: usize,
    pub files_changed: usize,
    pub files_failed: usize,
    pub files_skipped: usize,
    /// Fixes that made it into accepted content.
    pub fixes_applied: usize,
    /// Fixes discarded with their file's candidate by the validation gate.
    pub fixes_rejected: usize,
    pub fix_errors: usize,
}

impl RunCounts {
    pub fn tally(results: &[FileRunResult]) -> Self {
        let mut counts = RunCounts::default();
        for result in results {
            if result.state == FileState::Skipped {
                counts.files_skipped += 1;
                continue;
            }
            counts.files_processed += 1;
            counts.fix_errors += result.fix_errors();
            match result.state {
                FileState::Written | FileState::WouldChange => {
                    counts.files_changed += 1;
                    counts.fixes_applied += result.applied_fixes();
                }
                FileState::Rejected => counts.fixes_rejected += result.rejected_fixes(),
                FileState::Failed(_) => counts.files_failed += 1,
                _ => {}
            }
        }
        counts
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub dry_run: bool,
    pub results: Vec<FileRunResult>,
    pub counts: RunCounts,
    /// The caller cancelled the run; files not yet started were skipped.
    pub cancelled: bool,
    /// Why the run stopped early on its own, if it did.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aborted: Option<String>,
}

impl RunReport {
    pub fn has_failures(&self) -> bool {
        self.counts.files_failed > 0 || self.aborted.is_some()
    }

    pub fn changed_files(&self) -> impl Iterator<Item = &FileRunResult> {
        self.results.iter().filter(|r| r.is_changed())
    }

    /// JSON form of the report. File contents are left out unless asked
    /// for; then every changed file also carries its `final_content`.
    pub fn to_json(&self, include_content: bool) -> serde_json::Result<serde_json::Value> {
        let mut value = serde_json::to_value(self)?;
        if !include_content {
            return Ok(value);
        }
        if let Some(results) = value.get_mut("results").and_then(|r| r.as_array_mut()) {
            for (json, result) in results.iter_mut().zip(&self.results) {
                if !result.is_changed() {
                    continue;
                }
                if let Some(object) = json.as_object_mut() {
                    object.insert(
                        "final_content".to_string(),
                        serde_json::Value::String(result.final_content.clone()),
                    );
                }
            }
        }
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(applied: bool, error: Option<&str>) -> FixOutcome {
        FixOutcome {
            rule_id: "R".to_string(),
            line: 1,
            applied,
            rejected: false,
            description: String::new(),
            content_before: String::new(),
            content_after: String::new(),
            unified_diff: String::new(),
            skipped_edits: Vec::new(),
            error: error.map(str::to_string),
            score: None,
        }
    }

    fn with_state(state: FileState, outcomes: Vec<FixOutcome>) -> FileRunResult {
        let mut r = FileRunResult::new(Path::new("a.ps1"));
        r.state = state;
        r.outcomes = outcomes;
        r
    }

    fn rejected() -> FixOutcome {
        let mut o = outcome(true, None);
        o.mark_rejected();
        o
    }

    #[test]
    fn test_tally() {
        let results = vec![
            with_state(FileState::Written, vec![outcome(true, None), outcome(true, None)]),
            with_state(FileState::Rejected, vec![rejected()]),
            with_state(FileState::Unchanged, vec![outcome(false, Some("boom"))]),
            FileRunResult::failed(Path::new("b.ps1"), FailureKind::Backup, "disk"),
            FileRunResult::skipped(Path::new("c.ps1")),
        ];
        let counts = RunCounts::tally(&results);
        assert_eq!(
            counts,
            RunCounts {
                files_processed: 4,
                files_changed: 1,
                files_failed: 1,
                files_skipped: 1,
                fixes_applied: 2,
                fixes_rejected: 1,
                fix_errors: 1,
            }
        );
    }

    #[test]
    fn test_rejected_outcome_is_not_applied() {
        let o = rejected();
        assert!(!o.applied);
        assert!(o.rejected);
        let json = serde_json::to_value(&o).unwrap();
        assert_eq!(json["applied"], false);
        assert_eq!(json["rejected"], true);
        assert!(serde_json::to_value(outcome(true, None)).unwrap().get("rejected").is_none());
    }

    #[test]
    fn test_final_content_is_opt_in() {
        let mut written = with_state(FileState::Written, vec![outcome(true, None)]);
        written.final_content = "Write-Output 'x'\n".to_string();
        let mut unchanged = with_state(FileState::Unchanged, Vec::new());
        unchanged.final_content = "kept".to_string();
        let report = RunReport {
            run_id: Uuid::nil(),
            started_at: Utc::now(),
            finished_at: Utc::now(),
            dry_run: false,
            counts: RunCounts::tally(&[]),
            results: vec![written, unchanged],
            cancelled: false,
            aborted: None,
        };

        let plain = report.to_json(false).unwrap();
        assert!(plain["results"][0].get("final_content").is_none());
        let full = report.to_json(true).unwrap();
        assert_eq!(full["results"][0]["final_content"], "Write-Output 'x'\n");
        assert!(full["results"][1].get("final_content").is_none());
    }

    #[test]
    fn test_file_state_serialization() {
        let failed = serde_json::to_value(FileState::Failed(FailureKind::Timeout)).unwrap();
        assert_eq!(failed, serde_json::json!({"failed": "timeout"}));
        let written = serde_json::to_value(FileState::Written).unwrap();
        assert_eq!(written, serde_json::json!("written"));
    }
}
