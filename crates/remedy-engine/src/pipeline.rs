//! Per-file pipeline
//!
//! read -> detect -> fix chain -> validate -> persist. One instance of the
//! pipeline owns one file's content from start to finish; the only shared
//! state is the read-only dispatcher, parser set and detector.

use crate::report::{FailureKind, FileRunResult, FileState};
use remedy_adapters::backup::BackupRecord;
use remedy_adapters::persist::{PersistError, Persister};
use remedy_core::detect::{Detector, DetectorError};
use remedy_core::diff::unified_diff;
use remedy_core::dispatch::{ChainResult, Dispatcher};
use remedy_core::parser::{ParseReport, ParserError, ParserSet, SourceParser};
use remedy_core::score;
use remedy_core::validate::validate_against;
use remedy_core::FixOutcome;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("could not read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{path} is not valid UTF-8: {source}")]
    Encoding {
        path: PathBuf,
        #[source]
        source: std::string::FromUtf8Error,
    },
    #[error(transparent)]
    Detector(#[from] DetectorError),
    #[error(transparent)]
    Parser(#[from] ParserError),
    #[error(transparent)]
    Persist(#[from] PersistError),
    #[error("per-file timeout exceeded before {stage}")]
    Timeout { stage: &'static str },
}

impl PipelineError {
    pub fn kind(&self) -> FailureKind {
        match self {
            PipelineError::Read { .. } => FailureKind::Io,
            PipelineError::Encoding { .. } => FailureKind::Encoding,
            PipelineError::Detector(_) => FailureKind::Detector,
            PipelineError::Parser(_) => FailureKind::Parser,
            PipelineError::Persist(err) => match err {
                PersistError::Lock { .. } | PersistError::Read { .. } => FailureKind::Io,
                PersistError::StaleContent { .. } => FailureKind::StaleContent,
                PersistError::Backup { .. } => FailureKind::Backup,
                PersistError::Write { .. } => FailureKind::Write,
            },
            PipelineError::Timeout { .. } => FailureKind::Timeout,
        }
    }

    /// An unavailable detector or parser will fail every other file too.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            PipelineError::Detector(DetectorError::Unavailable(_))
                | PipelineError::Parser(ParserError::Unavailable(_))
        )
    }

    fn backup(&self) -> Option<&BackupRecord> {
        match self {
            PipelineError::Persist(err) => err.backup(),
            _ => None,
        }
    }
}

#[derive(Clone)]
pub struct Pipeline {
    dispatcher: Dispatcher,
    parsers: ParserSet,
    detector: Arc<dyn Detector>,
    persister: Persister,
    dry_run: bool,
}

impl Pipeline {
    pub fn new(
        dispatcher: Dispatcher,
        parsers: ParserSet,
        detector: Arc<dyn Detector>,
        persister: Persister,
        dry_run: bool,
    ) -> Self {
        Self {
            dispatcher,
            parsers,
            detector,
            persister,
            dry_run,
        }
    }

    pub fn dry_run(&self) -> bool {
        self.dry_run
    }

    /// Run every stage for `path`. Never panics on bad input and never
    /// returns an error: failures are recorded on the result.
    pub fn run_file(&self, path: &Path, deadline: Option<Instant>) -> FileRunResult {
        let started = Instant::now();
        let mut result = FileRunResult::new(path);

        if let Err(err) = self.run_stages(path, deadline, &mut result) {
            if let Some(backup) = err.backup() {
                result.backup = Some(backup.clone());
            }
            let fatal = err.is_fatal();
            if fatal {
                tracing::error!(path = %path.display(), error = %err, "aborting run");
            } else {
                tracing::warn!(path = %path.display(), error = %err, "file failed");
            }
            result.fail(err.kind(), err.to_string(), fatal);
        }

        result.elapsed_ms = started.elapsed().as_millis() as u64;
        result
    }

    fn run_stages(
        &self,
        path: &Path,
        deadline: Option<Instant>,
        result: &mut FileRunResult,
    ) -> Result<(), PipelineError> {
        check_deadline(deadline, "read")?;
        let bytes = fs::read(path).map_err(|source| PipelineError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let original = String::from_utf8(bytes).map_err(|source| PipelineError::Encoding {
            path: path.to_path_buf(),
            source,
        })?;
        result.original_content = original.clone();
        result.final_content = original.clone();

        check_deadline(deadline, "detect")?;
        let violations = self.detector.detect(path, &original)?;
        tracing::debug!(
            path = %path.display(),
            detector = self.detector.name(),
            violations = violations.len(),
            "detected"
        );
        if violations.is_empty() {
            result.state = FileState::Unchanged;
            return Ok(());
        }

        let parser = self.parsers.for_language(result.language)?;
        let before = parser.parse(&original)?;

        check_deadline(deadline, "fix chain")?;
        let label = path.display().to_string();
        let chain = self.dispatcher.run_chain(&label, &original, &violations);
        let changed = chain.changed_from(&original);
        let ChainResult {
            final_content: candidate,
            outcomes,
            unhandled,
        } = chain;
        result.outcomes = outcomes;
        result.unhandled = unhandled;
        if !changed {
            result.state = FileState::Unchanged;
            return Ok(());
        }

        check_deadline(deadline, "validation")?;
        let validation = validate_against(parser.as_ref(), &before, &original, &candidate)?;
        if !validation.accepted {
            tracing::warn!(
                path = %path.display(),
                reason = %validation.reason,
                "candidate rejected, keeping original content"
            );
            result.state = FileState::Rejected;
            result.outcomes.iter_mut().for_each(FixOutcome::mark_rejected);
            result.validation = Some(validation);
            return Ok(());
        }

        self.score_outcomes(parser.as_ref(), &before, result)?;
        result.score = validation.score.clone();
        result.diff = unified_diff(&label, &original, &candidate).to_string();
        result.validation = Some(validation);
        result.final_content = candidate;

        check_deadline(deadline, "persist")?;
        let persisted = self
            .persister
            .persist(path, &original, &result.final_content, self.dry_run)?;
        result.backup = persisted.backup;
        result.state = if persisted.written {
            FileState::Written
        } else {
            FileState::WouldChange
        };
        if let Some(score) = &result.score {
            tracing::info!(
                path = %path.display(),
                fixes = result.applied_fixes(),
                score = score.value,
                dry_run = self.dry_run,
                "file fixed"
            );
        }
        Ok(())
    }

    /// Score each applied fix against the content it started from. Consecutive
    /// applied outcomes share a snapshot, so each side is parsed once.
    fn score_outcomes(
        &self,
        parser: &dyn SourceParser,
        original_report: &ParseReport,
        result: &mut FileRunResult,
    ) -> Result<(), PipelineError> {
        let mut previous = original_report.clone();
        for outcome in result.outcomes.iter_mut().filter(|o| o.applied) {
            let after = parser.parse(&outcome.content_after)?;
            let diff = unified_diff(&outcome.rule_id, &outcome.content_before, &outcome.content_after);
            outcome.score = Some(score::score(
                &previous,
                &after,
                &outcome.content_before,
                &outcome.content_after,
                &diff,
            ));
            previous = after;
        }
        Ok(())
    }
}

fn check_deadline(deadline: Option<Instant>, stage: &'static str) -> Result<(), PipelineError> {
    match deadline {
        Some(deadline) if Instant::now() >= deadline => Err(PipelineError::Timeout { stage }),
        _ => Ok(()),
    }
}
