//! Remedy engine
//!
//! The single entry point used by the CLI: discover files, check that the
//! detector and parsers are usable, then run every file through the fix
//! pipeline on the worker pool and gather a [`RunReport`].

pub mod coordinator;
pub mod pipeline;
pub mod report;


pub use coordinator::{CancellationToken, CoordinatorOptions};
pub use pipeline::{Pipeline, PipelineError};
pub use report::{FailureKind, FileError, FileRunResult, FileState, RunCounts, RunReport};

use chrono::Utc;
use remedy_adapters::backup::BackupStore;
use remedy_adapters::discover::{discover_files, DiscoverError, DiscoverOptions};
use remedy_adapters::persist::{ContentWriter, Persister};
use remedy_core::detect::{Detector, DetectorError, RuleDetector};
use remedy_core::dispatch::Dispatcher;
use remedy_core::parser::{Language, ParserError, ParserSet};
use remedy_core::registry::{RegistryError, RuleRegistry};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// What to fix and how.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemediationRequest {
    pub paths: Vec<PathBuf>,
    /// `None` runs the registry's default rule set.
    pub enabled_rule_ids: Option<BTreeSet<String>>,
    pub dry_run: bool,
    pub max_workers: Option<usize>,
    pub per_file_timeout: Option<Duration>,
}

impl RemediationRequest {
    pub fn new(paths: Vec<PathBuf>) -> Self {
        Self {
            paths,
            ..Self::default()
        }
    }
}

/// Problems that stop a run before any file is touched.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Rule(#[from] RegistryError),
    #[error(transparent)]
    Discover(#[from] DiscoverError),
    #[error("detector '{name}' is not usable: {source}")]
    Detector {
        name: String,
        #[source]
        source: DetectorError,
    },
    #[error(transparent)]
    Parser(#[from] ParserError),
}

pub struct Engine {
    registry: Arc<RuleRegistry>,
    detector: Option<Arc<dyn Detector>>,
    parsers: ParserSet,
    backups: BackupStore,
    discover: DiscoverOptions,
    writer: Option<Arc<dyn ContentWriter>>,
}

impl Engine {
    pub fn new(registry: Arc<RuleRegistry>) -> Self {
        Self {
            registry,
            detector: None,
            parsers: ParserSet::default(),
            backups: BackupStore::default(),
            discover: DiscoverOptions::default(),
            writer: None,
        }
    }

    /// Replace the built-in rule checks with another violation source.
    pub fn with_detector(mut self, detector: Arc<dyn Detector>) -> Self {
        self.detector = Some(detector);
        self
    }

    pub fn with_parsers(mut self, parsers: ParserSet) -> Self {
        self.parsers = parsers;
        self
    }

    pub fn with_backup_store(mut self, backups: BackupStore) -> Self {
        self.backups = backups;
        self
    }

    pub fn with_discover_options(mut self, discover: DiscoverOptions) -> Self {
        self.discover = discover;
        self
    }

    pub fn with_writer(mut self, writer: Arc<dyn ContentWriter>) -> Self {
        self.writer = Some(writer);
        self
    }

    pub fn registry(&self) -> &RuleRegistry {
        &self.registry
    }

    /// Fix every file under `request.paths`.
    ///
    /// Errors only for problems found before the first file is read. Once
    /// files are being processed, every failure is reported per file and the
    /// report is always returned.
    pub fn run_remediation(
        &self,
        request: &RemediationRequest,
        cancel: &CancellationToken,
    ) -> Result<RunReport, EngineError> {
        let enabled = self.resolve_enabled(request.enabled_rule_ids.as_ref())?;
        let files = discover_files(&request.paths, &self.discover)?;

        let detector: Arc<dyn Detector> = match &self.detector {
            Some(detector) => detector.clone(),
            None => Arc::new(RuleDetector::new(self.registry.clone()).limited_to(enabled.clone())),
        };
        detector.probe().map_err(|source| EngineError::Detector {
            name: detector.name().to_string(),
            source,
        })?;
        let mut languages: Vec<Language> = Vec::new();
        for language in files.iter().map(|f| Language::from_path(f)) {
            if !languages.contains(&language) {
                languages.push(language);
            }
        }
        self.parsers.probe(&languages)?;

        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        tracing::info!(
            %run_id,
            files = files.len(),
            rules = enabled.len(),
            dry_run = request.dry_run,
            "remediation started"
        );

        let mut persister = Persister::new(self.backups.clone()).with_run_id(run_id);
        if let Some(writer) = &self.writer {
            persister = persister.with_writer(writer.clone());
        }
        let pipeline = Pipeline::new(
            Dispatcher::new(self.registry.clone(), enabled),
            self.parsers.clone(),
            detector,
            persister,
            request.dry_run,
        );
        let options = CoordinatorOptions {
            max_workers: request.max_workers,
            per_file_timeout: request.per_file_timeout,
        };
        let outcome = coordinator::run(
            &files,
            |path, deadline| pipeline.run_file(path, deadline),
            &options,
            cancel,
        );

        let counts = RunCounts::tally(&outcome.results);
        tracing::info!(
            %run_id,
            processed = counts.files_processed,
            changed = counts.files_changed,
            failed = counts.files_failed,
            cancelled = outcome.cancelled,
            "remediation finished"
        );
        Ok(RunReport {
            run_id,
            started_at,
            finished_at: Utc::now(),
            dry_run: request.dry_run,
            results: outcome.results,
            counts,
            cancelled: outcome.cancelled,
            aborted: outcome.aborted,
        })
    }

    fn resolve_enabled(
        &self,
        requested: Option<&BTreeSet<String>>,
    ) -> Result<BTreeSet<String>, RegistryError> {
        match requested {
            None => Ok(self.registry.default_enabled()),
            Some(ids) => {
                let ids: Vec<String> = ids.iter().cloned().collect();
                self.registry.resolve_enabled(Some(&ids), &[])
            }
        }
    }
}
