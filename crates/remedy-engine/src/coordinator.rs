//! Parallel coordinator
//!
//! Spreads files over a bounded rayon pool. Each file runs its whole
//! pipeline on one worker; cancellation and run aborts are only observed
//! between files, so an in-flight file is never left half-persisted.

use crate::report::{FailureKind, FileRunResult};
use rayon::prelude::*;
use remedy_core::dispatch::panic_message;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

// Per-file panic containment relies on unwinding.
#[cfg(not(panic = "unwind"))]
compile_error!("remedy-engine must be built with panic = \"unwind\"");

/// Shared cancel flag. Clones observe the same signal.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CoordinatorOptions {
    /// Upper bound on worker threads; `None` uses twice the core count.
    pub max_workers: Option<usize>,
    pub per_file_timeout: Option<Duration>,
}

#[derive(Debug)]
pub struct RunOutcome {
    /// One entry per input file, in input order.
    pub results: Vec<FileRunResult>,
    pub cancelled: bool,
    pub aborted: Option<String>,
}

/// `min(2 x logical cores, max_workers)`, never below one.
pub fn effective_workers(max_workers: Option<usize>) -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    let cap = cores * 2;
    max_workers.map_or(cap, |m| m.min(cap)).max(1)
}

/// Run `pipeline_fn` over every file.
pub fn run<F>(
    files: &[PathBuf],
    pipeline_fn: F,
    options: &CoordinatorOptions,
    cancel: &CancellationToken,
) -> RunOutcome
where
    F: Fn(&Path, Option<Instant>) -> FileRunResult + Sync,
{
    let stop = AtomicBool::new(false);
    let abort_reason: OnceLock<String> = OnceLock::new();

    let process = |path: &PathBuf| -> FileRunResult {
        if cancel.is_cancelled() || stop.load(Ordering::SeqCst) {
            return FileRunResult::skipped(path);
        }
        let deadline = options.per_file_timeout.map(|limit| Instant::now() + limit);
        let attempt = panic::catch_unwind(AssertUnwindSafe(|| {
            pipeline_fn(path.as_path(), deadline)
        }));
        let result = match attempt {
            Ok(result) => result,
            Err(payload) => {
                let detail = panic_message(payload.as_ref());
                tracing::error!(path = %path.display(), panic = %detail, "file pipeline panicked");
                FileRunResult::failed(
                    path,
                    FailureKind::Panicked,
                    format!("pipeline crashed unexpectedly: {}", detail),
                )
            }
        };
        if result.aborts_run() {
            stop.store(true, Ordering::SeqCst);
            let reason = result
                .error
                .as_ref()
                .map(|e| e.message.clone())
                .unwrap_or_default();
            let _ = abort_reason.set(reason);
        }
        result
    };

    let workers = effective_workers(options.max_workers);
    tracing::debug!(files = files.len(), workers, "starting run");
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .thread_name(|i| format!("remedy-worker-{}", i))
        .build();
    let results: Vec<FileRunResult> = match pool {
        Ok(pool) => pool.install(|| files.par_iter().map(|path| process(path)).collect()),
        Err(err) => {
            tracing::warn!(error = %err, "could not build worker pool, running sequentially");
            files.iter().map(process).collect()
        }
    };

    RunOutcome {
        results,
        cancelled: cancel.is_cancelled(),
        aborted: abort_reason.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::FileState;
    use std::sync::atomic::AtomicUsize;

    fn paths(n: usize) -> Vec<PathBuf> {
        (0..n).map(|i| PathBuf::from(format!("f{}.ps1", i))).collect()
    }

    fn unchanged(path: &Path) -> FileRunResult {
        let mut r = FileRunResult::new(path);
        r.state = FileState::Unchanged;
        r
    }

    #[test]
    fn test_effective_workers_bounds() {
        let cap = effective_workers(None);
        assert!(cap >= 2);
        assert_eq!(effective_workers(Some(1)), 1);
        assert_eq!(effective_workers(Some(0)), 1);
        assert_eq!(effective_workers(Some(usize::MAX)), cap);
    }

    #[test]
    fn test_results_keep_input_order() {
        let files = paths(50);
        let outcome = run(
            &files,
            |path: &Path, _| unchanged(path),
            &CoordinatorOptions {
                max_workers: Some(4),
                ..Default::default()
            },
            &CancellationToken::new(),
        );
        let got: Vec<&PathBuf> = outcome.results.iter().map(|r| &r.path).collect();
        assert_eq!(got, files.iter().collect::<Vec<_>>());
        assert!(!outcome.cancelled);
        assert!(outcome.aborted.is_none());
    }

    #[test]
    fn test_panic_is_contained() {
        let files = paths(3);
        let outcome = run(
            &files,
            |path: &Path, _| {
                if path == Path::new("f1.ps1") {
                    panic!("fixer blew up");
                }
                unchanged(path)
            },
            &CoordinatorOptions::default(),
            &CancellationToken::new(),
        );
        assert_eq!(outcome.results[0].state, FileState::Unchanged);
        assert_eq!(
            outcome.results[1].state,
            FileState::Failed(FailureKind::Panicked)
        );
        let message = &outcome.results[1].error.as_ref().unwrap().message;
        assert!(message.contains("fixer blew up"));
        assert_eq!(outcome.results[2].state, FileState::Unchanged);
    }

    #[test]
    fn test_cancel_skips_files_not_started() {
        let files = paths(20);
        let cancel = CancellationToken::new();
        let seen = AtomicUsize::new(0);
        let outcome = run(
            &files,
            |path: &Path, _| {
                if seen.fetch_add(1, Ordering::SeqCst) == 4 {
                    cancel.cancel();
                }
                unchanged(path)
            },
            &CoordinatorOptions {
                max_workers: Some(1),
                ..Default::default()
            },
            &cancel,
        );
        assert!(outcome.cancelled);
        let processed = outcome
            .results
            .iter()
            .filter(|r| r.state == FileState::Unchanged)
            .count();
        let skipped = outcome
            .results
            .iter()
            .filter(|r| r.state == FileState::Skipped)
            .count();
        assert_eq!(processed, 5);
        assert_eq!(skipped, 15);
    }

    #[test]
    fn test_fatal_failure_stops_the_run() {
        let files = paths(10);
        let outcome = run(
            &files,
            |path: &Path, _| {
                let mut r = FileRunResult::new(path);
                r.fail(FailureKind::Detector, "detector unavailable: gone", true);
                r
            },
            &CoordinatorOptions {
                max_workers: Some(1),
                ..Default::default()
            },
            &CancellationToken::new(),
        );
        assert_eq!(outcome.aborted.as_deref(), Some("detector unavailable: gone"));
        let failed = outcome.results.iter().filter(|r| r.is_failed()).count();
        let skipped = outcome
            .results
            .iter()
            .filter(|r| r.state == FileState::Skipped)
            .count();
        assert_eq!((failed, skipped), (1, 9));
    }

    #[test]
    fn test_deadline_is_passed_per_file() {
        let files = paths(2);
        let outcome = run(
            &files,
            |path: &Path, deadline: Option<Instant>| {
                assert!(deadline.is_some());
                unchanged(path)
            },
            &CoordinatorOptions {
                max_workers: Some(2),
                per_file_timeout: Some(Duration::from_secs(30)),
            },
            &CancellationToken::new(),
        );
        assert!(outcome.results.iter().all(|r| r.state == FileState::Unchanged));
    }
}
