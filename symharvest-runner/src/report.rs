//! Run telemetry: progress and per-batch / per-pass statistics.
//!
//! The scheduler calls the reporter from its control thread only. Reporting
//! is advisory: nothing here feeds back into scheduling.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tracing::{info, warn};

use crate::scheduler::{HarvestOutcome, StopReason};

/// Snapshot after one completed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    /// Descriptors that have produced a successful outcome, across all passes.
    pub completed: usize,
    /// Descriptors the run started with.
    pub total: usize,
    /// Current size of the error set.
    pub outstanding_errors: usize,
    /// Distinct symbols merged so far.
    pub symbols: usize,
}

impl Progress {
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            100.0
        } else {
            self.completed as f64 * 100.0 / self.total as f64
        }
    }
}

/// Statistics for one chunk of one pass.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchStats {
    pub pass: usize,
    pub batch: usize,
    pub batches_in_pass: usize,
    pub size: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub elapsed: Duration,
    pub outstanding_errors: usize,
    pub symbols: usize,
}

impl BatchStats {
    pub fn per_request(&self) -> Duration {
        per_request(self.elapsed, self.size)
    }
}

/// Statistics for one full pass over the pending list.
#[derive(Debug, Clone, PartialEq)]
pub struct PassStats {
    pub pass: usize,
    pub submitted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub abandoned: usize,
    pub skipped_documents: usize,
    pub elapsed: Duration,
    pub outstanding_errors: usize,
    pub symbols: usize,
}

impl PassStats {
    pub fn per_request(&self) -> Duration {
        per_request(self.elapsed, self.submitted)
    }
}

fn per_request(elapsed: Duration, count: usize) -> Duration {
    match u32::try_from(count) {
        Ok(0) | Err(_) => Duration::ZERO,
        Ok(n) => elapsed / n,
    }
}

/// Observer for harvest runs.
pub trait RunReporter {
    /// Called once before the first pass.
    fn on_run_start(&self, total: usize, batch_size: usize, concurrency: usize);

    /// Called before each pass with the number of pending descriptors.
    fn on_pass_start(&self, pass: usize, pending: usize);

    /// Called after every outcome has been folded in.
    fn on_progress(&self, progress: &Progress);

    /// Called when a chunk has fully drained.
    fn on_batch_complete(&self, stats: &BatchStats);

    /// Called after the last chunk of a pass.
    fn on_pass_complete(&self, stats: &PassStats);

    /// Called once when the run stops, for whatever reason.
    fn on_run_complete(&self, outcome: &HarvestOutcome);
}

/// Reporter that discards everything.
pub struct SilentReporter;

impl RunReporter for SilentReporter {
    fn on_run_start(&self, _total: usize, _batch_size: usize, _concurrency: usize) {}
    fn on_pass_start(&self, _pass: usize, _pending: usize) {}
    fn on_progress(&self, _progress: &Progress) {}
    fn on_batch_complete(&self, _stats: &BatchStats) {}
    fn on_pass_complete(&self, _stats: &PassStats) {}
    fn on_run_complete(&self, _outcome: &HarvestOutcome) {}
}

/// Reporter that emits structured `tracing` events.
///
/// Progress is throttled to roughly `progress_steps` events per run so a
/// multi-million request harvest does not flood the log. Failures report
/// progress without advancing `completed`, so each `completed` value is
/// logged at most once.
pub struct TracingReporter {
    progress_steps: usize,
    last_logged: AtomicUsize,
}

impl TracingReporter {
    pub fn new(progress_steps: usize) -> Self {
        Self {
            progress_steps: progress_steps.max(1),
            last_logged: AtomicUsize::new(usize::MAX),
        }
    }

    fn should_log(&self, p: &Progress) -> bool {
        let due = if p.completed == 0 || p.completed >= p.total {
            p.completed == p.total
        } else {
            let step = (p.total / self.progress_steps).max(1);
            p.completed % step == 0
        };
        due && self.last_logged.swap(p.completed, Ordering::Relaxed) != p.completed
    }
}

impl Default for TracingReporter {
    fn default() -> Self {
        Self::new(100)
    }
}

impl RunReporter for TracingReporter {
    fn on_run_start(&self, total: usize, batch_size: usize, concurrency: usize) {
        info!(total, batch_size, concurrency, "Requesting data from {total} urls");
    }

    fn on_pass_start(&self, pass: usize, pending: usize) {
        if pass > 1 {
            info!(pass, pending, "retrying failed lookups");
        }
    }

    fn on_progress(&self, p: &Progress) {
        if self.should_log(p) {
            info!(
                completed = p.completed,
                total = p.total,
                errors = p.outstanding_errors,
                symbols = p.symbols,
                "progress {:>3.0}% ({} / {})",
                p.percent(),
                p.completed,
                p.total
            );
        }
    }

    fn on_batch_complete(&self, s: &BatchStats) {
        info!(
            pass = s.pass,
            batch = s.batch,
            of = s.batches_in_pass,
            size = s.size,
            failed = s.failed,
            elapsed_s = %format!("{:.3}", s.elapsed.as_secs_f64()),
            per_url_s = %format!("{:.3}", s.per_request().as_secs_f64()),
            total_errors = s.outstanding_errors,
            total_symbols = s.symbols,
            "batch completed"
        );
    }

    fn on_pass_complete(&self, s: &PassStats) {
        info!(
            pass = s.pass,
            submitted = s.submitted,
            succeeded = s.succeeded,
            failed = s.failed,
            abandoned = s.abandoned,
            skipped_documents = s.skipped_documents,
            elapsed_s = %format!("{:.3}", s.elapsed.as_secs_f64()),
            per_url_s = %format!("{:.3}", s.per_request().as_secs_f64()),
            outstanding = s.outstanding_errors,
            symbols = s.symbols,
            "pass completed"
        );
    }

    fn on_run_complete(&self, outcome: &HarvestOutcome) {
        match outcome.stop_reason {
            StopReason::Converged => info!(
                passes = outcome.passes,
                symbols = outcome.symbols,
                "harvest converged"
            ),
            StopReason::PassLimit => warn!(
                passes = outcome.passes,
                unresolved = outcome.unresolved.len(),
                symbols = outcome.symbols,
                "pass limit reached; results are partial"
            ),
            StopReason::Cancelled => warn!(
                passes = outcome.passes,
                unresolved = outcome.unresolved.len(),
                unsubmitted = outcome.unsubmitted,
                symbols = outcome.symbols,
                "harvest cancelled; results are partial"
            ),
        }
        if !outcome.abandoned.is_empty() {
            warn!(
                abandoned = outcome.abandoned.len(),
                "lookups dropped after non-retryable failures"
            );
        }
    }
}
