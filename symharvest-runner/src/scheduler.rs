//! Batch scheduler: drives the pool chunk by chunk and retries failures.
//!
//! A run is a sequence of passes. Each pass walks its pending list in chunks
//! of `batch_size`; a chunk is fully drained before the next one is submitted.
//! Every outcome is folded in on the calling thread: successes are merged
//! into the aggregator and cleared from the error set, failures are added to
//! it. The error set left at the end of a pass is the next pass's input. The
//! run converges when a pass ends with an empty error set.
//!
//! Optional stop conditions: a pass cap, a cancellation flag checked between
//! chunks, and a retry policy that drops permanent failures instead of
//! retrying them forever.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use symharvest_core::domain::{FetchError, FetchOutcome, LookupQuery};
use symharvest_core::{Aggregator, LookupIssuer, ResultMap};

use crate::pool::FetchPool;
use crate::report::{BatchStats, PassStats, Progress, RunReporter};

pub const DEFAULT_BATCH_SIZE: usize = 400;

/// What to do with a failure that will not go away by retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryPolicy {
    /// Retry every failure until it succeeds.
    #[default]
    RetryAll,
    /// Drop failures whose error is not retryable (4xx, malformed payload).
    TransientOnly,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerConfig {
    pub batch_size: usize,
    /// `None` retries until convergence.
    pub max_passes: Option<usize>,
    pub retry_policy: RetryPolicy,
    /// Pause before the second pass; doubles each pass up to `max_pass_delay`.
    /// Zero disables the pause.
    pub pass_delay: Duration,
    pub max_pass_delay: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            max_passes: None,
            retry_policy: RetryPolicy::RetryAll,
            pass_delay: Duration::ZERO,
            max_pass_delay: Duration::from_secs(30),
        }
    }
}

impl SchedulerConfig {
    /// Delay before pass `next_pass` (2-based; the first pass never waits).
    pub fn delay_before(&self, next_pass: usize) -> Duration {
        if self.pass_delay.is_zero() || next_pass < 2 {
            return Duration::ZERO;
        }
        let doublings = u32::try_from(next_pass - 2).unwrap_or(u32::MAX).min(31);
        self.pass_delay
            .checked_mul(1u32 << doublings)
            .unwrap_or(self.max_pass_delay)
            .min(self.max_pass_delay)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchedulerError {
    #[error("batch size must be at least 1")]
    ZeroBatchSize,

    #[error("max passes must be at least 1 when set")]
    ZeroMaxPasses,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// A pass finished with no outstanding failures.
    Converged,
    /// `max_passes` passes ran and failures remain.
    PassLimit,
    /// The cancellation flag was raised.
    Cancelled,
}

/// Summary of a finished run. The merged records live in the aggregator.
#[derive(Debug, Clone)]
pub struct HarvestOutcome {
    pub stop_reason: StopReason,
    pub passes: usize,
    /// Descriptors the run started with.
    pub total: usize,
    /// Issuer invocations across all passes.
    pub requests: usize,
    /// Descriptors that eventually succeeded.
    pub completed: usize,
    /// Distinct symbols in the aggregator when the run stopped.
    pub symbols: usize,
    /// Documents dropped for a missing symbol.
    pub skipped_documents: usize,
    /// Descriptors whose latest attempt failed. After a cancelled retry pass
    /// this includes the ones that pass never reached.
    pub unresolved: Vec<LookupQuery>,
    /// First-pass descriptors never submitted because the run was cancelled.
    /// Only counted: the remainder of a lazy source is never materialized.
    pub unsubmitted: usize,
    /// Dropped under [`RetryPolicy::TransientOnly`].
    pub abandoned: Vec<(LookupQuery, FetchError)>,
    pub elapsed: Duration,
}

impl HarvestOutcome {
    /// Every descriptor succeeded.
    pub fn is_complete(&self) -> bool {
        self.stop_reason == StopReason::Converged && self.abandoned.is_empty()
    }
}

/// Mutable bookkeeping owned by the control thread for one run.
struct RunState {
    total: usize,
    errors: BTreeSet<LookupQuery>,
    abandoned: Vec<(LookupQuery, FetchError)>,
    completed: usize,
    requests: usize,
    skipped_documents: usize,
}

enum PassEnd {
    Finished,
    /// `remaining` is the number of descriptors the pass did not submit.
    Cancelled { remaining: usize },
}

pub struct BatchScheduler<'r> {
    pool: FetchPool,
    config: SchedulerConfig,
    reporter: &'r dyn RunReporter,
    cancel: Option<Arc<AtomicBool>>,
}

impl<'r> BatchScheduler<'r> {
    pub fn new(
        pool: FetchPool,
        config: SchedulerConfig,
        reporter: &'r dyn RunReporter,
    ) -> Result<Self, SchedulerError> {
        if config.batch_size == 0 {
            return Err(SchedulerError::ZeroBatchSize);
        }
        if config.max_passes == Some(0) {
            return Err(SchedulerError::ZeroMaxPasses);
        }
        Ok(Self {
            pool,
            config,
            reporter,
            cancel: None,
        })
    }

    /// Stop between chunks once `flag` is set.
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }

    /// Harvest into a fresh aggregator and return its map.
    pub fn run_to_map<D, I>(&self, descriptors: D, issuer: &I) -> (ResultMap, HarvestOutcome)
    where
        D: IntoIterator<Item = LookupQuery>,
        D::IntoIter: ExactSizeIterator,
        I: LookupIssuer + ?Sized,
    {
        let mut aggregator = Aggregator::new();
        let outcome = self.run(&mut aggregator, descriptors, issuer);
        (aggregator.into_results(), outcome)
    }

    /// Run passes over `descriptors` until convergence or a stop condition,
    /// merging into `aggregator`. Descriptors are pulled lazily, one chunk at
    /// a time, during the first pass.
    pub fn run<D, I>(&self, aggregator: &mut Aggregator, descriptors: D, issuer: &I) -> HarvestOutcome
    where
        D: IntoIterator<Item = LookupQuery>,
        D::IntoIter: ExactSizeIterator,
        I: LookupIssuer + ?Sized,
    {
        let started = Instant::now();
        let descriptors = descriptors.into_iter();
        let mut state = RunState {
            total: descriptors.len(),
            errors: BTreeSet::new(),
            abandoned: Vec::new(),
            completed: 0,
            requests: 0,
            skipped_documents: 0,
        };

        self.reporter
            .on_run_start(state.total, self.config.batch_size, self.pool.concurrency());

        if state.total == 0 {
            return self.finish(StopReason::Converged, 0, state, 0, aggregator, started);
        }

        let mut pass = 1;
        let mut end = self.run_pass(pass, descriptors, &mut state, aggregator, issuer);

        loop {
            if let PassEnd::Cancelled { remaining } = end {
                // Later passes draw from the error set, which still holds
                // everything they did not reach.
                let unsubmitted = if pass == 1 { remaining } else { 0 };
                return self.finish(StopReason::Cancelled, pass, state, unsubmitted, aggregator, started);
            }
            if state.errors.is_empty() {
                return self.finish(StopReason::Converged, pass, state, 0, aggregator, started);
            }
            if self.config.max_passes.is_some_and(|max| pass >= max) {
                return self.finish(StopReason::PassLimit, pass, state, 0, aggregator, started);
            }
            if self.is_cancelled() {
                return self.finish(StopReason::Cancelled, pass, state, 0, aggregator, started);
            }

            let delay = self.config.delay_before(pass + 1);
            if !delay.is_zero() {
                debug!(delay_ms = delay.as_millis() as u64, "pausing before next pass");
                std::thread::sleep(delay);
            }

            pass += 1;
            let pending: Vec<LookupQuery> = state.errors.iter().cloned().collect();
            end = self.run_pass(pass, pending.into_iter(), &mut state, aggregator, issuer);
        }
    }

    fn run_pass<P, I>(
        &self,
        pass: usize,
        mut pending: P,
        state: &mut RunState,
        aggregator: &mut Aggregator,
        issuer: &I,
    ) -> PassEnd
    where
        P: ExactSizeIterator<Item = LookupQuery>,
        I: LookupIssuer + ?Sized,
    {
        let batch_size = self.config.batch_size;
        let submitted = pending.len();
        let batches_in_pass = submitted.div_ceil(batch_size);
        self.reporter.on_pass_start(pass, submitted);

        let pass_started = Instant::now();
        let abandoned_before = state.abandoned.len();
        let skipped_before = state.skipped_documents;
        let (mut pass_ok, mut pass_failed, mut batch) = (0usize, 0usize, 0usize);

        loop {
            let chunk: Vec<LookupQuery> = pending.by_ref().take(batch_size).collect();
            if chunk.is_empty() {
                break;
            }
            if self.is_cancelled() {
                return PassEnd::Cancelled {
                    remaining: chunk.len() + pending.len(),
                };
            }
            batch += 1;

            let batch_started = Instant::now();
            let (mut ok, mut failed) = (0usize, 0usize);
            self.pool.execute_batch_with(&chunk, issuer, |query, outcome| {
                state.requests += 1;
                match outcome {
                    FetchOutcome::Success(records) => {
                        ok += 1;
                        state.completed += 1;
                        state.errors.remove(query);
                        let report = aggregator.merge_all(records, |e| {
                            warn!(query = %query, error = %e, "skipping document");
                        });
                        state.skipped_documents += report.skipped;
                    }
                    FetchOutcome::Failure(err) => {
                        failed += 1;
                        if self.config.retry_policy == RetryPolicy::TransientOnly
                            && !err.is_retryable()
                        {
                            debug!(query = %query, error = %err, "dropping lookup");
                            state.errors.remove(query);
                            state.abandoned.push((query.clone(), err));
                        } else {
                            debug!(query = %query, error = %err, "lookup failed");
                            state.errors.insert(query.clone());
                        }
                    }
                }
                self.reporter.on_progress(&Progress {
                    completed: state.completed,
                    total: state.total,
                    outstanding_errors: state.errors.len(),
                    symbols: aggregator.len(),
                });
            });

            pass_ok += ok;
            pass_failed += failed;
            self.reporter.on_batch_complete(&BatchStats {
                pass,
                batch,
                batches_in_pass,
                size: chunk.len(),
                succeeded: ok,
                failed,
                elapsed: batch_started.elapsed(),
                outstanding_errors: state.errors.len(),
                symbols: aggregator.len(),
            });
        }

        self.reporter.on_pass_complete(&PassStats {
            pass,
            submitted,
            succeeded: pass_ok,
            failed: pass_failed,
            abandoned: state.abandoned.len() - abandoned_before,
            skipped_documents: state.skipped_documents - skipped_before,
            elapsed: pass_started.elapsed(),
            outstanding_errors: state.errors.len(),
            symbols: aggregator.len(),
        });

        PassEnd::Finished
    }

    fn finish(
        &self,
        stop_reason: StopReason,
        passes: usize,
        state: RunState,
        unsubmitted: usize,
        aggregator: &Aggregator,
        started: Instant,
    ) -> HarvestOutcome {
        let unresolved: Vec<LookupQuery> = state.errors.into_iter().collect();

        let outcome = HarvestOutcome {
            stop_reason,
            passes,
            total: state.total,
            requests: state.requests,
            completed: state.completed,
            symbols: aggregator.len(),
            skipped_documents: state.skipped_documents,
            unresolved,
            unsubmitted,
            abandoned: state.abandoned,
            elapsed: started.elapsed(),
        };
        self.reporter.on_run_complete(&outcome);
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::SilentReporter;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use symharvest_core::domain::{Category, LookupRecord};

    fn queries(terms: &[&str]) -> Vec<LookupQuery> {
        terms
            .iter()
            .map(|t| LookupQuery::new(*t, Category::new("equity")))
            .collect()
    }

    fn scheduler(config: SchedulerConfig, reporter: &dyn RunReporter) -> BatchScheduler<'_> {
        BatchScheduler::new(FetchPool::new(4).unwrap(), config, reporter).unwrap()
    }

    fn ok(symbol: &str) -> FetchOutcome {
        FetchOutcome::Success(vec![LookupRecord::new(symbol, "NMS", "EQUITY")])
    }

    #[test]
    fn rejects_zero_batch_size() {
        let config = SchedulerConfig {
            batch_size: 0,
            ..Default::default()
        };
        let err = BatchScheduler::new(FetchPool::new(1).unwrap(), config, &SilentReporter)
            .err()
            .unwrap();
        assert_eq!(err, SchedulerError::ZeroBatchSize);
    }

    #[test]
    fn empty_input_converges_without_passes() {
        let s = scheduler(SchedulerConfig::default(), &SilentReporter);
        let issuer = |_: &LookupQuery| -> FetchOutcome { unreachable!() };
        let (map, outcome) = s.run_to_map(Vec::new(), &issuer);
        assert!(map.is_empty());
        assert_eq!(outcome.stop_reason, StopReason::Converged);
        assert_eq!(outcome.passes, 0);
    }

    #[test]
    fn pass_limit_returns_partial_results() {
        let config = SchedulerConfig {
            max_passes: Some(3),
            ..Default::default()
        };
        let s = scheduler(config, &SilentReporter);
        let issuer = |q: &LookupQuery| {
            if q.term == "bad" {
                FetchOutcome::Failure(FetchError::Status(500))
            } else {
                ok(&q.term.to_uppercase())
            }
        };
        let (map, outcome) = s.run_to_map(queries(&["a", "bad", "c"]), &issuer);
        assert_eq!(outcome.stop_reason, StopReason::PassLimit);
        assert_eq!(outcome.passes, 3);
        assert_eq!(outcome.unresolved, queries(&["bad"]));
        assert_eq!(outcome.requests, 3 + 1 + 1);
        assert_eq!(map.len(), 2);
        assert!(!outcome.is_complete());
    }

    #[test]
    fn transient_only_abandons_permanent_failures() {
        let config = SchedulerConfig {
            retry_policy: RetryPolicy::TransientOnly,
            ..Default::default()
        };
        let s = scheduler(config, &SilentReporter);
        let attempts = Mutex::new(HashMap::<String, usize>::new());
        let issuer = |q: &LookupQuery| {
            let n = {
                let mut a = attempts.lock().unwrap();
                let n = a.entry(q.term.clone()).or_insert(0);
                *n += 1;
                *n
            };
            match q.term.as_str() {
                "gone" => FetchOutcome::Failure(FetchError::Status(404)),
                "flaky" if n < 3 => FetchOutcome::Failure(FetchError::Status(503)),
                t => ok(&t.to_uppercase()),
            }
        };
        let (map, outcome) = s.run_to_map(queries(&["gone", "flaky", "fine"]), &issuer);
        assert_eq!(outcome.stop_reason, StopReason::Converged);
        assert_eq!(outcome.passes, 3);
        assert_eq!(outcome.abandoned.len(), 1);
        assert_eq!(outcome.abandoned[0].0.term, "gone");
        assert_eq!(attempts.lock().unwrap()["gone"], 1);
        assert_eq!(map.len(), 2);
        assert!(!outcome.is_complete());
    }

    #[test]
    fn retry_all_keeps_retrying_permanent_failures() {
        let config = SchedulerConfig {
            max_passes: Some(4),
            ..Default::default()
        };
        let s = scheduler(config, &SilentReporter);
        let issuer = |_: &LookupQuery| FetchOutcome::Failure(FetchError::Status(404));
        let (_, outcome) = s.run_to_map(queries(&["x"]), &issuer);
        assert_eq!(outcome.requests, 4);
        assert_eq!(outcome.stop_reason, StopReason::PassLimit);
        assert!(outcome.abandoned.is_empty());
    }

    #[test]
    fn cancel_before_start_submits_nothing() {
        let flag = Arc::new(AtomicBool::new(true));
        let s = scheduler(SchedulerConfig::default(), &SilentReporter).with_cancel_flag(flag);
        let issuer = |_: &LookupQuery| -> FetchOutcome { unreachable!() };
        let (_, outcome) = s.run_to_map(queries(&["a", "b"]), &issuer);
        assert_eq!(outcome.stop_reason, StopReason::Cancelled);
        assert_eq!(outcome.requests, 0);
        assert!(outcome.unresolved.is_empty());
        assert_eq!(outcome.unsubmitted, 2);
    }

    #[test]
    fn cancel_between_chunks_keeps_finished_chunks() {
        let flag = Arc::new(AtomicBool::new(false));
        let config = SchedulerConfig {
            batch_size: 2,
            ..Default::default()
        };
        let s = scheduler(config, &SilentReporter).with_cancel_flag(flag.clone());
        let issuer = |q: &LookupQuery| {
            // Raised while the first chunk is in flight; honored before the second.
            flag.store(true, Ordering::Relaxed);
            ok(&q.term.to_uppercase())
        };
        let (map, outcome) = s.run_to_map(queries(&["a", "b", "c", "d", "e"]), &issuer);
        assert_eq!(outcome.stop_reason, StopReason::Cancelled);
        assert_eq!(outcome.requests, 2);
        assert_eq!(map.len(), 2);
        assert!(outcome.unresolved.is_empty());
        assert_eq!(outcome.unsubmitted, 3);
    }

    #[test]
    fn cancel_counts_remainder_of_lazy_source_without_collecting_it() {
        let flag = Arc::new(AtomicBool::new(false));
        let config = SchedulerConfig {
            batch_size: 4,
            ..Default::default()
        };
        let s = scheduler(config, &SilentReporter).with_cancel_flag(flag.clone());
        let issuer = |q: &LookupQuery| {
            flag.store(true, Ordering::Relaxed);
            ok(&q.term.to_uppercase())
        };
        // A lazy source whose items are only built when pulled.
        let built = std::sync::atomic::AtomicUsize::new(0);
        let source = (0..1_000_000usize).map(|i| {
            built.fetch_add(1, Ordering::Relaxed);
            LookupQuery::new(format!("t{i}"), Category::new("equity"))
        });
        let (_, outcome) = s.run_to_map(source, &issuer);
        assert_eq!(outcome.stop_reason, StopReason::Cancelled);
        assert_eq!(outcome.requests, 4);
        assert_eq!(outcome.unsubmitted, 1_000_000 - 4);
        assert!(outcome.unresolved.is_empty());
        // First chunk plus the chunk pulled before the flag was seen.
        assert_eq!(built.load(Ordering::Relaxed), 8);
    }

    #[test]
    fn cancel_during_retry_pass_keeps_failures_unresolved() {
        let flag = Arc::new(AtomicBool::new(false));
        let config = SchedulerConfig {
            batch_size: 1,
            ..Default::default()
        };
        let s = scheduler(config, &SilentReporter).with_cancel_flag(flag.clone());
        let attempts = Mutex::new(0usize);
        let issuer = |_: &LookupQuery| {
            let mut n = attempts.lock().unwrap();
            *n += 1;
            // Three first-pass failures, then cancel during the first retry.
            if *n == 4 {
                flag.store(true, Ordering::Relaxed);
            }
            FetchOutcome::Failure(FetchError::Status(500))
        };
        let (_, outcome) = s.run_to_map(queries(&["a", "b", "c"]), &issuer);
        assert_eq!(outcome.stop_reason, StopReason::Cancelled);
        assert_eq!(outcome.passes, 2);
        assert_eq!(outcome.requests, 4);
        assert_eq!(outcome.unresolved, queries(&["a", "b", "c"]));
        assert_eq!(outcome.unsubmitted, 0);
    }

    #[test]
    fn pass_delay_doubles_up_to_cap() {
        let config = SchedulerConfig {
            pass_delay: Duration::from_millis(100),
            max_pass_delay: Duration::from_millis(350),
            ..Default::default()
        };
        assert_eq!(config.delay_before(1), Duration::ZERO);
        assert_eq!(config.delay_before(2), Duration::from_millis(100));
        assert_eq!(config.delay_before(3), Duration::from_millis(200));
        assert_eq!(config.delay_before(4), Duration::from_millis(350));
        assert_eq!(config.delay_before(60), Duration::from_millis(350));
        assert_eq!(SchedulerConfig::default().delay_before(5), Duration::ZERO);
    }
}
