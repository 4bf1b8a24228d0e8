//! Fetch worker pool: bounded-concurrency execution of one batch.
//!
//! The pool owns a private rayon `ThreadPool` (never the global one) sized to
//! the concurrency cap and reused for every batch of a run. Workers only run
//! the issuer; each outcome is sent down an mpsc channel and drained by the
//! calling thread, which is therefore the sole owner of any state the outcomes
//! are folded into.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::mpsc;

use thiserror::Error;
use tracing::warn;

use symharvest_core::domain::{FetchError, FetchOutcome, LookupQuery};
use symharvest_core::LookupIssuer;

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("concurrency must be at least 1")]
    ZeroConcurrency,

    #[error("failed to build worker pool: {0}")]
    Build(#[from] rayon::ThreadPoolBuildError),
}

pub struct FetchPool {
    pool: rayon::ThreadPool,
    concurrency: usize,
}

impl FetchPool {
    pub fn new(concurrency: usize) -> Result<Self, PoolError> {
        if concurrency == 0 {
            return Err(PoolError::ZeroConcurrency);
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(concurrency)
            .thread_name(|i| format!("fetch-worker-{i}"))
            .build()?;
        Ok(Self { pool, concurrency })
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Run every descriptor of `batch` through `issuer`, at most
    /// `concurrency` at a time, calling `on_outcome` on the current thread as
    /// each one completes (completion order, not submission order).
    ///
    /// Returns only after every descriptor has produced exactly one outcome.
    /// The return value is the number of outcomes delivered.
    pub fn execute_batch_with<I, F>(
        &self,
        batch: &[LookupQuery],
        issuer: &I,
        mut on_outcome: F,
    ) -> usize
    where
        I: LookupIssuer + ?Sized,
        F: FnMut(&LookupQuery, FetchOutcome),
    {
        if batch.is_empty() {
            return 0;
        }

        let (tx, rx) = mpsc::channel::<(usize, FetchOutcome)>();
        let mut delivered = 0;

        self.pool.in_place_scope(|scope| {
            for (index, query) in batch.iter().enumerate() {
                let tx = tx.clone();
                scope.spawn(move |_| {
                    let outcome = guarded_issue(issuer, query);
                    // The receiver outlives the scope; a send can only fail
                    // if the draining loop below panicked.
                    let _ = tx.send((index, outcome));
                });
            }
            drop(tx);

            for (index, outcome) in rx.iter() {
                on_outcome(&batch[index], outcome);
                delivered += 1;
            }
        });

        debug_assert_eq!(delivered, batch.len());
        delivered
    }

    /// Like [`execute_batch_with`](Self::execute_batch_with) but collects the
    /// outcomes, still in completion order.
    pub fn execute_batch<I>(&self, batch: &[LookupQuery], issuer: &I) -> Vec<(LookupQuery, FetchOutcome)>
    where
        I: LookupIssuer + ?Sized,
    {
        let mut outcomes = Vec::with_capacity(batch.len());
        self.execute_batch_with(batch, issuer, |query, outcome| {
            outcomes.push((query.clone(), outcome));
        });
        outcomes
    }
}

/// Invoke the issuer, turning a panic into a failure so it cannot take down
/// the rest of the batch.
fn guarded_issue<I>(issuer: &I, query: &LookupQuery) -> FetchOutcome
where
    I: LookupIssuer + ?Sized,
{
    match catch_unwind(AssertUnwindSafe(|| issuer.issue(query))) {
        Ok(outcome) => outcome,
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            warn!(query = %query, issuer = issuer.name(), %message, "issuer panicked");
            FetchOutcome::Failure(FetchError::Panicked(message))
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
