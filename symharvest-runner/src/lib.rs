//! SymHarvest Runner: harvest orchestration on top of `symharvest-core`.
//!
//! This crate provides:
//! - A bounded fetch pool backed by a private rayon thread pool
//! - The batch scheduler with retry passes, pass cap, retry policy and cancellation
//! - Run reporting (progress, per-batch and per-pass statistics)
//! - TOML harvest configuration and validation
//! - CSV export of the merged symbol table

pub mod config;
pub mod export;
pub mod pool;
pub mod report;
pub mod scheduler;

pub use config::{ConfigError, HarvestConfig};
pub use export::{export_csv, save_csv, write_instruments, CSV_HEADER};
pub use pool::{FetchPool, PoolError};
pub use report::{BatchStats, PassStats, Progress, RunReporter, SilentReporter, TracingReporter};
pub use scheduler::{
    BatchScheduler, HarvestOutcome, RetryPolicy, SchedulerConfig, SchedulerError, StopReason,
    DEFAULT_BATCH_SIZE,
};
