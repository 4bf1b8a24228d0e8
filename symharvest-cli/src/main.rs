//! SymHarvest CLI: enumerate lookup queries, fetch them concurrently with
//! retry passes, and write every distinct symbol to a CSV file.
//!
//! Settings come from built-in defaults, then an optional `--config` TOML
//! file, then explicit flags. Logs go to stderr (`-v` or `RUST_LOG`); the
//! final summary goes to stdout.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, ValueEnum};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use symharvest_core::domain::Category;
use symharvest_core::{Aggregator, QueryOrder, QuerySource, YahooLookup};
use symharvest_runner::{
    save_csv, BatchScheduler, FetchPool, HarvestConfig, HarvestOutcome, RetryPolicy,
    StopReason, TracingReporter,
};

#[derive(Parser, Debug)]
#[command(
    name = "symharvest",
    version,
    about = "Harvest ticker symbols from the Yahoo Finance lookup endpoint"
)]
struct Cli {
    /// Lookups per batch; also the concurrency cap unless --concurrency is set. [default: 400]
    #[arg(short = 'b', long)]
    batch_size: Option<usize>,

    /// Worker threads issuing requests. [default: batch size]
    #[arg(long)]
    concurrency: Option<usize>,

    /// Longest search term to generate. [default: 2]
    #[arg(short = 'l', long)]
    max_length: Option<usize>,

    /// Comma-separated categories. [default: equity,mutualfund,etf,index,future,currency]
    #[arg(short = 't', long)]
    types: Option<String>,

    /// Output CSV path. [default: symbols.csv]
    #[arg(short = 'o', long)]
    output: Option<PathBuf>,

    /// Characters search terms are built from. [default: a-z, 0-9, '.', '=']
    #[arg(long)]
    alphabet: Option<String>,

    /// Direction each term position walks the alphabet. [default: ascending]
    #[arg(long, value_enum)]
    order: Option<OrderArg>,

    /// Lookup endpoint base URL.
    #[arg(long)]
    endpoint: Option<String>,

    /// Per-request timeout in seconds. [default: 3]
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Stop after this many passes even if lookups still fail.
    #[arg(long)]
    max_passes: Option<usize>,

    /// Which failures are retried. [default: all]
    #[arg(long, value_enum)]
    retry_policy: Option<RetryArg>,

    /// Pause before the second pass, doubling each pass. [default: 0]
    #[arg(long)]
    pass_delay_ms: Option<u64>,

    /// Upper bound for the pause between passes. [default: 30000]
    #[arg(long)]
    max_pass_delay_ms: Option<u64>,

    /// Converge one term length at a time, rewriting the output after each.
    #[arg(long, default_value_t = false)]
    checkpoint_per_length: bool,

    /// TOML file with harvest settings; flags override it.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace). RUST_LOG takes precedence.
    #[arg(short = 'v', long, action = ArgAction::Count)]
    verbose: u8,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum RetryArg {
    /// Retry every failure until it succeeds.
    All,
    /// Drop 4xx responses and malformed payloads after one attempt.
    Transient,
}

impl From<RetryArg> for RetryPolicy {
    fn from(arg: RetryArg) -> Self {
        match arg {
            RetryArg::All => RetryPolicy::RetryAll,
            RetryArg::Transient => RetryPolicy::TransientOnly,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum OrderArg {
    Ascending,
    Descending,
}

impl From<OrderArg> for QueryOrder {
    fn from(arg: OrderArg) -> Self {
        match arg {
            OrderArg::Ascending => QueryOrder::Ascending,
            OrderArg::Descending => QueryOrder::Descending,
        }
    }
}

impl Cli {
    /// Defaults, then the config file, then explicit flags.
    fn resolve_config(&self) -> Result<HarvestConfig> {
        let mut config = match &self.config {
            Some(path) => HarvestConfig::from_file(path)
                .with_context(|| format!("failed to load config: {}", path.display()))?,
            None => HarvestConfig::default(),
        };

        if let Some(v) = self.batch_size {
            config.batch_size = v;
        }
        if let Some(v) = self.concurrency {
            config.concurrency = Some(v);
        }
        if let Some(v) = self.max_length {
            config.max_length = v;
        }
        if let Some(types) = &self.types {
            config.categories = Category::parse_list(types)
                .iter()
                .map(|c| c.to_string())
                .collect();
        }
        if let Some(v) = &self.output {
            config.output = v.clone();
        }
        if let Some(v) = &self.alphabet {
            config.alphabet = v.clone();
        }
        if let Some(v) = self.order {
            config.order = v.into();
        }
        if let Some(v) = &self.endpoint {
            config.endpoint = v.clone();
        }
        if let Some(v) = self.timeout_secs {
            config.timeout_secs = v;
        }
        if let Some(v) = self.max_passes {
            config.max_passes = Some(v);
        }
        if let Some(v) = self.retry_policy {
            config.retry_policy = v.into();
        }
        if let Some(v) = self.pass_delay_ms {
            config.pass_delay_ms = v;
        }
        if let Some(v) = self.max_pass_delay_ms {
            config.max_pass_delay_ms = v;
        }
        if self.checkpoint_per_length {
            config.checkpoint_per_length = true;
        }
        Ok(config)
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = cli.resolve_config()?;
    let source = config.validate().context("invalid configuration")?;
    run_harvest(&config, &source)
}

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run_harvest(config: &HarvestConfig, source: &QuerySource) -> Result<()> {
    let issuer = YahooLookup::new(&config.endpoint, config.timeout())
        .context("failed to set up lookup client")?;
    let pool = FetchPool::new(config.concurrency()).context("failed to start worker pool")?;
    let reporter = TracingReporter::default();
    let scheduler = BatchScheduler::new(pool, config.scheduler_config(), &reporter)
        .context("invalid scheduler settings")?;

    info!(
        descriptors = source.len(),
        max_length = source.max_length(),
        categories = source.categories().len(),
        output = %config.output.display(),
        "starting harvest"
    );

    let mut aggregator = Aggregator::new();
    let mut outcomes = Vec::new();
    let mut written = 0;

    if config.checkpoint_per_length {
        for length in source.lengths() {
            info!(length, "harvesting terms of length {length}");
            let outcome = scheduler.run(&mut aggregator, source.for_length(length), &issuer);
            written = write_output(&aggregator, config)?;
            info!(length, rows = written, "checkpoint written");
            outcomes.push(outcome);
        }
    } else {
        outcomes.push(scheduler.run(&mut aggregator, source.iter(), &issuer));
        written = write_output(&aggregator, config)?;
    }

    print_summary(&outcomes, written, config);
    Ok(())
}

fn write_output(aggregator: &Aggregator, config: &HarvestConfig) -> Result<usize> {
    save_csv(aggregator.results(), &config.output)
        .with_context(|| format!("failed to write output: {}", config.output.display()))
}

fn print_summary(outcomes: &[HarvestOutcome], written: usize, config: &HarvestConfig) {
    let requests: usize = outcomes.iter().map(|o| o.requests).sum();
    let passes: usize = outcomes.iter().map(|o| o.passes).sum();
    let skipped: usize = outcomes.iter().map(|o| o.skipped_documents).sum();
    let unresolved: usize = outcomes.iter().map(|o| o.unresolved.len()).sum();
    let unsubmitted: usize = outcomes.iter().map(|o| o.unsubmitted).sum();
    let abandoned: usize = outcomes.iter().map(|o| o.abandoned.len()).sum();
    let partial = outcomes
        .iter()
        .any(|o| o.stop_reason != StopReason::Converged);

    if unresolved > 0 || unsubmitted > 0 {
        warn!(
            unresolved,
            unsubmitted, "output is partial: some lookups never succeeded"
        );
    }

    println!();
    println!("=== Harvest Result ===");
    println!("Requests:       {requests}");
    println!("Passes:         {passes}");
    println!("Skipped docs:   {skipped}");
    if partial || unresolved > 0 {
        println!("Unresolved:     {unresolved}");
    }
    if unsubmitted > 0 {
        println!("Not submitted:  {unsubmitted}");
    }
    if abandoned > 0 {
        println!("Abandoned:      {abandoned}");
    }
    println!("Output:         {}", config.output.display());
    println!("Done. Wrote {written} unique symbols.");
}
