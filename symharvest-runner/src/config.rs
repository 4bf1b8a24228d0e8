//! Serializable harvest configuration.
//!
//! A `HarvestConfig` can be loaded from TOML (every key optional) and is then
//! overridden field by field by the command line. `validate` must pass before
//! any network activity starts.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use symharvest_core::domain::{Category, DEFAULT_CATEGORIES};
use symharvest_core::lookup::yahoo::{DEFAULT_ENDPOINT, DEFAULT_TIMEOUT};
use symharvest_core::query_source::{DEFAULT_ALPHABET, DEFAULT_MAX_LENGTH};
use symharvest_core::{QueryOrder, QuerySource, QuerySourceError};

use crate::scheduler::{RetryPolicy, SchedulerConfig, DEFAULT_BATCH_SIZE};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("batch size must be at least 1")]
    ZeroBatchSize,

    #[error("concurrency must be at least 1")]
    ZeroConcurrency,

    #[error("request timeout must be greater than zero")]
    ZeroTimeout,

    #[error("max passes must be at least 1 when set")]
    ZeroMaxPasses,

    #[error("output path is empty")]
    EmptyOutput,

    #[error("lookup endpoint is empty")]
    EmptyEndpoint,

    #[error(transparent)]
    Queries(#[from] QuerySourceError),
}

/// Everything a harvest run needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HarvestConfig {
    /// Descriptors per chunk.
    pub batch_size: usize,
    /// Worker threads; defaults to `batch_size`.
    pub concurrency: Option<usize>,
    /// Longest search term generated.
    pub max_length: usize,
    pub categories: Vec<String>,
    pub alphabet: String,
    /// Enumeration direction. Defaults to ascending (`"aa"` before `"=="`).
    pub order: QueryOrder,
    pub output: PathBuf,
    pub endpoint: String,
    pub timeout_secs: u64,
    pub max_passes: Option<usize>,
    pub retry_policy: RetryPolicy,
    pub pass_delay_ms: u64,
    pub max_pass_delay_ms: u64,
    /// Converge and write the output once per term length.
    pub checkpoint_per_length: bool,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            concurrency: None,
            max_length: DEFAULT_MAX_LENGTH,
            categories: DEFAULT_CATEGORIES.iter().map(|c| c.to_string()).collect(),
            alphabet: DEFAULT_ALPHABET.to_string(),
            order: QueryOrder::Ascending,
            output: PathBuf::from("symbols.csv"),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            timeout_secs: DEFAULT_TIMEOUT.as_secs(),
            max_passes: None,
            retry_policy: RetryPolicy::RetryAll,
            pass_delay_ms: 0,
            max_pass_delay_ms: 30_000,
            checkpoint_per_length: false,
        }
    }
}

impl HarvestConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn to_toml(&self) -> String {
        // Every field is a plain scalar, list or path; serialization cannot fail.
        toml::to_string_pretty(self).unwrap_or_default()
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency.unwrap_or(self.batch_size)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn category_list(&self) -> Vec<Category> {
        self.categories.iter().map(|c| Category::new(c)).collect()
    }

    pub fn query_source(&self) -> Result<QuerySource, ConfigError> {
        Ok(
            QuerySource::new(self.max_length, &self.alphabet, self.category_list())?
                .with_order(self.order),
        )
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            batch_size: self.batch_size,
            max_passes: self.max_passes,
            retry_policy: self.retry_policy,
            pass_delay: Duration::from_millis(self.pass_delay_ms),
            max_pass_delay: Duration::from_millis(self.max_pass_delay_ms),
        }
    }

    /// Check every setting and build the query source it describes.
    pub fn validate(&self) -> Result<QuerySource, ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::ZeroBatchSize);
        }
        if self.concurrency() == 0 {
            return Err(ConfigError::ZeroConcurrency);
        }
        if self.timeout_secs == 0 {
            return Err(ConfigError::ZeroTimeout);
        }
        if self.max_passes == Some(0) {
            return Err(ConfigError::ZeroMaxPasses);
        }
        if self.output.as_os_str().is_empty() {
            return Err(ConfigError::EmptyOutput);
        }
        if self.endpoint.trim().is_empty() {
            return Err(ConfigError::EmptyEndpoint);
        }
        self.query_source()
    }
}
