//! Sequencer configuration.
//!
//! Configuration is loaded in layers with the following precedence (lowest to highest):
//! 1. Built-in defaults (see [`crate::constants`])
//! 2. Environment variables (`ROWSEQ_*`)
//! 3. TOML configuration file (every key it sets wins)
//!
//! The result is validated once and shared as `Arc<SequencerConfig>`; it is
//! never reloaded mid-run.

use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;
use snafu::ResultExt;
use snafu::Snafu;

use crate::constants::DEFAULT_ALLOCATION_LOCK_TIMEOUT_MS;
use crate::constants::DEFAULT_BATCH_PAUSE_MS;
use crate::constants::DEFAULT_BATCH_SIZE;
use crate::constants::DEFAULT_CACHE_KEY;
use crate::constants::DEFAULT_CACHE_TTL_SECS;
use crate::constants::DEFAULT_DURABLE_KEY;
use crate::constants::DEFAULT_ID_COLUMN;
use crate::constants::DEFAULT_INCREMENT;
use crate::constants::DEFAULT_MAX_RETRIES;
use crate::constants::DEFAULT_RECONCILE_LOCK_TIMEOUT_MS;
use crate::constants::DEFAULT_RETRY_BACKOFF_MS;
use crate::constants::DEFAULT_START_ID;
use crate::constants::MAX_ALLOWED_RETRIES;
use crate::constants::MAX_BATCH_SIZE;
use crate::pure::is_safe_integer;
use crate::pure::seed_last_id;

/// Immutable settings shared by the allocator, reconciler and reset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequencerConfig {
    /// Header name of the id column.
    #[serde(default = "default_id_column")]
    pub id_column: String,

    /// First id on an empty table.
    #[serde(default = "default_start_id")]
    pub start_id: i64,

    /// Distance between consecutive ids.
    #[serde(default = "default_increment")]
    pub increment: i64,

    /// Allocation attempts per submission.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Rows per reconciliation batch.
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,

    /// Pause between reconciliation batches.
    #[serde(default = "default_batch_pause_ms")]
    pub batch_pause_ms: u64,

    /// Time-to-live of the cached counter.
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,

    /// Counter key in the fast cache.
    #[serde(default = "default_cache_key")]
    pub cache_key: String,

    /// Counter key in the durable store.
    #[serde(default = "default_durable_key")]
    pub durable_key: String,

    /// Wait bound for each allocation-path lock.
    #[serde(default = "default_allocation_lock_timeout_ms")]
    pub allocation_lock_timeout_ms: u64,

    /// Wait bound for the reconciliation document lock.
    #[serde(default = "default_reconcile_lock_timeout_ms")]
    pub reconcile_lock_timeout_ms: u64,

    /// Base of the linear backoff between allocation attempts.
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// Keep a failed attempt's locks through its backoff sleep.
    ///
    /// Off by default: locks are released before sleeping so competing
    /// allocators are not stalled. Turn on only to reproduce the legacy
    /// ordering.
    #[serde(default)]
    pub hold_locks_during_backoff: bool,
}

impl Default for SequencerConfig {
    fn default() -> Self {
        Self {
            id_column: default_id_column(),
            start_id: default_start_id(),
            increment: default_increment(),
            max_retries: default_max_retries(),
            batch_size: default_batch_size(),
            batch_pause_ms: default_batch_pause_ms(),
            cache_ttl_secs: default_cache_ttl_secs(),
            cache_key: default_cache_key(),
            durable_key: default_durable_key(),
            allocation_lock_timeout_ms: default_allocation_lock_timeout_ms(),
            reconcile_lock_timeout_ms: default_reconcile_lock_timeout_ms(),
            retry_backoff_ms: default_retry_backoff_ms(),
            hold_locks_during_backoff: false,
        }
    }
}

impl SequencerConfig {
    /// Load configuration from a TOML file. Missing fields take their defaults.
    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).context(ReadFileSnafu { path })?;
        toml::from_str(&content).context(ParseTomlSnafu { path })
    }

    /// Load configuration from environment variables.
    ///
    /// Variables follow the pattern `ROWSEQ_<FIELD_NAME>` (uppercase). Unset or
    /// unparseable variables fall back to the default.
    pub fn from_env() -> Self {
        Self {
            id_column: parse_env("ROWSEQ_ID_COLUMN").unwrap_or_else(default_id_column),
            start_id: parse_env("ROWSEQ_START_ID").unwrap_or_else(default_start_id),
            increment: parse_env("ROWSEQ_INCREMENT").unwrap_or_else(default_increment),
            max_retries: parse_env("ROWSEQ_MAX_RETRIES").unwrap_or_else(default_max_retries),
            batch_size: parse_env("ROWSEQ_BATCH_SIZE").unwrap_or_else(default_batch_size),
            batch_pause_ms: parse_env("ROWSEQ_BATCH_PAUSE_MS").unwrap_or_else(default_batch_pause_ms),
            cache_ttl_secs: parse_env("ROWSEQ_CACHE_TTL_SECS").unwrap_or_else(default_cache_ttl_secs),
            cache_key: parse_env("ROWSEQ_CACHE_KEY").unwrap_or_else(default_cache_key),
            durable_key: parse_env("ROWSEQ_DURABLE_KEY").unwrap_or_else(default_durable_key),
            allocation_lock_timeout_ms: parse_env("ROWSEQ_ALLOCATION_LOCK_TIMEOUT_MS")
                .unwrap_or_else(default_allocation_lock_timeout_ms),
            reconcile_lock_timeout_ms: parse_env("ROWSEQ_RECONCILE_LOCK_TIMEOUT_MS")
                .unwrap_or_else(default_reconcile_lock_timeout_ms),
            retry_backoff_ms: parse_env("ROWSEQ_RETRY_BACKOFF_MS").unwrap_or_else(default_retry_backoff_ms),
            hold_locks_during_backoff: parse_env("ROWSEQ_HOLD_LOCKS_DURING_BACKOFF").unwrap_or(false),
        }
    }

    /// Layer a TOML file over this configuration.
    ///
    /// Every key present in the file wins, including keys set to their
    /// built-in default. Keys absent from the file keep their current value.
    pub fn overlay_toml_file(&mut self, path: &Path) -> Result<(), ConfigError> {
        let content = std::fs::read_to_string(path).context(ReadFileSnafu { path })?;
        let mut layered: toml::Table = content.parse().context(ParseTomlSnafu { path })?;
        let toml::Value::Table(current) = toml::Value::try_from(&*self).context(EncodeTomlSnafu)? else {
            return Err(validation("configuration does not encode as a TOML table"));
        };
        for (key, value) in current {
            layered.entry(key).or_insert(value);
        }
        *self = toml::Value::Table(layered).try_into().context(ParseTomlSnafu { path })?;
        Ok(())
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.id_column.trim().is_empty() {
            return Err(validation("id_column must not be empty"));
        }
        if self.cache_key.is_empty() || self.durable_key.is_empty() {
            return Err(validation("counter keys must not be empty"));
        }
        if self.start_id <= 0 || !is_safe_integer(self.start_id) {
            return Err(validation("start_id must be a positive safe integer"));
        }
        if self.increment <= 0 || !is_safe_integer(self.increment) {
            return Err(validation("increment must be a positive safe integer"));
        }
        if seed_last_id(self.start_id, self.increment).is_none() {
            return Err(validation("start_id - increment must be a safe integer"));
        }
        if self.max_retries == 0 || self.max_retries > MAX_ALLOWED_RETRIES {
            return Err(ConfigError::Validation {
                message: format!("max_retries must be between 1 and {MAX_ALLOWED_RETRIES}"),
            });
        }
        if self.batch_size == 0 || self.batch_size > MAX_BATCH_SIZE {
            return Err(ConfigError::Validation {
                message: format!("batch_size must be between 1 and {MAX_BATCH_SIZE}"),
            });
        }
        if self.cache_ttl_secs == 0 {
            return Err(validation("cache_ttl_secs must be non-zero"));
        }
        if self.allocation_lock_timeout_ms == 0 || self.reconcile_lock_timeout_ms == 0 {
            return Err(validation("lock timeouts must be non-zero"));
        }
        Ok(())
    }

    /// Counter value before the first allocation.
    pub fn seed_last_id(&self) -> i64 {
        // validate() guarantees this is representable
        seed_last_id(self.start_id, self.increment).unwrap_or(self.start_id)
    }

    /// Cache time-to-live as a duration.
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    /// Allocation-path lock wait bound as a duration.
    pub fn allocation_lock_timeout(&self) -> Duration {
        Duration::from_millis(self.allocation_lock_timeout_ms)
    }

    /// Reconciliation lock wait bound as a duration.
    pub fn reconcile_lock_timeout(&self) -> Duration {
        Duration::from_millis(self.reconcile_lock_timeout_ms)
    }

    /// Inter-batch pause as a duration.
    pub fn batch_pause(&self) -> Duration {
        Duration::from_millis(self.batch_pause_ms)
    }
}

// Default value functions
fn default_id_column() -> String {
    DEFAULT_ID_COLUMN.into()
}

fn default_start_id() -> i64 {
    DEFAULT_START_ID
}

fn default_increment() -> i64 {
    DEFAULT_INCREMENT
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

fn default_batch_size() -> u32 {
    DEFAULT_BATCH_SIZE
}

fn default_batch_pause_ms() -> u64 {
    DEFAULT_BATCH_PAUSE_MS
}

fn default_cache_ttl_secs() -> u64 {
    DEFAULT_CACHE_TTL_SECS
}

fn default_cache_key() -> String {
    DEFAULT_CACHE_KEY.into()
}

fn default_durable_key() -> String {
    DEFAULT_DURABLE_KEY.into()
}

fn default_allocation_lock_timeout_ms() -> u64 {
    DEFAULT_ALLOCATION_LOCK_TIMEOUT_MS
}

fn default_reconcile_lock_timeout_ms() -> u64 {
    DEFAULT_RECONCILE_LOCK_TIMEOUT_MS
}

fn default_retry_backoff_ms() -> u64 {
    DEFAULT_RETRY_BACKOFF_MS
}

fn validation(message: &str) -> ConfigError {
    ConfigError::Validation {
        message: message.to_string(),
    }
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok()?.parse().ok()
}

/// Configuration loading and validation errors.
#[derive(Debug, Snafu)]
pub enum ConfigError {
    #[snafu(display("failed to read config file {}: {source}", path.display()))]
    ReadFile { path: PathBuf, source: std::io::Error },

    #[snafu(display("failed to parse TOML config file {}: {source}", path.display()))]
    ParseToml { path: PathBuf, source: toml::de::Error },

    #[snafu(display("failed to encode configuration as TOML: {source}"))]
    EncodeToml { source: toml::ser::Error },

    #[snafu(display("configuration validation failed: {message}"))]
    Validation { message: String },
}
