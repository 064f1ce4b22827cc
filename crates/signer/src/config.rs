//! Signer configuration.
//!
//! [`SignerConfig`] can be built in code through its validated builder or
//! deserialized (durations use `humantime` strings such as `"250ms"`).
//! Deserialized values are checked when the signer starts, see
//! [`SignerConfig::validate`].
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use msgsign_signer::SignerConfig;
//!
//! let config = SignerConfig::builder()
//!     .worker_identity("signer-2")
//!     .total_signers(3)
//!     .tick_interval(Duration::from_millis(500))
//!     .transactional(true)
//!     .build()?;
//! assert_eq!(config.total_signers(), 3);
//! assert_eq!(config.batch_size(), 100);
//! # Ok::<(), msgsign_signer::ConfigError>(())
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Default worker identity.
pub const DEFAULT_WORKER_IDENTITY: &str = "signer-0";

/// Default number of signer replicas.
pub const DEFAULT_TOTAL_SIGNERS: u64 = 1;

/// Default interval between scheduler ticks (1 second).
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Default number of records per planned batch.
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Smallest accepted tick interval.
pub const MIN_TICK_INTERVAL: Duration = Duration::from_millis(1);

fn default_worker_identity() -> String {
    DEFAULT_WORKER_IDENTITY.to_owned()
}

fn default_total_signers() -> u64 {
    DEFAULT_TOTAL_SIGNERS
}

fn default_tick_interval() -> Duration {
    DEFAULT_TICK_INTERVAL
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

fn default_true() -> bool {
    true
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_backoff() -> Duration {
    Duration::from_millis(10)
}

fn default_max_backoff() -> Duration {
    Duration::from_secs(1)
}

/// Retry policy for units that fail to commit because of a write conflict.
#[derive(Debug, Clone, PartialEq, Eq, bon::Builder, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UnitRetryConfig {
    /// Maximum number of attempts, the first one included.
    #[serde(default = "default_max_attempts")]
    #[builder(default = default_max_attempts())]
    pub max_attempts: u32,

    /// Backoff before the second attempt; doubles on every further attempt.
    #[serde(with = "humantime_serde", default = "default_initial_backoff")]
    #[builder(default = default_initial_backoff())]
    pub initial_backoff: Duration,

    /// Upper bound of the backoff, before jitter.
    #[serde(with = "humantime_serde", default = "default_max_backoff")]
    #[builder(default = default_max_backoff())]
    pub max_backoff: Duration,
}

impl Default for UnitRetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff: default_initial_backoff(),
            max_backoff: default_max_backoff(),
        }
    }
}

impl UnitRetryConfig {
    /// Checks that at least one attempt is allowed and the backoff bounds are ordered.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] describing the first invalid field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::BelowMinimum {
                field: "unit_retry.max_attempts",
                min: "1".into(),
                value: "0".into(),
            });
        }
        if self.initial_backoff > self.max_backoff {
            return Err(ConfigError::Invalid {
                field: "unit_retry.initial_backoff",
                reason: format!(
                    "{:?} exceeds max_backoff {:?}",
                    self.initial_backoff, self.max_backoff
                ),
            });
        }
        Ok(())
    }
}

/// Configuration of one signer replica.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SignerConfig {
    /// Identity of this replica, `<name>-<index>`.
    #[serde(default = "default_worker_identity")]
    pub(crate) worker_identity: String,

    /// Number of replicas sharing the record space.
    #[serde(default = "default_total_signers")]
    pub(crate) total_signers: u64,

    /// Interval between scheduler ticks.
    #[serde(with = "humantime_serde", default = "default_tick_interval")]
    pub(crate) tick_interval: Duration,

    /// Run rounds as atomic units instead of directly against the store.
    #[serde(default)]
    pub(crate) transactional: bool,

    /// Records per batch when planning a fan-out over the whole unsigned set.
    #[serde(default = "default_batch_size")]
    pub(crate) batch_size: usize,

    /// Serialize rounds that use the same key within this process.
    #[serde(default = "default_true")]
    pub(crate) serialize_rounds_per_key: bool,

    /// Conflict retry policy of transactional rounds.
    #[serde(default)]
    pub(crate) unit_retry: UnitRetryConfig,
}

impl Default for SignerConfig {
    fn default() -> Self {
        Self {
            worker_identity: default_worker_identity(),
            total_signers: DEFAULT_TOTAL_SIGNERS,
            tick_interval: DEFAULT_TICK_INTERVAL,
            transactional: false,
            batch_size: DEFAULT_BATCH_SIZE,
            serialize_rounds_per_key: true,
            unit_retry: UnitRetryConfig::default(),
        }
    }
}

#[bon::bon]
impl SignerConfig {
    /// Creates a new signer configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if any field fails [`validate`](Self::validate).
    #[builder]
    pub fn new(
        #[builder(into, default = default_worker_identity())] worker_identity: String,
        #[builder(default = DEFAULT_TOTAL_SIGNERS)] total_signers: u64,
        #[builder(default = DEFAULT_TICK_INTERVAL)] tick_interval: Duration,
        #[builder(default)] transactional: bool,
        #[builder(default = DEFAULT_BATCH_SIZE)] batch_size: usize,
        #[builder(default = true)] serialize_rounds_per_key: bool,
        #[builder(default)] unit_retry: UnitRetryConfig,
    ) -> Result<Self, ConfigError> {
        let config = Self {
            worker_identity,
            total_signers,
            tick_interval,
            transactional,
            batch_size,
            serialize_rounds_per_key,
            unit_retry,
        };
        config.validate()?;
        Ok(config)
    }

    /// Checks every field.
    ///
    /// The identity string itself is parsed, and checked against
    /// `total_signers`, when the signer starts.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] describing the first invalid field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_identity.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "worker_identity",
                reason: "must not be empty".into(),
            });
        }
        if self.total_signers == 0 {
            return Err(ConfigError::BelowMinimum {
                field: "total_signers",
                min: "1".into(),
                value: "0".into(),
            });
        }
        if self.tick_interval < MIN_TICK_INTERVAL {
            return Err(ConfigError::BelowMinimum {
                field: "tick_interval",
                min: format!("{MIN_TICK_INTERVAL:?}"),
                value: format!("{:?}", self.tick_interval),
            });
        }
        if self.batch_size == 0 {
            return Err(ConfigError::BelowMinimum {
                field: "batch_size",
                min: "1".into(),
                value: "0".into(),
            });
        }
        self.unit_retry.validate()
    }

    /// Returns the worker identity string.
    #[must_use]
    pub fn worker_identity(&self) -> &str {
        &self.worker_identity
    }

    /// Returns the number of replicas.
    #[must_use]
    pub fn total_signers(&self) -> u64 {
        self.total_signers
    }

    /// Returns the scheduler tick interval.
    #[must_use]
    pub fn tick_interval(&self) -> Duration {
        self.tick_interval
    }

    /// Returns whether rounds run as atomic units.
    #[must_use]
    pub fn transactional(&self) -> bool {
        self.transactional
    }

    /// Returns the fan-out batch size.
    #[must_use]
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Returns whether same-key rounds are serialized in-process.
    #[must_use]
    pub fn serialize_rounds_per_key(&self) -> bool {
        self.serialize_rounds_per_key
    }

    /// Returns the unit retry policy.
    #[must_use]
    pub fn unit_retry(&self) -> &UnitRetryConfig {
        &self.unit_retry
    }
}
