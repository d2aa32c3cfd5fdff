//! Harness settings and configuration loading.
//!
//! Every field carries a serde default, so an absent file or an unconfigured
//! environment yields a valid [`HarnessSettings`]. Sources are applied in
//! order, later ones overriding earlier ones:
//!
//! 1. Built-in defaults
//! 2. Optional YAML file passed to [`HarnessSettings::load`]
//! 3. Environment variables prefixed `QH__` with `__` as the nesting separator,
//!    e.g. `QH__EXCHANGE__MAX_ATTEMPTS=10` sets `exchange.max_attempts`

use crate::error::ConfigurationError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Maximum number of messages a single receive may return
pub const MAX_RECEIVE_BATCH: u32 = 10;

/// Environment variable prefix for settings overrides
pub const ENV_PREFIX: &str = "QH";

/// Bounded-wait policy: worst-case wait is `max_attempts × delay`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryBudget {
    pub max_attempts: u32,
    pub delay_ms: u64,
}

impl Default for RetryBudget {
    fn default() -> Self {
        Self {
            max_attempts: 50,
            delay_ms: 200,
        }
    }
}

impl RetryBudget {
    /// Create a budget of `max_attempts` polls spaced `delay` apart.
    ///
    /// The delay is stored at millisecond resolution; a nonzero delay shorter
    /// than one millisecond rounds up to one millisecond.
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        let mut delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        if delay_ms == 0 && !delay.is_zero() {
            delay_ms = 1;
        }
        Self {
            max_attempts,
            delay_ms,
        }
    }

    /// Delay between two polls
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    /// Upper bound on the wall-clock time spent polling, saturating at
    /// [`Duration::MAX`]
    pub fn worst_case_wait(&self) -> Duration {
        self.delay()
            .checked_mul(self.max_attempts)
            .unwrap_or(Duration::MAX)
    }
}

/// Settings for the queue drain protocol
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DrainSettings {
    /// Pause before each count/receive round, long enough to outlast the
    /// eventual consistency of the queue's message-count accounting
    pub settle_interval_ms: u64,
    pub batch_size: u32,
    pub max_rounds: u32,
}

impl Default for DrainSettings {
    fn default() -> Self {
        Self {
            settle_interval_ms: 1_000,
            batch_size: MAX_RECEIVE_BATCH,
            max_rounds: 1_000,
        }
    }
}

impl DrainSettings {
    pub fn settle_interval(&self) -> Duration {
        Duration::from_millis(self.settle_interval_ms)
    }
}

/// Settings handed to the message pump on `init`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PushSettings {
    /// Logical address of the queue the receive loop consumes
    pub input_queue: String,

    /// Logical address receiving payloads that failed delivery
    pub error_queue: Option<String>,

    pub max_messages_per_receive: u32,

    /// Wait after an empty receive before polling again
    pub idle_poll_interval_ms: u64,

    /// Wait after a failed receive before trying again
    pub failure_backoff_ms: u64,

    /// Consecutive receive failures that constitute a critical fault
    pub critical_failure_threshold: u32,
}

impl Default for PushSettings {
    fn default() -> Self {
        Self {
            input_queue: "harness-input".to_string(),
            error_queue: None,
            max_messages_per_receive: MAX_RECEIVE_BATCH,
            idle_poll_interval_ms: 20,
            failure_backoff_ms: 100,
            critical_failure_threshold: 5,
        }
    }
}

impl PushSettings {
    pub fn idle_poll_interval(&self) -> Duration {
        Duration::from_millis(self.idle_poll_interval_ms)
    }

    pub fn failure_backoff(&self) -> Duration {
        Duration::from_millis(self.failure_backoff_ms)
    }
}

/// Settings handed to the message pump on `start`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PushRuntimeSettings {
    pub concurrency_limit: usize,
}

impl Default for PushRuntimeSettings {
    fn default() -> Self {
        Self {
            concurrency_limit: 1,
        }
    }
}

/// In-memory transport configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InMemorySettings {
    /// Time a received but undeleted message stays invisible
    pub visibility_timeout_ms: u64,

    /// Minimum time between two accepted native purges of one queue
    pub purge_cooldown_ms: u64,
}

impl Default for InMemorySettings {
    fn default() -> Self {
        Self {
            visibility_timeout_ms: 30_000,
            purge_cooldown_ms: 60_000,
        }
    }
}

impl InMemorySettings {
    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_millis(self.visibility_timeout_ms)
    }

    pub fn purge_cooldown(&self) -> Duration {
        Duration::from_millis(self.purge_cooldown_ms)
    }
}

/// Complete harness configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessSettings {
    pub exchange: RetryBudget,
    pub drain: DrainSettings,
    pub push: PushSettings,
    pub runtime: PushRuntimeSettings,
    pub memory: InMemorySettings,
}

impl HarnessSettings {
    /// Load settings from defaults, an optional YAML file and `QH__` environment variables
    ///
    /// A missing `path` is an error; pass `None` to skip the file layer.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigurationError> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(
                config::File::from(path)
                    .required(true)
                    .format(config::FileFormat::Yaml),
            );
        }

        let settings: Self = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| ConfigurationError::Parsing {
                message: e.to_string(),
            })?
            .try_deserialize()
            .map_err(|e| ConfigurationError::Parsing {
                message: e.to_string(),
            })?;

        settings.validate()?;
        Ok(settings)
    }

    /// Check value ranges that serde cannot express
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.exchange.max_attempts == 0 {
            return Err(invalid("exchange.max_attempts must be at least 1"));
        }

        if self.drain.batch_size == 0 || self.drain.batch_size > MAX_RECEIVE_BATCH {
            return Err(invalid(&format!(
                "drain.batch_size must be between 1 and {}",
                MAX_RECEIVE_BATCH
            )));
        }

        if self.drain.max_rounds == 0 {
            return Err(invalid("drain.max_rounds must be at least 1"));
        }

        if self.push.input_queue.trim().is_empty() {
            return Err(ConfigurationError::Missing {
                key: "push.input_queue".to_string(),
            });
        }

        if self.push.max_messages_per_receive == 0
            || self.push.max_messages_per_receive > MAX_RECEIVE_BATCH
        {
            return Err(invalid(&format!(
                "push.max_messages_per_receive must be between 1 and {}",
                MAX_RECEIVE_BATCH
            )));
        }

        if self.push.critical_failure_threshold == 0 {
            return Err(invalid("push.critical_failure_threshold must be at least 1"));
        }

        if self.runtime.concurrency_limit == 0 {
            return Err(invalid("runtime.concurrency_limit must be at least 1"));
        }

        Ok(())
    }
}

fn invalid(message: &str) -> ConfigurationError {
    ConfigurationError::Invalid {
        message: message.to_string(),
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
