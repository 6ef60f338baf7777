//! Runtime Configuration
//!
//! Tunables for a [`Runtime`](crate::reactive::Runtime). Every field has a
//! default, so a config file only names what it changes:
//!
//! ```
//! use trellis_core::RuntimeConfig;
//!
//! let config = RuntimeConfig::from_json(r#"{ "teardown_delay_ms": 250 }"#).unwrap();
//! assert_eq!(config.teardown_delay().as_millis(), 250);
//! assert_eq!(config.max_effect_runs(), 10_000);
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Default bound on effect runs in a single flush.
pub const DEFAULT_MAX_EFFECT_RUNS: usize = 10_000;

/// Configuration for a reactive runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// How long a dependency stays mounted after losing its last active
    /// subscriber. A re-activation inside this window cancels the teardown.
    ///
    /// `0` tears down at the end of the pass that deactivated it, which still
    /// absorbs an unsubscribe/resubscribe pair inside one batch.
    teardown_delay_ms: u64,

    /// Upper bound on effect runs within one flush. Exceeding it means effects
    /// keep writing signals that re-trigger each other.
    max_effect_runs: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            teardown_delay_ms: 0,
            max_effect_runs: DEFAULT_MAX_EFFECT_RUNS,
        }
    }
}

impl RuntimeConfig {
    /// Parse a configuration from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Set the teardown debounce window.
    pub fn with_teardown_delay(mut self, delay: Duration) -> Self {
        self.teardown_delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Set the bound on effect runs per flush. Clamped to at least 1.
    pub fn with_max_effect_runs(mut self, runs: usize) -> Self {
        self.max_effect_runs = runs.max(1);
        self
    }

    /// The teardown debounce window.
    pub fn teardown_delay(&self) -> Duration {
        Duration::from_millis(self.teardown_delay_ms)
    }

    /// The bound on effect runs per flush.
    pub fn max_effect_runs(&self) -> usize {
        self.max_effect_runs.max(1)
    }
}
