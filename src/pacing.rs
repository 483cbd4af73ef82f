//! Fixed settle delays between campaign steps.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Delays in milliseconds. Zero disables a delay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PacingConfig {
    pub after_provision_ms: u64,
    pub after_start_ms: u64,
    pub after_generators_ms: u64,
    /// Between writing a constant and reading it back.
    pub constant_settle_ms: u64,
    /// Between writing a string and reading it back.
    pub string_settle_ms: u64,
    /// Once after the string session starts.
    pub string_warmup_ms: u64,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            after_provision_ms: 1000,
            after_start_ms: 1000,
            after_generators_ms: 2000,
            constant_settle_ms: 1000,
            string_settle_ms: 300,
            string_warmup_ms: 2000,
        }
    }
}

impl PacingConfig {
    /// No delays at all; for simulator runs.
    pub fn immediate() -> Self {
        Self {
            after_provision_ms: 0,
            after_start_ms: 0,
            after_generators_ms: 0,
            constant_settle_ms: 0,
            string_settle_ms: 0,
            string_warmup_ms: 0,
        }
    }

    pub fn after_provision(&self) -> Duration {
        Duration::from_millis(self.after_provision_ms)
    }

    pub fn after_start(&self) -> Duration {
        Duration::from_millis(self.after_start_ms)
    }

    pub fn after_generators(&self) -> Duration {
        Duration::from_millis(self.after_generators_ms)
    }

    pub fn constant_settle(&self) -> Duration {
        Duration::from_millis(self.constant_settle_ms)
    }

    pub fn string_settle(&self) -> Duration {
        Duration::from_millis(self.string_settle_ms)
    }

    pub fn string_warmup(&self) -> Duration {
        Duration::from_millis(self.string_warmup_ms)
    }
}

/// Sleep for `delay`, if any.
pub async fn settle(stage: &str, delay: Duration) {
    if delay.is_zero() {
        return;
    }
    debug!(stage, delay_ms = delay.as_millis() as u64, "settling");
    tokio::time::sleep(delay).await;
}
