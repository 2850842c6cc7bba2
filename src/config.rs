use crate::membership::{NodeId, Transport};
use crate::persistence::schema::{DEFAULT_TABLE, TABLE_VERSION};
use crate::util::{ConfigError, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Module parameters. Every field has a default, so a config file only
/// needs to name what it changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClustererConfig {
    /// Id of the local node; must be positive.
    pub current_id: NodeId,
    pub transport: Transport,
    pub db_table: String,
    pub table_version: u32,
    pub store_retry_attempts: usize,
    pub store_retry_base_ms: u64,
    /// Wall-clock cap on store reconnect attempts; zero means unbounded.
    pub store_retry_budget_ms: u64,
    pub flush_interval_ms: u64,
}

impl Default for ClustererConfig {
    fn default() -> Self {
        Self {
            current_id: 0,
            transport: Transport::default(),
            db_table: DEFAULT_TABLE.to_string(),
            table_version: TABLE_VERSION,
            store_retry_attempts: 3,
            store_retry_base_ms: 50,
            store_retry_budget_ms: 5_000,
            flush_interval_ms: 10_000,
        }
    }
}

impl ClustererConfig {
    pub fn for_node(current_id: NodeId) -> Self {
        Self {
            current_id,
            ..Self::default()
        }
    }

    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::from_json_str(&fs::read_to_string(path)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.current_id <= 0 {
            return Err(ConfigError::Invalid(format!(
                "current_id must be positive, got {}",
                self.current_id
            )));
        }
        if self.db_table.trim().is_empty() {
            return Err(ConfigError::Invalid("db_table is empty".into()));
        }
        if self.flush_interval_ms == 0 {
            return Err(ConfigError::Invalid("flush_interval_ms must be non-zero".into()));
        }
        Ok(())
    }

    /// Back-off used when the store is unavailable; at least one attempt is
    /// always made.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::exponential(
            self.store_retry_attempts.max(1),
            Duration::from_millis(self.store_retry_base_ms),
        )
        .with_max_delay(Duration::from_secs(2))
        .with_jitter(0.1)
        .with_time_budget(Duration::from_millis(self.store_retry_budget_ms))
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }
}
