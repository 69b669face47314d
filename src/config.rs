use crate::error::{Result, SyncError};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How index arithmetic treats positions outside the container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IndexPolicy {
    /// Clamp to the nearest valid position
    #[default]
    Clamp,
    /// Refuse with `SyncError::LocalInvariantViolation`
    FailFast,
}

/// Tuning knobs for a board session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub poll_interval_ms: u64,
    pub debounce_ms: u64,
    /// Idle time after the last edit before the editing flag drops
    pub quiet_period_ms: u64,
    pub undo_capacity: usize,
    pub remote_timeout_ms: Option<u64>,
    pub index_policy: IndexPolicy,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 5_000,
            debounce_ms: 300,
            quiet_period_ms: 1_500,
            undo_capacity: 20,
            remote_timeout_ms: Some(15_000),
            index_policy: IndexPolicy::Clamp,
        }
    }
}

impl SyncConfig {
    /// Parses a JSON document; missing fields take their defaults
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: SyncConfig =
            serde_json::from_str(json).map_err(|e| SyncError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_ms == 0 {
            return Err(SyncError::Config("poll_interval_ms must be positive".into()));
        }
        if self.debounce_ms == 0 {
            return Err(SyncError::Config("debounce_ms must be positive".into()));
        }
        if self.undo_capacity == 0 {
            return Err(SyncError::Config("undo_capacity must be positive".into()));
        }
        if self.remote_timeout_ms == Some(0) {
            return Err(SyncError::Config("remote_timeout_ms must be positive".into()));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn quiet_period(&self) -> Duration {
        Duration::from_millis(self.quiet_period_ms)
    }

    pub fn remote_timeout(&self) -> Option<Duration> {
        self.remote_timeout_ms.map(Duration::from_millis)
    }
}
