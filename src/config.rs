//! Session configuration
//!
//! Loaded from JSON; every field has a default so a partial document is fine.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Environment variable holding the path of a JSON session configuration.
pub const CONFIG_ENV_VAR: &str = "DEPTHAI_SESSION_CONFIG";

/// What a producer does when a channel's queue is full.
///
/// Either way the producer keeps running; overload costs frames, not progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Evict the oldest queued frame to make room.
    #[default]
    DropOldest,
    /// Discard the incoming frame.
    DropNewest,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Capacity of each output channel.
    pub queue_size: usize,
    pub overflow: OverflowPolicy,
    /// Wait used by the acquisition loop for each iteration.
    pub get_timeout_ms: u64,
    /// Bind this device instead of the first free one.
    pub device_id: Option<String>,
    /// Name of the acquisition loop thread.
    pub thread_name: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            queue_size: 4,
            overflow: OverflowPolicy::DropOldest,
            get_timeout_ms: 200,
            device_id: None,
            thread_name: "depthai-acquisition".to_string(),
        }
    }
}

impl SessionConfig {
    pub fn from_json_str(s: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_json_str(&content)?;
        tracing::debug!("Loaded session config from {}", path.display());
        Ok(config)
    }

    /// Load from the file named by `DEPTHAI_SESSION_CONFIG`, or use defaults when unset.
    pub fn from_env() -> Result<Self> {
        match std::env::var(CONFIG_ENV_VAR) {
            Ok(path) => Self::load(path),
            Err(_) => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.queue_size == 0 {
            return Err(Error::Config("queue_size must be at least 1".to_string()));
        }
        if self.get_timeout_ms == 0 {
            return Err(Error::Config("get_timeout_ms must be non-zero".to_string()));
        }
        Ok(())
    }

    pub fn get_timeout(&self) -> Duration {
        Duration::from_millis(self.get_timeout_ms)
    }

    pub fn with_queue_size(mut self, queue_size: usize) -> Self {
        self.queue_size = queue_size;
        self
    }

    pub fn with_overflow(mut self, overflow: OverflowPolicy) -> Self {
        self.overflow = overflow;
        self
    }

    /// Sub-millisecond remainders round up, so any non-zero wait stays non-zero.
    pub fn with_get_timeout(mut self, timeout: Duration) -> Self {
        self.get_timeout_ms = u64::try_from(timeout.as_micros().div_ceil(1000)).unwrap_or(u64::MAX);
        self
    }

    pub fn with_device_id(mut self, device_id: impl Into<String>) -> Self {
        self.device_id = Some(device_id.into());
        self
    }
}
