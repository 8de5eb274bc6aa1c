//! Engine and Host Configuration

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{EngineResult, UsageError};

/// Smallest output buffer a step may use
pub const MIN_BUFFER_SIZE: usize = 64;

/// Largest output buffer a step may use (16 MiB)
pub const MAX_BUFFER_SIZE: usize = 16 * 1024 * 1024;

/// Per-engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Output buffer size handed to each backend step, in bytes
    pub buffer_size: usize,

    /// Consecutive no-progress steps tolerated while input is available
    /// or finish is requested before the stream fails as stalled
    pub max_stalled_steps: u32,

    /// Thread name prefix for asynchronous workers
    pub worker_name: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            buffer_size: 8192,
            max_stalled_steps: 8,
            worker_name: "brook-worker".into(),
        }
    }
}

impl EngineConfig {
    /// Small steps, frequent notifications
    pub fn low_memory() -> Self {
        Self {
            buffer_size: 1024,
            ..Self::default()
        }
    }

    /// Large steps, fewer notifications
    pub fn high_throughput() -> Self {
        Self {
            buffer_size: 256 * 1024,
            ..Self::default()
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if !(MIN_BUFFER_SIZE..=MAX_BUFFER_SIZE).contains(&self.buffer_size) {
            return Err(format!("Invalid buffer size: {}", self.buffer_size));
        }
        if self.max_stalled_steps == 0 {
            return Err("max_stalled_steps must be at least 1".into());
        }
        if self.worker_name.is_empty() {
            return Err("worker_name must not be empty".into());
        }
        Ok(())
    }
}

/// Host loop configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Attached engines allowed in asynchronous mode at once
    pub max_async_streams: usize,

    /// Size of the chunks a host reads its input in
    pub input_chunk_size: usize,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            max_async_streams: 32,
            input_chunk_size: 64 * 1024,
        }
    }
}

impl HostConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.input_chunk_size == 0 {
            return Err("input_chunk_size must be non-zero".into());
        }
        Ok(())
    }
}

/// Everything a host application reads from its config file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrookConfig {
    pub engine: EngineConfig,
    pub host: HostConfig,
}

impl BrookConfig {
    /// Parse and validate a JSON document; missing fields take defaults
    pub fn from_json_str(json: &str) -> EngineResult<Self> {
        let config: BrookConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read a JSON config file
    pub fn load(path: impl AsRef<Path>) -> EngineResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> Result<(), UsageError> {
        self.engine
            .validate()
            .and_then(|_| self.host.validate())
            .map_err(UsageError::InvalidConfig)
    }
}
