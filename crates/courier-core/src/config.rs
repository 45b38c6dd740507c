//! Job configuration types.

use std::time::Duration;

use derive_builder::Builder;
use serde::{Deserialize, Serialize};

/// Default size of a single copy chunk (1 MiB).
pub const DEFAULT_CHUNK_SIZE: u64 = 1024 * 1024;

/// Configuration shared by all job kinds.
#[derive(Debug, Clone, Builder, Serialize, Deserialize)]
#[builder(setter(into), build_fn(validate = "Self::validate"))]
pub struct JobConfig {
    /// Bytes copied per chunk; progress and cancellation are observed
    /// between chunks.
    #[builder(default = "DEFAULT_CHUNK_SIZE")]
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,

    /// Give up on an unanswered question after this long (None = wait
    /// until the controller answers, cancels or goes away).
    #[builder(default)]
    #[serde(default)]
    pub ask_timeout: Option<Duration>,

    /// How often a blocked question re-checks cancellation and whether the
    /// controller is still listening.
    #[builder(default = "Duration::from_millis(100)")]
    #[serde(default = "default_interval")]
    pub liveness_interval: Duration,

    /// Minimum time between two mid-file progress events.
    #[builder(default = "Duration::from_millis(100)")]
    #[serde(default = "default_interval")]
    pub progress_interval: Duration,

    /// Follow symbolic links when deep counting.
    #[builder(default = "false")]
    #[serde(default)]
    pub follow_symlinks: bool,

    /// Compare the bytes to copy against the destination's free space
    /// before starting.
    #[builder(default = "true")]
    #[serde(default = "default_true")]
    pub check_free_space: bool,
}

fn default_chunk_size() -> u64 {
    DEFAULT_CHUNK_SIZE
}

fn default_interval() -> Duration {
    Duration::from_millis(100)
}

fn default_true() -> bool {
    true
}

impl JobConfigBuilder {
    fn validate(&self) -> Result<(), String> {
        if self.chunk_size == Some(0) {
            return Err("Chunk size must be greater than zero".to_string());
        }
        if self.liveness_interval == Some(Duration::ZERO) {
            return Err("Liveness interval must be greater than zero".to_string());
        }
        Ok(())
    }
}

impl JobConfig {
    /// Create a new job config builder.
    pub fn builder() -> JobConfigBuilder {
        JobConfigBuilder::default()
    }
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            ask_timeout: None,
            liveness_interval: default_interval(),
            progress_interval: default_interval(),
            follow_symlinks: false,
            check_free_space: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let config = JobConfig::builder()
            .chunk_size(4096u64)
            .ask_timeout(Some(Duration::from_secs(5)))
            .follow_symlinks(true)
            .build()
            .unwrap();

        assert_eq!(config.chunk_size, 4096);
        assert_eq!(config.ask_timeout, Some(Duration::from_secs(5)));
        assert!(config.follow_symlinks);
        assert!(config.check_free_space);
    }

    #[test]
    fn test_config_rejects_zero_chunk() {
        assert!(JobConfig::builder().chunk_size(0u64).build().is_err());
    }

    #[test]
    fn test_config_default() {
        let config = JobConfig::default();
        assert_eq!(config.chunk_size, DEFAULT_CHUNK_SIZE);
        assert!(config.ask_timeout.is_none());
        assert!(!config.follow_symlinks);
    }
}
