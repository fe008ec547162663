use std::path::Path;
use std::time::Duration;
use serde::Deserialize;
use crate::upload::{Result, UploadError};

/// Orchestrator tuning.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct UploaderConfig {
    /// Slots, i.e. attempts in flight at once
    pub max_concurrent: usize,
    /// Attempts per task before it ends in `error`
    pub max_retries: u32,
    /// Pause before a failed task re-enters the queue. Zero re-queues at once.
    pub retry_delay_ms: u64,
    /// Buffered events per subscriber
    pub event_capacity: usize,
    /// Read image dimensions before registration
    pub probe_dimensions: bool,
}

impl Default for UploaderConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 3,
            max_retries: 3,
            retry_delay_ms: 0,
            event_capacity: 1024,
            probe_dimensions: true,
        }
    }
}

impl UploaderConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent == 0 {
            return Err(UploadError::Config("max_concurrent must be at least 1".to_string()));
        }
        if self.max_retries == 0 {
            return Err(UploadError::Config("max_retries must be at least 1".to_string()));
        }
        if self.event_capacity == 0 {
            return Err(UploadError::Config("event_capacity must be at least 1".to_string()));
        }
        Ok(())
    }
}

/// Album API connection used by the command line uploader.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub endpoint: String,
    pub album_id: String,
    #[serde(default)]
    pub token: Option<String>,
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub client: ClientConfig,
    #[serde(default)]
    pub uploader: UploaderConfig,
}

impl Config {
    pub fn from_toml_str(config_str: &str) -> Result<Config> {
        let config: Config = toml::from_str(config_str)
            .map_err(|err| UploadError::Config(err.to_string()))?;
        config.uploader.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Config> {
        let config_str = std::fs::read_to_string(path)?;
        Self::from_toml_str(&config_str)
    }
}
