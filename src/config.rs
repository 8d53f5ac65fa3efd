use crate::tracker::DEFAULT_STATUS_CHECK_INTERVAL_MS;
use serde::{Deserialize, Serialize};
use std::{fs, path::Path, time::Duration};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(&'static str),
}

/// Storage key names of the three persisted maps
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageKeys {
    pub events: String,
    pub seen: String,
    pub unseen: String,
}

impl Default for StorageKeys {
    fn default() -> Self {
        Self {
            events: "events-trackers".to_owned(),
            seen: "seen-events".to_owned(),
            unseen: "un-seen-events".to_owned(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Polling period for trackers without their own `statusCheckInterval`
    pub default_status_check_interval_ms: u64,
    /// Time box for trackers without their own `maxTimeInProgress`
    pub default_max_time_in_progress_ms: Option<u64>,
    /// Finished trackers beyond this count are evicted, oldest first
    pub max_stored_event_trackers: Option<usize>,
    pub storage_keys: StorageKeys,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            default_status_check_interval_ms: DEFAULT_STATUS_CHECK_INTERVAL_MS,
            default_max_time_in_progress_ms: None,
            max_stored_event_trackers: None,
            storage_keys: StorageKeys::default(),
        }
    }
}

impl ProviderConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::from_json(&fs::read_to_string(path)?)
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_status_check_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "default_status_check_interval_ms must be positive",
            ));
        }
        if self.max_stored_event_trackers == Some(0) {
            return Err(ConfigError::Invalid(
                "max_stored_event_trackers must be positive",
            ));
        }
        let keys = &self.storage_keys;
        if keys.events == keys.seen || keys.events == keys.unseen || keys.seen == keys.unseen {
            return Err(ConfigError::Invalid("storage keys must be distinct"));
        }
        Ok(())
    }

    pub fn status_check_interval(&self, tracker_interval_ms: Option<u64>) -> Duration {
        Duration::from_millis(
            tracker_interval_ms
                .filter(|ms| *ms > 0)
                .unwrap_or(self.default_status_check_interval_ms),
        )
    }
}
