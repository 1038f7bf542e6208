use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;

pub const DEFAULT_SERVICE: &str = "org.ofono";
pub const DEFAULT_OBJECT_PATH: &str = "/";
pub const DEFAULT_RETRY_DELAY_MS: u64 = 2_000;
pub const DEFAULT_EVENT_CAPACITY: usize = 64;

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct ManagerConfig {
    /// Bus name of the remote modem manager service.
    pub service: String,
    /// Object path of the manager object on that service.
    pub object_path: String,
    /// Delay before a timed-out negotiation step is retried.
    pub retry_delay_ms: u64,
    /// Capacity of the async event broadcast channel.
    pub event_capacity: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            service: DEFAULT_SERVICE.to_owned(),
            object_path: DEFAULT_OBJECT_PATH.to_owned(),
            retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl ManagerConfig {
    pub fn from_toml(input: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(input)?)
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Broadcast channels reject a zero capacity.
    pub(crate) fn event_capacity(&self) -> usize {
        self.event_capacity.max(1)
    }
}
