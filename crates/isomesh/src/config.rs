//! Registry configuration.
//!
//! Timeouts and buffer sizes with defaults, an environment overlay and a builder.
//! The struct is serde-enabled so an application can embed it in its own settings.

use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

use crate::error::Error;
use crate::error::Result;

/// Settings for one `Services` registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Bound on a remote method call, from send to response.
    #[serde(default = "default_call_timeout")]
    pub call_timeout: Duration,

    /// Bound on a remote subscription acknowledgement.
    #[serde(default = "default_subscribe_timeout")]
    pub subscribe_timeout: Duration,

    /// Buffered availability changes per `changes()` receiver.
    #[serde(default = "default_changes_capacity")]
    pub changes_capacity: usize,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Defaults overlaid with `ISOMESH_CALL_TIMEOUT_MS`, `ISOMESH_SUBSCRIBE_TIMEOUT_MS`
    /// and `ISOMESH_CHANGES_CAPACITY`.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("ISOMESH_CALL_TIMEOUT_MS") {
            config.call_timeout = Duration::from_millis(parse("call_timeout", &val)?);
        }
        if let Ok(val) = std::env::var("ISOMESH_SUBSCRIBE_TIMEOUT_MS") {
            config.subscribe_timeout = Duration::from_millis(parse("subscribe_timeout", &val)?);
        }
        if let Ok(val) = std::env::var("ISOMESH_CHANGES_CAPACITY") {
            config.changes_capacity = parse("changes_capacity", &val)?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<&Self> {
        if self.call_timeout.is_zero() {
            return Err(Error::InvalidConfiguration { key: "call_timeout", value: "0".into() });
        }
        if self.subscribe_timeout.is_zero() {
            return Err(Error::InvalidConfiguration { key: "subscribe_timeout", value: "0".into() });
        }
        if self.changes_capacity == 0 {
            return Err(Error::InvalidConfiguration { key: "changes_capacity", value: "0".into() });
        }
        Ok(self)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            call_timeout: default_call_timeout(),
            subscribe_timeout: default_subscribe_timeout(),
            changes_capacity: default_changes_capacity(),
        }
    }
}

fn parse<T: std::str::FromStr>(key: &'static str, val: &str) -> Result<T> {
    val.trim().parse().map_err(|_| Error::InvalidConfiguration { key, value: val.to_string() })
}

fn default_call_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_subscribe_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_changes_capacity() -> usize {
    64
}

#[derive(Debug, Default)]
pub struct ConfigBuilder {
    call_timeout: Option<Duration>,
    subscribe_timeout: Option<Duration>,
    changes_capacity: Option<usize>,
}

impl ConfigBuilder {
    #[must_use]
    pub fn call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn subscribe_timeout(mut self, timeout: Duration) -> Self {
        self.subscribe_timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn changes_capacity(mut self, capacity: usize) -> Self {
        self.changes_capacity = Some(capacity);
        self
    }

    /// Builds the configuration, validating all values.
    pub fn build(self) -> Result<Config> {
        let mut config = Config::default();

        if let Some(v) = self.call_timeout {
            config.call_timeout = v;
        }
        if let Some(v) = self.subscribe_timeout {
            config.subscribe_timeout = v;
        }
        if let Some(v) = self.changes_capacity {
            config.changes_capacity = v;
        }

        config.validate()?;
        Ok(config)
    }
}
