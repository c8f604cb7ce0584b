//! # Client Configuration
//!
//! `ClientConfig` replaces ad-hoc option hashes with explicit fields. It can
//! be built in code or loaded from JSON; timeouts are expressed in
//! milliseconds on the wire format.
//!
//! ```json
//! {
//!   "endpoints": ["127.0.0.1:11211"],
//!   "raw_mode": true,
//!   "max_idle": 2,
//!   "max_total": 4,
//!   "read_timeout_ms": 500
//! }
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use memc_common::{ArgumentError, Endpoint, DEFAULT_PORT};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default per-operation socket deadline.
pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(1);

/// Errors raised while loading a configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(#[from] ArgumentError),
}

/// Configuration for the client and its per-endpoint pools.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClientConfig {
    /// Servers this client may address, e.g. "127.0.0.1:11211".
    pub endpoints: Vec<Endpoint>,
    /// Values are sent and returned as raw bytes. Must be `true`.
    pub raw_mode: bool,
    /// Maximum idle connections kept per endpoint.
    pub max_idle: usize,
    /// Maximum total connections (idle + in-use) per endpoint.
    pub max_total: usize,
    /// TCP read timeout; `None` blocks indefinitely.
    #[serde(rename = "read_timeout_ms", with = "millis")]
    pub read_timeout: Option<Duration>,
    /// TCP write timeout.
    #[serde(rename = "write_timeout_ms", with = "millis")]
    pub write_timeout: Option<Duration>,
    /// TCP connect timeout.
    #[serde(rename = "connect_timeout_ms", with = "millis")]
    pub connect_timeout: Option<Duration>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        let localhost = Endpoint::new("127.0.0.1", DEFAULT_PORT)
            .map(|endpoint| vec![endpoint])
            .unwrap_or_default();
        ClientConfig {
            endpoints: localhost,
            raw_mode: true,
            max_idle: 8,
            max_total: 16,
            read_timeout: Some(DEFAULT_IO_TIMEOUT),
            write_timeout: Some(DEFAULT_IO_TIMEOUT),
            connect_timeout: Some(DEFAULT_IO_TIMEOUT),
        }
    }
}

impl ClientConfig {
    /// Default configuration addressing the given endpoints.
    pub fn with_endpoints(endpoints: impl IntoIterator<Item = Endpoint>) -> Self {
        ClientConfig {
            endpoints: endpoints.into_iter().collect(),
            ..ClientConfig::default()
        }
    }

    /// Parses and validates a JSON document.
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let config: ClientConfig = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&raw)
    }

    /// Checks the settings the client cannot run with.
    pub fn validate(&self) -> Result<(), ArgumentError> {
        if self.endpoints.is_empty() {
            return Err(ArgumentError::NoEndpoints);
        }
        if !self.raw_mode {
            return Err(ArgumentError::RawModeRequired);
        }
        if self.max_total == 0 {
            return Err(ArgumentError::InvalidPoolLimit { field: "max_total" });
        }
        Ok(())
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(duration) => serializer.serialize_some(&(duration.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
    }
}
