//! # Configuration
//!
//! Loaded once at startup from TOML. Every field has a default, and a
//! missing section falls back to its defaults.
//!
//! ```toml
//! [server]
//! port = 50001
//! max_entity_count = 64
//! replication = "delta"
//!
//! [client]
//! server_addr = "127.0.0.1:50001"
//! name = "Alice"
//!
//! [transport]
//! poll_interval_ms = 50
//! queue_capacity = 4096
//! ```

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::client::ClientConfig;
use crate::server::ServerConfig;
use crate::transport::TransportConfig;

/// Configuration failures.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config {path}: {source}")]
    Read {
        /// File path.
        path: PathBuf,
        /// OS error.
        #[source]
        source: std::io::Error,
    },

    /// The TOML is malformed or has wrongly typed fields.
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    /// The values parse but cannot work together.
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Result type for configuration loading.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Complete configuration for a client or server process.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NetConfig {
    /// Server settings.
    pub server: ServerConfig,
    /// Client settings.
    pub client: ClientConfig,
    /// Socket settings.
    pub transport: TransportConfig,
}

impl NetConfig {
    /// Reads and validates a TOML file.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Read`] if the file cannot be read, otherwise as for
    /// [`NetConfig::from_toml_str`].
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Parses and validates TOML text.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Parse`] for malformed TOML, [`ConfigError::Invalid`]
    /// for values out of range.
    pub fn from_toml_str(text: &str) -> ConfigResult<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks cross-field constraints.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Invalid`] naming the first bad field.
    pub fn validate(&self) -> ConfigResult<()> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_owned()));

        if self.server.max_entity_count == 0 {
            return invalid("server.max_entity_count must be at least 1");
        }
        if self.server.tick_rate == 0 {
            return invalid("server.tick_rate must be at least 1");
        }
        if self.server.state_interval.is_nan() || self.server.state_interval < 0.0 {
            return invalid("server.state_interval must be non-negative");
        }
        if self.server.session_timeout.is_nan() || self.server.session_timeout <= 0.0 {
            return invalid("server.session_timeout must be positive");
        }
        if self.client.hello_interval.is_nan() || self.client.hello_interval < 0.0 {
            return invalid("client.hello_interval must be non-negative");
        }
        if self.client.input_interval.is_nan() || self.client.input_interval < 0.0 {
            return invalid("client.input_interval must be non-negative");
        }
        if self.transport.recv_buffer_size == 0 {
            return invalid("transport.recv_buffer_size must be at least 1");
        }
        if self.transport.queue_capacity == 0 {
            return invalid("transport.queue_capacity must be at least 1");
        }
        Ok(())
    }
}
