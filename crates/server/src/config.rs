//! Server configuration
//!
//! The configuration is a YAML document; only its `server` section is read, other top-level
//! keys are ignored. Every field is optional and falls back to its default:
//!
//! ```yaml
//! server:
//!   port: 8080
//!   address: 0.0.0.0
//!   backlog: 128
//!   keepAliveTimeout: 15   # seconds, 0 disables keep-alive
//!   keepAliveLimit: 100    # requests per connection, 0 is unlimited
//!   gzipEnabled: true
//!   gzipLevel: 2
//!   deflateEnabled: true
//!   deflateLevel: 2
//!   chunkedEnabled: true
//!   chunkedMaxSize: 128
//!   readChunkSize: 1024
//!   writeBufferSize: 1024
//!   drainTimeout: 5        # seconds
//! ```

use crate::connection::ConnectionOptions;
use crate::transaction::{ChunkedOptions, KeepAliveOptions};
use fly_http::compression::CompressionConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use std::{fs, io};
use thiserror::Error;

/// Configuration file looked up when none is given on the command line.
pub const DEFAULT_CONFIG_PATH: &str = "fly.yaml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("could not read configuration {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid configuration: {source}")]
    Yaml {
        #[from]
        source: serde_yaml::Error,
    },
}

impl ConfigError {
    pub fn io<P: Into<PathBuf>>(path: P, source: io::Error) -> Self {
        Self::Io { path: path.into(), source }
    }
}

/// The whole configuration document.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Configuration {
    pub server: ServerConfig,
}

impl Configuration {
    /// Reads and parses the YAML file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] when the file cannot be read and [`ConfigError::Yaml`] when
    /// it is not a valid configuration.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| ConfigError::io(path, e))?;
        Self::from_yaml_str(&content)
    }

    /// Parses a YAML document. An empty document yields the defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] when the document is not a valid configuration.
    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(content)?)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ServerConfig {
    pub port: u16,
    pub address: String,
    pub backlog: u32,
    /// Seconds
    pub keep_alive_timeout: f64,
    pub keep_alive_limit: usize,
    pub gzip_enabled: bool,
    pub gzip_level: u32,
    pub deflate_enabled: bool,
    pub deflate_level: u32,
    pub chunked_enabled: bool,
    pub chunked_max_size: usize,
    pub read_chunk_size: usize,
    pub write_buffer_size: usize,
    /// Seconds
    pub drain_timeout: f64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            address: "0.0.0.0".to_owned(),
            backlog: 128,
            keep_alive_timeout: 15.0,
            keep_alive_limit: 100,
            gzip_enabled: true,
            gzip_level: 2,
            deflate_enabled: true,
            deflate_level: 2,
            chunked_enabled: true,
            chunked_max_size: 128,
            read_chunk_size: 1024,
            write_buffer_size: 1024,
            drain_timeout: 5.0,
        }
    }
}

impl ServerConfig {
    /// Keep-alive is enabled by a positive timeout.
    pub fn keep_alive(&self) -> KeepAliveOptions {
        let timeout = seconds(self.keep_alive_timeout);
        KeepAliveOptions { enabled: !timeout.is_zero(), timeout, limit: self.keep_alive_limit }
    }

    pub fn chunked(&self) -> ChunkedOptions {
        ChunkedOptions { enabled: self.chunked_enabled, chunk_size: self.chunked_max_size }
    }

    pub fn compression(&self) -> CompressionConfig {
        CompressionConfig {
            gzip_enabled: self.gzip_enabled,
            gzip_level: self.gzip_level,
            deflate_enabled: self.deflate_enabled,
            deflate_level: self.deflate_level,
        }
    }

    pub fn connection_options(&self) -> ConnectionOptions {
        ConnectionOptions {
            read_chunk_size: self.read_chunk_size,
            write_buffer_size: self.write_buffer_size,
            drain_timeout: seconds(self.drain_timeout),
        }
    }
}

/// Negative, NaN and overflowing values count as zero.
fn seconds(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or_default()
}
