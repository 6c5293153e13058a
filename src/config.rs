//! Server Configuration Module
//!
//! Configuration for the Filehub server with validation, defaults, and a
//! builder, plus JSON load/store helpers for operator tooling.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Configuration for the Filehub server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address to bind the listener to
    pub bind_address: String,

    /// Deadline for the username handshake after accept
    pub handshake_timeout: Duration,

    /// Idle deadline between commands within an accepted session
    pub idle_timeout: Duration,

    /// Inactivity deadline for each chunk of a bulk transfer
    pub transfer_timeout: Duration,

    /// Maximum size of one control frame in bytes
    pub max_frame_bytes: usize,

    /// Chunk size for bulk transfers in bytes
    pub transfer_chunk_bytes: usize,

    /// Maximum accepted filename length in bytes
    pub max_filename_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            handshake_timeout: Duration::from_secs(60),
            idle_timeout: Duration::from_secs(300), // 5 minutes
            transfer_timeout: Duration::from_secs(60),
            max_frame_bytes: 1024,
            transfer_chunk_bytes: 4096,
            max_filename_bytes: 255,
        }
    }
}

impl ServerConfig {
    /// Load a configuration from a JSON file
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config: ServerConfig = serde_json::from_str(&text)?;
        ConfigBuilder { config: config.clone() }.validate()?;
        Ok(config)
    }

    /// Write this configuration to a JSON file
    pub fn to_json_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let text = serde_json::to_string_pretty(self)?;
        std::fs::write(path.as_ref(), text)?;
        Ok(())
    }
}

/// Configuration builder with validation and defaults
#[derive(Default)]
pub struct ConfigBuilder {
    config: ServerConfig,
}

impl ConfigBuilder {
    /// Create a new configuration builder with defaults
    pub fn new() -> Self {
        Self {
            config: ServerConfig::default(),
        }
    }

    /// Set the bind address
    pub fn bind_address(mut self, address: impl Into<String>) -> Self {
        self.config.bind_address = address.into();
        self
    }

    /// Set the handshake deadline
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.config.handshake_timeout = timeout;
        self
    }

    /// Set the idle deadline between commands
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.config.idle_timeout = timeout;
        self
    }

    /// Set the bulk transfer inactivity deadline
    pub fn transfer_timeout(mut self, timeout: Duration) -> Self {
        self.config.transfer_timeout = timeout;
        self
    }

    /// Set the maximum control frame size
    pub fn max_frame_bytes(mut self, bytes: usize) -> Self {
        self.config.max_frame_bytes = bytes;
        self
    }

    /// Set the bulk transfer chunk size
    pub fn transfer_chunk_bytes(mut self, bytes: usize) -> Self {
        self.config.transfer_chunk_bytes = bytes;
        self
    }

    /// Set the maximum accepted filename length
    pub fn max_filename_bytes(mut self, bytes: usize) -> Self {
        self.config.max_filename_bytes = bytes;
        self
    }

    /// Build and validate the configuration
    pub fn build(self) -> Result<ServerConfig> {
        self.validate()?;
        Ok(self.config)
    }

    /// Validate the configuration
    fn validate(&self) -> Result<()> {
        if self.config.bind_address.is_empty() {
            return Err(anyhow::anyhow!("Bind address cannot be empty"));
        }

        if self.config.max_frame_bytes < 64 {
            return Err(anyhow::anyhow!(
                "Control frame size must be at least 64 bytes"
            ));
        }

        if self.config.transfer_chunk_bytes == 0 {
            return Err(anyhow::anyhow!("Transfer chunk size cannot be 0"));
        }

        // The wire contract promises peers at least 255 bytes of filename.
        if self.config.max_filename_bytes < 255 {
            return Err(anyhow::anyhow!(
                "Maximum filename length must be at least 255 bytes"
            ));
        }

        if self.config.handshake_timeout.is_zero()
            || self.config.idle_timeout.is_zero()
            || self.config.transfer_timeout.is_zero()
        {
            return Err(anyhow::anyhow!("Timeouts cannot be zero"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = ConfigBuilder::new().build().unwrap();
        assert_eq!(config.max_frame_bytes, 1024);
        assert_eq!(config.transfer_chunk_bytes, 4096);
        assert_eq!(config.idle_timeout, Duration::from_secs(300));
    }

    #[test]
    fn test_rejects_small_filename_bound() {
        let result = ConfigBuilder::new().max_filename_bytes(100).build();
        assert!(result.is_err());
    }

    #[test]
    fn test_rejects_zero_timeouts() {
        let result = ConfigBuilder::new()
            .idle_timeout(Duration::from_secs(0))
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_json_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("filehub.json");

        let config = ConfigBuilder::new()
            .bind_address("127.0.0.1")
            .idle_timeout(Duration::from_secs(120))
            .build()
            .unwrap();
        config.to_json_file(&path).unwrap();

        let loaded = ServerConfig::from_json_file(&path).unwrap();
        assert_eq!(loaded.bind_address, "127.0.0.1");
        assert_eq!(loaded.idle_timeout, Duration::from_secs(120));
    }
}
