//! Configuration loader

use std::path::Path;

use warden_utils::{config_file, Result, WardenError};

use super::{AppConfig, DEFAULT_CONFIG_TOML};

/// Configuration loader
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from an explicit path, or the default location.
    ///
    /// A missing file at the default location yields defaults; a missing
    /// file that was asked for by name is an error.
    pub fn load(explicit: Option<&Path>) -> Result<AppConfig> {
        if let Some(path) = explicit {
            if !path.exists() {
                return Err(WardenError::ConfigNotFound(path.to_path_buf()));
            }
            return Self::load_from_path(path);
        }

        let path = config_file();
        if path.exists() {
            Self::load_from_path(&path)
        } else {
            Self::parse(DEFAULT_CONFIG_TOML, &path)
        }
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<AppConfig> {
        let content = std::fs::read_to_string(path).map_err(|e| WardenError::FileRead {
            path: path.to_path_buf(),
            source: e,
        })?;

        Self::parse(&content, path)
    }

    /// Parse configuration from string
    pub fn parse(content: &str, path: &Path) -> Result<AppConfig> {
        toml::from_str(content).map_err(|e| WardenError::ConfigInvalid {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Validate configuration
    pub fn validate(config: &AppConfig) -> Result<()> {
        if config.server.bind_addr.trim().is_empty() {
            return Err(WardenError::config("server.bind_addr must not be empty"));
        }

        if let Some(path) = &config.server.socket_path {
            if path.as_os_str().is_empty() {
                return Err(WardenError::config("server.socket_path must not be empty"));
            }
        }

        let timeouts = [
            ("probe.liveness_timeout_ms", config.probe.liveness_timeout_ms),
            ("delegation.timeout_ms", config.delegation.timeout_ms),
            (
                "supervisor.handshake_timeout_ms",
                config.supervisor.handshake_timeout_ms,
            ),
        ];
        for (name, value) in timeouts {
            if value == Some(0) {
                return Err(WardenError::config(format!(
                    "{} must be greater than 0 (omit it to wait without limit)",
                    name
                )));
            }
        }

        Ok(())
    }

    /// Load and validate
    pub fn load_and_validate(explicit: Option<&Path>) -> Result<AppConfig> {
        let config = Self::load(explicit)?;
        Self::validate(&config)?;
        Ok(config)
    }
}
