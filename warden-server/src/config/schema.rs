//! Configuration schema structs

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use warden_utils::LogOutput;

/// Root configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub probe: ProbeConfig,
    pub delegation: DelegationConfig,
    pub supervisor: SupervisorConfig,
    pub extensions: ExtensionsConfig,
    pub logging: LoggingConfig,
}

/// How the external HTTP layer authenticates requests
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    #[default]
    Password,
    None,
}

/// Settings handed to the server when a new instance starts
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub auth: AuthMode,
    /// Host and port for the HTTP layer
    pub bind_addr: String,
    /// Instance socket; defaults to the runtime directory
    pub socket_path: Option<PathBuf>,
    /// Domains the HTTP layer proxies
    pub proxy_domains: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            auth: AuthMode::Password,
            bind_addr: "127.0.0.1:8080".into(),
            socket_path: None,
            proxy_domains: Vec::new(),
        }
    }
}

/// Existing-instance probe settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    /// Consult the last-instance record (default: true)
    pub use_last_instance: bool,
    /// Bound on the liveness connect; unset waits indefinitely
    pub liveness_timeout_ms: Option<u64>,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            use_last_instance: true,
            liveness_timeout_ms: None,
        }
    }
}

impl ProbeConfig {
    pub fn liveness_timeout(&self) -> Option<Duration> {
        self.liveness_timeout_ms.map(Duration::from_millis)
    }
}

/// Delegation settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DelegationConfig {
    /// Bound on connect + write to an existing instance; unset waits indefinitely
    pub timeout_ms: Option<u64>,
}

impl DelegationConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

/// Supervision settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Run the server in a supervised child process (default: false)
    pub enabled: bool,
    /// Bound on waiting for a child's first message; unset waits indefinitely
    pub handshake_timeout_ms: Option<u64>,
}

impl SupervisorConfig {
    pub fn handshake_timeout(&self) -> Option<Duration> {
        self.handshake_timeout_ms.map(Duration::from_millis)
    }
}

/// Extension store settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtensionsConfig {
    /// Directory holding installed extensions
    pub dir: Option<PathBuf>,
}

/// Log destination as written in the config file
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogOutputSetting {
    #[default]
    Stderr,
    File,
    Both,
}

impl From<LogOutputSetting> for LogOutput {
    fn from(setting: LogOutputSetting) -> Self {
        match setting {
            LogOutputSetting::Stderr => LogOutput::Stderr,
            LogOutputSetting::File => LogOutput::File,
            LogOutputSetting::Both => LogOutput::Both,
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub output: LogOutputSetting,
    pub file_name: Option<String>,
}
