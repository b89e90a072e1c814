//! warden-utils: Common utilities shared across warden crates
//!
//! This crate provides:
//! - Unified error types and the failure taxonomy ([`WardenError`], [`ErrorKind`], [`Result`])
//! - Logging infrastructure ([`init_logging_with_config`], [`LogConfig`])
//! - XDG-compliant path utilities ([`paths`] module)

pub mod error;
pub mod logging;
pub mod paths;

// Re-export main types at crate root for convenience
pub use error::{ErrorKind, Result, WardenError};
pub use logging::{init_logging_with_config, LogConfig, LogOutput};

// Re-export commonly used path functions
pub use paths::{
    channel_socket_path, config_dir, config_file, data_dir, extensions_dir, heartbeat_file,
    last_instance_file, log_dir, runtime_dir, socket_path, state_dir,
};
