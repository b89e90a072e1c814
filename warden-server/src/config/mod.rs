//! Configuration management for warden
//!
//! Configuration is read once per invocation; flags given on the command
//! line take precedence over the file, which takes precedence over the
//! built-in defaults.

mod defaults;
mod loader;
mod schema;

pub use defaults::DEFAULT_CONFIG_TOML;
pub use loader::ConfigLoader;
pub use schema::*;
