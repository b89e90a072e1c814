//! Where warden keeps its files
//!
//! Sockets and the last-instance record are per-login state and live in the
//! runtime directory. Configuration, logs, the heartbeat and installed
//! extensions follow the XDG base directories, falling back to the
//! conventional dot-directories under `$HOME`.

use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use uuid::Uuid;

const APP_NAME: &str = "warden";

/// Which XDG base a persistent directory hangs off
#[derive(Clone, Copy)]
enum Base {
    Config,
    State,
    Data,
}

impl Base {
    fn from_project(self, dirs: &ProjectDirs) -> Option<PathBuf> {
        match self {
            Base::Config => Some(dirs.config_dir().to_path_buf()),
            Base::State => dirs.state_dir().map(Path::to_path_buf),
            Base::Data => Some(dirs.data_local_dir().to_path_buf()),
        }
    }

    /// `$HOME`-relative location used when XDG lookup fails
    fn home_relative(self) -> &'static str {
        match self {
            Base::Config => ".config",
            Base::State => ".local/state",
            Base::Data => ".local/share",
        }
    }

    fn resolve(self) -> PathBuf {
        ProjectDirs::from("", "", APP_NAME)
            .and_then(|dirs| self.from_project(&dirs))
            .unwrap_or_else(|| {
                let home = std::env::var_os("HOME")
                    .map(PathBuf::from)
                    .unwrap_or_else(std::env::temp_dir);
                home.join(self.home_relative()).join(APP_NAME)
            })
    }
}

/// `$XDG_RUNTIME_DIR/warden`, or `/tmp/warden-<uid>` without one
pub fn runtime_dir() -> PathBuf {
    match std::env::var_os("XDG_RUNTIME_DIR") {
        Some(dir) if !dir.is_empty() => PathBuf::from(dir).join(APP_NAME),
        _ => {
            // SAFETY: getuid has no failure modes
            let uid = unsafe { libc::getuid() };
            std::env::temp_dir().join(format!("{}-{}", APP_NAME, uid))
        }
    }
}

/// Instance socket later invocations delegate to
pub fn socket_path() -> PathBuf {
    runtime_dir().join("warden.sock")
}

/// Private socket for one parent/child channel
pub fn channel_socket_path(id: Uuid) -> PathBuf {
    runtime_dir().join(format!("channel-{}.sock", id.simple()))
}

/// Record naming the most recently started instance
pub fn last_instance_file() -> PathBuf {
    runtime_dir().join("last-instance")
}

pub fn config_dir() -> PathBuf {
    Base::Config.resolve()
}

/// `config.toml` inside [`config_dir`]
pub fn config_file() -> PathBuf {
    config_dir().join("config.toml")
}

pub fn state_dir() -> PathBuf {
    Base::State.resolve()
}

pub fn data_dir() -> PathBuf {
    Base::Data.resolve()
}

pub fn log_dir() -> PathBuf {
    state_dir().join("log")
}

/// Timestamp file touched while an instance serves connections
pub fn heartbeat_file() -> PathBuf {
    state_dir().join("heartbeat")
}

/// Default home of installed extensions
pub fn extensions_dir() -> PathBuf {
    data_dir().join("extensions")
}

/// Create `path` and any missing ancestors
pub fn ensure_dir(path: &Path) -> std::io::Result<()> {
    if path.is_dir() {
        return Ok(());
    }
    std::fs::create_dir_all(path)
}

/// Create the directory that will hold the file at `path`
pub fn ensure_parent(path: &Path) -> std::io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => ensure_dir(parent),
        _ => Ok(()),
    }
}
