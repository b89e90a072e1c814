//! Existing-instance probe
//!
//! Finds the socket of a running instance this invocation should be handed
//! to, or nothing. The controlling-terminal hook always wins; otherwise the
//! last-instance record is consulted for invocations that only make sense
//! against a running instance, and its socket must answer a connect.

use std::io::ErrorKind as IoErrorKind;
use std::path::PathBuf;
use std::time::Duration;

use tokio::net::UnixStream;
use tracing::{debug, warn};

use warden_utils::paths::ensure_parent;
use warden_utils::{last_instance_file, Result, WardenError};

use crate::channel::bounded;
use crate::config::ProbeConfig;
use crate::invocation::Invocation;

/// File naming the socket of the most recently started instance
#[derive(Debug, Clone)]
pub struct LastInstanceRecord {
    path: PathBuf,
}

impl LastInstanceRecord {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Record in the runtime directory
    pub fn default_location() -> Self {
        Self::new(last_instance_file())
    }

    #[cfg(test)]
    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    /// Read the recorded address, `None` when nothing is recorded
    pub async fn read(&self) -> Result<Option<String>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => {
                let address = content.trim();
                Ok((!address.is_empty()).then(|| address.to_string()))
            }
            Err(e) if e.kind() == IoErrorKind::NotFound => Ok(None),
            Err(e) => Err(WardenError::FileRead {
                path: self.path.clone(),
                source: e,
            }),
        }
    }

    pub async fn write(&self, address: &str) -> Result<()> {
        let write_err = |e| WardenError::FileWrite {
            path: self.path.clone(),
            source: e,
        };
        ensure_parent(&self.path).map_err(write_err)?;
        tokio::fs::write(&self.path, format!("{}\n", address))
            .await
            .map_err(write_err)?;
        debug!(path = %self.path.display(), address, "Recorded last instance");
        Ok(())
    }

    /// Remove the record if it still names `address`.
    ///
    /// Returns whether the record was removed.
    pub async fn clear_if(&self, address: &str) -> Result<bool> {
        if self.read().await?.as_deref() != Some(address) {
            return Ok(false);
        }
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == IoErrorKind::NotFound => Ok(false),
            Err(e) => Err(WardenError::FileWrite {
                path: self.path.clone(),
                source: e,
            }),
        }
    }
}

/// Whether something accepts connections on the socket at `address`
pub async fn can_connect(address: &str, timeout: Option<Duration>) -> bool {
    matches!(
        bounded(timeout, UnixStream::connect(address)).await,
        Some(Ok(_))
    )
}

/// Locates a live instance for an invocation
#[derive(Debug, Clone)]
pub struct InstanceProbe {
    record: Option<LastInstanceRecord>,
    liveness_timeout: Option<Duration>,
}

impl InstanceProbe {
    pub fn new(record: Option<LastInstanceRecord>, liveness_timeout: Option<Duration>) -> Self {
        Self {
            record,
            liveness_timeout,
        }
    }

    pub fn from_config(config: &ProbeConfig) -> Self {
        let record = config
            .use_last_instance
            .then(LastInstanceRecord::default_location);
        Self::new(record, config.liveness_timeout())
    }

    /// Socket address of a live instance to delegate to, if any
    pub async fn probe(&self, invocation: &Invocation) -> Option<String> {
        if let Some(hook) = invocation.ipc_hook() {
            debug!(address = hook, "Using controlling instance");
            return Some(hook.to_string());
        }

        if !invocation.has_window_flags() && !invocation.is_paths_only() {
            return None;
        }

        let record = self.record.as_ref()?;
        let candidate = match record.read().await {
            Ok(Some(address)) => address,
            Ok(None) => return None,
            Err(err) => {
                warn!(error_kind = %err.kind(), "Cannot read last-instance record: {}", err);
                return None;
            }
        };

        if can_connect(&candidate, self.liveness_timeout).await {
            debug!(address = %candidate, "Found live instance");
            Some(candidate)
        } else {
            debug!(address = %candidate, "Recorded instance is not answering");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::Args;
    use crate::config::AppConfig;
    use tokio::net::UnixListener;

    fn invocation(args: Args) -> Invocation {
        Invocation::from_args(args, &AppConfig::default())
    }

    fn paths_only() -> Invocation {
        invocation(Args {
            paths: vec!["a.txt".into()],
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn test_ipc_hook_wins_without_liveness_check() {
        let probe = InstanceProbe::new(None, None);
        let inv = invocation(Args {
            ipc_hook: Some("/nowhere/hook.sock".into()),
            ..Default::default()
        });
        assert_eq!(probe.probe(&inv).await.as_deref(), Some("/nowhere/hook.sock"));
    }

    #[tokio::test]
    async fn test_live_recorded_instance_is_found() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("inst.sock");
        let _listener = UnixListener::bind(&socket).unwrap();
        let address = socket.to_string_lossy().into_owned();

        let record = LastInstanceRecord::new(dir.path().join("last-instance"));
        record.write(&address).await.unwrap();

        let probe = InstanceProbe::new(Some(record), Some(Duration::from_secs(1)));
        assert_eq!(probe.probe(&paths_only()).await, Some(address));
    }

    #[tokio::test]
    async fn test_dead_recorded_instance_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let record = LastInstanceRecord::new(dir.path().join("last-instance"));
        record
            .write(&dir.path().join("gone.sock").to_string_lossy())
            .await
            .unwrap();

        let probe = InstanceProbe::new(Some(record), None);
        assert_eq!(probe.probe(&paths_only()).await, None);
    }

    #[tokio::test]
    async fn test_record_ignored_for_bare_invocation() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("inst.sock");
        let _listener = UnixListener::bind(&socket).unwrap();

        let record = LastInstanceRecord::new(dir.path().join("last-instance"));
        record.write(&socket.to_string_lossy()).await.unwrap();

        let probe = InstanceProbe::new(Some(record), None);
        assert_eq!(probe.probe(&invocation(Args::default())).await, None);
    }

    #[tokio::test]
    async fn test_window_flag_consults_record() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("inst.sock");
        let _listener = UnixListener::bind(&socket).unwrap();

        let record = LastInstanceRecord::new(dir.path().join("last-instance"));
        record.write(&socket.to_string_lossy()).await.unwrap();

        let probe = InstanceProbe::new(Some(record), None);
        let inv = invocation(Args {
            reuse_window: true,
            ..Default::default()
        });
        assert!(probe.probe(&inv).await.is_some());
    }

    #[tokio::test]
    async fn test_disabled_record_yields_none() {
        let probe = InstanceProbe::new(None, None);
        assert_eq!(probe.probe(&paths_only()).await, None);
    }

    #[tokio::test]
    async fn test_record_read_write_clear() {
        let dir = tempfile::tempdir().unwrap();
        let record = LastInstanceRecord::new(dir.path().join("nested/last-instance"));

        assert_eq!(record.read().await.unwrap(), None);
        record.write("/run/a.sock").await.unwrap();
        assert_eq!(record.read().await.unwrap().as_deref(), Some("/run/a.sock"));

        assert!(!record.clear_if("/run/b.sock").await.unwrap());
        assert!(record.path().exists());
        assert!(record.clear_if("/run/a.sock").await.unwrap());
        assert!(!record.path().exists());
    }
}
