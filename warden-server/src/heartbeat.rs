//! Activity heartbeat
//!
//! Records the time of the last client activity in a file so that outside
//! tooling can tell a busy instance from an idle one.

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::trace;

use warden_utils::paths::ensure_parent;
use warden_utils::{Result, WardenError};

/// Throttled writer of the heartbeat file
#[derive(Debug)]
pub struct Heartbeat {
    path: PathBuf,
    interval: Duration,
    last: Option<DateTime<Utc>>,
}

impl Heartbeat {
    pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(60);

    pub fn new(path: impl Into<PathBuf>, interval: Duration) -> Self {
        Self {
            path: path.into(),
            interval,
            last: None,
        }
    }

    #[cfg(test)]
    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    /// Time of the last recorded beat
    #[cfg(test)]
    pub fn last_beat(&self) -> Option<DateTime<Utc>> {
        self.last
    }

    /// True if a beat was recorded within the interval
    pub fn is_active(&self) -> bool {
        self.is_active_at(Utc::now())
    }

    fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        let Ok(interval) = chrono::Duration::from_std(self.interval) else {
            return false;
        };
        self.last.is_some_and(|last| now - last < interval)
    }

    /// Record activity, writing the file at most once per interval.
    ///
    /// Returns whether the file was written.
    pub async fn beat(&mut self) -> Result<bool> {
        if self.is_active() {
            return Ok(false);
        }
        let now = Utc::now();

        let write_err = |e| WardenError::FileWrite {
            path: self.path.clone(),
            source: e,
        };
        ensure_parent(&self.path).map_err(write_err)?;
        tokio::fs::write(&self.path, now.to_rfc3339())
            .await
            .map_err(write_err)?;

        trace!(path = %self.path.display(), "Heartbeat");
        self.last = Some(now);
        Ok(true)
    }
}
