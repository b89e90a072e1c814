//! Worker side of a parent/child pairing

use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use warden_protocol::Message;
use warden_utils::{Result, WardenError};

use super::shutdown::{route_signals_to, Shutdown};
use crate::channel::{bounded, Channel, ChannelReader, ChannelWriter};

/// How often the worker checks that its parent still exists
const PARENT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Whether a process with `pid` still exists
pub fn parent_alive(pid: u32) -> bool {
    // SAFETY: signal 0 performs the permission and existence checks only
    let rc = unsafe { libc::kill(pid as libc::pid_t, 0) };
    rc == 0 || std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

/// The supervised worker's connection to its parent
pub struct ChildProcess {
    parent_pid: u32,
    reader: Option<ChannelReader>,
    writer: ChannelWriter,
}

impl ChildProcess {
    pub fn new(parent_pid: u32, channel: Channel) -> Self {
        let (reader, writer) = channel.into_parts();
        Self {
            parent_pid,
            reader: Some(reader),
            writer,
        }
    }

    /// Connect to the channel the parent exported in the environment
    pub async fn connect(parent_pid: u32) -> Result<Self> {
        let channel = Channel::connect_from_env().await?;
        Ok(Self::new(parent_pid, channel))
    }

    /// Announce ourselves and block until the parent acknowledges.
    ///
    /// Returns the session id chosen by the parent.
    pub async fn await_handshake(&mut self, timeout: Option<Duration>) -> Result<Uuid> {
        self.writer.send(Message::Handshake).await?;

        let reader = self
            .reader
            .as_mut()
            .ok_or_else(|| WardenError::internal("handshake after the channel was handed off"))?;

        match bounded(timeout, reader.recv()).await {
            Some(Ok(Some(Message::HandshakeAck { session_id }))) => {
                info!(session_id = %session_id, parent_pid = self.parent_pid, "Handshake complete");
                Ok(session_id)
            }
            Some(Ok(Some(other))) => Err(WardenError::protocol(format!(
                "expected handshake_ack, got {}",
                other.kind()
            ))),
            Some(Ok(None)) => Err(WardenError::ConnectionClosed),
            Some(Err(err)) => Err(err),
            None => Err(WardenError::HandshakeTimeout {
                millis: timeout.map(|t| t.as_millis() as u64).unwrap_or_default(),
            }),
        }
    }

    /// Wait for the handshake unless `shutdown` fires first.
    ///
    /// Returns `None` when shutdown won; nothing may be served then.
    pub async fn await_handshake_or_shutdown(
        &mut self,
        timeout: Option<Duration>,
        shutdown: &Shutdown,
    ) -> Result<Option<Uuid>> {
        if shutdown.is_triggered() {
            return Ok(None);
        }
        tokio::select! {
            _ = shutdown.wait() => {
                info!(parent_pid = self.parent_pid, "Shutdown requested before handshake");
                Ok(None)
            }
            result = self.await_handshake(timeout) => result.map(Some),
        }
    }

    /// Route SIGINT/SIGTERM into `shutdown` instead of dying on the spot
    pub fn prevent_exit(&self, shutdown: Shutdown) -> Result<JoinHandle<()>> {
        route_signals_to(shutdown)
    }

    /// Trigger `shutdown` when the parent goes away.
    ///
    /// The parent is considered gone when the channel closes or its pid no
    /// longer exists. A protocol violation drops the channel but keeps the
    /// pid check running.
    pub fn watch_parent(&mut self, shutdown: Shutdown) -> JoinHandle<()> {
        let mut reader = self.reader.take();
        let parent_pid = self.parent_pid;

        tokio::spawn(async move {
            let mut poll = tokio::time::interval(PARENT_POLL_INTERVAL);
            loop {
                tokio::select! {
                    _ = shutdown.wait() => break,
                    _ = poll.tick() => {
                        if !parent_alive(parent_pid) {
                            warn!(parent_pid, "Parent process is gone");
                            shutdown.trigger();
                            break;
                        }
                    }
                    msg = recv_or_pending(&mut reader) => match msg {
                        Ok(Some(msg)) => debug!(kind = msg.kind(), "Ignoring message from parent"),
                        Ok(None) => {
                            warn!(parent_pid, "Parent closed the channel");
                            shutdown.trigger();
                            break;
                        }
                        Err(err) => {
                            warn!(error_kind = %err.kind(), "Dropping parent channel: {}", err);
                            reader = None;
                        }
                    },
                }
            }
        })
    }

    /// Ask the parent to replace this worker with a fresh one
    pub async fn relaunch(&mut self, reason: impl Into<String>) -> Result<()> {
        let reason = reason.into();
        info!(reason = %reason, "Requesting relaunch");
        self.writer.send(Message::Relaunch { reason }).await
    }
}

async fn recv_or_pending(reader: &mut Option<ChannelReader>) -> Result<Option<Message>> {
    match reader {
        Some(reader) => reader.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::ChannelListener;
    use warden_utils::ErrorKind;

    async fn pair() -> (ChildProcess, Channel, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let listener = ChannelListener::bind_at(dir.path().join("c.sock")).unwrap();
        let (child, parent) = tokio::join!(Channel::connect(listener.path()), listener.accept());
        (
            ChildProcess::new(std::process::id(), child.unwrap()),
            parent.unwrap(),
            dir,
        )
    }

    #[tokio::test]
    async fn test_await_handshake_returns_session_id() {
        let (mut child, mut parent, _dir) = pair().await;
        let session_id = Uuid::new_v4();

        let parent_side = tokio::spawn(async move {
            assert_eq!(parent.recv().await.unwrap(), Some(Message::Handshake));
            parent
                .send(Message::HandshakeAck { session_id })
                .await
                .unwrap();
            parent
        });

        assert_eq!(child.await_handshake(None).await.unwrap(), session_id);
        parent_side.await.unwrap();
    }

    #[tokio::test]
    async fn test_handshake_rejects_other_reply() {
        let (mut child, mut parent, _dir) = pair().await;

        let parent_side = tokio::spawn(async move {
            parent.recv().await.unwrap();
            parent.send(Message::Ready).await.unwrap();
            parent
        });

        let err = child.await_handshake(None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProtocolViolation);
        parent_side.await.unwrap();
    }

    #[tokio::test]
    async fn test_handshake_timeout() {
        let (mut child, _parent, _dir) = pair().await;

        let err = child
            .await_handshake(Some(Duration::from_millis(20)))
            .await
            .unwrap_err();
        assert!(matches!(err, WardenError::HandshakeTimeout { millis: 20 }));
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_pending_handshake() {
        let (mut child, _parent, _dir) = pair().await;
        let shutdown = Shutdown::new();

        let trigger = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.trigger();
        });

        let outcome = tokio::time::timeout(
            Duration::from_secs(2),
            child.await_handshake_or_shutdown(None, &shutdown),
        )
        .await
        .unwrap();
        assert_eq!(outcome.unwrap(), None);
    }

    #[tokio::test]
    async fn test_handshake_skipped_after_earlier_shutdown() {
        let (mut child, mut parent, _dir) = pair().await;
        let shutdown = Shutdown::new();
        shutdown.trigger();

        let outcome = child.await_handshake_or_shutdown(None, &shutdown).await;
        assert_eq!(outcome.unwrap(), None);

        // No handshake was sent
        drop(child);
        assert_eq!(parent.recv().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_handshake_wins_when_acked() {
        let (mut child, mut parent, _dir) = pair().await;
        let shutdown = Shutdown::new();
        let session_id = Uuid::new_v4();

        let parent_side = tokio::spawn(async move {
            parent.recv().await.unwrap();
            parent
                .send(Message::HandshakeAck { session_id })
                .await
                .unwrap();
            parent
        });

        let outcome = child.await_handshake_or_shutdown(None, &shutdown).await;
        assert_eq!(outcome.unwrap(), Some(session_id));
        assert!(!shutdown.is_triggered());
        parent_side.await.unwrap();
    }

    #[tokio::test]
    async fn test_channel_close_triggers_shutdown() {
        let (mut child, parent, _dir) = pair().await;
        let shutdown = Shutdown::new();

        let watcher = child.watch_parent(shutdown.clone());
        drop(parent);

        tokio::time::timeout(Duration::from_secs(2), watcher)
            .await
            .unwrap()
            .unwrap();
        assert!(shutdown.is_triggered());
    }

    #[tokio::test]
    async fn test_relaunch_reaches_parent() {
        let (mut child, mut parent, _dir) = pair().await;

        child.relaunch("config changed").await.unwrap();
        assert_eq!(
            parent.recv().await.unwrap(),
            Some(Message::Relaunch {
                reason: "config changed".into()
            })
        );
    }

    #[test]
    fn test_parent_alive() {
        assert!(parent_alive(std::process::id()));
    }
}
