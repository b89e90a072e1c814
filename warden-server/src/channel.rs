//! Private parent/child message channel
//!
//! A parent binds a one-off socket under the runtime directory, exports its
//! path to the child through [`CHANNEL_ENV`] and accepts a single
//! connection. The child's standard streams stay attached to the terminal,
//! so nothing but protocol messages ever travels over the channel.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{UnixListener, UnixStream};
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, warn};
use uuid::Uuid;

use warden_protocol::{CodecError, Message, MessageCodec};
use warden_utils::paths::ensure_parent;
use warden_utils::{channel_socket_path, Result, WardenError};

/// Environment variable carrying the channel socket path to a child
pub const CHANNEL_ENV: &str = "WARDEN_IPC_CHANNEL";

/// Map a codec failure onto the error taxonomy
pub fn codec_error(err: CodecError) -> WardenError {
    match err {
        CodecError::Io(io) => WardenError::Io(io),
        other => WardenError::protocol(other.to_string()),
    }
}

/// Run `fut` to completion, or give up after `limit` when one is set.
///
/// Returns `None` when the limit elapsed first.
pub async fn bounded<F: Future>(limit: Option<Duration>, fut: F) -> Option<F::Output> {
    match limit {
        Some(limit) => tokio::time::timeout(limit, fut).await.ok(),
        None => Some(fut.await),
    }
}

/// Listening side of a channel, owned by the parent
pub struct ChannelListener {
    listener: UnixListener,
    path: PathBuf,
}

impl ChannelListener {
    /// Bind a fresh channel socket in the runtime directory
    pub fn bind() -> Result<Self> {
        Self::bind_at(channel_socket_path(Uuid::new_v4()))
    }

    /// Bind a channel socket at a specific path
    pub fn bind_at(path: PathBuf) -> Result<Self> {
        ensure_parent(&path).map_err(|e| WardenError::FileWrite {
            path: path.clone(),
            source: e,
        })?;

        if path.exists() {
            std::fs::remove_file(&path).map_err(|e| WardenError::FileWrite {
                path: path.clone(),
                source: e,
            })?;
        }

        let listener = UnixListener::bind(&path).map_err(|e| {
            WardenError::child_process(format!(
                "Failed to bind channel {}: {}",
                path.display(),
                e
            ))
        })?;

        debug!(path = %path.display(), "Channel listening");
        Ok(Self { listener, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Accept the child's connection
    pub async fn accept(&self) -> Result<Channel> {
        let (stream, _) = self.listener.accept().await?;
        debug!(path = %self.path.display(), "Channel connected");
        Ok(Channel::new(stream))
    }
}

impl Drop for ChannelListener {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %self.path.display(), "Failed to remove channel socket: {}", e);
            }
        }
    }
}

/// Connected channel, usable from either end
pub struct Channel {
    reader: ChannelReader,
    writer: ChannelWriter,
}

impl Channel {
    pub fn new(stream: UnixStream) -> Self {
        let (read, write) = stream.into_split();
        Self {
            reader: ChannelReader {
                framed: FramedRead::new(read, MessageCodec::new()),
            },
            writer: ChannelWriter {
                framed: FramedWrite::new(write, MessageCodec::new()),
            },
        }
    }

    /// Connect to a parent's channel socket
    pub async fn connect(path: &Path) -> Result<Self> {
        let stream = UnixStream::connect(path).await.map_err(|e| {
            WardenError::connection(format!(
                "Failed to connect to channel {}: {}",
                path.display(),
                e
            ))
        })?;
        Ok(Self::new(stream))
    }

    /// Connect to the channel named by [`CHANNEL_ENV`]
    pub async fn connect_from_env() -> Result<Self> {
        let path = std::env::var_os(CHANNEL_ENV).ok_or_else(|| {
            WardenError::child_process(format!("{} is not set", CHANNEL_ENV))
        })?;
        Self::connect(Path::new(&path)).await
    }

    pub async fn send(&mut self, msg: Message) -> Result<()> {
        self.writer.send(msg).await
    }

    /// Receive the next message; `None` once the peer closed the channel
    pub async fn recv(&mut self) -> Result<Option<Message>> {
        self.reader.recv().await
    }

    /// Split into independently owned halves
    pub fn into_parts(self) -> (ChannelReader, ChannelWriter) {
        (self.reader, self.writer)
    }
}

/// Receiving half of a [`Channel`]
pub struct ChannelReader {
    framed: FramedRead<OwnedReadHalf, MessageCodec>,
}

impl ChannelReader {
    pub async fn recv(&mut self) -> Result<Option<Message>> {
        match self.framed.next().await {
            Some(Ok(msg)) => Ok(Some(msg)),
            Some(Err(e)) => Err(codec_error(e)),
            None => Ok(None),
        }
    }
}

/// Sending half of a [`Channel`]
pub struct ChannelWriter {
    framed: FramedWrite<OwnedWriteHalf, MessageCodec>,
}

impl ChannelWriter {
    pub async fn send(&mut self, msg: Message) -> Result<()> {
        self.framed.send(msg).await.map_err(codec_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;
    use warden_utils::ErrorKind;

    #[tokio::test]
    async fn test_send_and_receive_both_directions() {
        let dir = tempfile::tempdir().unwrap();
        let listener = ChannelListener::bind_at(dir.path().join("c.sock")).unwrap();

        let path = listener.path().to_path_buf();
        let child = tokio::spawn(async move {
            let mut channel = Channel::connect(&path).await.unwrap();
            channel.send(Message::Ready).await.unwrap();
            channel.recv().await.unwrap()
        });

        let mut parent = listener.accept().await.unwrap();
        assert_eq!(parent.recv().await.unwrap(), Some(Message::Ready));
        parent.send(Message::Handshake).await.unwrap();

        assert_eq!(child.await.unwrap(), Some(Message::Handshake));
    }

    #[tokio::test]
    async fn test_recv_none_after_peer_closes() {
        let dir = tempfile::tempdir().unwrap();
        let listener = ChannelListener::bind_at(dir.path().join("c.sock")).unwrap();

        let path = listener.path().to_path_buf();
        tokio::spawn(async move {
            let _channel = Channel::connect(&path).await.unwrap();
        });

        let mut parent = listener.accept().await.unwrap();
        assert_eq!(parent.recv().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_unknown_kind_is_protocol_violation() {
        let dir = tempfile::tempdir().unwrap();
        let listener = ChannelListener::bind_at(dir.path().join("c.sock")).unwrap();

        let path = listener.path().to_path_buf();
        tokio::spawn(async move {
            let mut stream = UnixStream::connect(&path).await.unwrap();
            stream.write_all(b"{\"kind\":\"reboot\"}\n").await.unwrap();
        });

        let mut parent = listener.accept().await.unwrap();
        let err = parent.recv().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProtocolViolation);
    }

    #[tokio::test]
    async fn test_socket_removed_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("c.sock");
        let listener = ChannelListener::bind_at(path.clone()).unwrap();
        assert!(path.exists());
        drop(listener);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_bind_replaces_stale_socket_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("c.sock");
        std::fs::write(&path, b"stale").unwrap();

        let listener = ChannelListener::bind_at(path.clone());
        assert!(listener.is_ok());
    }

    #[tokio::test]
    async fn test_bounded() {
        assert_eq!(bounded(None, async { 7 }).await, Some(7));
        assert_eq!(
            bounded(Some(Duration::from_secs(5)), async { 7 }).await,
            Some(7)
        );

        let never = std::future::pending::<()>();
        assert_eq!(bounded(Some(Duration::from_millis(10)), never).await, None);
    }
}
