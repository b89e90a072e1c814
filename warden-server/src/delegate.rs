//! Hand an invocation's paths to an existing instance

use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::io::AsyncWriteExt;
use tokio::net::UnixStream;
use tokio_util::codec::{Framed, FramedRead};
use tracing::{debug, info};

use warden_protocol::{Message, MessageCodec, OpenCommand, OpenCommandError};
use warden_utils::{Result, WardenError};

use crate::channel::bounded;
use crate::invocation::Invocation;

/// Resolve `raw` against `cwd` and fold `.` and `..` lexically
fn absolutize(cwd: &Path, raw: &str) -> PathBuf {
    let joined = cwd.join(raw);
    let mut out = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Classify the invocation's paths and build the open command.
///
/// A path that cannot be inspected counts as a file; the receiving instance
/// reports its own error for it. Argument errors surface before any socket
/// is touched.
pub async fn build_open_command(invocation: &Invocation, cwd: &Path) -> Result<OpenCommand> {
    let mut folders = Vec::new();
    let mut files = Vec::new();

    for raw in invocation.paths() {
        let path = absolutize(cwd, raw);
        let is_dir = tokio::fs::metadata(&path)
            .await
            .map(|meta| meta.is_dir())
            .unwrap_or(false);
        let uri = path.to_string_lossy().into_owned();
        if is_dir {
            folders.push(uri);
        } else {
            files.push(uri);
        }
    }

    let flags = invocation.flags();
    OpenCommand::new(folders, files, flags.new_window, flags.reuse_window).map_err(|e| match e {
        OpenCommandError::NewWindowWithFiles => WardenError::invalid_arguments(e.to_string()),
        OpenCommandError::NoTarget => WardenError::NoTargetSpecified,
    })
}

/// Sends open commands to running instances
#[derive(Debug, Clone, Default)]
pub struct InstanceDelegator {
    timeout: Option<Duration>,
}

impl InstanceDelegator {
    pub fn new(timeout: Option<Duration>) -> Self {
        Self { timeout }
    }

    /// Delegate the invocation to the instance at `address`.
    ///
    /// Returns the command that was sent. Transport failures are
    /// `DelegationFailed`; argument problems keep their own kind.
    pub async fn delegate(&self, invocation: &Invocation, address: &str) -> Result<OpenCommand> {
        let cwd = std::env::current_dir()?;
        let command = build_open_command(invocation, &cwd).await?;
        self.send(address, command.clone()).await?;
        info!(
            address,
            folders = command.folder_uris.len(),
            files = command.file_uris.len(),
            "Delegated to running instance"
        );
        Ok(command)
    }

    /// Write one open command and close our side of the connection.
    ///
    /// The write is the only thing that can fail. Replies from the instance
    /// are logged for at most [`REPLY_WINDOW`] and then discarded; the
    /// connection is dropped as soon as the instance closes its side.
    pub async fn send(&self, address: &str, command: OpenCommand) -> Result<()> {
        let transmit = async {
            let stream = UnixStream::connect(address).await?;
            let mut framed = Framed::new(stream, MessageCodec::new());
            framed.send(Message::Open(command)).await?;
            let mut stream = framed.into_inner();
            stream.shutdown().await?;
            Ok::<_, warden_protocol::CodecError>(stream)
        };

        let stream = match bounded(self.timeout, transmit).await {
            Some(Ok(stream)) => stream,
            Some(Err(e)) => return Err(WardenError::delegation(address, e)),
            None => return Err(WardenError::delegation(address, "timed out")),
        };

        if bounded(Some(REPLY_WINDOW), log_replies(stream, address)).await.is_none() {
            debug!(address, "Instance kept the connection open, closing it");
        }
        Ok(())
    }
}

/// How long a delegating process listens for replies after its write
pub const REPLY_WINDOW: Duration = Duration::from_millis(250);

async fn log_replies(stream: UnixStream, address: &str) {
    let mut replies = FramedRead::new(stream, MessageCodec::new());
    while let Some(reply) = replies.next().await {
        match reply {
            Ok(msg) => debug!(address, kind = msg.kind(), "Reply from instance"),
            Err(e) => {
                debug!(address, "Unreadable reply from instance: {}", e);
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::Args;
    use crate::config::AppConfig;
    use tokio::net::UnixListener;
    use warden_utils::ErrorKind;

    fn invocation(args: Args) -> Invocation {
        Invocation::from_args(args, &AppConfig::default())
    }

    #[test]
    fn test_absolutize() {
        let cwd = Path::new("/home/dev/proj");
        assert_eq!(absolutize(cwd, "src/main.rs"), Path::new("/home/dev/proj/src/main.rs"));
        assert_eq!(absolutize(cwd, "../other"), Path::new("/home/dev/other"));
        assert_eq!(absolutize(cwd, "./a.txt"), Path::new("/home/dev/proj/a.txt"));
        assert_eq!(absolutize(cwd, "/etc/hosts"), Path::new("/etc/hosts"));
    }

    #[tokio::test]
    async fn test_classifies_folders_and_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("proj")).unwrap();
        std::fs::write(dir.path().join("a.txt"), "").unwrap();

        let inv = invocation(Args {
            paths: vec!["proj".into(), "a.txt".into(), "missing.md".into()],
            ..Default::default()
        });
        let command = build_open_command(&inv, dir.path()).await.unwrap();

        let base = dir.path().to_string_lossy();
        assert_eq!(command.folder_uris, vec![format!("{}/proj", base)]);
        assert_eq!(
            command.file_uris,
            vec![format!("{}/a.txt", base), format!("{}/missing.md", base)]
        );
    }

    #[tokio::test]
    async fn test_new_window_with_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "").unwrap();

        let inv = invocation(Args {
            paths: vec!["a.txt".into()],
            new_window: true,
            ..Default::default()
        });
        let err = build_open_command(&inv, dir.path()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgumentCombination);
    }

    #[tokio::test]
    async fn test_no_paths_is_no_target() {
        let inv = invocation(Args {
            reuse_window: true,
            ..Default::default()
        });
        let err = build_open_command(&inv, Path::new("/")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoTargetSpecified);
    }

    #[tokio::test]
    async fn test_send_writes_open_command() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("inst.sock");
        let listener = UnixListener::bind(&socket).unwrap();

        let command = OpenCommand::new(
            vec!["/tmp/proj".into()],
            vec!["/tmp/a.txt".into()],
            false,
            false,
        )
        .unwrap();

        let receiver = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut framed = FramedRead::new(stream, MessageCodec::new());
            let first = framed.next().await.unwrap().unwrap();
            // Sender closes after one message
            assert!(framed.next().await.is_none());
            first
        });

        InstanceDelegator::default()
            .send(&socket.to_string_lossy(), command.clone())
            .await
            .unwrap();

        assert_eq!(receiver.await.unwrap(), Message::Open(command));
    }

    #[tokio::test]
    async fn test_send_does_not_wait_on_silent_instance() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("inst.sock");
        let listener = UnixListener::bind(&socket).unwrap();

        // Replies once, then holds the connection open
        let instance = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut framed = Framed::new(stream, MessageCodec::new());
            framed.next().await.unwrap().unwrap();
            framed.send(Message::Ready).await.unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
        });

        let command = OpenCommand::new(vec!["/tmp".into()], vec![], false, false).unwrap();
        let started = tokio::time::Instant::now();
        InstanceDelegator::default()
            .send(&socket.to_string_lossy(), command)
            .await
            .unwrap();

        assert!(started.elapsed() < REPLY_WINDOW + Duration::from_secs(1));
        instance.abort();
    }

    #[tokio::test]
    async fn test_unreachable_socket_is_delegation_failed() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("nobody.sock");
        let command = OpenCommand::new(vec!["/tmp".into()], vec![], false, false).unwrap();

        let err = InstanceDelegator::new(Some(Duration::from_secs(1)))
            .send(&socket.to_string_lossy(), command)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DelegationFailed);
        assert!(err.is_recoverable());
    }
}
