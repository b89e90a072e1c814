//! Entry point of a forked CLI worker

use std::path::PathBuf;

use tracing::{debug, error};

use warden_protocol::{CliForward, Message};
use warden_utils::{Result, WardenError};

use crate::channel::Channel;
use crate::cli_delegate::CLI_PARENT_ENV;
use crate::extensions::ExtensionStore;

/// Parent pid when this process was started as a CLI worker
pub fn parent_pid_from_env() -> Option<u32> {
    std::env::var(CLI_PARENT_ENV).ok()?.trim().parse().ok()
}

/// Signal ready, take exactly one request, run it. Returns the exit code.
pub async fn run(default_extensions_dir: PathBuf) -> i32 {
    match serve_one(default_extensions_dir).await {
        Ok(()) => 0,
        Err(err) => {
            error!(error_kind = %err.kind(), "{}", err);
            eprintln!("{}", err);
            1
        }
    }
}

async fn serve_one(default_extensions_dir: PathBuf) -> Result<()> {
    let mut channel = Channel::connect_from_env().await?;
    channel.send(Message::Ready).await?;
    debug!("Signalled ready");

    let request = receive_request(&mut channel).await?;
    drop(channel);

    let dir = request
        .extensions_dir
        .as_deref()
        .map(PathBuf::from)
        .unwrap_or(default_extensions_dir);
    let store = ExtensionStore::new(dir);

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    store.execute(&request, &mut out)
}

async fn receive_request(channel: &mut Channel) -> Result<CliForward> {
    match channel.recv().await? {
        Some(Message::Cli(request)) => Ok(request),
        Some(other) => Err(WardenError::protocol(format!(
            "expected cli request, got {}",
            other.kind()
        ))),
        None => Err(WardenError::ConnectionClosed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::ChannelListener;
    use warden_utils::ErrorKind;

    #[tokio::test]
    async fn test_receive_request_accepts_cli() {
        let dir = tempfile::tempdir().unwrap();
        let listener = ChannelListener::bind_at(dir.path().join("c.sock")).unwrap();
        let (worker, parent) = tokio::join!(Channel::connect(listener.path()), listener.accept());
        let (mut worker, mut parent) = (worker.unwrap(), parent.unwrap());

        let request = CliForward {
            list_extensions: true,
            ..Default::default()
        };
        parent.send(Message::Cli(request.clone())).await.unwrap();
        assert_eq!(receive_request(&mut worker).await.unwrap(), request);
    }

    #[tokio::test]
    async fn test_receive_request_rejects_other_kinds() {
        let dir = tempfile::tempdir().unwrap();
        let listener = ChannelListener::bind_at(dir.path().join("c.sock")).unwrap();
        let (worker, parent) = tokio::join!(Channel::connect(listener.path()), listener.accept());
        let (mut worker, mut parent) = (worker.unwrap(), parent.unwrap());

        parent.send(Message::Ready).await.unwrap();
        let err = receive_request(&mut worker).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProtocolViolation);
    }
}
