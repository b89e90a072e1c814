//! One-shot CLI subprocess
//!
//! Extension management runs in a forked worker. The parent waits for the
//! worker's `ready`, forwards the request exactly once, and exits with the
//! worker's exit code.

use std::fmt;
use std::time::Duration;

use tokio::process::Child;
use tracing::{debug, error, info};

use warden_protocol::{CliForward, Message};
use warden_utils::{ErrorKind, Result, WardenError};

use crate::channel::{bounded, Channel, ChannelListener};
use crate::supervisor::WorkerCommand;

/// Environment variable marking a CLI worker; carries the parent pid
pub const CLI_PARENT_ENV: &str = "WARDEN_CLI_PARENT_PID";

/// Handshake state of a CLI worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CliHandshakeState {
    Spawned,
    AwaitingReady,
    Forwarded,
    Exited(i32),
}

impl fmt::Display for CliHandshakeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Spawned => f.write_str("spawned"),
            Self::AwaitingReady => f.write_str("awaiting_ready"),
            Self::Forwarded => f.write_str("forwarded"),
            Self::Exited(code) => write!(f, "exited({})", code),
        }
    }
}

/// Forks CLI workers and relays their exit codes
pub struct CliDelegate {
    command: WorkerCommand,
    ready_timeout: Option<Duration>,
    state: CliHandshakeState,
}

impl CliDelegate {
    pub fn new(command: WorkerCommand, ready_timeout: Option<Duration>) -> Self {
        Self {
            command,
            ready_timeout,
            state: CliHandshakeState::Spawned,
        }
    }

    #[cfg(test)]
    pub fn state(&self) -> CliHandshakeState {
        self.state
    }

    fn set_state(&mut self, next: CliHandshakeState) {
        debug!(from = %self.state, to = %next, "CLI worker state");
        self.state = next;
    }

    /// Run the request in a worker and return the exit code to use.
    ///
    /// Every failure is logged with its kind and maps to exit code 1.
    pub async fn run(&mut self, request: CliForward) -> i32 {
        match self.forward(request).await {
            Ok(code) => code,
            Err(err) => {
                error!(error_kind = %err.kind(), "CLI worker failed: {}", err);
                self.set_state(CliHandshakeState::Exited(1));
                1
            }
        }
    }

    /// Spawn, handshake, forward and wait
    pub async fn forward(&mut self, request: CliForward) -> Result<i32> {
        let listener = ChannelListener::bind()?;
        let mut child = self
            .command
            .command(&listener)
            .env(CLI_PARENT_ENV, std::process::id().to_string())
            .spawn()
            .map_err(|e| WardenError::child_process(format!("Failed to spawn CLI worker: {}", e)))?;
        self.set_state(CliHandshakeState::AwaitingReady);

        let mut channel = tokio::select! {
            status = child.wait() => {
                let status = status?;
                return Err(WardenError::unexpected_child(format!(
                    "CLI worker exited ({}) without signalling ready",
                    status
                )));
            }
            result = bounded(self.ready_timeout, await_ready(&listener)) => match result {
                Some(Ok(channel)) => channel,
                Some(Err(err)) => {
                    kill(&mut child).await;
                    return Err(err);
                }
                None => {
                    kill(&mut child).await;
                    return Err(WardenError::HandshakeTimeout {
                        millis: self
                            .ready_timeout
                            .map(|t| t.as_millis() as u64)
                            .unwrap_or_default(),
                    });
                }
            },
        };

        channel.send(Message::Cli(request)).await?;
        self.set_state(CliHandshakeState::Forwarded);

        let status = child.wait().await?;
        let code = status.code().unwrap_or(0);
        self.set_state(CliHandshakeState::Exited(code));
        info!(code, "CLI worker finished");
        Ok(code)
    }
}

/// Accept the worker's connection and require `ready` as its first message
async fn await_ready(listener: &ChannelListener) -> Result<Channel> {
    let mut channel = listener.accept().await?;
    match channel.recv().await {
        Ok(Some(Message::Ready)) => Ok(channel),
        Ok(Some(other)) => Err(WardenError::unexpected_child(format!(
            "expected ready, got {}",
            other.kind()
        ))),
        Ok(None) => Err(WardenError::unexpected_child(
            "CLI worker closed the channel without signalling ready",
        )),
        // Anything undecodable before ready is still a misbehaving worker
        Err(err) if err.kind() == ErrorKind::ProtocolViolation => {
            Err(WardenError::unexpected_child(err.to_string()))
        }
        Err(err) => Err(err),
    }
}

async fn kill(child: &mut Child) {
    if let Err(e) = child.kill().await {
        debug!("Failed to kill CLI worker: {}", e);
    }
}
