//! Supervising side of a parent/child pairing

use std::ffi::OsString;
use std::path::PathBuf;
use std::process::ExitStatus;
use std::time::Duration;

use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use warden_protocol::Message;
use warden_utils::{Result, WardenError};

use super::shutdown::TerminationSignals;
use super::{HandshakeState, SupervisionSession, CHILD_ENV};
use crate::channel::{bounded, Channel, ChannelListener, CHANNEL_ENV};

/// Program, arguments and extra environment used to start a worker
#[derive(Debug, Clone)]
pub struct WorkerCommand {
    program: PathBuf,
    args: Vec<OsString>,
}

impl WorkerCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// This executable with this process's arguments
    pub fn current() -> Result<Self> {
        let program = std::env::current_exe()?;
        Ok(Self::new(program).args(std::env::args_os().skip(1)))
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Build a command with stdio inherited and the channel path exported
    pub(crate) fn command(&self, channel: &ChannelListener) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .env(CHANNEL_ENV, channel.path())
            .kill_on_drop(true);
        cmd
    }

    pub fn program(&self) -> &PathBuf {
        &self.program
    }
}

/// Exit code to propagate for a finished child
pub(crate) fn exit_code(status: ExitStatus) -> i32 {
    status.code().unwrap_or(0)
}

/// Ask a child to terminate with SIGTERM
pub(crate) fn terminate(child: &Child) {
    let Some(pid) = child.id() else {
        return;
    };
    // SAFETY: kill(2) with a pid we spawned and still hold a handle to
    let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
    if rc != 0 {
        warn!(pid, "Failed to signal child: {}", std::io::Error::last_os_error());
    } else {
        debug!(pid, "Forwarded SIGTERM to child");
    }
}

enum ChildOutcome {
    Exited(i32),
    Relaunch(String),
}

/// Spawns and supervises the worker that runs the server
pub struct ParentProcess {
    command: WorkerCommand,
    handshake_timeout: Option<Duration>,
}

impl ParentProcess {
    pub fn new(command: WorkerCommand, handshake_timeout: Option<Duration>) -> Self {
        Self {
            command,
            handshake_timeout,
        }
    }

    /// Run the child until it exits, relaunching it on request.
    ///
    /// Returns the child's exit code. Termination signals received by this
    /// process are forwarded to the child, whose exit code is still the
    /// result.
    pub async fn supervise(&self, session: &mut SupervisionSession) -> Result<i32> {
        // Handlers go in before the child exists, so no signal is missed
        let mut signals = TerminationSignals::install()?;

        loop {
            let listener = ChannelListener::bind()?;
            let mut child = self.spawn(&listener)?;
            session.transition(HandshakeState::AwaitingReady)?;
            info!(
                pid = child.id().unwrap_or_default(),
                session_id = %session.id(),
                "Spawned supervised worker"
            );

            let handshake = tokio::select! {
                status = child.wait() => {
                    let code = exit_code(status?);
                    warn!(code, "Worker exited before the handshake");
                    session.transition(HandshakeState::Exited)?;
                    return Ok(code);
                }
                name = signals.recv() => {
                    debug!(signal = name, "Terminating worker before the handshake");
                    session.transition(HandshakeState::Disposing)?;
                    terminate(&child);
                    let status = child.wait().await?;
                    return Ok(exit_code(status));
                }
                result = bounded(self.handshake_timeout, accept_handshake(&listener)) => result,
            };

            let mut channel = match handshake {
                Some(Ok(channel)) => channel,
                Some(Err(err)) => {
                    child.kill().await?;
                    return Err(err);
                }
                None => {
                    child.kill().await?;
                    return Err(WardenError::HandshakeTimeout {
                        millis: self
                            .handshake_timeout
                            .map(|t| t.as_millis() as u64)
                            .unwrap_or_default(),
                    });
                }
            };

            channel
                .send(Message::HandshakeAck {
                    session_id: session.id(),
                })
                .await?;
            session.transition(HandshakeState::Ready)?;
            info!(session_id = %session.id(), "Worker ready");

            match run_child(&mut child, channel, &mut signals, session).await? {
                ChildOutcome::Exited(code) => {
                    info!(code, "Worker exited");
                    return Ok(code);
                }
                ChildOutcome::Relaunch(reason) => {
                    info!(reason = %reason, "Relaunching worker");
                    terminate(&child);
                    let status = child.wait().await?;
                    debug!(code = exit_code(status), "Previous worker exited");
                }
            }
        }
    }

    fn spawn(&self, listener: &ChannelListener) -> Result<Child> {
        self.command
            .command(listener)
            .env(CHILD_ENV, std::process::id().to_string())
            .spawn()
            .map_err(|e| {
                WardenError::child_process(format!(
                    "Failed to spawn {}: {}",
                    self.command.program().display(),
                    e
                ))
            })
    }
}

async fn accept_handshake(listener: &ChannelListener) -> Result<Channel> {
    let mut channel = listener.accept().await?;
    match channel.recv().await? {
        Some(Message::Handshake) => Ok(channel),
        Some(other) => Err(WardenError::unexpected_child(format!(
            "expected handshake, got {}",
            other.kind()
        ))),
        None => Err(WardenError::unexpected_child(
            "channel closed before the handshake",
        )),
    }
}

async fn recv_or_pending(channel: &mut Option<Channel>) -> Result<Option<Message>> {
    match channel {
        Some(channel) => channel.recv().await,
        None => std::future::pending().await,
    }
}

async fn run_child(
    child: &mut Child,
    channel: Channel,
    signals: &mut TerminationSignals,
    session: &mut SupervisionSession,
) -> Result<ChildOutcome> {
    let mut channel = Some(channel);
    let mut disposing = false;

    loop {
        tokio::select! {
            status = child.wait() => {
                return Ok(ChildOutcome::Exited(exit_code(status?)));
            }
            _ = signals.recv(), if !disposing => {
                session.transition(HandshakeState::Disposing)?;
                disposing = true;
                terminate(child);
            }
            msg = recv_or_pending(&mut channel) => match msg {
                Ok(Some(Message::Relaunch { reason })) if !disposing => {
                    return Ok(ChildOutcome::Relaunch(reason));
                }
                Ok(Some(other)) => {
                    warn!(kind = other.kind(), "Ignoring message from worker");
                }
                Ok(None) => {
                    debug!("Worker closed the channel");
                    channel = None;
                }
                Err(err) => {
                    warn!(error_kind = %err.kind(), "Dropping worker channel: {}", err);
                    channel = None;
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::supervisor::ProcessRole;

    fn shell(script: &str) -> WorkerCommand {
        WorkerCommand::new("sh").args(["-c", script])
    }

    #[tokio::test]
    async fn test_child_exit_code_is_propagated() {
        let parent = ParentProcess::new(shell("exit 3"), None);
        let mut session = SupervisionSession::new(ProcessRole::Parent);

        let code = parent.supervise(&mut session).await.unwrap();
        assert_eq!(code, 3);
        assert_eq!(session.state(), HandshakeState::Exited);

        session.record_exit(code);
        assert_eq!(session.exit(None).await, 3);
    }

    #[tokio::test]
    async fn test_spawn_failure_is_child_process_error() {
        let parent = ParentProcess::new(WorkerCommand::new("/nonexistent/warden-worker"), None);
        let mut session = SupervisionSession::new(ProcessRole::Parent);

        let err = parent.supervise(&mut session).await.unwrap_err();
        assert_eq!(err.kind(), warden_utils::ErrorKind::ChildProcessError);
    }

    #[tokio::test]
    async fn test_handshake_timeout() {
        let parent = ParentProcess::new(shell("sleep 5"), Some(Duration::from_millis(50)));
        let mut session = SupervisionSession::new(ProcessRole::Parent);

        let err = parent.supervise(&mut session).await.unwrap_err();
        assert!(matches!(err, WardenError::HandshakeTimeout { millis: 50 }));
    }

    #[test]
    fn test_worker_command_builder() {
        let cmd = WorkerCommand::new("/bin/warden")
            .args(["--supervise", "proj"])
            .args(["--log", "debug"]);
        assert_eq!(cmd.program(), &PathBuf::from("/bin/warden"));
        assert_eq!(cmd.args, ["--supervise", "proj", "--log", "debug"]);
    }
}
