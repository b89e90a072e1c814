//! Process supervision
//!
//! A supervising parent spawns the worker that runs the server, performs a
//! handshake with it over a private channel, forwards termination requests
//! and re-exits with the worker's exit code. The worker side waits for the
//! handshake before serving and routes termination through orderly disposal.

mod child;
mod dispose;
mod parent;
mod shutdown;

pub use child::ChildProcess;
pub use dispose::Disposer;
pub use parent::{ParentProcess, WorkerCommand};
pub use shutdown::{hangup_signal, route_signals_to, Shutdown};

use std::fmt;

use tracing::{debug, error, warn};
use uuid::Uuid;

use warden_utils::{Result, WardenError};

/// Environment variable marking a supervised worker; carries the parent pid
pub const CHILD_ENV: &str = "WARDEN_CHILD_OF";

/// Which side of a supervision pairing this process is on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessRole {
    Parent,
    Child { parent_pid: u32 },
}

impl ProcessRole {
    /// Determine the role from [`CHILD_ENV`]
    pub fn detect() -> Result<Self> {
        Self::from_env_value(std::env::var(CHILD_ENV).ok().as_deref())
    }

    pub fn from_env_value(value: Option<&str>) -> Result<Self> {
        match value {
            None => Ok(Self::Parent),
            Some(raw) => raw
                .trim()
                .parse::<u32>()
                .map(|parent_pid| Self::Child { parent_pid })
                .map_err(|_| {
                    WardenError::child_process(format!(
                        "{} must hold the parent pid, got {:?}",
                        CHILD_ENV, raw
                    ))
                }),
        }
    }

    pub fn is_child(&self) -> bool {
        matches!(self, Self::Child { .. })
    }
}

/// Handshake state of a supervision session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    NotStarted,
    AwaitingReady,
    Ready,
    Disposing,
    Exited,
}

impl HandshakeState {
    /// Whether moving from `self` to `next` is a legal transition
    pub fn can_transition_to(self, next: HandshakeState) -> bool {
        use HandshakeState::*;
        matches!(
            (self, next),
            (NotStarted, AwaitingReady)
                | (NotStarted, Disposing)
                | (AwaitingReady, Ready)
                | (AwaitingReady, Disposing)
                | (AwaitingReady, Exited)
                | (Ready, AwaitingReady)
                | (Ready, Disposing)
                | (Ready, Exited)
                | (Disposing, Exited)
        )
    }
}

impl fmt::Display for HandshakeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NotStarted => "not_started",
            Self::AwaitingReady => "awaiting_ready",
            Self::Ready => "ready",
            Self::Disposing => "disposing",
            Self::Exited => "exited",
        };
        f.write_str(name)
    }
}

/// One supervision pairing, owned by a single process
pub struct SupervisionSession {
    id: Uuid,
    role: ProcessRole,
    state: HandshakeState,
    disposer: Disposer,
    shutdown: Shutdown,
    last_exit_code: Option<i32>,
}

impl SupervisionSession {
    #[cfg(test)]
    pub fn new(role: ProcessRole) -> Self {
        Self::with_shutdown(role, Shutdown::new())
    }

    /// Session whose shutdown is driven by an existing trigger
    pub fn with_shutdown(role: ProcessRole, shutdown: Shutdown) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            state: HandshakeState::NotStarted,
            disposer: Disposer::new(),
            shutdown,
            last_exit_code: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Take over the session id assigned by the supervising parent
    pub fn adopt_id(&mut self, id: Uuid) {
        self.id = id;
    }

    #[cfg(test)]
    pub fn state(&self) -> HandshakeState {
        self.state
    }

    pub fn shutdown(&self) -> Shutdown {
        self.shutdown.clone()
    }

    #[cfg(test)]
    pub fn last_exit_code(&self) -> Option<i32> {
        self.last_exit_code
    }

    /// Remember the exit code observed for the supervised child
    pub fn record_exit(&mut self, code: i32) {
        self.last_exit_code = Some(code);
    }

    /// Move to `next`, rejecting transitions the handshake does not allow
    pub fn transition(&mut self, next: HandshakeState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(WardenError::internal(format!(
                "invalid handshake transition {} -> {}",
                self.state, next
            )));
        }
        debug!(session_id = %self.id, from = %self.state, to = %next, "Handshake state");
        self.state = next;
        Ok(())
    }

    /// Register a dispose callback
    pub async fn on_dispose<F, Fut>(&self, callback: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: std::future::Future<Output = Vec<WardenError>> + Send + 'static,
    {
        self.disposer.on_dispose(callback).await;
    }

    /// Dispose everything and produce the process exit code.
    ///
    /// With an error the code is 1. Without one it is the recorded child
    /// exit code, or 0.
    pub async fn exit(&mut self, error: Option<WardenError>) -> i32 {
        let code = match &error {
            Some(err) => {
                error!(session_id = %self.id, error_kind = %err.kind(), "{}", err);
                1
            }
            None => self.last_exit_code.unwrap_or(0),
        };

        if !matches!(
            self.state,
            HandshakeState::Disposing | HandshakeState::Exited
        ) {
            if let Err(e) = self.transition(HandshakeState::Disposing) {
                warn!("{}", e);
            }
        }

        self.shutdown.trigger();
        // Errors are logged by the disposer
        let _ = self.disposer.dispose().await;

        if self.state != HandshakeState::Exited {
            if let Err(e) = self.transition(HandshakeState::Exited) {
                warn!("{}", e);
            }
        }

        self.last_exit_code = Some(code);
        debug!(session_id = %self.id, role = ?self.role, code, "Session exited");
        code
    }
}
