//! Per-invocation mode decision
//!
//! Runs once per process and picks exactly one path: serve as a supervised
//! worker, hand extension management to a CLI worker, delegate to a running
//! instance, or start a new instance. A failed delegation falls through to
//! starting a new instance; nothing else is retried.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use warden_utils::Result;

use crate::cli_delegate::CliDelegate;
use crate::config::AppConfig;
use crate::delegate::InstanceDelegator;
use crate::invocation::Invocation;
use crate::probe::{InstanceProbe, LastInstanceRecord};
use crate::server::{ServerFactory, ServerOptions};
use crate::supervisor::{
    hangup_signal, route_signals_to, ChildProcess, HandshakeState, ParentProcess, ProcessRole,
    Shutdown, SupervisionSession, WorkerCommand,
};

/// Chooses and runs the mode for one invocation
pub struct Arbitrator {
    config: AppConfig,
    factory: Arc<dyn ServerFactory>,
    worker: WorkerCommand,
    probe: InstanceProbe,
    delegator: InstanceDelegator,
    record: Option<LastInstanceRecord>,
    shutdown: Shutdown,
}

impl Arbitrator {
    pub fn new(config: AppConfig, factory: Arc<dyn ServerFactory>, worker: WorkerCommand) -> Self {
        let record = config
            .probe
            .use_last_instance
            .then(LastInstanceRecord::default_location);
        let delegator = InstanceDelegator::new(config.delegation.timeout());
        let probe = InstanceProbe::from_config(&config.probe);

        Self {
            config,
            factory,
            worker,
            probe,
            delegator,
            record,
            shutdown: Shutdown::new(),
        }
    }

    /// Use a different last-instance record, or none
    #[cfg(test)]
    pub fn with_record(mut self, record: Option<LastInstanceRecord>) -> Self {
        self.probe = InstanceProbe::new(record.clone(), self.config.probe.liveness_timeout());
        self.record = record;
        self
    }

    /// Trigger that stops a serving instance
    #[cfg(test)]
    pub fn shutdown_handle(&self) -> Shutdown {
        self.shutdown.clone()
    }

    /// Run the invocation and return the process exit code
    pub async fn run(&self, invocation: Invocation, role: ProcessRole) -> i32 {
        if let ProcessRole::Child { parent_pid } = role {
            return self.run_child(&invocation, parent_pid).await;
        }

        if invocation.is_cli_operation() {
            debug!("Handing extension management to a CLI worker");
            let mut delegate =
                CliDelegate::new(self.worker.clone(), self.config.supervisor.handshake_timeout());
            return delegate.run(invocation.cli_forward()).await;
        }

        if let Some(address) = self.probe.probe(&invocation).await {
            match self.delegator.delegate(&invocation, &address).await {
                Ok(_) => return 0,
                Err(err) if err.is_recoverable() => {
                    warn!(
                        error_kind = %err.kind(),
                        address = %address,
                        "Starting a new instance instead: {}",
                        err
                    );
                }
                Err(err) => {
                    error!(error_kind = %err.kind(), "{}", err);
                    eprintln!("Error: {}", err);
                    return 1;
                }
            }
        }

        self.start_new(&invocation).await
    }

    async fn start_new(&self, invocation: &Invocation) -> i32 {
        let mut session = SupervisionSession::with_shutdown(ProcessRole::Parent, self.shutdown());

        if invocation.resolved().supervise {
            info!(session_id = %session.id(), "Starting supervised instance");
            let parent =
                ParentProcess::new(self.worker.clone(), self.config.supervisor.handshake_timeout());
            return match parent.supervise(&mut session).await {
                Ok(code) => {
                    session.record_exit(code);
                    session.exit(None).await
                }
                Err(err) => session.exit(Some(err)).await,
            };
        }

        info!(session_id = %session.id(), "Starting instance");
        let result = match route_signals_to(session.shutdown()) {
            Ok(_) => self.serve(&mut session, invocation, None).await,
            Err(err) => Err(err),
        };
        session.exit(result.err()).await
    }

    async fn run_child(&self, invocation: &Invocation, parent_pid: u32) -> i32 {
        let mut session = SupervisionSession::with_shutdown(
            ProcessRole::Child { parent_pid },
            self.shutdown(),
        );
        let result = self.serve_as_child(&mut session, invocation, parent_pid).await;
        session.exit(result.err()).await
    }

    async fn serve_as_child(
        &self,
        session: &mut SupervisionSession,
        invocation: &Invocation,
        parent_pid: u32,
    ) -> Result<()> {
        let mut child = ChildProcess::connect(parent_pid).await?;
        child.prevent_exit(session.shutdown())?;

        session.transition(HandshakeState::AwaitingReady)?;
        let shutdown = session.shutdown();
        let handshake = child
            .await_handshake_or_shutdown(self.config.supervisor.handshake_timeout(), &shutdown)
            .await?;
        let Some(session_id) = handshake else {
            debug!(session_id = %session.id(), "Stopped before the handshake completed");
            return Ok(());
        };
        session.adopt_id(session_id);
        session.transition(HandshakeState::Ready)?;

        child.watch_parent(session.shutdown());
        self.serve(session, invocation, Some(&mut child)).await
    }

    /// Create and start the server, then hold until shutdown
    async fn serve(
        &self,
        session: &mut SupervisionSession,
        invocation: &Invocation,
        child: Option<&mut ChildProcess>,
    ) -> Result<()> {
        let mut server = self.factory.create(ServerOptions::from(invocation.resolved()))?;
        let address = match server.listen().await {
            Ok(address) => address,
            Err(err) => {
                for e in server.dispose().await {
                    warn!(error_kind = %e.kind(), "Dispose failed: {}", e);
                }
                return Err(err);
            }
        };
        session
            .on_dispose(move || async move {
                let mut server = server;
                server.dispose().await
            })
            .await;

        if let Some(record) = self.record.clone() {
            match record.write(&address).await {
                Ok(()) => {
                    let address = address.clone();
                    session
                        .on_dispose(move || async move {
                            match record.clear_if(&address).await {
                                Ok(_) => Vec::new(),
                                Err(e) => vec![e],
                            }
                        })
                        .await;
                }
                Err(err) => {
                    warn!(error_kind = %err.kind(), "Cannot record last instance: {}", err);
                }
            }
        }

        info!(session_id = %session.id(), address = %address, "Instance ready");
        if !invocation.paths().is_empty() {
            info!(paths = ?invocation.paths(), "Paths requested for the new instance");
        }

        let shutdown = session.shutdown();
        match child {
            None => shutdown.wait().await,
            Some(child) => {
                let mut hangup = hangup_signal()?;
                loop {
                    tokio::select! {
                        _ = shutdown.wait() => break,
                        _ = hangup.recv() => {
                            if let Err(err) = child.relaunch("SIGHUP").await {
                                warn!(error_kind = %err.kind(), "Relaunch request failed: {}", err);
                            }
                        }
                    }
                }
            }
        }

        debug!(session_id = %session.id(), "Shutting down instance");
        Ok(())
    }

    fn shutdown(&self) -> Shutdown {
        self.shutdown.clone()
    }
}
