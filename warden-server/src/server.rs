//! The server seam and the instance socket
//!
//! The arbitrator only sees [`EditorServer`] and [`ServerFactory`]. The
//! shipped implementation, [`InstanceSocketServer`], owns the instance
//! socket that later invocations delegate to.

use std::os::unix::fs::FileTypeExt;
use std::path::{Path, PathBuf};

use futures::future::BoxFuture;
use futures::{FutureExt, StreamExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::FramedRead;
use tracing::{debug, error, info, warn};

use warden_protocol::{Message, MessageCodec, OpenCommand};
use warden_utils::paths::ensure_parent;
use warden_utils::{heartbeat_file, ErrorKind, Result, WardenError};

use crate::channel::codec_error;
use crate::config::AuthMode;
use crate::heartbeat::Heartbeat;
use crate::invocation::ResolvedConfig;
use crate::supervisor::Shutdown;

/// Options handed to a server when a new instance starts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerOptions {
    pub auth: AuthMode,
    pub bind_addr: String,
    pub socket_path: PathBuf,
    pub proxy_domains: Vec<String>,
}

impl From<&ResolvedConfig> for ServerOptions {
    fn from(resolved: &ResolvedConfig) -> Self {
        Self {
            auth: resolved.auth,
            bind_addr: resolved.bind_addr.clone(),
            socket_path: resolved.socket_path.clone(),
            proxy_domains: resolved.proxy_domains.clone(),
        }
    }
}

/// A running editor server
pub trait EditorServer: Send {
    /// Start serving; resolves to the address other invocations reach us on
    fn listen(&mut self) -> BoxFuture<'_, Result<String>>;

    /// Release everything, reporting what could not be released
    fn dispose(&mut self) -> BoxFuture<'_, Vec<WardenError>>;
}

/// Builds servers for new instances
pub trait ServerFactory: Send + Sync {
    fn create(&self, options: ServerOptions) -> Result<Box<dyn EditorServer>>;
}

/// Factory for [`InstanceSocketServer`]
#[derive(Debug, Default)]
pub struct DefaultServerFactory;

impl ServerFactory for DefaultServerFactory {
    fn create(&self, options: ServerOptions) -> Result<Box<dyn EditorServer>> {
        info!(
            auth = ?options.auth,
            bind_addr = %options.bind_addr,
            proxy_domains = options.proxy_domains.len(),
            "Creating server"
        );
        Ok(Box::new(InstanceSocketServer::new(options)))
    }
}

fn remove_socket_if_exists(path: &Path) -> std::io::Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Bind the instance socket, replacing a stale one nobody answers on
async fn bind_listener(path: &Path) -> Result<UnixListener> {
    ensure_parent(path).map_err(|e| WardenError::FileWrite {
        path: path.to_path_buf(),
        source: e,
    })?;

    match UnixListener::bind(path) {
        Ok(listener) => Ok(listener),
        Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => {
            if UnixStream::connect(path).await.is_ok() {
                return Err(WardenError::connection(format!(
                    "an instance is already listening on {}",
                    path.display()
                )));
            }
            let is_socket = std::fs::symlink_metadata(path)
                .map(|meta| meta.file_type().is_socket())
                .unwrap_or(false);
            if !is_socket {
                return Err(WardenError::connection(format!(
                    "{} exists and is not a socket",
                    path.display()
                )));
            }
            debug!(path = %path.display(), "Replacing stale instance socket");
            remove_socket_if_exists(path)?;
            Ok(UnixListener::bind(path)?)
        }
        Err(e) => Err(WardenError::connection(format!(
            "failed to bind {}: {}",
            path.display(),
            e
        ))),
    }
}

/// Serves the instance socket
pub struct InstanceSocketServer {
    options: ServerOptions,
    heartbeat: Option<Heartbeat>,
    opened: Option<mpsc::Sender<OpenCommand>>,
    stop: Shutdown,
    accept_task: Option<JoinHandle<()>>,
}

impl InstanceSocketServer {
    pub fn new(options: ServerOptions) -> Self {
        Self {
            options,
            heartbeat: Some(Heartbeat::new(heartbeat_file(), Heartbeat::DEFAULT_INTERVAL)),
            opened: None,
            stop: Shutdown::new(),
            accept_task: None,
        }
    }

    #[cfg(test)]
    pub fn with_heartbeat(mut self, heartbeat: Heartbeat) -> Self {
        self.heartbeat = Some(heartbeat);
        self
    }

    /// Deliver every valid open request to `sink`
    #[cfg(test)]
    pub fn with_open_sink(mut self, sink: mpsc::Sender<OpenCommand>) -> Self {
        self.opened = Some(sink);
        self
    }

    async fn start(&mut self) -> Result<String> {
        if self.accept_task.is_some() {
            return Err(WardenError::internal("server is already listening"));
        }

        let listener = bind_listener(&self.options.socket_path).await?;
        let address = self.options.socket_path.to_string_lossy().into_owned();
        info!(address = %address, "Instance socket listening");

        let heartbeat = self
            .heartbeat
            .take()
            .ok_or_else(|| WardenError::internal("server cannot listen twice"))?;
        self.accept_task = Some(tokio::spawn(accept_loop(
            listener,
            self.opened.clone(),
            heartbeat,
            self.stop.clone(),
        )));
        Ok(address)
    }

    async fn stop(&mut self) -> Vec<WardenError> {
        let mut errors = Vec::new();
        self.stop.trigger();

        if let Some(task) = self.accept_task.take() {
            if let Err(e) = task.await {
                errors.push(WardenError::internal(format!("accept loop failed: {}", e)));
            }
            if let Err(e) = remove_socket_if_exists(&self.options.socket_path) {
                errors.push(WardenError::FileWrite {
                    path: self.options.socket_path.clone(),
                    source: e,
                });
            }
            info!(path = %self.options.socket_path.display(), "Instance socket closed");
        }

        errors
    }
}

impl EditorServer for InstanceSocketServer {
    fn listen(&mut self) -> BoxFuture<'_, Result<String>> {
        self.start().boxed()
    }

    fn dispose(&mut self) -> BoxFuture<'_, Vec<WardenError>> {
        self.stop().boxed()
    }
}

async fn accept_loop(
    listener: UnixListener,
    opened: Option<mpsc::Sender<OpenCommand>>,
    mut heartbeat: Heartbeat,
    stop: Shutdown,
) {
    loop {
        tokio::select! {
            _ = stop.wait() => {
                debug!("Stopping instance accept loop");
                break;
            }
            result = listener.accept() => match result {
                Ok((stream, _)) => {
                    if let Err(e) = heartbeat.beat().await {
                        warn!("Failed to record heartbeat: {}", e);
                    }
                    tokio::spawn(handle_connection(stream, opened.clone()));
                }
                Err(e) => error!("Instance socket accept error: {}", e),
            },
        }
    }
}

/// Read open requests until the peer closes or misbehaves
async fn handle_connection(stream: UnixStream, opened: Option<mpsc::Sender<OpenCommand>>) {
    let mut framed = FramedRead::new(stream, MessageCodec::new());

    while let Some(item) = framed.next().await {
        let command = match item {
            Ok(Message::Open(command)) => command,
            Ok(other) => {
                warn!(
                    error_kind = %ErrorKind::ProtocolViolation,
                    kind = other.kind(),
                    "Unexpected message on instance socket"
                );
                return;
            }
            Err(e) => {
                let err = codec_error(e);
                warn!(error_kind = %err.kind(), "Dropping connection: {}", err);
                return;
            }
        };

        if let Err(e) = command.validate() {
            warn!(error_kind = %ErrorKind::ProtocolViolation, "Rejected open request: {}", e);
            return;
        }

        info!(
            folders = ?command.folder_uris,
            files = ?command.file_uris,
            new_window = command.force_new_window,
            reuse_window = command.force_reuse_window,
            "Open request"
        );

        if let Some(sink) = &opened {
            if sink.send(command).await.is_err() {
                debug!("Open request receiver is gone");
            }
        }
    }
}
