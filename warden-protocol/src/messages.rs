//! Message types exchanged between warden processes
//!
//! Every message is a JSON object carrying a `kind` discriminant. The set of
//! kinds is closed: a payload naming any other kind is rejected by the codec
//! before it reaches a handler.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single protocol message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Message {
    /// Ask an existing instance to open folders and files
    Open(OpenCommand),
    /// Extension management request forwarded to a CLI worker
    Cli(CliForward),
    /// CLI worker is initialized and accepts exactly one `Cli` message
    Ready,
    /// Supervised worker is up and waits for the parent's acknowledgment
    Handshake,
    /// Parent acknowledges a worker's handshake
    HandshakeAck { session_id: Uuid },
    /// Supervised worker asks its parent to be restarted
    Relaunch { reason: String },
}

impl Message {
    /// All discriminants the protocol accepts
    pub const KINDS: &'static [&'static str] = &[
        "open",
        "cli",
        "ready",
        "handshake",
        "handshake_ack",
        "relaunch",
    ];

    /// The wire discriminant of this message
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Open(_) => "open",
            Message::Cli(_) => "cli",
            Message::Ready => "ready",
            Message::Handshake => "handshake",
            Message::HandshakeAck { .. } => "handshake_ack",
            Message::Relaunch { .. } => "relaunch",
        }
    }

    /// Check whether a discriminant belongs to the protocol
    pub fn is_known_kind(kind: &str) -> bool {
        Self::KINDS.contains(&kind)
    }
}

/// Why an [`OpenCommand`] could not be built
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum OpenCommandError {
    #[error("--new-window can only be used with folder paths")]
    NewWindowWithFiles,

    #[error("at least one file or folder is required")]
    NoTarget,
}

/// Request for an existing instance to open paths
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct OpenCommand {
    /// Absolute folder paths, in invocation order
    #[serde(rename = "folderURIs")]
    pub folder_uris: Vec<String>,
    /// Absolute file paths, in invocation order
    #[serde(rename = "fileURIs")]
    pub file_uris: Vec<String>,
    pub force_new_window: bool,
    pub force_reuse_window: bool,
}

impl OpenCommand {
    /// Build an open command, enforcing its invariants
    pub fn new(
        folder_uris: Vec<String>,
        file_uris: Vec<String>,
        force_new_window: bool,
        force_reuse_window: bool,
    ) -> Result<Self, OpenCommandError> {
        let command = Self {
            folder_uris,
            file_uris,
            force_new_window,
            force_reuse_window,
        };
        command.validate()?;
        Ok(command)
    }

    /// Check the invariants of a (possibly decoded) open command.
    ///
    /// Opening specific files always targets an existing window, so a new
    /// window may only be forced for folders.
    pub fn validate(&self) -> Result<(), OpenCommandError> {
        if self.force_new_window && !self.file_uris.is_empty() {
            return Err(OpenCommandError::NewWindowWithFiles);
        }
        if self.folder_uris.is_empty() && self.file_uris.is_empty() {
            return Err(OpenCommandError::NoTarget);
        }
        Ok(())
    }

    /// Total number of targets
    pub fn target_count(&self) -> usize {
        self.folder_uris.len() + self.file_uris.len()
    }
}

/// Extension management flags forwarded to a CLI worker
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CliForward {
    pub list_extensions: bool,
    pub show_versions: bool,
    pub install_extension: Vec<String>,
    pub uninstall_extension: Vec<String>,
    pub force: bool,
    pub extensions_dir: Option<String>,
}

impl CliForward {
    /// True when no extension operation is requested
    pub fn is_empty(&self) -> bool {
        !self.list_extensions
            && self.install_extension.is_empty()
            && self.uninstall_extension.is_empty()
    }
}
