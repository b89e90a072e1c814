//! warden-protocol: Shared IPC definitions
//!
//! This crate defines the messages exchanged between warden processes:
//! open requests sent to an existing instance over its socket, and the
//! handshake messages passed between a parent and the child it spawned.

pub mod codec;
pub mod messages;

// Re-export main types at crate root
pub use codec::{decode_message, encode_message, CodecError, MessageCodec};
pub use messages::{CliForward, Message, OpenCommand, OpenCommandError};
