//! Message codec for IPC framing
//!
//! Messages travel as one JSON object per line. A sender that writes a
//! single object and closes the connection without a trailing newline is
//! accepted too: whatever remains at EOF is decoded as the last message.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::messages::Message;

/// Maximum message size (16 MB)
const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Protocol codec error
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed message: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: usize, max: usize },

    #[error("Message has no kind")]
    MissingKind,

    #[error("Unknown message kind: {0}")]
    UnknownKind(String),
}

impl CodecError {
    /// True when the peer sent something the protocol does not allow, as
    /// opposed to the transport failing underneath.
    pub fn is_protocol_violation(&self) -> bool {
        !matches!(self, Self::Io(_))
    }
}

/// Newline-delimited JSON codec for [`Message`]
///
/// The same codec serves both ends of every connection.
#[derive(Debug, Default)]
pub struct MessageCodec {
    /// Bytes already scanned for a newline
    next_index: usize,
}

impl MessageCodec {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Decoder for MessageCodec {
    type Item = Message;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            let newline = src[self.next_index..].iter().position(|b| *b == b'\n');

            let Some(offset) = newline else {
                if src.len() > MAX_MESSAGE_SIZE {
                    return Err(CodecError::MessageTooLarge {
                        size: src.len(),
                        max: MAX_MESSAGE_SIZE,
                    });
                }
                self.next_index = src.len();
                return Ok(None);
            };

            let line_end = self.next_index + offset;
            self.next_index = 0;

            let line = src.split_to(line_end);
            src.advance(1);

            let line = trim_line(&line);
            if line.is_empty() {
                continue;
            }

            return decode_message(line).map(Some);
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(msg) = self.decode(src)? {
            return Ok(Some(msg));
        }

        self.next_index = 0;
        let rest = src.split();
        let line = trim_line(&rest);
        if line.is_empty() {
            return Ok(None);
        }
        decode_message(line).map(Some)
    }
}

impl Encoder<Message> for MessageCodec {
    type Error = CodecError;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let data = encode_message(&item)?;
        dst.reserve(data.len() + 1);
        dst.put_slice(&data);
        dst.put_u8(b'\n');
        Ok(())
    }
}

fn trim_line(line: &[u8]) -> &[u8] {
    let mut line = line;
    while let [rest @ .., last] = line {
        if last.is_ascii_whitespace() {
            line = rest;
        } else {
            break;
        }
    }
    while let [first, rest @ ..] = line {
        if first.is_ascii_whitespace() {
            line = rest;
        } else {
            break;
        }
    }
    line
}

/// Decode one JSON payload into a message.
///
/// The `kind` discriminant is checked against the closed set first so that
/// an unknown kind is reported as such rather than as a generic JSON error.
pub fn decode_message(data: &[u8]) -> Result<Message, CodecError> {
    if data.len() > MAX_MESSAGE_SIZE {
        return Err(CodecError::MessageTooLarge {
            size: data.len(),
            max: MAX_MESSAGE_SIZE,
        });
    }

    let value: serde_json::Value = serde_json::from_slice(data)?;
    let kind = value
        .get("kind")
        .and_then(serde_json::Value::as_str)
        .ok_or(CodecError::MissingKind)?;

    if !Message::is_known_kind(kind) {
        return Err(CodecError::UnknownKind(kind.to_string()));
    }

    Ok(serde_json::from_value(value)?)
}

/// Encode a message as a single JSON payload (no trailing newline)
pub fn encode_message(item: &Message) -> Result<Vec<u8>, CodecError> {
    let data = serde_json::to_vec(item)?;

    if data.len() > MAX_MESSAGE_SIZE {
        return Err(CodecError::MessageTooLarge {
            size: data.len(),
            max: MAX_MESSAGE_SIZE,
        });
    }

    Ok(data)
}
