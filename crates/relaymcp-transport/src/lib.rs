//! Transport layer for relaymcp.
//!
//! The dispatch engine sees a connection only as a duplex channel of
//! [`JsonRpcMessage`]s. A [`Transport`] splits into a [`MessageReader`] and a
//! [`MessageWriter`] so that reading and writing proceed on separate tokio
//! tasks.
//!
//! Provided transports:
//! - [`StdioTransport`]: NDJSON over any `AsyncRead`/`AsyncWrite` pair
//!   (process stdio, pipes, `tokio::io::duplex`)
//! - [`MemoryTransport`]: message-level in-process channel, see
//!   [`memory_pair`]

#![forbid(unsafe_code)]

mod codec;
mod memory;
mod stdio;

use async_trait::async_trait;
use relaymcp_protocol::JsonRpcMessage;

pub use codec::{Codec, CodecError, DEFAULT_MAX_MESSAGE_SIZE};
pub use memory::{MemoryReader, MemoryTransport, MemoryWriter, memory_pair};
pub use stdio::{StdioReader, StdioTransport, StdioWriter};

/// Receiving half of a transport.
#[async_trait]
pub trait MessageReader: Send {
    /// Receives the next message.
    ///
    /// Returns `Ok(None)` when the peer closed the connection. A
    /// [`TransportError::Codec`] error concerns a single frame; the reader can
    /// be polled again afterwards.
    async fn recv(&mut self) -> Result<Option<JsonRpcMessage>, TransportError>;
}

/// Sending half of a transport.
#[async_trait]
pub trait MessageWriter: Send {
    /// Sends one message.
    async fn send(&mut self, message: &JsonRpcMessage) -> Result<(), TransportError>;

    /// Flushes and closes the sending side.
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// A duplex message channel.
pub trait Transport: Send + 'static {
    /// Receiving half.
    type Reader: MessageReader + 'static;
    /// Sending half.
    type Writer: MessageWriter + 'static;

    /// Splits the transport into independently owned halves.
    fn split(self) -> (Self::Reader, Self::Writer);
}

/// Transport error types.
#[derive(Debug)]
pub enum TransportError {
    /// I/O failure; the connection is unusable.
    Io(std::io::Error),
    /// A frame could not be decoded or encoded.
    Codec(CodecError),
    /// The connection is closed.
    Closed,
}

impl TransportError {
    /// Returns true if the error ends the connection.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        !matches!(self, TransportError::Codec(_))
    }
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportError::Io(e) => write!(f, "I/O error: {e}"),
            TransportError::Codec(e) => write!(f, "Codec error: {e}"),
            TransportError::Closed => write!(f, "Transport closed"),
        }
    }
}

impl std::error::Error for TransportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TransportError::Io(e) => Some(e),
            TransportError::Codec(e) => Some(e),
            TransportError::Closed => None,
        }
    }
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        TransportError::Io(err)
    }
}

impl From<CodecError> for TransportError {
    fn from(err: CodecError) -> Self {
        TransportError::Codec(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_codec_errors_are_recoverable() {
        assert!(!TransportError::Codec(CodecError::MessageTooLarge(1)).is_fatal());
        assert!(TransportError::Closed.is_fatal());
        assert!(TransportError::Io(std::io::Error::other("boom")).is_fatal());
    }

    #[test]
    fn display_names_the_failure() {
        let err = TransportError::from(CodecError::MessageTooLarge(42));
        assert!(err.to_string().contains("42"));
        assert_eq!(TransportError::Closed.to_string(), "Transport closed");
    }
}
