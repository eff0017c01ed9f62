//! In-process transport.
//!
//! Passes already-decoded messages over tokio channels. Useful when both
//! peers live in one process and framing adds nothing.

use async_trait::async_trait;
use relaymcp_protocol::JsonRpcMessage;
use tokio::sync::mpsc;

use crate::{MessageReader, MessageWriter, Transport, TransportError};

/// One end of an in-memory connection.
#[derive(Debug)]
pub struct MemoryTransport {
    tx: mpsc::UnboundedSender<JsonRpcMessage>,
    rx: mpsc::UnboundedReceiver<JsonRpcMessage>,
}

/// Creates two connected in-memory transports.
#[must_use]
pub fn memory_pair() -> (MemoryTransport, MemoryTransport) {
    let (a_tx, b_rx) = mpsc::unbounded_channel();
    let (b_tx, a_rx) = mpsc::unbounded_channel();
    (
        MemoryTransport { tx: a_tx, rx: a_rx },
        MemoryTransport { tx: b_tx, rx: b_rx },
    )
}

impl Transport for MemoryTransport {
    type Reader = MemoryReader;
    type Writer = MemoryWriter;

    fn split(self) -> (Self::Reader, Self::Writer) {
        (
            MemoryReader { rx: self.rx },
            MemoryWriter { tx: Some(self.tx) },
        )
    }
}

/// Receiving half of a [`MemoryTransport`].
#[derive(Debug)]
pub struct MemoryReader {
    rx: mpsc::UnboundedReceiver<JsonRpcMessage>,
}

#[async_trait]
impl MessageReader for MemoryReader {
    async fn recv(&mut self) -> Result<Option<JsonRpcMessage>, TransportError> {
        Ok(self.rx.recv().await)
    }
}

/// Sending half of a [`MemoryTransport`].
#[derive(Debug)]
pub struct MemoryWriter {
    tx: Option<mpsc::UnboundedSender<JsonRpcMessage>>,
}

#[async_trait]
impl MessageWriter for MemoryWriter {
    async fn send(&mut self, message: &JsonRpcMessage) -> Result<(), TransportError> {
        let tx = self.tx.as_ref().ok_or(TransportError::Closed)?;
        tx.send(message.clone())
            .map_err(|_| TransportError::Closed)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.tx = None;
        Ok(())
    }
}
