//! Standard I/O transport for MCP.
//!
//! This is the primary transport for MCP servers running as a subprocess.
//! Uses newline-delimited JSON (NDJSON) framing.
//!
//! # Wire Format
//!
//! - Each message is serialized as a single line of JSON
//! - Lines are terminated by `\n` (a trailing `\r` is tolerated on input)
//! - Empty lines are ignored
//! - UTF-8 encoding is required
//!
//! The transport is generic over tokio's `AsyncRead`/`AsyncWrite`, so the
//! same code serves real stdio, child-process pipes and in-process
//! `tokio::io::duplex` streams in tests.

use async_trait::async_trait;
use relaymcp_core::logging::{debug, targets, trace};
use relaymcp_protocol::JsonRpcMessage;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, Stdin, Stdout};

use crate::{Codec, MessageReader, MessageWriter, Transport, TransportError};

const READ_CHUNK: usize = 8 * 1024;

/// NDJSON transport over a reader/writer pair.
pub struct StdioTransport<R, W> {
    reader: R,
    writer: W,
    max_message_size: usize,
}

impl<R, W> StdioTransport<R, W>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    /// Creates a transport over a custom reader/writer.
    #[must_use]
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader,
            writer,
            max_message_size: crate::DEFAULT_MAX_MESSAGE_SIZE,
        }
    }

    /// Sets the maximum size of one inbound message.
    #[must_use]
    pub fn with_max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }
}

impl StdioTransport<Stdin, Stdout> {
    /// Creates a transport using the process's stdin/stdout.
    #[must_use]
    pub fn stdio() -> Self {
        Self::new(tokio::io::stdin(), tokio::io::stdout())
    }
}

impl<R, W> Transport for StdioTransport<R, W>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    type Reader = StdioReader<R>;
    type Writer = StdioWriter<W>;

    fn split(self) -> (Self::Reader, Self::Writer) {
        (
            StdioReader {
                inner: self.reader,
                codec: Codec::with_max_message_size(self.max_message_size),
                chunk: vec![0; READ_CHUNK],
                eof: false,
            },
            StdioWriter {
                inner: self.writer,
                codec: Codec::new(),
                closed: false,
            },
        )
    }
}

/// Reading half of [`StdioTransport`].
pub struct StdioReader<R> {
    inner: R,
    codec: Codec,
    chunk: Vec<u8>,
    eof: bool,
}

#[async_trait]
impl<R: AsyncRead + Unpin + Send> MessageReader for StdioReader<R> {
    async fn recv(&mut self) -> Result<Option<JsonRpcMessage>, TransportError> {
        loop {
            if let Some(decoded) = self.codec.next_message() {
                return decoded.map(Some).map_err(TransportError::from);
            }
            if self.eof {
                return Ok(None);
            }

            let n = self.inner.read(&mut self.chunk).await?;
            if n == 0 {
                self.eof = true;
                if self.codec.has_partial() {
                    // Treat an unterminated last line as a complete frame.
                    self.codec.feed(b"\n");
                    continue;
                }
                debug!(target: targets::TRANSPORT, "stdio reader reached EOF");
                return Ok(None);
            }
            trace!(target: targets::TRANSPORT, "read {n} bytes");
            self.codec.feed(&self.chunk[..n]);
        }
    }
}

/// Writing half of [`StdioTransport`].
pub struct StdioWriter<W> {
    inner: W,
    codec: Codec,
    closed: bool,
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> MessageWriter for StdioWriter<W> {
    async fn send(&mut self, message: &JsonRpcMessage) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        let bytes = self.codec.encode(message)?;
        self.inner.write_all(&bytes).await?;
        self.inner.flush().await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.inner.flush().await?;
        self.inner.shutdown().await?;
        Ok(())
    }
}
