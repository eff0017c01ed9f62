//! Message codec for framing JSON-RPC messages.
//!
//! MCP uses newline-delimited JSON (NDJSON) for message framing. Incoming
//! bytes are fed into the codec in whatever chunks the transport delivers,
//! and complete lines are taken out one at a time so that a single bad line
//! fails only itself.

use relaymcp_core::logging::{targets, trace};
use relaymcp_protocol::JsonRpcMessage;

/// Default maximum message size (10 MiB).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 10 * 1024 * 1024;

/// Threshold for compacting the buffer once consumed bytes pile up.
const COMPACT_THRESHOLD: usize = 4096;

/// Codec for encoding/decoding JSON-RPC messages.
#[derive(Debug)]
pub struct Codec {
    /// Buffer for incomplete messages.
    buffer: Vec<u8>,
    /// Read position in buffer (data before this has been consumed).
    read_pos: usize,
    /// Maximum allowed message size in bytes.
    max_message_size: usize,
    /// Set after an oversized partial line; input is dropped up to the next newline.
    discarding: bool,
    /// Size of an oversized line not yet reported by `next_message`.
    overflow: Option<usize>,
}

impl Default for Codec {
    fn default() -> Self {
        Self::new()
    }
}

impl Codec {
    /// Creates a new codec with the default size limit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_message_size(DEFAULT_MAX_MESSAGE_SIZE)
    }

    /// Creates a codec with a custom size limit.
    #[must_use]
    pub fn with_max_message_size(max_message_size: usize) -> Self {
        Self {
            buffer: Vec::new(),
            read_pos: 0,
            max_message_size,
            discarding: false,
            overflow: None,
        }
    }

    /// Returns the maximum allowed message size in bytes.
    #[must_use]
    pub fn max_message_size(&self) -> usize {
        self.max_message_size
    }

    /// Encodes a message as one NDJSON line.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn encode(&self, message: &JsonRpcMessage) -> Result<Vec<u8>, CodecError> {
        let mut bytes = serde_json::to_vec(message)?;
        bytes.push(b'\n');
        trace!(target: targets::CODEC, "encoded {} ({} bytes)", message.kind(), bytes.len());
        Ok(bytes)
    }

    /// Appends raw bytes to the buffer.
    ///
    /// A pending partial line that exceeds the limit is discarded, and so is
    /// the rest of it when it arrives in later chunks. The overflow is
    /// reported by [`Codec::next_message`] after the complete lines that
    /// preceded it.
    pub fn feed(&mut self, mut data: &[u8]) {
        if self.discarding {
            let Some(newline) = data.iter().position(|b| *b == b'\n') else {
                return;
            };
            self.discarding = false;
            data = &data[newline + 1..];
        }
        if self.read_pos >= COMPACT_THRESHOLD {
            self.buffer.drain(..self.read_pos);
            self.read_pos = 0;
        }
        self.buffer.extend_from_slice(data);

        let unread = &self.buffer[self.read_pos..];
        let partial = match unread.iter().rposition(|b| *b == b'\n') {
            Some(last_newline) => unread.len() - last_newline - 1,
            None => unread.len(),
        };
        if partial > self.max_message_size {
            let keep = self.buffer.len() - partial;
            self.buffer.truncate(keep);
            self.discarding = true;
            self.overflow = Some(partial);
        }
    }

    /// Takes the next complete line out of the buffer and parses it.
    ///
    /// Empty lines are skipped. Once the complete lines are drained, a
    /// discarded oversized line is reported as
    /// [`CodecError::MessageTooLarge`]. Returns `None` when nothing is left.
    pub fn next_message(&mut self) -> Option<Result<JsonRpcMessage, CodecError>> {
        loop {
            let unread = &self.buffer[self.read_pos..];
            let Some(newline) = unread.iter().position(|b| *b == b'\n') else {
                return self.overflow.take().map(|size| Err(CodecError::MessageTooLarge(size)));
            };
            let start = self.read_pos;
            self.read_pos += newline + 1;

            let mut line = &self.buffer[start..start + newline];
            if line.last() == Some(&b'\r') {
                line = &line[..line.len() - 1];
            }
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            if line.len() > self.max_message_size {
                return Some(Err(CodecError::MessageTooLarge(line.len())));
            }
            return Some(serde_json::from_slice(line).map_err(CodecError::from));
        }
    }

    /// Returns true if a partial line is buffered.
    #[must_use]
    pub fn has_partial(&self) -> bool {
        self.buffer[self.read_pos..]
            .iter()
            .any(|b| !b.is_ascii_whitespace())
    }

    /// Clears the internal buffer.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.read_pos = 0;
        self.discarding = false;
        self.overflow = None;
    }
}

/// Codec error types.
#[derive(Debug)]
pub enum CodecError {
    /// JSON parsing error.
    Json(serde_json::Error),
    /// Message too large.
    MessageTooLarge(usize),
}

impl std::fmt::Display for CodecError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CodecError::Json(e) => write!(f, "JSON error: {e}"),
            CodecError::MessageTooLarge(size) => write!(f, "Message too large: {size} bytes"),
        }
    }
}

impl std::error::Error for CodecError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CodecError::Json(e) => Some(e),
            CodecError::MessageTooLarge(_) => None,
        }
    }
}

impl From<serde_json::Error> for CodecError {
    fn from(err: serde_json::Error) -> Self {
        CodecError::Json(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relaymcp_protocol::{JsonRpcRequest, JsonRpcResponse, RequestId};
    use std::error::Error;

    fn drain(codec: &mut Codec) -> Vec<Result<JsonRpcMessage, CodecError>> {
        std::iter::from_fn(|| codec.next_message()).collect()
    }

    #[test]
    fn encoded_message_is_one_line() {
        let codec = Codec::new();
        let response = JsonRpcResponse::success(RequestId::Number(1), serde_json::json!({}));
        let encoded = codec.encode(&response.into()).unwrap();

        assert!(encoded.ends_with(b"\n"));
        assert_eq!(encoded.iter().filter(|b| **b == b'\n').count(), 1);
    }

    #[test]
    fn decodes_multiple_messages_from_one_chunk() {
        let mut codec = Codec::new();
        codec.feed(b"{\"jsonrpc\":\"2.0\",\"method\":\"a\",\"id\":1}\n{\"jsonrpc\":\"2.0\",\"method\":\"b\"}\n");

        let messages = drain(&mut codec);
        assert_eq!(messages.len(), 2);
        assert!(matches!(&messages[0], Ok(JsonRpcMessage::Request(r)) if r.method == "a"));
        assert!(matches!(&messages[1], Ok(JsonRpcMessage::Notification(n)) if n.method == "b"));
    }

    #[test]
    fn partial_line_waits_for_the_rest() {
        let mut codec = Codec::new();
        codec.feed(b"{\"jsonrpc\":\"2.0\",\"method\":\"test\"");
        assert!(codec.next_message().is_none());
        assert!(codec.has_partial());

        codec.feed(b",\"id\":1}\r\n");
        let msg = codec.next_message().unwrap().unwrap();
        assert_eq!(msg.method(), Some("test"));
        assert!(!codec.has_partial());
    }

    #[test]
    fn bad_line_does_not_poison_the_next() {
        let mut codec = Codec::new();
        codec.feed(b"not valid json\n\n{\"jsonrpc\":\"2.0\",\"method\":\"ok\",\"id\":2}\n");

        let messages = drain(&mut codec);
        assert_eq!(messages.len(), 2);
        assert!(matches!(messages[0], Err(CodecError::Json(_))));
        assert!(messages[1].is_ok());
    }

    #[test]
    fn oversized_partial_line_is_rejected() {
        let req = JsonRpcRequest::new("oversized", None, 1i64);
        let line = serde_json::to_vec(&req).unwrap();

        let mut codec = Codec::with_max_message_size(line.len() - 1);
        codec.feed(&line);
        assert!(!codec.has_partial());
        assert!(matches!(
            codec.next_message(),
            Some(Err(CodecError::MessageTooLarge(size))) if size == line.len()
        ));
        assert!(codec.next_message().is_none());
    }

    #[test]
    fn tail_of_an_oversized_line_is_dropped() {
        let mut codec = Codec::with_max_message_size(40);
        let head = b"{\"jsonrpc\":\"2.0\",\"method\":\"a_rather_long_method_name";
        codec.feed(head);
        assert!(matches!(codec.next_message(), Some(Err(CodecError::MessageTooLarge(_)))));
        codec.feed(b"\",\"id\":1}\n{\"jsonrpc\":\"2.0\",\"method\":\"a\"}\n");

        let messages = drain(&mut codec);
        assert_eq!(messages.len(), 1);
        assert!(matches!(&messages[0], Ok(JsonRpcMessage::Notification(n)) if n.method == "a"));
    }

    #[test]
    fn overflow_is_reported_after_the_lines_before_it() {
        let mut codec = Codec::with_max_message_size(40);
        let mut chunk = b"{\"jsonrpc\":\"2.0\",\"method\":\"a\"}\n".to_vec();
        chunk.extend_from_slice(b"{\"jsonrpc\":\"2.0\",\"method\":\"a_rather_long_method_name");
        codec.feed(&chunk);

        let messages = drain(&mut codec);
        assert_eq!(messages.len(), 2);
        assert!(matches!(&messages[0], Ok(JsonRpcMessage::Notification(n)) if n.method == "a"));
        assert!(matches!(messages[1], Err(CodecError::MessageTooLarge(52))));
    }

    #[test]
    fn messages_at_the_limit_pass_one_at_a_time() {
        let mut line = serde_json::to_vec(&JsonRpcRequest::new("t1", None, 1i64)).unwrap();
        let limit = line.len();
        line.push(b'\n');

        let mut codec = Codec::with_max_message_size(limit);
        codec.feed(&line);
        assert!(codec.next_message().unwrap().is_ok());
        codec.feed(&line);
        assert!(codec.next_message().unwrap().is_ok());
    }

    #[test]
    fn clear_drops_buffered_data() {
        let mut codec = Codec::new();
        codec.feed(b"{\"jsonrpc\":\"2.0\"");
        codec.clear();

        codec.feed(b"{\"jsonrpc\":\"2.0\",\"method\":\"fresh\",\"id\":1}\n");
        let msg = codec.next_message().unwrap().unwrap();
        assert_eq!(msg.method(), Some("fresh"));
    }

    #[test]
    fn codec_error_display_and_source() {
        let json_err = CodecError::Json(serde_json::from_str::<()>("invalid").unwrap_err());
        let size_err = CodecError::MessageTooLarge(1000);

        assert!(json_err.to_string().contains("JSON error"));
        assert!(size_err.to_string().contains("1000"));
        assert!(json_err.source().is_some());
        assert!(size_err.source().is_none());
    }
}
