//! Content-Length framed JSON-RPC over byte streams.
//!
//! The checker speaks the LSP base protocol: each message is a JSON body
//! preceded by `Content-Length: N\r\n` headers and a blank line. This module
//! is stream-agnostic so the codec can be tested against in-memory buffers.

use std::io::{self, BufRead, Write};

use serde_json::Value;

/// Writes framed messages to a stream.
pub struct MessageWriter<W: Write> {
    inner: W,
}

impl<W: Write> MessageWriter<W> {
    pub fn new(inner: W) -> Self {
        MessageWriter { inner }
    }

    pub fn into_inner(self) -> W {
        self.inner
    }

    pub fn write_message(&mut self, message: &Value) -> io::Result<()> {
        let body = serde_json::to_string(message)?;
        write!(self.inner, "Content-Length: {}\r\n\r\n{}", body.len(), body)?;
        self.inner.flush()
    }

    /// Frame and write a request.
    pub fn write_request(&mut self, id: u64, method: &str, params: Value) -> io::Result<()> {
        self.write_message(&serde_json::json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        }))
    }

    /// Frame and write a notification (no id, no reply expected).
    pub fn write_notification(&mut self, method: &str, params: Value) -> io::Result<()> {
        self.write_message(&serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
        }))
    }

    /// Answer a server-initiated request.
    pub fn write_response(&mut self, id: &Value, result: Value) -> io::Result<()> {
        self.write_message(&serde_json::json!({
            "jsonrpc": "2.0",
            "id": id,
            "result": result,
        }))
    }
}

/// Reads framed messages from a stream.
pub struct MessageReader<R: BufRead> {
    inner: R,
}

impl<R: BufRead> MessageReader<R> {
    pub fn new(inner: R) -> Self {
        MessageReader { inner }
    }

    /// Read one message. Returns `Ok(None)` on clean end of stream.
    pub fn read_message(&mut self) -> io::Result<Option<Value>> {
        let mut content_length: Option<usize> = None;
        loop {
            let mut line = String::new();
            if self.inner.read_line(&mut line)? == 0 {
                return Ok(None);
            }
            let line = line.trim_end_matches(['\r', '\n']);
            if line.is_empty() {
                break;
            }
            if let Some(value) = line.strip_prefix("Content-Length:") {
                content_length = Some(value.trim().parse().map_err(|_| {
                    io::Error::new(io::ErrorKind::InvalidData, "bad Content-Length header")
                })?);
            }
            // Content-Type and any future headers are ignored.
        }

        let len = content_length.ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidData, "message without Content-Length")
        })?;
        let mut body = vec![0u8; len];
        io::Read::read_exact(&mut self.inner, &mut body)?;
        let value = serde_json::from_slice(&body)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        Ok(Some(value))
    }
}
