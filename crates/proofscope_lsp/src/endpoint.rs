//! Shared endpoint state between the caller thread and the reader thread.
//!
//! One reader thread per checker process drains stdout: responses are routed
//! to the blocked caller, pushed diagnostics land in a [`DashMap`] keyed by
//! URI, and the checker's file-progress notifications flip the
//! operation-completed flag the client polls on. Server-initiated requests
//! are acknowledged with a null result so the checker never stalls waiting
//! on us.

use std::collections::HashMap;
use std::io::{BufRead, Write};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{mpsc, Arc, Mutex};

use dashmap::DashMap;
use lsp_types::{Diagnostic, Url};
use serde_json::Value;

use crate::transport::{MessageReader, MessageWriter};

/// A response routed back to a waiting request.
pub type RpcReply = Result<Value, Value>;

/// State shared with the reader thread.
pub struct EndpointState {
    diagnostics: DashMap<Url, Vec<Diagnostic>>,
    pending: Mutex<HashMap<u64, mpsc::Sender<RpcReply>>>,
    next_id: AtomicU64,
    /// Set when the checker reports no spans left in flight for the last
    /// synchronization; cleared by the client before each one.
    completed: AtomicBool,
    /// Set when the reader thread loses the checker (EOF or stream error).
    down: AtomicBool,
}

impl EndpointState {
    pub fn new() -> Arc<Self> {
        Arc::new(EndpointState {
            diagnostics: DashMap::new(),
            pending: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            completed: AtomicBool::new(false),
            down: AtomicBool::new(false),
        })
    }

    pub fn diagnostics_for(&self, uri: &Url) -> Vec<Diagnostic> {
        self.diagnostics
            .get(uri)
            .map(|entry| entry.value().clone())
            .unwrap_or_default()
    }

    pub fn begin_operation(&self) {
        self.completed.store(false, Ordering::SeqCst);
    }

    pub fn operation_completed(&self) -> bool {
        self.completed.load(Ordering::SeqCst)
    }

    pub fn is_down(&self) -> bool {
        self.down.load(Ordering::SeqCst)
    }

    pub fn mark_down(&self) {
        self.down.store(true, Ordering::SeqCst);
        // Wake every waiter: dropping the senders errors their receivers.
        if let Ok(mut pending) = self.pending.lock() {
            pending.clear();
        }
    }

    /// Allocate a request id and register a channel for its reply.
    pub fn register_request(&self) -> (u64, mpsc::Receiver<RpcReply>) {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::channel();
        if let Ok(mut pending) = self.pending.lock() {
            pending.insert(id, tx);
        }
        (id, rx)
    }

    pub fn forget_request(&self, id: u64) {
        if let Ok(mut pending) = self.pending.lock() {
            pending.remove(&id);
        }
    }

    fn route_response(&self, message: &Value) {
        let Some(id) = message.get("id").and_then(Value::as_u64) else {
            return;
        };
        let sender = match self.pending.lock() {
            Ok(mut pending) => pending.remove(&id),
            Err(_) => None,
        };
        let Some(sender) = sender else { return };
        let reply = match message.get("error") {
            Some(error) if !error.is_null() => Err(error.clone()),
            _ => Ok(message.get("result").cloned().unwrap_or(Value::Null)),
        };
        let _ = sender.send(reply);
    }

    fn handle_notification(&self, method: &str, params: &Value) {
        match method {
            "textDocument/publishDiagnostics" => {
                let uri = params
                    .get("uri")
                    .and_then(Value::as_str)
                    .and_then(|u| Url::parse(u).ok());
                let diags: Vec<Diagnostic> = params
                    .get("diagnostics")
                    .cloned()
                    .and_then(|d| serde_json::from_value(d).ok())
                    .unwrap_or_default();
                if let Some(uri) = uri {
                    self.diagnostics.insert(uri, diags);
                }
            }
            "$/coq/fileProgress" => {
                let processing_left = params
                    .get("processing")
                    .and_then(Value::as_array)
                    .map(|p| p.len())
                    .unwrap_or(0);
                if processing_left == 0 {
                    self.completed.store(true, Ordering::SeqCst);
                }
            }
            _ => log::trace!("ignoring notification {method}"),
        }
    }
}

/// Drain the checker's stdout until it closes.
///
/// Runs on its own thread; `writer` is shared with the caller thread so
/// server-initiated requests can be acknowledged inline.
pub fn reader_loop<R, W>(
    state: Arc<EndpointState>,
    mut reader: MessageReader<R>,
    writer: Arc<Mutex<MessageWriter<W>>>,
) where
    R: BufRead,
    W: Write,
{
    loop {
        let message = match reader.read_message() {
            Ok(Some(message)) => message,
            Ok(None) => break,
            Err(err) => {
                log::warn!("checker stream error: {err}");
                break;
            }
        };

        let method = message.get("method").and_then(Value::as_str);
        let has_id = message.get("id").map(|id| !id.is_null()).unwrap_or(false);
        match (method, has_id) {
            (Some(method), true) => {
                // Server request. We support none, but must answer.
                log::debug!("acknowledging server request {method}");
                if let (Some(id), Ok(mut writer)) = (message.get("id"), writer.lock()) {
                    let _ = writer.write_response(id, Value::Null);
                }
            }
            (Some(method), false) => {
                let params = message.get("params").cloned().unwrap_or(Value::Null);
                state.handle_notification(method, &params);
            }
            (None, _) => state.route_response(&message),
        }
    }
    state.mark_down();
}
