//! The production checker client.
//!
//! Spawns a `coq-lsp` process under a virtual-memory cap, performs the
//! `initialize`/`initialized` handshake, and exposes the blocking call
//! surface of [`CheckerSession`]. Document synchronization calls
//! (`did_open`/`did_change`) additionally wait for the checker's
//! file-progress signal so that, when they return, diagnostics and the AST
//! document reflect the text that was sent.

use std::io::BufReader;
use std::process::{Child, Command, Stdio};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use lsp_types::{Diagnostic, Position, Url};
use serde_json::{json, Value};

use crate::endpoint::{reader_loop, EndpointState};
use crate::error::SessionError;
use crate::session::{CheckerSession, SessionFactory};
use crate::transport::{MessageReader, MessageWriter};
use crate::types::{text_document_id, FlecheDocument, GoalAnswer, InitOptions};

/// Granularity of the completion poll.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// How the checker process is launched and initialized.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Executable to run. Overridable for wrapper scripts.
    pub command: String,
    /// Per-operation budget; on exhaustion the session dies with
    /// [`SessionError::ServerQuit`].
    pub timeout: Duration,
    /// `ulimit -v` value for the checker process, in kilobytes.
    pub memory_limit_kb: u64,
    pub init_options: InitOptions,
}

impl Default for ClientOptions {
    fn default() -> Self {
        ClientOptions {
            command: "coq-lsp".to_string(),
            timeout: Duration::from_secs(2),
            memory_limit_kb: 2_097_152,
            init_options: InitOptions::default(),
        }
    }
}

type SharedWriter = Arc<Mutex<MessageWriter<std::process::ChildStdin>>>;

/// A blocking client owning one checker process.
pub struct CoqLspClient {
    state: Arc<EndpointState>,
    writer: SharedWriter,
    child: Mutex<Child>,
    timeout: Duration,
}

impl CoqLspClient {
    /// Spawn the checker and complete the handshake.
    ///
    /// `root_uri` is the workspace the checker resolves libraries against;
    /// it may point at a file or a folder.
    pub fn new(root_uri: &Url, options: &ClientOptions) -> Result<Self, SessionError> {
        let mut child = Command::new("sh")
            .arg("-c")
            .arg(format!(
                "ulimit -v {}; exec {}",
                options.memory_limit_kb, options.command
            ))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| SessionError::Protocol("checker stdin unavailable".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SessionError::Protocol("checker stdout unavailable".into()))?;

        let state = EndpointState::new();
        let writer: SharedWriter = Arc::new(Mutex::new(MessageWriter::new(stdin)));
        {
            let state = Arc::clone(&state);
            let writer = Arc::clone(&writer);
            thread::spawn(move || {
                reader_loop(state, MessageReader::new(BufReader::new(stdout)), writer)
            });
        }

        let client = CoqLspClient {
            state,
            writer,
            child: Mutex::new(child),
            timeout: options.timeout,
        };
        client.initialize(root_uri, &options.init_options)?;
        Ok(client)
    }

    fn initialize(&self, root_uri: &Url, init_options: &InitOptions) -> Result<(), SessionError> {
        let pid = match self.child.lock() {
            Ok(child) => child.id(),
            Err(_) => 0,
        };
        self.request(
            "initialize",
            json!({
                "processId": pid,
                "rootPath": "",
                "rootUri": root_uri,
                "initializationOptions": init_options,
                "capabilities": {},
                "trace": "off",
                "workspaceFolders": [{ "name": "coq-lsp", "uri": root_uri }],
            }),
        )?;
        self.notify("initialized", json!({}))
    }

    fn notify(&self, method: &str, params: Value) -> Result<(), SessionError> {
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| SessionError::Protocol("writer poisoned".into()))?;
        writer.write_notification(method, params)?;
        Ok(())
    }

    fn request(&self, method: &str, params: Value) -> Result<Value, SessionError> {
        if self.state.is_down() {
            return Err(SessionError::ServerQuit("checker is down".into()));
        }
        let (id, rx) = self.state.register_request();
        {
            let mut writer = self
                .writer
                .lock()
                .map_err(|_| SessionError::Protocol("writer poisoned".into()))?;
            writer.write_request(id, method, params)?;
        }
        match rx.recv_timeout(self.timeout) {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(error)) => Err(SessionError::Protocol(format!(
                "{method} failed: {error}"
            ))),
            Err(_) => {
                self.state.forget_request(id);
                self.quit();
                Err(SessionError::ServerQuit(format!(
                    "{method} timed out after {:?}",
                    self.timeout
                )))
            }
        }
    }

    /// Poll until the checker reports the last synchronization processed.
    fn wait_for_operation(&self) -> Result<(), SessionError> {
        let mut remaining = self.timeout;
        while !self.state.operation_completed() {
            if self.state.is_down() {
                return Err(SessionError::ServerQuit("checker is down".into()));
            }
            if remaining.is_zero() {
                self.quit();
                return Err(SessionError::ServerQuit(format!(
                    "checker did not finish within {:?}",
                    self.timeout
                )));
            }
            let nap = POLL_INTERVAL.min(remaining);
            thread::sleep(nap);
            remaining -= nap;
        }
        Ok(())
    }

    /// Best-effort `shutdown`/`exit`, then reap the process.
    fn quit(&self) {
        let _ = self.notify("exit", json!({}));
        if let Ok(mut child) = self.child.lock() {
            thread::sleep(Duration::from_millis(50));
            let _ = child.kill();
            let _ = child.wait();
        }
        self.state.mark_down();
    }
}

impl CheckerSession for CoqLspClient {
    fn did_open(&self, uri: &Url, text: &str) -> Result<(), SessionError> {
        self.state.begin_operation();
        self.notify(
            "textDocument/didOpen",
            json!({
                "textDocument": {
                    "uri": uri,
                    "languageId": "coq",
                    "version": 1,
                    "text": text,
                }
            }),
        )?;
        self.wait_for_operation()
    }

    fn did_change(&self, uri: &Url, version: i32, text: &str) -> Result<(), SessionError> {
        self.state.begin_operation();
        self.notify(
            "textDocument/didChange",
            json!({
                "textDocument": { "uri": uri, "version": version },
                "contentChanges": [{ "text": text }],
            }),
        )?;
        self.wait_for_operation()
    }

    fn goals(&self, uri: &Url, position: Position) -> Result<GoalAnswer, SessionError> {
        let answer = self.request(
            "proof/goals",
            json!({
                "textDocument": text_document_id(uri),
                "position": { "line": position.line, "character": position.character },
            }),
        )?;
        GoalAnswer::parse(&answer)
    }

    fn document(&self, uri: &Url) -> Result<FlecheDocument, SessionError> {
        let answer = self.request(
            "coq/getDocument",
            json!({ "textDocument": text_document_id(uri) }),
        )?;
        FlecheDocument::parse(&answer)
    }

    fn save_vo(&self, uri: &Url) -> Result<(), SessionError> {
        self.request(
            "coq/saveVo",
            json!({ "textDocument": text_document_id(uri) }),
        )?;
        Ok(())
    }

    fn diagnostics(&self, uri: &Url) -> Vec<Diagnostic> {
        self.state.diagnostics_for(uri)
    }

    fn shutdown(&self) {
        let _ = self.request("shutdown", json!({}));
        self.quit();
    }
}

impl Drop for CoqLspClient {
    fn drop(&mut self) {
        if !self.state.is_down() {
            self.quit();
        }
    }
}

/// Connects [`CoqLspClient`] sessions with a fixed configuration.
#[derive(Debug, Clone, Default)]
pub struct CoqLspFactory {
    pub options: ClientOptions,
}

impl CoqLspFactory {
    pub fn new(options: ClientOptions) -> Self {
        CoqLspFactory { options }
    }
}

impl SessionFactory for CoqLspFactory {
    fn connect(&self, root_uri: &Url) -> Result<Box<dyn CheckerSession>, SessionError> {
        Ok(Box::new(CoqLspClient::new(root_uri, &self.options)?))
    }
}
