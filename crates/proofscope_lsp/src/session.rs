//! The capability seam between the engine and the checker.
//!
//! The engine only ever drives a [`CheckerSession`]; the production
//! implementation is [`crate::CoqLspClient`], and test suites substitute a
//! scripted one. A [`SessionFactory`] connects one session per document:
//! the main document and each aux document get their own checker view, and
//! operations within one session are strictly sequential.

use lsp_types::{Diagnostic, Position, Url};

use crate::error::SessionError;
use crate::types::{FlecheDocument, GoalAnswer};

/// A live view of one document at the checker.
pub trait CheckerSession {
    /// Open the document and block until the checker has processed it.
    fn did_open(&self, uri: &Url, text: &str) -> Result<(), SessionError>;

    /// Replace the document's full text and block until re-checked.
    fn did_change(&self, uri: &Url, version: i32, text: &str) -> Result<(), SessionError>;

    /// Proof goals visible at `position`, before the sentence that starts
    /// there has executed.
    fn goals(&self, uri: &Url, position: Position) -> Result<GoalAnswer, SessionError>;

    /// The checker's AST segmentation of the document.
    fn document(&self, uri: &Url) -> Result<FlecheDocument, SessionError>;

    /// Ask the checker to write the compiled artifact to disk.
    fn save_vo(&self, uri: &Url) -> Result<(), SessionError>;

    /// Latest pushed diagnostics for the document.
    fn diagnostics(&self, uri: &Url) -> Vec<Diagnostic>;

    /// Tear the session down. Idempotent; also invoked on drop by
    /// implementations that own a process.
    fn shutdown(&self);
}

/// Connects checker sessions.
pub trait SessionFactory {
    fn connect(&self, root_uri: &Url) -> Result<Box<dyn CheckerSession>, SessionError>;
}
