//! Failure kinds of the proof-document engine.
//!
//! Every edit error is raised only after the pre-edit source text and
//! checker state have been restored; resolution errors from the aux
//! document are not surfaced here at all; they degrade the affected step
//! to an empty context instead.

use std::fmt;

use proofscope_lsp::SessionError;

/// Errors surfaced by [`crate::ProofFile`] operations.
#[derive(Debug)]
pub enum ProofFileError {
    /// The checker died or exceeded its timeout. Fatal: the file handle is
    /// unusable and a new one must be constructed.
    ServerQuit(SessionError),
    /// The document already carries an error diagnostic at construction.
    InvalidFile(String),
    /// A proposed step text is not exactly one syntactically valid step.
    InvalidStep(String),
    /// An insertion would break checking or modify a neighbouring step.
    InvalidAdd(String),
    /// A deletion would remove a step the rest of the document needs.
    InvalidDelete(String),
    /// A batch of changes failed as a whole.
    InvalidChange(String),
    /// No notation with this pattern and scope is known.
    NotationNotFound { notation: String, scope: String },
    /// The operation is outside the supported domain.
    NotImplemented(String),
}

impl fmt::Display for ProofFileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProofFileError::ServerQuit(err) => write!(f, "{err}"),
            ProofFileError::InvalidFile(why) => write!(f, "invalid file: {why}"),
            ProofFileError::InvalidStep(why) => write!(f, "invalid step: {why}"),
            ProofFileError::InvalidAdd(why) => write!(f, "invalid add: {why}"),
            ProofFileError::InvalidDelete(why) => write!(f, "invalid delete: {why}"),
            ProofFileError::InvalidChange(why) => write!(f, "invalid change: {why}"),
            ProofFileError::NotationNotFound { notation, scope } => {
                if scope.is_empty() {
                    write!(f, "notation \"{notation}\" not found")
                } else {
                    write!(f, "notation \"{notation}\" not found in scope {scope}")
                }
            }
            ProofFileError::NotImplemented(what) => write!(f, "not implemented: {what}"),
        }
    }
}

impl std::error::Error for ProofFileError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ProofFileError::ServerQuit(err) => Some(err),
            _ => None,
        }
    }
}

impl From<SessionError> for ProofFileError {
    fn from(err: SessionError) -> Self {
        ProofFileError::ServerQuit(err)
    }
}

/// Alias used throughout the engine.
pub type Result<T> = std::result::Result<T, ProofFileError>;
