//! Failure modes of a checker session.

use std::fmt;

/// Errors surfaced by the client and transport layers.
///
/// `ServerQuit` is fatal to the session that produced it: the checker
/// process has exited, timed out, or been shut down, and no further calls
/// will succeed.
#[derive(Debug)]
pub enum SessionError {
    /// The checker died, timed out, or was shut down mid-operation.
    ServerQuit(String),
    /// A stream error while talking to the checker process.
    Io(std::io::Error),
    /// The checker sent something we could not decode, or answered a
    /// request with an error.
    Protocol(String),
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::ServerQuit(why) => write!(f, "checker quit: {why}"),
            SessionError::Io(err) => write!(f, "checker i/o error: {err}"),
            SessionError::Protocol(why) => write!(f, "protocol error: {why}"),
        }
    }
}

impl std::error::Error for SessionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SessionError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for SessionError {
    fn from(err: std::io::Error) -> Self {
        SessionError::Io(err)
    }
}

impl From<serde_json::Error> for SessionError {
    fn from(err: serde_json::Error) -> Self {
        SessionError::Protocol(err.to_string())
    }
}
