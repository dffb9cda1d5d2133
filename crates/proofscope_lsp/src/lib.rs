//! # proofscope-lsp
//!
//! Blocking client for the `coq-lsp` checker process.
//!
//! This crate owns everything between the engine and the external checker:
//!
//! - [`CoqLspClient`]: spawns `coq-lsp`, performs the `initialize` handshake
//!   and exposes the blocking request surface the engine consumes
//! - [`CheckerSession`]/[`SessionFactory`]: the capability seam; the engine
//!   never talks to a process directly, only through these traits
//! - [`transport`]: Content-Length framed JSON-RPC over arbitrary streams
//! - [`types`]: payloads of the custom `proof/goals`, `coq/getDocument` and
//!   `coq/saveVo` methods
//! - [`LineIndex`]: byte ↔ UTF-16 position mapping (the protocol counts
//!   columns in UTF-16 code units, our strings are UTF-8)
//!
//! All calls are synchronous: a reader thread drains the checker's stdout
//! into a diagnostics store while the caller's thread blocks, polling in
//! ≈100 ms increments until the checker signals completion or a per-call
//! timeout elapses. On timeout the client shuts the checker down and the
//! session is dead; callers must construct a new one.

pub mod client;
pub mod endpoint;
pub mod error;
pub mod line_index;
pub mod session;
pub mod transport;
pub mod types;

pub use client::{ClientOptions, CoqLspClient, CoqLspFactory};
pub use error::SessionError;
pub use line_index::LineIndex;
pub use session::{CheckerSession, SessionFactory};
pub use types::{
    FlecheDocument, Goal, GoalAnswer, GoalConfig, GoalStackLevel, Hyp, InitOptions, Message,
    RangedSpan,
};

pub use lsp_types;
