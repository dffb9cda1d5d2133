//! # proofscope-proof
//!
//! An interactive, incremental, edit-aware view over a Coq source file, as
//! checked by an external `coq-lsp` process.
//!
//! The engine is built from three coupled subsystems over one
//! [`CheckerSession`](proofscope_lsp::CheckerSession):
//!
//! | Subsystem | Module | Role |
//! |-----------|--------|------|
//! | Document model | [`segment`] | the file as an ordered sequence of steps whose texts concatenate back to the document |
//! | Proof tracking | [`tracker`] | step classification, the open-proof stack, proof/obligation grouping |
//! | Context resolution | [`context`], [`resolver`], [`aux_doc`] | every referenced identifier and notation, resolved to its defining term |
//!
//! On top sits the transactional edit engine ([`edit`] plus the
//! [`ProofFile`] facade): edits splice the step-text list into a new
//! document, resynchronize the checker, validate, and roll back to the
//! byte-exact prior state when the result would not check.
//!
//! # Example
//!
//! ```no_run
//! use proofscope_lsp::{ClientOptions, CoqLspFactory};
//! use proofscope_proof::{ProofFile, ProofFileOptions};
//!
//! # fn main() -> Result<(), proofscope_proof::ProofFileError> {
//! let factory = Box::new(CoqLspFactory::new(ClientOptions::default()));
//! let path = std::path::Path::new("theories/nat.v");
//! let mut file = ProofFile::open(factory, path, ProofFileOptions::default())?;
//! file.run()?;
//! for proof in file.proofs() {
//!     println!("{} ({} steps)", proof.text(), proof.steps.len());
//! }
//! file.add_step(6, "\n  intros n.")?;
//! # Ok(())
//! # }
//! ```

pub mod ast;
pub mod aux_doc;
pub mod context;
pub mod edit;
pub mod error;
pub mod proof_file;
pub mod resolver;
pub mod segment;
pub mod tracker;

pub use ast::AstNode;
pub use aux_doc::AuxDoc;
pub use context::{ContextStore, Term, TermKind};
pub use edit::ChangeOp;
pub use error::ProofFileError;
pub use proof_file::{ExternalChanges, ProofFile, ProofFileOptions, ProofHandle, ProofOp};
pub use segment::Step;
pub use tracker::{ProofEntry, ProofStep};
