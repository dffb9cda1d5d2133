//! The aux document: a scratch mirror for diagnostic queries.
//!
//! `Locate`/`Print`-style queries cannot be issued against the user's
//! document without perturbing it, so they go through a uniquely named
//! scratch file owned by its own checker session. Query directives are
//! appended one per line; after a synchronization, the checker's info
//! diagnostics carry the answers, and each is matched back to its query by
//! the directive text captured from the diagnostic's range and by the line
//! the directive landed on.
//!
//! The scratch file lives in the system temp directory and is removed on
//! drop, along with its checker session, on all exit paths.

use std::io::Write;

use lsp_types::Url;
use proofscope_lsp::{CheckerSession, LineIndex, SessionFactory};
use tempfile::NamedTempFile;

use crate::context::ContextStore;
use crate::error::{ProofFileError, Result};
use crate::segment::segment;
use crate::tracker::{classify, StepKind};

const LOCATE_DEFAULT_SUFFIX: &str = "(default interpretation)";

/// A scratch document mirroring the main document's semantic state.
pub struct AuxDoc {
    file: NamedTempFile,
    uri: Url,
    text: String,
    version: i32,
    opened: bool,
    closed: bool,
    session: Box<dyn CheckerSession>,
}

impl AuxDoc {
    /// Create the scratch file, seed it, and connect its checker session.
    ///
    /// The checker is not told about the document yet; the first
    /// [`AuxDoc::sync`] opens it.
    pub fn create(factory: &dyn SessionFactory, seed: &str) -> Result<AuxDoc> {
        let mut file = tempfile::Builder::new()
            .prefix("aux_")
            .suffix(".v")
            .tempfile()
            .map_err(proofscope_lsp::SessionError::from)?;
        file.write_all(seed.as_bytes())
            .map_err(proofscope_lsp::SessionError::from)?;
        let uri = Url::from_file_path(file.path()).map_err(|_| {
            ProofFileError::ServerQuit(proofscope_lsp::SessionError::Protocol(
                "scratch path is not absolute".to_string(),
            ))
        })?;
        let session = factory.connect(&uri)?;
        Ok(AuxDoc {
            file,
            uri,
            text: seed.to_string(),
            version: 1,
            opened: false,
            closed: false,
            session,
        })
    }

    /// Append to the mirror and the on-disk file without resynchronizing.
    pub fn append(&mut self, text: &str) {
        self.text.push_str(text);
        if let Err(err) = self.file.write_all(text.as_bytes()) {
            log::warn!("aux file write failed: {err}");
        }
    }

    /// Lines currently in the mirror; the next appended `\n…` directive
    /// lands on this 0-based line.
    pub fn line_count(&self) -> usize {
        self.text.bytes().filter(|&b| b == b'\n').count() + 1
    }

    /// Append a `Locate "pattern".` directive; returns the line its answer
    /// is expected on.
    pub fn plan_locate(&mut self, pattern: &str) -> usize {
        let line = self.line_count();
        self.append(&format!("\nLocate \"{pattern}\"."));
        line
    }

    /// Push the mirror to the checker and wait for processing.
    pub fn sync(&mut self) -> Result<()> {
        if self.opened {
            self.version += 1;
            self.session
                .did_change(&self.uri, self.version, &self.text)?;
        } else {
            self.session.did_open(&self.uri, &self.text)?;
            self.opened = true;
        }
        Ok(())
    }

    /// Find the answer to the directive `"{kind} {arg}."` expected at
    /// `line`.
    ///
    /// The directive text is recovered from each diagnostic by slicing the
    /// mirror at the diagnostic's range (inclusive end character) and
    /// trimming.
    pub fn query_answer(&self, kind: &str, arg: &str, line: usize) -> Option<String> {
        let expected = if arg.is_empty() {
            format!("{kind}.")
        } else {
            format!("{kind} {arg}.")
        };
        let index = LineIndex::new(&self.text);
        for diagnostic in self.session.diagnostics(&self.uri) {
            if diagnostic.range.start.line as usize != line {
                continue;
            }
            let (start, end) = index.byte_span(diagnostic.range, true);
            if start >= end || end > self.text.len() {
                continue;
            }
            if self.text[start..end].trim() == expected {
                return Some(diagnostic.message);
            }
        }
        None
    }

    /// Answer of a planned `Locate` query, disambiguated.
    ///
    /// When the checker lists several interpretations, the one suffixed
    /// `(default interpretation)` wins and the suffix is stripped.
    pub fn locate_answer(&self, pattern: &str, line: usize) -> Option<String> {
        let message = self.query_answer("Locate", &format!("\"{pattern}\""), line)?;
        let lines: Vec<&str> = message.split('\n').collect();
        let strip = |line: &str| {
            line.strip_suffix(LOCATE_DEFAULT_SUFFIX)
                .map(|rest| rest.trim_end().to_string())
        };
        if lines.len() > 1 {
            lines.iter().find_map(|l| strip(l))
        } else {
            Some(strip(lines[0]).unwrap_or_else(|| lines[0].to_string()))
        }
    }

    pub fn path(&self) -> &std::path::Path {
        self.file.path()
    }

    /// Shut the checker view down; the scratch file goes with the value.
    /// Idempotent, and also run on drop.
    pub fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.session.shutdown();
        }
    }
}

impl Drop for AuxDoc {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for AuxDoc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuxDoc")
            .field("path", &self.file.path())
            .field("version", &self.version)
            .field("lines", &self.line_count())
            .finish()
    }
}

/// Discover the prelude: every term of every transitively loaded library.
///
/// An aux mirror of the source gets a `Print Libraries.` directive whose
/// answer lists the loaded libraries; a `Locate Library` per library then
/// yields its compiled path, whose source file is harvested term by term.
/// Libraries that cannot be located or read are skipped.
pub fn discover_prelude(factory: &dyn SessionFactory, source: &str) -> Result<ContextStore> {
    let mut store = ContextStore::new();
    let mut aux = AuxDoc::create(factory, source)?;
    aux.append("\nPrint Libraries.");
    aux.sync()?;

    let last_line = aux.line_count() - 1;
    let Some(answer) = aux.query_answer("Print Libraries", "", last_line) else {
        return Ok(store);
    };
    let lines: Vec<&str> = answer.split('\n').collect();
    if lines.len() < 3 {
        return Ok(store);
    }
    // First and last lines are the header and trailer.
    let libraries: Vec<String> = lines[1..lines.len() - 1]
        .iter()
        .map(|l| l.trim().to_string())
        .filter(|l| !l.is_empty())
        .collect();

    for library in &libraries {
        aux.append(&format!("\nLocate Library {library}."));
    }
    aux.sync()?;

    for (i, library) in libraries.iter().enumerate() {
        let Some(answer) = aux.query_answer("Locate Library", library, last_line + 1 + i) else {
            log::warn!("library {library} could not be located");
            continue;
        };
        let Some(last) = answer.split('\n').next_back() else {
            continue;
        };
        // The compiled path ends in `.vo`; dropping the final byte points
        // at the source file.
        if last.len() < 2 || !last.is_char_boundary(last.len() - 1) {
            continue;
        }
        let source_path = &last[..last.len() - 1];
        match harvest_library(factory, source_path) {
            Ok(harvested) => store.merge(harvested),
            Err(err) => log::warn!("skipping library {library}: {err}"),
        }
    }
    Ok(store)
}

/// Segment one library file and harvest its declarations, without proof
/// tracking. `Local` declarations are dropped.
fn harvest_library(factory: &dyn SessionFactory, path: &str) -> Result<ContextStore> {
    let text =
        std::fs::read_to_string(path).map_err(proofscope_lsp::SessionError::from)?;
    let uri = Url::from_file_path(path).map_err(|_| {
        ProofFileError::ServerQuit(proofscope_lsp::SessionError::Protocol(format!(
            "library path {path} is not absolute"
        )))
    })?;
    let session = factory.connect(&uri)?;
    session.did_open(&uri, &text)?;
    let document = session.document(&uri)?;
    let segmentation = segment(&text, &document);

    enum Frame {
        Module(String),
        Section,
    }
    let mut frames: Vec<Frame> = Vec::new();
    let mut store = ContextStore::new();
    for step in &segmentation.steps {
        match classify(step) {
            StepKind::ModuleStart { name, .. } => frames.push(Frame::Module(name)),
            StepKind::SectionStart(_) => frames.push(Frame::Section),
            StepKind::SegmentEnd => {
                frames.pop();
            }
            _ => {
                let module_path: Vec<String> = frames
                    .iter()
                    .filter_map(|f| match f {
                        Frame::Module(name) => Some(name.clone()),
                        Frame::Section => None,
                    })
                    .collect();
                store.record_declaration(step.sentence(), &module_path, path, true);
            }
        }
    }
    session.shutdown();
    Ok(store)
}
