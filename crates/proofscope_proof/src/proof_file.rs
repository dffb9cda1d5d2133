//! The public `ProofFile` surface.
//!
//! A `ProofFile` owns one checker session for the document, one aux
//! document for diagnostic queries, the current segmentation, and the
//! tracker state over the executed prefix. Execution is explicit: `open`
//! segments the document and discovers the prelude, `run`/`exec` advance
//! (or retreat) through the steps, and the edit operations transform the
//! text transactionally. Validation happens against the checker *before*
//! any in-memory state changes, so a rejected edit only has to restore the
//! on-disk text and resynchronize.

use std::path::{Path, PathBuf};

use lsp_types::{Diagnostic, DiagnosticSeverity, Position, Url};
use proofscope_lsp::{CheckerSession, GoalAnswer, SessionError, SessionFactory};

use crate::aux_doc::{discover_prelude, AuxDoc};
use crate::context::{ContextStore, Term};
use crate::edit::{splice, ChangeOp};
use crate::error::{ProofFileError, Result};
use crate::resolver::{collect_plans, resolve_plans};
use crate::segment::{segment, Step};
use crate::tracker::{ProofEntry, Tracker};

/// Construction knobs.
#[derive(Debug, Clone, Default)]
pub struct ProofFileOptions {
    /// Workspace root the checker resolves libraries against; defaults to
    /// the document itself.
    pub workspace: Option<PathBuf>,
    /// When false, insertions and deletions outside any proof are rejected.
    pub external_changes: ExternalChanges,
}

/// Whether edits may touch steps outside proof regions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExternalChanges {
    #[default]
    Allow,
    Forbid,
}

/// Identifies one proof at call time: its position in the current
/// `proofs()` or `open_proofs()` list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProofHandle {
    Closed(usize),
    Open(usize),
}

/// One operation of a [`ProofFile::change_proof`] batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProofOp {
    /// Add a new last step to the proof.
    Append(String),
    /// Remove the proof's last step.
    Pop,
}

enum EditFlavor {
    Add,
    Delete,
    Batch,
}

/// An interactive, incremental view of one proof document.
pub struct ProofFile {
    path: PathBuf,
    uri: Url,
    source: String,
    steps: Vec<Step>,
    trailing: String,
    version: i32,
    steps_taken: usize,
    store: ContextStore,
    prelude: ContextStore,
    tracker: Tracker,
    aux: AuxDoc,
    session: Box<dyn CheckerSession>,
    factory: Box<dyn SessionFactory>,
    external_changes: ExternalChanges,
    closed: bool,
}

impl std::fmt::Debug for ProofFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProofFile")
            .field("path", &self.path)
            .field("uri", &self.uri)
            .field("version", &self.version)
            .field("steps_taken", &self.steps_taken)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl ProofFile {
    /// Open `path` at the checker, segment it, and discover the prelude.
    ///
    /// Fails with [`ProofFileError::InvalidFile`] if the initial document
    /// carries any error diagnostic.
    pub fn open(
        factory: Box<dyn SessionFactory>,
        path: &Path,
        options: ProofFileOptions,
    ) -> Result<ProofFile> {
        let source = std::fs::read_to_string(path).map_err(SessionError::from)?;
        let abs = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        let uri = Url::from_file_path(&abs).map_err(|_| {
            ProofFileError::InvalidFile(format!("path {} is not absolute", path.display()))
        })?;
        let root_uri = match &options.workspace {
            Some(workspace) => Url::from_directory_path(workspace).map_err(|_| {
                ProofFileError::InvalidFile(format!(
                    "workspace {} is not a directory path",
                    workspace.display()
                ))
            })?,
            None => uri.clone(),
        };

        let session = factory.connect(&root_uri)?;
        session.did_open(&uri, &source)?;
        if let Some(error) = first_error(&session.diagnostics(&uri)) {
            session.shutdown();
            return Err(ProofFileError::InvalidFile(format!(
                "{} has at least one error: {}",
                path.display(),
                error.message
            )));
        }

        let document = session.document(&uri)?;
        let segmentation = segment(&source, &document);
        let prelude = discover_prelude(factory.as_ref(), &source)?;
        let aux = AuxDoc::create(factory.as_ref(), "")?;

        Ok(ProofFile {
            path: abs,
            uri,
            source,
            steps: segmentation.steps,
            trailing: segmentation.trailing,
            version: 1,
            steps_taken: 0,
            store: prelude.clone(),
            prelude,
            tracker: Tracker::new(),
            aux,
            session,
            factory,
            external_changes: options.external_changes,
            closed: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn uri(&self) -> &Url {
        &self.uri
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn steps_taken(&self) -> usize {
        self.steps_taken
    }

    /// Whether the executed prefix sits inside an open proof.
    pub fn in_proof(&self) -> bool {
        self.tracker.in_proof()
    }

    /// Closed proofs in closing order, `Module Type` internals filtered.
    pub fn proofs(&self) -> Vec<&ProofEntry> {
        self.tracker.proofs()
    }

    /// Open proofs, newest first.
    pub fn open_proofs(&self) -> Vec<&ProofEntry> {
        self.tracker.open_proofs()
    }

    /// Alias of [`ProofFile::open_proofs`]: the proofs still lacking a
    /// terminator.
    pub fn unproven_proofs(&self) -> Vec<&ProofEntry> {
        self.open_proofs()
    }

    /// The `Program` definition a proof discharges an obligation of.
    pub fn program_of(&self, proof: &ProofEntry) -> Option<&Term> {
        self.tracker.program_term(proof)
    }

    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        self.session.diagnostics(&self.uri)
    }

    /// True iff the current document version has no error diagnostic.
    pub fn is_valid(&self) -> bool {
        first_error(&self.diagnostics()).is_none()
    }

    pub fn context(&self) -> &ContextStore {
        &self.store
    }

    /// Goals at the boundary after the last executed step.
    pub fn current_goals(&self) -> Result<GoalAnswer> {
        Ok(self.session.goals(&self.uri, self.boundary_position())?)
    }

    /// Ask the checker to write the compiled `.vo` artifact.
    pub fn save_vo(&self) -> Result<()> {
        Ok(self.session.save_vo(&self.uri)?)
    }

    /// Execute every remaining step.
    pub fn run(&mut self) -> Result<()> {
        self.advance(self.steps.len() - self.steps_taken)
    }

    /// Advance (`n > 0`) or retreat (`n < 0`) by `n` step boundaries.
    ///
    /// Retreating re-opens proofs whose terminators are stepped over;
    /// retreating past a theorem opener is rejected with `NotImplemented`
    /// before any state changes.
    pub fn exec(&mut self, n: i64) -> Result<()> {
        if n >= 0 {
            let remaining = self.steps.len() - self.steps_taken;
            self.advance((n as usize).min(remaining))
        } else {
            self.retreat(n.unsigned_abs() as usize)
        }
    }

    /// Insert `text` as a new step right after `prev_index`.
    pub fn add_step(&mut self, prev_index: usize, text: &str) -> Result<()> {
        self.apply_changes(&[ChangeOp::add(prev_index, text)], EditFlavor::Add)
    }

    /// Remove the step at `index`.
    pub fn delete_step(&mut self, index: usize) -> Result<()> {
        self.apply_changes(&[ChangeOp::delete(index)], EditFlavor::Delete)
    }

    /// Apply an ordered batch of operations atomically.
    pub fn change_steps(&mut self, ops: &[ChangeOp]) -> Result<()> {
        self.apply_changes(ops, EditFlavor::Batch)
    }

    /// Add a new last step to `proof` and execute it.
    pub fn append_step(&mut self, proof: ProofHandle, text: &str) -> Result<()> {
        self.change_proof(proof, &[ProofOp::Append(text.to_string())])
    }

    /// Remove the last step of `proof`.
    pub fn pop_step(&mut self, proof: ProofHandle) -> Result<()> {
        self.change_proof(proof, &[ProofOp::Pop])
    }

    /// Apply an ordered batch of pops and appends to one proof.
    pub fn change_proof(&mut self, proof: ProofHandle, ops: &[ProofOp]) -> Result<()> {
        let statement = self.statement_of(proof)?;
        for op in ops {
            let entry = self.tracker.entry_by_statement(statement).ok_or_else(|| {
                ProofFileError::InvalidChange("the proof no longer exists".to_string())
            })?;
            match op {
                ProofOp::Append(text) => {
                    let last = entry.steps.last().map(|s| s.index).unwrap_or(statement);
                    let op = ChangeOp::add(last, text.clone());
                    self.apply_changes(&[op], EditFlavor::Add)?;
                    // A step appended at the execution boundary still
                    // belongs to the proof; take it now.
                    if last + 1 >= self.steps_taken {
                        self.advance(last + 2 - self.steps_taken)?;
                    }
                }
                ProofOp::Pop => {
                    let last = entry.steps.last().map(|s| s.index).ok_or_else(|| {
                        ProofFileError::InvalidDelete("the proof has no steps to pop".to_string())
                    })?;
                    self.apply_changes(&[ChangeOp::delete(last)], EditFlavor::Delete)?;
                }
            }
        }
        Ok(())
    }

    /// Shut down the checker sessions. The scratch file of the aux
    /// document is removed with it.
    pub fn close(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if !self.closed {
            self.closed = true;
            self.aux.close();
            self.session.shutdown();
        }
    }

    fn boundary_position(&self) -> Position {
        if self.steps_taken == 0 {
            Position::new(0, 0)
        } else {
            self.steps[self.steps_taken - 1].range.end
        }
    }

    fn statement_of(&self, proof: ProofHandle) -> Result<usize> {
        let entry = match proof {
            ProofHandle::Closed(i) => self.tracker.proofs().get(i).copied(),
            ProofHandle::Open(i) => self.tracker.open_proofs().get(i).copied(),
        };
        entry.map(|e| e.statement_step).ok_or_else(|| {
            ProofFileError::InvalidChange("no proof at the given position".to_string())
        })
    }

    /// Execute the next `n` steps: classify, snapshot goals, plan and
    /// resolve references.
    fn advance(&mut self, n: usize) -> Result<()> {
        let file_path = self.path.to_string_lossy().into_owned();
        let mut pending: Vec<(usize, Vec<crate::resolver::Plan>)> = Vec::new();

        for _ in 0..n {
            let index = self.steps_taken;
            let Some(step) = self.steps.get(index).cloned() else {
                break;
            };
            let position = self.boundary_position();
            let module_path = self.tracker.module_path();

            self.aux.append(&step.text);

            let session = self.session.as_ref();
            let uri = &self.uri;
            let mut goals_fn =
                || -> Result<GoalAnswer> { Ok(session.goals(uri, position)?) };
            let needs_context = self.tracker.apply(
                index,
                &step,
                &mut self.store,
                &file_path,
                &mut goals_fn,
            )?;

            if needs_context {
                let plans = collect_plans(&step.ast, &self.store, &module_path, &mut |pattern| {
                    self.aux.plan_locate(pattern)
                });
                if !plans.is_empty() {
                    pending.push((index, plans));
                }
            }
            self.steps_taken += 1;
        }

        if !pending.is_empty() {
            self.aux.sync()?;
            for (index, plans) in pending {
                let terms = resolve_plans(&plans, &self.store, &|pattern, line| {
                    self.aux.locate_answer(pattern, line)
                });
                self.tracker.assign_context(index, terms);
            }
        }
        Ok(())
    }

    fn retreat(&mut self, n: usize) -> Result<()> {
        self.tracker.can_retreat(n)?;
        for _ in 0..n {
            self.tracker.retreat_one(&mut self.store);
            self.steps_taken -= 1;
        }
        Ok(())
    }

    /// The transactional core shared by every edit operation.
    fn apply_changes(&mut self, ops: &[ChangeOp], flavor: EditFlavor) -> Result<()> {
        if !self.is_valid() {
            return Err(ProofFileError::InvalidFile(
                "cannot edit a document with errors".to_string(),
            ));
        }
        self.check_edit_policy(ops)?;

        let old_texts: Vec<String> = self.steps.iter().map(|s| s.text.clone()).collect();
        let spliced = splice(
            old_texts,
            self.steps_taken,
            ops,
            self.trailing.is_empty(),
        )
        .map_err(|err| flavored(err, &flavor))?;
        let mut target: String = spliced.texts.concat();
        target.push_str(&self.trailing);

        let old_errors = error_signature(&self.session.diagnostics(&self.uri));
        let snapshot = self.source.clone();

        // Write through and resynchronize.
        self.version += 1;
        std::fs::write(&self.path, &target).map_err(SessionError::from)?;
        self.session.did_change(&self.uri, self.version, &target)?;

        match self.validate_edit(&target, &spliced.texts, &old_errors, &flavor) {
            Ok(segmentation) => {
                // Commit: re-derive everything over the new text.
                self.source = target;
                self.steps = segmentation.steps;
                self.trailing = segmentation.trailing;
                self.rederive(spliced.steps_taken)
            }
            Err(err) => {
                // Restore the snapshot byte-for-byte and resynchronize; the
                // in-memory state was never touched.
                self.version += 1;
                if let Err(io) = std::fs::write(&self.path, &snapshot) {
                    log::error!("rollback write failed: {io}");
                }
                self.session
                    .did_change(&self.uri, self.version, &snapshot)?;
                Err(err)
            }
        }
    }

    fn validate_edit(
        &self,
        target: &str,
        expected: &[String],
        old_errors: &std::collections::BTreeSet<String>,
        flavor: &EditFlavor,
    ) -> Result<crate::segment::Segmentation> {
        let new_errors = error_signature(&self.session.diagnostics(&self.uri));
        if let Some(introduced) = new_errors.difference(old_errors).next() {
            return Err(flavored(
                ProofFileError::InvalidAdd(format!("the edit introduces an error: {introduced}")),
                flavor,
            ));
        }

        let document = self.session.document(&self.uri)?;
        let segmentation = segment(target, &document);
        if segmentation.steps.len() > expected.len() {
            return Err(flavored(
                ProofFileError::InvalidStep(format!(
                    "the inserted text is {} steps, not one",
                    segmentation.steps.len() - expected.len() + 1
                )),
                flavor,
            ));
        }
        if segmentation.steps.len() < expected.len() {
            return Err(flavored(
                ProofFileError::InvalidAdd(
                    "the edit absorbs characters from a neighbouring step".to_string(),
                ),
                flavor,
            ));
        }
        for (derived, expected) in segmentation.steps.iter().zip(expected) {
            if derived.text != *expected {
                return Err(flavored(
                    ProofFileError::InvalidAdd(format!(
                        "the edit modifies a neighbouring step: expected {expected:?}, got {:?}",
                        derived.text
                    )),
                    flavor,
                ));
            }
        }
        Ok(segmentation)
    }

    fn check_edit_policy(&self, ops: &[ChangeOp]) -> Result<()> {
        if self.external_changes == ExternalChanges::Allow {
            return Ok(());
        }
        for op in ops {
            match op {
                ChangeOp::Add { prev_index, .. } => {
                    if !self.tracker.index_in_proof(*prev_index) {
                        return Err(ProofFileError::InvalidAdd(
                            "insertion outside of any proof".to_string(),
                        ));
                    }
                }
                ChangeOp::Delete { index } => {
                    if !self.tracker.index_in_proof(*index) {
                        return Err(ProofFileError::InvalidDelete(
                            "deletion outside of any proof".to_string(),
                        ));
                    }
                }
            }
        }
        Ok(())
    }

    /// Rebuild tracker state, goals and contexts from scratch up to
    /// `steps_taken` steps. The aux document starts over as well.
    fn rederive(&mut self, steps_taken: usize) -> Result<()> {
        self.store = self.prelude.clone();
        self.tracker = Tracker::new();
        self.steps_taken = 0;
        self.aux.close();
        self.aux = AuxDoc::create(self.factory.as_ref(), "")?;
        self.advance(steps_taken)
    }
}

impl Drop for ProofFile {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn first_error(diagnostics: &[Diagnostic]) -> Option<&Diagnostic> {
    diagnostics
        .iter()
        .find(|d| d.severity == Some(DiagnosticSeverity::ERROR))
}

/// Order-independent signature of the error diagnostics.
fn error_signature(diagnostics: &[Diagnostic]) -> std::collections::BTreeSet<String> {
    diagnostics
        .iter()
        .filter(|d| d.severity == Some(DiagnosticSeverity::ERROR))
        .map(|d| {
            format!(
                "{}:{}-{}:{} {}",
                d.range.start.line,
                d.range.start.character,
                d.range.end.line,
                d.range.end.character,
                d.message
            )
        })
        .collect()
}

fn flavored(err: ProofFileError, flavor: &EditFlavor) -> ProofFileError {
    match (flavor, err) {
        (EditFlavor::Batch, err) => ProofFileError::InvalidChange(err.to_string()),
        (EditFlavor::Delete, ProofFileError::InvalidAdd(why)) => {
            ProofFileError::InvalidDelete(why)
        }
        (EditFlavor::Add, ProofFileError::InvalidDelete(why)) => ProofFileError::InvalidAdd(why),
        (_, err) => err,
    }
}
