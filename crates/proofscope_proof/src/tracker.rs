//! Proof tracking over the step sequence.
//!
//! The tracker folds over steps in textual order, classifying each one and
//! maintaining the open-proof stack, the module/section frames, and the
//! pending `Program` definitions whose obligations still need discharging.
//! Every applied step leaves an undo record, so `exec(-n)` can retreat by
//! reversing effects most recent first, with one exception: stepping
//! backwards over a theorem opener would leave the proof region entirely,
//! which is rejected before anything is mutated.

use std::collections::HashMap;

use lsp_types::Range;
use proofscope_lsp::GoalAnswer;

use crate::ast::AstNode;
use crate::context::{normalize, ContextStore, StoreUndo, Term, TermKind};
use crate::error::{ProofFileError, Result};
use crate::segment::Step;

/// One step attributed to a proof, with the goals visible before it ran.
#[derive(Debug, Clone)]
pub struct ProofStep {
    /// Index in the document's step sequence at derivation time.
    pub index: usize,
    pub text: String,
    pub range: Range,
    pub ast: AstNode,
    pub goals: GoalAnswer,
    /// Terms this step references, deduplicated in first-seen order.
    pub context: Vec<Term>,
}

/// A proof: its statement term and the steps of its (possibly unfinished)
/// script.
#[derive(Debug, Clone)]
pub struct ProofEntry {
    pub term: Term,
    /// Step index of the statement.
    pub statement_step: usize,
    pub steps: Vec<ProofStep>,
    /// Back-reference to the `Program` definition this proof discharges an
    /// obligation of; resolved lazily via [`Tracker::program_term`].
    pub program_step: Option<usize>,
    /// Proofs inside `Module Type` are tracked but filtered from the
    /// exported lists: they cannot be used and are meant to be overridden.
    pub exportable: bool,
    /// Terms the statement references.
    pub context: Vec<Term>,
}

impl ProofEntry {
    /// The statement sentence, whitespace-normalized.
    pub fn text(&self) -> &str {
        &self.term.text
    }
}

/// Classification of one step, per its AST tag with a sentence fallback.
#[derive(Debug, Clone, PartialEq)]
pub enum StepKind {
    /// Opens a proof: theorem family, `Goal`, or a body-less definition.
    Opener(TermKind),
    /// `Proof.` and its `with`/`using` variants.
    ProofCommand,
    /// `Qed.`, `Defined.`, `Admitted.`, `Abort.`, `Save x.`
    Terminator,
    /// `Next Obligation` / `Obligation N`, optionally `of <program>`.
    Obligation(Option<String>),
    /// A `Program` definition with a body; its obligations follow later.
    ProgramDecl(String),
    ModuleStart { name: String, module_type: bool },
    SectionStart(String),
    SegmentEnd,
    Plain,
}

#[derive(Debug, Clone)]
enum SegmentFrame {
    Module(String),
    ModuleType(String),
    Section { locals_mark: usize },
}

#[derive(Debug, Clone)]
enum Structural {
    None,
    Opened,
    Appended,
    /// Appended the terminator step and moved the proof to the closed list.
    Closed,
    SegmentPushed,
    SegmentPopped {
        frame: SegmentFrame,
        drained_locals: Vec<Term>,
    },
}

#[derive(Debug)]
struct StepEffect {
    structural: Structural,
    store_undos: Vec<StoreUndo>,
    program_pushed: bool,
}

#[derive(Debug, Clone)]
struct ProgramRec {
    name: String,
    step: usize,
    term: Term,
}

/// Fold state over the executed prefix of the step sequence.
#[derive(Debug, Default)]
pub struct Tracker {
    closed: Vec<ProofEntry>,
    /// Stack of open proofs, newest last.
    open: Vec<ProofEntry>,
    segments: Vec<SegmentFrame>,
    programs: Vec<ProgramRec>,
    program_contexts: HashMap<usize, Vec<Term>>,
    effects: Vec<StepEffect>,
}

impl Tracker {
    pub fn new() -> Self {
        Tracker::default()
    }

    /// Steps applied so far.
    pub fn steps_applied(&self) -> usize {
        self.effects.len()
    }

    /// Closed, exportable proofs in closing order.
    pub fn proofs(&self) -> Vec<&ProofEntry> {
        self.closed.iter().filter(|p| p.exportable).collect()
    }

    /// Open proofs, newest first.
    pub fn open_proofs(&self) -> Vec<&ProofEntry> {
        self.open.iter().rev().filter(|p| p.exportable).collect()
    }

    pub fn in_proof(&self) -> bool {
        !self.open.is_empty()
    }

    /// Module path currently in scope (sections contribute no name).
    pub fn module_path(&self) -> Vec<String> {
        self.segments
            .iter()
            .filter_map(|frame| match frame {
                SegmentFrame::Module(name) | SegmentFrame::ModuleType(name) => {
                    Some(name.clone())
                }
                SegmentFrame::Section { .. } => None,
            })
            .collect()
    }

    fn in_module_type(&self) -> bool {
        self.segments
            .iter()
            .any(|frame| matches!(frame, SegmentFrame::ModuleType(_)))
    }

    /// Find the proof whose statement sits at step `statement`, open or
    /// closed.
    pub fn entry_by_statement(&self, statement: usize) -> Option<&ProofEntry> {
        self.open
            .iter()
            .chain(self.closed.iter())
            .find(|entry| entry.statement_step == statement)
    }

    /// Whether step `index` is a proof statement or part of a proof script.
    pub fn index_in_proof(&self, index: usize) -> bool {
        self.open.iter().chain(self.closed.iter()).any(|entry| {
            entry.statement_step == index || entry.steps.iter().any(|s| s.index == index)
        })
    }

    /// The `Program` definition term a proof discharges, if any.
    pub fn program_term(&self, entry: &ProofEntry) -> Option<&Term> {
        let step = entry.program_step?;
        self.programs.iter().find(|p| p.step == step).map(|p| &p.term)
    }

    fn find_program(&self, name: Option<&str>) -> Option<usize> {
        match name {
            Some(name) => self
                .programs
                .iter()
                .rev()
                .find(|p| p.name == name)
                .map(|p| p.step),
            None => self.programs.last().map(|p| p.step),
        }
    }

    /// Apply one step. `goals` is invoked only when the step joins a proof
    /// script. Returns whether the step's references should be resolved.
    pub fn apply(
        &mut self,
        index: usize,
        step: &Step,
        store: &mut ContextStore,
        file_path: &str,
        goals: &mut dyn FnMut() -> Result<GoalAnswer>,
    ) -> Result<bool> {
        let sentence = step.sentence();
        let module_path = self.module_path();
        let mut effect = StepEffect {
            structural: Structural::None,
            store_undos: Vec::new(),
            program_pushed: false,
        };
        let mut needs_context = false;

        match classify(step) {
            StepKind::Opener(kind) => {
                effect.store_undos =
                    store.record_declaration(sentence, &module_path, file_path, false);
                let exportable = !self.in_module_type();
                self.open.push(ProofEntry {
                    term: Term {
                        text: normalize(sentence),
                        kind,
                        module_path,
                        file_path: file_path.to_string(),
                    },
                    statement_step: index,
                    steps: Vec::new(),
                    program_step: None,
                    exportable,
                    context: Vec::new(),
                });
                effect.structural = Structural::Opened;
                needs_context = true;
            }
            StepKind::Obligation(program) => {
                let program_step = self.find_program(program.as_deref());
                let context = program_step
                    .and_then(|s| self.program_contexts.get(&s))
                    .cloned()
                    .unwrap_or_default();
                let exportable = !self.in_module_type();
                self.open.push(ProofEntry {
                    term: Term {
                        text: normalize(sentence),
                        kind: TermKind::Other,
                        module_path,
                        file_path: file_path.to_string(),
                    },
                    statement_step: index,
                    steps: Vec::new(),
                    program_step,
                    exportable,
                    context,
                });
                effect.structural = Structural::Opened;
            }
            StepKind::ProgramDecl(name) => {
                effect.store_undos =
                    store.record_declaration(sentence, &module_path, file_path, false);
                self.programs.push(ProgramRec {
                    name,
                    step: index,
                    term: Term {
                        text: normalize(sentence),
                        kind: TermKind::Definition,
                        module_path,
                        file_path: file_path.to_string(),
                    },
                });
                effect.program_pushed = true;
                needs_context = true;
            }
            StepKind::Terminator => {
                if let Some(mut entry) = self.open.pop() {
                    entry.steps.push(ProofStep {
                        index,
                        text: step.text.clone(),
                        range: step.range,
                        ast: step.ast.clone(),
                        goals: goals()?,
                        context: Vec::new(),
                    });
                    self.closed.push(entry);
                    effect.structural = Structural::Closed;
                    needs_context = true;
                } else {
                    log::warn!("terminator with no open proof at step {index}");
                }
            }
            StepKind::ProofCommand => {
                needs_context = self.append_proof_step(index, step, goals, &mut effect)?;
            }
            StepKind::ModuleStart { name, module_type } => {
                self.segments.push(if module_type {
                    SegmentFrame::ModuleType(name)
                } else {
                    SegmentFrame::Module(name)
                });
                effect.structural = Structural::SegmentPushed;
            }
            StepKind::SectionStart(_) => {
                self.segments.push(SegmentFrame::Section {
                    locals_mark: store.local_count(),
                });
                effect.structural = Structural::SegmentPushed;
            }
            StepKind::SegmentEnd => {
                if let Some(frame) = self.segments.pop() {
                    let drained_locals = match frame {
                        SegmentFrame::Section { locals_mark } => store.drain_locals(locals_mark),
                        _ => Vec::new(),
                    };
                    effect.structural = Structural::SegmentPopped {
                        frame,
                        drained_locals,
                    };
                } else {
                    log::warn!("segment end with no open segment at step {index}");
                }
            }
            StepKind::Plain => {
                effect.store_undos =
                    store.record_declaration(sentence, &module_path, file_path, false);
                needs_context = self.append_proof_step(index, step, goals, &mut effect)?;
            }
        }

        self.effects.push(effect);
        Ok(needs_context)
    }

    fn append_proof_step(
        &mut self,
        index: usize,
        step: &Step,
        goals: &mut dyn FnMut() -> Result<GoalAnswer>,
        effect: &mut StepEffect,
    ) -> Result<bool> {
        let Some(entry) = self.open.last_mut() else {
            return Ok(false);
        };
        entry.steps.push(ProofStep {
            index,
            text: step.text.clone(),
            range: step.range,
            ast: step.ast.clone(),
            goals: goals()?,
            context: Vec::new(),
        });
        effect.structural = Structural::Appended;
        Ok(true)
    }

    /// Whether the most recent `n` steps can be retreated over.
    pub fn can_retreat(&self, n: usize) -> Result<()> {
        if n > self.effects.len() {
            return Err(ProofFileError::NotImplemented(
                "stepping back past the start of the document".to_string(),
            ));
        }
        let crosses_opener = self.effects[self.effects.len() - n..]
            .iter()
            .any(|e| matches!(e.structural, Structural::Opened));
        if crosses_opener {
            return Err(ProofFileError::NotImplemented(
                "stepping back out of a proof".to_string(),
            ));
        }
        Ok(())
    }

    /// Reverse the most recent step's effects. Callers check
    /// [`Tracker::can_retreat`] first; retreating over an opener here is a
    /// logic error.
    pub fn retreat_one(&mut self, store: &mut ContextStore) {
        let Some(effect) = self.effects.pop() else {
            return;
        };
        match effect.structural {
            Structural::None => {}
            Structural::Opened => {
                // Guarded by can_retreat; drop the opened proof if reached.
                self.open.pop();
            }
            Structural::Appended => {
                if let Some(entry) = self.open.last_mut() {
                    entry.steps.pop();
                }
            }
            Structural::Closed => {
                if let Some(mut entry) = self.closed.pop() {
                    entry.steps.pop();
                    self.open.push(entry);
                }
            }
            Structural::SegmentPushed => {
                self.segments.pop();
            }
            Structural::SegmentPopped {
                frame,
                drained_locals,
            } => {
                store.restore_locals(drained_locals);
                self.segments.push(frame);
            }
        }
        for undo in effect.store_undos.into_iter().rev() {
            store.undo(undo);
        }
        if effect.program_pushed {
            self.programs.pop();
        }
    }

    /// Attach resolved references to the step (or statement) at `index`.
    pub fn assign_context(&mut self, index: usize, terms: Vec<Term>) {
        if self.programs.iter().any(|p| p.step == index) {
            for entry in self.open.iter_mut().chain(self.closed.iter_mut()) {
                if entry.program_step == Some(index) && entry.context.is_empty() {
                    entry.context = terms.clone();
                }
            }
            self.program_contexts.insert(index, terms);
            return;
        }
        for entry in self.open.iter_mut().chain(self.closed.iter_mut()) {
            if entry.statement_step == index && entry.program_step.is_none() {
                entry.context = terms;
                return;
            }
            if let Some(step) = entry.steps.iter_mut().find(|s| s.index == index) {
                step.context = terms;
                return;
            }
        }
    }
}

/// Classify a step by its AST tag, falling back to the sentence text for
/// shapes the tag does not discriminate.
pub fn classify(step: &Step) -> StepKind {
    match step.ast.vernac_tag() {
        Some("VernacProof") => return StepKind::ProofCommand,
        Some("VernacEndProof") | Some("VernacAbort") => return StepKind::Terminator,
        Some("VernacBeginSection") => {
            if let Some(name) = last_identifier(step.sentence()) {
                return StepKind::SectionStart(name);
            }
        }
        Some("VernacEndSegment") => return StepKind::SegmentEnd,
        _ => {}
    }
    classify_sentence(step.sentence())
}

fn classify_sentence(sentence: &str) -> StepKind {
    let trimmed = sentence.trim();
    let (stripped, flags) = strip_head_modifiers(trimmed);
    let mut words = stripped.split_whitespace();
    let Some(first) = words.next() else {
        return StepKind::Plain;
    };
    let first = first.trim_end_matches('.');

    match first {
        "Proof" => StepKind::ProofCommand,
        "Qed" | "Defined" | "Admitted" | "Abort" | "Save" => StepKind::Terminator,
        "Next" => match words.next().map(|w| w.trim_end_matches('.')) {
            Some("Obligation") => StepKind::Obligation(obligation_target(stripped)),
            _ => StepKind::Plain,
        },
        "Obligation" => StepKind::Obligation(obligation_target(stripped)),
        "Goal" => StepKind::Opener(TermKind::Other),
        "Theorem" => StepKind::Opener(TermKind::Theorem),
        "Lemma" => StepKind::Opener(TermKind::Lemma),
        "Remark" => StepKind::Opener(TermKind::Remark),
        "Fact" => StepKind::Opener(TermKind::Fact),
        "Corollary" => StepKind::Opener(TermKind::Corollary),
        "Proposition" => StepKind::Opener(TermKind::Proposition),
        "Property" => StepKind::Opener(TermKind::Property),
        "Definition" | "Example" | "Fixpoint" | "CoFixpoint" | "Instance" | "Let" => {
            let kind = match first {
                "Definition" | "Example" => TermKind::Definition,
                "Fixpoint" | "CoFixpoint" => TermKind::Fixpoint,
                "Instance" => TermKind::Instance,
                _ => TermKind::Local,
            };
            let has_body = stripped.contains(":=");
            if flags.program && has_body {
                match first_name(stripped) {
                    Some(name) => StepKind::ProgramDecl(name),
                    None => StepKind::Plain,
                }
            } else if !has_body || flags.refine {
                StepKind::Opener(kind)
            } else {
                StepKind::Plain
            }
        }
        "Module" => {
            let mut rest = words.peekable();
            let mut module_type = false;
            let name = loop {
                match rest.next().map(|w| w.trim_end_matches('.')) {
                    Some("Type") => module_type = true,
                    Some("Import") | Some("Export") => {}
                    Some(name) => break Some(name.to_string()),
                    None => break None,
                }
            };
            match name {
                // A module alias (`Module M := N.`) opens no scope.
                Some(name) if !trimmed.contains(":=") => StepKind::ModuleStart {
                    name,
                    module_type,
                },
                _ => StepKind::Plain,
            }
        }
        "Section" => match words.next().map(|w| w.trim_end_matches('.')) {
            Some(name) => StepKind::SectionStart(name.to_string()),
            None => StepKind::Plain,
        },
        "End" => StepKind::SegmentEnd,
        _ => StepKind::Plain,
    }
}

#[derive(Default)]
struct HeadFlags {
    program: bool,
    refine: bool,
}

fn strip_head_modifiers(sentence: &str) -> (&str, HeadFlags) {
    let mut rest = sentence;
    let mut flags = HeadFlags::default();
    loop {
        rest = rest.trim_start();
        if rest.starts_with("#[") {
            let Some(close) = rest.find(']') else {
                return (rest, flags);
            };
            let attr = &rest[2..close];
            if attr.contains("program") {
                flags.program = true;
            }
            if attr.contains("refine") {
                flags.refine = true;
            }
            rest = &rest[close + 1..];
            continue;
        }
        let mut advanced = false;
        for modifier in ["Local", "Global", "Program", "Polymorphic", "Monomorphic"] {
            if let Some(tail) = rest.strip_prefix(modifier) {
                if tail.starts_with(char::is_whitespace) {
                    if modifier == "Program" {
                        flags.program = true;
                    }
                    rest = tail;
                    advanced = true;
                    break;
                }
            }
        }
        if !advanced {
            return (rest.trim_start(), flags);
        }
    }
}

/// `Obligation 2 of id …` / `Next Obligation of id …` → `id`.
fn obligation_target(sentence: &str) -> Option<String> {
    let mut words = sentence.split_whitespace().peekable();
    while let Some(word) = words.next() {
        if word == "of" {
            return words
                .next()
                .map(|name| name.trim_end_matches(['.', ':']).to_string());
        }
        // Stop before tactic or type annotations.
        if word == "with" || word == ":" {
            break;
        }
    }
    None
}

fn first_name(sentence: &str) -> Option<String> {
    let mut words = sentence.split_whitespace();
    words.next()?;
    words
        .next()
        .map(|w| w.trim_end_matches(['.', ':', '(']).to_string())
}

fn last_identifier(sentence: &str) -> Option<String> {
    sentence
        .trim_end()
        .trim_end_matches('.')
        .split_whitespace()
        .last()
        .map(|s| s.to_string())
}
