//! A scripted checker session for driving the engine hermetically.
//!
//! The fake understands just enough of the proof language to play the
//! checker's part: it splits a document into sentences, tracks a stack of
//! open proofs with their goals, reports errors for unknown references and
//! incomplete `Qed`s, answers `Print Libraries.`/`Locate` directives from
//! its configuration, and serves AST spans whose reference payloads are
//! configured per sentence.

// Each test binary uses a subset of the helpers.
#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::rc::Rc;

use lsp_types::{Diagnostic, DiagnosticSeverity, Position, Range, Url};
use proofscope_lsp::{
    CheckerSession, FlecheDocument, Goal, GoalAnswer, GoalConfig, LineIndex, RangedSpan,
    SessionError, SessionFactory,
};
use serde_json::{json, Value};

pub fn norm(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Tactics that discharge the current goal without configuration.
const DEFAULT_CLOSERS: &[&str] = &[
    "reflexivity.",
    "exact I.",
    "auto.",
    "assumption.",
    "reduce_eq.",
    "dummy_tactic n e.",
    "simpl; reflexivity.",
];

#[derive(Default)]
pub struct FakeConfig {
    /// Opener sentence (normalized) → pretty goal type. Unconfigured
    /// openers derive the type from their statement.
    pub goal_types: HashMap<String, String>,
    /// Tactic sentence (normalized) → goals after it runs.
    pub tactic_goals: HashMap<String, Vec<Goal>>,
    /// Extra goal-discharging tactics, on top of the defaults.
    pub closers: HashSet<String>,
    /// Tokens that make any sentence containing them an error.
    pub unknown_tokens: HashSet<String>,
    /// Normalized sentences that fail outright.
    pub failing: HashSet<String>,
    /// `Locate "pattern".` answers.
    pub locate_answers: HashMap<String, String>,
    /// Normalized sentence → qualids its AST references.
    pub references: HashMap<String, Vec<String>>,
    /// Normalized sentence → notation patterns its AST uses.
    pub sentence_notations: HashMap<String, Vec<String>>,
    /// Loaded libraries: name and path of the library's source file.
    pub libraries: Vec<(String, PathBuf)>,
}

#[derive(Default)]
pub struct FakeWorld {
    pub config: FakeConfig,
    docs: HashMap<Url, DocState>,
    pub saved_vo: Vec<Url>,
    pub shutdowns: usize,
}

struct DocState {
    text: String,
    version: i32,
    diagnostics: Vec<Diagnostic>,
}

/// Connects scripted sessions sharing one [`FakeWorld`].
#[derive(Clone, Default)]
pub struct FakeFactory {
    world: Rc<RefCell<FakeWorld>>,
}

impl FakeFactory {
    pub fn new() -> FakeFactory {
        // Make the engine's log output visible under RUST_LOG.
        let _ = env_logger::builder().is_test(true).try_init();
        FakeFactory::default()
    }

    pub fn configure(&self, f: impl FnOnce(&mut FakeConfig)) {
        f(&mut self.world.borrow_mut().config);
    }

    pub fn world(&self) -> Rc<RefCell<FakeWorld>> {
        Rc::clone(&self.world)
    }
}

impl SessionFactory for FakeFactory {
    fn connect(&self, _root_uri: &Url) -> Result<Box<dyn CheckerSession>, SessionError> {
        Ok(Box::new(FakeSession {
            world: Rc::clone(&self.world),
        }))
    }
}

struct FakeSession {
    world: Rc<RefCell<FakeWorld>>,
}

impl CheckerSession for FakeSession {
    fn did_open(&self, uri: &Url, text: &str) -> Result<(), SessionError> {
        let mut world = self.world.borrow_mut();
        let (diagnostics, _) = run_commands(text, &world.config, None);
        world.docs.insert(
            uri.clone(),
            DocState {
                text: text.to_string(),
                version: 1,
                diagnostics,
            },
        );
        Ok(())
    }

    fn did_change(&self, uri: &Url, version: i32, text: &str) -> Result<(), SessionError> {
        let mut world = self.world.borrow_mut();
        let (diagnostics, _) = run_commands(text, &world.config, None);
        world.docs.insert(
            uri.clone(),
            DocState {
                text: text.to_string(),
                version,
                diagnostics,
            },
        );
        Ok(())
    }

    fn goals(&self, uri: &Url, position: Position) -> Result<GoalAnswer, SessionError> {
        let world = self.world.borrow();
        let doc = world
            .docs
            .get(uri)
            .ok_or_else(|| SessionError::Protocol(format!("goals for unopened {uri}")))?;
        let (_, stack) = run_commands(&doc.text, &world.config, Some(position));
        let goals = stack.last().cloned().unwrap_or_default();
        Ok(GoalAnswer {
            version: doc.version,
            position,
            messages: Vec::new(),
            goals: Some(GoalConfig {
                goals,
                ..GoalConfig::default()
            }),
            error: None,
        })
    }

    fn document(&self, uri: &Url) -> Result<FlecheDocument, SessionError> {
        let world = self.world.borrow();
        let doc = world
            .docs
            .get(uri)
            .ok_or_else(|| SessionError::Protocol(format!("document for unopened {uri}")))?;
        let index = LineIndex::new(&doc.text);
        let spans = split_commands(&doc.text)
            .into_iter()
            .map(|(start, end)| {
                let sentence = norm(&doc.text[start..end]);
                RangedSpan {
                    range: Range {
                        start: index.position(start),
                        end: index.position(end),
                    },
                    span: Some(ast_for(&sentence, &world.config)),
                }
            })
            .collect();
        Ok(FlecheDocument { spans })
    }

    fn save_vo(&self, uri: &Url) -> Result<(), SessionError> {
        self.world.borrow_mut().saved_vo.push(uri.clone());
        Ok(())
    }

    fn diagnostics(&self, uri: &Url) -> Vec<Diagnostic> {
        self.world
            .borrow()
            .docs
            .get(uri)
            .map(|d| d.diagnostics.clone())
            .unwrap_or_default()
    }

    fn shutdown(&self) {
        self.world.borrow_mut().shutdowns += 1;
    }
}

/// Split text into sentence byte-spans: a sentence ends at `.` followed by
/// whitespace or end of input, outside strings and (nesting) comments.
pub fn split_commands(text: &str) -> Vec<(usize, usize)> {
    let bytes = text.as_bytes();
    let len = bytes.len();
    let mut commands = Vec::new();
    let mut i = 0;

    while i < len {
        // Skip the gap: whitespace and comments.
        let mut depth = 0usize;
        while i < len {
            if depth > 0 {
                if bytes[i] == b'*' && i + 1 < len && bytes[i + 1] == b')' {
                    depth -= 1;
                    i += 2;
                } else if bytes[i] == b'(' && i + 1 < len && bytes[i + 1] == b'*' {
                    depth += 1;
                    i += 2;
                } else {
                    i += 1;
                }
            } else if bytes[i].is_ascii_whitespace() {
                i += 1;
            } else if bytes[i] == b'(' && i + 1 < len && bytes[i + 1] == b'*' {
                depth += 1;
                i += 2;
            } else {
                break;
            }
        }
        if i >= len {
            break;
        }
        let start = i;

        // Scan to the sentence terminator.
        let mut in_string = false;
        depth = 0;
        while i < len {
            let b = bytes[i];
            if in_string {
                if b == b'"' {
                    in_string = false;
                }
                i += 1;
                continue;
            }
            if depth > 0 {
                if b == b'*' && i + 1 < len && bytes[i + 1] == b')' {
                    depth -= 1;
                    i += 2;
                } else if b == b'(' && i + 1 < len && bytes[i + 1] == b'*' {
                    depth += 1;
                    i += 2;
                } else {
                    i += 1;
                }
                continue;
            }
            match b {
                b'"' => {
                    in_string = true;
                    i += 1;
                }
                b'(' if i + 1 < len && bytes[i + 1] == b'*' => {
                    depth += 1;
                    i += 2;
                }
                b'.' => {
                    let ends = i + 1 >= len || bytes[i + 1].is_ascii_whitespace();
                    let ellipsis = i > 0 && bytes[i - 1] == b'.';
                    i += 1;
                    if ends && !ellipsis {
                        break;
                    }
                }
                _ => i += 1,
            }
        }
        commands.push((start, i));
    }
    commands
}

fn err(range: Range, message: impl Into<String>) -> Diagnostic {
    Diagnostic {
        range,
        severity: Some(DiagnosticSeverity::ERROR),
        message: message.into(),
        ..Diagnostic::default()
    }
}

fn info(range: Range, message: impl Into<String>) -> Diagnostic {
    Diagnostic {
        range,
        severity: Some(DiagnosticSeverity::INFORMATION),
        message: message.into(),
        ..Diagnostic::default()
    }
}

fn beyond(pos: Position, limit: Position) -> bool {
    pos.line > limit.line || (pos.line == limit.line && pos.character > limit.character)
}

fn strip_modifiers(s: &str) -> &str {
    let mut rest = s.trim_start();
    loop {
        if rest.starts_with("#[") {
            match rest.find(']') {
                Some(close) => rest = rest[close + 1..].trim_start(),
                None => return rest,
            }
            continue;
        }
        let mut advanced = false;
        for modifier in ["Local", "Global", "Program"] {
            if let Some(tail) = rest.strip_prefix(modifier) {
                if tail.starts_with(' ') {
                    rest = tail.trim_start();
                    advanced = true;
                    break;
                }
            }
        }
        if !advanced {
            return rest;
        }
    }
}

fn first_word(s: &str) -> &str {
    s.split_whitespace()
        .next()
        .unwrap_or("")
        .trim_end_matches('.')
}

/// If `sentence` opens a proof, the type of the goal it opens.
fn opener_goal(sentence: &str, config: &FakeConfig) -> Option<String> {
    let stripped = strip_modifiers(sentence);
    let word = first_word(stripped);
    let opens = match word {
        "Theorem" | "Lemma" | "Remark" | "Fact" | "Corollary" | "Proposition" | "Property"
        | "Goal" => true,
        "Next" => stripped.split_whitespace().nth(1).map(first_word) == Some("Obligation"),
        "Obligation" => true,
        "Definition" | "Example" | "Instance" | "Let" => !stripped.contains(":="),
        _ => false,
    };
    if !opens {
        return None;
    }
    if let Some(ty) = config.goal_types.get(sentence) {
        return Some(ty.clone());
    }
    let derived = if let Some(rest) = stripped.strip_prefix("Goal ") {
        rest.trim_end_matches('.').trim().to_string()
    } else if let Some(pos) = stripped.find(" : ") {
        stripped[pos + 3..].trim_end_matches('.').trim().to_string()
    } else {
        "obligation".to_string()
    };
    Some(derived)
}

fn is_terminator(sentence: &str) -> bool {
    matches!(
        first_word(sentence),
        "Qed" | "Admitted" | "Defined" | "Abort" | "Save"
    )
}

/// Execute sentences up to `up_to` (all of them when `None`); returns the
/// diagnostics of a full run and the open-goal stack at the stop point.
fn run_commands(
    text: &str,
    config: &FakeConfig,
    up_to: Option<Position>,
) -> (Vec<Diagnostic>, Vec<Vec<Goal>>) {
    let index = LineIndex::new(text);
    let mut diagnostics = Vec::new();
    let mut stack: Vec<Vec<Goal>> = Vec::new();

    for (start, end) in split_commands(text) {
        if let Some(limit) = up_to {
            if beyond(index.position(end), limit) {
                break;
            }
        }
        let sentence = norm(&text[start..end]);
        // Diagnostics use an inclusive end character.
        let range = Range {
            start: index.position(start),
            end: index.position(end.saturating_sub(1)),
        };

        if let Some(token) = config
            .unknown_tokens
            .iter()
            .find(|t| sentence.contains(t.as_str()))
        {
            diagnostics.push(err(
                range,
                format!("The reference {token} was not found in the current environment."),
            ));
            continue;
        }
        if config.failing.contains(&sentence) {
            diagnostics.push(err(range, "Tactic failure."));
            continue;
        }

        if sentence == "Print Libraries." {
            let body: String = config
                .libraries
                .iter()
                .map(|(name, _)| format!("\n  {name}"))
                .collect();
            diagnostics.push(info(
                range,
                format!(
                    "Loaded library files:{body}\n(total {})",
                    config.libraries.len()
                ),
            ));
            continue;
        }
        if let Some(name) = sentence
            .strip_prefix("Locate Library ")
            .and_then(|r| r.strip_suffix('.'))
        {
            if let Some((_, path)) = config.libraries.iter().find(|(n, _)| n == name) {
                diagnostics.push(info(
                    range,
                    format!(
                        "Library {name} has been loaded from file\n{}o",
                        path.display()
                    ),
                ));
            }
            continue;
        }
        if let Some(pattern) = sentence
            .strip_prefix("Locate \"")
            .and_then(|r| r.strip_suffix("\"."))
        {
            if let Some(answer) = config.locate_answers.get(pattern) {
                diagnostics.push(info(range, answer.clone()));
            }
            continue;
        }

        if let Some(ty) = opener_goal(&sentence, config) {
            stack.push(vec![Goal {
                hyps: Vec::new(),
                ty,
            }]);
            continue;
        }
        if is_terminator(&sentence) {
            match stack.pop() {
                None => diagnostics.push(err(range, "No proof-editing in progress.")),
                Some(goals) => {
                    let strict = matches!(first_word(&sentence), "Qed" | "Defined");
                    if strict && !goals.is_empty() {
                        diagnostics.push(err(range, "Attempt to save an incomplete proof."));
                    }
                }
            }
            continue;
        }
        if sentence == "Proof." || sentence.starts_with("Proof ") {
            continue;
        }
        if sentence.chars().next().is_some_and(|c| c.is_lowercase()) {
            match stack.last_mut() {
                None => diagnostics.push(err(
                    range,
                    format!("Syntax error: \"{sentence}\" used outside any proof."),
                )),
                Some(goals) => {
                    if let Some(after) = config.tactic_goals.get(&sentence) {
                        *goals = after.clone();
                    } else if DEFAULT_CLOSERS.contains(&sentence.as_str())
                        || config.closers.contains(&sentence)
                    {
                        goals.clear();
                    }
                }
            }
            continue;
        }
        // Any other command (Module, Section, Require, Check, …) is
        // structure or a silent query.
    }
    (diagnostics, stack)
}

fn qualid_json(dotted: &str) -> Value {
    let parts: Vec<&str> = dotted.split('.').collect();
    let (path, name) = parts.split_at(parts.len() - 1);
    let dirs: Vec<Value> = path.iter().rev().map(|p| json!(["Id", p])).collect();
    json!(["Ser_Qualid", ["DirPath", dirs], ["Id", name[0]]])
}

fn tag_for(sentence: &str) -> &'static str {
    let stripped = strip_modifiers(sentence);
    match first_word(stripped) {
        "Theorem" | "Lemma" | "Remark" | "Fact" | "Corollary" | "Proposition" | "Property"
        | "Goal" => "VernacStartTheoremProof",
        "Proof" => "VernacProof",
        "Qed" | "Admitted" | "Defined" | "Save" => "VernacEndProof",
        "Abort" => "VernacAbort",
        "Section" => "VernacBeginSection",
        "End" => "VernacEndSegment",
        "Module" => {
            if stripped.split_whitespace().nth(1) == Some("Type") {
                "VernacDeclareModuleType"
            } else {
                "VernacDefineModule"
            }
        }
        _ => "VernacExtend",
    }
}

fn ast_for(sentence: &str, config: &FakeConfig) -> Value {
    let mut items = vec![json!(tag_for(sentence))];
    if let Some(references) = config.references.get(sentence) {
        for reference in references {
            items.push(qualid_json(reference));
        }
    }
    if let Some(patterns) = config.sentence_notations.get(sentence) {
        for pattern in patterns {
            items.push(json!([
                "CNotation",
                Value::Null,
                ["InConstrEntry", pattern],
                [[], [], []]
            ]));
        }
    }
    json!({ "v": { "expr": items }, "loc": null })
}

/// Write `content` to a fresh `.v` temp file the engine can open and edit.
pub fn fixture(content: &str) -> tempfile::NamedTempFile {
    use std::io::Write as _;
    let mut file = tempfile::Builder::new()
        .prefix("proofscope_test_")
        .suffix(".v")
        .tempfile()
        .expect("create fixture file");
    file.write_all(content.as_bytes()).expect("write fixture");
    file
}
