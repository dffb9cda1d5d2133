//! Index of resolved terms and notations.
//!
//! The store is populated in two phases: prelude discovery harvests every
//! transitively loaded library file (dropping `Local` declarations, whose
//! visibility we approximate), and the tracker harvests in-file
//! declarations as steps execute, keyed under the module path active at
//! that point. Lookups probe from the most deeply qualified name outwards,
//! mirroring how an unqualified reference resolves inside nested modules.

use std::collections::HashMap;

use crate::error::{ProofFileError, Result};

/// What kind of source-level entity a term is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TermKind {
    Theorem,
    Lemma,
    Remark,
    Fact,
    Corollary,
    Proposition,
    Property,
    Definition,
    Fixpoint,
    Inductive,
    Record,
    Class,
    Instance,
    Notation,
    Tactic,
    /// Section-local (`Let`) binding, invisible outside its section.
    Local,
    Other,
}

/// A resolved source-level entity.
#[derive(Debug, Clone, PartialEq)]
pub struct Term {
    /// The full declaring sentence, trimmed.
    pub text: String,
    pub kind: TermKind,
    /// Module path the declaration lives under, outermost first.
    pub module_path: Vec<String>,
    /// File the declaration came from.
    pub file_path: String,
}

/// A parsed declaration head.
#[derive(Debug, Clone, PartialEq)]
pub struct Declaration {
    pub name: Option<String>,
    pub kind: TermKind,
    pub is_local: bool,
    /// `(pattern, scope)` for quoted notations.
    pub notation: Option<(String, String)>,
}

/// Undo record for one store mutation, applied in reverse on `exec(-n)`.
#[derive(Debug, Clone)]
pub enum StoreUndo {
    Term {
        key: String,
        prev: Option<Term>,
    },
    Notation {
        key: (String, String),
        prev: Option<Term>,
    },
    Local,
}

/// Terms keyed by fully qualified name, notations keyed by pattern and
/// scope, plus the section-local bindings of the current file.
#[derive(Debug, Clone, Default)]
pub struct ContextStore {
    terms: HashMap<String, Term>,
    notations: HashMap<(String, String), Term>,
    locals: Vec<Term>,
}

impl ContextStore {
    pub fn new() -> Self {
        ContextStore::default()
    }

    pub fn term_count(&self) -> usize {
        self.terms.len()
    }

    pub fn local_terms(&self) -> &[Term] {
        &self.locals
    }

    /// Resolve `name` as seen from inside `module_path`.
    ///
    /// For a reference `x` under modules `A.B`, the probe order is
    /// `A.B.x`, `A.x`, `x`; the first hit wins.
    pub fn get_term(&self, name: &str, module_path: &[String]) -> Option<&Term> {
        for depth in (0..=module_path.len()).rev() {
            let key = qualified_name(&module_path[..depth], name);
            if let Some(term) = self.terms.get(&key) {
                return Some(term);
            }
        }
        None
    }

    /// Look up a notation by pattern and scope.
    ///
    /// The query pattern may use `_` placeholders where the stored pattern
    /// has binder names, and stored patterns may quote literal tokens with
    /// `'` (so `exists _ .. _ , _` finds `"'exists' x .. y , p"`).
    pub fn get_notation(&self, pattern: &str, scope: &str) -> Result<&Term> {
        if let Some(term) = self.notations.get(&(pattern.to_string(), scope.to_string())) {
            return Ok(term);
        }
        for ((stored, stored_scope), term) in &self.notations {
            if stored_scope == scope && patterns_match(stored, pattern) {
                return Ok(term);
            }
        }
        Err(ProofFileError::NotationNotFound {
            notation: pattern.to_string(),
            scope: scope.to_string(),
        })
    }

    pub fn insert_term(&mut self, key: String, term: Term) -> StoreUndo {
        let prev = self.terms.insert(key.clone(), term);
        StoreUndo::Term { key, prev }
    }

    pub fn insert_notation(&mut self, key: (String, String), term: Term) -> StoreUndo {
        let prev = self.notations.insert(key.clone(), term);
        StoreUndo::Notation { key, prev }
    }

    pub fn push_local(&mut self, term: Term) -> StoreUndo {
        self.locals.push(term);
        StoreUndo::Local
    }

    /// Reverse one mutation.
    pub fn undo(&mut self, undo: StoreUndo) {
        match undo {
            StoreUndo::Term { key, prev } => {
                match prev {
                    Some(term) => self.terms.insert(key, term),
                    None => self.terms.remove(&key),
                };
            }
            StoreUndo::Notation { key, prev } => {
                match prev {
                    Some(term) => self.notations.insert(key, term),
                    None => self.notations.remove(&key),
                };
            }
            StoreUndo::Local => {
                self.locals.pop();
            }
        }
    }

    /// Harvest the declaration a sentence makes, if any.
    ///
    /// With `drop_local` (library harvesting) declarations marked `Local`
    /// and `Let` bindings are skipped entirely.
    pub fn record_declaration(
        &mut self,
        sentence: &str,
        module_path: &[String],
        file_path: &str,
        drop_local: bool,
    ) -> Vec<StoreUndo> {
        let Some(decl) = parse_declaration(sentence) else {
            return Vec::new();
        };
        if drop_local && decl.is_local {
            return Vec::new();
        }

        let term = Term {
            text: normalize(sentence),
            kind: decl.kind,
            module_path: module_path.to_vec(),
            file_path: file_path.to_string(),
        };

        let mut undos = Vec::new();
        if let Some(key) = decl.notation {
            undos.push(self.insert_notation(key, term.clone()));
        }
        if let Some(name) = decl.name {
            if decl.kind == TermKind::Local {
                undos.push(self.push_local(term));
            } else {
                let key = qualified_name(module_path, &name);
                undos.push(self.insert_term(key, term));
            }
        }
        undos
    }

    /// Absorb another store (prelude merging). Existing entries lose to the
    /// incoming ones, matching load order.
    pub fn merge(&mut self, other: ContextStore) {
        self.terms.extend(other.terms);
        self.notations.extend(other.notations);
        self.locals.extend(other.locals);
    }

    pub fn local_count(&self) -> usize {
        self.locals.len()
    }

    /// Drop the `Let` bindings of a section that just ended; returns them
    /// so a backwards step can restore them.
    pub fn drain_locals(&mut self, mark: usize) -> Vec<Term> {
        self.locals.split_off(mark.min(self.locals.len()))
    }

    pub fn restore_locals(&mut self, drained: Vec<Term>) {
        self.locals.extend(drained);
    }
}

/// Collapse a sentence onto one line with single spaces, the form terms are
/// stored and compared in.
pub fn normalize(sentence: &str) -> String {
    sentence.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn qualified_name(module_path: &[String], name: &str) -> String {
    if module_path.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", module_path.join("."), name)
    }
}

fn patterns_match(stored: &str, query: &str) -> bool {
    let stored_tokens: Vec<&str> = stored.split_whitespace().collect();
    let query_tokens: Vec<&str> = query.split_whitespace().collect();
    if stored_tokens.len() != query_tokens.len() {
        return false;
    }
    stored_tokens.iter().zip(&query_tokens).all(|(&s, &q)| {
        let s = s
            .strip_prefix('\'')
            .and_then(|rest| rest.strip_suffix('\''))
            .unwrap_or(s);
        q == "_" || q == s
    })
}

/// Parse the head of a declaring sentence.
///
/// Returns `None` for sentences that declare nothing (tactic calls, module
/// commands, queries). Leading attributes (`#[…]`) and modifiers are
/// skipped; `Local` marks the declaration file-private and `Let` makes a
/// section-local binding.
pub fn parse_declaration(sentence: &str) -> Option<Declaration> {
    let mut rest = sentence.trim_start();
    let mut is_local = false;

    loop {
        if rest.starts_with("#[") {
            let close = rest.find(']')?;
            if rest[..close].contains("local") {
                is_local = true;
            }
            rest = rest[close + 1..].trim_start();
            continue;
        }
        let Some((word, tail)) = split_word(rest) else {
            return None;
        };
        match word {
            "Local" => {
                is_local = true;
                rest = tail;
            }
            "Global" | "Program" | "Polymorphic" | "Monomorphic" | "Cumulative"
            | "NonCumulative" | "Private" => rest = tail,
            _ => break,
        }
    }

    let (keyword, tail) = split_word(rest)?;
    let kind = match keyword {
        "Theorem" => TermKind::Theorem,
        "Lemma" => TermKind::Lemma,
        "Remark" => TermKind::Remark,
        "Fact" => TermKind::Fact,
        "Corollary" => TermKind::Corollary,
        "Proposition" => TermKind::Proposition,
        "Property" => TermKind::Property,
        "Definition" | "Example" => TermKind::Definition,
        "Fixpoint" | "CoFixpoint" => TermKind::Fixpoint,
        "Inductive" | "CoInductive" | "Variant" => TermKind::Inductive,
        "Record" | "Structure" => TermKind::Record,
        "Class" => TermKind::Class,
        "Instance" => TermKind::Instance,
        "Ltac" | "Tactic" => TermKind::Tactic,
        "Let" => TermKind::Local,
        "Notation" | "Infix" => TermKind::Notation,
        _ => return None,
    };

    if kind == TermKind::Notation {
        return parse_notation(tail, is_local);
    }

    let name = first_identifier(tail)?;
    Some(Declaration {
        name: Some(name),
        kind,
        is_local: is_local || kind == TermKind::Local,
        notation: None,
    })
}

fn parse_notation(tail: &str, is_local: bool) -> Option<Declaration> {
    let tail = tail.trim_start();
    if let Some(after_quote) = tail.strip_prefix('"') {
        let close = after_quote.find('"')?;
        let pattern = after_quote[..close].to_string();
        let scope = trailing_scope(&after_quote[close + 1..]);
        return Some(Declaration {
            name: None,
            kind: TermKind::Notation,
            is_local,
            notation: Some((pattern, scope)),
        });
    }
    // Abbreviation form: `Notation minus := Nat.sub (only parsing).`
    // resolves like an ordinary name.
    let name = first_identifier(tail)?;
    Some(Declaration {
        name: Some(name),
        kind: TermKind::Notation,
        is_local,
        notation: None,
    })
}

/// Scope annotation at the end of a notation declaration or `Locate`
/// answer: `… : scope.`
pub(crate) fn trailing_scope(rest: &str) -> String {
    let rest = rest.trim_end().trim_end_matches('.').trim_end();
    match rest.rsplit_once(':') {
        Some((_, candidate)) => {
            let candidate = candidate.trim();
            if !candidate.is_empty()
                && candidate
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_')
            {
                candidate.to_string()
            } else {
                String::new()
            }
        }
        None => String::new(),
    }
}

fn split_word(text: &str) -> Option<(&str, &str)> {
    let text = text.trim_start();
    if text.is_empty() {
        return None;
    }
    let end = text
        .find(|c: char| c.is_whitespace())
        .unwrap_or(text.len());
    Some((&text[..end], &text[end..]))
}

fn first_identifier(text: &str) -> Option<String> {
    let text = text.trim_start();
    let end = text
        .find(|c: char| !(c.is_alphanumeric() || c == '_' || c == '\''))
        .unwrap_or(text.len());
    if end == 0 {
        None
    } else {
        Some(text[..end].to_string())
    }
}
