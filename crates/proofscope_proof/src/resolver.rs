//! Reference resolution for one step.
//!
//! A step's AST is walked for `Ser_Qualid` and `CNotation` nodes. Qualids
//! resolve immediately against the context store under the module path
//! active at that step. Notations cannot be resolved offline, since their
//! scope is unknown, so the walk emits a *plan*: a `Locate "pattern".` directive
//! appended to the aux document, to be answered after the next
//! synchronization. [`resolve_plans`] then turns the answers into store
//! lookups and produces the step's context, deduplicated in first-seen
//! order. A notation the checker cannot locate (builtin syntax like
//! `{ _ }`) simply contributes nothing; it never aborts the step.

use crate::ast::AstNode;
use crate::context::{trailing_scope, ContextStore, Term};

/// One pending resolution for a step.
#[derive(Debug, Clone, PartialEq)]
pub enum Plan {
    /// Resolved against the store during the walk.
    Resolved(Term),
    /// Awaiting the answer of a `Locate` directive at an aux line.
    Locate { pattern: String, line: usize },
}

/// Walk a step's AST and produce its resolution plans in reference order.
///
/// `plan_locate` reserves an aux-document line for a notation query and
/// returns it.
pub fn collect_plans(
    ast: &AstNode,
    store: &ContextStore,
    module_path: &[String],
    plan_locate: &mut dyn FnMut(&str) -> usize,
) -> Vec<Plan> {
    let mut plans = Vec::new();
    walk(ast, store, module_path, plan_locate, &mut plans);
    plans
}

fn walk(
    node: &AstNode,
    store: &ContextStore,
    module_path: &[String],
    plan_locate: &mut dyn FnMut(&str) -> usize,
    plans: &mut Vec<Plan>,
) {
    if let Some(values) = node.map_values() {
        for value in values {
            walk(value, store, module_path, plan_locate, plans);
        }
        return;
    }
    if let Some(name) = node.as_qualid() {
        if let Some(term) = store.get_term(&name, module_path) {
            plans.push(Plan::Resolved(term.clone()));
        }
        return;
    }
    if let Some((pattern, rest)) = node.as_notation() {
        let line = plan_locate(pattern);
        plans.push(Plan::Locate {
            pattern: pattern.to_string(),
            line,
        });
        for child in rest {
            walk(child, store, module_path, plan_locate, plans);
        }
        return;
    }
    for child in node.children() {
        walk(child, store, module_path, plan_locate, plans);
    }
}

/// Execute the plans of one step after the aux document has synced.
///
/// `locate` looks up the answer of a planned directive by pattern and line.
pub fn resolve_plans(
    plans: &[Plan],
    store: &ContextStore,
    locate: &dyn Fn(&str, usize) -> Option<String>,
) -> Vec<Term> {
    let mut terms: Vec<Term> = Vec::new();
    for plan in plans {
        match plan {
            Plan::Resolved(term) => push_unique(&mut terms, term.clone()),
            Plan::Locate { pattern, line } => {
                let Some(answer) = locate(pattern, *line) else {
                    continue;
                };
                let scope = trailing_scope(&answer);
                if let Ok(term) = store.get_notation(pattern, &scope) {
                    push_unique(&mut terms, term.clone());
                }
            }
        }
    }
    terms
}

fn push_unique(terms: &mut Vec<Term>, term: Term) {
    if !terms.contains(&term) {
        terms.push(term);
    }
}
