//! Textual splicing for the edit engine.
//!
//! Because concatenating the step texts (plus the trailing remainder)
//! reproduces the document exactly, the step-text list *is* the document:
//! a batch of operations is applied op by op against the evolving list, and
//! the target text falls out deterministically as the concatenation. The
//! same spliced list doubles as the validation oracle: after the checker
//! re-segments the new text, the re-derived step texts must match it
//! elementwise, or the edit absorbed a neighbouring step's characters.

use crate::error::{ProofFileError, Result};

/// One edit operation. Indices refer to the step list as it stands when
/// the operation applies, earlier operations in the batch included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeOp {
    /// Insert `text` as a new step immediately after `prev_index`.
    Add { prev_index: usize, text: String },
    /// Remove the step at `index`, including its leading whitespace.
    Delete { index: usize },
}

impl ChangeOp {
    pub fn add(prev_index: usize, text: impl Into<String>) -> ChangeOp {
        ChangeOp::Add {
            prev_index,
            text: text.into(),
        }
    }

    pub fn delete(index: usize) -> ChangeOp {
        ChangeOp::Delete { index }
    }
}

/// Result of splicing a batch into the step-text list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Splice {
    /// Expected step texts after the batch.
    pub texts: Vec<String>,
    /// `steps_taken` adjusted for insertions and deletions inside the
    /// executed prefix.
    pub steps_taken: usize,
}

/// Apply `ops` to the step-text list.
///
/// `trailing_empty` reports whether any text follows the last step; an
/// insertion at end-of-file without a separating newline is rejected there,
/// since it would glue onto the previous sentence.
pub fn splice(
    mut texts: Vec<String>,
    mut steps_taken: usize,
    ops: &[ChangeOp],
    trailing_empty: bool,
) -> Result<Splice> {
    for op in ops {
        match op {
            ChangeOp::Add { prev_index, text } => {
                validate_step_text(text)?;
                if *prev_index >= texts.len() {
                    return Err(ProofFileError::InvalidStep(format!(
                        "no step at index {prev_index}"
                    )));
                }
                let position = prev_index + 1;
                if position == texts.len()
                    && trailing_empty
                    && !text.starts_with(|c: char| c.is_whitespace())
                {
                    return Err(ProofFileError::InvalidStep(
                        "inserting at end of file without a separating newline".to_string(),
                    ));
                }
                if position < steps_taken {
                    steps_taken += 1;
                }
                texts.insert(position, text.clone());
            }
            ChangeOp::Delete { index } => {
                if *index >= texts.len() {
                    return Err(ProofFileError::InvalidDelete(format!(
                        "no step at index {index}"
                    )));
                }
                if *index < steps_taken {
                    steps_taken -= 1;
                }
                texts.remove(*index);
            }
        }
    }
    Ok(Splice { texts, steps_taken })
}

/// Reject texts that cannot possibly be one step: empty, whitespace-only,
/// or comment-only.
pub fn validate_step_text(text: &str) -> Result<()> {
    if strip_comments(text).trim().is_empty() {
        return Err(ProofFileError::InvalidStep(
            "step text is empty, whitespace or comment only".to_string(),
        ));
    }
    Ok(())
}

/// Remove `(* … *)` comments, which nest.
fn strip_comments(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut depth = 0usize;
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        match (c, chars.peek()) {
            ('(', Some('*')) => {
                chars.next();
                depth += 1;
            }
            ('*', Some(')')) if depth > 0 => {
                chars.next();
                depth -= 1;
            }
            _ if depth == 0 => out.push(c),
            _ => {}
        }
    }
    out
}
