//! Segmentation of a document into steps.
//!
//! The checker's AST document carries one span per sentence with exact
//! source ranges. A [`Step`] extends each span backwards to the end of the
//! previous one, so its text keeps the whitespace and comments that precede
//! the sentence. Concatenating every step text (plus the trailing remainder
//! after the last sentence) reproduces the document byte-for-byte, which is
//! what makes textual splicing in the edit engine exact.

use lsp_types::Range;
use proofscope_lsp::{FlecheDocument, LineIndex};

use crate::ast::AstNode;

/// One sentence of the document, with its leading gap attached.
#[derive(Debug, Clone)]
pub struct Step {
    /// Exact source substring from the end of the previous step through the
    /// end of this one.
    pub text: String,
    /// Range of the sentence itself, as reported by the checker.
    pub range: Range,
    /// AST payload; [`AstNode::Null`] when the checker could not parse the
    /// sentence.
    pub ast: AstNode,
    /// Byte length of the leading gap (whitespace/comments) in `text`.
    gap: usize,
}

impl Step {
    /// The sentence without its leading gap.
    pub fn sentence(&self) -> &str {
        &self.text[self.gap..]
    }
}

/// Result of segmenting one document revision.
#[derive(Debug, Clone, Default)]
pub struct Segmentation {
    pub steps: Vec<Step>,
    /// Source text after the last sentence (usually a newline).
    pub trailing: String,
}

impl Segmentation {
    /// Reassemble the document this segmentation was derived from.
    pub fn to_source(&self) -> String {
        let mut source: String = self.steps.iter().map(|s| s.text.as_str()).collect();
        source.push_str(&self.trailing);
        source
    }
}

/// Split `source` along the checker's sentence spans.
pub fn segment(source: &str, document: &FlecheDocument) -> Segmentation {
    let index = LineIndex::new(source);
    let mut steps = Vec::with_capacity(document.spans.len());
    let mut prev_end = 0usize;
    for span in &document.spans {
        let (start, end) = index.byte_span(span.range, false);
        if end < prev_end {
            log::warn!("checker span out of order at offset {end}, skipping");
            continue;
        }
        let ast = span
            .span
            .as_ref()
            .map(AstNode::from_value)
            .unwrap_or_default();
        steps.push(Step {
            text: source[prev_end..end].to_string(),
            range: span.range,
            ast,
            gap: start.saturating_sub(prev_end).min(end - prev_end),
        });
        prev_end = end;
    }
    Segmentation {
        steps,
        trailing: source[prev_end..].to_string(),
    }
}
