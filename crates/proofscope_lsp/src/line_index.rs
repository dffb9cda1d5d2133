//! Byte ↔ UTF-16 position mapping.
//!
//! The checker exchanges positions as `(line, character)` with zero-based,
//! UTF-16-code-unit columns; our document text is UTF-8 and sliced by byte
//! offset. A [`LineIndex`] is built once per document revision and converts
//! in both directions.
//!
//! Checker diagnostics carry an *inclusive* end character; everything else
//! in this codebase treats ranges as half-open. [`LineIndex::byte_span`]
//! normalizes either convention into a half-open byte range.

use lsp_types::{Position, Range};

/// Precomputed line-start table over one revision of a document.
#[derive(Debug, Clone)]
pub struct LineIndex {
    /// Byte offset where each line begins; entry 0 is always 0.
    line_starts: Vec<usize>,
    text: String,
}

impl LineIndex {
    pub fn new(text: &str) -> Self {
        let mut line_starts = vec![0];
        line_starts.extend(
            text.bytes()
                .enumerate()
                .filter(|&(_, b)| b == b'\n')
                .map(|(i, _)| i + 1),
        );
        LineIndex {
            line_starts,
            text: text.to_string(),
        }
    }

    /// Number of lines, counting a trailing fragment after the last `\n`.
    pub fn line_count(&self) -> usize {
        self.line_starts.len()
    }

    /// Byte offset of a protocol position. Positions past the end of a line
    /// or of the document clamp to the nearest valid offset.
    pub fn byte_offset(&self, pos: Position) -> usize {
        let line = pos.line as usize;
        let Some(&line_start) = self.line_starts.get(line) else {
            return self.text.len();
        };
        let line_end = self
            .line_starts
            .get(line + 1)
            .copied()
            .unwrap_or(self.text.len());

        let mut units = 0u32;
        for (off, ch) in self.text[line_start..line_end].char_indices() {
            if units >= pos.character {
                return line_start + off;
            }
            units += ch.len_utf16() as u32;
        }
        line_end
    }

    /// Protocol position of a byte offset.
    pub fn position(&self, offset: usize) -> Position {
        let offset = offset.min(self.text.len());
        let line = self
            .line_starts
            .partition_point(|&start| start <= offset)
            .saturating_sub(1);
        let character = self.text[self.line_starts[line]..offset]
            .encode_utf16()
            .count() as u32;
        Position {
            line: line as u32,
            character,
        }
    }

    /// Half-open byte span of a protocol range.
    ///
    /// With `inclusive_end` the end character is widened by one code unit
    /// first, which is the convention checker diagnostics use.
    pub fn byte_span(&self, range: Range, inclusive_end: bool) -> (usize, usize) {
        let start = self.byte_offset(range.start);
        let end_pos = if inclusive_end {
            Position {
                line: range.end.line,
                character: range.end.character + 1,
            }
        } else {
            range.end
        };
        (start, self.byte_offset(end_pos))
    }
}
