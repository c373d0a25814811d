//! Line index for byte offset → line/column conversion.

use crate::ByteSpan;

/// Stores line start offsets for efficient position lookups.
///
/// Lines and columns are 1-based, matching perl's `at FILE line N.`
/// diagnostic convention. Columns count bytes from the line start, which is
/// exact for the caret renderer because source is addressed in bytes
/// end to end.
#[derive(Debug, Clone)]
pub struct LineIndex {
    /// Byte offset of each line start
    line_starts: Vec<usize>,
    /// Total length of the indexed source
    len: usize,
}

impl LineIndex {
    /// Builds an index over the given source text.
    pub fn new(text: &str) -> Self {
        let mut line_starts = vec![0];
        let bytes = text.as_bytes();
        for (i, b) in bytes.iter().enumerate() {
            if *b == b'\n' {
                line_starts.push(i + 1);
            }
        }
        Self { line_starts, len: text.len() }
    }

    /// Number of lines in the indexed source (at least 1).
    pub fn line_count(&self) -> usize {
        self.line_starts.len()
    }

    /// Converts a byte offset to a 1-based `(line, column)` pair.
    ///
    /// Offsets past the end of the source clamp to the final position.
    pub fn line_col(&self, offset: usize) -> (usize, usize) {
        let offset = offset.min(self.len);
        let line = self
            .line_starts
            .binary_search(&offset)
            .unwrap_or_else(|i| i.saturating_sub(1));
        (line + 1, offset - self.line_starts[line] + 1)
    }

    /// 1-based line number for a byte offset.
    pub fn line(&self, offset: usize) -> usize {
        self.line_col(offset).0
    }

    /// The span of the full line (excluding the newline) containing `offset`.
    pub fn line_span(&self, offset: usize) -> ByteSpan {
        let (line, _) = self.line_col(offset);
        let start = self.line_starts[line - 1];
        let end = if line < self.line_starts.len() {
            // Exclude the terminating newline byte.
            self.line_starts[line] - 1
        } else {
            self.len
        };
        ByteSpan::new(start, end.max(start))
    }

    /// Renders the source line containing `offset` with a caret underneath.
    ///
    /// Used by the CLI for lex/parse/compile error display:
    ///
    /// ```text
    /// my $x = ;
    ///         ^
    /// ```
    pub fn caret_line(&self, source: &str, offset: usize) -> String {
        let span = self.line_span(offset);
        let line_text = span.slice(source);
        let col = self.line_col(offset).1;
        let mut out = String::with_capacity(line_text.len() + col + 2);
        out.push_str(line_text);
        out.push('\n');
        for _ in 1..col {
            out.push(' ');
        }
        out.push('^');
        out
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn first_line_is_one() {
        let idx = LineIndex::new("abc\ndef\n");
        assert_eq!(idx.line_col(0), (1, 1));
        assert_eq!(idx.line_col(2), (1, 3));
    }

    #[test]
    fn newline_starts_next_line() {
        let idx = LineIndex::new("abc\ndef\n");
        assert_eq!(idx.line_col(4), (2, 1));
        assert_eq!(idx.line_col(6), (2, 3));
        assert_eq!(idx.line_count(), 3);
    }

    #[test]
    fn clamps_past_end() {
        let idx = LineIndex::new("abc");
        assert_eq!(idx.line_col(100), (1, 4));
    }

    #[test]
    fn line_span_excludes_newline() {
        let src = "my $x;\nmy $y;\n";
        let idx = LineIndex::new(src);
        assert_eq!(idx.line_span(8).slice(src), "my $y;");
    }

    #[test]
    fn caret_points_at_column() {
        let src = "my $x = ;";
        let idx = LineIndex::new(src);
        let rendered = idx.caret_line(src, 8);
        assert_eq!(rendered, "my $x = ;\n        ^");
    }
}
