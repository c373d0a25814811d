//! Heredoc collector for the Perl lexer.
//!
//! Handles collecting heredoc bodies at the end of the declaring logical
//! line, dealing with indentation stripping (`<<~`) and line termination.
//! Declarations queue in FIFO order:
//!
//! ```text
//! print <<A, <<B;
//! first body
//! A
//! second body
//! B
//! ```
//!
//! The collector returns owned body bytes (the lexer applies interpolation
//! segmentation afterwards, according to the declaration's [`QuoteKind`])
//! plus the offset where ordinary scanning resumes.

use std::collections::VecDeque;
use std::sync::Arc;

/// Quoting style used in a heredoc declaration.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum QuoteKind {
    /// Bare identifier (e.g., `<<EOF`), interpolates like double-quoted.
    Unquoted,
    /// Single-quoted (e.g., `<<'EOF'`), no interpolation.
    Single,
    /// Double-quoted (e.g., `<<"EOF"`), interpolates variables and escapes.
    Double,
}

/// Declaration info captured when the lexer sees `<<TAG`.
#[derive(Debug, Clone)]
pub struct PendingHeredoc {
    /// Exact terminator token that ends this heredoc.
    pub label: Arc<str>,
    /// True for indented heredocs (`<<~`), allows leading whitespace before
    /// the terminator and strips the common indent from the body.
    pub allow_indent: bool,
    /// Quoting style determining interpolation behavior.
    pub quote: QuoteKind,
    /// Byte offset of the heredoc declaration (e.g., `<<EOF`).
    pub decl_offset: usize,
}

/// Collected body of one heredoc.
#[derive(Debug)]
pub struct HeredocBody {
    /// Body bytes after indent stripping, lines joined with `\n` and a
    /// trailing `\n` per line (empty for an empty heredoc).
    pub bytes: Vec<u8>,
    /// Whether the heredoc was correctly terminated by its label.
    pub terminated: bool,
}

/// Result of collecting all pending heredocs from one logical line.
#[derive(Debug)]
pub struct CollectionResult {
    /// Collected bodies in FIFO order, aligned to pending declarations.
    pub bodies: Vec<HeredocBody>,
    /// Byte offset immediately after the final terminator line.
    pub next_offset: usize,
}

/// Collects all pending heredocs from source starting at the given offset.
///
/// `offset` must point just past the newline that ended the declaring
/// logical line. Bodies are collected in FIFO order; an unterminated
/// heredoc consumes the rest of the input and is flagged so the lexer can
/// raise its positioned error.
pub fn collect_all(
    src: &[u8],
    mut offset: usize,
    mut pending: VecDeque<PendingHeredoc>,
) -> CollectionResult {
    let mut bodies = Vec::with_capacity(pending.len());
    while let Some(hd) = pending.pop_front() {
        let (body, next) = collect_one(src, offset, &hd);
        bodies.push(body);
        offset = next;
    }
    CollectionResult { bodies, next_offset: offset }
}

/// Reads content lines until `label` matches after optional leading
/// whitespace. For `<<~`, the terminator's leading whitespace is the indent
/// baseline and the longest common byte prefix is stripped from each
/// content line. CRLF is normalized: content lines are joined with plain
/// `\n`, and a trailing CR before the newline is dropped.
fn collect_one(src: &[u8], mut off: usize, hd: &PendingHeredoc) -> (HeredocBody, usize) {
    struct Line {
        start: usize,
        end_no_eol: usize,
    }

    let mut raw_lines: Vec<Line> = Vec::new();
    let mut baseline_indent: &[u8] = &[];
    let mut after_terminator = off;
    let mut found = false;

    while off < src.len() {
        let (ls, le, next) = next_line_bounds(src, off);
        let line = &src[ls..le];

        let (lead_ws, rest) = split_leading_ws(line);
        if rest == hd.label.as_bytes() && (hd.allow_indent || lead_ws == 0) {
            if hd.allow_indent {
                baseline_indent = &line[..lead_ws];
            }
            after_terminator = next;
            found = true;
            break;
        }

        raw_lines.push(Line { start: ls, end_no_eol: le });
        off = next;
    }

    let mut bytes = Vec::new();
    for ln in &raw_lines {
        let content = &src[ln.start..ln.end_no_eol];
        let strip = common_prefix_len(content, baseline_indent);
        bytes.extend_from_slice(&content[strip..]);
        bytes.push(b'\n');
    }

    if !found {
        // Unterminated; hand back what we have so the lexer can report the
        // declaration-positioned error.
        return (HeredocBody { bytes, terminated: false }, off);
    }
    (HeredocBody { bytes, terminated: true }, after_terminator)
}

/// (line_start, line_end_excluding_newline, next_offset_after_newline).
/// Treats `\r\n` as one newline; EOF without a newline is fine.
fn next_line_bounds(src: &[u8], start: usize) -> (usize, usize, usize) {
    let nl = memchr::memchr2(b'\n', b'\r', &src[start..]).map(|i| start + i);
    match nl {
        None => (start, src.len(), src.len()),
        Some(i) if src[i] == b'\r' => {
            let next = if i + 1 < src.len() && src[i + 1] == b'\n' { i + 2 } else { i + 1 };
            (start, i, next)
        }
        Some(i) => (start, i, i + 1),
    }
}

/// Splits a byte slice into leading whitespace length and the remainder,
/// with a trailing CR dropped from the remainder for label comparison.
fn split_leading_ws(s: &[u8]) -> (usize, &[u8]) {
    let mut i = 0;
    while i < s.len() && (s[i] == b' ' || s[i] == b'\t') {
        i += 1;
    }
    let mut rest = &s[i..];
    if rest.last().copied() == Some(b'\r') {
        rest = &rest[..rest.len() - 1];
    }
    (i, rest)
}

/// Length of the common byte prefix between two slices.
fn common_prefix_len(a: &[u8], b: &[u8]) -> usize {
    let n = a.len().min(b.len());
    let mut i = 0;
    while i < n && a[i] == b[i] {
        i += 1;
    }
    i
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    fn pending(label: &str, allow_indent: bool) -> PendingHeredoc {
        PendingHeredoc {
            label: Arc::from(label),
            allow_indent,
            quote: QuoteKind::Unquoted,
            decl_offset: 0,
        }
    }

    fn collect(src: &str, pendings: Vec<PendingHeredoc>) -> CollectionResult {
        collect_all(src.as_bytes(), 0, pendings.into())
    }

    #[test]
    fn single_body() {
        let r = collect("hello\nworld\nEOF\nrest", vec![pending("EOF", false)]);
        assert_eq!(r.bodies.len(), 1);
        assert!(r.bodies[0].terminated);
        assert_eq!(r.bodies[0].bytes, b"hello\nworld\n");
        assert_eq!(&"hello\nworld\nEOF\nrest"[r.next_offset..], "rest");
    }

    #[test]
    fn fifo_order() {
        let r = collect(
            "first\nA\nsecond\nB\n",
            vec![pending("A", false), pending("B", false)],
        );
        assert_eq!(r.bodies[0].bytes, b"first\n");
        assert_eq!(r.bodies[1].bytes, b"second\n");
        assert!(r.bodies.iter().all(|b| b.terminated));
    }

    #[test]
    fn indented_terminator_requires_tilde() {
        // Without allow_indent an indented label line is body content.
        let r = collect("x\n  EOF\nEOF\n", vec![pending("EOF", false)]);
        assert_eq!(r.bodies[0].bytes, b"x\n  EOF\n");
    }

    #[test]
    fn tilde_strips_common_indent() {
        let r = collect("    a\n      b\n    EOF\n", vec![pending("EOF", true)]);
        assert!(r.bodies[0].terminated);
        assert_eq!(r.bodies[0].bytes, b"a\n  b\n");
    }

    #[test]
    fn empty_body() {
        let r = collect("EOF\nrest", vec![pending("EOF", false)]);
        assert!(r.bodies[0].terminated);
        assert_eq!(r.bodies[0].bytes, b"");
    }

    #[test]
    fn unterminated_consumes_rest() {
        let r = collect("a\nb\n", vec![pending("EOF", false)]);
        assert!(!r.bodies[0].terminated);
        assert_eq!(r.bodies[0].bytes, b"a\nb\n");
        assert_eq!(r.next_offset, 4);
    }

    #[test]
    fn crlf_lines() {
        let r = collect("a\r\nb\r\nEOF\r\nrest", vec![pending("EOF", false)]);
        assert!(r.bodies[0].terminated);
        assert_eq!(r.bodies[0].bytes, b"a\nb\n");
    }
}
