//! Delimited-body scanning for quote-like operators.
//!
//! Handles the delimiter rules shared by `q qq qw m s qr tr y` and the
//! plain quote forms: paired delimiters (`() [] {} <>`) nest, all others
//! terminate on the next unescaped occurrence. Bodies are returned raw
//! (escapes intact); flavor-specific unescaping happens in the caller.

use perl_error::{LexError, LexResult};

/// Returns the closing delimiter for an opening one (`(` → `)`), or the
/// delimiter itself for non-paired forms.
pub(crate) fn closing_delim(open: u8) -> u8 {
    match open {
        b'(' => b')',
        b'[' => b']',
        b'{' => b'}',
        b'<' => b'>',
        other => other,
    }
}

/// Whether a byte can open a quote-like body (`q(...)`, `m!...!`, ...).
///
/// Excludes characters that would swallow ordinary code when a quote word
/// is really a bareword (`=`, `=>`, separators and closers).
pub(crate) fn is_quote_delim(b: u8) -> bool {
    b.is_ascii_punctuation() && !matches!(b, b'=' | b',' | b';' | b')' | b']' | b'}' | b'>' | b'$' | b'@' | b'%' | b'_' | b'#')
}

/// Scans one delimited body starting just after the opening delimiter.
///
/// Returns the raw body bytes (escapes preserved, except that an escaped
/// delimiter keeps its backslash so downstream processors see it) and the
/// offset just past the closing delimiter.
pub(crate) fn scan_delimited(
    bytes: &[u8],
    open_pos: usize,
    open: u8,
    max_nest: usize,
) -> LexResult<(Vec<u8>, usize)> {
    let close = closing_delim(open);
    let paired = close != open;
    let mut depth = 1usize;
    let mut body = Vec::new();
    let mut i = open_pos + 1;

    while i < bytes.len() {
        let b = bytes[i];
        if b == b'\\' && i + 1 < bytes.len() {
            body.push(b);
            body.push(bytes[i + 1]);
            i += 2;
            continue;
        }
        if paired && b == open {
            depth += 1;
            if depth > max_nest {
                return Err(LexError::UnterminatedString { position: open_pos });
            }
            body.push(b);
            i += 1;
            continue;
        }
        if b == close {
            depth -= 1;
            if depth == 0 {
                return Ok((body, i + 1));
            }
            body.push(b);
            i += 1;
            continue;
        }
        body.push(b);
        i += 1;
    }
    Err(LexError::UnterminatedString { position: open_pos })
}

/// Scans the second body of a two-part construct (`s///`, `tr///`).
///
/// For paired delimiters the second part opens with its own (possibly
/// different) delimiter after optional whitespace: `s{...}{...}` or even
/// `s{...}!...!`. For non-paired delimiters the first close doubles as the
/// second open: `s/.../.../`.
pub(crate) fn scan_second_part(
    bytes: &[u8],
    after_first: usize,
    first_open: u8,
    max_nest: usize,
) -> LexResult<(Vec<u8>, usize)> {
    if closing_delim(first_open) != first_open {
        // Paired: skip whitespace (including newlines) to the new opener.
        let mut i = after_first;
        while i < bytes.len() && bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        let open = *bytes.get(i).ok_or(LexError::UnterminatedString { position: after_first })?;
        scan_delimited(bytes, i, open, max_nest)
    } else {
        // `after_first` already points just past the shared delimiter; the
        // replacement begins immediately.
        let mut body = Vec::new();
        let mut i = after_first;
        while i < bytes.len() {
            let b = bytes[i];
            if b == b'\\' && i + 1 < bytes.len() {
                body.push(b);
                body.push(bytes[i + 1]);
                i += 2;
                continue;
            }
            if b == first_open {
                return Ok((body, i + 1));
            }
            body.push(b);
            i += 1;
        }
        Err(LexError::UnterminatedString { position: after_first })
    }
}

/// Collects trailing regex/substitution modifier letters.
pub(crate) fn scan_flag_run(bytes: &[u8], mut i: usize) -> (String, usize) {
    let start = i;
    while i < bytes.len() && bytes[i].is_ascii_alphabetic() {
        i += 1;
    }
    (
        std::str::from_utf8(&bytes[start..i]).unwrap_or("").to_string(),
        i,
    )
}

/// Unescapes a single-quoted-flavor body: `\\` and `\<delim>` collapse,
/// everything else stays raw.
pub(crate) fn unescape_single(body: &[u8], open: u8) -> Vec<u8> {
    let close = closing_delim(open);
    let mut out = Vec::with_capacity(body.len());
    let mut i = 0;
    while i < body.len() {
        if body[i] == b'\\' && i + 1 < body.len() {
            let next = body[i + 1];
            if next == b'\\' || next == close || next == open {
                out.push(next);
                i += 2;
                continue;
            }
        }
        out.push(body[i]);
        i += 1;
    }
    out
}

/// Splits a `qw()` body on whitespace into its words.
pub(crate) fn split_words(body: &[u8]) -> Vec<String> {
    body.split(|b| b.is_ascii_whitespace())
        .filter(|w| !w.is_empty())
        .map(|w| String::from_utf8_lossy(w).into_owned())
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn simple_body() {
        let (body, end) = scan_delimited(b"/abc/", 0, b'/', 32).unwrap();
        assert_eq!(body, b"abc");
        assert_eq!(end, 5);
    }

    #[test]
    fn escaped_delimiter_stays() {
        let (body, _) = scan_delimited(br"/a\/b/", 0, b'/', 32).unwrap();
        assert_eq!(body, br"a\/b");
    }

    #[test]
    fn paired_nesting() {
        let (body, end) = scan_delimited(b"{a{b}c}", 0, b'{', 32).unwrap();
        assert_eq!(body, b"a{b}c");
        assert_eq!(end, 7);
    }

    #[test]
    fn second_part_shared_delim() {
        // s/abc/def/ - first body scanned, then replacement
        let (first, after) = scan_delimited(b"/abc/def/", 0, b'/', 32).unwrap();
        assert_eq!(first, b"abc");
        let (second, end) = scan_second_part(b"/abc/def/", after, b'/', 32).unwrap();
        assert_eq!(second, b"def");
        assert_eq!(end, 9);
    }

    #[test]
    fn second_part_paired_delim() {
        let src = b"{abc}{def}";
        let (first, after) = scan_delimited(src, 0, b'{', 32).unwrap();
        assert_eq!(first, b"abc");
        let (second, _) = scan_second_part(src, after, b'{', 32).unwrap();
        assert_eq!(second, b"def");
    }

    #[test]
    fn unterminated() {
        assert!(scan_delimited(b"/abc", 0, b'/', 32).is_err());
    }

    #[test]
    fn single_quote_unescape() {
        assert_eq!(unescape_single(br"a\'b", b'\''), b"a'b");
        assert_eq!(unescape_single(br"a\\b", b'\''), br"a\b");
        assert_eq!(unescape_single(br"a\nb", b'\''), br"a\nb");
    }

    #[test]
    fn qw_words() {
        assert_eq!(split_words(b"  a b\n  c  "), vec!["a", "b", "c"]);
    }
}
