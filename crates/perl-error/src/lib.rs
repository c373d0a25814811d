//! Error types for the Perl compiler frontend.
//!
//! Each compilation layer has its own error enum: [`LexError`] from
//! tokenization, [`ParseError`] from AST construction, [`CompileError`] from
//! code emission. All carry byte positions; [`render_diagnostic`] converts a
//! positioned error into the user-facing
//! `message at FILE line N.` form with a source caret.
//!
//! Runtime errors live in `perl-runtime` because they carry runtime values
//! (`die $obj` preserves the object).

use perl_position_tracking::LineIndex;
use thiserror::Error;

/// Result type for lexer operations.
pub type LexResult<T> = std::result::Result<T, LexError>;

/// Result type for parser operations.
pub type ParseResult<T> = std::result::Result<T, ParseError>;

/// Result type for code emission.
pub type CompileResult<T> = std::result::Result<T, CompileError>;

/// Errors that can occur during lexing.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum LexError {
    /// Unterminated string literal
    #[error("Can't find string terminator anywhere before EOF")]
    UnterminatedString {
        /// Byte offset of the opening delimiter
        position: usize,
    },

    /// Unterminated regex-family literal
    #[error("Search pattern not terminated")]
    UnterminatedRegex {
        /// Byte offset of the opening delimiter
        position: usize,
    },

    /// Heredoc body ran to EOF without its terminator
    #[error("Can't find string terminator \"{label}\" anywhere before EOF")]
    UnterminatedHeredoc {
        /// The expected terminator label
        label: String,
        /// Byte offset of the `<<TAG` declaration
        position: usize,
    },

    /// Invalid numeric literal
    #[error("Bad number: {reason}")]
    BadNumber {
        /// Byte offset of the literal
        position: usize,
        /// What was wrong with it
        reason: String,
    },

    /// A sigil with nothing usable after it
    #[error("Unrecognized variable name after '{sigil}'")]
    UnknownSigil {
        /// The sigil character
        sigil: char,
        /// Byte offset of the sigil
        position: usize,
    },

    /// Unexpected character
    #[error("Unrecognized character '{ch}'")]
    UnexpectedChar {
        /// The offending character
        ch: char,
        /// Byte offset
        position: usize,
    },
}

impl LexError {
    /// Byte offset where the error occurred.
    pub fn position(&self) -> usize {
        match self {
            LexError::UnterminatedString { position }
            | LexError::UnterminatedRegex { position }
            | LexError::UnterminatedHeredoc { position, .. }
            | LexError::BadNumber { position, .. }
            | LexError::UnknownSigil { position, .. }
            | LexError::UnexpectedChar { position, .. } => *position,
        }
    }
}

/// Errors that can occur during parsing.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ParseError {
    /// Tokenization failed
    #[error(transparent)]
    Lex(#[from] LexError),

    /// Found a token other than what the grammar requires
    #[error("syntax error: found {found}, expected {expected}")]
    UnexpectedToken {
        /// Description of the token found
        found: String,
        /// Description of what was expected
        expected: String,
        /// Byte offset of the offending token
        position: usize,
    },

    /// Input ended mid-construct
    #[error("syntax error at EOF")]
    UnexpectedEof {
        /// Byte offset of the end of input
        position: usize,
    },

    /// Nesting exceeded the configured depth limit
    #[error("parse recursion limit exceeded")]
    RecursionLimit {
        /// Byte offset where the limit tripped
        position: usize,
    },
}

impl ParseError {
    /// Byte offset where the error occurred.
    pub fn position(&self) -> usize {
        match self {
            ParseError::Lex(e) => e.position(),
            ParseError::UnexpectedToken { position, .. }
            | ParseError::UnexpectedEof { position }
            | ParseError::RecursionLimit { position } => *position,
        }
    }
}

/// Errors that can occur during code emission.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CompileError {
    /// `strict 'vars'` rejected an undeclared variable
    #[error("Global symbol \"{name}\" requires explicit package name")]
    UndeclaredVariable {
        /// The variable, with sigil
        name: String,
        /// Byte offset of the use
        position: usize,
    },

    /// `strict 'subs'` rejected a bareword
    #[error("Bareword \"{word}\" not allowed while \"strict subs\" in use")]
    BarewordNotAllowed {
        /// The offending bareword
        word: String,
        /// Byte offset of the bareword
        position: usize,
    },

    /// The packed backend's method-size limit was exceeded.
    ///
    /// Internal: the emitter catches this, retries after hoisting, and
    /// finally falls back to the listed backend, so users never see it
    /// unless the fallback is disabled.
    #[error("method exceeds packed backend limit ({size} > {limit} bytes)")]
    TooLargeMethod {
        /// Assembled size in bytes
        size: usize,
        /// The backend limit
        limit: usize,
    },

    /// A loop-control statement with no enclosing loop to bind to
    #[error("Can't \"{op}\" outside a loop block")]
    LoopControlOutsideLoop {
        /// `last`, `next`, or `redo`
        op: String,
        /// Byte offset of the statement
        position: usize,
    },

    /// Internal invariant breach in the emitter (spill pool, join depth)
    #[error("internal emitter error: {reason}")]
    Internal {
        /// What went wrong
        reason: String,
        /// Byte offset of the construct being emitted
        position: usize,
    },
}

impl CompileError {
    /// Byte offset where the error occurred, if source-positioned.
    pub fn position(&self) -> Option<usize> {
        match self {
            CompileError::UndeclaredVariable { position, .. }
            | CompileError::BarewordNotAllowed { position, .. }
            | CompileError::LoopControlOutsideLoop { position, .. }
            | CompileError::Internal { position, .. } => Some(*position),
            CompileError::TooLargeMethod { .. } => None,
        }
    }
}

/// Renders a positioned message in perl's diagnostic form:
///
/// ```text
/// message at FILE line N.
/// <source line>
///      ^
/// ```
///
/// When no position is available the caret block is omitted.
pub fn render_diagnostic(
    message: &str,
    file: &str,
    source: &str,
    position: Option<usize>,
) -> String {
    match position {
        Some(pos) => {
            let index = LineIndex::new(source);
            let line = index.line(pos);
            format!("{message} at {file} line {line}.\n{}", index.caret_line(source, pos))
        }
        None => format!("{message} at {file}."),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn lex_error_position() {
        let err = LexError::UnterminatedString { position: 12 };
        assert_eq!(err.position(), 12);
    }

    #[test]
    fn parse_error_wraps_lex() {
        let err = ParseError::from(LexError::BadNumber {
            position: 3,
            reason: "trailing garbage".into(),
        });
        assert_eq!(err.position(), 3);
        assert!(err.to_string().contains("Bad number"));
    }

    #[test]
    fn renders_file_and_line() {
        let src = "my $x = 1;\nmy $y = ;\n";
        let rendered = render_diagnostic("syntax error", "t.pl", src, Some(19));
        assert!(rendered.starts_with("syntax error at t.pl line 2."));
        assert!(rendered.contains("my $y = ;"));
        assert!(rendered.ends_with("^"));
    }

    #[test]
    fn strict_vars_message_shape() {
        let err = CompileError::UndeclaredVariable { name: "$x".into(), position: 0 };
        assert_eq!(
            err.to_string(),
            "Global symbol \"$x\" requires explicit package name"
        );
    }
}
