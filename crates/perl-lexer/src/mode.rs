//! Lexer modes for context-sensitive tokenization.

/// Perl lexer mode, tracked across tokens to disambiguate context-sensitive
/// syntax: `/` (regex vs division), `%`/`&`/`*` (sigil vs operator),
/// `<<` (heredoc vs shift), and the word operators (`x`, `eq`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LexerMode {
    /// Expecting a term (value) - slash starts a regex
    #[default]
    ExpectTerm,
    /// Expecting an operator - slash is division
    ExpectOperator,
}

impl LexerMode {
    /// Check if we're expecting a term
    pub fn is_expect_term(self) -> bool {
        matches!(self, LexerMode::ExpectTerm)
    }

    /// Check if we're expecting an operator
    pub fn is_expect_operator(self) -> bool {
        matches!(self, LexerMode::ExpectOperator)
    }
}
