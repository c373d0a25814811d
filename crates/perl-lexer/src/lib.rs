//! Context-aware Perl lexer with mode-based tokenization.
//!
//! Perl's surface syntax is context-sensitive: `/` is a regex delimiter or a
//! division sign, `%`/`&`/`*` are sigils or operators, `<<` introduces a
//! heredoc or a shift, and `x`/`eq`-style word operators double as barewords.
//! The lexer resolves all of these with a [`LexerMode`] tracking whether the
//! next token should be a term or an operator, plus a one-token lookbehind
//! encoded in that mode.
//!
//! # Heredocs
//!
//! On `<<TAG` the lexer emits a [`TokenKind::Heredoc`] token immediately and
//! queues the declaration; when the current logical line ends, the queued
//! bodies are collected FIFO by `perl-heredoc` and patched into the already
//! emitted tokens as [`Payload::Str`]. The token sequence therefore carries
//! heredoc values at their expression position while bodies stay where the
//! source put them.
//!
//! # Interpolation
//!
//! Double-quoted flavors are not expanded here. Their bodies are segmented
//! into literal chunks and embedded variable-expression sources
//! ([`perl_token::StrPart`]); the parser re-parses the expression sources.
//!
//! # Usage
//!
//! ```
//! use perl_lexer::PerlLexer;
//! use perl_token::TokenKind;
//!
//! let tokens = PerlLexer::new("my $x = 42;").tokenize().unwrap();
//! let kinds: Vec<_> = tokens.iter().filter(|t| !t.is_trivia()).map(|t| t.kind).collect();
//! assert_eq!(
//!     kinds,
//!     vec![
//!         TokenKind::My,
//!         TokenKind::ScalarSigil,
//!         TokenKind::Identifier,
//!         TokenKind::Assign,
//!         TokenKind::Number,
//!         TokenKind::Semicolon,
//!         TokenKind::Eof,
//!     ]
//! );
//! ```

mod interp;
mod mode;
mod number;
mod quote;

pub use mode::LexerMode;

use interp::Flavor;
use perl_error::{LexError, LexResult};
use perl_heredoc::{PendingHeredoc, QuoteKind};
use perl_position_tracking::ByteSpan;
use perl_token::{Payload, RegexFlags, RegexLit, RegexOp, StrPart, StringLit, Token, TokenKind};
use std::collections::VecDeque;
use std::sync::Arc;

/// Configuration for the lexer.
#[derive(Debug, Clone)]
pub struct LexerConfig {
    /// Maximum nesting depth for paired quote delimiters.
    pub max_delim_nest: usize,
}

impl Default for LexerConfig {
    fn default() -> Self {
        Self { max_delim_nest: 128 }
    }
}

/// Tracks the `sub [NAME] (` prefix so prototypes lex as opaque strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProtoState {
    No,
    AfterSub,
    AfterName,
}

/// Named list operators that keep the lexer expecting a term, so that
/// `split /,/, $s` lexes a regex rather than a division.
const LIST_OPERATORS: &[&str] = &[
    "print", "say", "printf", "push", "unshift", "splice", "return", "die", "warn", "join",
    "split", "grep", "map", "sort", "reverse", "keys", "values", "each", "exists", "delete",
    "defined", "ref", "scalar", "shift", "pop", "chomp", "chop", "length", "substr", "index",
    "rindex", "uc", "lc", "ucfirst", "lcfirst", "sprintf", "abs", "int", "sqrt", "hex", "oct",
    "chr", "ord", "bless", "open", "close",
];

/// Mode-aware Perl lexer.
pub struct PerlLexer<'a> {
    input: &'a str,
    bytes: &'a [u8],
    position: usize,
    mode: LexerMode,
    config: LexerConfig,
    tokens: Vec<Token>,
    /// Queue of pending heredocs: (token index to patch, declaration).
    pending_heredocs: Vec<(usize, PendingHeredoc)>,
    /// True only immediately after a newline (column-1 detection for POD
    /// and `__END__`).
    at_line_start: bool,
    /// Open ternaries, so `? x : y` does not lex `x` as a label.
    ternary_depth: usize,
    proto_state: ProtoState,
    done: bool,
}

impl<'a> PerlLexer<'a> {
    /// Create a new lexer for the given input.
    pub fn new(input: &'a str) -> Self {
        Self::with_config(input, LexerConfig::default())
    }

    /// Create a new lexer with custom configuration.
    pub fn with_config(input: &'a str, config: LexerConfig) -> Self {
        Self {
            input,
            bytes: input.as_bytes(),
            position: 0,
            mode: LexerMode::ExpectTerm,
            config,
            tokens: Vec::new(),
            pending_heredocs: Vec::new(),
            at_line_start: true,
            ternary_depth: 0,
            proto_state: ProtoState::No,
            done: false,
        }
    }

    /// Tokenizes the entire input, including trivia tokens.
    ///
    /// The final token is always [`TokenKind::Eof`]. Heredoc payloads are
    /// fully resolved in the returned stream.
    pub fn tokenize(mut self) -> LexResult<Vec<Token>> {
        // Skip a UTF-8 BOM once.
        if self.bytes.starts_with(&[0xEF, 0xBB, 0xBF]) {
            self.position = 3;
        }
        while !self.done {
            self.scan_token()?;
        }
        Ok(self.tokens)
    }

    // ===== token emission =====

    fn text(&self, span: ByteSpan) -> Arc<str> {
        Arc::from(span.slice(self.input))
    }

    fn push_span(&mut self, kind: TokenKind, start: usize) {
        let span = ByteSpan::new(start, self.position);
        let text = self.text(span);
        self.push_token(Token::new(kind, text, span));
    }

    fn push_token(&mut self, token: Token) {
        if !token.is_trivia() {
            self.proto_state = match (token.kind, self.proto_state) {
                (TokenKind::Sub, _) => ProtoState::AfterSub,
                (TokenKind::Identifier, ProtoState::AfterSub) => ProtoState::AfterName,
                _ => ProtoState::No,
            };
            self.at_line_start = false;
        }
        self.tokens.push(token);
    }

    // ===== byte helpers =====

    fn peek(&self, offset: usize) -> Option<u8> {
        self.bytes.get(self.position + offset).copied()
    }

    fn cur(&self) -> Option<u8> {
        self.peek(0)
    }

    fn cur_char(&self) -> Option<char> {
        self.input[self.position..].chars().next()
    }

    fn is_ident_start_at(&self, pos: usize) -> bool {
        match self.input[pos..].chars().next() {
            Some(c) => c == '_' || unicode_ident::is_xid_start(c),
            None => false,
        }
    }

    /// Scans an identifier (with embedded `::` package separators) starting
    /// at `pos`; returns the end offset.
    fn scan_ident_end(&self, pos: usize) -> usize {
        let mut end = pos;
        let mut chars = self.input[pos..].char_indices().peekable();
        while let Some((off, c)) = chars.next() {
            if c == '_' || unicode_ident::is_xid_continue(c) {
                end = pos + off + c.len_utf8();
            } else if c == ':'
                && matches!(chars.peek(), Some((_, ':')))
                && self.is_ident_start_at(pos + off + 2)
            {
                chars.next();
                end = pos + off + 2;
            } else {
                break;
            }
        }
        end
    }

    // ===== main dispatch =====

    fn scan_token(&mut self) -> LexResult<()> {
        let start = self.position;
        let Some(b) = self.cur() else {
            if let Some((_, hd)) = self.pending_heredocs.first() {
                return Err(LexError::UnterminatedHeredoc {
                    label: hd.label.to_string(),
                    position: hd.decl_offset,
                });
            }
            self.push_span(TokenKind::Eof, start);
            self.done = true;
            return Ok(());
        };

        match b {
            b'\n' | b'\r' => self.scan_newline(start),
            b' ' | b'\t' => {
                while matches!(self.cur(), Some(b' ') | Some(b'\t')) {
                    self.position += 1;
                }
                self.at_line_start = false;
                self.push_span(TokenKind::Whitespace, start);
                Ok(())
            }
            b'#' => {
                let line_end = memchr::memchr2(b'\n', b'\r', &self.bytes[start..])
                    .map_or(self.bytes.len(), |i| start + i);
                self.position = line_end;
                self.push_span(TokenKind::Comment, start);
                Ok(())
            }
            b'=' if self.at_line_start && self.peek(1).is_some_and(|c| c.is_ascii_alphabetic()) => {
                self.skip_pod(start);
                Ok(())
            }
            b'0'..=b'9' => self.scan_numeric(start),
            b'.' if self.mode.is_expect_term() && self.peek(1).is_some_and(|c| c.is_ascii_digit()) => {
                self.scan_numeric(start)
            }
            b'\'' => self.scan_single_quoted(start),
            b'"' => self.scan_double_quoted(start),
            b'$' | b'@' if self.mode.is_expect_term() || b == b'$' => self.scan_sigil(start),
            b'%' | b'&' | b'*' if self.mode.is_expect_term() => self.scan_sigil(start),
            b'/' => self.scan_slash(start),
            b'<' => self.scan_angle(start),
            _ if self.is_ident_start_at(start) => self.scan_word(start),
            _ => self.scan_operator(start),
        }
    }

    fn scan_newline(&mut self, start: usize) -> LexResult<()> {
        if self.cur() == Some(b'\r') {
            self.position += 1;
        }
        if self.cur() == Some(b'\n') {
            self.position += 1;
        }
        self.push_span(TokenKind::Newline, start);
        self.at_line_start = true;
        if !self.pending_heredocs.is_empty() {
            self.collect_heredoc_bodies()?;
        }
        Ok(())
    }

    fn skip_pod(&mut self, start: usize) {
        // POD runs from a `=word` line to the end of the `=cut` line.
        let bytes = self.bytes;
        let mut pos = start;
        loop {
            let line_end = memchr::memchr(b'\n', &bytes[pos..]).map_or(bytes.len(), |i| pos + i);
            let line = &bytes[pos..line_end];
            let stripped = if line.last() == Some(&b'\r') { &line[..line.len() - 1] } else { line };
            if stripped == b"=cut" || stripped.starts_with(b"=cut ") || stripped.starts_with(b"=cut\t") {
                self.position = line_end;
                break;
            }
            if line_end >= bytes.len() {
                self.position = bytes.len();
                break;
            }
            pos = line_end + 1;
        }
        self.at_line_start = false;
        self.push_span(TokenKind::Comment, start);
    }

    // ===== literals =====

    fn scan_numeric(&mut self, start: usize) -> LexResult<()> {
        let (lit, end) = number::scan_number(self.bytes, start)?;
        self.position = end;
        let span = ByteSpan::new(start, end);
        let text = self.text(span);
        self.push_token(Token::with_payload(TokenKind::Number, text, span, Payload::Num(lit)));
        self.mode = LexerMode::ExpectOperator;
        Ok(())
    }

    fn scan_single_quoted(&mut self, start: usize) -> LexResult<()> {
        let (raw, end) = quote::scan_delimited(self.bytes, start, b'\'', self.config.max_delim_nest)?;
        self.position = end;
        let body = quote::unescape_single(&raw, b'\'');
        let span = ByteSpan::new(start, end);
        let text = self.text(span);
        self.push_token(Token::with_payload(
            TokenKind::String,
            text,
            span,
            Payload::Str(StringLit { parts: vec![StrPart::Literal(body)], interpolates: false }),
        ));
        self.mode = LexerMode::ExpectOperator;
        Ok(())
    }

    fn scan_double_quoted(&mut self, start: usize) -> LexResult<()> {
        let (raw, end) = quote::scan_delimited(self.bytes, start, b'"', self.config.max_delim_nest)?;
        self.position = end;
        let lit = interp::segment(&raw, Flavor::DoubleQuoted);
        let span = ByteSpan::new(start, end);
        let text = self.text(span);
        self.push_token(Token::with_payload(TokenKind::String, text, span, Payload::Str(lit)));
        self.mode = LexerMode::ExpectOperator;
        Ok(())
    }

    // ===== sigils and variables =====

    fn scan_sigil(&mut self, start: usize) -> LexResult<()> {
        let sigil = self.bytes[start];
        self.position = start + 1;

        // `$#array` / `$#{...}`: last-index form keeps the `$#` as the
        // sigil text so the parser can tell it apart.
        if sigil == b'$'
            && self.cur() == Some(b'#')
            && (self.peek(1) == Some(b'{')
                || self.peek(1) == Some(b'$')
                || self.position + 1 < self.bytes.len() && self.is_ident_start_at(self.position + 1))
        {
            self.position += 1;
        }

        let kind = match sigil {
            b'$' => TokenKind::ScalarSigil,
            b'@' => TokenKind::ArraySigil,
            b'%' => TokenKind::HashSigil,
            b'&' => TokenKind::SubSigil,
            _ => TokenKind::GlobSigil,
        };
        self.push_span(kind, start);

        // Block/deref forms: leave `{`, `$` for the next scan.
        match self.cur() {
            Some(b'{') | Some(b'$') => {
                self.mode = LexerMode::ExpectTerm;
                return Ok(());
            }
            _ => {}
        }

        let name_start = self.position;
        // Control-character variables: $^W and friends.
        if sigil == b'$' && self.cur() == Some(b'^') && self.peek(1).is_some_and(|c| c.is_ascii_uppercase()) {
            self.position += 2;
            self.push_span(TokenKind::Identifier, name_start);
            self.mode = LexerMode::ExpectOperator;
            return Ok(());
        }
        if self.is_ident_start_at(self.position) {
            self.position = self.scan_ident_end(self.position);
            self.push_span(TokenKind::Identifier, name_start);
            self.mode = LexerMode::ExpectOperator;
            return Ok(());
        }
        if self.cur().is_some_and(|c| c.is_ascii_digit()) {
            while self.cur().is_some_and(|c| c.is_ascii_digit()) {
                self.position += 1;
            }
            self.push_span(TokenKind::Identifier, name_start);
            self.mode = LexerMode::ExpectOperator;
            return Ok(());
        }
        let punct_ok = match sigil {
            b'$' => self
                .cur()
                .is_some_and(|c| matches!(c, b'_' | b'&' | b'`' | b'\'' | b'+' | b'.' | b'/' | b'\\' | b',' | b';' | b'!' | b'@' | b'$' | b'"' | b'<' | b'>' | b'(' | b')' | b'[' | b']' | b'0')),
            b'@' => matches!(self.cur(), Some(b'_') | Some(b'-') | Some(b'+')),
            b'%' => matches!(self.cur(), Some(b'+') | Some(b'-')),
            _ => false,
        };
        if punct_ok {
            self.position += 1;
            self.push_span(TokenKind::Identifier, name_start);
            self.mode = LexerMode::ExpectOperator;
            return Ok(());
        }
        Err(LexError::UnknownSigil { sigil: sigil as char, position: start })
    }

    // ===== slash, angle =====

    fn scan_slash(&mut self, start: usize) -> LexResult<()> {
        if self.mode.is_expect_term() {
            return self.scan_regex_literal(start, b'/', RegexOp::Match);
        }
        match (self.peek(1), self.peek(2)) {
            (Some(b'/'), Some(b'=')) => self.op(start, 3, TokenKind::DefinedOrAssign),
            (Some(b'/'), _) => self.op(start, 2, TokenKind::DefinedOr),
            (Some(b'='), _) => self.op(start, 2, TokenKind::SlashAssign),
            _ => self.op(start, 1, TokenKind::Slash),
        }
    }

    fn scan_angle(&mut self, start: usize) -> LexResult<()> {
        if self.mode.is_expect_operator() {
            return match (self.peek(1), self.peek(2)) {
                (Some(b'='), Some(b'>')) => self.op(start, 3, TokenKind::Spaceship),
                (Some(b'<'), Some(b'=')) => self.op(start, 3, TokenKind::LeftShiftAssign),
                (Some(b'<'), _) => self.op(start, 2, TokenKind::LeftShift),
                (Some(b'='), _) => self.op(start, 2, TokenKind::LessEqual),
                _ => self.op(start, 1, TokenKind::Less),
            };
        }
        // Term position: heredoc, readline, or comparison after all.
        if self.peek(1) == Some(b'<') {
            if self.try_heredoc(start)? {
                return Ok(());
            }
            return self.op(start, 2, TokenKind::LeftShift);
        }
        if let Some(end) = self.readline_end(start) {
            self.position = end;
            self.push_span(TokenKind::Readline, start);
            self.mode = LexerMode::ExpectOperator;
            return Ok(());
        }
        self.op(start, 1, TokenKind::Less)
    }

    /// Matches `<>`, `<STDIN>`, `<$fh>`; returns the end offset.
    fn readline_end(&self, start: usize) -> Option<usize> {
        let mut i = start + 1;
        if self.bytes.get(i) == Some(&b'$') {
            i += 1;
        }
        while self.bytes.get(i).is_some_and(|b| b.is_ascii_alphanumeric() || *b == b'_') {
            i += 1;
        }
        (self.bytes.get(i) == Some(&b'>')).then_some(i + 1)
    }

    // ===== heredocs =====

    fn try_heredoc(&mut self, start: usize) -> LexResult<bool> {
        let mut i = start + 2;
        let allow_indent = self.bytes.get(i) == Some(&b'~');
        if allow_indent {
            i += 1;
        }
        let (quote, label_start) = match self.bytes.get(i) {
            Some(b'\'') => (QuoteKind::Single, i + 1),
            Some(b'"') => (QuoteKind::Double, i + 1),
            _ => (QuoteKind::Unquoted, i),
        };
        if !self.is_ident_start_at(label_start) {
            return Ok(false);
        }
        let label_end = self.scan_ident_end(label_start);
        let mut end = label_end;
        match quote {
            QuoteKind::Single if self.bytes.get(end) == Some(&b'\'') => end += 1,
            QuoteKind::Double if self.bytes.get(end) == Some(&b'"') => end += 1,
            QuoteKind::Single | QuoteKind::Double => return Ok(false),
            QuoteKind::Unquoted => {}
        }
        let label: Arc<str> = Arc::from(&self.input[label_start..label_end]);
        self.position = end;
        let token_index = self.tokens.len();
        self.push_span(TokenKind::Heredoc, start);
        self.pending_heredocs.push((
            token_index,
            PendingHeredoc { label, allow_indent, quote, decl_offset: start },
        ));
        self.mode = LexerMode::ExpectOperator;
        Ok(true)
    }

    fn collect_heredoc_bodies(&mut self) -> LexResult<()> {
        let pending = std::mem::take(&mut self.pending_heredocs);
        let queue: VecDeque<PendingHeredoc> = pending.iter().map(|(_, hd)| hd.clone()).collect();
        let result = perl_heredoc::collect_all(self.bytes, self.position, queue);
        for ((token_index, hd), body) in pending.iter().zip(result.bodies) {
            if !body.terminated {
                return Err(LexError::UnterminatedHeredoc {
                    label: hd.label.to_string(),
                    position: hd.decl_offset,
                });
            }
            let lit = match hd.quote {
                QuoteKind::Single => {
                    StringLit { parts: vec![StrPart::Literal(body.bytes)], interpolates: false }
                }
                QuoteKind::Unquoted | QuoteKind::Double => {
                    interp::segment(&body.bytes, Flavor::DoubleQuoted)
                }
            };
            self.tokens[*token_index].payload = Payload::Str(lit);
        }
        self.position = result.next_offset;
        self.at_line_start = true;
        Ok(())
    }

    // ===== identifiers, keywords, quote operators =====

    fn scan_word(&mut self, start: usize) -> LexResult<()> {
        let was_line_start = self.at_line_start;
        let end = self.scan_ident_end(start);
        let word = self.input[start..end].to_string();

        if was_line_start && (word == "__END__" || word == "__DATA__") {
            self.position = self.bytes.len();
            self.push_span(TokenKind::Eof, start);
            self.done = true;
            return Ok(());
        }

        // Quote-like operators only fire in term position.
        if self.mode.is_expect_term()
            && matches!(word.as_str(), "q" | "qq" | "qw" | "m" | "qr" | "s" | "tr" | "y")
        {
            let mut i = end;
            while matches!(self.bytes.get(i), Some(b' ') | Some(b'\t')) {
                i += 1;
            }
            if let Some(&delim) = self.bytes.get(i) {
                if quote::is_quote_delim(delim) && !(delim == b'-' && self.bytes.get(i + 1) == Some(&b'>')) {
                    return self.scan_quote_operator(start, word, i, delim);
                }
            }
        }

        self.position = end;
        let keyword = TokenKind::keyword(&word);
        match keyword {
            Some(op_kind)
                if matches!(
                    op_kind,
                    TokenKind::WordAnd
                        | TokenKind::WordOr
                        | TokenKind::WordXor
                        | TokenKind::StrEq
                        | TokenKind::StrNe
                        | TokenKind::StrLt
                        | TokenKind::StrGt
                        | TokenKind::StrLe
                        | TokenKind::StrGe
                        | TokenKind::StringCompare
                        | TokenKind::Repeat
                ) =>
            {
                if self.mode.is_expect_operator() {
                    self.push_span(op_kind, start);
                    self.mode = LexerMode::ExpectTerm;
                } else {
                    self.push_span(TokenKind::Identifier, start);
                    self.mode = LexerMode::ExpectOperator;
                }
            }
            Some(TokenKind::Wantarray) => {
                self.push_span(TokenKind::Wantarray, start);
                self.mode = LexerMode::ExpectOperator;
            }
            Some(kind) => {
                self.push_span(kind, start);
                self.mode = LexerMode::ExpectTerm;
            }
            None => {
                // `LABEL:` - only in term position, outside ternaries, and
                // not a package separator.
                if self.mode.is_expect_term()
                    && self.ternary_depth == 0
                    && self.bytes.get(end) == Some(&b':')
                    && self.bytes.get(end + 1) != Some(&b':')
                {
                    self.position = end + 1;
                    self.push_span(TokenKind::Label, start);
                    self.mode = LexerMode::ExpectTerm;
                    return Ok(());
                }
                self.push_span(TokenKind::Identifier, start);
                self.mode = if LIST_OPERATORS.contains(&word.as_str()) {
                    LexerMode::ExpectTerm
                } else {
                    LexerMode::ExpectOperator
                };
            }
        }
        Ok(())
    }

    fn scan_quote_operator(
        &mut self,
        start: usize,
        word: String,
        delim_pos: usize,
        delim: u8,
    ) -> LexResult<()> {
        let nest = self.config.max_delim_nest;
        let (raw, after) = quote::scan_delimited(self.bytes, delim_pos, delim, nest)?;
        match word.as_str() {
            "q" => {
                self.position = after;
                let body = quote::unescape_single(&raw, delim);
                self.finish_string(start, StringLit { parts: vec![StrPart::Literal(body)], interpolates: false })
            }
            "qq" => {
                self.position = after;
                self.finish_string(start, interp::segment(&raw, Flavor::DoubleQuoted))
            }
            "qw" => {
                self.position = after;
                let words = quote::split_words(&raw);
                let span = ByteSpan::new(start, after);
                let text = self.text(span);
                self.push_token(Token::with_payload(TokenKind::QuoteWords, text, span, Payload::Words(words)));
                self.mode = LexerMode::ExpectOperator;
                Ok(())
            }
            "m" | "qr" => {
                let (flags, end) = quote::scan_flag_run(self.bytes, after);
                self.position = end;
                let op = if word == "m" { RegexOp::Match } else { RegexOp::Quote };
                let flags = self.parse_flags(op, &flags, start)?;
                self.finish_regex(start, RegexLit {
                    op,
                    pattern: interp::segment(&raw, Flavor::Pattern),
                    replacement: None,
                    flags,
                })
            }
            "s" => {
                let (repl_raw, after_repl) = quote::scan_second_part(self.bytes, after, delim, nest)?;
                let (flags, end) = quote::scan_flag_run(self.bytes, after_repl);
                self.position = end;
                let flags = self.parse_flags(RegexOp::Subst, &flags, start)?;
                let replacement = if flags.eval_replacement {
                    // s///e: the replacement is code, re-parsed wholesale.
                    StringLit {
                        parts: vec![StrPart::Expr(String::from_utf8_lossy(&repl_raw).into_owned())],
                        interpolates: true,
                    }
                } else {
                    interp::segment(&repl_raw, Flavor::DoubleQuoted)
                };
                self.finish_regex(start, RegexLit {
                    op: RegexOp::Subst,
                    pattern: interp::segment(&raw, Flavor::Pattern),
                    replacement: Some(replacement),
                    flags,
                })
            }
            // tr/// and y///
            _ => {
                let (repl_raw, after_repl) = quote::scan_second_part(self.bytes, after, delim, nest)?;
                let (flags, end) = quote::scan_flag_run(self.bytes, after_repl);
                self.position = end;
                let flags = self.parse_flags(RegexOp::Trans, &flags, start)?;
                self.finish_regex(start, RegexLit {
                    op: RegexOp::Trans,
                    pattern: StringLit::literal(quote::unescape_single(&raw, delim)),
                    replacement: Some(StringLit::literal(quote::unescape_single(&repl_raw, delim))),
                    flags,
                })
            }
        }
    }

    fn scan_regex_literal(&mut self, start: usize, delim: u8, op: RegexOp) -> LexResult<()> {
        let (raw, after) = quote::scan_delimited(self.bytes, start, delim, self.config.max_delim_nest)
            .map_err(|_| LexError::UnterminatedRegex { position: start })?;
        let (flags, end) = quote::scan_flag_run(self.bytes, after);
        self.position = end;
        let flags = self.parse_flags(op, &flags, start)?;
        self.finish_regex(start, RegexLit {
            op,
            pattern: interp::segment(&raw, Flavor::Pattern),
            replacement: None,
            flags,
        })
    }

    fn parse_flags(&self, op: RegexOp, flags: &str, start: usize) -> LexResult<RegexFlags> {
        RegexFlags::parse(op, flags).ok_or_else(|| LexError::UnexpectedChar {
            ch: flags.chars().next_back().unwrap_or('?'),
            position: start,
        })
    }

    fn finish_string(&mut self, start: usize, lit: StringLit) -> LexResult<()> {
        let span = ByteSpan::new(start, self.position);
        let text = self.text(span);
        self.push_token(Token::with_payload(TokenKind::String, text, span, Payload::Str(lit)));
        self.mode = LexerMode::ExpectOperator;
        Ok(())
    }

    fn finish_regex(&mut self, start: usize, lit: RegexLit) -> LexResult<()> {
        let span = ByteSpan::new(start, self.position);
        let text = self.text(span);
        self.push_token(Token::with_payload(TokenKind::Regex, text, span, Payload::Regex(lit)));
        self.mode = LexerMode::ExpectOperator;
        Ok(())
    }

    // ===== operators and delimiters =====

    fn op(&mut self, start: usize, len: usize, kind: TokenKind) -> LexResult<()> {
        self.position = start + len;
        self.push_span(kind, start);
        self.mode = match kind {
            TokenKind::RightParen | TokenKind::RightBracket | TokenKind::RightBrace => {
                LexerMode::ExpectOperator
            }
            // `$x++` stays in operator position, `++$x` stays in term.
            TokenKind::Increment | TokenKind::Decrement => self.mode,
            _ => LexerMode::ExpectTerm,
        };
        Ok(())
    }

    fn scan_operator(&mut self, start: usize) -> LexResult<()> {
        let b = self.bytes[start];
        let p1 = self.peek(1);
        let p2 = self.peek(2);
        match b {
            b'=' => match p1 {
                Some(b'~') => self.op(start, 2, TokenKind::Match),
                Some(b'=') => self.op(start, 2, TokenKind::Equal),
                Some(b'>') => self.op(start, 2, TokenKind::FatArrow),
                _ => self.op(start, 1, TokenKind::Assign),
            },
            b'!' => match p1 {
                Some(b'~') => self.op(start, 2, TokenKind::NotMatch),
                Some(b'=') => self.op(start, 2, TokenKind::NotEqual),
                _ => self.op(start, 1, TokenKind::Not),
            },
            b'+' => match p1 {
                Some(b'+') => self.op(start, 2, TokenKind::Increment),
                Some(b'=') => self.op(start, 2, TokenKind::PlusAssign),
                _ => self.op(start, 1, TokenKind::Plus),
            },
            b'-' => match p1 {
                Some(b'-') => self.op(start, 2, TokenKind::Decrement),
                Some(b'=') => self.op(start, 2, TokenKind::MinusAssign),
                Some(b'>') => self.op(start, 2, TokenKind::Arrow),
                _ => self.op(start, 1, TokenKind::Minus),
            },
            b'*' => match (p1, p2) {
                (Some(b'*'), Some(b'=')) => self.op(start, 3, TokenKind::PowerAssign),
                (Some(b'*'), _) => self.op(start, 2, TokenKind::Power),
                (Some(b'='), _) => self.op(start, 2, TokenKind::StarAssign),
                _ => self.op(start, 1, TokenKind::Star),
            },
            b'%' => match p1 {
                Some(b'=') => self.op(start, 2, TokenKind::PercentAssign),
                _ => self.op(start, 1, TokenKind::Percent),
            },
            b'.' => match (p1, p2) {
                (Some(b'.'), Some(b'.')) => self.op(start, 3, TokenKind::Ellipsis),
                (Some(b'.'), _) => self.op(start, 2, TokenKind::Range),
                (Some(b'='), _) => self.op(start, 2, TokenKind::DotAssign),
                _ => self.op(start, 1, TokenKind::Dot),
            },
            b'&' => match (p1, p2) {
                (Some(b'&'), Some(b'=')) => self.op(start, 3, TokenKind::LogicalAndAssign),
                (Some(b'&'), _) => self.op(start, 2, TokenKind::And),
                (Some(b'='), _) => self.op(start, 2, TokenKind::AndAssign),
                _ => self.op(start, 1, TokenKind::BitwiseAnd),
            },
            b'|' => match (p1, p2) {
                (Some(b'|'), Some(b'=')) => self.op(start, 3, TokenKind::LogicalOrAssign),
                (Some(b'|'), _) => self.op(start, 2, TokenKind::Or),
                (Some(b'='), _) => self.op(start, 2, TokenKind::OrAssign),
                _ => self.op(start, 1, TokenKind::BitwiseOr),
            },
            b'^' => match p1 {
                Some(b'=') => self.op(start, 2, TokenKind::XorAssign),
                _ => self.op(start, 1, TokenKind::BitwiseXor),
            },
            b'~' => self.op(start, 1, TokenKind::BitwiseNot),
            b'>' => match (p1, p2) {
                (Some(b'>'), Some(b'=')) => self.op(start, 3, TokenKind::RightShiftAssign),
                (Some(b'>'), _) => self.op(start, 2, TokenKind::RightShift),
                (Some(b'='), _) => self.op(start, 2, TokenKind::GreaterEqual),
                _ => self.op(start, 1, TokenKind::Greater),
            },
            b'?' => {
                self.ternary_depth += 1;
                self.op(start, 1, TokenKind::Question)
            }
            b':' => match p1 {
                Some(b':') => self.op(start, 2, TokenKind::DoubleColon),
                _ => {
                    self.ternary_depth = self.ternary_depth.saturating_sub(1);
                    self.op(start, 1, TokenKind::Colon)
                }
            },
            b';' => self.op(start, 1, TokenKind::Semicolon),
            b',' => self.op(start, 1, TokenKind::Comma),
            b'(' => {
                if self.proto_state != ProtoState::No {
                    return self.scan_prototype(start);
                }
                self.op(start, 1, TokenKind::LeftParen)
            }
            b')' => self.op(start, 1, TokenKind::RightParen),
            b'[' => self.op(start, 1, TokenKind::LeftBracket),
            b']' => self.op(start, 1, TokenKind::RightBracket),
            b'{' => self.op(start, 1, TokenKind::LeftBrace),
            b'}' => self.op(start, 1, TokenKind::RightBrace),
            b'\\' => self.op(start, 1, TokenKind::Backslash),
            b'@' | b'$' => self.scan_sigil(start),
            _ => Err(LexError::UnexpectedChar {
                ch: self.cur_char().unwrap_or('\u{FFFD}'),
                position: start,
            }),
        }
    }

    /// Lexes a `sub` prototype `($$;@)` as an opaque string token.
    fn scan_prototype(&mut self, start: usize) -> LexResult<()> {
        let close = memchr::memchr(b')', &self.bytes[start..])
            .ok_or(LexError::UnterminatedString { position: start })?;
        let body = self.bytes[start + 1..start + close].to_vec();
        self.position = start + close + 1;
        let span = ByteSpan::new(start, self.position);
        let text = self.text(span);
        self.push_token(Token::with_payload(
            TokenKind::String,
            text,
            span,
            Payload::Str(StringLit { parts: vec![StrPart::Literal(body)], interpolates: false }),
        ));
        self.mode = LexerMode::ExpectTerm;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn kinds(src: &str) -> Vec<TokenKind> {
        PerlLexer::new(src)
            .tokenize()
            .unwrap()
            .into_iter()
            .filter(|t| !t.is_trivia())
            .map(|t| t.kind)
            .collect()
    }

    fn tokens(src: &str) -> Vec<Token> {
        PerlLexer::new(src)
            .tokenize()
            .unwrap()
            .into_iter()
            .filter(|t| !t.is_trivia())
            .collect()
    }

    #[test]
    fn basic_declaration() {
        assert_eq!(
            kinds("my $x = 42;"),
            vec![
                TokenKind::My,
                TokenKind::ScalarSigil,
                TokenKind::Identifier,
                TokenKind::Assign,
                TokenKind::Number,
                TokenKind::Semicolon,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn slash_disambiguation() {
        // Division after a term.
        assert!(kinds("$x / 2").contains(&TokenKind::Slash));
        // Regex in term position.
        let toks = tokens("if (/abc/) { }");
        assert!(toks.iter().any(|t| t.kind == TokenKind::Regex));
        // split gets a regex even though an identifier precedes.
        let toks = tokens("split /,/, $s");
        assert!(toks.iter().any(|t| t.kind == TokenKind::Regex));
    }

    #[test]
    fn defined_or_vs_empty_match() {
        assert!(kinds("$x // 5").contains(&TokenKind::DefinedOr));
        assert!(kinds("$x //= 5").contains(&TokenKind::DefinedOrAssign));
    }

    #[test]
    fn percent_sigil_vs_modulo() {
        let toks = tokens("%h = (); $x % 3;");
        assert_eq!(toks[0].kind, TokenKind::HashSigil);
        assert!(toks.iter().any(|t| t.kind == TokenKind::Percent));
    }

    #[test]
    fn word_operators_need_operator_position() {
        let toks = tokens("$a x 3");
        assert_eq!(toks[2].kind, TokenKind::Repeat);
        let toks = tokens("$a eq $b");
        assert_eq!(toks[2].kind, TokenKind::StrEq);
        // In term position `x` is a plain identifier.
        let toks = tokens("my $x = x();");
        assert!(toks.iter().any(|t| t.kind == TokenKind::Identifier && &*t.text == "x"));
    }

    #[test]
    fn interpolated_string_payload() {
        let toks = tokens(r#"print "v=$x\n";"#);
        let tok = toks.iter().find(|t| t.kind == TokenKind::String).unwrap();
        let Payload::Str(lit) = &tok.payload else { panic!("no payload") };
        assert!(lit.interpolates);
        assert_eq!(
            lit.parts,
            vec![
                StrPart::Literal(b"v=".to_vec()),
                StrPart::Expr("$x".to_string()),
                StrPart::Literal(b"\n".to_vec()),
            ]
        );
    }

    #[test]
    fn single_quotes_do_not_interpolate() {
        let toks = tokens(r"print 'a$x\n';");
        let tok = toks.iter().find(|t| t.kind == TokenKind::String).unwrap();
        let Payload::Str(lit) = &tok.payload else { panic!("no payload") };
        assert!(!lit.interpolates);
        assert_eq!(lit.parts, vec![StrPart::Literal(br"a$x\n".to_vec())]);
    }

    #[test]
    fn heredoc_body_patched() {
        let src = "my $t = <<EOF;\nline one\nline $x\nEOF\nprint $t;";
        let toks = tokens(src);
        let hd = toks.iter().find(|t| t.kind == TokenKind::Heredoc).unwrap();
        let Payload::Str(lit) = &hd.payload else { panic!("heredoc not patched") };
        assert!(lit.interpolates);
        assert_eq!(lit.parts[0], StrPart::Literal(b"line one\nline ".to_vec()));
        assert_eq!(lit.parts[1], StrPart::Expr("$x".to_string()));
        // Scanning resumed after the terminator.
        assert!(toks.iter().any(|t| t.kind == TokenKind::Identifier && &*t.text == "print"));
    }

    #[test]
    fn two_heredocs_fifo() {
        let src = "print <<A, <<B;\nfirst\nA\nsecond\nB\n";
        let toks = tokens(src);
        let heredocs: Vec<_> = toks.iter().filter(|t| t.kind == TokenKind::Heredoc).collect();
        assert_eq!(heredocs.len(), 2);
        let Payload::Str(a) = &heredocs[0].payload else { panic!() };
        let Payload::Str(b) = &heredocs[1].payload else { panic!() };
        assert_eq!(a.as_literal(), Some(b"first\n".to_vec()));
        assert_eq!(b.as_literal(), Some(b"second\n".to_vec()));
    }

    #[test]
    fn indented_heredoc_with_quotes() {
        let src = "my $t = <<~'EOT';\n    body\n    EOT\n";
        let toks = tokens(src);
        let hd = toks.iter().find(|t| t.kind == TokenKind::Heredoc).unwrap();
        let Payload::Str(lit) = &hd.payload else { panic!() };
        assert!(!lit.interpolates);
        assert_eq!(lit.as_literal(), Some(b"body\n".to_vec()));
    }

    #[test]
    fn unterminated_heredoc_errors() {
        let err = PerlLexer::new("my $t = <<EOF;\nno end").tokenize().unwrap_err();
        assert!(matches!(err, LexError::UnterminatedHeredoc { .. }));
    }

    #[test]
    fn quote_operators() {
        let toks = tokens("q(a b); qq{x $y}; qw/one two/;");
        let strings: Vec<_> = toks.iter().filter(|t| t.kind == TokenKind::String).collect();
        assert_eq!(strings.len(), 2);
        let qw = toks.iter().find(|t| t.kind == TokenKind::QuoteWords).unwrap();
        assert_eq!(qw.payload, Payload::Words(vec!["one".into(), "two".into()]));
    }

    #[test]
    fn substitution_and_flags() {
        let toks = tokens("s/foo/bar/gi;");
        let tok = toks.iter().find(|t| t.kind == TokenKind::Regex).unwrap();
        let Payload::Regex(lit) = &tok.payload else { panic!() };
        assert_eq!(lit.op, RegexOp::Subst);
        assert!(lit.flags.global && lit.flags.ignore_case);
        assert!(lit.replacement.is_some());
    }

    #[test]
    fn transliteration() {
        let toks = tokens("tr/a-z/A-Z/;");
        let tok = toks.iter().find(|t| t.kind == TokenKind::Regex).unwrap();
        let Payload::Regex(lit) = &tok.payload else { panic!() };
        assert_eq!(lit.op, RegexOp::Trans);
        assert_eq!(lit.pattern.as_literal(), Some(b"a-z".to_vec()));
    }

    #[test]
    fn labels_and_ternary_colons() {
        let toks = tokens("OUTER: while (1) { last OUTER; }");
        assert_eq!(toks[0].kind, TokenKind::Label);
        assert_eq!(&*toks[0].text, "OUTER");
        // No label inside a ternary.
        let toks = tokens("$x ? a : b");
        assert!(!toks.iter().any(|t| t.kind == TokenKind::Label));
    }

    #[test]
    fn prototype_lexes_as_string() {
        let toks = tokens("sub max ($$) { }");
        assert_eq!(toks[0].kind, TokenKind::Sub);
        assert_eq!(toks[1].kind, TokenKind::Identifier);
        assert_eq!(toks[2].kind, TokenKind::String);
        let Payload::Str(lit) = &toks[2].payload else { panic!() };
        assert_eq!(lit.as_literal(), Some(b"$$".to_vec()));
    }

    #[test]
    fn readline_forms() {
        assert!(kinds("while (<>) { }").contains(&TokenKind::Readline));
        assert!(kinds("my $l = <STDIN>;").contains(&TokenKind::Readline));
        let toks = tokens("my $l = <$fh>;");
        assert!(toks.iter().any(|t| t.kind == TokenKind::Readline && &*t.text == "<$fh>"));
    }

    #[test]
    fn special_variables() {
        let toks = tokens("$_; $0; $1; $@; @ARGV; %ENV; $#list;");
        let names: Vec<&str> = toks
            .iter()
            .filter(|t| t.kind == TokenKind::Identifier)
            .map(|t| &*t.text)
            .collect();
        assert_eq!(names, vec!["_", "0", "1", "@", "ARGV", "ENV", "list"]);
        assert!(toks.iter().any(|t| t.kind == TokenKind::ScalarSigil && &*t.text == "$#"));
    }

    #[test]
    fn pod_is_comment() {
        let src = "=head1 NAME\n\ntext\n\n=cut\nmy $x;";
        let toks = tokens(src);
        assert_eq!(toks[0].kind, TokenKind::My);
    }

    #[test]
    fn end_marker_stops() {
        let toks = tokens("my $x;\n__END__\nthis is not code ((((");
        assert_eq!(*toks.last().map(|t| t.kind).as_ref().unwrap(), TokenKind::Eof);
        assert!(!toks.iter().any(|t| t.kind == TokenKind::LeftParen));
    }

    #[test]
    fn arrow_and_fat_arrow() {
        assert!(kinds("$h->{k}").contains(&TokenKind::Arrow));
        assert!(kinds("(a => 1)").contains(&TokenKind::FatArrow));
    }

    #[test]
    fn shift_vs_heredoc() {
        // Operator position: numeric shift.
        assert!(kinds("$x << 2").contains(&TokenKind::LeftShift));
        // Term position with a tag: heredoc.
        assert!(kinds("my $t = <<X;\nbody\nX\n").contains(&TokenKind::Heredoc));
    }
}
