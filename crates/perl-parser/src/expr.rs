//! Pratt expression parsing.
//!
//! Binding powers encode the precedence table: higher binds tighter,
//! right-associative operators get a left power above their right power.
//! Postfix subscripts, arrows, and `++`/`--` bind tightest and are handled
//! structurally before the infix loop.

use crate::{Parser, LIST_FUNCS, NAMED_UNARY};
use perl_ast::{
    AssignOp, BinOp, DeclKind, GotoTarget, LogicalOp, LoopControlOp, MapOp, MethodName, Node,
    NodeKind, OutputStream, Sigil, SliceKind, StringPiece, UnaryOp,
};
use perl_error::{ParseError, ParseResult};
use perl_position_tracking::ByteSpan;
use perl_token::{Payload, TokenKind};

// Binding powers, loosest to tightest. Right-associative operators are
// encoded by a right power below the left one.
const BP_WORD_OR: (u8, u8) = (1, 2);
const BP_WORD_AND: (u8, u8) = (3, 4);
pub(crate) const BP_WORD_NOT_ARG: u8 = 8;
const BP_COMMA: (u8, u8) = (7, 8);
pub(crate) const BP_LIST_ELEM: u8 = 8;
const BP_ASSIGN: (u8, u8) = (12, 11);
/// Declaration targets bind just above assignment so `my $x = 5` folds.
pub(crate) const BP_DECL_TARGET: u8 = 13;
const BP_TERNARY: u8 = 14;
const BP_TERNARY_RHS: u8 = 13;
const BP_RANGE: (u8, u8) = (15, 16);
const BP_OROP: (u8, u8) = (17, 18);
const BP_ANDOP: (u8, u8) = (19, 20);
const BP_BITOR: (u8, u8) = (21, 22);
const BP_BITAND: (u8, u8) = (23, 24);
const BP_EQUALITY: (u8, u8) = (25, 26);
const BP_RELATIONAL: (u8, u8) = (27, 28);
/// Named unary operators take their argument above comparisons.
pub(crate) const BP_NAMED_UNARY_ARG: u8 = 31;
const BP_SHIFT: (u8, u8) = (31, 32);
const BP_ADDITIVE: (u8, u8) = (33, 34);
const BP_MULTIPLICATIVE: (u8, u8) = (35, 36);
const BP_MATCHBIND: (u8, u8) = (37, 38);
pub(crate) const BP_UNARY: u8 = 39;
const BP_POWER: (u8, u8) = (42, 41);
const BP_INCDEC_POSTFIX: u8 = 43;

enum Infix {
    Binary(BinOp, (u8, u8)),
    Logical(LogicalOp, (u8, u8)),
    Assign,
    Compound(AssignOp),
    Range { exclusive: bool },
    MatchBind { negated: bool },
    Ternary,
    Comma,
}

fn infix(kind: TokenKind) -> Option<Infix> {
    use TokenKind as K;
    Some(match kind {
        K::Plus => Infix::Binary(BinOp::Add, BP_ADDITIVE),
        K::Minus => Infix::Binary(BinOp::Sub, BP_ADDITIVE),
        K::Dot => Infix::Binary(BinOp::Concat, BP_ADDITIVE),
        K::Star => Infix::Binary(BinOp::Mul, BP_MULTIPLICATIVE),
        K::Slash => Infix::Binary(BinOp::Div, BP_MULTIPLICATIVE),
        K::Percent => Infix::Binary(BinOp::Mod, BP_MULTIPLICATIVE),
        K::Repeat => Infix::Binary(BinOp::Repeat, BP_MULTIPLICATIVE),
        K::Power => Infix::Binary(BinOp::Pow, BP_POWER),
        K::LeftShift => Infix::Binary(BinOp::Shl, BP_SHIFT),
        K::RightShift => Infix::Binary(BinOp::Shr, BP_SHIFT),
        K::BitwiseAnd => Infix::Binary(BinOp::BitAnd, BP_BITAND),
        K::BitwiseOr => Infix::Binary(BinOp::BitOr, BP_BITOR),
        K::BitwiseXor => Infix::Binary(BinOp::BitXor, BP_BITOR),
        K::Equal => Infix::Binary(BinOp::NumEq, BP_EQUALITY),
        K::NotEqual => Infix::Binary(BinOp::NumNe, BP_EQUALITY),
        K::Spaceship => Infix::Binary(BinOp::NumCmp, BP_EQUALITY),
        K::StrEq => Infix::Binary(BinOp::StrEq, BP_EQUALITY),
        K::StrNe => Infix::Binary(BinOp::StrNe, BP_EQUALITY),
        K::StringCompare => Infix::Binary(BinOp::StrCmp, BP_EQUALITY),
        K::Less => Infix::Binary(BinOp::NumLt, BP_RELATIONAL),
        K::Greater => Infix::Binary(BinOp::NumGt, BP_RELATIONAL),
        K::LessEqual => Infix::Binary(BinOp::NumLe, BP_RELATIONAL),
        K::GreaterEqual => Infix::Binary(BinOp::NumGe, BP_RELATIONAL),
        K::StrLt => Infix::Binary(BinOp::StrLt, BP_RELATIONAL),
        K::StrGt => Infix::Binary(BinOp::StrGt, BP_RELATIONAL),
        K::StrLe => Infix::Binary(BinOp::StrLe, BP_RELATIONAL),
        K::StrGe => Infix::Binary(BinOp::StrGe, BP_RELATIONAL),
        K::And => Infix::Logical(LogicalOp::And, BP_ANDOP),
        K::Or => Infix::Logical(LogicalOp::Or, BP_OROP),
        K::DefinedOr => Infix::Logical(LogicalOp::DefinedOr, BP_OROP),
        K::WordAnd => Infix::Logical(LogicalOp::And, BP_WORD_AND),
        K::WordOr => Infix::Logical(LogicalOp::Or, BP_WORD_OR),
        K::WordXor => Infix::Logical(LogicalOp::Xor, BP_WORD_OR),
        K::Assign => Infix::Assign,
        K::PlusAssign => Infix::Compound(AssignOp::Bin(BinOp::Add)),
        K::MinusAssign => Infix::Compound(AssignOp::Bin(BinOp::Sub)),
        K::StarAssign => Infix::Compound(AssignOp::Bin(BinOp::Mul)),
        K::SlashAssign => Infix::Compound(AssignOp::Bin(BinOp::Div)),
        K::PercentAssign => Infix::Compound(AssignOp::Bin(BinOp::Mod)),
        K::DotAssign => Infix::Compound(AssignOp::Bin(BinOp::Concat)),
        K::RepeatAssign => Infix::Compound(AssignOp::Bin(BinOp::Repeat)),
        K::PowerAssign => Infix::Compound(AssignOp::Bin(BinOp::Pow)),
        K::AndAssign => Infix::Compound(AssignOp::Bin(BinOp::BitAnd)),
        K::OrAssign => Infix::Compound(AssignOp::Bin(BinOp::BitOr)),
        K::XorAssign => Infix::Compound(AssignOp::Bin(BinOp::BitXor)),
        K::LeftShiftAssign => Infix::Compound(AssignOp::Bin(BinOp::Shl)),
        K::RightShiftAssign => Infix::Compound(AssignOp::Bin(BinOp::Shr)),
        K::LogicalAndAssign => Infix::Compound(AssignOp::And),
        K::LogicalOrAssign => Infix::Compound(AssignOp::Or),
        K::DefinedOrAssign => Infix::Compound(AssignOp::DefinedOr),
        K::Range => Infix::Range { exclusive: false },
        K::Ellipsis => Infix::Range { exclusive: true },
        K::Match => Infix::MatchBind { negated: false },
        K::NotMatch => Infix::MatchBind { negated: true },
        K::Question => Infix::Ternary,
        K::Comma | K::FatArrow => Infix::Comma,
        _ => return None,
    })
}

fn infix_left_bp(op: &Infix) -> u8 {
    match op {
        Infix::Binary(_, bp) | Infix::Logical(_, bp) => bp.0,
        Infix::Assign | Infix::Compound(_) => BP_ASSIGN.0,
        Infix::Range { .. } => BP_RANGE.0,
        Infix::MatchBind { .. } => BP_MATCHBIND.0,
        Infix::Ternary => BP_TERNARY,
        Infix::Comma => BP_COMMA.0,
    }
}

/// Whether a token can begin a term.
pub(crate) fn starts_term(kind: TokenKind) -> bool {
    use TokenKind as K;
    matches!(
        kind,
        K::Number
            | K::String
            | K::QuoteWords
            | K::Heredoc
            | K::Regex
            | K::Readline
            | K::Identifier
            | K::ScalarSigil
            | K::ArraySigil
            | K::HashSigil
            | K::SubSigil
            | K::GlobSigil
            | K::LeftParen
            | K::LeftBracket
            | K::LeftBrace
            | K::Backslash
            | K::Minus
            | K::Plus
            | K::Not
            | K::BitwiseNot
            | K::Increment
            | K::Decrement
            | K::My
            | K::Our
            | K::Local
            | K::State
            | K::Sub
            | K::Eval
            | K::Do
            | K::Undef
            | K::Wantarray
            | K::WordNot
            | K::Return
            | K::Next
            | K::Last
            | K::Redo
            | K::Goto
    )
}

impl Parser {
    /// Full expression, comma included: `1, 2, 3` parses to a [`NodeKind::List`].
    pub(crate) fn parse_expr(&mut self) -> ParseResult<Node> {
        self.parse_expr_bp(0)
    }

    /// Expression without a top-level comma (one list element).
    pub(crate) fn parse_assign(&mut self) -> ParseResult<Node> {
        self.parse_expr_bp(BP_LIST_ELEM)
    }

    pub(crate) fn parse_expr_bp(&mut self, min_bp: u8) -> ParseResult<Node> {
        self.enter_depth()?;
        let result = self.parse_expr_bp_inner(min_bp);
        self.leave_depth();
        result
    }

    fn parse_expr_bp_inner(&mut self, min_bp: u8) -> ParseResult<Node> {
        let start = self.stream.span();
        let mut lhs = self.parse_prefix()?;
        lhs = self.parse_postfix(lhs, min_bp)?;

        loop {
            let Some(op) = infix(self.stream.kind()) else { break };
            if infix_left_bp(&op) < min_bp {
                break;
            }
            match op {
                Infix::Binary(bin, bp) => {
                    self.stream.next();
                    let rhs = self.parse_expr_bp(bp.1)?;
                    lhs = self.node_from(start, NodeKind::Binary {
                        op: bin,
                        lhs: Box::new(lhs),
                        rhs: Box::new(rhs),
                    });
                }
                Infix::Logical(log, bp) => {
                    self.stream.next();
                    let rhs = self.parse_expr_bp(bp.1)?;
                    lhs = self.node_from(start, NodeKind::Logical {
                        op: log,
                        lhs: Box::new(lhs),
                        rhs: Box::new(rhs),
                    });
                }
                Infix::Assign => {
                    self.stream.next();
                    let rhs = self.parse_expr_bp(BP_ASSIGN.1)?;
                    lhs = self.build_assign(start, lhs, rhs);
                }
                Infix::Compound(aop) => {
                    self.stream.next();
                    let rhs = self.parse_expr_bp(BP_ASSIGN.1)?;
                    lhs = self.node_from(start, NodeKind::CompoundAssign {
                        op: aop,
                        target: Box::new(lhs),
                        value: Box::new(rhs),
                    });
                }
                Infix::Range { exclusive } => {
                    self.stream.next();
                    let rhs = self.parse_expr_bp(BP_RANGE.1)?;
                    lhs = self.node_from(start, NodeKind::Range {
                        from: Box::new(lhs),
                        to: Box::new(rhs),
                        exclusive,
                    });
                }
                Infix::MatchBind { negated } => {
                    self.stream.next();
                    let rhs = self.parse_expr_bp(BP_MATCHBIND.1)?;
                    lhs = self.node_from(start, NodeKind::MatchBind {
                        target: Box::new(lhs),
                        regex: Box::new(rhs),
                        negated,
                    });
                }
                Infix::Ternary => {
                    self.stream.next();
                    let if_true = self.parse_expr_bp(BP_LIST_ELEM)?;
                    self.stream.expect(TokenKind::Colon, "':'")?;
                    let if_false = self.parse_expr_bp(BP_TERNARY_RHS)?;
                    lhs = self.node_from(start, NodeKind::Ternary {
                        cond: Box::new(lhs),
                        if_true: Box::new(if_true),
                        if_false: Box::new(if_false),
                    });
                }
                Infix::Comma => {
                    let mut elements = vec![lhs];
                    while matches!(self.stream.kind(), TokenKind::Comma | TokenKind::FatArrow) {
                        self.stream.next();
                        if !starts_term(self.stream.kind()) {
                            break; // trailing comma
                        }
                        elements.push(self.parse_expr_bp(BP_COMMA.1)?);
                    }
                    lhs = self.node_from(start, NodeKind::List { elements });
                }
            }
        }
        Ok(lhs)
    }

    /// `my $x = 5` arrives as `Assign { VarDecl, value }`; fold the value
    /// into the declaration so there is one canonical shape.
    fn build_assign(&self, start: ByteSpan, lhs: Node, rhs: Node) -> Node {
        if let NodeKind::VarDecl { kind, target, init: None } = lhs.kind {
            let mut node = self.node_from(start, NodeKind::VarDecl {
                kind,
                target,
                init: Some(Box::new(rhs)),
            });
            node.anns = lhs.anns;
            return node;
        }
        self.node_from(start, NodeKind::Assign { target: Box::new(lhs), value: Box::new(rhs) })
    }

    // ===== prefix =====

    fn parse_prefix(&mut self) -> ParseResult<Node> {
        use TokenKind as K;
        let start = self.stream.span();
        match self.stream.kind() {
            K::Number => {
                let tok = self.stream.next();
                let kind = match tok.payload {
                    Payload::Num(perl_token::NumberLit::Int(v)) => NodeKind::IntLiteral { value: v },
                    Payload::Num(perl_token::NumberLit::Float(v)) => {
                        NodeKind::FloatLiteral { value: v }
                    }
                    _ => NodeKind::IntLiteral { value: 0 },
                };
                Ok(self.node_from(start, kind))
            }
            K::String | K::Heredoc => {
                let tok = self.stream.next();
                let Payload::Str(lit) = tok.payload else {
                    return Err(ParseError::UnexpectedToken {
                        found: "string without payload".into(),
                        expected: "string literal".into(),
                        position: tok.span.start,
                    });
                };
                let pieces = self.convert_parts(&lit.parts)?;
                Ok(self.node_from(start, NodeKind::StringLiteral {
                    pieces,
                    interpolates: lit.interpolates,
                }))
            }
            K::QuoteWords => {
                let tok = self.stream.next();
                let Payload::Words(words) = tok.payload else {
                    return Err(self.stream.unexpected("word list"));
                };
                Ok(self.node_from(start, NodeKind::QwList { words }))
            }
            K::Regex => {
                let tok = self.stream.next();
                let regex = self.convert_regex(&tok)?;
                Ok(self.node_from(start, NodeKind::RegexLiteral { regex }))
            }
            K::Readline => {
                let tok = self.stream.next();
                let inner = tok.text.trim_start_matches('<').trim_end_matches('>').to_string();
                Ok(self.node_from(start, NodeKind::Readline { handle: inner }))
            }
            K::Undef => {
                self.stream.next();
                if starts_term(self.stream.kind()) {
                    let arg = self.parse_expr_bp(BP_NAMED_UNARY_ARG)?;
                    Ok(self.node_from(start, NodeKind::FuncCall {
                        name: "undef".into(),
                        args: vec![arg],
                    }))
                } else {
                    Ok(self.node_from(start, NodeKind::UndefLiteral))
                }
            }
            K::Wantarray => {
                self.stream.next();
                Ok(self.node_from(start, NodeKind::Wantarray))
            }
            K::ScalarSigil | K::ArraySigil | K::HashSigil | K::SubSigil | K::GlobSigil => {
                let tok = self.stream.next();
                let var = self.parse_variable(&tok)?;
                // `&name` and `&$code` are calls.
                if tok.kind == K::SubSigil {
                    return self.finish_amp_call(start, var);
                }
                Ok(var)
            }
            K::LeftParen => {
                self.stream.next();
                if self.stream.eat(K::RightParen) {
                    return Ok(self.node_from(start, NodeKind::List { elements: vec![] }));
                }
                let inner = self.parse_expr()?;
                self.stream.expect(K::RightParen, "')'")?;
                Ok(inner)
            }
            K::LeftBracket => {
                self.stream.next();
                let elements = self.parse_comma_elements(K::RightBracket)?;
                self.stream.expect(K::RightBracket, "']'")?;
                Ok(self.node_from(start, NodeKind::AnonArray { elements }))
            }
            K::LeftBrace => {
                self.stream.next();
                let elements = self.parse_comma_elements(K::RightBrace)?;
                self.stream.expect(K::RightBrace, "'}'")?;
                Ok(self.node_from(start, NodeKind::AnonHash { elements }))
            }
            K::Backslash => {
                self.stream.next();
                // `\&f` is a code reference, not a call of f.
                if self.stream.at(K::SubSigil) {
                    let tok = self.stream.next();
                    let var = self.parse_variable(&tok)?;
                    return Ok(self.node_from(start, NodeKind::RefTake { operand: Box::new(var) }));
                }
                let operand = self.parse_expr_bp(BP_UNARY)?;
                Ok(self.node_from(start, NodeKind::RefTake { operand: Box::new(operand) }))
            }
            K::Minus => {
                self.stream.next();
                // `-bareword =>` is the string "-bareword"; check before
                // the bareword's own autoquote fires.
                if self.stream.at(K::Identifier) && self.stream.peek2().kind == K::FatArrow {
                    let word = self.stream.next().text.to_string();
                    return Ok(self.node_from(start, NodeKind::StringLiteral {
                        pieces: vec![StringPiece::Literal(format!("-{word}").into_bytes())],
                        interpolates: false,
                    }));
                }
                let operand = self.parse_expr_bp(BP_UNARY)?;
                // Constant folding keeps negative literals simple.
                match operand.kind {
                    NodeKind::IntLiteral { value } => {
                        Ok(self.node_from(start, NodeKind::IntLiteral { value: -value }))
                    }
                    NodeKind::FloatLiteral { value } => {
                        Ok(self.node_from(start, NodeKind::FloatLiteral { value: -value }))
                    }
                    _ => Ok(self.node_from(start, NodeKind::Unary {
                        op: UnaryOp::Neg,
                        operand: Box::new(operand),
                    })),
                }
            }
            K::Plus => {
                // Unary plus is a no-op disambiguator.
                self.stream.next();
                self.parse_expr_bp(BP_UNARY)
            }
            K::Not => {
                self.stream.next();
                let operand = self.parse_expr_bp(BP_UNARY)?;
                Ok(self.node_from(start, NodeKind::Unary {
                    op: UnaryOp::Not,
                    operand: Box::new(operand),
                }))
            }
            K::WordNot => {
                self.stream.next();
                let operand = self.parse_expr_bp(BP_WORD_NOT_ARG)?;
                Ok(self.node_from(start, NodeKind::Unary {
                    op: UnaryOp::Not,
                    operand: Box::new(operand),
                }))
            }
            K::BitwiseNot => {
                self.stream.next();
                let operand = self.parse_expr_bp(BP_UNARY)?;
                Ok(self.node_from(start, NodeKind::Unary {
                    op: UnaryOp::BitNot,
                    operand: Box::new(operand),
                }))
            }
            K::Increment | K::Decrement => {
                let dec = self.stream.next().kind == K::Decrement;
                let target = self.parse_expr_bp(BP_INCDEC_POSTFIX)?;
                Ok(self.node_from(start, NodeKind::IncDec {
                    dec,
                    postfix: false,
                    target: Box::new(target),
                }))
            }
            K::My | K::Our | K::Local | K::State => self.parse_decl(),
            K::Sub => {
                self.stream.next();
                let proto = self.try_prototype();
                let body = self.parse_block()?;
                Ok(self.node_from(start, NodeKind::AnonSub { proto, body: Box::new(body) }))
            }
            K::Eval => {
                self.stream.next();
                if self.stream.at(K::LeftBrace) {
                    let body = self.parse_block()?;
                    Ok(self.node_from(start, NodeKind::EvalBlock { body: Box::new(body) }))
                } else {
                    let expr = self.parse_expr_bp(BP_NAMED_UNARY_ARG)?;
                    Ok(self.node_from(start, NodeKind::EvalString { expr: Box::new(expr) }))
                }
            }
            K::Do => {
                self.stream.next();
                if self.stream.at(K::LeftBrace) {
                    let body = self.parse_block()?;
                    Ok(self.node_from(start, NodeKind::DoBlock { body: Box::new(body) }))
                } else {
                    Err(self.stream.unexpected("block after 'do'"))
                }
            }
            K::Return => {
                self.stream.next();
                let value = if starts_term(self.stream.kind()) {
                    Some(Box::new(self.parse_expr()?))
                } else {
                    None
                };
                Ok(self.node_from(start, NodeKind::Return { value }))
            }
            K::Next | K::Last | K::Redo => {
                let op = match self.stream.next().kind {
                    K::Next => LoopControlOp::Next,
                    K::Last => LoopControlOp::Last,
                    _ => LoopControlOp::Redo,
                };
                let label = if self.stream.at(K::Identifier) {
                    Some(self.stream.next().text.to_string())
                } else {
                    None
                };
                Ok(self.node_from(start, NodeKind::LoopControl { op, label }))
            }
            K::Goto => {
                self.stream.next();
                if self.stream.at(K::SubSigil) {
                    let tok = self.stream.next();
                    let target = self.parse_variable(&tok)?;
                    // `goto &name` resolves the named sub; `goto &$code`
                    // evaluates the expression.
                    let sub = match &target.kind {
                        NodeKind::Variable { sigil: Sigil::Code, .. } | NodeKind::Deref { .. } => {
                            target
                        }
                        _ => return Err(self.stream.unexpected("subroutine after 'goto &'")),
                    };
                    Ok(self.node_from(start, NodeKind::GotoStmt {
                        target: GotoTarget::Sub(Box::new(sub)),
                    }))
                } else if self.stream.at(K::Identifier) {
                    let label = self.stream.next().text.to_string();
                    Ok(self.node_from(start, NodeKind::GotoStmt {
                        target: GotoTarget::Label(label),
                    }))
                } else {
                    Err(self.stream.unexpected("label or &sub after 'goto'"))
                }
            }
            K::Identifier => self.parse_bareword_term(),
            _ => Err(self.stream.unexpected("expression")),
        }
    }

    // ===== barewords, builtins, calls =====

    fn parse_bareword_term(&mut self) -> ParseResult<Node> {
        use TokenKind as K;
        let start = self.stream.span();
        let word = self.stream.peek().text.to_string();

        // `IDENT =>` autoquotes.
        if self.stream.peek2().kind == K::FatArrow {
            self.stream.next();
            return Ok(self.node_from(start, NodeKind::StringLiteral {
                pieces: vec![StringPiece::Literal(word.into_bytes())],
                interpolates: false,
            }));
        }

        match word.as_str() {
            "print" | "say" => return self.parse_print(false),
            "printf" => return self.parse_print(true),
            "sort" => return self.parse_sort(),
            "map" => return self.parse_map_grep(MapOp::Map),
            "grep" => return self.parse_map_grep(MapOp::Grep),
            _ => {}
        }

        self.stream.next();

        // Class name in `Foo->method`.
        if self.stream.at(K::Arrow) {
            return Ok(self.node_from(start, NodeKind::Bareword { word }));
        }

        if self.stream.eat(K::LeftParen) {
            let args = self.parse_comma_elements(K::RightParen)?;
            self.stream.expect(K::RightParen, "')'")?;
            return Ok(self.node_from(start, NodeKind::FuncCall { name: word, args }));
        }

        if NAMED_UNARY.contains(&word.as_str()) {
            let args = if starts_term(self.stream.kind()) {
                vec![self.parse_expr_bp(BP_NAMED_UNARY_ARG)?]
            } else {
                vec![]
            };
            return Ok(self.node_from(start, NodeKind::FuncCall { name: word, args }));
        }

        if LIST_FUNCS.contains(&word.as_str()) || starts_term(self.stream.kind()) {
            let args = self.parse_list_op_args()?;
            return Ok(self.node_from(start, NodeKind::FuncCall { name: word, args }));
        }

        Ok(self.node_from(start, NodeKind::Bareword { word }))
    }

    /// Arguments of a parenless list operator: elements to the statement
    /// boundary or a statement modifier.
    fn parse_list_op_args(&mut self) -> ParseResult<Vec<Node>> {
        let mut args = Vec::new();
        loop {
            if !starts_term(self.stream.kind()) {
                break;
            }
            args.push(self.parse_assign()?);
            if !matches!(self.stream.kind(), TokenKind::Comma | TokenKind::FatArrow) {
                break;
            }
            self.stream.next();
        }
        Ok(args)
    }

    fn parse_print(&mut self, is_printf: bool) -> ParseResult<Node> {
        use TokenKind as K;
        let start = self.stream.span();
        let word = self.stream.next().text.to_string();
        let say = word == "say";

        let mut stream_target = OutputStream::Stdout;
        if self.stream.at(K::Identifier) {
            let fh = self.stream.peek().text.to_string();
            if (fh == "STDERR" || fh == "STDOUT")
                && self.stream.peek2().kind != K::Comma
                && self.stream.peek2().kind != K::Arrow
            {
                self.stream.next();
                if fh == "STDERR" {
                    stream_target = OutputStream::Stderr;
                }
            }
        }

        // Parenthesized or bare argument list.
        let args = if self.stream.eat(K::LeftParen) {
            let args = self.parse_comma_elements(K::RightParen)?;
            self.stream.expect(K::RightParen, "')'")?;
            args
        } else {
            self.parse_list_op_args()?
        };

        if is_printf {
            // printf is sprintf + print.
            return Ok(self.node_from(start, NodeKind::Print {
                stream: stream_target,
                args: vec![self.node_from(start, NodeKind::FuncCall {
                    name: "sprintf".into(),
                    args,
                })],
                say: false,
            }));
        }
        Ok(self.node_from(start, NodeKind::Print { stream: stream_target, args, say }))
    }

    fn parse_sort(&mut self) -> ParseResult<Node> {
        use TokenKind as K;
        let start = self.stream.span();
        self.stream.next();
        let comparator = if self.stream.at(K::LeftBrace) {
            Some(Box::new(self.parse_block()?))
        } else {
            None
        };
        let args = if self.stream.eat(K::LeftParen) {
            let args = self.parse_comma_elements(K::RightParen)?;
            self.stream.expect(K::RightParen, "')'")?;
            args
        } else {
            self.parse_list_op_args()?
        };
        Ok(self.node_from(start, NodeKind::SortCall { comparator, args }))
    }

    fn parse_map_grep(&mut self, op: MapOp) -> ParseResult<Node> {
        use TokenKind as K;
        let start = self.stream.span();
        self.stream.next();
        let (body, args) = if self.stream.at(K::LeftBrace) {
            let body = self.parse_block()?;
            // No comma between block and list.
            self.stream.eat(K::Comma);
            (body, self.parse_list_op_args()?)
        } else {
            let paren = self.stream.eat(K::LeftParen);
            let body = self.parse_assign()?;
            if paren {
                self.stream.expect(K::RightParen, "')'")?;
            }
            self.stream.expect(K::Comma, "',' after map/grep expression")?;
            (body, self.parse_list_op_args()?)
        };
        Ok(self.node_from(start, NodeKind::MapGrep { op, body: Box::new(body), args }))
    }

    fn finish_amp_call(&mut self, start: ByteSpan, var: Node) -> ParseResult<Node> {
        use TokenKind as K;
        let args = if self.stream.eat(K::LeftParen) {
            let args = self.parse_comma_elements(K::RightParen)?;
            self.stream.expect(K::RightParen, "')'")?;
            args
        } else {
            vec![]
        };
        match var.kind {
            NodeKind::Variable { sigil: Sigil::Code, name } => {
                Ok(self.node_from(start, NodeKind::FuncCall { name, args }))
            }
            _ => Ok(self.node_from(start, NodeKind::CallCode { code: Box::new(var), args })),
        }
    }

    // ===== variables =====

    pub(crate) fn parse_variable(&mut self, sigil_tok: &perl_token::Token) -> ParseResult<Node> {
        use TokenKind as K;
        let start = sigil_tok.span;
        let sigil = match sigil_tok.kind {
            K::ScalarSigil if &*sigil_tok.text == "$#" => Sigil::ArrayLast,
            K::ScalarSigil => Sigil::Scalar,
            K::ArraySigil => Sigil::Array,
            K::HashSigil => Sigil::Hash,
            K::SubSigil => Sigil::Code,
            _ => Sigil::Glob,
        };

        match self.stream.kind() {
            K::Identifier => {
                let name = self.stream.next().text.to_string();
                Ok(self.node_from(start, NodeKind::Variable { sigil, name }))
            }
            K::LeftBrace => {
                // ${name} names; ${EXPR} derefs.
                if self.stream.peek2().kind == K::Identifier
                    && self.stream.at_offset(2).kind == K::RightBrace
                {
                    self.stream.next();
                    let name = self.stream.next().text.to_string();
                    self.stream.next();
                    return Ok(self.node_from(start, NodeKind::Variable { sigil, name }));
                }
                self.stream.next();
                let expr = self.parse_expr()?;
                self.stream.expect(K::RightBrace, "'}'")?;
                Ok(self.node_from(start, NodeKind::Deref { sigil, expr: Box::new(expr) }))
            }
            K::ScalarSigil => {
                let tok = self.stream.next();
                let inner = self.parse_variable(&tok)?;
                Ok(self.node_from(start, NodeKind::Deref { sigil, expr: Box::new(inner) }))
            }
            _ => Err(self.stream.unexpected("variable name")),
        }
    }

    // ===== postfix: subscripts, arrows, ++/-- =====

    fn parse_postfix(&mut self, mut lhs: Node, min_bp: u8) -> ParseResult<Node> {
        use TokenKind as K;
        let start = self.stream.prev_span();
        loop {
            match self.stream.kind() {
                K::LeftBracket if subscriptable(&lhs) => {
                    self.stream.next();
                    let index = self.parse_expr()?;
                    self.stream.expect(K::RightBracket, "']'")?;
                    lhs = self.build_subscript(start, lhs, index, true)?;
                }
                K::LeftBrace if subscriptable(&lhs) => {
                    self.stream.next();
                    let key = self.parse_hash_key()?;
                    self.stream.expect(K::RightBrace, "'}'")?;
                    lhs = self.build_subscript(start, lhs, key, false)?;
                }
                K::Arrow => {
                    self.stream.next();
                    lhs = self.parse_arrow(start, lhs)?;
                }
                K::Increment | K::Decrement if BP_INCDEC_POSTFIX >= min_bp => {
                    let dec = self.stream.next().kind == K::Decrement;
                    lhs = self.node_from(start, NodeKind::IncDec {
                        dec,
                        postfix: true,
                        target: Box::new(lhs),
                    });
                }
                _ => return Ok(lhs),
            }
        }
    }

    /// Hash keys autoquote single barewords (including keyword-shaped ones).
    pub(crate) fn parse_hash_key(&mut self) -> ParseResult<Node> {
        let start = self.stream.span();
        let tok = self.stream.peek();
        let wordlike = !tok.text.is_empty()
            && tok
                .text
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
            && !tok.text.chars().next().is_some_and(|c| c.is_ascii_digit());
        if wordlike && self.stream.peek2().kind == TokenKind::RightBrace {
            let word = self.stream.next().text.to_string();
            return Ok(self.node_from(start, NodeKind::StringLiteral {
                pieces: vec![StringPiece::Literal(word.into_bytes())],
                interpolates: false,
            }));
        }
        self.parse_expr()
    }

    fn parse_arrow(&mut self, start: ByteSpan, lhs: Node) -> ParseResult<Node> {
        use TokenKind as K;
        match self.stream.kind() {
            K::LeftBracket => {
                self.stream.next();
                let index = self.parse_expr()?;
                self.stream.expect(K::RightBracket, "']'")?;
                Ok(self.node_from(start, NodeKind::ArrayElem {
                    array: Box::new(self.node_from(start, NodeKind::Deref {
                        sigil: Sigil::Array,
                        expr: Box::new(lhs),
                    })),
                    index: Box::new(index),
                }))
            }
            K::LeftBrace => {
                self.stream.next();
                let key = self.parse_hash_key()?;
                self.stream.expect(K::RightBrace, "'}'")?;
                Ok(self.node_from(start, NodeKind::HashElem {
                    hash: Box::new(self.node_from(start, NodeKind::Deref {
                        sigil: Sigil::Hash,
                        expr: Box::new(lhs),
                    })),
                    key: Box::new(key),
                }))
            }
            K::LeftParen => {
                self.stream.next();
                let args = self.parse_comma_elements(K::RightParen)?;
                self.stream.expect(K::RightParen, "')'")?;
                Ok(self.node_from(start, NodeKind::CallCode { code: Box::new(lhs), args }))
            }
            K::Identifier => {
                let name = self.stream.next().text.to_string();
                let args = if self.stream.eat(K::LeftParen) {
                    let args = self.parse_comma_elements(K::RightParen)?;
                    self.stream.expect(K::RightParen, "')'")?;
                    args
                } else {
                    vec![]
                };
                Ok(self.node_from(start, NodeKind::MethodCall {
                    receiver: Box::new(lhs),
                    method: MethodName::Named(name),
                    args,
                }))
            }
            K::ScalarSigil => {
                let tok = self.stream.next();
                let method = self.parse_variable(&tok)?;
                let args = if self.stream.eat(K::LeftParen) {
                    let args = self.parse_comma_elements(K::RightParen)?;
                    self.stream.expect(K::RightParen, "')'")?;
                    args
                } else {
                    vec![]
                };
                Ok(self.node_from(start, NodeKind::MethodCall {
                    receiver: Box::new(lhs),
                    method: MethodName::Dynamic(Box::new(method)),
                    args,
                }))
            }
            _ => Err(self.stream.unexpected("subscript, arguments, or method name after '->'")),
        }
    }

    fn build_subscript(
        &mut self,
        start: ByteSpan,
        lhs: Node,
        index: Node,
        bracket: bool,
    ) -> ParseResult<Node> {
        let mk = |kind| self.node_from(start, kind);
        let node = match (&lhs.kind, bracket) {
            (NodeKind::Variable { sigil: Sigil::Scalar, name }, true) => NodeKind::ArrayElem {
                array: Box::new(mk(NodeKind::Variable { sigil: Sigil::Array, name: name.clone() })),
                index: Box::new(index),
            },
            (NodeKind::Variable { sigil: Sigil::Scalar, name }, false) => NodeKind::HashElem {
                hash: Box::new(mk(NodeKind::Variable { sigil: Sigil::Hash, name: name.clone() })),
                key: Box::new(index),
            },
            (NodeKind::Variable { sigil: Sigil::Array, name }, true) => NodeKind::Slice {
                kind: SliceKind::Array,
                base: Box::new(mk(NodeKind::Variable { sigil: Sigil::Array, name: name.clone() })),
                index: Box::new(index),
            },
            (NodeKind::Variable { sigil: Sigil::Array, name }, false) => NodeKind::Slice {
                kind: SliceKind::Hash,
                base: Box::new(mk(NodeKind::Variable { sigil: Sigil::Hash, name: name.clone() })),
                index: Box::new(index),
            },
            (NodeKind::Variable { sigil: Sigil::Hash, name }, false) => NodeKind::Slice {
                kind: SliceKind::KeyValue,
                base: Box::new(mk(NodeKind::Variable { sigil: Sigil::Hash, name: name.clone() })),
                index: Box::new(index),
            },
            (NodeKind::Deref { sigil: Sigil::Scalar, expr }, true) => NodeKind::ArrayElem {
                array: Box::new(mk(NodeKind::Deref {
                    sigil: Sigil::Array,
                    expr: expr.clone(),
                })),
                index: Box::new(index),
            },
            (NodeKind::Deref { sigil: Sigil::Scalar, expr }, false) => NodeKind::HashElem {
                hash: Box::new(mk(NodeKind::Deref { sigil: Sigil::Hash, expr: expr.clone() })),
                key: Box::new(index),
            },
            (NodeKind::Deref { sigil: Sigil::Array, expr }, true) => NodeKind::Slice {
                kind: SliceKind::Array,
                base: Box::new(mk(NodeKind::Deref { sigil: Sigil::Array, expr: expr.clone() })),
                index: Box::new(index),
            },
            (NodeKind::Deref { sigil: Sigil::Array, expr }, false) => NodeKind::Slice {
                kind: SliceKind::Hash,
                base: Box::new(mk(NodeKind::Deref { sigil: Sigil::Hash, expr: expr.clone() })),
                index: Box::new(index),
            },
            (NodeKind::Deref { sigil: Sigil::Hash, expr }, false) => NodeKind::Slice {
                kind: SliceKind::KeyValue,
                base: Box::new(mk(NodeKind::Deref { sigil: Sigil::Hash, expr: expr.clone() })),
                index: Box::new(index),
            },
            // Chained subscripts use implicit-arrow semantics.
            (NodeKind::ArrayElem { .. } | NodeKind::HashElem { .. } | NodeKind::CallCode { .. }, true) => {
                NodeKind::ArrayElem {
                    array: Box::new(mk(NodeKind::Deref {
                        sigil: Sigil::Array,
                        expr: Box::new(lhs.clone()),
                    })),
                    index: Box::new(index),
                }
            }
            (NodeKind::ArrayElem { .. } | NodeKind::HashElem { .. } | NodeKind::CallCode { .. }, false) => {
                NodeKind::HashElem {
                    hash: Box::new(mk(NodeKind::Deref {
                        sigil: Sigil::Hash,
                        expr: Box::new(lhs.clone()),
                    })),
                    key: Box::new(index),
                }
            }
            _ => return Err(self.stream.unexpected("subscriptable expression")),
        };
        Ok(self.node_from(start, node))
    }
}

/// Whether a parsed term can take a `[...]`/`{...}` subscript directly.
fn subscriptable(node: &Node) -> bool {
    matches!(
        node.kind,
        NodeKind::Variable { .. }
            | NodeKind::Deref { .. }
            | NodeKind::ArrayElem { .. }
            | NodeKind::HashElem { .. }
            | NodeKind::CallCode { .. }
    )
}

impl Parser {
    /// Comma-separated elements until (not including) `close`.
    pub(crate) fn parse_comma_elements(&mut self, close: TokenKind) -> ParseResult<Vec<Node>> {
        let mut elements = Vec::new();
        while !self.stream.at(close) && !self.stream.at(TokenKind::Eof) {
            elements.push(self.parse_assign()?);
            if !matches!(self.stream.kind(), TokenKind::Comma | TokenKind::FatArrow) {
                break;
            }
            self.stream.next();
        }
        Ok(elements)
    }

    /// Declarations: `my $x`, `our @a`, `local $h{k}`, `my ($a, $b)`,
    /// `my \$x` (declared reference).
    fn parse_decl(&mut self) -> ParseResult<Node> {
        use TokenKind as K;
        let start = self.stream.span();
        let kind = match self.stream.next().kind {
            K::My => DeclKind::My,
            K::Our => DeclKind::Our,
            K::Local => DeclKind::Local,
            _ => DeclKind::State,
        };
        let declared_ref = self.stream.eat(K::Backslash);
        let mut target = if self.stream.at(K::LeftParen) {
            self.stream.next();
            let elements = self.parse_comma_elements(K::RightParen)?;
            self.stream.expect(K::RightParen, "')'")?;
            self.node_from(start, NodeKind::List { elements })
        } else {
            self.parse_expr_bp(BP_DECL_TARGET)?
        };
        // `local` may target elements and derefs; the lexical keywords
        // require plain variables or lists of them.
        if kind != DeclKind::Local && !valid_lexical_target(&target) {
            return Err(ParseError::UnexpectedToken {
                found: "non-variable declaration target".into(),
                expected: "variable or variable list".into(),
                position: target.location.start,
            });
        }
        target.anns.declared_ref = declared_ref;
        let mut node = self.node_from(start, NodeKind::VarDecl {
            kind,
            target: Box::new(target),
            init: None,
        });
        node.anns.declared_ref = declared_ref;
        Ok(node)
    }
}

fn valid_lexical_target(node: &Node) -> bool {
    match &node.kind {
        NodeKind::Variable { .. } => true,
        NodeKind::List { elements } => elements.iter().all(valid_lexical_target),
        _ => false,
    }
}
