//! Best-effort Perl source reconstruction.
//!
//! Used by `--parse` tooling and the parse → deparse → parse round-trip
//! suite: the output is canonical (fully parenthesized expressions, block
//! bodies on one line) rather than faithful to the original layout, and it
//! re-parses to a structurally equal tree for the covered dialect.

use crate::ast::*;
use perl_token::{RegexFlags, RegexOp};

/// Renders a node back to Perl source.
pub fn deparse(node: &Node) -> String {
    match &node.kind {
        NodeKind::Program { statements } => {
            let mut out = String::new();
            for s in statements {
                out.push_str(&stmt(s));
                out.push('\n');
            }
            out
        }
        _ => stmt(node),
    }
}

fn stmt(node: &Node) -> String {
    match &node.kind {
        NodeKind::ExpressionStatement { expression } => {
            // A leading brace would re-parse as a block.
            let text = expr(expression);
            if text.starts_with('{') {
                format!("({text});")
            } else {
                format!("{text};")
            }
        }
        NodeKind::VarDecl { kind, target, init } => {
            let tgt = decl_target(target);
            match init {
                Some(i) => format!("{} {} = {};", kind.as_str(), tgt, expr(i)),
                None => format!("{} {};", kind.as_str(), tgt),
            }
        }
        NodeKind::SubDef { name, proto, body } => match proto {
            Some(p) => format!("sub {name} ({p}) {}", block(body)),
            None => format!("sub {name} {}", block(body)),
        },
        NodeKind::If { negated, cond, then_block, elsifs, else_block } => {
            let kw = if *negated { "unless" } else { "if" };
            let mut out = format!("{kw} ({}) {}", expr(cond), block(then_block));
            for (c, b) in elsifs {
                out.push_str(&format!(" elsif ({}) {}", expr(c), block(b)));
            }
            if let Some(e) = else_block {
                out.push_str(&format!(" else {}", block(e)));
            }
            out
        }
        NodeKind::While { label, negated, cond, body, continue_block } => {
            let kw = if *negated { "until" } else { "while" };
            let mut out = format!("{}{kw} ({}) {}", label_prefix(label), expr(cond), block(body));
            if let Some(c) = continue_block {
                out.push_str(&format!(" continue {}", block(c)));
            }
            out
        }
        NodeKind::ForC { label, init, cond, update, body } => {
            let part = |n: &Option<Box<Node>>| match n {
                Some(n) => match &n.kind {
                    // init is a statement; strip its terminator here
                    NodeKind::ExpressionStatement { .. } | NodeKind::VarDecl { .. } => {
                        stmt(n).trim_end_matches(';').to_string()
                    }
                    _ => expr(n),
                },
                None => String::new(),
            };
            format!(
                "{}for ({}; {}; {}) {}",
                label_prefix(label),
                part(init),
                part(cond),
                part(update),
                block(body)
            )
        }
        NodeKind::Foreach { label, var, declare, list, body } => {
            let v = match var {
                Some(v) if *declare => format!("my {} ", expr(v)),
                Some(v) => format!("{} ", expr(v)),
                None => String::new(),
            };
            format!(
                "{}foreach {}({}) {}",
                label_prefix(label),
                v,
                expr(list),
                block(body)
            )
        }
        NodeKind::BareBlock { label, body } => {
            format!("{}{}", label_prefix(label), block(body))
        }
        NodeKind::Return { value } => match value {
            Some(v) => format!("return {};", expr(v)),
            None => "return;".to_string(),
        },
        NodeKind::LoopControl { op, label } => match label {
            Some(l) => format!("{} {l};", op.as_str()),
            None => format!("{};", op.as_str()),
        },
        NodeKind::GotoStmt { target } => match target {
            GotoTarget::Label(l) => format!("goto {l};"),
            GotoTarget::Sub(s) => format!("goto {};", expr(s)),
        },
        NodeKind::PackageDecl { name } => format!("package {name};"),
        NodeKind::UseDecl { is_no, module, args } => {
            let kw = if *is_no { "no" } else { "use" };
            if args.is_empty() {
                format!("{kw} {module};")
            } else {
                format!("{kw} {module} {};", args.join(", "))
            }
        }
        // Eval and do blocks can appear in both positions; as statements
        // they still end with a terminator.
        NodeKind::EvalBlock { .. } | NodeKind::EvalString { .. } | NodeKind::DoBlock { .. } => {
            format!("{};", expr(node))
        }
        NodeKind::Block { .. } => block(node),
        _ => format!("{};", expr(node)),
    }
}

fn block(node: &Node) -> String {
    match &node.kind {
        NodeKind::Block { statements } => {
            let mut out = String::from("{ ");
            for s in statements {
                out.push_str(&stmt(s));
                out.push(' ');
            }
            out.push('}');
            out
        }
        _ => format!("{{ {} }}", stmt(node)),
    }
}

fn label_prefix(label: &Option<String>) -> String {
    match label {
        Some(l) => format!("{l}: "),
        None => String::new(),
    }
}

fn decl_target(node: &Node) -> String {
    let prefix = if node.anns.declared_ref { "\\" } else { "" };
    match &node.kind {
        NodeKind::List { elements } => {
            let inner = elements.iter().map(expr).collect::<Vec<_>>().join(", ");
            format!("{prefix}({inner})")
        }
        _ => format!("{prefix}{}", expr(node)),
    }
}

fn expr(node: &Node) -> String {
    match &node.kind {
        NodeKind::IntLiteral { value } => value.to_string(),
        NodeKind::FloatLiteral { value } => {
            let s = value.to_string();
            // Keep the float-ness visible so it re-parses as a float.
            if s.contains('.') || s.contains('e') || s.contains('E') {
                s
            } else {
                format!("{s}.0")
            }
        }
        NodeKind::StringLiteral { pieces, interpolates } => string_source(pieces, *interpolates),
        NodeKind::QwList { words } => format!("qw({})", words.join(" ")),
        NodeKind::UndefLiteral => "undef".to_string(),
        NodeKind::Wantarray => "wantarray".to_string(),
        NodeKind::Variable { sigil, name } => format!("{}{name}", sigil.as_str()),
        NodeKind::Deref { sigil, expr: e } => format!("{}{{{}}}", sigil.as_str(), expr(e)),
        NodeKind::Bareword { word } => word.clone(),
        NodeKind::Readline { handle } => format!("<{handle}>"),
        NodeKind::RegexLiteral { regex } => regex_source(regex),
        NodeKind::ArrayElem { array, index } => {
            format!("{}[{}]", elem_base(array, Sigil::Scalar), expr(index))
        }
        NodeKind::HashElem { hash, key } => {
            format!("{}{{{}}}", elem_base(hash, Sigil::Scalar), key_source(key))
        }
        NodeKind::Slice { kind, base, index } => {
            let sigil = match kind {
                SliceKind::Array | SliceKind::Hash => Sigil::Array,
                SliceKind::KeyValue => Sigil::Hash,
            };
            match kind {
                SliceKind::Array => format!("{}[{}]", elem_base(base, sigil), expr(index)),
                SliceKind::Hash | SliceKind::KeyValue => {
                    format!("{}{{{}}}", elem_base(base, sigil), expr(index))
                }
            }
        }
        NodeKind::List { elements } => {
            format!("({})", elements.iter().map(expr).collect::<Vec<_>>().join(", "))
        }
        NodeKind::AnonArray { elements } => {
            format!("[{}]", elements.iter().map(expr).collect::<Vec<_>>().join(", "))
        }
        NodeKind::AnonHash { elements } => {
            format!("{{{}}}", elements.iter().map(expr).collect::<Vec<_>>().join(", "))
        }
        NodeKind::AnonSub { proto, body } => match proto {
            Some(p) => format!("sub ({p}) {}", block(body)),
            None => format!("sub {}", block(body)),
        },
        NodeKind::Unary { op, operand } => {
            let sym = match op {
                UnaryOp::Neg => "-",
                UnaryOp::Not => "!",
                UnaryOp::BitNot => "~",
            };
            format!("({sym}{})", expr(operand))
        }
        NodeKind::RefTake { operand } => format!("(\\{})", expr(operand)),
        NodeKind::Binary { op, lhs, rhs } => {
            format!("({} {} {})", expr(lhs), binop_source(*op), expr(rhs))
        }
        NodeKind::Logical { op, lhs, rhs } => {
            let sym = match op {
                LogicalOp::And => "&&",
                LogicalOp::Or => "||",
                LogicalOp::DefinedOr => "//",
                LogicalOp::Xor => "xor",
            };
            format!("({} {sym} {})", expr(lhs), expr(rhs))
        }
        NodeKind::Assign { target, value } => format!("({} = {})", expr(target), expr(value)),
        NodeKind::CompoundAssign { op, target, value } => {
            let sym = match op {
                AssignOp::Bin(b) => format!("{}=", binop_source(*b)),
                AssignOp::And => "&&=".to_string(),
                AssignOp::Or => "||=".to_string(),
                AssignOp::DefinedOr => "//=".to_string(),
            };
            format!("({} {sym} {})", expr(target), expr(value))
        }
        NodeKind::IncDec { dec, postfix, target } => {
            let sym = if *dec { "--" } else { "++" };
            if *postfix {
                format!("({}{sym})", expr(target))
            } else {
                format!("({sym}{})", expr(target))
            }
        }
        NodeKind::Ternary { cond, if_true, if_false } => {
            format!("({} ? {} : {})", expr(cond), expr(if_true), expr(if_false))
        }
        NodeKind::Range { from, to, exclusive } => {
            let sym = if *exclusive { "..." } else { ".." };
            format!("({} {sym} {})", expr(from), expr(to))
        }
        NodeKind::MatchBind { target, regex, negated } => {
            let sym = if *negated { "!~" } else { "=~" };
            format!("({} {sym} {})", expr(target), expr(regex))
        }
        NodeKind::FuncCall { name, args } => {
            format!("{name}({})", args.iter().map(expr).collect::<Vec<_>>().join(", "))
        }
        NodeKind::CallCode { code, args } => {
            format!("{}->({})", expr(code), args.iter().map(expr).collect::<Vec<_>>().join(", "))
        }
        NodeKind::MethodCall { receiver, method, args } => {
            let m = match method {
                MethodName::Named(n) => n.clone(),
                MethodName::Dynamic(e) => expr(e),
            };
            format!(
                "{}->{m}({})",
                expr(receiver),
                args.iter().map(expr).collect::<Vec<_>>().join(", ")
            )
        }
        NodeKind::Print { stream, args, say } => {
            let kw = if *say { "say" } else { "print" };
            let fh = match stream {
                OutputStream::Stdout => "",
                OutputStream::Stderr => "STDERR ",
            };
            format!("{kw} {fh}{}", args.iter().map(expr).collect::<Vec<_>>().join(", "))
        }
        NodeKind::SortCall { comparator, args } => {
            let list = args.iter().map(expr).collect::<Vec<_>>().join(", ");
            match comparator {
                Some(c) => format!("sort {} {list}", block(c)),
                None => format!("sort {list}"),
            }
        }
        NodeKind::MapGrep { op, body, args } => {
            let kw = match op {
                MapOp::Map => "map",
                MapOp::Grep => "grep",
            };
            let list = args.iter().map(expr).collect::<Vec<_>>().join(", ");
            match &body.kind {
                NodeKind::Block { .. } => format!("{kw} {} {list}", block(body)),
                _ => format!("{kw} {}, {list}", expr(body)),
            }
        }
        NodeKind::EvalBlock { body } => format!("eval {}", block(body)),
        NodeKind::EvalString { expr: e } => format!("eval {}", expr(e)),
        NodeKind::DoBlock { body } => format!("do {}", block(body)),
        // Statement kinds reached via expression position (rare)
        _ => stmt(node),
    }
}

/// Base text for element access: `$a[i]` needs `$a`, `@a[i]` needs `@a`,
/// and a deref base renders with braces: `${$r}[i]`.
fn elem_base(base: &Node, access_sigil: Sigil) -> String {
    match &base.kind {
        NodeKind::Variable { name, .. } => format!("{}{name}", access_sigil.as_str()),
        NodeKind::Deref { expr: e, .. } => match &e.kind {
            // Tight form: $$r[0]
            NodeKind::Variable { sigil: Sigil::Scalar, name } => {
                format!("{}${name}", access_sigil.as_str())
            }
            _ => format!("{}{{{}}}", access_sigil.as_str(), expr(e)),
        },
        _ => format!("{}{{{}}}", access_sigil.as_str(), expr(base)),
    }
}

fn key_source(key: &Node) -> String {
    if let NodeKind::StringLiteral { pieces, .. } = &key.kind {
        if let [StringPiece::Literal(bytes)] = pieces.as_slice() {
            if !bytes.is_empty()
                && bytes.iter().all(|b| b.is_ascii_alphanumeric() || *b == b'_')
                && !bytes[0].is_ascii_digit()
            {
                return String::from_utf8_lossy(bytes).into_owned();
            }
        }
    }
    expr(key)
}

fn string_source(pieces: &[StringPiece], interpolates: bool) -> String {
    if !interpolates {
        let mut out = String::from("'");
        for p in pieces {
            if let StringPiece::Literal(bytes) = p {
                for &b in bytes {
                    match b {
                        b'\'' => out.push_str("\\'"),
                        b'\\' => out.push_str("\\\\"),
                        _ => out.push(b as char),
                    }
                }
            }
        }
        out.push('\'');
        return out;
    }
    let mut out = String::from("\"");
    for p in pieces {
        match p {
            StringPiece::Literal(bytes) => {
                for &b in bytes {
                    match b {
                        b'"' => out.push_str("\\\""),
                        b'\\' => out.push_str("\\\\"),
                        b'$' => out.push_str("\\$"),
                        b'@' => out.push_str("\\@"),
                        b'\n' => out.push_str("\\n"),
                        b'\t' => out.push_str("\\t"),
                        b'\r' => out.push_str("\\r"),
                        0x20..=0x7E => out.push(b as char),
                        _ => out.push_str(&format!("\\x{{{b:02x}}}")),
                    }
                }
            }
            StringPiece::Interp(node) => out.push_str(&expr(node)),
        }
    }
    out.push('"');
    out
}

fn regex_source(regex: &RegexNode) -> String {
    let render = |pieces: &[StringPiece]| {
        let mut out = String::new();
        for p in pieces {
            match p {
                StringPiece::Literal(bytes) => {
                    for &b in bytes {
                        if b == b'/' {
                            out.push_str("\\/");
                        } else if (0x20..=0x7E).contains(&b) || b == b'\n' || b == b'\t' {
                            out.push(b as char);
                        } else {
                            out.push_str(&format!("\\x{{{b:02x}}}"));
                        }
                    }
                }
                StringPiece::Interp(node) => out.push_str(&expr(node)),
            }
        }
        out
    };
    let flags = flag_source(regex.op, regex.flags);
    match regex.op {
        RegexOp::Match => format!("m/{}/{flags}", render(&regex.pattern)),
        RegexOp::Quote => format!("qr/{}/{flags}", render(&regex.pattern)),
        RegexOp::Subst => format!(
            "s/{}/{}/{flags}",
            render(&regex.pattern),
            render(regex.replacement.as_deref().unwrap_or(&[]))
        ),
        RegexOp::Trans => format!(
            "tr/{}/{}/{flags}",
            render(&regex.pattern),
            render(regex.replacement.as_deref().unwrap_or(&[]))
        ),
    }
}

fn flag_source(op: RegexOp, flags: RegexFlags) -> String {
    let mut out = String::new();
    if flags.ignore_case {
        out.push('i');
    }
    if flags.multi_line {
        out.push('m');
    }
    if flags.dot_all {
        out.push('s');
    }
    if flags.extended {
        out.push('x');
    }
    if flags.global {
        out.push('g');
    }
    if flags.preserves_match {
        out.push('p');
    }
    if op == RegexOp::Subst && flags.eval_replacement {
        out.push('e');
    }
    if flags.non_destructive {
        out.push('r');
    }
    if op == RegexOp::Trans {
        if flags.complement {
            out.push('c');
        }
        if flags.delete {
            out.push('d');
        }
    }
    out
}

fn binop_source(op: BinOp) -> &'static str {
    match op {
        BinOp::Add => "+",
        BinOp::Sub => "-",
        BinOp::Mul => "*",
        BinOp::Div => "/",
        BinOp::Mod => "%",
        BinOp::Pow => "**",
        BinOp::Concat => ".",
        BinOp::Repeat => "x",
        BinOp::Shl => "<<",
        BinOp::Shr => ">>",
        BinOp::BitAnd => "&",
        BinOp::BitOr => "|",
        BinOp::BitXor => "^",
        BinOp::NumEq => "==",
        BinOp::NumNe => "!=",
        BinOp::NumLt => "<",
        BinOp::NumGt => ">",
        BinOp::NumLe => "<=",
        BinOp::NumGe => ">=",
        BinOp::NumCmp => "<=>",
        BinOp::StrEq => "eq",
        BinOp::StrNe => "ne",
        BinOp::StrLt => "lt",
        BinOp::StrGt => "gt",
        BinOp::StrLe => "le",
        BinOp::StrGe => "ge",
        BinOp::StrCmp => "cmp",
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use perl_position_tracking::ByteSpan;

    fn node(kind: NodeKind) -> Node {
        Node::new(kind, ByteSpan::empty(0))
    }

    fn var(name: &str) -> Node {
        node(NodeKind::Variable { sigil: Sigil::Scalar, name: name.into() })
    }

    #[test]
    fn binary_parenthesized() {
        let n = node(NodeKind::Binary {
            op: BinOp::Add,
            lhs: Box::new(var("x")),
            rhs: Box::new(node(NodeKind::IntLiteral { value: 2 })),
        });
        assert_eq!(expr(&n), "($x + 2)");
    }

    #[test]
    fn hash_elem_bareword_key() {
        let key = node(NodeKind::StringLiteral {
            pieces: vec![StringPiece::Literal(b"name".to_vec())],
            interpolates: false,
        });
        let n = node(NodeKind::HashElem {
            hash: Box::new(node(NodeKind::Variable { sigil: Sigil::Hash, name: "h".into() })),
            key: Box::new(key),
        });
        assert_eq!(expr(&n), "$h{name}");
    }

    #[test]
    fn interpolated_string() {
        let n = node(NodeKind::StringLiteral {
            pieces: vec![
                StringPiece::Literal(b"v=".to_vec()),
                StringPiece::Interp(Box::new(var("x"))),
                StringPiece::Literal(b"\n".to_vec()),
            ],
            interpolates: true,
        });
        assert_eq!(expr(&n), "\"v=$x\\n\"");
    }

    #[test]
    fn foreach_statement() {
        let n = node(NodeKind::Foreach {
            label: None,
            var: Some(Box::new(var("i"))),
            declare: true,
            list: Box::new(node(NodeKind::Range {
                from: Box::new(node(NodeKind::IntLiteral { value: 1 })),
                to: Box::new(node(NodeKind::IntLiteral { value: 3 })),
                exclusive: false,
            })),
            body: Box::new(node(NodeKind::Block { statements: vec![] })),
        });
        assert_eq!(stmt(&n), "foreach my $i ((1 .. 3)) { }");
    }
}
