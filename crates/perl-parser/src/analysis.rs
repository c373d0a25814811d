//! Post-parse analysis passes.
//!
//! A second walk over the tree classifies assignable expressions
//! (scalar-lvalue vs list-lvalue) and marks blocks that statically contain
//! regex operators. Both results land in [`Node::anns`] for the emitter.

use perl_ast::{LvalueKind, Node, NodeKind, Sigil};

/// Classifies assignment targets bottom-up and annotates them.
///
/// Compound assignment reuses the same classification at emit time, so the
/// pass runs on every `Assign`, `CompoundAssign`, `VarDecl`, `IncDec`, and
/// `foreach` loop variable.
pub(crate) fn classify_lvalues(node: &mut Node) {
    walk_mut(node, &mut |n| {
        let target = match &mut n.kind {
            NodeKind::Assign { target, .. }
            | NodeKind::CompoundAssign { target, .. }
            | NodeKind::IncDec { target, .. }
            | NodeKind::VarDecl { target, .. } => Some(target),
            NodeKind::Foreach { var: Some(var), .. } => Some(var),
            _ => None,
        };
        if let Some(target) = target {
            annotate_lvalue(target);
        }
    });
}

fn annotate_lvalue(node: &mut Node) {
    let kind = lvalue_kind(&node.kind);
    node.anns.lvalue = kind;
    if let NodeKind::List { elements } = &mut node.kind {
        for el in elements {
            annotate_lvalue(el);
        }
    }
    if let NodeKind::Ternary { if_true, if_false, .. } = &mut node.kind {
        annotate_lvalue(if_true);
        annotate_lvalue(if_false);
    }
}

/// Lvalue classification of an expression shape, or `None` when the
/// expression is not assignable (the emitter reports that case).
fn lvalue_kind(kind: &NodeKind) -> Option<LvalueKind> {
    match kind {
        NodeKind::Variable { sigil, .. } => match sigil {
            Sigil::Scalar | Sigil::ArrayLast => Some(LvalueKind::Scalar),
            Sigil::Array | Sigil::Hash | Sigil::Glob => Some(LvalueKind::List),
            Sigil::Code => None,
        },
        NodeKind::Deref { sigil, .. } => match sigil {
            Sigil::Scalar | Sigil::ArrayLast => Some(LvalueKind::Scalar),
            Sigil::Array | Sigil::Hash => Some(LvalueKind::List),
            _ => None,
        },
        NodeKind::ArrayElem { .. } | NodeKind::HashElem { .. } => Some(LvalueKind::Scalar),
        NodeKind::Slice { .. } | NodeKind::List { .. } => Some(LvalueKind::List),
        NodeKind::Ternary { if_true, if_false, .. } => {
            match (lvalue_kind(&if_true.kind), lvalue_kind(&if_false.kind)) {
                (Some(a), Some(b)) if a == b => Some(a),
                _ => None,
            }
        }
        // `local $x`, `my $x` as a target of a later assignment
        NodeKind::VarDecl { target, .. } => lvalue_kind(&target.kind),
        // substr($s, 0, 1) = "X" style builtins are not supported as
        // lvalues; FuncCall stays non-lvalue.
        _ => None,
    }
}

/// Marks every block that *statically* contains a match, substitution, or
/// transliteration, without descending into nested subs (they snapshot
/// their own state).
pub(crate) fn mark_regex_blocks(node: &mut Node) {
    contains_regex(node);
}

fn contains_regex(node: &mut Node) -> bool {
    let mut found = match &node.kind {
        NodeKind::RegexLiteral { .. } | NodeKind::MatchBind { .. } => true,
        _ => false,
    };
    // Collect child results first (no early return: every block below must
    // still be visited and marked).
    for child in children_mut(&mut node.kind) {
        let sub_found = contains_regex(child);
        // Sub boundaries keep their regex use to themselves.
        let is_sub_boundary =
            matches!(child.kind, NodeKind::AnonSub { .. } | NodeKind::SubDef { .. });
        if sub_found && !is_sub_boundary {
            found = true;
        }
    }
    if let NodeKind::Block { .. } = node.kind {
        node.anns.contains_regex = found;
    }
    found
}

fn walk_mut(node: &mut Node, f: &mut impl FnMut(&mut Node)) {
    f(node);
    for child in children_mut(&mut node.kind) {
        walk_mut(child, f);
    }
}

/// All direct child nodes of a kind, in evaluation order.
fn children_mut(kind: &mut NodeKind) -> Vec<&mut Node> {
    use NodeKind as N;
    match kind {
        N::Program { statements } | N::Block { statements } => statements.iter_mut().collect(),
        N::ExpressionStatement { expression } => vec![expression],
        N::StringLiteral { pieces, .. } => pieces
            .iter_mut()
            .filter_map(|p| match p {
                perl_ast::StringPiece::Interp(n) => Some(&mut **n),
                perl_ast::StringPiece::Literal(_) => None,
            })
            .collect(),
        N::RegexLiteral { regex } => regex_children(regex),
        N::Deref { expr, .. } => vec![expr],
        N::ArrayElem { array, index } => vec![array, index],
        N::HashElem { hash, key } => vec![hash, key],
        N::Slice { base, index, .. } => vec![base, index],
        N::List { elements } | N::AnonArray { elements } | N::AnonHash { elements } => {
            elements.iter_mut().collect()
        }
        N::AnonSub { body, .. } => vec![body],
        N::Unary { operand, .. } | N::RefTake { operand } => vec![operand],
        N::Binary { lhs, rhs, .. } | N::Logical { lhs, rhs, .. } => vec![lhs, rhs],
        N::Assign { target, value } | N::CompoundAssign { target, value, .. } => {
            vec![target, value]
        }
        N::IncDec { target, .. } => vec![target],
        N::Ternary { cond, if_true, if_false } => vec![cond, if_true, if_false],
        N::Range { from, to, .. } => vec![from, to],
        N::MatchBind { target, regex, .. } => vec![target, regex],
        N::FuncCall { args, .. } => args.iter_mut().collect(),
        N::CallCode { code, args } => {
            let mut v: Vec<&mut Node> = vec![code];
            v.extend(args.iter_mut());
            v
        }
        N::MethodCall { receiver, method, args } => {
            let mut v: Vec<&mut Node> = vec![receiver];
            if let perl_ast::MethodName::Dynamic(m) = method {
                v.push(m);
            }
            v.extend(args.iter_mut());
            v
        }
        N::Print { args, .. } => args.iter_mut().collect(),
        N::SortCall { comparator, args } => {
            let mut v: Vec<&mut Node> = Vec::new();
            if let Some(c) = comparator {
                v.push(c);
            }
            v.extend(args.iter_mut());
            v
        }
        N::MapGrep { body, args, .. } => {
            let mut v: Vec<&mut Node> = vec![body];
            v.extend(args.iter_mut());
            v
        }
        N::VarDecl { target, init, .. } => {
            let mut v: Vec<&mut Node> = vec![target];
            if let Some(i) = init {
                v.push(i);
            }
            v
        }
        N::SubDef { body, .. } => vec![body],
        N::If { cond, then_block, elsifs, else_block, .. } => {
            let mut v: Vec<&mut Node> = vec![cond, then_block];
            for (c, b) in elsifs {
                v.push(c);
                v.push(b);
            }
            if let Some(e) = else_block {
                v.push(e);
            }
            v
        }
        N::While { cond, body, continue_block, .. } => {
            let mut v: Vec<&mut Node> = vec![cond, body];
            if let Some(c) = continue_block {
                v.push(c);
            }
            v
        }
        N::ForC { init, cond, update, body, .. } => {
            let mut v: Vec<&mut Node> = Vec::new();
            for part in [init, cond, update] {
                if let Some(p) = part {
                    v.push(p);
                }
            }
            v.push(body);
            v
        }
        N::Foreach { var, list, body, .. } => {
            let mut v: Vec<&mut Node> = Vec::new();
            if let Some(var) = var {
                v.push(var);
            }
            v.push(list);
            v.push(body);
            v
        }
        N::BareBlock { body, .. } => vec![body],
        N::Return { value } => value.iter_mut().map(|v| &mut **v).collect(),
        N::GotoStmt { target } => match target {
            perl_ast::GotoTarget::Sub(s) => vec![s],
            perl_ast::GotoTarget::Label(_) => vec![],
        },
        N::EvalBlock { body } | N::DoBlock { body } => vec![body],
        N::EvalString { expr } => vec![expr],
        N::IntLiteral { .. }
        | N::FloatLiteral { .. }
        | N::QwList { .. }
        | N::UndefLiteral
        | N::Wantarray
        | N::Variable { .. }
        | N::Bareword { .. }
        | N::Readline { .. }
        | N::LoopControl { .. }
        | N::PackageDecl { .. }
        | N::UseDecl { .. } => vec![],
    }
}

fn regex_children(regex: &mut perl_ast::RegexNode) -> Vec<&mut Node> {
    let mut v = Vec::new();
    for piece in regex
        .pattern
        .iter_mut()
        .chain(regex.replacement.iter_mut().flatten())
    {
        if let perl_ast::StringPiece::Interp(n) = piece {
            v.push(&mut **n);
        }
    }
    v
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use crate::Parser;
    use perl_ast::{LvalueKind, NodeKind};

    #[test]
    fn scalar_assignment_is_scalar_lvalue() {
        let ast = Parser::new("$x = 1;").parse().unwrap();
        let NodeKind::Program { statements } = &ast.kind else { panic!() };
        let NodeKind::ExpressionStatement { expression } = &statements[0].kind else { panic!() };
        let NodeKind::Assign { target, .. } = &expression.kind else { panic!() };
        assert_eq!(target.anns.lvalue, Some(LvalueKind::Scalar));
    }

    #[test]
    fn list_targets_are_list_lvalues() {
        let ast = Parser::new("my ($a, $b) = (1, 2); @xs = (); %h = ();").parse().unwrap();
        let NodeKind::Program { statements } = &ast.kind else { panic!() };
        let NodeKind::VarDecl { target, .. } = &statements[0].kind else { panic!() };
        assert_eq!(target.anns.lvalue, Some(LvalueKind::List));
        let NodeKind::ExpressionStatement { expression } = &statements[1].kind else { panic!() };
        let NodeKind::Assign { target, .. } = &expression.kind else { panic!() };
        assert_eq!(target.anns.lvalue, Some(LvalueKind::List));
    }

    #[test]
    fn element_targets_are_scalar() {
        let ast = Parser::new("$h{k} = 1; $a[0] += 2;").parse().unwrap();
        let NodeKind::Program { statements } = &ast.kind else { panic!() };
        let NodeKind::ExpressionStatement { expression } = &statements[0].kind else { panic!() };
        let NodeKind::Assign { target, .. } = &expression.kind else { panic!() };
        assert_eq!(target.anns.lvalue, Some(LvalueKind::Scalar));
        let NodeKind::ExpressionStatement { expression } = &statements[1].kind else { panic!() };
        let NodeKind::CompoundAssign { target, .. } = &expression.kind else { panic!() };
        assert_eq!(target.anns.lvalue, Some(LvalueKind::Scalar));
    }

    #[test]
    fn regex_blocks_marked() {
        let ast = Parser::new("{ $x =~ /a/; } { $y + 1; }").parse().unwrap();
        let NodeKind::Program { statements } = &ast.kind else { panic!() };
        let NodeKind::BareBlock { body, .. } = &statements[0].kind else { panic!() };
        assert!(body.anns.contains_regex);
        let NodeKind::BareBlock { body, .. } = &statements[1].kind else { panic!() };
        assert!(!body.anns.contains_regex);
    }

    #[test]
    fn nested_sub_keeps_regex_to_itself() {
        let ast = Parser::new("{ my $c = sub { /x/ }; }").parse().unwrap();
        let NodeKind::Program { statements } = &ast.kind else { panic!() };
        let NodeKind::BareBlock { body, .. } = &statements[0].kind else { panic!() };
        assert!(!body.anns.contains_regex);
    }
}
