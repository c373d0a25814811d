//! AST refactoring for oversized methods.
//!
//! When a method overflows the packed backend, large blocks are hoisted
//! into immediately-invoked anonymous subs before giving up on packing.
//! The transform is semantics-preserving because the pieces that cross
//! the new sub boundary already do so dynamically:
//!
//! - lexicals declared in the block were block-scoped anyway;
//! - captured outer lexicals travel through the closure environment;
//! - `last`/`next`/`redo` from inside the hoisted body reach the owning
//!   loop as control-flow markers through the call boundary.
//!
//! Blocks whose meaning would change across a sub boundary (`return`,
//! `wantarray`, `@_` access) are left alone.

use crate::children;
use perl_ast::{Node, NodeKind, Sigil};

/// Returns a copy of the tree with oversized eligible blocks wrapped into
/// `sub { ... }->()` calls, plus whether anything changed.
pub(crate) fn hoist_oversized_blocks(ast: &Node, threshold: usize) -> (Node, bool) {
    let mut node = ast.clone();
    let mut changed = false;
    walk(&mut node, threshold, &mut changed);
    (node, changed)
}

fn walk(node: &mut Node, threshold: usize, changed: &mut bool) {
    // Recurse first so inner blocks hoist before outer ones are measured.
    for child in children_mut(node) {
        walk(child, threshold, changed);
    }

    let eligible = match &node.kind {
        NodeKind::While { body, .. }
        | NodeKind::ForC { body, .. }
        | NodeKind::Foreach { body, .. }
        | NodeKind::BareBlock { body, .. } => block_len(body) >= threshold && safe_to_hoist(body),
        _ => false,
    };
    if !eligible {
        return;
    }
    let body = match &mut node.kind {
        NodeKind::While { body, .. }
        | NodeKind::ForC { body, .. }
        | NodeKind::Foreach { body, .. }
        | NodeKind::BareBlock { body, .. } => body,
        _ => return,
    };
    let loc = body.location;
    let original = std::mem::replace(
        &mut **body,
        Node::new(NodeKind::Block { statements: vec![] }, loc),
    );
    let call = Node::new(
        NodeKind::ExpressionStatement {
            expression: Box::new(Node::new(
                NodeKind::CallCode {
                    code: Box::new(Node::new(
                        NodeKind::AnonSub { proto: None, body: Box::new(original) },
                        loc,
                    )),
                    args: vec![],
                },
                loc,
            )),
        },
        loc,
    );
    **body = Node::new(NodeKind::Block { statements: vec![call] }, loc);
    *changed = true;
}

fn block_len(body: &Node) -> usize {
    match &body.kind {
        NodeKind::Block { statements } => statements.len(),
        _ => 0,
    }
}

/// A block is hoistable when nothing in it (short of a nested sub) needs
/// the enclosing frame: no `return`, `wantarray`, `goto`, or `@_`.
fn safe_to_hoist(node: &Node) -> bool {
    match &node.kind {
        NodeKind::Return { .. } | NodeKind::Wantarray | NodeKind::GotoStmt { .. } => false,
        NodeKind::Variable { sigil: Sigil::Array, name } if name == "_" => false,
        NodeKind::FuncCall { name, args } if (name == "shift" || name == "pop") && args.is_empty() => {
            // Parenless shift/pop default to @_ inside a sub.
            false
        }
        NodeKind::AnonSub { .. } | NodeKind::SubDef { .. } => true,
        _ => children(node).iter().all(|c| safe_to_hoist(c)),
    }
}

/// Mutable mirror of [`children`].
fn children_mut(node: &mut Node) -> Vec<&mut Node> {
    use NodeKind as N;
    match &mut node.kind {
        N::Program { statements } | N::Block { statements } => statements.iter_mut().collect(),
        N::ExpressionStatement { expression } => vec![expression],
        N::Deref { expr, .. } => vec![expr],
        N::ArrayElem { array, index } => vec![array, index],
        N::HashElem { hash, key } => vec![hash, key],
        N::Slice { base, index, .. } => vec![base, index],
        N::List { elements } | N::AnonArray { elements } | N::AnonHash { elements } => {
            elements.iter_mut().collect()
        }
        N::Unary { operand, .. } | N::RefTake { operand } => vec![operand],
        N::Binary { lhs, rhs, .. } | N::Logical { lhs, rhs, .. } => vec![lhs, rhs],
        N::Assign { target, value } | N::CompoundAssign { target, value, .. } => {
            vec![target, value]
        }
        N::IncDec { target, .. } => vec![target],
        N::Ternary { cond, if_true, if_false } => vec![cond, if_true, if_false],
        N::Range { from, to, .. } => vec![from, to],
        N::MatchBind { target, regex, .. } => vec![target, regex],
        N::FuncCall { args, .. } | N::Print { args, .. } => args.iter_mut().collect(),
        N::CallCode { code, args } => {
            let mut v: Vec<&mut Node> = vec![code];
            v.extend(args.iter_mut());
            v
        }
        N::MethodCall { receiver, args, .. } => {
            let mut v: Vec<&mut Node> = vec![receiver];
            v.extend(args.iter_mut());
            v
        }
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
            for part in [init, cond, update].into_iter().flatten() {
                v.push(part);
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
        N::EvalBlock { body } | N::DoBlock { body } | N::SubDef { body, .. }
        | N::AnonSub { body, .. } => vec![body],
        N::EvalString { expr } => vec![expr],
        _ => vec![],
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use perl_parser::Parser;

    #[test]
    fn big_loop_body_is_wrapped() {
        let body: String = (0..30).map(|i| format!("$x += {i}; ")).collect();
        let src = format!("my $x = 0; while ($x < 100) {{ {body} }}");
        let ast = Parser::new(&src).parse().unwrap();
        let (hoisted, changed) = hoist_oversized_blocks(&ast, 24);
        assert!(changed);
        assert!(hoisted.to_sexp().contains("anon_sub"));
    }

    #[test]
    fn blocks_with_return_stay_put() {
        let body: String = (0..30).map(|i| format!("$x += {i}; ")).collect();
        let src = format!("sub f {{ while (1) {{ {body} return $x; }} }}");
        let ast = Parser::new(&src).parse().unwrap();
        let (_, changed) = hoist_oversized_blocks(&ast, 24);
        assert!(!changed);
    }

    #[test]
    fn small_blocks_untouched() {
        let ast = Parser::new("while (1) { last; }").parse().unwrap();
        let (_, changed) = hoist_oversized_blocks(&ast, 24);
        assert!(!changed);
    }
}
