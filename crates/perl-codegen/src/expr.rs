//! Expression lowering.
//!
//! `emit_expr` always leaves exactly one operand on the stack; the context
//! argument selects instruction variants (scalar-context conversion, call
//! context bytes, match result shape). Short-circuit and conditional
//! expressions route their value through a spill slot so every join label
//! is reached with an empty expression stack.

use crate::{Cx, Emitter};
use perl_ast::{
    AssignOp, BinOp, LogicalOp, LvalueKind, MapOp, MethodName, Node, NodeKind, RegexNode, Sigil,
    StringPiece, UnaryOp,
};
use perl_bytecode::{
    BinCode, Const, DerefCode, Instr, RegexSpec, SliceCode, TransSpec, UnCode,
};
use perl_error::{CompileError, CompileResult};
use perl_token::{RegexFlags, RegexOp};

/// Where a variable use resolves.
pub(crate) enum Resolved {
    /// A pad slot of the current frame (captures already threaded)
    Slot(u16),
    /// A fully qualified global
    Global(String),
}

impl Emitter {
    // ===== variable resolution =====

    /// Resolves a name against the frame stack, threading closure
    /// captures through every intermediate frame.
    pub(crate) fn resolve_var(&mut self, sigil: Sigil, name: &str) -> Resolved {
        let top = self.frames.len() - 1;
        for fi in (0..=top).rev() {
            let Some(binding) = self.frames[fi].pad.lookup(sigil, name).cloned() else {
                continue;
            };
            if let Some(global) = binding.global_name {
                return Resolved::Global(global);
            }
            let mut outer_slot = binding.slot;
            for fj in fi + 1..=top {
                let slot_kind = match sigil {
                    Sigil::Array | Sigil::ArrayLast => perl_bytecode::SlotKind::Array,
                    Sigil::Hash => perl_bytecode::SlotKind::Hash,
                    _ => perl_bytecode::SlotKind::Scalar,
                };
                let inner = self.frames[fj].pad.alloc_slot();
                self.frames[fj].slot_kinds.push(slot_kind);
                self.frames[fj]
                    .captures
                    .push(perl_bytecode::Capture { outer: outer_slot, inner });
                self.frames[fj].pad.bind_existing_root(
                    sigil,
                    name,
                    inner,
                    perl_scope::BindingKind::Implicit,
                );
                outer_slot = inner;
            }
            return Resolved::Slot(outer_slot);
        }
        Resolved::Global(self.qualify_name(name))
    }

    /// `strict 'vars'` check for a global use.
    fn check_strict_vars(&self, name: &str, qualified_implicitly: bool, pos: usize) -> CompileResult<()> {
        if !self.frame().pad.pragmas().strict_vars || !qualified_implicitly {
            return Ok(());
        }
        if is_special_global(name) {
            return Ok(());
        }
        Err(CompileError::UndeclaredVariable { name: name.to_string(), position: pos })
    }

    // ===== operand helpers =====

    /// Pushes the scalar *cell* of an assignable expression
    /// (autovivifying along the base chain).
    pub(crate) fn emit_scalar_lv(&mut self, node: &Node) -> CompileResult<()> {
        match &node.kind {
            NodeKind::Variable { sigil: Sigil::Scalar, name } => {
                match self.resolve_var(Sigil::Scalar, name) {
                    Resolved::Slot(slot) => self.push(Instr::LoadScalar(slot)),
                    Resolved::Global(global) => {
                        self.check_strict_vars(name, !name.contains("::"), node.location.start)?;
                        let idx = self.name_idx(&global);
                        self.push(Instr::GlobalScalar(idx));
                    }
                }
                Ok(())
            }
            NodeKind::ArrayElem { array, index } => {
                self.emit_array_operand(array, true)?;
                self.emit_expr(index, Cx::Scalar)?;
                self.push(Instr::ArrayGetLv);
                Ok(())
            }
            NodeKind::HashElem { hash, key } => {
                self.emit_hash_operand(hash, true)?;
                self.emit_expr(key, Cx::Scalar)?;
                self.push(Instr::HashGetLv);
                Ok(())
            }
            NodeKind::Deref { sigil: Sigil::Scalar, expr } => {
                self.emit_scalar_lv_or_value(expr)?;
                let allow = !self.frame().pad.pragmas().strict_refs;
                self.push(Instr::Deref { code: DerefCode::ScalarLv, allow_symbolic: allow });
                Ok(())
            }
            NodeKind::VarDecl { .. } => {
                // `local $x = ...` reaches assignment as a decl target.
                self.emit_statement(node)?;
                match decl_single_target(node) {
                    Some(target) => self.emit_scalar_lv(target),
                    None => Err(CompileError::Internal {
                        reason: "declaration is not a scalar lvalue".into(),
                        position: node.location.start,
                    }),
                }
            }
            _ => Err(CompileError::Internal {
                reason: "expression is not a scalar lvalue".into(),
                position: node.location.start,
            }),
        }
    }

    fn emit_scalar_lv_or_value(&mut self, node: &Node) -> CompileResult<()> {
        match self.emit_scalar_lv(node) {
            Ok(()) => Ok(()),
            Err(_) => self.emit_expr(node, Cx::Scalar),
        }
    }

    /// Pushes an array operand (the aggregate itself, not its elements).
    pub(crate) fn emit_array_operand(&mut self, node: &Node, lv: bool) -> CompileResult<()> {
        match &node.kind {
            NodeKind::Variable { sigil: Sigil::Array, name } => {
                match self.resolve_var(Sigil::Array, name) {
                    Resolved::Slot(slot) => self.push(Instr::LoadArray(slot)),
                    Resolved::Global(global) => {
                        self.check_strict_vars(name, !name.contains("::"), node.location.start)?;
                        let idx = self.name_idx(&global);
                        self.push(Instr::GlobalArray(idx));
                    }
                }
                Ok(())
            }
            NodeKind::Deref { sigil: Sigil::Array, expr } => {
                self.emit_scalar_lv_or_value(expr)?;
                let allow = !self.frame().pad.pragmas().strict_refs;
                let code = if lv { DerefCode::ArrayLv } else { DerefCode::ArrayRv };
                self.push(Instr::Deref { code, allow_symbolic: allow });
                Ok(())
            }
            _ => Err(CompileError::Internal {
                reason: "expression does not designate an array".into(),
                position: node.location.start,
            }),
        }
    }

    /// Pushes a hash operand.
    pub(crate) fn emit_hash_operand(&mut self, node: &Node, lv: bool) -> CompileResult<()> {
        match &node.kind {
            NodeKind::Variable { sigil: Sigil::Hash, name } => {
                match self.resolve_var(Sigil::Hash, name) {
                    Resolved::Slot(slot) => self.push(Instr::LoadHash(slot)),
                    Resolved::Global(global) => {
                        self.check_strict_vars(name, !name.contains("::"), node.location.start)?;
                        let idx = self.name_idx(&global);
                        self.push(Instr::GlobalHash(idx));
                    }
                }
                Ok(())
            }
            NodeKind::Deref { sigil: Sigil::Hash, expr } => {
                self.emit_scalar_lv_or_value(expr)?;
                let allow = !self.frame().pad.pragmas().strict_refs;
                let code = if lv { DerefCode::HashLv } else { DerefCode::HashRv };
                self.push(Instr::Deref { code, allow_symbolic: allow });
                Ok(())
            }
            _ => Err(CompileError::Internal {
                reason: "expression does not designate a hash".into(),
                position: node.location.start,
            }),
        }
    }

    /// Emits elements and folds them into one flattened list operand.
    pub(crate) fn emit_list(&mut self, elements: &[Node]) -> CompileResult<()> {
        for el in elements {
            self.emit_expr(el, Cx::List)?;
        }
        self.push(Instr::MakeList(elements.len() as u16));
        Ok(())
    }

    // ===== the main dispatch =====

    pub(crate) fn emit_expr(&mut self, node: &Node, ctx: Cx) -> CompileResult<()> {
        self.note_line(node.location.start);
        match &node.kind {
            NodeKind::IntLiteral { value } => {
                if let Ok(small) = i32::try_from(*value) {
                    self.push(Instr::PushInt(small));
                } else {
                    let idx = self.const_idx(Const::Int(*value));
                    self.push(Instr::PushConst(idx));
                }
                Ok(())
            }
            NodeKind::FloatLiteral { value } => {
                let idx = self.const_idx(Const::Num(*value));
                self.push(Instr::PushConst(idx));
                Ok(())
            }
            NodeKind::StringLiteral { pieces, .. } => self.emit_string_pieces(pieces),
            NodeKind::QwList { words } => {
                for word in words {
                    let idx = self.const_idx(Const::Str(word.clone().into_bytes()));
                    self.push(Instr::PushConst(idx));
                }
                self.push(Instr::MakeList(words.len() as u16));
                self.scalarize_if(ctx);
                Ok(())
            }
            NodeKind::UndefLiteral => {
                self.push(Instr::PushUndef);
                Ok(())
            }
            NodeKind::Wantarray => {
                self.push(Instr::Wantarray);
                Ok(())
            }
            NodeKind::Bareword { word } => {
                if self.frame().pad.pragmas().strict_subs {
                    return Err(CompileError::BarewordNotAllowed {
                        word: word.clone(),
                        position: node.location.start,
                    });
                }
                let idx = self.const_idx(Const::Str(word.clone().into_bytes()));
                self.push(Instr::PushConst(idx));
                Ok(())
            }
            NodeKind::Variable { sigil, name } => self.emit_variable(node, *sigil, name, ctx),
            NodeKind::Deref { sigil, .. } => match sigil {
                Sigil::Scalar => {
                    let NodeKind::Deref { expr, .. } = &node.kind else { unreachable!() };
                    self.emit_scalar_lv_or_value(expr)?;
                    let allow = !self.frame().pad.pragmas().strict_refs;
                    self.push(Instr::Deref { code: DerefCode::ScalarRv, allow_symbolic: allow });
                    Ok(())
                }
                Sigil::Array => {
                    self.emit_array_operand(node, false)?;
                    self.scalarize_if(ctx);
                    Ok(())
                }
                Sigil::Hash => {
                    self.emit_hash_operand(node, false)?;
                    self.scalarize_if(ctx);
                    Ok(())
                }
                Sigil::ArrayLast => {
                    let NodeKind::Deref { expr, .. } = &node.kind else { unreachable!() };
                    self.emit_scalar_lv_or_value(expr)?;
                    let allow = !self.frame().pad.pragmas().strict_refs;
                    self.push(Instr::Deref { code: DerefCode::ArrayRv, allow_symbolic: allow });
                    self.push(Instr::ArrayLastIdx);
                    Ok(())
                }
                Sigil::Code => {
                    let NodeKind::Deref { expr, .. } = &node.kind else { unreachable!() };
                    self.emit_expr(expr, Cx::Scalar)?;
                    let allow = !self.frame().pad.pragmas().strict_refs;
                    self.push(Instr::Deref { code: DerefCode::Code, allow_symbolic: allow });
                    Ok(())
                }
                Sigil::Glob => Err(CompileError::Internal {
                    reason: "glob dereference is not supported".into(),
                    position: node.location.start,
                }),
            },
            NodeKind::ArrayElem { array, index } => {
                self.emit_array_operand(array, true)?;
                self.emit_expr(index, Cx::Scalar)?;
                self.push(Instr::ArrayGet);
                Ok(())
            }
            NodeKind::HashElem { hash, key } => {
                self.emit_hash_operand(hash, true)?;
                self.emit_expr(key, Cx::Scalar)?;
                self.push(Instr::HashGet);
                Ok(())
            }
            NodeKind::Slice { kind, base, index } => {
                match kind {
                    perl_ast::SliceKind::Array => self.emit_array_operand(base, false)?,
                    _ => self.emit_hash_operand(base, false)?,
                }
                self.emit_expr(index, Cx::List)?;
                let code = match kind {
                    perl_ast::SliceKind::Array => SliceCode::Array,
                    perl_ast::SliceKind::Hash => SliceCode::Hash,
                    perl_ast::SliceKind::KeyValue => SliceCode::KeyValue,
                };
                self.push(Instr::Slice(code));
                self.scalarize_if(ctx);
                Ok(())
            }
            NodeKind::List { elements } => {
                self.emit_list(elements)?;
                self.scalarize_if(ctx);
                Ok(())
            }
            NodeKind::AnonArray { elements } => {
                self.emit_list(elements)?;
                self.push(Instr::AnonArray);
                Ok(())
            }
            NodeKind::AnonHash { elements } => {
                self.emit_list(elements)?;
                self.push(Instr::AnonHash);
                Ok(())
            }
            NodeKind::AnonSub { body, .. } => {
                let idx = self.compile_closure("__ANON__", body)?;
                self.push(Instr::MakeClosure(idx));
                Ok(())
            }
            NodeKind::RefTake { operand } => self.emit_ref_take(operand),
            NodeKind::Unary { op, operand } => {
                self.emit_expr(operand, Cx::Scalar)?;
                let code = match op {
                    UnaryOp::Neg => UnCode::Neg,
                    UnaryOp::Not => UnCode::Not,
                    UnaryOp::BitNot => UnCode::BitNot,
                };
                self.push(Instr::Unary(code));
                Ok(())
            }
            NodeKind::Binary { op, lhs, rhs } => {
                self.emit_expr(lhs, Cx::Scalar)?;
                self.emit_expr(rhs, Cx::Scalar)?;
                let code = self.bin_code(*op);
                self.push(Instr::Binary(code));
                Ok(())
            }
            NodeKind::Logical { op, lhs, rhs } => self.emit_logical(*op, lhs, rhs, ctx),
            NodeKind::Assign { target, value } => self.emit_assign(target, value),
            NodeKind::CompoundAssign { op, target, value } => {
                self.emit_compound_assign(*op, target, value)
            }
            NodeKind::IncDec { dec, postfix, target } => {
                self.emit_scalar_lv(target)?;
                if *postfix {
                    self.push(Instr::PostIncDec { dec: *dec });
                } else {
                    self.push(Instr::PreIncDec { dec: *dec });
                }
                Ok(())
            }
            NodeKind::Ternary { cond, if_true, if_false } => {
                self.emit_expr(cond, Cx::Scalar)?;
                let spill = self.acquire_spill();
                let jump_false = self.emit_jump(Instr::JumpIfFalse);
                self.emit_expr(if_true, ctx)?;
                self.push(Instr::StoreSpill(spill));
                let jump_end = self.emit_jump(Instr::Jump);
                self.patch_to_here(jump_false);
                self.emit_expr(if_false, ctx)?;
                self.push(Instr::StoreSpill(spill));
                self.patch_to_here(jump_end);
                self.push(Instr::LoadSpill(spill));
                self.release_spill(spill);
                Ok(())
            }
            NodeKind::Range { from, to, .. } => {
                self.emit_expr(from, Cx::Scalar)?;
                self.emit_expr(to, Cx::Scalar)?;
                self.push(Instr::MakeRange);
                self.scalarize_if(ctx);
                Ok(())
            }
            NodeKind::MatchBind { target, regex, negated } => {
                self.emit_match_bind(target, regex, *negated, ctx)
            }
            NodeKind::RegexLiteral { regex } => match regex.op {
                RegexOp::Quote => self.emit_qr_value(regex),
                _ => {
                    // Bare regex operators bind $_.
                    let topic = Node::new(
                        NodeKind::Variable { sigil: Sigil::Scalar, name: "_".into() },
                        node.location,
                    );
                    self.emit_regex_against(&topic, regex, false, ctx)
                }
            },
            NodeKind::FuncCall { name, args } => self.emit_func_call(node, name, args, ctx),
            NodeKind::CallCode { code, args } => {
                self.emit_expr(code, Cx::Scalar)?;
                self.emit_list(args)?;
                self.push(Instr::Call(ctx));
                self.scalarize_if(ctx);
                Ok(())
            }
            NodeKind::MethodCall { receiver, method, args } => {
                self.emit_method_call(receiver, method, args, ctx)
            }
            NodeKind::Print { stream, args, say } => {
                if args.is_empty() {
                    let idx = self.name_idx("main::_");
                    self.push(Instr::GlobalScalar(idx));
                    self.push(Instr::MakeList(1));
                } else {
                    self.emit_list(args)?;
                }
                self.push(Instr::Print {
                    stderr: matches!(stream, perl_ast::OutputStream::Stderr),
                    newline: *say,
                });
                Ok(())
            }
            NodeKind::SortCall { comparator, args } => {
                match comparator {
                    Some(block) => {
                        let idx = self.compile_closure("__SORT__", block)?;
                        self.push(Instr::MakeClosure(idx));
                    }
                    None => self.push(Instr::PushUndef),
                }
                self.emit_list(args)?;
                self.push(Instr::MakeList(2));
                let name = self.name_idx("sort");
                self.push(Instr::CallNamed(name, Cx::List));
                self.scalarize_if(ctx);
                Ok(())
            }
            NodeKind::MapGrep { op, body, args } => {
                let idx = self.compile_closure(
                    if *op == MapOp::Map { "__MAP__" } else { "__GREP__" },
                    body,
                )?;
                self.push(Instr::MakeClosure(idx));
                self.emit_list(args)?;
                self.push(Instr::MakeList(2));
                let name = self.name_idx(if *op == MapOp::Map { "map" } else { "grep" });
                self.push(Instr::CallNamed(name, Cx::List));
                self.scalarize_if(ctx);
                Ok(())
            }
            NodeKind::Readline { handle } => {
                let idx = self.name_idx(handle);
                if ctx == Cx::List {
                    self.push(Instr::ReadAllLines(idx));
                } else {
                    self.push(Instr::ReadLine(idx));
                }
                Ok(())
            }
            NodeKind::EvalBlock { body } => self.emit_eval_block(body, ctx),
            NodeKind::EvalString { expr } => {
                self.emit_expr(expr, Cx::Scalar)?;
                self.push(Instr::MakeList(1));
                let name = self.name_idx("__eval_string__");
                self.push(Instr::CallNamed(name, ctx));
                self.scalarize_if(ctx);
                Ok(())
            }
            NodeKind::DoBlock { body } => {
                self.enter_scope(body)?;
                self.emit_block_value(body, ctx)?;
                let spill = self.acquire_spill();
                self.push(Instr::StoreSpill(spill));
                self.exit_scope();
                self.push(Instr::LoadSpill(spill));
                self.release_spill(spill);
                Ok(())
            }
            NodeKind::Return { .. }
            | NodeKind::LoopControl { .. }
            | NodeKind::GotoStmt { .. } => {
                // Control statements in expression position (`... or return`)
                // never produce a value; a placeholder keeps the stack shape.
                self.emit_statement(node)?;
                self.push(Instr::PushUndef);
                Ok(())
            }
            NodeKind::VarDecl { .. } => {
                self.emit_decl_expr(node)?;
                Ok(())
            }
            _ => Err(CompileError::Internal {
                reason: format!("cannot emit node as expression: {:?}", node.kind),
                position: node.location.start,
            }),
        }
    }

    /// Scalar-context conversion for inherently list-valued operands.
    pub(crate) fn scalarize_if(&mut self, ctx: Cx) {
        if ctx == Cx::Scalar || ctx == Cx::Void {
            self.push(Instr::CtxScalar);
        }
    }

    fn emit_variable(&mut self, node: &Node, sigil: Sigil, name: &str, ctx: Cx) -> CompileResult<()> {
        match sigil {
            Sigil::Scalar => self.emit_scalar_lv(node),
            Sigil::Array => {
                self.emit_array_operand(node, false)?;
                self.scalarize_if(ctx);
                Ok(())
            }
            Sigil::Hash => {
                self.emit_hash_operand(node, false)?;
                self.scalarize_if(ctx);
                Ok(())
            }
            Sigil::ArrayLast => {
                let as_array =
                    Node::new(NodeKind::Variable { sigil: Sigil::Array, name: name.into() }, node.location);
                self.emit_array_operand(&as_array, false)?;
                self.push(Instr::ArrayLastIdx);
                Ok(())
            }
            Sigil::Code => {
                let qualified = self.qualify_name(name);
                let idx = self.name_idx(&qualified);
                self.push(Instr::GlobalCode(idx));
                Ok(())
            }
            Sigil::Glob => Err(CompileError::Internal {
                reason: "typeglob values are not supported".into(),
                position: node.location.start,
            }),
        }
    }

    fn bin_code(&self, op: BinOp) -> BinCode {
        let integer = self.frame().pad.pragmas().use_integer;
        match op {
            BinOp::Add if integer => BinCode::IntAdd,
            BinOp::Sub if integer => BinCode::IntSub,
            BinOp::Mul if integer => BinCode::IntMul,
            BinOp::Div if integer => BinCode::IntDiv,
            BinOp::Add => BinCode::Add,
            BinOp::Sub => BinCode::Sub,
            BinOp::Mul => BinCode::Mul,
            BinOp::Div => BinCode::Div,
            BinOp::Mod => BinCode::Mod,
            BinOp::Pow => BinCode::Pow,
            BinOp::Concat => BinCode::Concat,
            BinOp::Repeat => BinCode::Repeat,
            BinOp::Shl => BinCode::Shl,
            BinOp::Shr => BinCode::Shr,
            BinOp::BitAnd => BinCode::BitAnd,
            BinOp::BitOr => BinCode::BitOr,
            BinOp::BitXor => BinCode::BitXor,
            BinOp::NumEq => BinCode::NumEq,
            BinOp::NumNe => BinCode::NumNe,
            BinOp::NumLt => BinCode::NumLt,
            BinOp::NumGt => BinCode::NumGt,
            BinOp::NumLe => BinCode::NumLe,
            BinOp::NumGe => BinCode::NumGe,
            BinOp::NumCmp => BinCode::NumCmp,
            BinOp::StrEq => BinCode::StrEq,
            BinOp::StrNe => BinCode::StrNe,
            BinOp::StrLt => BinCode::StrLt,
            BinOp::StrGt => BinCode::StrGt,
            BinOp::StrLe => BinCode::StrLe,
            BinOp::StrGe => BinCode::StrGe,
            BinOp::StrCmp => BinCode::StrCmp,
        }
    }

    fn emit_logical(&mut self, op: LogicalOp, lhs: &Node, rhs: &Node, ctx: Cx) -> CompileResult<()> {
        if op == LogicalOp::Xor {
            self.emit_expr(lhs, Cx::Scalar)?;
            self.push(Instr::Unary(UnCode::Not));
            self.emit_expr(rhs, Cx::Scalar)?;
            self.push(Instr::Unary(UnCode::Not));
            self.push(Instr::Binary(BinCode::NumEq));
            self.push(Instr::Unary(UnCode::Not));
            return Ok(());
        }
        let spill = self.acquire_spill();
        self.emit_expr(lhs, Cx::Scalar)?;
        self.push(Instr::Dup);
        self.push(Instr::StoreSpill(spill));
        let jump = match op {
            LogicalOp::And => self.emit_jump(Instr::JumpIfFalse),
            LogicalOp::Or => self.emit_jump(Instr::JumpIfTrue),
            LogicalOp::DefinedOr => self.emit_jump(Instr::JumpIfDefined),
            LogicalOp::Xor => unreachable!(),
        };
        self.emit_expr(rhs, ctx)?;
        self.push(Instr::StoreSpill(spill));
        self.patch_to_here(jump);
        self.push(Instr::LoadSpill(spill));
        self.release_spill(spill);
        Ok(())
    }

    fn emit_ref_take(&mut self, operand: &Node) -> CompileResult<()> {
        match &operand.kind {
            NodeKind::Variable { sigil: Sigil::Array, .. }
            | NodeKind::Deref { sigil: Sigil::Array, .. } => {
                self.emit_array_operand(operand, true)?;
                self.push(Instr::MakeRef);
            }
            NodeKind::Variable { sigil: Sigil::Hash, .. }
            | NodeKind::Deref { sigil: Sigil::Hash, .. } => {
                self.emit_hash_operand(operand, true)?;
                self.push(Instr::MakeRef);
            }
            NodeKind::Variable { sigil: Sigil::Code, name } => {
                let qualified = self.qualify_name(name);
                let idx = self.name_idx(&qualified);
                self.push(Instr::GlobalCode(idx));
            }
            NodeKind::Deref { sigil: Sigil::Code, .. } | NodeKind::AnonSub { .. } => {
                self.emit_expr(operand, Cx::Scalar)?;
            }
            _ => {
                self.emit_scalar_lv(operand)?;
                self.push(Instr::MakeRef);
            }
        }
        Ok(())
    }

    // ===== assignment =====

    pub(crate) fn emit_assign(&mut self, target: &Node, value: &Node) -> CompileResult<()> {
        match target.anns.lvalue {
            Some(LvalueKind::Scalar) | None => {
                self.emit_scalar_lv(target)?;
                self.emit_expr(value, Cx::Scalar)?;
                self.push(Instr::AssignScalar);
                Ok(())
            }
            Some(LvalueKind::List) => self.emit_list_assign(target, value),
        }
    }

    fn emit_list_assign(&mut self, target: &Node, value: &Node) -> CompileResult<()> {
        match &target.kind {
            NodeKind::Variable { sigil: Sigil::Array, .. }
            | NodeKind::Deref { sigil: Sigil::Array, .. } => {
                self.emit_array_operand(target, true)?;
                self.emit_expr(value, Cx::List)?;
                self.push(Instr::AssignArray);
                Ok(())
            }
            NodeKind::Variable { sigil: Sigil::Hash, .. }
            | NodeKind::Deref { sigil: Sigil::Hash, .. } => {
                self.emit_hash_operand(target, true)?;
                self.emit_expr(value, Cx::List)?;
                self.push(Instr::AssignHash);
                Ok(())
            }
            NodeKind::List { elements } => {
                self.emit_expr(value, Cx::List)?;
                // Detach the source values so overlapping targets read
                // the pre-assignment state: ($a, $b) = ($b, $a).
                self.push(Instr::ListCopy);
                let spill = self.acquire_spill();
                self.push(Instr::StoreSpill(spill));
                let mut index = 0u16;
                for el in elements {
                    match elem_lvalue_family(el) {
                        LvFamily::Scalar => {
                            self.emit_assign_target_prep(el)?;
                            self.push(Instr::LoadSpill(spill));
                            self.push(Instr::ListGet(index));
                            self.push(Instr::AssignScalar);
                            self.push(Instr::Pop);
                            index += 1;
                        }
                        LvFamily::Array => {
                            self.emit_array_operand(strip_decl(el), true)?;
                            self.push(Instr::LoadSpill(spill));
                            self.push(Instr::ListSliceFrom(index));
                            self.push(Instr::AssignArray);
                            self.push(Instr::Pop);
                            index = u16::MAX;
                        }
                        LvFamily::Hash => {
                            self.emit_hash_operand(strip_decl(el), true)?;
                            self.push(Instr::LoadSpill(spill));
                            self.push(Instr::ListSliceFrom(index));
                            self.push(Instr::AssignHash);
                            self.push(Instr::Pop);
                            index = u16::MAX;
                        }
                    }
                    if index == u16::MAX {
                        break;
                    }
                }
                self.push(Instr::LoadSpill(spill));
                self.release_spill(spill);
                Ok(())
            }
            _ => Err(CompileError::Internal {
                reason: "unsupported list-assignment target".into(),
                position: target.location.start,
            }),
        }
    }

    /// Emits the lvalue cell for a scalar element of a list-assignment
    /// target (handles nested `my` inside `my (...)` having been emitted
    /// already by the declaration statement path).
    fn emit_assign_target_prep(&mut self, el: &Node) -> CompileResult<()> {
        self.emit_scalar_lv(strip_decl(el))
    }

    fn emit_compound_assign(&mut self, op: AssignOp, target: &Node, value: &Node) -> CompileResult<()> {
        let spill = self.acquire_spill();
        self.emit_scalar_lv(target)?;
        self.push(Instr::StoreSpill(spill));
        match op {
            AssignOp::Bin(bin) => {
                self.push(Instr::LoadSpill(spill));
                self.push(Instr::LoadSpill(spill));
                self.emit_expr(value, Cx::Scalar)?;
                let code = self.bin_code(bin);
                self.push(Instr::Binary(code));
                self.push(Instr::AssignScalar);
            }
            AssignOp::And | AssignOp::Or | AssignOp::DefinedOr => {
                self.push(Instr::LoadSpill(spill));
                let jump = match op {
                    AssignOp::And => self.emit_jump(Instr::JumpIfFalse),
                    AssignOp::Or => self.emit_jump(Instr::JumpIfTrue),
                    _ => self.emit_jump(Instr::JumpIfDefined),
                };
                self.push(Instr::LoadSpill(spill));
                self.emit_expr(value, Cx::Scalar)?;
                self.push(Instr::AssignScalar);
                self.push(Instr::Pop);
                self.patch_to_here(jump);
                self.push(Instr::LoadSpill(spill));
            }
        }
        self.release_spill(spill);
        Ok(())
    }

    // ===== strings =====

    pub(crate) fn emit_string_pieces(&mut self, pieces: &[StringPiece]) -> CompileResult<()> {
        if let [StringPiece::Literal(bytes)] = pieces {
            let idx = self.const_idx(Const::Str(bytes.clone()));
            self.push(Instr::PushConst(idx));
            return Ok(());
        }
        if pieces.is_empty() {
            let idx = self.const_idx(Const::Str(Vec::new()));
            self.push(Instr::PushConst(idx));
            return Ok(());
        }
        for piece in pieces {
            match piece {
                StringPiece::Literal(bytes) => {
                    let idx = self.const_idx(Const::Str(bytes.clone()));
                    self.push(Instr::PushConst(idx));
                }
                StringPiece::Interp(expr) => {
                    if is_list_interp(expr) {
                        self.emit_expr(expr, Cx::List)?;
                        self.push(Instr::JoinInterp);
                    } else {
                        self.emit_expr(expr, Cx::Scalar)?;
                    }
                }
            }
        }
        self.push(Instr::BuildString(pieces.len() as u16));
        Ok(())
    }

    // ===== calls =====

    fn emit_func_call(
        &mut self,
        node: &Node,
        name: &str,
        args: &[Node],
        ctx: Cx,
    ) -> CompileResult<()> {
        match name {
            // Element-shaped builtins get dedicated instructions.
            "exists" | "delete" if args.len() == 1 => {
                if let NodeKind::HashElem { hash, key } = &args[0].kind {
                    self.emit_hash_operand(hash, true)?;
                    self.emit_expr(key, Cx::Scalar)?;
                    self.push(if name == "exists" {
                        Instr::HashExists
                    } else {
                        Instr::HashDelete
                    });
                    return Ok(());
                }
                Err(CompileError::Internal {
                    reason: format!("{name} requires a hash element"),
                    position: node.location.start,
                })
            }
            "defined" if args.len() == 1 => {
                if let NodeKind::Readline { handle } = &args[0].kind {
                    // defined(<FH>) in while conditions.
                    let idx = self.name_idx(handle);
                    self.push(Instr::ReadLine(idx));
                } else {
                    self.emit_expr(&args[0], Cx::Scalar)?;
                }
                self.push(Instr::Unary(UnCode::Defined));
                Ok(())
            }
            "defined" if args.is_empty() => {
                let idx = self.name_idx("main::_");
                self.push(Instr::GlobalScalar(idx));
                self.push(Instr::Unary(UnCode::Defined));
                Ok(())
            }
            "scalar" if args.len() == 1 => {
                self.emit_expr(&args[0], Cx::Scalar)?;
                self.push(Instr::CtxScalar);
                Ok(())
            }
            "wantarray" => {
                self.push(Instr::Wantarray);
                Ok(())
            }
            "shift" | "pop" if args.is_empty() => {
                let array = if self.frame().is_root { "main::ARGV" } else { "main::_" };
                let idx = self.name_idx(array);
                self.push(Instr::GlobalArray(idx));
                self.push(Instr::MakeList(1));
                let nidx = self.name_idx(name);
                self.push(Instr::CallNamed(nidx, Cx::Scalar));
                self.push(Instr::CtxScalar);
                Ok(())
            }
            // Aggregate-first builtins need the aggregate itself, not its
            // flattened elements.
            "push" | "unshift" | "shift" | "pop" | "splice" | "keys" | "values" | "each" => {
                if args.is_empty() {
                    return Err(CompileError::Internal {
                        reason: format!("{name} requires an aggregate argument"),
                        position: node.location.start,
                    });
                }
                match &args[0].kind {
                    NodeKind::Variable { sigil: Sigil::Hash, .. }
                    | NodeKind::Deref { sigil: Sigil::Hash, .. } => {
                        self.emit_hash_operand(&args[0], true)?;
                    }
                    _ => {
                        self.emit_array_operand(&args[0], true)?;
                    }
                }
                // The aggregate travels as a reference so list flattening
                // cannot dissolve it (the \@ prototype convention).
                self.push(Instr::MakeRef);
                for arg in &args[1..] {
                    self.emit_expr(arg, Cx::List)?;
                }
                self.push(Instr::MakeList(args.len() as u16));
                let nidx = self.name_idx(name);
                self.push(Instr::CallNamed(nidx, call_ctx(ctx)));
                self.scalarize_if(ctx);
                Ok(())
            }
            "split" => {
                // The pattern argument travels as a string; `split ' '`
                // keeps its awk-style meaning at run time.
                match args.first().map(|a| &a.kind) {
                    Some(NodeKind::RegexLiteral { regex }) => {
                        self.emit_pattern_string(&regex.pattern, regex.flags)?;
                    }
                    Some(_) => self.emit_expr(&args[0], Cx::Scalar)?,
                    None => {
                        let idx = self.const_idx(Const::Str(b" ".to_vec()));
                        self.push(Instr::PushConst(idx));
                    }
                }
                for arg in args.iter().skip(1) {
                    self.emit_expr(arg, Cx::List)?;
                }
                self.push(Instr::MakeList(args.len().max(1) as u16));
                let nidx = self.name_idx("split");
                self.push(Instr::CallNamed(nidx, call_ctx(ctx)));
                self.scalarize_if(ctx);
                Ok(())
            }
            _ => {
                self.emit_list(args)?;
                let qualified = if name.contains("::") {
                    name.to_string()
                } else if is_builtin_name(name) {
                    name.to_string()
                } else {
                    self.qualify_name(name)
                };
                let nidx = self.name_idx(&qualified);
                self.push(Instr::CallNamed(nidx, call_ctx(ctx)));
                self.scalarize_if(ctx);
                Ok(())
            }
        }
    }

    fn emit_method_call(
        &mut self,
        receiver: &Node,
        method: &MethodName,
        args: &[Node],
        ctx: Cx,
    ) -> CompileResult<()> {
        match &receiver.kind {
            NodeKind::Bareword { word } => {
                let idx = self.const_idx(Const::Str(word.clone().into_bytes()));
                self.push(Instr::PushConst(idx));
            }
            _ => self.emit_expr(receiver, Cx::Scalar)?,
        }
        match method {
            MethodName::Named(name) => {
                self.emit_list(args)?;
                let idx = self.name_idx(name);
                self.push(Instr::CallMethod(idx, call_ctx(ctx)));
            }
            MethodName::Dynamic(expr) => {
                self.emit_expr(expr, Cx::Scalar)?;
                self.emit_list(args)?;
                self.push(Instr::CallMethodDyn(call_ctx(ctx)));
            }
        }
        self.scalarize_if(ctx);
        Ok(())
    }

    // ===== regex =====

    fn emit_match_bind(
        &mut self,
        target: &Node,
        regex: &Node,
        negated: bool,
        ctx: Cx,
    ) -> CompileResult<()> {
        match &regex.kind {
            NodeKind::RegexLiteral { regex } => self.emit_regex_against(target, regex, negated, ctx),
            // `$x =~ $qr` - pattern known only at run time.
            _ => {
                self.emit_expr(target, Cx::Scalar)?;
                self.emit_expr(regex, Cx::Scalar)?;
                self.push(Instr::MatchDyn { ctx: call_ctx(ctx), negated });
                Ok(())
            }
        }
    }

    fn emit_regex_against(
        &mut self,
        target: &Node,
        regex: &RegexNode,
        negated: bool,
        ctx: Cx,
    ) -> CompileResult<()> {
        match regex.op {
            RegexOp::Match | RegexOp::Quote => {
                self.emit_expr(target, Cx::Scalar)?;
                match literal_pattern(&regex.pattern) {
                    Some(source) => {
                        let rx = self.regex_idx(RegexSpec { source, flags: regex.flags });
                        self.push(Instr::MatchRe { rx, ctx: call_ctx(ctx), negated });
                    }
                    None => {
                        self.emit_pattern_string(&regex.pattern, regex.flags)?;
                        self.push(Instr::MatchDyn { ctx: call_ctx(ctx), negated });
                    }
                }
                Ok(())
            }
            RegexOp::Subst => {
                self.emit_scalar_lv(target)?;
                let replacement = regex.replacement.clone().unwrap_or_default();
                let repl_node = Node::new(
                    NodeKind::StringLiteral { pieces: replacement, interpolates: true },
                    // Replacement spans are inside the literal.
                    perl_position_tracking::ByteSpan::empty(0),
                );
                let idx = self.compile_closure("__SUBST__", &repl_node)?;
                self.push(Instr::MakeClosure(idx));
                match literal_pattern(&regex.pattern) {
                    Some(source) => {
                        let rx = self.regex_idx(RegexSpec { source, flags: regex.flags });
                        self.push(Instr::Subst { rx });
                    }
                    None => {
                        // Dynamic pattern: stack wants [target, pattern, repl].
                        let spill = self.acquire_spill();
                        self.push(Instr::StoreSpill(spill));
                        self.emit_pattern_string(&regex.pattern, regex.flags)?;
                        self.push(Instr::LoadSpill(spill));
                        self.release_spill(spill);
                        self.push(Instr::SubstDyn);
                    }
                }
                if negated {
                    self.push(Instr::Unary(UnCode::Not));
                }
                Ok(())
            }
            RegexOp::Trans => {
                self.emit_scalar_lv(target)?;
                let from = expand_tr_ranges(&literal_bytes(&regex.pattern));
                let to = expand_tr_ranges(&literal_bytes(
                    regex.replacement.as_deref().unwrap_or(&[]),
                ));
                let idx = self.trans_idx(TransSpec {
                    from,
                    to,
                    complement: regex.flags.complement,
                    delete: regex.flags.delete,
                    non_destructive: regex.flags.non_destructive,
                });
                self.push(Instr::Trans(idx));
                if negated {
                    self.push(Instr::Unary(UnCode::Not));
                }
                Ok(())
            }
        }
    }

    /// `qr//` as a value: the pattern string with inline flags.
    fn emit_qr_value(&mut self, regex: &RegexNode) -> CompileResult<()> {
        self.emit_pattern_string(&regex.pattern, regex.flags)
    }

    /// Builds the pattern string (with inline flag group) on the stack.
    fn emit_pattern_string(&mut self, pieces: &[StringPiece], flags: RegexFlags) -> CompileResult<()> {
        let mut inline = String::new();
        if flags.ignore_case {
            inline.push('i');
        }
        if flags.multi_line {
            inline.push('m');
        }
        if flags.dot_all {
            inline.push('s');
        }
        if flags.extended {
            inline.push('x');
        }
        let mut count = 0u16;
        if !inline.is_empty() {
            let idx = self.const_idx(Const::Str(format!("(?{inline})").into_bytes()));
            self.push(Instr::PushConst(idx));
            count += 1;
        }
        for piece in pieces {
            match piece {
                StringPiece::Literal(bytes) => {
                    let idx = self.const_idx(Const::Str(bytes.clone()));
                    self.push(Instr::PushConst(idx));
                }
                StringPiece::Interp(expr) => self.emit_expr(expr, Cx::Scalar)?,
            }
            count += 1;
        }
        if count == 0 {
            let idx = self.const_idx(Const::Str(Vec::new()));
            self.push(Instr::PushConst(idx));
            count = 1;
        }
        self.push(Instr::BuildString(count));
        Ok(())
    }

    // ===== eval =====

    fn emit_eval_block(&mut self, body: &Node, ctx: Cx) -> CompileResult<()> {
        let result = self.acquire_spill();
        let handler = self.emit_jump(Instr::PushHandler);
        // Protected region.
        self.enter_scope(body)?;
        self.emit_block_value(body, ctx)?;
        self.push(Instr::StoreSpill(result));
        self.exit_scope();
        self.push(Instr::PopHandler);
        // Normal exit clears $@.
        let err_idx = self.name_idx("main::@");
        self.push(Instr::GlobalScalar(err_idx));
        let empty = self.const_idx(Const::Str(Vec::new()));
        self.push(Instr::PushConst(empty));
        self.push(Instr::AssignScalar);
        self.push(Instr::Pop);
        let done = self.emit_jump(Instr::Jump);
        // Catch: the engine restored the stacks and bound $@.
        self.patch_to_here(handler);
        match ctx {
            Cx::List => self.push(Instr::MakeList(0)),
            _ => self.push(Instr::PushUndef),
        }
        self.push(Instr::StoreSpill(result));
        self.patch_to_here(done);
        self.push(Instr::LoadSpill(result));
        self.release_spill(result);
        Ok(())
    }
}

/// Call-context byte for a call in the given expression context.
fn call_ctx(ctx: Cx) -> Cx {
    match ctx {
        Cx::Void => Cx::Void,
        Cx::Scalar => Cx::Scalar,
        Cx::List | Cx::Runtime => Cx::List,
    }
}

/// Lvalue family of a list-assignment element.
enum LvFamily {
    Scalar,
    Array,
    Hash,
}

fn elem_lvalue_family(node: &Node) -> LvFamily {
    match &strip_decl(node).kind {
        NodeKind::Variable { sigil: Sigil::Array, .. }
        | NodeKind::Deref { sigil: Sigil::Array, .. } => LvFamily::Array,
        NodeKind::Variable { sigil: Sigil::Hash, .. }
        | NodeKind::Deref { sigil: Sigil::Hash, .. } => LvFamily::Hash,
        _ => LvFamily::Scalar,
    }
}

/// Unwraps a `my $x` declaration used as an assignment target element.
fn strip_decl(node: &Node) -> &Node {
    match &node.kind {
        NodeKind::VarDecl { target, .. } => target,
        _ => node,
    }
}

fn decl_single_target(node: &Node) -> Option<&Node> {
    match &node.kind {
        NodeKind::VarDecl { target, .. } => match &target.kind {
            NodeKind::Variable { .. } | NodeKind::ArrayElem { .. } | NodeKind::HashElem { .. } => {
                Some(target)
            }
            _ => None,
        },
        _ => None,
    }
}

/// `"@list"`-style pieces join with `$"`.
fn is_list_interp(node: &Node) -> bool {
    matches!(
        node.kind,
        NodeKind::Variable { sigil: Sigil::Array, .. }
            | NodeKind::Deref { sigil: Sigil::Array, .. }
            | NodeKind::Slice { .. }
    )
}

/// Fully literal pattern text, when no interpolation is present.
fn literal_pattern(pieces: &[StringPiece]) -> Option<String> {
    let mut out = Vec::new();
    for piece in pieces {
        match piece {
            StringPiece::Literal(bytes) => out.extend_from_slice(bytes),
            StringPiece::Interp(_) => return None,
        }
    }
    Some(String::from_utf8_lossy(&out).into_owned())
}

fn literal_bytes(pieces: &[StringPiece]) -> Vec<u8> {
    let mut out = Vec::new();
    for piece in pieces {
        if let StringPiece::Literal(bytes) = piece {
            out.extend_from_slice(bytes);
        }
    }
    out
}

/// Expands `a-z` ranges in a `tr///` search or replacement list.
fn expand_tr_ranges(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        if i + 2 < bytes.len() && bytes[i + 1] == b'-' && bytes[i] <= bytes[i + 2] {
            for b in bytes[i]..=bytes[i + 2] {
                out.push(b);
            }
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    out
}

/// Builtins the execution engine implements natively.
pub(crate) fn is_builtin_name(name: &str) -> bool {
    matches!(
        name,
        "print"
            | "say"
            | "sprintf"
            | "printf"
            | "join"
            | "split"
            | "map"
            | "grep"
            | "sort"
            | "reverse"
            | "keys"
            | "values"
            | "each"
            | "exists"
            | "delete"
            | "defined"
            | "undef"
            | "scalar"
            | "wantarray"
            | "ref"
            | "bless"
            | "die"
            | "warn"
            | "push"
            | "pop"
            | "shift"
            | "unshift"
            | "splice"
            | "length"
            | "substr"
            | "index"
            | "rindex"
            | "uc"
            | "lc"
            | "ucfirst"
            | "lcfirst"
            | "chomp"
            | "chop"
            | "chr"
            | "ord"
            | "abs"
            | "int"
            | "sqrt"
            | "hex"
            | "oct"
            | "__eval_string__"
            | "__install_sub__"
    )
}

/// Globals exempt from `strict 'vars'`.
fn is_special_global(name: &str) -> bool {
    if name.contains("::") || name.starts_with('^') {
        return true;
    }
    if name.chars().all(|c| c.is_ascii_digit()) {
        return true;
    }
    if name.len() == 1 && !name.chars().next().is_some_and(|c| c.is_ascii_alphabetic()) {
        return true;
    }
    matches!(
        name,
        "_" | "a" | "b" | "0" | "ENV" | "ARGV" | "ARGVOUT" | "INC" | "SIG" | "STDIN" | "STDOUT"
            | "STDERR" | "F"
    )
}
