//! Statement lowering: control structures, declarations, loops with their
//! four-label discipline, and the per-statement control-flow checks that
//! let markers thrown from nested calls reach the loop that owns them.

use crate::{Cx, Emitter, LoopEmit, ScopeEmit};
use perl_ast::{DeclKind, GotoTarget, LoopControlOp, Node, NodeKind, Sigil};
use perl_bytecode::{Const, Instr, MarkerCode, NO_LABEL};
use perl_error::{CompileError, CompileResult};
use perl_scope::BindingKind;

impl Emitter {
    pub(crate) fn emit_statement(&mut self, node: &Node) -> CompileResult<()> {
        self.note_line(node.location.start);
        match &node.kind {
            NodeKind::ExpressionStatement { expression } => {
                self.emit_expr(expression, Cx::Void)?;
                self.push(Instr::Pop);
                Ok(())
            }
            NodeKind::VarDecl { .. } => {
                self.emit_decl_expr(node)?;
                self.push(Instr::Pop);
                Ok(())
            }
            NodeKind::If { negated, cond, then_block, elsifs, else_block } => {
                self.emit_expr(cond, Cx::Scalar)?;
                let mut exit_jumps = Vec::new();
                let jump_next = if *negated {
                    self.emit_jump(Instr::JumpIfTrue)
                } else {
                    self.emit_jump(Instr::JumpIfFalse)
                };
                self.emit_block_stmts(then_block)?;
                exit_jumps.push(self.emit_jump(Instr::Jump));
                self.patch_to_here(jump_next);
                for (elsif_cond, elsif_block) in elsifs {
                    self.emit_expr(elsif_cond, Cx::Scalar)?;
                    let jump_next = self.emit_jump(Instr::JumpIfFalse);
                    self.emit_block_stmts(elsif_block)?;
                    exit_jumps.push(self.emit_jump(Instr::Jump));
                    self.patch_to_here(jump_next);
                }
                if let Some(else_block) = else_block {
                    self.emit_block_stmts(else_block)?;
                }
                for jump in exit_jumps {
                    self.patch_to_here(jump);
                }
                Ok(())
            }
            NodeKind::While { label, negated, cond, body, continue_block } => {
                self.emit_while(label.as_deref(), *negated, cond, body, continue_block.as_deref())
            }
            NodeKind::ForC { label, init, cond, update, body } => {
                self.frame_mut().pad.enter_scope();
                self.frame_mut().scopes.push(ScopeEmit::default());
                if let Some(init) = init {
                    self.emit_statement_or_expr(init)?;
                }
                self.emit_c_loop(label.as_deref(), cond.as_deref(), update.as_deref(), body)?;
                self.exit_scope();
                Ok(())
            }
            NodeKind::Foreach { label, var, declare, list, body } => {
                self.emit_foreach(label.as_deref(), var.as_deref(), *declare, list, body)
            }
            NodeKind::BareBlock { label, body } => {
                let label_idx = match label {
                    Some(l) => self.name_idx(l),
                    None => NO_LABEL,
                };
                let push_idx = self.begin_loop(label.as_deref(), label_idx, u32::MAX);
                let start = self.here();
                if let Some(l) = self.frame_mut().loops.last_mut() {
                    l.start = start;
                    l.dispatch_patches.push(push_idx);
                }
                self.emit_block_stmts(body)?;
                let end = self.here();
                self.push(Instr::LoopPop);
                let loop_emit = self
                    .frame_mut()
                    .loops
                    .pop()
                    .unwrap_or_else(|| unreachable!("pushed above"));
                // A bare block is a loop that runs once: last and next both
                // leave, redo restarts.
                self.patch_loop(loop_emit, end, end, start);
                Ok(())
            }
            NodeKind::SubDef { name, proto, body } => {
                let qualified = if name.contains("::") {
                    name.clone()
                } else {
                    self.qualify_name(name)
                };
                let idx = self.compile_closure(&qualified, body)?;
                let name_const = self.const_idx(Const::Str(qualified.into_bytes()));
                self.push(Instr::PushConst(name_const));
                self.push(Instr::MakeClosure(idx));
                let argc = match proto {
                    Some(proto) => {
                        let proto_const = self.const_idx(Const::Str(proto.clone().into_bytes()));
                        self.push(Instr::PushConst(proto_const));
                        3
                    }
                    None => 2,
                };
                self.push(Instr::MakeList(argc));
                let install = self.name_idx("__install_sub__");
                self.push(Instr::CallNamed(install, Cx::Void));
                self.push(Instr::Pop);
                Ok(())
            }
            NodeKind::Return { value } => {
                match value {
                    Some(value) => self.emit_expr(value, Cx::List)?,
                    None => self.push(Instr::MakeList(0)),
                }
                self.emit_teardown_to(0);
                let ret = self.frame().ret_slot;
                self.push(Instr::StoreSpill(ret));
                let jump = self.emit_jump(Instr::Jump);
                self.frame_mut().epilogue_patches.push(jump);
                Ok(())
            }
            NodeKind::LoopControl { op, label } => self.emit_loop_control(*op, label.as_deref()),
            NodeKind::GotoStmt { target } => self.emit_goto(target),
            NodeKind::PackageDecl { name } => {
                self.frame_mut().pad.set_package(name.clone());
                Ok(())
            }
            NodeKind::UseDecl { is_no, module, args } => {
                self.frame_mut().pad.pragmas_mut().apply(module, args, *is_no);
                Ok(())
            }
            // Blocks and eval/do at statement position.
            NodeKind::Block { .. } => self.emit_block_stmts(node),
            _ => {
                self.emit_expr(node, Cx::Void)?;
                self.push(Instr::Pop);
                Ok(())
            }
        }
    }

    /// C-style `for` initializers may be declarations or plain exprs.
    fn emit_statement_or_expr(&mut self, node: &Node) -> CompileResult<()> {
        match &node.kind {
            NodeKind::VarDecl { .. } | NodeKind::ExpressionStatement { .. } => {
                self.emit_statement(node)
            }
            _ => {
                self.emit_expr(node, Cx::Void)?;
                self.push(Instr::Pop);
                Ok(())
            }
        }
    }

    /// Emits a block's statements inside their own scope, adding the
    /// control-flow check after each statement when a loop is active.
    pub(crate) fn emit_block_stmts(&mut self, block: &Node) -> CompileResult<()> {
        self.enter_scope(block)?;
        let statements: Vec<&Node> = match &block.kind {
            NodeKind::Block { statements } => statements.iter().collect(),
            _ => vec![block],
        };
        for stmt in statements {
            self.emit_statement(stmt)?;
            self.emit_ctl_check()?;
        }
        self.exit_scope();
        Ok(())
    }

    /// Emits a block leaving its last expression's value on the stack.
    pub(crate) fn emit_block_value(&mut self, block: &Node, ctx: Cx) -> CompileResult<()> {
        let statements: Vec<&Node> = match &block.kind {
            NodeKind::Block { statements } => statements.iter().collect(),
            _ => vec![block],
        };
        let Some((last, init)) = statements.split_last() else {
            match ctx {
                Cx::List => self.push(Instr::MakeList(0)),
                _ => self.push(Instr::PushUndef),
            }
            return Ok(());
        };
        for stmt in init {
            self.emit_statement(stmt)?;
            self.emit_ctl_check()?;
        }
        match &last.kind {
            NodeKind::ExpressionStatement { expression } => self.emit_expr(expression, ctx),
            kind if is_expression_kind(kind) => self.emit_expr(last, ctx),
            _ => {
                self.emit_statement(last)?;
                match ctx {
                    Cx::List => self.push(Instr::MakeList(0)),
                    _ => self.push(Instr::PushUndef),
                }
                Ok(())
            }
        }
    }

    /// The per-statement control-flow registry check: markers thrown from
    /// calls during the statement are routed to the loop they bind to.
    fn emit_ctl_check(&mut self) -> CompileResult<()> {
        let Some(loop_index) = self.frame().loops.len().checked_sub(1) else {
            return Ok(());
        };
        let (label_idx, scope_depth) = {
            let l = &self.frame().loops[loop_index];
            (l.label_idx, l.scope_depth)
        };
        // When no scopes need unwinding the dispatch can target the loop
        // labels directly; otherwise it goes through teardown stubs.
        let needs_teardown = self
            .frame()
            .scopes
            .iter()
            .skip(scope_depth)
            .any(|s| s.local_mark.is_some() || s.regex_snapshot || s.glob_restore.is_some());
        let dispatch_idx = self.frame().instrs.len();
        self.push(Instr::CtlDispatch { label: label_idx, last: u32::MAX, next: u32::MAX, redo: u32::MAX });
        if !needs_teardown {
            self.frame_mut().loops[loop_index].dispatch_patches.push(dispatch_idx);
            return Ok(());
        }
        let over = self.emit_jump(Instr::Jump);
        // last stub
        let last_stub = self.here();
        self.emit_teardown_to(scope_depth);
        let jl = self.emit_jump(Instr::Jump);
        // next stub
        let next_stub = self.here();
        self.emit_teardown_to(scope_depth);
        let jn = self.emit_jump(Instr::Jump);
        // redo stub
        let redo_stub = self.here();
        self.emit_teardown_to(scope_depth);
        let jr = self.emit_jump(Instr::Jump);
        {
            let frame = self.frame_mut();
            if let Instr::CtlDispatch { last, next, redo, .. } = &mut frame.instrs[dispatch_idx] {
                *last = last_stub;
                *next = next_stub;
                *redo = redo_stub;
            }
            let l = &mut frame.loops[loop_index];
            l.last_patches.push(jl);
            l.next_patches.push(jn);
            l.redo_patches.push(jr);
        }
        self.patch_to_here(over);
        Ok(())
    }

    // ===== loops =====

    /// Pushes the loop bookkeeping and emits its registry entry; the
    /// `LoopPush` targets are patched together with the dispatches.
    fn begin_loop(&mut self, label: Option<&str>, label_idx: u16, start: u32) -> usize {
        let push_idx = self.frame().instrs.len();
        self.push(Instr::LoopPush {
            label: label_idx,
            last: u32::MAX,
            next: u32::MAX,
            redo: u32::MAX,
        });
        let scope_depth = self.frame().scopes.len();
        self.frame_mut().loops.push(LoopEmit {
            label: label.map(str::to_string),
            label_idx,
            scope_depth,
            start,
            last_patches: Vec::new(),
            next_patches: Vec::new(),
            redo_patches: Vec::new(),
            dispatch_patches: Vec::new(),
        });
        push_idx
    }

    fn emit_while(
        &mut self,
        label: Option<&str>,
        negated: bool,
        cond: &Node,
        body: &Node,
        continue_block: Option<&Node>,
    ) -> CompileResult<()> {
        let label_idx = match label {
            Some(l) => self.name_idx(l),
            None => NO_LABEL,
        };
        let push_idx = self.begin_loop(label, label_idx, u32::MAX);
        let cond_start = self.here();
        if let Some(l) = self.frame_mut().loops.last_mut() {
            l.start = cond_start;
            l.dispatch_patches.push(push_idx);
        }
        self.push(Instr::SignalCheck);
        self.emit_loop_cond(cond)?;
        let exit = if negated {
            self.emit_jump(Instr::JumpIfTrue)
        } else {
            self.emit_jump(Instr::JumpIfFalse)
        };
        let redo_target = self.here();
        self.emit_block_stmts(body)?;
        let next_target = self.here();
        if let Some(cont) = continue_block {
            self.emit_block_stmts(cont)?;
        }
        let back = self.emit_jump(Instr::Jump);
        {
            let frame = self.frame_mut();
            crate::patch_jump(&mut frame.instrs, back, cond_start);
        }
        let end = self.here();
        self.push(Instr::LoopPop);
        // The condition-false exit lands on the LoopPop too.
        crate::patch_jump(&mut self.frame_mut().instrs, exit, end);
        let loop_emit = self
            .frame_mut()
            .loops
            .pop()
            .unwrap_or_else(|| unreachable!("pushed above"));
        self.patch_loop(loop_emit, end, next_target, redo_target);
        Ok(())
    }

    /// `while (<>)` and friends: a readline condition implicitly assigns
    /// `$_` and tests definedness.
    fn emit_loop_cond(&mut self, cond: &Node) -> CompileResult<()> {
        match &cond.kind {
            NodeKind::Readline { handle } => {
                let topic = self.name_idx("main::_");
                self.push(Instr::GlobalScalar(topic));
                let h = self.name_idx(handle);
                self.push(Instr::ReadLine(h));
                self.push(Instr::AssignScalar);
                self.push(Instr::Unary(perl_bytecode::UnCode::Defined));
                Ok(())
            }
            NodeKind::Assign { target, value } if matches!(value.kind, NodeKind::Readline { .. }) => {
                let NodeKind::Readline { handle } = &value.kind else { unreachable!() };
                self.emit_scalar_lv(target)?;
                let h = self.name_idx(handle);
                self.push(Instr::ReadLine(h));
                self.push(Instr::AssignScalar);
                self.push(Instr::Unary(perl_bytecode::UnCode::Defined));
                Ok(())
            }
            NodeKind::VarDecl { init: Some(init), .. }
                if matches!(init.kind, NodeKind::Readline { .. }) =>
            {
                self.emit_decl_expr(cond)?;
                self.push(Instr::Unary(perl_bytecode::UnCode::Defined));
                Ok(())
            }
            // List assignment in boolean position tests the element count
            // (`while (my ($k, $v) = each %h)`).
            NodeKind::VarDecl { target, init: Some(_), .. }
                if matches!(target.kind, NodeKind::List { .. }) =>
            {
                self.emit_decl_expr(cond)?;
                self.push(Instr::ListLen);
                Ok(())
            }
            NodeKind::Assign { target, .. } if matches!(target.kind, NodeKind::List { .. }) => {
                self.emit_expr(cond, Cx::List)?;
                self.push(Instr::ListLen);
                Ok(())
            }
            _ => self.emit_expr(cond, Cx::Scalar),
        }
    }

    fn emit_c_loop(
        &mut self,
        label: Option<&str>,
        cond: Option<&Node>,
        update: Option<&Node>,
        body: &Node,
    ) -> CompileResult<()> {
        let label_idx = match label {
            Some(l) => self.name_idx(l),
            None => NO_LABEL,
        };
        let push_idx = self.begin_loop(label, label_idx, u32::MAX);
        let cond_start = self.here();
        if let Some(l) = self.frame_mut().loops.last_mut() {
            l.start = cond_start;
            l.dispatch_patches.push(push_idx);
        }
        self.push(Instr::SignalCheck);
        let exit = match cond {
            Some(cond) => {
                self.emit_expr(cond, Cx::Scalar)?;
                Some(self.emit_jump(Instr::JumpIfFalse))
            }
            None => None,
        };
        let redo_target = self.here();
        self.emit_block_stmts(body)?;
        let next_target = self.here();
        if let Some(update) = update {
            self.emit_expr(update, Cx::Void)?;
            self.push(Instr::Pop);
        }
        let back = self.emit_jump(Instr::Jump);
        {
            let frame = self.frame_mut();
            crate::patch_jump(&mut frame.instrs, back, cond_start);
        }
        let end = self.here();
        self.push(Instr::LoopPop);
        if let Some(exit) = exit {
            crate::patch_jump(&mut self.frame_mut().instrs, exit, end);
        }
        let loop_emit = self
            .frame_mut()
            .loops
            .pop()
            .unwrap_or_else(|| unreachable!("pushed above"));
        self.patch_loop(loop_emit, end, next_target, redo_target);
        Ok(())
    }

    fn emit_foreach(
        &mut self,
        label: Option<&str>,
        var: Option<&Node>,
        declare: bool,
        list: &Node,
        body: &Node,
    ) -> CompileResult<()> {
        // Loop-local state: the pre-evaluated list and the index.
        self.emit_expr(list, Cx::List)?;
        let list_sp = self.acquire_spill();
        self.push(Instr::StoreSpill(list_sp));
        let idx_sp = self.acquire_spill();
        self.push(Instr::PushInt(0));
        self.push(Instr::StoreSpill(idx_sp));

        // The loop variable: a fresh lexical, or an aliased global saved
        // for restoration on every exit path.
        self.frame_mut().pad.enter_scope();
        let mut loop_scope = ScopeEmit::default();
        let binding = match (var, declare) {
            (Some(var_node), true) => {
                let NodeKind::Variable { name, .. } = &var_node.kind else {
                    return Err(CompileError::Internal {
                        reason: "foreach variable must be a scalar".into(),
                        position: var_node.location.start,
                    });
                };
                let binding = self.declare_var(Sigil::Scalar, name, BindingKind::My);
                ForeachVar::Slot(binding.slot)
            }
            (var, _) => {
                let name = match var {
                    Some(var_node) => {
                        let NodeKind::Variable { name, .. } = &var_node.kind else {
                            return Err(CompileError::Internal {
                                reason: "foreach variable must be a scalar".into(),
                                position: var_node.location.start,
                            });
                        };
                        self.qualify_name(name)
                    }
                    None => "main::_".to_string(),
                };
                let name_idx = self.name_idx(&name);
                let save = self.acquire_spill();
                self.push(Instr::GlobalScalar(name_idx));
                self.push(Instr::StoreSpill(save));
                loop_scope.glob_restore = Some((save, name_idx));
                ForeachVar::Global(name_idx)
            }
        };
        self.frame_mut().scopes.push(loop_scope);

        let label_idx = match label {
            Some(l) => self.name_idx(l),
            None => NO_LABEL,
        };
        // The loop's scope_depth sits above its own variable scope: in-loop
        // jumps keep the variable aliased, the loop exit restores it.
        let push_idx = self.begin_loop(label, label_idx, u32::MAX);
        let cond_start = self.here();
        if let Some(l) = self.frame_mut().loops.last_mut() {
            l.start = cond_start;
            l.dispatch_patches.push(push_idx);
        }

        self.push(Instr::SignalCheck);
        self.push(Instr::LoadSpill(idx_sp));
        self.push(Instr::LoadSpill(list_sp));
        self.push(Instr::ListLen);
        self.push(Instr::Binary(perl_bytecode::BinCode::NumLt));
        let exit = self.emit_jump(Instr::JumpIfFalse);

        // Alias the loop variable to the current element cell.
        self.push(Instr::LoadSpill(list_sp));
        self.push(Instr::LoadSpill(idx_sp));
        self.push(Instr::ListGetDyn);
        match binding {
            ForeachVar::Slot(slot) => self.push(Instr::BindScalar(slot)),
            ForeachVar::Global(name_idx) => self.push(Instr::GlobBindScalar(name_idx)),
        }

        let redo_target = self.here();
        self.emit_block_stmts(body)?;
        let next_target = self.here();
        self.push(Instr::LoadSpill(idx_sp));
        self.push(Instr::PushInt(1));
        self.push(Instr::Binary(perl_bytecode::BinCode::Add));
        self.push(Instr::StoreSpill(idx_sp));
        let back = self.emit_jump(Instr::Jump);
        {
            let frame = self.frame_mut();
            crate::patch_jump(&mut frame.instrs, back, cond_start);
        }
        let end = self.here();
        self.push(Instr::LoopPop);
        crate::patch_jump(&mut self.frame_mut().instrs, exit, end);
        let loop_emit = self
            .frame_mut()
            .loops
            .pop()
            .unwrap_or_else(|| unreachable!("pushed above"));
        self.patch_loop(loop_emit, end, next_target, redo_target);

        // Loop exit: restore the aliased global, drop loop-local state.
        self.exit_scope();
        self.release_spill(idx_sp);
        self.release_spill(list_sp);
        Ok(())
    }

    /// Patches every recorded jump and dispatch with the loop's final
    /// label positions.
    fn patch_loop(&mut self, loop_emit: LoopEmit, last: u32, next: u32, redo: u32) {
        let frame = self.frame_mut();
        for idx in loop_emit.last_patches {
            crate::patch_jump(&mut frame.instrs, idx, last);
        }
        for idx in loop_emit.next_patches {
            crate::patch_jump(&mut frame.instrs, idx, next);
        }
        for idx in loop_emit.redo_patches {
            crate::patch_jump(&mut frame.instrs, idx, redo);
        }
        for idx in loop_emit.dispatch_patches {
            match &mut frame.instrs[idx] {
                Instr::CtlDispatch { last: l, next: n, redo: r, .. }
                | Instr::LoopPush { last: l, next: n, redo: r, .. } => {
                    *l = last;
                    *n = next;
                    *r = redo;
                }
                _ => {}
            }
        }
    }

    // ===== loop control and goto =====

    fn emit_loop_control(&mut self, op: LoopControlOp, label: Option<&str>) -> CompileResult<()> {
        let found = self
            .frame()
            .loops
            .iter()
            .rposition(|l| match label {
                None => true,
                Some(want) => l.label.as_deref() == Some(want),
            });
        match found {
            Some(index) => {
                let depth = self.frame().loops[index].scope_depth;
                self.emit_teardown_to(depth);
                // Jumping out of nested loops unregisters them.
                let inner = self.frame().loops.len() - 1 - index;
                for _ in 0..inner {
                    self.push(Instr::LoopPop);
                }
                let jump = self.emit_jump(Instr::Jump);
                let l = &mut self.frame_mut().loops[index];
                match op {
                    LoopControlOp::Last => l.last_patches.push(jump),
                    LoopControlOp::Next => l.next_patches.push(jump),
                    LoopControlOp::Redo => l.redo_patches.push(jump),
                }
                Ok(())
            }
            None => {
                // No owning loop in this method: throw a marker through
                // the return join for the dynamic owner.
                self.push(Instr::MakeList(0));
                let code = match op {
                    LoopControlOp::Last => MarkerCode::Last,
                    LoopControlOp::Next => MarkerCode::Next,
                    LoopControlOp::Redo => MarkerCode::Redo,
                };
                let label_idx = match label {
                    Some(l) => self.name_idx(l),
                    None => NO_LABEL,
                };
                self.push(Instr::MakeMarker(code, label_idx));
                self.emit_teardown_to(0);
                let ret = self.frame().ret_slot;
                self.push(Instr::StoreSpill(ret));
                let jump = self.emit_jump(Instr::Jump);
                self.frame_mut().epilogue_patches.push(jump);
                Ok(())
            }
        }
    }

    fn emit_goto(&mut self, target: &GotoTarget) -> CompileResult<()> {
        match target {
            GotoTarget::Label(label) => {
                let found = self
                    .frame()
                    .loops
                    .iter()
                    .rposition(|l| l.label.as_deref() == Some(label.as_str()));
                match found {
                    Some(index) => {
                        let (depth, start) = {
                            let l = &self.frame().loops[index];
                            (l.scope_depth, l.start)
                        };
                        self.emit_teardown_to(depth);
                        let inner = self.frame().loops.len() - 1 - index;
                        for _ in 0..inner {
                            self.push(Instr::LoopPop);
                        }
                        let jump = self.emit_jump(Instr::Jump);
                        crate::patch_jump(&mut self.frame_mut().instrs, jump, start);
                        Ok(())
                    }
                    None => {
                        self.push(Instr::MakeList(0));
                        let label_idx = self.name_idx(label);
                        self.push(Instr::MakeMarker(MarkerCode::Goto, label_idx));
                        self.emit_teardown_to(0);
                        let ret = self.frame().ret_slot;
                        self.push(Instr::StoreSpill(ret));
                        let jump = self.emit_jump(Instr::Jump);
                        self.frame_mut().epilogue_patches.push(jump);
                        Ok(())
                    }
                }
            }
            GotoTarget::Sub(expr) => {
                self.emit_expr(expr, Cx::Scalar)?;
                let args = self.name_idx("main::_");
                self.push(Instr::GlobalArray(args));
                self.push(Instr::MakeTailCall);
                self.emit_teardown_to(0);
                let ret = self.frame().ret_slot;
                self.push(Instr::StoreSpill(ret));
                let jump = self.emit_jump(Instr::Jump);
                self.frame_mut().epilogue_patches.push(jump);
                Ok(())
            }
        }
    }

    // ===== declarations =====

    /// Emits a declaration, leaving the declared cell/aggregate (or the
    /// assignment result) on the stack.
    pub(crate) fn emit_decl_expr(&mut self, node: &Node) -> CompileResult<()> {
        let NodeKind::VarDecl { kind, target, init } = &node.kind else {
            return Err(CompileError::Internal {
                reason: "not a declaration".into(),
                position: node.location.start,
            });
        };
        match kind {
            DeclKind::My => self.emit_my_decl(target, init.as_deref(), node.anns.declared_ref),
            DeclKind::State => self.emit_state_decl(target, init.as_deref()),
            DeclKind::Our => self.emit_our_decl(target, init.as_deref()),
            DeclKind::Local => self.emit_local_decl(target, init.as_deref()),
        }
    }

    fn emit_my_decl(
        &mut self,
        target: &Node,
        init: Option<&Node>,
        declared_ref: bool,
    ) -> CompileResult<()> {
        // Declare every variable first so the initializer cannot see them
        // half-bound, then run the assignment through the normal path.
        self.declare_target(target)?;
        if declared_ref {
            return self.emit_ref_alias_decl(target, init);
        }
        match init {
            Some(init) => self.emit_assign(target, init),
            None => self.emit_declared_value(target),
        }
    }

    fn declare_target(&mut self, target: &Node) -> CompileResult<()> {
        match &target.kind {
            NodeKind::Variable { sigil, name } => {
                let binding = self.declare_var(*sigil, name, BindingKind::My);
                match sigil {
                    Sigil::Array => self.push(Instr::NewArray(binding.slot)),
                    Sigil::Hash => self.push(Instr::NewHash(binding.slot)),
                    _ => self.push(Instr::NewScalar(binding.slot)),
                }
                Ok(())
            }
            NodeKind::List { elements } => {
                for el in elements {
                    self.declare_target(el)?;
                }
                Ok(())
            }
            _ => Err(CompileError::Internal {
                reason: "invalid lexical declaration target".into(),
                position: target.location.start,
            }),
        }
    }

    fn emit_declared_value(&mut self, target: &Node) -> CompileResult<()> {
        match &target.kind {
            NodeKind::Variable { sigil: Sigil::Array, .. } => self.emit_array_operand(target, false),
            NodeKind::Variable { sigil: Sigil::Hash, .. } => self.emit_hash_operand(target, false),
            NodeKind::Variable { .. } => self.emit_scalar_lv(target),
            NodeKind::List { .. } => {
                self.push(Instr::MakeList(0));
                Ok(())
            }
            _ => {
                self.push(Instr::PushUndef);
                Ok(())
            }
        }
    }

    /// `my \$x = $ref` aliases the declared name to the referent.
    fn emit_ref_alias_decl(&mut self, target: &Node, init: Option<&Node>) -> CompileResult<()> {
        let Some(init) = init else {
            return self.emit_declared_value(target);
        };
        let NodeKind::Variable { sigil, name } = &target.kind else {
            return Err(CompileError::Internal {
                reason: "declared-reference target must be one variable".into(),
                position: target.location.start,
            });
        };
        let binding = match self.resolve_var(*sigil, name) {
            crate::expr::Resolved::Slot(slot) => slot,
            crate::expr::Resolved::Global(_) => {
                return Err(CompileError::Internal {
                    reason: "declared reference did not bind lexically".into(),
                    position: target.location.start,
                })
            }
        };
        self.emit_expr(init, Cx::Scalar)?;
        let allow = !self.frame().pad.pragmas().strict_refs;
        match sigil {
            Sigil::Scalar => {
                self.push(Instr::Deref {
                    code: perl_bytecode::DerefCode::ScalarRv,
                    allow_symbolic: allow,
                });
                self.push(Instr::BindScalar(binding));
                self.push(Instr::LoadScalar(binding));
            }
            Sigil::Array => {
                self.push(Instr::Deref {
                    code: perl_bytecode::DerefCode::ArrayRv,
                    allow_symbolic: allow,
                });
                self.push(Instr::BindArray(binding));
                self.push(Instr::LoadArray(binding));
            }
            Sigil::Hash => {
                self.push(Instr::Deref {
                    code: perl_bytecode::DerefCode::HashRv,
                    allow_symbolic: allow,
                });
                self.push(Instr::BindHash(binding));
                self.push(Instr::LoadHash(binding));
            }
            _ => {
                return Err(CompileError::Internal {
                    reason: "unsupported declared-reference sigil".into(),
                    position: target.location.start,
                })
            }
        }
        Ok(())
    }

    /// `state` persists across calls through a hidden global slot plus a
    /// once-guard.
    fn emit_state_decl(&mut self, target: &Node, init: Option<&Node>) -> CompileResult<()> {
        let NodeKind::Variable { sigil, name } = &target.kind else {
            return Err(CompileError::Internal {
                reason: "state declarations take a single variable".into(),
                position: target.location.start,
            });
        };
        let method = self.frame().name.clone();
        let cell_name = format!("main::__state__::{method}::{name}");
        let guard_name = format!("{cell_name}::__init__");
        self.frame_mut()
            .pad
            .declare_our(*sigil, name, cell_name.clone());

        if let Some(init) = init {
            let guard_idx = self.name_idx(&guard_name);
            self.push(Instr::GlobalScalar(guard_idx));
            let done = self.emit_jump(Instr::JumpIfTrue);
            self.emit_assign(target, init)?;
            self.push(Instr::Pop);
            self.push(Instr::GlobalScalar(guard_idx));
            self.push(Instr::PushInt(1));
            self.push(Instr::AssignScalar);
            self.push(Instr::Pop);
            self.patch_to_here(done);
        }
        self.emit_declared_value(target)
    }

    fn emit_our_decl(&mut self, target: &Node, init: Option<&Node>) -> CompileResult<()> {
        match &target.kind {
            NodeKind::Variable { sigil, name } => {
                let qualified = self.qualify_name(name);
                self.frame_mut().pad.declare_our(*sigil, name, qualified);
            }
            NodeKind::List { elements } => {
                for el in elements {
                    if let NodeKind::Variable { sigil, name } = &el.kind {
                        let qualified = self.qualify_name(name);
                        self.frame_mut().pad.declare_our(*sigil, name, qualified);
                    }
                }
            }
            _ => {
                return Err(CompileError::Internal {
                    reason: "invalid our declaration target".into(),
                    position: target.location.start,
                })
            }
        }
        match init {
            Some(init) => self.emit_assign(target, init),
            None => self.emit_declared_value(target),
        }
    }

    fn emit_local_decl(&mut self, target: &Node, init: Option<&Node>) -> CompileResult<()> {
        match &target.kind {
            NodeKind::Variable { sigil: Sigil::Array, .. } => {
                self.emit_array_operand(target, true)?;
                self.push(Instr::LocalArray);
            }
            NodeKind::Variable { sigil: Sigil::Hash, .. } => {
                self.emit_hash_operand(target, true)?;
                self.push(Instr::LocalHash);
            }
            NodeKind::Variable { .. } | NodeKind::HashElem { .. } | NodeKind::ArrayElem { .. }
            | NodeKind::Deref { .. } => {
                self.emit_scalar_lv(target)?;
                self.push(Instr::LocalScalar);
            }
            NodeKind::List { elements } => {
                for el in elements {
                    self.emit_scalar_lv(el)?;
                    self.push(Instr::LocalScalar);
                }
            }
            _ => {
                return Err(CompileError::Internal {
                    reason: "invalid local target".into(),
                    position: target.location.start,
                })
            }
        }
        match init {
            Some(init) => self.emit_assign(target, init),
            None => self.emit_declared_value(target),
        }
    }

    // ===== closures =====

    /// Compiles a nested method (sub body, map/grep/sort body, s///
    /// replacement) and registers it in the current frame's sub pool.
    pub(crate) fn compile_closure(&mut self, name: &str, body: &Node) -> CompileResult<u16> {
        let statements_storage;
        let statements: &[Node] = match &body.kind {
            NodeKind::Block { statements } => statements,
            _ => {
                statements_storage = [body.clone()];
                &statements_storage
            }
        };
        let pragmas = self.frame().pad.pragmas().clone();
        let package = self.frame().pad.current_package().to_string();
        let method = self.compile_method(name, statements, pragmas, Some(package))?;
        let frame = self.frame_mut();
        frame.subs.push(method);
        Ok((frame.subs.len() - 1) as u16)
    }
}

enum ForeachVar {
    Slot(u16),
    Global(u16),
}

fn is_expression_kind(kind: &NodeKind) -> bool {
    !matches!(
        kind,
        NodeKind::Program { .. }
            | NodeKind::Block { .. }
            | NodeKind::If { .. }
            | NodeKind::While { .. }
            | NodeKind::ForC { .. }
            | NodeKind::Foreach { .. }
            | NodeKind::BareBlock { .. }
            | NodeKind::SubDef { .. }
            | NodeKind::Return { .. }
            | NodeKind::LoopControl { .. }
            | NodeKind::GotoStmt { .. }
            | NodeKind::PackageDecl { .. }
            | NodeKind::UseDecl { .. }
            | NodeKind::ExpressionStatement { .. }
    )
}
