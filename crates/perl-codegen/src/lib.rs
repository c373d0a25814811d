//! AST-to-bytecode emitter.
//!
//! Lowers a parsed program to one [`Method`] per compilation unit plus one
//! per `sub` (named or anonymous), substitution replacement, and
//! `map`/`grep`/`sort` body. Every emitted method has the same shape:
//! the prologue allocates the pad, the body evaluates statements, and all
//! returns funnel through a single return-join that the execution engine's
//! trampoline inspects for control-flow markers.
//!
//! # Stack discipline
//!
//! Values never cross a statement-level join on the operand stack: the
//! emitter spills through a reusable slot pool (`acquire_spill` /
//! `release_spill`, every acquire matched by a release) and the
//! `perl-bytecode` verifier re-derives depths as the stack-map check.
//!
//! # Backends
//!
//! Methods are emitted listed, verified, then assembled into the packed
//! backend. A `TooLarge` assembly first triggers an AST refactoring pass
//! that hoists oversized blocks into auxiliary subs (safe because loop
//! control crossing the new sub boundary already travels as markers); if
//! the method still does not fit, the listed fallback ships as-is. Both
//! backends satisfy the same execution contract, so callers cannot tell
//! which one serves a given subroutine.

mod expr;
mod hoist;
mod stmt;

use perl_ast::{Node, NodeKind, Sigil};
use perl_bytecode::{
    assemble_with_limit, verify, AssembleError, Capture, Const, Instr, Method, MethodBody,
    RegexSpec, SlotKind, TransSpec, PACKED_LIMIT,
};
use perl_error::{CompileError, CompileResult};
use perl_position_tracking::LineIndex;
use perl_scope::{qualify, Binding, BindingKind, PadBuilder, PragmaState};
use std::rc::Rc;
use tracing::debug;

/// Emitter knobs.
#[derive(Debug, Clone)]
pub struct EmitterConfig {
    /// Packed-backend size limit; lowering it below the platform limit
    /// exercises the hoist/fallback machinery in tests.
    pub max_method_bytes: usize,
    /// Skip packing entirely and ship listed bodies.
    pub force_listed: bool,
    /// Blocks with at least this many statements are hoisting candidates.
    pub hoist_block_statements: usize,
}

impl Default for EmitterConfig {
    fn default() -> Self {
        Self {
            max_method_bytes: PACKED_LIMIT,
            force_listed: false,
            hoist_block_statements: 24,
        }
    }
}

/// Compiles a whole program to its root method.
pub fn compile_program(
    ast: &Node,
    source: &str,
    file: &str,
    config: &EmitterConfig,
) -> CompileResult<Rc<Method>> {
    debug!(file, "emit start");
    let mut emitter = Emitter {
        config: config.clone(),
        file: file.to_string(),
        lines: LineIndex::new(source),
        frames: Vec::new(),
    };
    let statements: &[Node] = match &ast.kind {
        NodeKind::Program { statements } => statements,
        _ => std::slice::from_ref(ast),
    };
    let method = emitter.compile_method("main", statements, PragmaState::default(), None)?;

    // Size policy: when packing failed somewhere, retry once after the
    // hoisting pass; methods that still do not fit stay on the listed
    // backend.
    if !config.force_listed && any_listed(&method) {
        let (hoisted, changed) = hoist::hoist_oversized_blocks(ast, config.hoist_block_statements);
        if changed {
            debug!(file, "retrying emission with hoisted blocks");
            let statements: &[Node] = match &hoisted.kind {
                NodeKind::Program { statements } => statements,
                _ => std::slice::from_ref(&hoisted),
            };
            let mut emitter = Emitter {
                config: config.clone(),
                file: file.to_string(),
                lines: LineIndex::new(source),
                frames: Vec::new(),
            };
            let retried =
                emitter.compile_method("main", statements, PragmaState::default(), None)?;
            debug!(file, "emit done (hoisted)");
            return Ok(retried);
        }
    }
    debug!(file, "emit done");
    Ok(method)
}

/// Whether any method in the tree fell back to the listed backend.
fn any_listed(method: &Method) -> bool {
    matches!(method.body, MethodBody::Listed(_)) || method.subs.iter().any(|s| any_listed(s))
}

/// Expression-statement emission context.
pub(crate) use perl_bytecode::Context as Cx;

/// Scope bookkeeping for teardown emission on every exit path.
#[derive(Debug, Default)]
pub(crate) struct ScopeEmit {
    /// Spill slot holding the dynamic-stack mark, when the scope `local`s
    pub(crate) local_mark: Option<u16>,
    /// Whether the scope pushed a regex-state snapshot
    pub(crate) regex_snapshot: bool,
    /// Global loop-variable binding to restore: (save spill, name index)
    pub(crate) glob_restore: Option<(u16, u16)>,
}

/// Per-loop bookkeeping: patch lists for the four labels.
#[derive(Debug)]
pub(crate) struct LoopEmit {
    pub(crate) label: Option<String>,
    pub(crate) label_idx: u16,
    /// Scope depth at loop entry; exits tear down to here
    pub(crate) scope_depth: usize,
    /// Loop entry (condition check), the `goto LABEL` target
    pub(crate) start: u32,
    /// `Jump` instrs to patch with the exit target
    pub(crate) last_patches: Vec<usize>,
    /// `Jump` instrs to patch with the continue target
    pub(crate) next_patches: Vec<usize>,
    /// `Jump` instrs to patch with the redo target
    pub(crate) redo_patches: Vec<usize>,
    /// `CtlDispatch` instrs to patch with all three
    pub(crate) dispatch_patches: Vec<usize>,
}

/// One method under construction.
pub(crate) struct Frame {
    pub(crate) name: String,
    pub(crate) instrs: Vec<Instr>,
    pub(crate) consts: Vec<Const>,
    pub(crate) names: Vec<String>,
    pub(crate) regexes: Vec<RegexSpec>,
    pub(crate) trans: Vec<TransSpec>,
    pub(crate) subs: Vec<Rc<Method>>,
    pub(crate) lines: Vec<(u32, u32)>,
    pub(crate) pad: PadBuilder,
    pub(crate) slot_kinds: Vec<SlotKind>,
    pub(crate) spill_free: Vec<u16>,
    pub(crate) captures: Vec<Capture>,
    pub(crate) scopes: Vec<ScopeEmit>,
    pub(crate) loops: Vec<LoopEmit>,
    /// Spill slot holding the return value for the single return-join
    pub(crate) ret_slot: u16,
    /// `Jump` instrs to patch with the epilogue offset
    pub(crate) epilogue_patches: Vec<usize>,
    pub(crate) is_root: bool,
    pub(crate) current_line: u32,
}

pub(crate) struct Emitter {
    pub(crate) config: EmitterConfig,
    pub(crate) file: String,
    pub(crate) lines: LineIndex,
    pub(crate) frames: Vec<Frame>,
}

impl Emitter {
    /// Compiles one method from a statement list. `capture_base` carries
    /// the pragma state inherited from the enclosing scope.
    pub(crate) fn compile_method(
        &mut self,
        name: &str,
        statements: &[Node],
        pragmas: PragmaState,
        package: Option<String>,
    ) -> CompileResult<Rc<Method>> {
        let package = package.unwrap_or_else(|| "main".to_string());
        let is_root = self.frames.is_empty();
        let mut frame = Frame {
            name: name.to_string(),
            instrs: Vec::new(),
            consts: Vec::new(),
            names: Vec::new(),
            regexes: Vec::new(),
            trans: Vec::new(),
            subs: Vec::new(),
            lines: Vec::new(),
            pad: PadBuilder::new(package, pragmas),
            slot_kinds: Vec::new(),
            spill_free: Vec::new(),
            captures: Vec::new(),
            scopes: Vec::new(),
            loops: Vec::new(),
            ret_slot: 0,
            epilogue_patches: Vec::new(),
            is_root,
            current_line: 0,
        };
        frame.ret_slot = {
            let slot = frame.pad.alloc_slot();
            frame.slot_kinds.push(SlotKind::Spill);
            slot
        };
        self.frames.push(frame);

        let result = self.compile_body(statements);
        let mut frame = self
            .frames
            .pop()
            .unwrap_or_else(|| unreachable!("frame pushed above"));
        result?;

        // Single return-join: every return path spilled its value and
        // jumped here; the execution engine runs the marker protocol and
        // the tail-call trampoline on the popped result.
        let epilogue = frame.instrs.len() as u32;
        for idx in std::mem::take(&mut frame.epilogue_patches) {
            patch_jump(&mut frame.instrs, idx, epilogue);
        }
        frame.instrs.push(Instr::LoadSpill(frame.ret_slot));
        frame.instrs.push(Instr::Return);

        let max_depth = verify(&frame.instrs).map_err(|e| CompileError::Internal {
            reason: format!("stack map verification failed: {e}"),
            position: 0,
        })?;
        debug!(method = %frame.name, instrs = frame.instrs.len(), max_depth, "method verified");

        let body = self.choose_backend(&frame)?;
        Ok(Rc::new(Method {
            name: frame.name,
            file: self.file.clone(),
            slots: frame.slot_kinds,
            captures: frame.captures,
            consts: frame.consts,
            names: frame.names,
            regexes: frame.regexes,
            trans: frame.trans,
            subs: frame.subs,
            lines: frame.lines,
            body,
        }))
    }

    /// Emits the statements of a method body plus the fall-through return
    /// of the last expression statement's value.
    fn compile_body(&mut self, statements: &[Node]) -> CompileResult<()> {
        // Frame-level scope: a sub body saves/restores the regex capture
        // state when it matches, and marks the dynamic stack when it
        // `local`s at its top level.
        let mut frame_scope = ScopeEmit::default();
        if statements.iter().any(stmt_contains_regex) {
            self.push(Instr::RegexSnapshot);
            frame_scope.regex_snapshot = true;
        }
        if statements.iter().any(stmt_contains_local) {
            let slot = self.acquire_spill();
            self.push(Instr::LocalMark);
            self.push(Instr::StoreSpill(slot));
            frame_scope.local_mark = Some(slot);
        }
        self.frame_mut().scopes.push(frame_scope);

        // Named subs are installed first, so calls resolve regardless of
        // their textual position. The prepass walks package and pragma
        // directives in source order so each sub compiles in its right
        // surroundings, then restores both for the main pass.
        let saved_package = self.frame().pad.current_package().to_string();
        let saved_pragmas = self.frame().pad.pragmas().clone();
        for stmt in statements {
            match &stmt.kind {
                NodeKind::SubDef { .. } => self.emit_statement(stmt)?,
                NodeKind::PackageDecl { name } => {
                    self.frame_mut().pad.set_package(name.clone());
                }
                NodeKind::UseDecl { is_no, module, args } => {
                    self.frame_mut().pad.pragmas_mut().apply(module, args, *is_no);
                }
                _ => {}
            }
        }
        self.frame_mut().pad.set_package(saved_package);
        *self.frame_mut().pad.pragmas_mut() = saved_pragmas;
        let (last, init) = match statements.split_last() {
            Some((last, init)) if !matches!(last.kind, NodeKind::SubDef { .. }) => {
                (Some(last), init)
            }
            _ => (None, statements),
        };
        for stmt in init {
            if !matches!(stmt.kind, NodeKind::SubDef { .. }) {
                self.emit_statement(stmt)?;
            }
        }
        match last {
            // A sub's value is its last evaluated expression.
            Some(node) => match &node.kind {
                NodeKind::ExpressionStatement { expression } => {
                    self.emit_expr(expression, Cx::List)?;
                    self.push(Instr::StoreSpill(self.frame().ret_slot));
                }
                _ => {
                    self.emit_statement(node)?;
                    self.push(Instr::MakeList(0));
                    self.push(Instr::StoreSpill(self.frame().ret_slot));
                }
            },
            None => {
                self.push(Instr::MakeList(0));
                self.push(Instr::StoreSpill(self.frame().ret_slot));
            }
        }

        // Fall-through teardown of the frame scope (return statements ran
        // it through emit_teardown_to already).
        let frame_scope = self
            .frame_mut()
            .scopes
            .pop()
            .unwrap_or_default();
        self.emit_scope_restores(&frame_scope);
        if let Some(slot) = frame_scope.local_mark {
            self.release_spill(slot);
        }
        Ok(())
    }

    /// Packed unless oversized; hoisting happens one level up (see
    /// [`hoist`]), so by the time we are here the choice is packed or
    /// listed.
    fn choose_backend(&self, frame: &Frame) -> CompileResult<MethodBody> {
        if self.config.force_listed {
            return Ok(MethodBody::Listed(frame.instrs.clone()));
        }
        match assemble_with_limit(&frame.instrs, &frame.lines, self.config.max_method_bytes) {
            Ok(packed) => Ok(MethodBody::Packed(packed)),
            Err(AssembleError::TooLarge { size, limit }) => {
                debug!(method = %frame.name, size, limit, "packed limit exceeded, listed fallback");
                Ok(MethodBody::Listed(frame.instrs.clone()))
            }
            Err(e) => Err(CompileError::Internal {
                reason: format!("assembly failed: {e}"),
                position: 0,
            }),
        }
    }

    // ===== frame access =====

    pub(crate) fn frame(&self) -> &Frame {
        self.frames
            .last()
            .unwrap_or_else(|| unreachable!("emitter always has a frame"))
    }

    pub(crate) fn frame_mut(&mut self) -> &mut Frame {
        self.frames
            .last_mut()
            .unwrap_or_else(|| unreachable!("emitter always has a frame"))
    }

    pub(crate) fn push(&mut self, instr: Instr) {
        self.frame_mut().instrs.push(instr);
    }

    /// Records the source line for the next instruction.
    pub(crate) fn note_line(&mut self, offset: usize) {
        let line = self.lines.line(offset) as u32;
        let frame = self.frame_mut();
        if frame.current_line != line {
            frame.current_line = line;
            let idx = frame.instrs.len() as u32;
            frame.lines.push((idx, line));
        }
    }

    pub(crate) fn here(&self) -> u32 {
        self.frame().instrs.len() as u32
    }

    /// Emits a jump with a placeholder target; returns its index for
    /// patching.
    pub(crate) fn emit_jump(&mut self, make: impl Fn(u32) -> Instr) -> usize {
        let idx = self.frame().instrs.len();
        self.push(make(u32::MAX));
        idx
    }

    pub(crate) fn patch_to_here(&mut self, idx: usize) {
        let here = self.here();
        patch_jump(&mut self.frame_mut().instrs, idx, here);
    }

    // ===== pools =====

    pub(crate) fn const_idx(&mut self, value: Const) -> u16 {
        let consts = &mut self.frame_mut().consts;
        if let Some(i) = consts.iter().position(|c| *c == value) {
            return i as u16;
        }
        consts.push(value);
        (consts.len() - 1) as u16
    }

    pub(crate) fn name_idx(&mut self, name: &str) -> u16 {
        let names = &mut self.frame_mut().names;
        if let Some(i) = names.iter().position(|n| n == name) {
            return i as u16;
        }
        names.push(name.to_string());
        (names.len() - 1) as u16
    }

    pub(crate) fn regex_idx(&mut self, spec: RegexSpec) -> u16 {
        let pool = &mut self.frame_mut().regexes;
        pool.push(spec);
        (pool.len() - 1) as u16
    }

    pub(crate) fn trans_idx(&mut self, spec: TransSpec) -> u16 {
        let pool = &mut self.frame_mut().trans;
        pool.push(spec);
        (pool.len() - 1) as u16
    }

    // ===== slots and spills =====

    pub(crate) fn alloc_slot(&mut self, kind: SlotKind) -> u16 {
        let frame = self.frame_mut();
        let slot = frame.pad.alloc_slot();
        frame.slot_kinds.push(kind);
        slot
    }

    /// Acquires a spill slot from the pool (or a fresh one).
    pub(crate) fn acquire_spill(&mut self) -> u16 {
        if let Some(slot) = self.frame_mut().spill_free.pop() {
            return slot;
        }
        self.alloc_slot(SlotKind::Spill)
    }

    /// Returns a spill slot to the pool. Every acquire is matched by a
    /// release on the fall-through path.
    pub(crate) fn release_spill(&mut self, slot: u16) {
        self.frame_mut().spill_free.push(slot);
    }

    /// Declares a lexical and keeps the slot-kind table in sync with the
    /// pad's slot counter (a `state` declaration burns a guard slot too).
    pub(crate) fn declare_var(
        &mut self,
        sigil: Sigil,
        name: &str,
        kind: BindingKind,
    ) -> Binding {
        let frame = self.frame_mut();
        let binding = frame.pad.declare(sigil, name, kind);
        while frame.slot_kinds.len() < frame.pad.slot_count() as usize {
            let idx = frame.slot_kinds.len() as u16;
            let slot_kind = if idx == binding.slot {
                match sigil {
                    Sigil::Array => SlotKind::Array,
                    Sigil::Hash => SlotKind::Hash,
                    _ => SlotKind::Scalar,
                }
            } else {
                // state guard slot
                SlotKind::Scalar
            };
            frame.slot_kinds.push(slot_kind);
        }
        binding
    }

    // ===== scopes =====

    /// Enters a block scope, emitting regex snapshots and local marks as
    /// the block's static contents require.
    pub(crate) fn enter_scope(&mut self, block: &Node) -> CompileResult<()> {
        let regex_snapshot = block.anns.contains_regex;
        let wants_local_mark = block_contains_local(block);
        let mut scope = ScopeEmit::default();
        if regex_snapshot {
            self.push(Instr::RegexSnapshot);
            scope.regex_snapshot = true;
        }
        if wants_local_mark {
            let slot = self.acquire_spill();
            self.push(Instr::LocalMark);
            self.push(Instr::StoreSpill(slot));
            scope.local_mark = Some(slot);
        }
        self.frame_mut().pad.enter_scope();
        self.frame_mut().scopes.push(scope);
        Ok(())
    }

    /// Leaves a block scope on the fall-through path.
    pub(crate) fn exit_scope(&mut self) {
        let scope = self
            .frame_mut()
            .scopes
            .pop()
            .unwrap_or_else(ScopeEmit::default);
        self.emit_scope_restores(&scope);
        if let Some(slot) = scope.local_mark {
            self.release_spill(slot);
        }
        if let Some((slot, _)) = scope.glob_restore {
            self.release_spill(slot);
        }
        self.frame_mut().pad.exit_scope();
    }

    /// Emits the restore sequence of one scope without popping it (used
    /// by jump paths that leave several scopes at once).
    pub(crate) fn emit_scope_restores(&mut self, scope: &ScopeEmit) {
        if let Some((slot, name_idx)) = scope.glob_restore {
            self.push(Instr::LoadSpill(slot));
            self.push(Instr::GlobBindScalar(name_idx));
        }
        if let Some(slot) = scope.local_mark {
            self.push(Instr::LoadSpill(slot));
            self.push(Instr::LocalRestore);
        }
        if scope.regex_snapshot {
            self.push(Instr::RegexRestore);
        }
    }

    /// Emits teardown for every scope above `depth` (innermost first),
    /// leaving the scope stack itself untouched. Used before `return`,
    /// `last`/`next`/`redo` jumps, and marker throws.
    pub(crate) fn emit_teardown_to(&mut self, depth: usize) {
        let scopes: Vec<ScopeEmit> = self
            .frame()
            .scopes
            .iter()
            .skip(depth)
            .map(|s| ScopeEmit {
                local_mark: s.local_mark,
                regex_snapshot: s.regex_snapshot,
                glob_restore: s.glob_restore,
            })
            .collect();
        for scope in scopes.iter().rev() {
            self.emit_scope_restores(scope);
        }
    }

    /// Qualifies an unqualified global name against the current package.
    pub(crate) fn qualify_name(&self, name: &str) -> String {
        qualify(name, self.frame().pad.current_package())
    }
}

/// Patches the single-target jump at `idx` to `target`.
pub(crate) fn patch_jump(instrs: &mut [Instr], idx: usize, target: u32) {
    match &mut instrs[idx] {
        Instr::Jump(t)
        | Instr::JumpIfFalse(t)
        | Instr::JumpIfTrue(t)
        | Instr::JumpIfDefined(t)
        | Instr::PushHandler(t) => *t = target,
        other => {
            debug_assert!(false, "patch target is not a jump: {other:?}");
        }
    }
}

/// Whether a block *statically* contains `local` (not crossing sub
/// boundaries), so scope entry records a dynamic-stack mark.
pub(crate) fn block_contains_local(node: &Node) -> bool {
    match &node.kind {
        NodeKind::Block { statements } => statements.iter().any(stmt_contains_local),
        _ => stmt_contains_local(node),
    }
}

/// Statement-level `local` scan, stopping at nested blocks and subs
/// (they mark their own scopes).
pub(crate) fn stmt_contains_local(node: &Node) -> bool {
    match &node.kind {
        NodeKind::VarDecl { kind: perl_ast::DeclKind::Local, .. } => true,
        NodeKind::SubDef { .. } | NodeKind::AnonSub { .. } => false,
        NodeKind::Block { .. } | NodeKind::BareBlock { .. } => false,
        _ => children(node).iter().any(|c| stmt_contains_local(c)),
    }
}

/// Statement-level regex scan for the frame scope of a method body,
/// stopping at nested blocks (their own snapshot) and subs.
pub(crate) fn stmt_contains_regex(node: &Node) -> bool {
    match &node.kind {
        NodeKind::RegexLiteral { .. } | NodeKind::MatchBind { .. } => true,
        NodeKind::SubDef { .. } | NodeKind::AnonSub { .. } => false,
        NodeKind::Block { .. } | NodeKind::BareBlock { .. } => false,
        _ => children(node).iter().any(|c| stmt_contains_regex(c)),
    }
}

/// Shallow child collection for analysis walks (read-only mirror of the
/// parser's visitor).
pub(crate) fn children(node: &Node) -> Vec<&Node> {
    use NodeKind as N;
    match &node.kind {
        N::Program { statements } | N::Block { statements } => statements.iter().collect(),
        N::ExpressionStatement { expression } => vec![expression],
        N::Deref { expr, .. } => vec![expr],
        N::ArrayElem { array, index } => vec![array, index],
        N::HashElem { hash, key } => vec![hash, key],
        N::Slice { base, index, .. } => vec![base, index],
        N::List { elements } | N::AnonArray { elements } | N::AnonHash { elements } => {
            elements.iter().collect()
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
        N::FuncCall { args, .. } | N::Print { args, .. } => args.iter().collect(),
        N::CallCode { code, args } => {
            let mut v: Vec<&Node> = vec![code];
            v.extend(args.iter());
            v
        }
        N::MethodCall { receiver, args, .. } => {
            let mut v: Vec<&Node> = vec![receiver];
            v.extend(args.iter());
            v
        }
        N::SortCall { comparator, args } => {
            let mut v: Vec<&Node> = Vec::new();
            if let Some(c) = comparator {
                v.push(c);
            }
            v.extend(args.iter());
            v
        }
        N::MapGrep { body, args, .. } => {
            let mut v: Vec<&Node> = vec![body];
            v.extend(args.iter());
            v
        }
        N::VarDecl { target, init, .. } => {
            let mut v: Vec<&Node> = vec![target];
            if let Some(i) = init {
                v.push(i);
            }
            v
        }
        N::If { cond, then_block, elsifs, else_block, .. } => {
            let mut v: Vec<&Node> = vec![cond, then_block];
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
            let mut v: Vec<&Node> = vec![cond, body];
            if let Some(c) = continue_block {
                v.push(c);
            }
            v
        }
        N::ForC { init, cond, update, body, .. } => {
            let mut v: Vec<&Node> = Vec::new();
            for part in [init, cond, update].into_iter().flatten() {
                v.push(part);
            }
            v.push(body);
            v
        }
        N::Foreach { var, list, body, .. } => {
            let mut v: Vec<&Node> = Vec::new();
            if let Some(var) = var {
                v.push(var);
            }
            v.push(list);
            v.push(body);
            v
        }
        N::BareBlock { body, .. } => vec![body],
        N::Return { value } => value.iter().map(|v| &**v).collect(),
        N::EvalBlock { body } | N::DoBlock { body } | N::SubDef { body, .. }
        | N::AnonSub { body, .. } => {
            vec![body]
        }
        N::EvalString { expr } => vec![expr],
        _ => vec![],
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use perl_parser::Parser;

    fn compile(src: &str) -> Rc<Method> {
        let ast = Parser::new(src).parse().unwrap();
        compile_program(&ast, src, "-e", &EmitterConfig::default()).unwrap()
    }

    #[test]
    fn simple_program_verifies_and_packs() {
        let method = compile("my $x = 1 + 2; print $x;");
        assert!(matches!(method.body, MethodBody::Packed(_)));
        assert_eq!(method.name, "main");
    }

    #[test]
    fn named_sub_becomes_nested_method() {
        let method = compile("sub f { return 42; } f();");
        assert_eq!(method.subs.len(), 1);
        assert_eq!(method.subs[0].name, "main::f");
    }

    #[test]
    fn closures_capture_outer_lexicals() {
        let method = compile("my $x = 1; my $c = sub { $x + 1 }; $c->();");
        let closure = &method.subs[0];
        assert_eq!(closure.captures.len(), 1);
    }

    #[test]
    fn loops_emit_control_dispatch() {
        let method = compile("for my $i (1..3) { print $i; last if $i == 2; }");
        let MethodBody::Packed(_) = &method.body else { panic!("expected packed") };
        // Re-check the listed form through a forced-listed compile.
        let ast = Parser::new("for my $i (1..3) { print $i; }").parse().unwrap();
        let cfg = EmitterConfig { force_listed: true, ..EmitterConfig::default() };
        let listed = compile_program(&ast, "x", "-e", &cfg).unwrap();
        let MethodBody::Listed(instrs) = &listed.body else { panic!() };
        assert!(instrs.iter().any(|i| matches!(i, Instr::CtlDispatch { .. })));
        assert!(instrs.iter().any(|i| matches!(i, Instr::SignalCheck)));
    }

    #[test]
    fn strict_vars_rejects_undeclared() {
        let ast = Parser::new("use strict; $undeclared = 1;").parse().unwrap();
        let err = compile_program(&ast, "x", "-e", &EmitterConfig::default()).unwrap_err();
        assert!(matches!(err, CompileError::UndeclaredVariable { .. }));
    }

    #[test]
    fn small_limit_falls_back_to_listed() {
        let src = "my $s = 0; $s = $s + 1; $s = $s + 2; $s = $s + 3; print $s;";
        let ast = Parser::new(src).parse().unwrap();
        let cfg = EmitterConfig { max_method_bytes: 8, ..EmitterConfig::default() };
        let method = compile_program(&ast, src, "-e", &cfg).unwrap();
        assert!(matches!(method.body, MethodBody::Listed(_)));
    }
}
