//! Frame execution: fetch/dispatch, the return-join marker protocol, the
//! tail-call trampoline, and eval unwinding.

use crate::builtins;
use perl_bytecode::{
    decode, Const, Context, Instr, MarkerCode, Method, MethodBody, SlotKind, NO_LABEL,
};
use perl_runtime::{
    binary, bool_scalar, deref, do_match, do_subst, do_trans, read_all_records, read_record,
    unary, ArrayHandle, Derefed, Interp, Marker, PadSlot, PerlArray, PerlList, RefValue,
    RuntimeCode, RuntimeError, RuntimeResult, RxProgram, Scalar, ScalarHandle, Value,
};
use std::collections::HashMap;
use std::rc::Rc;
use tracing::trace;

/// Compiled-regex cache and other cross-call execution state.
#[derive(Default)]
pub struct VmState {
    rx_cache: HashMap<(usize, u16), Rc<RxProgram>>,
}

impl VmState {
    /// Fresh state.
    pub fn new() -> Self {
        Self::default()
    }

    fn rx(&mut self, method: &Rc<Method>, idx: u16) -> RuntimeResult<Rc<RxProgram>> {
        let key = (Rc::as_ptr(method) as usize, idx);
        if let Some(rx) = self.rx_cache.get(&key) {
            return Ok(rx.clone());
        }
        let spec = method.regexes.get(idx as usize).ok_or_else(|| RuntimeError::Internal {
            msg: format!("regex pool index {idx} out of range"),
        })?;
        let rx = Rc::new(RxProgram::compile(&spec.source, spec.flags)?);
        self.rx_cache.insert(key, rx.clone());
        Ok(rx)
    }
}

/// Runs a compiled program's root method to completion.
///
/// A control-flow marker that survives to this boundary means no loop
/// anywhere owned its label: `LabelNotFound`.
pub fn run_program(interp: &mut Interp, method: &Rc<Method>) -> RuntimeResult<()> {
    let mut vm = VmState::new();
    let code = Rc::new(RuntimeCode::anon(method.clone(), Vec::new()));
    let args = ArrayHandle::new();
    call_code(interp, &mut vm, &code, args, Context::Void)?;
    if let Some(marker) = interp.pending_ctl.take() {
        return Err(RuntimeError::LabelNotFound {
            op: marker.op_name(),
            label: marker.label().unwrap_or("").to_string(),
        });
    }
    let _ = interp.out.flush();
    Ok(())
}

/// Calls a code value: `@_` swap, frame execution, and the tail-call
/// trampoline at the return join.
pub fn call_code(
    interp: &mut Interp,
    vm: &mut VmState,
    code: &Rc<RuntimeCode>,
    args: ArrayHandle,
    ctx: Context,
) -> RuntimeResult<PerlList> {
    let mut code = code.clone();
    let mut args = args;
    loop {
        interp.enter_frame()?;
        let underscore_glob = interp.symbols.glob("main::_");
        let saved_args = underscore_glob.bind_array(args.clone());
        let entry_locals = interp.locals.mark();
        let entry_regex = interp.regex.depth();

        let result = run_frame(interp, vm, &code, ctx);

        underscore_glob.bind_array(saved_args);
        interp.locals.pop_to(entry_locals);
        interp.regex.unwind_to(entry_regex);
        interp.leave_frame();

        let list = result?;
        match list.marker {
            Some(Marker::TailCall { code: next_code, args: next_args }) => {
                // The trampoline: re-invoke in place instead of growing
                // the native stack.
                trace!(target = %next_code.display_name(), "tail call");
                code = next_code;
                args = next_args;
            }
            Some(marker) => {
                interp.pending_ctl = Some(marker);
                return Ok(PerlList::empty());
            }
            None => return Ok(list),
        }
    }
}

/// One registered loop in a frame's control-flow registry.
struct LoopRec {
    label: Option<String>,
    last: u32,
    next: u32,
    redo: u32,
    local_mark: usize,
    regex_depth: usize,
    handler_depth: usize,
}

/// An installed eval handler.
struct Handler {
    catch_pc: usize,
    stack_depth: usize,
    local_mark: usize,
    regex_depth: usize,
    loop_depth: usize,
}

struct FrameState {
    stack: Vec<Value>,
    handlers: Vec<Handler>,
    loops: Vec<LoopRec>,
    pc: usize,
    ctx: Context,
}

enum Flow {
    Continue,
    Jump(u32),
    Return(PerlList),
    Abort,
}

fn fetch(method: &Method, pc: usize) -> RuntimeResult<(Instr, usize)> {
    match &method.body {
        MethodBody::Listed(instrs) => match instrs.get(pc) {
            Some(instr) => Ok((instr.clone(), pc + 1)),
            None => Err(RuntimeError::Internal { msg: format!("pc {pc} out of range") }),
        },
        MethodBody::Packed(packed) => decode(&packed.bytes, pc)
            .ok_or_else(|| RuntimeError::Internal { msg: format!("corrupt code at {pc}") }),
    }
}

fn current_line(method: &Method, pc: usize) -> u32 {
    match &method.body {
        MethodBody::Listed(_) => method.line_at(pc as u32).unwrap_or(0),
        MethodBody::Packed(packed) => packed.line_at(pc as u32).unwrap_or(0),
    }
}

fn run_frame(
    interp: &mut Interp,
    vm: &mut VmState,
    code: &Rc<RuntimeCode>,
    ctx: Context,
) -> RuntimeResult<PerlList> {
    let method = code.method.clone();
    let mut pad: Vec<PadSlot> = method
        .slots
        .iter()
        .map(|kind| match kind {
            SlotKind::Scalar => PadSlot::Scalar(ScalarHandle::undef()),
            SlotKind::Array => PadSlot::Array(ArrayHandle::new()),
            SlotKind::Hash => PadSlot::Hash(perl_runtime::HashHandle::new()),
            SlotKind::Spill => PadSlot::Empty,
        })
        .collect();
    for (i, cap) in method.captures.iter().enumerate() {
        if let Some(entry) = code.env.get(i) {
            if let Some(slot) = pad.get_mut(cap.inner as usize) {
                *slot = entry.clone();
            }
        }
    }

    let mut st = FrameState {
        stack: Vec::new(),
        handlers: Vec::new(),
        loops: Vec::new(),
        pc: 0,
        ctx,
    };

    loop {
        let instr_pc = st.pc;
        let (instr, next_pc) = fetch(&method, st.pc)?;
        st.pc = next_pc;
        match exec(interp, vm, &method, &mut pad, &mut st, instr) {
            Ok(Flow::Continue) => {}
            Ok(Flow::Jump(target)) => st.pc = target as usize,
            Ok(Flow::Return(list)) => return Ok(list),
            Ok(Flow::Abort) => return Ok(PerlList::empty()),
            Err(err) => {
                // Only `die` is catchable; everything else propagates.
                let catchable = matches!(err, RuntimeError::Die(_));
                match st.handlers.pop() {
                    Some(handler) if catchable => {
                        st.stack.truncate(handler.stack_depth);
                        st.loops.truncate(handler.loop_depth);
                        interp.locals.pop_to(handler.local_mark);
                        interp.regex.unwind_to(handler.regex_depth);
                        interp.pending_ctl = None;
                        let payload = err.err_payload();
                        interp.errvar().set(payload);
                        st.pc = handler.catch_pc;
                    }
                    _ => {
                        trace!(
                            method = %method.name,
                            line = current_line(&method, instr_pc),
                            "error unwinds frame"
                        );
                        return Err(err);
                    }
                }
            }
        }
    }
}

fn pop(st: &mut FrameState) -> RuntimeResult<Value> {
    st.stack
        .pop()
        .ok_or_else(|| RuntimeError::Internal { msg: "operand stack underflow".into() })
}

fn pop_scalar(st: &mut FrameState) -> RuntimeResult<ScalarHandle> {
    Ok(pop(st)?.scalarize())
}

fn pop_list(st: &mut FrameState) -> RuntimeResult<PerlList> {
    Ok(pop(st)?.into_list())
}

fn pad_scalar(pad: &[PadSlot], slot: u16) -> RuntimeResult<ScalarHandle> {
    match pad.get(slot as usize) {
        Some(PadSlot::Scalar(h)) => Ok(h.clone()),
        other => Err(RuntimeError::Internal {
            msg: format!("slot {slot} is not a scalar ({other:?})"),
        }),
    }
}

fn resolve_ctx(instr_ctx: Context, frame_ctx: Context) -> Context {
    if instr_ctx == Context::Runtime {
        frame_ctx
    } else {
        instr_ctx
    }
}

/// Regex-state-backed punctuation scalars read through the symbol table.
fn special_global_scalar(interp: &mut Interp, name: &str) -> Option<Scalar> {
    let bare = name.strip_prefix("main::")?;
    if bare.len() >= 1 && bare.chars().all(|c| c.is_ascii_digit()) && bare != "0" {
        let n: usize = bare.parse().ok()?;
        return Some(interp.regex.current.capture(n));
    }
    match bare {
        "&" => Some(interp.regex.current.capture(0)),
        "`" => Some(
            interp
                .regex
                .current
                .prematch
                .clone()
                .map(Scalar::from_bytes)
                .unwrap_or(Scalar::Undef),
        ),
        "'" => Some(
            interp
                .regex
                .current
                .postmatch
                .clone()
                .map(Scalar::from_bytes)
                .unwrap_or(Scalar::Undef),
        ),
        "+" => {
            let caps = &interp.regex.current.captures;
            caps.iter()
                .rev()
                .find_map(|c| c.clone())
                .map(Scalar::from_bytes)
                .or(Some(Scalar::Undef))
        }
        _ => None,
    }
}

fn name_of(method: &Method, idx: u16) -> RuntimeResult<&str> {
    method
        .names
        .get(idx as usize)
        .map(String::as_str)
        .ok_or_else(|| RuntimeError::Internal { msg: format!("name pool index {idx}") })
}

/// Routes a pending marker set by a nested call: the innermost registered
/// loop either consumes it or is exited (keeping the marker pending for
/// the next statement check); with no loop registered the frame aborts.
fn route_pending(interp: &mut Interp, st: &mut FrameState) -> Flow {
    let Some(marker) = interp.pending_ctl.clone() else {
        return Flow::Continue;
    };
    let Some(rec) = st.loops.last() else {
        return Flow::Abort;
    };
    let binds = marker.binds_to(rec.label.as_deref());
    interp.locals.pop_to(rec.local_mark);
    interp.regex.unwind_to(rec.regex_depth);
    st.handlers.truncate(rec.handler_depth);
    st.stack.clear();
    let target = if binds {
        interp.pending_ctl = None;
        match marker {
            Marker::Last(_) => rec.last,
            Marker::Next(_) | Marker::Goto(_) => rec.next,
            Marker::Redo(_) => rec.redo,
            Marker::TailCall { .. } => rec.last,
        }
    } else {
        // Exit this loop through its teardown path and let the enclosing
        // statement check pick the marker up.
        rec.last
    };
    Flow::Jump(target)
}

#[allow(clippy::too_many_lines)]
fn exec(
    interp: &mut Interp,
    vm: &mut VmState,
    method: &Rc<Method>,
    pad: &mut Vec<PadSlot>,
    st: &mut FrameState,
    instr: Instr,
) -> RuntimeResult<Flow> {
    use Instr as I;
    match instr {
        I::PushUndef => st.stack.push(Value::scalar(Scalar::Undef)),
        I::PushConst(idx) => {
            let value = match method.consts.get(idx as usize) {
                Some(Const::Undef) | None => Scalar::Undef,
                Some(Const::Int(v)) => Scalar::Int(*v),
                Some(Const::Num(v)) => Scalar::Num(*v),
                Some(Const::Str(bytes)) => Scalar::from_bytes(bytes.clone()),
            };
            st.stack.push(Value::scalar(value));
        }
        I::PushInt(v) => st.stack.push(Value::scalar(Scalar::Int(i64::from(v)))),

        I::NewScalar(slot) => pad[slot as usize] = PadSlot::Scalar(ScalarHandle::undef()),
        I::NewArray(slot) => pad[slot as usize] = PadSlot::Array(ArrayHandle::new()),
        I::NewHash(slot) => pad[slot as usize] = PadSlot::Hash(perl_runtime::HashHandle::new()),
        I::LoadScalar(slot) => {
            let h = pad_scalar(pad, slot)?;
            st.stack.push(Value::Scalar(h));
        }
        I::LoadArray(slot) => match pad.get(slot as usize) {
            Some(PadSlot::Array(a)) => st.stack.push(Value::Array(a.clone())),
            other => {
                return Err(RuntimeError::Internal {
                    msg: format!("slot {slot} is not an array ({other:?})"),
                })
            }
        },
        I::LoadHash(slot) => match pad.get(slot as usize) {
            Some(PadSlot::Hash(h)) => st.stack.push(Value::Hash(h.clone())),
            other => {
                return Err(RuntimeError::Internal {
                    msg: format!("slot {slot} is not a hash ({other:?})"),
                })
            }
        },
        I::BindScalar(slot) => {
            let h = pop_scalar(st)?;
            pad[slot as usize] = PadSlot::Scalar(h);
        }
        I::BindArray(slot) => {
            let a = pop(st)?.into_array_handle()?;
            pad[slot as usize] = PadSlot::Array(a);
        }
        I::BindHash(slot) => {
            let h = pop(st)?.into_hash_handle()?;
            pad[slot as usize] = PadSlot::Hash(h);
        }
        I::StoreSpill(slot) => {
            let value = pop(st)?;
            pad[slot as usize] = PadSlot::Spill(value);
        }
        I::LoadSpill(slot) => match pad.get(slot as usize) {
            Some(PadSlot::Spill(value)) => st.stack.push(value.clone()),
            other => {
                return Err(RuntimeError::Internal {
                    msg: format!("spill slot {slot} is empty ({other:?})"),
                })
            }
        },

        I::GlobalScalar(idx) => {
            let name = name_of(method, idx)?.to_string();
            if let Some(special) = special_global_scalar(interp, &name) {
                st.stack.push(Value::scalar(special));
            } else {
                let glob = interp.symbols.glob(&name);
                st.stack.push(Value::Scalar(glob.scalar_handle()));
            }
        }
        I::GlobalArray(idx) => {
            let name = name_of(method, idx)?.to_string();
            // @- and @+ are views over the live capture offsets.
            if name == "main::-" || name == "main::+" {
                let offsets = if name == "main::-" {
                    interp.regex.current.starts.clone()
                } else {
                    interp.regex.current.ends.clone()
                };
                let array = ArrayHandle::new();
                for entry in offsets {
                    array.borrow_mut().push_value(match entry {
                        Some(off) => Scalar::Int(off as i64),
                        None => Scalar::Undef,
                    });
                }
                st.stack.push(Value::Array(array));
            } else {
                let glob = interp.symbols.glob(&name);
                st.stack.push(Value::Array(glob.array_handle()));
            }
        }
        I::GlobalHash(idx) => {
            let name = name_of(method, idx)?.to_string();
            if name == "main::+" {
                // %+ is a view over the named captures.
                let hash = perl_runtime::HashHandle::new();
                for (k, v) in &interp.regex.current.named {
                    hash.borrow_mut()
                        .elem_lv(k.as_bytes())
                        .set(Scalar::from_bytes(v.clone()));
                }
                st.stack.push(Value::Hash(hash));
            } else {
                let glob = interp.symbols.glob(&name);
                st.stack.push(Value::Hash(glob.hash_handle()));
            }
        }
        I::GlobalCode(idx) => {
            let name = name_of(method, idx)?.to_string();
            let value = interp
                .symbols
                .lookup(&name)
                .and_then(|g| g.code())
                .map(Scalar::Code)
                .unwrap_or(Scalar::Undef);
            st.stack.push(Value::scalar(value));
        }
        I::GlobBindScalar(idx) => {
            let name = name_of(method, idx)?.to_string();
            let cell = pop_scalar(st)?;
            interp.symbols.glob(&name).bind_scalar(cell);
        }

        I::Binary(code) => {
            let b = pop_scalar(st)?.value();
            let a = pop_scalar(st)?.value();
            st.stack.push(Value::scalar(binary(code, &a, &b)?));
        }
        I::Unary(code) => {
            let a = pop_scalar(st)?.value();
            st.stack.push(Value::scalar(unary(code, &a)));
        }
        I::PostIncDec { dec } => {
            let cell = pop_scalar(st)?;
            let old = cell.value();
            {
                let mut v = cell.borrow_mut();
                if dec {
                    v.decrement();
                } else {
                    v.increment();
                }
            }
            st.stack.push(Value::scalar(old));
        }
        I::PreIncDec { dec } => {
            let cell = pop_scalar(st)?;
            {
                let mut v = cell.borrow_mut();
                if dec {
                    v.decrement();
                } else {
                    v.increment();
                }
            }
            st.stack.push(Value::Scalar(cell));
        }
        I::BuildString(n) => {
            let mut parts = Vec::with_capacity(n as usize);
            for _ in 0..n {
                parts.push(pop_scalar(st)?.value().stringify());
            }
            parts.reverse();
            let bytes = parts.concat();
            st.stack.push(Value::scalar(Scalar::from_bytes(bytes)));
        }
        I::JoinInterp => {
            let list = pop_list(st)?;
            let sep = interp
                .symbols
                .glob("main::\"")
                .scalar_handle()
                .value()
                .stringify();
            let mut out = Vec::new();
            for (i, v) in list.values.iter().enumerate() {
                if i > 0 {
                    out.extend_from_slice(&sep);
                }
                out.extend_from_slice(&v.value().stringify());
            }
            st.stack.push(Value::scalar(Scalar::from_bytes(out)));
        }
        I::MakeRange => {
            let to = pop_scalar(st)?.value();
            let from = pop_scalar(st)?.value();
            st.stack.push(Value::List(make_range(&from, &to)));
        }

        I::Jump(t) => return Ok(Flow::Jump(t)),
        I::JumpIfFalse(t) => {
            let v = pop_scalar(st)?.value();
            if !v.truthy() {
                return Ok(Flow::Jump(t));
            }
        }
        I::JumpIfTrue(t) => {
            let v = pop_scalar(st)?.value();
            if v.truthy() {
                return Ok(Flow::Jump(t));
            }
        }
        I::JumpIfDefined(t) => {
            let v = pop_scalar(st)?.value();
            if !v.is_undef() {
                return Ok(Flow::Jump(t));
            }
        }
        I::Dup => {
            let top = st
                .stack
                .last()
                .cloned()
                .ok_or_else(|| RuntimeError::Internal { msg: "dup on empty stack".into() })?;
            st.stack.push(top);
        }
        I::Pop => {
            pop(st)?;
        }

        I::MakeList(n) => {
            let mut values = Vec::new();
            let split_at = st.stack.len().saturating_sub(n as usize);
            let items: Vec<Value> = st.stack.split_off(split_at);
            for item in items {
                item.flatten_into(&mut values);
            }
            st.stack.push(Value::List(PerlList { values, marker: None }));
        }
        I::CtxScalar => {
            let v = pop(st)?;
            st.stack.push(Value::Scalar(v.scalarize()));
        }
        I::ListGet(i) => {
            let list = pop_list(st)?;
            let h = list
                .values
                .get(i as usize)
                .cloned()
                .unwrap_or_else(ScalarHandle::undef);
            st.stack.push(Value::Scalar(h));
        }
        I::ListCopy => {
            let list = pop_list(st)?;
            let copied = PerlList::from_values(list.value_copies());
            st.stack.push(Value::List(copied));
        }
        I::ListGetDyn => {
            let idx = pop_scalar(st)?.value().int();
            let list = pop_list(st)?;
            let h = usize::try_from(idx)
                .ok()
                .and_then(|i| list.values.get(i).cloned())
                .unwrap_or_else(ScalarHandle::undef);
            st.stack.push(Value::Scalar(h));
        }
        I::ListSliceFrom(i) => {
            let list = pop_list(st)?;
            let values = list.values.get(i as usize..).unwrap_or(&[]).to_vec();
            st.stack.push(Value::List(PerlList { values, marker: None }));
        }
        I::ListLen => {
            let list = pop_list(st)?;
            st.stack.push(Value::scalar(Scalar::Int(list.len() as i64)));
        }
        I::ArrayGet => {
            let idx = pop_scalar(st)?.value().int();
            let array = pop(st)?.into_array_handle()?;
            let value = array.borrow().get(idx);
            st.stack.push(Value::scalar(value));
        }
        I::ArrayGetLv => {
            let idx = pop_scalar(st)?.value().int();
            let array = pop(st)?.into_array_handle()?;
            let cell = array.borrow_mut().elem_lv(idx).ok_or_else(|| {
                RuntimeError::die_str("Modification of non-creatable array value attempted")
            })?;
            st.stack.push(Value::Scalar(cell));
        }
        I::HashGet => {
            let key = pop_scalar(st)?.value().stringify();
            let hash = pop(st)?.into_hash_handle()?;
            let value = hash.borrow().get(&key);
            st.stack.push(Value::scalar(value));
        }
        I::HashGetLv => {
            let key = pop_scalar(st)?.value().stringify();
            let hash = pop(st)?.into_hash_handle()?;
            let cell = hash.borrow_mut().elem_lv(&key);
            st.stack.push(Value::Scalar(cell));
        }
        I::HashExists => {
            let key = pop_scalar(st)?.value().stringify();
            let hash = pop(st)?.into_hash_handle()?;
            let exists = hash.borrow().exists(&key);
            st.stack.push(Value::scalar(bool_scalar(exists)));
        }
        I::HashDelete => {
            let key = pop_scalar(st)?.value().stringify();
            let hash = pop(st)?.into_hash_handle()?;
            let removed = hash.borrow_mut().delete(&key);
            st.stack.push(Value::scalar(removed));
        }
        I::ArrayLastIdx => {
            let array = pop(st)?.into_array_handle()?;
            let last = array.borrow().last_index();
            st.stack.push(Value::scalar(Scalar::Int(last)));
        }
        I::Slice(code) => {
            let index = pop_list(st)?;
            let base = pop(st)?;
            st.stack.push(exec_slice(code, base, &index)?);
        }
        I::Deref { code, allow_symbolic } => {
            let cell = pop_scalar(st)?;
            let derefed = deref(interp, code, &cell, allow_symbolic)?;
            st.stack.push(match derefed {
                Derefed::Scalar(h) => Value::Scalar(h),
                Derefed::Array(a) => Value::Array(a),
                Derefed::Hash(h) => Value::Hash(h),
                Derefed::Code(c) => Value::scalar(Scalar::Code(c)),
            });
        }
        I::MakeRef => {
            let value = pop(st)?;
            let reference = match value {
                Value::Scalar(h) => {
                    // Taking a reference to a code value keeps it a code
                    // value.
                    let inner = h.value();
                    match inner {
                        Scalar::Code(c) => Scalar::Code(c),
                        _ => Scalar::Ref(RefValue::Scalar(h)),
                    }
                }
                Value::Array(a) => Scalar::Ref(RefValue::Array(a)),
                Value::Hash(h) => Scalar::Ref(RefValue::Hash(h)),
                Value::List(_) => {
                    return Err(RuntimeError::Internal {
                        msg: "cannot take a reference to a list".into(),
                    })
                }
            };
            st.stack.push(Value::scalar(reference));
        }
        I::AnonArray => {
            let list = pop_list(st)?;
            let array = ArrayHandle::from_array(PerlArray::from_values(list.value_copies()));
            st.stack.push(Value::scalar(Scalar::Ref(RefValue::Array(array))));
        }
        I::AnonHash => {
            let list = pop_list(st)?;
            let hash = perl_runtime::HashHandle::new();
            hash.borrow_mut().assign(list.value_copies());
            st.stack.push(Value::scalar(Scalar::Ref(RefValue::Hash(hash))));
        }
        I::MakeClosure(idx) => {
            let sub = method.subs.get(idx as usize).ok_or_else(|| RuntimeError::Internal {
                msg: format!("sub pool index {idx} out of range"),
            })?;
            let env: Vec<PadSlot> = sub
                .captures
                .iter()
                .map(|cap| pad.get(cap.outer as usize).cloned().unwrap_or_default())
                .collect();
            let code = Rc::new(RuntimeCode::anon(sub.clone(), env));
            st.stack.push(Value::scalar(Scalar::Code(code)));
        }

        I::AssignScalar => {
            let value = pop_scalar(st)?.value();
            let target = pop_scalar(st)?;
            target.set(value);
            st.stack.push(Value::Scalar(target));
        }
        I::AssignArray => {
            let list = pop_list(st)?;
            let array = pop(st)?.into_array_handle()?;
            array.borrow_mut().assign(list.value_copies());
            st.stack.push(Value::Array(array));
        }
        I::AssignHash => {
            let list = pop_list(st)?;
            let hash = pop(st)?.into_hash_handle()?;
            hash.borrow_mut().assign(list.value_copies());
            st.stack.push(Value::Hash(hash));
        }

        I::Call(cx) => {
            let args = Value::args_array(pop_list(st)?);
            let code_value = pop_scalar(st)?.value();
            let code = code_of(&code_value)?;
            let result = call_code(interp, vm, &code, args, resolve_ctx(cx, st.ctx))?;
            st.stack.push(Value::List(result));
            return Ok(route_pending(interp, st));
        }
        I::CallNamed(idx, cx) => {
            let name = name_of(method, idx)?.to_string();
            let args = pop_list(st)?;
            let cx = resolve_ctx(cx, st.ctx);
            let line = current_line(method, st.pc);
            let result = call_named(interp, vm, method, &name, args, cx, line)?;
            st.stack.push(Value::List(result));
            return Ok(route_pending(interp, st));
        }
        I::CallMethod(idx, cx) => {
            let name = name_of(method, idx)?.to_string();
            let args = pop_list(st)?;
            let receiver = pop_scalar(st)?;
            let cx = resolve_ctx(cx, st.ctx);
            let result = call_method(interp, vm, &receiver, &name, args, cx)?;
            st.stack.push(Value::List(result));
            return Ok(route_pending(interp, st));
        }
        I::CallMethodDyn(cx) => {
            let args = pop_list(st)?;
            let name = pop_scalar(st)?.value().display();
            let receiver = pop_scalar(st)?;
            let cx = resolve_ctx(cx, st.ctx);
            let result = call_method(interp, vm, &receiver, &name, args, cx)?;
            st.stack.push(Value::List(result));
            return Ok(route_pending(interp, st));
        }
        I::Return => {
            let list = pop_list(st)?;
            return Ok(Flow::Return(list));
        }
        I::MakeMarker(code, label) => {
            let mut list = pop_list(st)?;
            let label = if label == NO_LABEL {
                None
            } else {
                Some(name_of(method, label)?.to_string())
            };
            list.marker = Some(match code {
                MarkerCode::Last => Marker::Last(label),
                MarkerCode::Next => Marker::Next(label),
                MarkerCode::Redo => Marker::Redo(label),
                MarkerCode::Goto => Marker::Goto(label.unwrap_or_default()),
            });
            st.stack.push(Value::List(list));
        }
        I::MakeTailCall => {
            let args = pop(st)?.into_array_handle()?;
            let code_value = pop_scalar(st)?.value();
            let code = code_of(&code_value)?;
            let mut list = PerlList::empty();
            list.marker = Some(Marker::TailCall { code, args });
            st.stack.push(Value::List(list));
        }
        I::CtlDispatch { label, last, next, redo } => {
            if let Some(marker) = interp.pending_ctl.clone() {
                let loop_label = if label == NO_LABEL {
                    None
                } else {
                    Some(name_of(method, label)?.to_string())
                };
                if marker.binds_to(loop_label.as_deref()) {
                    interp.pending_ctl = None;
                    let target = match marker {
                        Marker::Last(_) | Marker::TailCall { .. } => last,
                        Marker::Next(_) | Marker::Goto(_) => next,
                        Marker::Redo(_) => redo,
                    };
                    return Ok(Flow::Jump(target));
                }
                // Not ours: leave the loop, marker still pending.
                return Ok(Flow::Jump(last));
            }
        }
        I::LoopPush { label, last, next, redo } => {
            let label = if label == NO_LABEL {
                None
            } else {
                Some(name_of(method, label)?.to_string())
            };
            st.loops.push(LoopRec {
                label,
                last,
                next,
                redo,
                local_mark: interp.locals.mark(),
                regex_depth: interp.regex.depth(),
                handler_depth: st.handlers.len(),
            });
        }
        I::LoopPop => {
            st.loops.pop();
        }

        I::PushHandler(t) => {
            st.handlers.push(Handler {
                catch_pc: t as usize,
                stack_depth: st.stack.len(),
                local_mark: interp.locals.mark(),
                regex_depth: interp.regex.depth(),
                loop_depth: st.loops.len(),
            });
        }
        I::PopHandler => {
            st.handlers.pop();
        }

        I::LocalScalar => {
            let cell = pop_scalar(st)?;
            interp.locals.push_scalar(cell);
        }
        I::LocalArray => {
            let array = pop(st)?.into_array_handle()?;
            interp.locals.push_array(array);
        }
        I::LocalHash => {
            let hash = pop(st)?.into_hash_handle()?;
            interp.locals.push_hash(hash);
        }
        I::LocalMark => {
            let mark = interp.locals.mark();
            st.stack.push(Value::scalar(Scalar::Int(mark as i64)));
        }
        I::LocalRestore => {
            let mark = pop_scalar(st)?.value().int();
            interp.locals.pop_to(mark.max(0) as usize);
        }
        I::RegexSnapshot => interp.regex.push_snapshot(),
        I::RegexRestore => interp.regex.restore_top(),

        I::MatchRe { rx, ctx, negated } => {
            let target = pop_scalar(st)?.value();
            let program = vm.rx(method, rx)?;
            let result = do_match(interp, &program, &target, resolve_ctx(ctx, st.ctx), negated)?;
            st.stack.push(result);
        }
        I::MatchDyn { ctx, negated } => {
            let pattern = pop_scalar(st)?.value().display();
            let target = pop_scalar(st)?.value();
            let program = RxProgram::compile(&pattern, Default::default())?;
            let result = do_match(interp, &program, &target, resolve_ctx(ctx, st.ctx), negated)?;
            st.stack.push(result);
        }
        I::Subst { rx } => {
            let repl = code_of(&pop_scalar(st)?.value())?;
            let target = pop_scalar(st)?;
            let program = vm.rx(method, rx)?;
            let result = run_subst(interp, vm, &program, &target, &repl)?;
            st.stack.push(Value::scalar(result));
        }
        I::SubstDyn => {
            let repl = code_of(&pop_scalar(st)?.value())?;
            let pattern = pop_scalar(st)?.value().display();
            let target = pop_scalar(st)?;
            let program = RxProgram::compile(&pattern, Default::default())?;
            let result = run_subst(interp, vm, &program, &target, &repl)?;
            st.stack.push(Value::scalar(result));
        }
        I::Trans(idx) => {
            let target = pop_scalar(st)?;
            let spec = method.trans.get(idx as usize).ok_or_else(|| RuntimeError::Internal {
                msg: format!("trans pool index {idx}"),
            })?;
            st.stack.push(Value::scalar(do_trans(&target, spec)));
        }

        I::ReadLine(idx) => {
            let handle = name_of(method, idx)?.to_string();
            let record = read_record(interp, &handle)?;
            st.stack.push(Value::scalar(match record {
                Some(bytes) => Scalar::from_bytes(bytes),
                None => Scalar::Undef,
            }));
        }
        I::ReadAllLines(idx) => {
            let handle = name_of(method, idx)?.to_string();
            let records = read_all_records(interp, &handle)?;
            st.stack.push(Value::List(PerlList::from_values(
                records.into_iter().map(Scalar::from_bytes),
            )));
        }
        I::Print { stderr, newline } => {
            let list = pop_list(st)?;
            builtins::write_list(interp, &list, stderr, newline)?;
            st.stack.push(Value::scalar(Scalar::Int(1)));
        }

        I::Wantarray => {
            let value = match st.ctx {
                Context::List => Scalar::Int(1),
                Context::Scalar => bool_scalar(false),
                _ => Scalar::Undef,
            };
            st.stack.push(Value::scalar(value));
        }
        I::SignalCheck => interp.check_signals()?,
    }
    Ok(Flow::Continue)
}

fn code_of(value: &Scalar) -> RuntimeResult<Rc<RuntimeCode>> {
    match value {
        Scalar::Code(c) => Ok(c.clone()),
        Scalar::Ref(RefValue::Code(c)) => Ok(c.clone()),
        other => Err(RuntimeError::die_str(format!(
            "Not a CODE reference: {}",
            if other.is_undef() { "undef".to_string() } else { other.display() }
        ))),
    }
}

fn exec_slice(
    code: perl_bytecode::SliceCode,
    base: Value,
    index: &PerlList,
) -> RuntimeResult<Value> {
    use perl_bytecode::SliceCode as S;
    match code {
        S::Array => {
            let array = base.into_array_handle()?;
            let values: Vec<Scalar> = index
                .values
                .iter()
                .map(|i| array.borrow().get(i.value().int()))
                .collect();
            Ok(Value::List(PerlList::from_values(values)))
        }
        S::Hash => {
            let hash = base.into_hash_handle()?;
            let values: Vec<Scalar> = index
                .values
                .iter()
                .map(|k| hash.borrow().get(&k.value().stringify()))
                .collect();
            Ok(Value::List(PerlList::from_values(values)))
        }
        S::KeyValue => {
            let hash = base.into_hash_handle()?;
            let mut out = Vec::new();
            for k in &index.values {
                let key = k.value().stringify();
                out.push(Scalar::from_bytes(key.clone()));
                out.push(hash.borrow().get(&key));
            }
            Ok(Value::List(PerlList::from_values(out)))
        }
    }
}

fn make_range(from: &Scalar, to: &Scalar) -> PerlList {
    let numeric = |s: &Scalar| {
        matches!(s, Scalar::Int(_) | Scalar::Num(_))
            || matches!(s, Scalar::Str(ps) if !ps.bytes.is_empty()
                && ps.bytes.iter().all(|b| b.is_ascii_digit() || *b == b'-'))
    };
    if numeric(from) || numeric(to) {
        let a = from.int();
        let b = to.int();
        if a > b {
            return PerlList::empty();
        }
        return PerlList::from_values((a..=b).map(Scalar::Int));
    }
    // Magic string range: increment until the end value (or the length
    // overtakes it).
    let mut out = Vec::new();
    let target = to.stringify();
    let mut cur = from.stringify();
    for _ in 0..1_000_000 {
        out.push(Scalar::from_bytes(cur.clone()));
        if cur == target || cur.len() > target.len() {
            break;
        }
        cur = perl_runtime::str_increment(&cur);
    }
    PerlList::from_values(out)
}

fn run_subst(
    interp: &mut Interp,
    vm: &mut VmState,
    program: &RxProgram,
    target: &ScalarHandle,
    repl: &Rc<RuntimeCode>,
) -> RuntimeResult<Scalar> {
    do_subst(interp, program, target, |interp| {
        let result = call_code(interp, vm, repl, ArrayHandle::new(), Context::Scalar)?;
        Ok(result.scalar_value().stringify())
    })
}

fn call_named(
    interp: &mut Interp,
    vm: &mut VmState,
    method: &Rc<Method>,
    name: &str,
    args: PerlList,
    cx: Context,
    line: u32,
) -> RuntimeResult<PerlList> {
    if name.contains("::") {
        if let Some(code) = interp.symbols.lookup(name).and_then(|g| g.code()) {
            let args = Value::args_array(args);
            return call_code(interp, vm, &code, args, cx);
        }
        // Fall back to a builtin for fully qualified CORE-ish calls.
        let bare = name.rsplit("::").next().unwrap_or(name);
        if let Some(result) =
            builtins::dispatch(interp, vm, bare, args, cx, (&method.file, line))?
        {
            return Ok(result);
        }
        return Err(RuntimeError::die_str(format!(
            "Undefined subroutine &{name} called"
        )));
    }
    match builtins::dispatch(interp, vm, name, args, cx, (&method.file, line))? {
        Some(result) => Ok(result),
        None => Err(RuntimeError::die_str(format!(
            "Undefined subroutine &main::{name} called"
        ))),
    }
}

fn call_method(
    interp: &mut Interp,
    vm: &mut VmState,
    receiver: &ScalarHandle,
    name: &str,
    args: PerlList,
    cx: Context,
) -> RuntimeResult<PerlList> {
    let receiver_value = receiver.value();
    let package = match &receiver_value {
        Scalar::Ref(r) => {
            let pkg = r.type_name();
            if matches!(pkg.as_str(), "ARRAY" | "HASH" | "SCALAR" | "CODE" | "GLOB") {
                return Err(RuntimeError::die_str(format!(
                    "Can't call method \"{name}\" on unblessed reference"
                )));
            }
            pkg
        }
        other => other.display(),
    };
    let code = interp.resolve_method(&package, name).ok_or_else(|| {
        RuntimeError::die_str(format!(
            "Can't locate object method \"{name}\" via package \"{package}\""
        ))
    })?;
    let mut full_args = vec![receiver.clone()];
    full_args.extend(args.values);
    let array = Value::args_array(PerlList { values: full_args, marker: None });
    call_code(interp, vm, &code, array, cx)
}
