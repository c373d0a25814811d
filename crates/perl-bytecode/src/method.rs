//! Method containers and the packed-form assembler.

use crate::op::{BinCode, Const, Context, DerefCode, Instr, MarkerCode, SliceCode, SlotKind, UnCode};
use crate::{RegexSpec, TransSpec};
use std::rc::Rc;
use thiserror::Error;

/// Platform limit of the packed backend: one method's code bytes.
pub const PACKED_LIMIT: usize = u16::MAX as usize;

/// One captured variable: the slot to read in the enclosing frame at
/// closure creation, and the pad slot it fills in this method's frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capture {
    /// Slot index in the enclosing method's pad
    pub outer: u16,
    /// Slot index in this method's pad
    pub inner: u16,
}

/// One compiled method: the unit of execution.
///
/// A program compiles to a root method; every `sub` (named or anonymous)
/// and every substitution replacement compiles to a nested method in
/// [`Method::subs`], referenced by `MakeClosure`.
#[derive(Debug, Clone)]
pub struct Method {
    /// Diagnostic name (`main`, `main::f`, `__ANON__`)
    pub name: String,
    /// Source file for diagnostics
    pub file: String,
    /// Pad shape; the prologue allocates one slot per entry
    pub slots: Vec<SlotKind>,
    /// Captured variables: enclosing-frame slots and the pad slots they fill
    pub captures: Vec<Capture>,
    /// Constant pool
    pub consts: Vec<Const>,
    /// Global/sub/label name pool
    pub names: Vec<String>,
    /// Constant regex pool
    pub regexes: Vec<RegexSpec>,
    /// Transliteration pool
    pub trans: Vec<TransSpec>,
    /// Nested sub methods
    pub subs: Vec<Rc<Method>>,
    /// Line table: (instruction index, 1-based line), ascending
    pub lines: Vec<(u32, u32)>,
    /// Executable body in either encoding
    pub body: MethodBody,
}

impl Method {
    /// Source line active at a listed instruction index (packed callers
    /// translate through their own table).
    pub fn line_at(&self, instr_index: u32) -> Option<u32> {
        match self.lines.binary_search_by_key(&instr_index, |e| e.0) {
            Ok(i) => Some(self.lines[i].1),
            Err(0) => None,
            Err(i) => Some(self.lines[i - 1].1),
        }
    }
}

/// The two body encodings behind one execution contract.
#[derive(Debug, Clone)]
pub enum MethodBody {
    /// Listed fallback: no size limit, `u32` instruction-index jumps
    Listed(Vec<Instr>),
    /// Packed: compact bytes, `u16` byte-offset jumps
    Packed(PackedCode),
}

/// Packed code bytes plus a byte-offset line table.
#[derive(Debug, Clone)]
pub struct PackedCode {
    /// Serialized instructions
    pub bytes: Vec<u8>,
    /// Line table: (byte offset, 1-based line), ascending
    pub lines: Vec<(u32, u32)>,
}

impl PackedCode {
    /// Source line active at a byte offset.
    pub fn line_at(&self, offset: u32) -> Option<u32> {
        match self.lines.binary_search_by_key(&offset, |e| e.0) {
            Ok(i) => Some(self.lines[i].1),
            Err(0) => None,
            Err(i) => Some(self.lines[i - 1].1),
        }
    }
}

/// Assembly failures. `TooLarge` drives the emitter's hoist-then-fallback
/// policy; the others indicate emitter bugs.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum AssembleError {
    /// The method exceeds the packed backend's size limit
    #[error("method body of {size} bytes exceeds the packed limit of {limit}")]
    TooLarge {
        /// Assembled size
        size: usize,
        /// The limit
        limit: usize,
    },
    /// A jump target does not land on an instruction boundary
    #[error("invalid jump target {target}")]
    BadTarget {
        /// The offending listed target
        target: u32,
    },
}

// Opcode bytes. Gaps are left between families for future instructions.
const OP_PUSH_UNDEF: u8 = 0x01;
const OP_PUSH_CONST: u8 = 0x02;
const OP_PUSH_INT: u8 = 0x03;
const OP_NEW_SCALAR: u8 = 0x08;
const OP_NEW_ARRAY: u8 = 0x09;
const OP_NEW_HASH: u8 = 0x0A;
const OP_LOAD_SCALAR: u8 = 0x0B;
const OP_LOAD_ARRAY: u8 = 0x0C;
const OP_LOAD_HASH: u8 = 0x0D;
const OP_BIND_SCALAR: u8 = 0x0E;
const OP_BIND_ARRAY: u8 = 0x11;
const OP_BIND_HASH: u8 = 0x12;
const OP_STORE_SPILL: u8 = 0x0F;
const OP_LOAD_SPILL: u8 = 0x10;
const OP_GLOBAL_SCALAR: u8 = 0x14;
const OP_GLOBAL_ARRAY: u8 = 0x15;
const OP_GLOBAL_HASH: u8 = 0x16;
const OP_GLOBAL_CODE: u8 = 0x17;
const OP_GLOB_BIND_SCALAR: u8 = 0x18;
const OP_BINARY: u8 = 0x20;
const OP_UNARY: u8 = 0x21;
const OP_POST_INCDEC: u8 = 0x22;
const OP_PRE_INCDEC: u8 = 0x23;
const OP_BUILD_STRING: u8 = 0x24;
const OP_JOIN_INTERP: u8 = 0x25;
const OP_MAKE_RANGE: u8 = 0x26;
const OP_JUMP: u8 = 0x30;
const OP_JUMP_IF_FALSE: u8 = 0x31;
const OP_JUMP_IF_TRUE: u8 = 0x32;
const OP_JUMP_IF_DEFINED: u8 = 0x33;
const OP_DUP: u8 = 0x34;
const OP_POP: u8 = 0x35;
const OP_MAKE_LIST: u8 = 0x40;
const OP_CTX_SCALAR: u8 = 0x41;
const OP_LIST_GET: u8 = 0x42;
const OP_LIST_GET_DYN: u8 = 0x43;
const OP_LIST_SLICE_FROM: u8 = 0x44;
const OP_LIST_COPY: u8 = 0x53;
const OP_LIST_LEN: u8 = 0x45;
const OP_ARRAY_GET: u8 = 0x46;
const OP_ARRAY_GET_LV: u8 = 0x47;
const OP_HASH_GET: u8 = 0x48;
const OP_HASH_GET_LV: u8 = 0x49;
const OP_HASH_EXISTS: u8 = 0x4A;
const OP_HASH_DELETE: u8 = 0x4B;
const OP_ARRAY_LAST_IDX: u8 = 0x4C;
const OP_SLICE: u8 = 0x4D;
const OP_DEREF: u8 = 0x4E;
const OP_MAKE_REF: u8 = 0x4F;
const OP_ANON_ARRAY: u8 = 0x50;
const OP_ANON_HASH: u8 = 0x51;
const OP_MAKE_CLOSURE: u8 = 0x52;
const OP_ASSIGN_SCALAR: u8 = 0x58;
const OP_ASSIGN_ARRAY: u8 = 0x59;
const OP_ASSIGN_HASH: u8 = 0x5A;
const OP_CALL: u8 = 0x60;
const OP_CALL_NAMED: u8 = 0x61;
const OP_CALL_METHOD: u8 = 0x62;
const OP_CALL_METHOD_DYN: u8 = 0x63;
const OP_RETURN: u8 = 0x64;
const OP_MAKE_MARKER: u8 = 0x65;
const OP_MAKE_TAILCALL: u8 = 0x66;
const OP_CTL_DISPATCH: u8 = 0x67;
const OP_LOOP_PUSH: u8 = 0x6A;
const OP_LOOP_POP: u8 = 0x6B;
const OP_PUSH_HANDLER: u8 = 0x68;
const OP_POP_HANDLER: u8 = 0x69;
const OP_LOCAL_SCALAR: u8 = 0x70;
const OP_LOCAL_ARRAY: u8 = 0x71;
const OP_LOCAL_HASH: u8 = 0x72;
const OP_LOCAL_MARK: u8 = 0x73;
const OP_LOCAL_RESTORE: u8 = 0x74;
const OP_REGEX_SNAPSHOT: u8 = 0x75;
const OP_REGEX_RESTORE: u8 = 0x76;
const OP_MATCH_RE: u8 = 0x80;
const OP_MATCH_DYN: u8 = 0x81;
const OP_SUBST: u8 = 0x82;
const OP_SUBST_DYN: u8 = 0x83;
const OP_TRANS: u8 = 0x84;
const OP_READ_LINE: u8 = 0x90;
const OP_READ_ALL_LINES: u8 = 0x91;
const OP_PRINT: u8 = 0x92;
const OP_WANTARRAY: u8 = 0xA0;
const OP_SIGNAL_CHECK: u8 = 0xA1;

fn bin_code_u8(code: BinCode) -> u8 {
    code as u8
}

fn encoded_len(instr: &Instr) -> usize {
    use Instr as I;
    1 + match instr {
        I::PushUndef
        | I::JoinInterp
        | I::MakeRange
        | I::Dup
        | I::Pop
        | I::CtxScalar
        | I::ListCopy
        | I::ListGetDyn
        | I::ListLen
        | I::ArrayGet
        | I::ArrayGetLv
        | I::HashGet
        | I::HashGetLv
        | I::HashExists
        | I::HashDelete
        | I::ArrayLastIdx
        | I::MakeRef
        | I::AnonArray
        | I::AnonHash
        | I::AssignScalar
        | I::AssignArray
        | I::AssignHash
        | I::Return
        | I::MakeTailCall
        | I::PopHandler
        | I::LocalScalar
        | I::LocalArray
        | I::LocalHash
        | I::LocalMark
        | I::LocalRestore
        | I::RegexSnapshot
        | I::RegexRestore
        | I::SubstDyn
        | I::Wantarray
        | I::SignalCheck => 0,
        I::PushInt(_) => 4,
        I::Binary(_)
        | I::Unary(_)
        | I::PostIncDec { .. }
        | I::PreIncDec { .. }
        | I::Call(_)
        | I::CallMethodDyn(_)
        | I::Slice(_) => 1,
        I::Deref { .. } | I::Print { .. } => 2,
        I::PushConst(_)
        | I::NewScalar(_)
        | I::NewArray(_)
        | I::NewHash(_)
        | I::LoadScalar(_)
        | I::LoadArray(_)
        | I::LoadHash(_)
        | I::BindScalar(_)
        | I::BindArray(_)
        | I::BindHash(_)
        | I::StoreSpill(_)
        | I::LoadSpill(_)
        | I::GlobalScalar(_)
        | I::GlobalArray(_)
        | I::GlobalHash(_)
        | I::GlobalCode(_)
        | I::GlobBindScalar(_)
        | I::BuildString(_)
        | I::MakeList(_)
        | I::ListGet(_)
        | I::ListSliceFrom(_)
        | I::MakeClosure(_)
        | I::Trans(_)
        | I::ReadLine(_)
        | I::ReadAllLines(_)
        | I::Subst { .. } => 2,
        I::Jump(_)
        | I::JumpIfFalse(_)
        | I::JumpIfTrue(_)
        | I::JumpIfDefined(_)
        | I::PushHandler(_) => 2,
        I::CallNamed(..) | I::CallMethod(..) => 3,
        I::MakeMarker(..) => 3,
        I::MatchRe { .. } => 4,
        I::MatchDyn { .. } => 2,
        I::CtlDispatch { .. } | I::LoopPush { .. } => 8,
        I::LoopPop => 0,
    }
}

/// Assembles a listed body into the packed form with the platform limit.
pub fn assemble(instrs: &[Instr], lines: &[(u32, u32)]) -> Result<PackedCode, AssembleError> {
    assemble_with_limit(instrs, lines, PACKED_LIMIT)
}

/// Assembles with an explicit size limit (tests and emitter policy use a
/// lowered limit to exercise the hoisting and fallback paths).
///
/// Jump operands are rewritten from instruction indices to byte offsets;
/// the result fails with [`AssembleError::TooLarge`] when the body exceeds
/// the limit.
pub fn assemble_with_limit(
    instrs: &[Instr],
    lines: &[(u32, u32)],
    limit: usize,
) -> Result<PackedCode, AssembleError> {
    // First pass: byte offset of each instruction.
    let mut offsets = Vec::with_capacity(instrs.len() + 1);
    let mut pos = 0usize;
    for instr in instrs {
        offsets.push(pos as u32);
        pos += encoded_len(instr);
    }
    offsets.push(pos as u32);
    if pos > limit.min(PACKED_LIMIT) {
        return Err(AssembleError::TooLarge { size: pos, limit: limit.min(PACKED_LIMIT) });
    }

    // Second pass: serialize with rewritten targets.
    let mut bytes = Vec::with_capacity(pos);
    for instr in instrs {
        let mut patched = instr.clone();
        let mut bad = None;
        patched.map_targets(|t| match offsets.get(t as usize) {
            Some(off) => *off,
            None => {
                bad = Some(t);
                0
            }
        });
        if let Some(target) = bad {
            return Err(AssembleError::BadTarget { target });
        }
        encode(&patched, &mut bytes);
    }

    let lines = lines
        .iter()
        .filter_map(|(idx, line)| offsets.get(*idx as usize).map(|off| (*off, *line)))
        .collect();
    Ok(PackedCode { bytes, lines })
}

fn push_u16(out: &mut Vec<u8>, v: u16) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn encode(instr: &Instr, out: &mut Vec<u8>) {
    use Instr as I;
    match instr {
        I::PushUndef => out.push(OP_PUSH_UNDEF),
        I::PushConst(i) => {
            out.push(OP_PUSH_CONST);
            push_u16(out, *i);
        }
        I::PushInt(v) => {
            out.push(OP_PUSH_INT);
            out.extend_from_slice(&v.to_le_bytes());
        }
        I::NewScalar(s) => {
            out.push(OP_NEW_SCALAR);
            push_u16(out, *s);
        }
        I::NewArray(s) => {
            out.push(OP_NEW_ARRAY);
            push_u16(out, *s);
        }
        I::NewHash(s) => {
            out.push(OP_NEW_HASH);
            push_u16(out, *s);
        }
        I::LoadScalar(s) => {
            out.push(OP_LOAD_SCALAR);
            push_u16(out, *s);
        }
        I::LoadArray(s) => {
            out.push(OP_LOAD_ARRAY);
            push_u16(out, *s);
        }
        I::LoadHash(s) => {
            out.push(OP_LOAD_HASH);
            push_u16(out, *s);
        }
        I::BindScalar(s) => {
            out.push(OP_BIND_SCALAR);
            push_u16(out, *s);
        }
        I::BindArray(s) => {
            out.push(OP_BIND_ARRAY);
            push_u16(out, *s);
        }
        I::BindHash(s) => {
            out.push(OP_BIND_HASH);
            push_u16(out, *s);
        }
        I::StoreSpill(s) => {
            out.push(OP_STORE_SPILL);
            push_u16(out, *s);
        }
        I::LoadSpill(s) => {
            out.push(OP_LOAD_SPILL);
            push_u16(out, *s);
        }
        I::GlobalScalar(n) => {
            out.push(OP_GLOBAL_SCALAR);
            push_u16(out, *n);
        }
        I::GlobalArray(n) => {
            out.push(OP_GLOBAL_ARRAY);
            push_u16(out, *n);
        }
        I::GlobalHash(n) => {
            out.push(OP_GLOBAL_HASH);
            push_u16(out, *n);
        }
        I::GlobalCode(n) => {
            out.push(OP_GLOBAL_CODE);
            push_u16(out, *n);
        }
        I::GlobBindScalar(n) => {
            out.push(OP_GLOB_BIND_SCALAR);
            push_u16(out, *n);
        }
        I::Binary(code) => {
            out.push(OP_BINARY);
            out.push(bin_code_u8(*code));
        }
        I::Unary(code) => {
            out.push(OP_UNARY);
            out.push(*code as u8);
        }
        I::PostIncDec { dec } => {
            out.push(OP_POST_INCDEC);
            out.push(u8::from(*dec));
        }
        I::PreIncDec { dec } => {
            out.push(OP_PRE_INCDEC);
            out.push(u8::from(*dec));
        }
        I::BuildString(n) => {
            out.push(OP_BUILD_STRING);
            push_u16(out, *n);
        }
        I::JoinInterp => out.push(OP_JOIN_INTERP),
        I::MakeRange => out.push(OP_MAKE_RANGE),
        I::Jump(t) => {
            out.push(OP_JUMP);
            push_u16(out, *t as u16);
        }
        I::JumpIfFalse(t) => {
            out.push(OP_JUMP_IF_FALSE);
            push_u16(out, *t as u16);
        }
        I::JumpIfTrue(t) => {
            out.push(OP_JUMP_IF_TRUE);
            push_u16(out, *t as u16);
        }
        I::JumpIfDefined(t) => {
            out.push(OP_JUMP_IF_DEFINED);
            push_u16(out, *t as u16);
        }
        I::Dup => out.push(OP_DUP),
        I::Pop => out.push(OP_POP),
        I::MakeList(n) => {
            out.push(OP_MAKE_LIST);
            push_u16(out, *n);
        }
        I::CtxScalar => out.push(OP_CTX_SCALAR),
        I::ListGet(i) => {
            out.push(OP_LIST_GET);
            push_u16(out, *i);
        }
        I::ListCopy => out.push(OP_LIST_COPY),
        I::ListGetDyn => out.push(OP_LIST_GET_DYN),
        I::ListSliceFrom(i) => {
            out.push(OP_LIST_SLICE_FROM);
            push_u16(out, *i);
        }
        I::ListLen => out.push(OP_LIST_LEN),
        I::ArrayGet => out.push(OP_ARRAY_GET),
        I::ArrayGetLv => out.push(OP_ARRAY_GET_LV),
        I::HashGet => out.push(OP_HASH_GET),
        I::HashGetLv => out.push(OP_HASH_GET_LV),
        I::HashExists => out.push(OP_HASH_EXISTS),
        I::HashDelete => out.push(OP_HASH_DELETE),
        I::ArrayLastIdx => out.push(OP_ARRAY_LAST_IDX),
        I::Slice(code) => {
            out.push(OP_SLICE);
            out.push(*code as u8);
        }
        I::Deref { code, allow_symbolic } => {
            out.push(OP_DEREF);
            out.push(*code as u8);
            out.push(u8::from(*allow_symbolic));
        }
        I::MakeRef => out.push(OP_MAKE_REF),
        I::AnonArray => out.push(OP_ANON_ARRAY),
        I::AnonHash => out.push(OP_ANON_HASH),
        I::MakeClosure(i) => {
            out.push(OP_MAKE_CLOSURE);
            push_u16(out, *i);
        }
        I::AssignScalar => out.push(OP_ASSIGN_SCALAR),
        I::AssignArray => out.push(OP_ASSIGN_ARRAY),
        I::AssignHash => out.push(OP_ASSIGN_HASH),
        I::Call(cx) => {
            out.push(OP_CALL);
            out.push(cx.to_u8());
        }
        I::CallNamed(n, cx) => {
            out.push(OP_CALL_NAMED);
            push_u16(out, *n);
            out.push(cx.to_u8());
        }
        I::CallMethod(n, cx) => {
            out.push(OP_CALL_METHOD);
            push_u16(out, *n);
            out.push(cx.to_u8());
        }
        I::CallMethodDyn(cx) => {
            out.push(OP_CALL_METHOD_DYN);
            out.push(cx.to_u8());
        }
        I::Return => out.push(OP_RETURN),
        I::MakeMarker(code, label) => {
            out.push(OP_MAKE_MARKER);
            out.push(*code as u8);
            push_u16(out, *label);
        }
        I::MakeTailCall => out.push(OP_MAKE_TAILCALL),
        I::CtlDispatch { label, last, next, redo } => {
            out.push(OP_CTL_DISPATCH);
            push_u16(out, *label);
            push_u16(out, *last as u16);
            push_u16(out, *next as u16);
            push_u16(out, *redo as u16);
        }
        I::LoopPush { label, last, next, redo } => {
            out.push(OP_LOOP_PUSH);
            push_u16(out, *label);
            push_u16(out, *last as u16);
            push_u16(out, *next as u16);
            push_u16(out, *redo as u16);
        }
        I::LoopPop => out.push(OP_LOOP_POP),
        I::PushHandler(t) => {
            out.push(OP_PUSH_HANDLER);
            push_u16(out, *t as u16);
        }
        I::PopHandler => out.push(OP_POP_HANDLER),
        I::LocalScalar => out.push(OP_LOCAL_SCALAR),
        I::LocalArray => out.push(OP_LOCAL_ARRAY),
        I::LocalHash => out.push(OP_LOCAL_HASH),
        I::LocalMark => out.push(OP_LOCAL_MARK),
        I::LocalRestore => out.push(OP_LOCAL_RESTORE),
        I::RegexSnapshot => out.push(OP_REGEX_SNAPSHOT),
        I::RegexRestore => out.push(OP_REGEX_RESTORE),
        I::MatchRe { rx, ctx, negated } => {
            out.push(OP_MATCH_RE);
            push_u16(out, *rx);
            out.push(ctx.to_u8());
            out.push(u8::from(*negated));
        }
        I::MatchDyn { ctx, negated } => {
            out.push(OP_MATCH_DYN);
            out.push(ctx.to_u8());
            out.push(u8::from(*negated));
        }
        I::Subst { rx } => {
            out.push(OP_SUBST);
            push_u16(out, *rx);
        }
        I::SubstDyn => out.push(OP_SUBST_DYN),
        I::Trans(i) => {
            out.push(OP_TRANS);
            push_u16(out, *i);
        }
        I::ReadLine(n) => {
            out.push(OP_READ_LINE);
            push_u16(out, *n);
        }
        I::ReadAllLines(n) => {
            out.push(OP_READ_ALL_LINES);
            push_u16(out, *n);
        }
        I::Print { stderr, newline } => {
            out.push(OP_PRINT);
            out.push(u8::from(*stderr));
            out.push(u8::from(*newline));
        }
        I::Wantarray => out.push(OP_WANTARRAY),
        I::SignalCheck => out.push(OP_SIGNAL_CHECK),
    }
}

fn read_u16(bytes: &[u8], pc: usize) -> Option<u16> {
    Some(u16::from_le_bytes([*bytes.get(pc)?, *bytes.get(pc + 1)?]))
}

fn bin_code_from_u8(v: u8) -> Option<BinCode> {
    use BinCode as B;
    const TABLE: &[BinCode] = &[
        B::Add,
        B::Sub,
        B::Mul,
        B::Div,
        B::Mod,
        B::Pow,
        B::IntAdd,
        B::IntSub,
        B::IntMul,
        B::IntDiv,
        B::Concat,
        B::Repeat,
        B::Shl,
        B::Shr,
        B::BitAnd,
        B::BitOr,
        B::BitXor,
        B::NumEq,
        B::NumNe,
        B::NumLt,
        B::NumGt,
        B::NumLe,
        B::NumGe,
        B::NumCmp,
        B::StrEq,
        B::StrNe,
        B::StrLt,
        B::StrGt,
        B::StrLe,
        B::StrGe,
        B::StrCmp,
    ];
    TABLE.get(v as usize).copied()
}

fn un_code_from_u8(v: u8) -> Option<UnCode> {
    use UnCode as U;
    const TABLE: &[UnCode] = &[U::Neg, U::Not, U::BitNot, U::Defined, U::StrInc, U::Dec];
    TABLE.get(v as usize).copied()
}

fn deref_code_from_u8(v: u8) -> Option<DerefCode> {
    use DerefCode as D;
    const TABLE: &[DerefCode] =
        &[D::ScalarRv, D::ScalarLv, D::ArrayRv, D::ArrayLv, D::HashRv, D::HashLv, D::Code];
    TABLE.get(v as usize).copied()
}

fn slice_code_from_u8(v: u8) -> Option<SliceCode> {
    use SliceCode as S;
    const TABLE: &[SliceCode] = &[S::Array, S::Hash, S::KeyValue];
    TABLE.get(v as usize).copied()
}

fn marker_code_from_u8(v: u8) -> Option<MarkerCode> {
    use MarkerCode as M;
    const TABLE: &[MarkerCode] = &[M::Last, M::Next, M::Redo, M::Goto];
    TABLE.get(v as usize).copied()
}

/// Decodes the instruction at `pc` in a packed body.
///
/// Returns the instruction (with byte-offset jump operands) and the next
/// program counter. `None` means corrupt code, which the execution engine
/// reports as an internal error.
pub fn decode(bytes: &[u8], pc: usize) -> Option<(Instr, usize)> {
    use Instr as I;
    let op = *bytes.get(pc)?;
    let u16_at = |off: usize| read_u16(bytes, pc + off);
    Some(match op {
        OP_PUSH_UNDEF => (I::PushUndef, pc + 1),
        OP_PUSH_CONST => (I::PushConst(u16_at(1)?), pc + 3),
        OP_PUSH_INT => {
            let v = i32::from_le_bytes([
                *bytes.get(pc + 1)?,
                *bytes.get(pc + 2)?,
                *bytes.get(pc + 3)?,
                *bytes.get(pc + 4)?,
            ]);
            (I::PushInt(v), pc + 5)
        }
        OP_NEW_SCALAR => (I::NewScalar(u16_at(1)?), pc + 3),
        OP_NEW_ARRAY => (I::NewArray(u16_at(1)?), pc + 3),
        OP_NEW_HASH => (I::NewHash(u16_at(1)?), pc + 3),
        OP_LOAD_SCALAR => (I::LoadScalar(u16_at(1)?), pc + 3),
        OP_LOAD_ARRAY => (I::LoadArray(u16_at(1)?), pc + 3),
        OP_LOAD_HASH => (I::LoadHash(u16_at(1)?), pc + 3),
        OP_BIND_SCALAR => (I::BindScalar(u16_at(1)?), pc + 3),
        OP_BIND_ARRAY => (I::BindArray(u16_at(1)?), pc + 3),
        OP_BIND_HASH => (I::BindHash(u16_at(1)?), pc + 3),
        OP_STORE_SPILL => (I::StoreSpill(u16_at(1)?), pc + 3),
        OP_LOAD_SPILL => (I::LoadSpill(u16_at(1)?), pc + 3),
        OP_GLOBAL_SCALAR => (I::GlobalScalar(u16_at(1)?), pc + 3),
        OP_GLOBAL_ARRAY => (I::GlobalArray(u16_at(1)?), pc + 3),
        OP_GLOBAL_HASH => (I::GlobalHash(u16_at(1)?), pc + 3),
        OP_GLOBAL_CODE => (I::GlobalCode(u16_at(1)?), pc + 3),
        OP_GLOB_BIND_SCALAR => (I::GlobBindScalar(u16_at(1)?), pc + 3),
        OP_BINARY => (I::Binary(bin_code_from_u8(*bytes.get(pc + 1)?)?), pc + 2),
        OP_UNARY => (I::Unary(un_code_from_u8(*bytes.get(pc + 1)?)?), pc + 2),
        OP_POST_INCDEC => (I::PostIncDec { dec: *bytes.get(pc + 1)? != 0 }, pc + 2),
        OP_PRE_INCDEC => (I::PreIncDec { dec: *bytes.get(pc + 1)? != 0 }, pc + 2),
        OP_BUILD_STRING => (I::BuildString(u16_at(1)?), pc + 3),
        OP_JOIN_INTERP => (I::JoinInterp, pc + 1),
        OP_MAKE_RANGE => (I::MakeRange, pc + 1),
        OP_JUMP => (I::Jump(u32::from(u16_at(1)?)), pc + 3),
        OP_JUMP_IF_FALSE => (I::JumpIfFalse(u32::from(u16_at(1)?)), pc + 3),
        OP_JUMP_IF_TRUE => (I::JumpIfTrue(u32::from(u16_at(1)?)), pc + 3),
        OP_JUMP_IF_DEFINED => (I::JumpIfDefined(u32::from(u16_at(1)?)), pc + 3),
        OP_DUP => (I::Dup, pc + 1),
        OP_POP => (I::Pop, pc + 1),
        OP_MAKE_LIST => (I::MakeList(u16_at(1)?), pc + 3),
        OP_CTX_SCALAR => (I::CtxScalar, pc + 1),
        OP_LIST_GET => (I::ListGet(u16_at(1)?), pc + 3),
        OP_LIST_COPY => (I::ListCopy, pc + 1),
        OP_LIST_GET_DYN => (I::ListGetDyn, pc + 1),
        OP_LIST_SLICE_FROM => (I::ListSliceFrom(u16_at(1)?), pc + 3),
        OP_LIST_LEN => (I::ListLen, pc + 1),
        OP_ARRAY_GET => (I::ArrayGet, pc + 1),
        OP_ARRAY_GET_LV => (I::ArrayGetLv, pc + 1),
        OP_HASH_GET => (I::HashGet, pc + 1),
        OP_HASH_GET_LV => (I::HashGetLv, pc + 1),
        OP_HASH_EXISTS => (I::HashExists, pc + 1),
        OP_HASH_DELETE => (I::HashDelete, pc + 1),
        OP_ARRAY_LAST_IDX => (I::ArrayLastIdx, pc + 1),
        OP_SLICE => (I::Slice(slice_code_from_u8(*bytes.get(pc + 1)?)?), pc + 2),
        OP_DEREF => (
            I::Deref {
                code: deref_code_from_u8(*bytes.get(pc + 1)?)?,
                allow_symbolic: *bytes.get(pc + 2)? != 0,
            },
            pc + 3,
        ),
        OP_MAKE_REF => (I::MakeRef, pc + 1),
        OP_ANON_ARRAY => (I::AnonArray, pc + 1),
        OP_ANON_HASH => (I::AnonHash, pc + 1),
        OP_MAKE_CLOSURE => (I::MakeClosure(u16_at(1)?), pc + 3),
        OP_ASSIGN_SCALAR => (I::AssignScalar, pc + 1),
        OP_ASSIGN_ARRAY => (I::AssignArray, pc + 1),
        OP_ASSIGN_HASH => (I::AssignHash, pc + 1),
        OP_CALL => (I::Call(Context::from_u8(*bytes.get(pc + 1)?)), pc + 2),
        OP_CALL_NAMED => (
            I::CallNamed(u16_at(1)?, Context::from_u8(*bytes.get(pc + 3)?)),
            pc + 4,
        ),
        OP_CALL_METHOD => (
            I::CallMethod(u16_at(1)?, Context::from_u8(*bytes.get(pc + 3)?)),
            pc + 4,
        ),
        OP_CALL_METHOD_DYN => (I::CallMethodDyn(Context::from_u8(*bytes.get(pc + 1)?)), pc + 2),
        OP_RETURN => (I::Return, pc + 1),
        OP_MAKE_MARKER => (
            I::MakeMarker(marker_code_from_u8(*bytes.get(pc + 1)?)?, u16_at(2)?),
            pc + 4,
        ),
        OP_MAKE_TAILCALL => (I::MakeTailCall, pc + 1),
        OP_CTL_DISPATCH => (
            I::CtlDispatch {
                label: u16_at(1)?,
                last: u32::from(u16_at(3)?),
                next: u32::from(u16_at(5)?),
                redo: u32::from(u16_at(7)?),
            },
            pc + 9,
        ),
        OP_LOOP_PUSH => (
            I::LoopPush {
                label: u16_at(1)?,
                last: u32::from(u16_at(3)?),
                next: u32::from(u16_at(5)?),
                redo: u32::from(u16_at(7)?),
            },
            pc + 9,
        ),
        OP_LOOP_POP => (I::LoopPop, pc + 1),
        OP_PUSH_HANDLER => (I::PushHandler(u32::from(u16_at(1)?)), pc + 3),
        OP_POP_HANDLER => (I::PopHandler, pc + 1),
        OP_LOCAL_SCALAR => (I::LocalScalar, pc + 1),
        OP_LOCAL_ARRAY => (I::LocalArray, pc + 1),
        OP_LOCAL_HASH => (I::LocalHash, pc + 1),
        OP_LOCAL_MARK => (I::LocalMark, pc + 1),
        OP_LOCAL_RESTORE => (I::LocalRestore, pc + 1),
        OP_REGEX_SNAPSHOT => (I::RegexSnapshot, pc + 1),
        OP_REGEX_RESTORE => (I::RegexRestore, pc + 1),
        OP_MATCH_RE => (
            I::MatchRe {
                rx: u16_at(1)?,
                ctx: Context::from_u8(*bytes.get(pc + 3)?),
                negated: *bytes.get(pc + 4)? != 0,
            },
            pc + 5,
        ),
        OP_MATCH_DYN => (
            I::MatchDyn {
                ctx: Context::from_u8(*bytes.get(pc + 1)?),
                negated: *bytes.get(pc + 2)? != 0,
            },
            pc + 3,
        ),
        OP_SUBST => (I::Subst { rx: u16_at(1)? }, pc + 3),
        OP_SUBST_DYN => (I::SubstDyn, pc + 1),
        OP_TRANS => (I::Trans(u16_at(1)?), pc + 3),
        OP_READ_LINE => (I::ReadLine(u16_at(1)?), pc + 3),
        OP_READ_ALL_LINES => (I::ReadAllLines(u16_at(1)?), pc + 3),
        OP_PRINT => (
            I::Print { stderr: *bytes.get(pc + 1)? != 0, newline: *bytes.get(pc + 2)? != 0 },
            pc + 3,
        ),
        OP_WANTARRAY => (I::Wantarray, pc + 1),
        OP_SIGNAL_CHECK => (I::SignalCheck, pc + 1),
        _ => return None,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_simple() {
        let instrs = vec![
            Instr::PushInt(42),
            Instr::StoreSpill(3),
            Instr::LoadSpill(3),
            Instr::Return,
        ];
        let packed = assemble(&instrs, &[(0, 1)]).unwrap();
        let mut pc = 0;
        let mut decoded = Vec::new();
        while pc < packed.bytes.len() {
            let (instr, next) = decode(&packed.bytes, pc).unwrap();
            decoded.push(instr);
            pc = next;
        }
        assert_eq!(decoded, instrs);
    }

    #[test]
    fn jump_targets_become_byte_offsets() {
        // 0: PushInt(1)   (5 bytes)
        // 1: JumpIfFalse(3)
        // 2: PushUndef
        // 3: Return
        let instrs = vec![
            Instr::PushInt(1),
            Instr::JumpIfFalse(3),
            Instr::PushUndef,
            Instr::Return,
        ];
        let packed = assemble(&instrs, &[]).unwrap();
        let (jump, _) = decode(&packed.bytes, 5).unwrap();
        // Instruction 3 starts at byte 5 + 3 + 1 = 9.
        assert_eq!(jump, Instr::JumpIfFalse(9));
    }

    #[test]
    fn too_large_method_is_rejected() {
        let instrs = vec![Instr::PushInt(7); 14_000];
        let err = assemble(&instrs, &[]).unwrap_err();
        assert!(matches!(err, AssembleError::TooLarge { .. }));
    }

    #[test]
    fn line_tables_follow_offsets() {
        let instrs = vec![Instr::PushUndef, Instr::PushInt(1), Instr::Return];
        let packed = assemble(&instrs, &[(0, 1), (1, 2), (2, 3)]).unwrap();
        assert_eq!(packed.line_at(0), Some(1));
        assert_eq!(packed.line_at(1), Some(2));
        assert_eq!(packed.line_at(6), Some(3));
    }

    #[test]
    fn bad_target_is_rejected() {
        let instrs = vec![Instr::Jump(99)];
        assert!(matches!(
            assemble(&instrs, &[]).unwrap_err(),
            AssembleError::BadTarget { target: 99 }
        ));
    }
}
