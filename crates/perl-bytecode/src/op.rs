//! Instruction set and pooled specification types.

use perl_token::RegexFlags;

/// Label operand meaning "no label".
pub const NO_LABEL: u16 = u16::MAX;

/// Calling context threaded through every call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Context {
    /// Result discarded
    Void,
    /// One scalar wanted
    Scalar,
    /// A list wanted
    List,
    /// Inherit the calling frame's context at run time
    Runtime,
}

impl Context {
    /// Encoding used by the packed form.
    pub fn to_u8(self) -> u8 {
        match self {
            Context::Void => 0,
            Context::Scalar => 1,
            Context::List => 2,
            Context::Runtime => 3,
        }
    }

    /// Inverse of [`Context::to_u8`]; out-of-range decodes as `Void`.
    pub fn from_u8(v: u8) -> Self {
        match v {
            1 => Context::Scalar,
            2 => Context::List,
            3 => Context::Runtime,
            _ => Context::Void,
        }
    }
}

/// What a pad slot holds, for prologue pre-allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotKind {
    /// Fresh scalar handle
    Scalar,
    /// Fresh array handle
    Array,
    /// Fresh hash handle
    Hash,
    /// Spill slot: starts empty, holds any operand
    Spill,
}

/// Pooled constant.
#[derive(Debug, Clone, PartialEq)]
pub enum Const {
    /// `undef`
    Undef,
    /// Integer
    Int(i64),
    /// Double
    Num(f64),
    /// Byte string
    Str(Vec<u8>),
}

/// Pooled constant regex: source pattern (fully literal after lexing) and
/// its flags. Interpolated patterns go through the dynamic match
/// instructions instead.
#[derive(Debug, Clone, PartialEq)]
pub struct RegexSpec {
    /// Pattern source in the Perl dialect
    pub source: String,
    /// Flag set (including `preserves_match`)
    pub flags: RegexFlags,
}

/// Pooled transliteration tables for `tr///`.
#[derive(Debug, Clone, PartialEq)]
pub struct TransSpec {
    /// Search list with ranges expanded
    pub from: Vec<u8>,
    /// Replacement list with ranges expanded
    pub to: Vec<u8>,
    /// `tr///c`
    pub complement: bool,
    /// `tr///d`
    pub delete: bool,
    /// `tr///r`
    pub non_destructive: bool,
}

/// Eager binary operators on scalars.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinCode {
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `/`
    Div,
    /// `%`
    Mod,
    /// `**`
    Pow,
    /// `+` under `use integer`
    IntAdd,
    /// `-` under `use integer`
    IntSub,
    /// `*` under `use integer`
    IntMul,
    /// `/` under `use integer`
    IntDiv,
    /// `.`
    Concat,
    /// `x` on scalars
    Repeat,
    /// `<<`
    Shl,
    /// `>>`
    Shr,
    /// `&`
    BitAnd,
    /// `|`
    BitOr,
    /// `^`
    BitXor,
    /// `==`
    NumEq,
    /// `!=`
    NumNe,
    /// `<`
    NumLt,
    /// `>`
    NumGt,
    /// `<=`
    NumLe,
    /// `>=`
    NumGe,
    /// `<=>`
    NumCmp,
    /// `eq`
    StrEq,
    /// `ne`
    StrNe,
    /// `lt`
    StrLt,
    /// `gt`
    StrGt,
    /// `le`
    StrLe,
    /// `ge`
    StrGe,
    /// `cmp`
    StrCmp,
}

/// Unary operators on scalars.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnCode {
    /// Numeric negation
    Neg,
    /// Boolean not
    Not,
    /// Bitwise complement
    BitNot,
    /// `defined`
    Defined,
    /// Pre/post increment use dedicated instructions; `++` on magic
    /// strings routes through this stringy increment
    StrInc,
    /// Numeric decrement
    Dec,
}

/// Dereference flavor; `Lv` variants autovivify.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DerefCode {
    /// `${r}` read
    ScalarRv,
    /// `${r}` lvalue
    ScalarLv,
    /// `@{r}` read
    ArrayRv,
    /// `@{r}` lvalue (autovivifies)
    ArrayLv,
    /// `%{r}` read
    HashRv,
    /// `%{r}` lvalue (autovivifies)
    HashLv,
    /// `&{r}`
    Code,
}

/// Slice flavor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SliceCode {
    /// `@a[...]`
    Array,
    /// `@h{...}`
    Hash,
    /// `%h{...}` - key/value pairs
    KeyValue,
}

/// Non-local control-flow marker kinds carried by marked return lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerCode {
    /// `last`
    Last,
    /// `next`
    Next,
    /// `redo`
    Redo,
    /// `goto LABEL` escaping the current method
    Goto,
}

/// One instruction of the listed form.
///
/// Jump operands hold *instruction indices* in the listed form; the packed
/// assembler rewrites them to byte offsets.
#[derive(Debug, Clone, PartialEq)]
pub enum Instr {
    // ===== constants =====
    /// Push undef
    PushUndef,
    /// Push pooled constant
    PushConst(u16),
    /// Push small integer inline
    PushInt(i32),

    // ===== pad =====
    /// Reset a pad slot to a fresh scalar
    NewScalar(u16),
    /// Reset a pad slot to a fresh array
    NewArray(u16),
    /// Reset a pad slot to a fresh hash
    NewHash(u16),
    /// Push the scalar handle in a pad slot
    LoadScalar(u16),
    /// Push the array handle in a pad slot
    LoadArray(u16),
    /// Push the hash handle in a pad slot
    LoadHash(u16),
    /// Pop a scalar handle and alias the pad slot to it
    BindScalar(u16),
    /// Pop an array handle and alias the pad slot to it
    BindArray(u16),
    /// Pop a hash handle and alias the pad slot to it
    BindHash(u16),
    /// Pop any operand into a spill slot
    StoreSpill(u16),
    /// Push the operand saved in a spill slot
    LoadSpill(u16),

    // ===== globals =====
    /// Push the scalar slot of a pooled global name (get-or-create)
    GlobalScalar(u16),
    /// Push the array slot of a pooled global name
    GlobalArray(u16),
    /// Push the hash slot of a pooled global name
    GlobalHash(u16),
    /// Push the code slot of a pooled global name (undef scalar if empty)
    GlobalCode(u16),
    /// Pop a scalar handle and rebind the global's scalar slot to it
    GlobBindScalar(u16),

    // ===== operators =====
    /// Pop two scalars, push the result
    Binary(BinCode),
    /// Pop one scalar, push the result
    Unary(UnCode),
    /// Pop target handle; increment in place; push old (postfix) value
    PostIncDec {
        /// true for `--`
        dec: bool,
    },
    /// Pop target handle; increment in place; push new (prefix) value
    PreIncDec {
        /// true for `--`
        dec: bool,
    },
    /// Pop n scalars (no flattening), push their concatenation
    BuildString(u16),
    /// Pop an aggregate operand, push its elements joined with `$"`
    JoinInterp,
    /// Pop from..to scalars, push the expanded range as a list
    MakeRange,

    // ===== flow =====
    /// Unconditional jump
    Jump(u32),
    /// Pop a scalar; jump when false
    JumpIfFalse(u32),
    /// Pop a scalar; jump when true
    JumpIfTrue(u32),
    /// Pop a scalar; jump when defined
    JumpIfDefined(u32),
    /// Duplicate the top operand
    Dup,
    /// Drop the top operand
    Pop,

    // ===== lists and aggregates =====
    /// Pop n operands, flatten arrays/hashes/lists, push one list
    MakeList(u16),
    /// Scalar-context conversion of the top operand
    CtxScalar,
    /// Push element i of the popped list (handle, aliasing)
    ListGet(u16),
    /// Pop [list, index-scalar]; push the element handle
    ListGetDyn,
    /// Pop a list; push a detached copy (fresh cells with value copies),
    /// so overlapping list assignments read before they write
    ListCopy,
    /// Pop a list; push its tail starting at i as a list
    ListSliceFrom(u16),
    /// Pop a list; push its length
    ListLen,
    /// Pop [array, index]; push element value or undef
    ArrayGet,
    /// Pop [array, index]; push element handle, extending as needed
    ArrayGetLv,
    /// Pop [hash, key]; push value or undef
    HashGet,
    /// Pop [hash, key]; push entry handle, creating as needed
    HashGetLv,
    /// Pop [hash, key]; push whether the key exists
    HashExists,
    /// Pop [hash, key]; push the removed value
    HashDelete,
    /// Pop an array; push its last index
    ArrayLastIdx,
    /// Pop [base, index-list]; push the slice per flavor
    Slice(SliceCode),
    /// Pop a scalar ref per flavor; push the referent handle
    Deref {
        /// Flavor and lvalue-ness
        code: DerefCode,
        /// Whether symbolic references are allowed (`no strict 'refs'`)
        allow_symbolic: bool,
    },
    /// Pop a handle operand; push a reference scalar to it
    MakeRef,
    /// Pop a list; push a reference to a fresh array holding it
    AnonArray,
    /// Pop a list; push a reference to a fresh hash built from pairs
    AnonHash,
    /// Push a closure over the nested method (pool index)
    MakeClosure(u16),

    // ===== assignment =====
    /// Pop [target-scalar-handle, value]; store; push target
    AssignScalar,
    /// Pop [array-handle, value-list]; replace contents; push array
    AssignArray,
    /// Pop [hash-handle, value-list]; replace contents; push hash
    AssignHash,

    // ===== calls =====
    /// Pop [code-operand, args-array]; push result list
    Call(Context),
    /// Pop [args-array]; resolve pooled name (sub or builtin); push list
    CallNamed(u16, Context),
    /// Pop [receiver, args-array]; dispatch pooled method name; push list
    CallMethod(u16, Context),
    /// Pop [receiver, name-scalar, args-array]; dispatch; push list
    CallMethodDyn(Context),
    /// Pop the result list; leave the frame via the return join
    Return,
    /// Pop a list; push it marked with a control-flow intent
    MakeMarker(MarkerCode, u16),
    /// Pop [code, args-array]; push a tail-call marked list
    MakeTailCall,
    /// Branch on the interpreter's pending loop-control marker
    CtlDispatch {
        /// Pooled label name this loop answers to (`NO_LABEL` = unlabeled)
        label: u16,
        /// Jump target for a consumed `last`
        last: u32,
        /// Jump target for a consumed `next`
        next: u32,
        /// Jump target for a consumed `redo`
        redo: u32,
    },
    /// Register this loop in the frame's control-flow registry so markers
    /// thrown by nested calls can be routed mid-statement
    LoopPush {
        /// Pooled label name (`NO_LABEL` = unlabeled)
        label: u16,
        /// Exit target
        last: u32,
        /// Continue target
        next: u32,
        /// Restart target
        redo: u32,
    },
    /// Unregister the innermost loop
    LoopPop,

    // ===== eval =====
    /// Install a catch handler jumping to the target on `die`
    PushHandler(u32),
    /// Remove the innermost catch handler
    PopHandler,

    // ===== dynamic scope and regex state =====
    /// Pop a scalar handle; push its value on the local stack and clear it
    LocalScalar,
    /// Pop an array handle; save and clear
    LocalArray,
    /// Pop a hash handle; save and clear
    LocalHash,
    /// Push the current local-stack level as an integer
    LocalMark,
    /// Pop a level integer; restore every save above it
    LocalRestore,
    /// Push a regex capture-state snapshot
    RegexSnapshot,
    /// Restore the top regex capture-state snapshot
    RegexRestore,

    // ===== regex =====
    /// Pop the target scalar; match pooled regex; push result per context
    MatchRe {
        /// Regex pool index
        rx: u16,
        /// Result context
        ctx: Context,
        /// `!~`
        negated: bool,
    },
    /// Pop [target, pattern-scalar]; compile and match
    MatchDyn {
        /// Result context
        ctx: Context,
        /// `!~`
        negated: bool,
    },
    /// Pop [target-handle, replacement-code]; substitute; push count
    Subst {
        /// Regex pool index
        rx: u16,
    },
    /// Pop [target-handle, pattern-scalar, replacement-code]
    SubstDyn,
    /// Pop the target handle; transliterate; push count
    Trans(u16),

    // ===== IO =====
    /// Push one input record from the pooled handle name ("" = ARGV)
    ReadLine(u16),
    /// Push all remaining records as a list
    ReadAllLines(u16),
    /// Pop a list; write it; push 1
    Print {
        /// STDERR instead of STDOUT
        stderr: bool,
        /// Append `$\`-independent newline (`say`)
        newline: bool,
    },

    // ===== misc =====
    /// Push the current frame's wantarray value
    Wantarray,
    /// Cooperative signal check; raises a pending die
    SignalCheck,
}

impl Instr {
    /// (pops, pushes) on the operand stack.
    pub fn stack_effect(&self) -> (usize, usize) {
        use Instr as I;
        match self {
            I::PushUndef
            | I::PushConst(_)
            | I::PushInt(_)
            | I::LoadScalar(_)
            | I::LoadArray(_)
            | I::LoadHash(_)
            | I::LoadSpill(_)
            | I::GlobalScalar(_)
            | I::GlobalArray(_)
            | I::GlobalHash(_)
            | I::GlobalCode(_)
            | I::MakeClosure(_)
            | I::LocalMark
            | I::Wantarray
            | I::ReadLine(_)
            | I::ReadAllLines(_) => (0, 1),

            I::NewScalar(_)
            | I::NewArray(_)
            | I::NewHash(_)
            | I::Jump(_)
            | I::PushHandler(_)
            | I::PopHandler
            | I::RegexSnapshot
            | I::RegexRestore
            | I::SignalCheck
            | I::CtlDispatch { .. }
            | I::LoopPush { .. }
            | I::LoopPop => (0, 0),

            I::BindScalar(_)
            | I::BindArray(_)
            | I::BindHash(_)
            | I::StoreSpill(_)
            | I::GlobBindScalar(_)
            | I::Pop
            | I::JumpIfFalse(_)
            | I::JumpIfTrue(_)
            | I::JumpIfDefined(_)
            | I::Return
            | I::LocalScalar
            | I::LocalArray
            | I::LocalHash
            | I::LocalRestore => (1, 0),

            I::Binary(_) => (2, 1),
            I::Unary(_)
            | I::PostIncDec { .. }
            | I::PreIncDec { .. }
            | I::JoinInterp
            | I::CtxScalar
            | I::ListCopy
            | I::ListGet(_)
            | I::ListSliceFrom(_)
            | I::ListLen
            | I::ArrayLastIdx
            | I::MakeRef
            | I::AnonArray
            | I::AnonHash
            | I::Deref { .. }
            | I::Trans(_)
            | I::Print { .. }
            | I::CallNamed(..)
            | I::MakeMarker(..) => (1, 1),

            I::Dup => (1, 2),

            I::BuildString(n) | I::MakeList(n) => (*n as usize, 1),
            I::MakeRange => (2, 1),

            I::ListGetDyn
            | I::ArrayGet
            | I::ArrayGetLv
            | I::HashGet
            | I::HashGetLv
            | I::HashExists
            | I::HashDelete
            | I::Slice(_)
            | I::AssignScalar
            | I::AssignArray
            | I::AssignHash
            | I::Call(_)
            | I::CallMethod(..)
            | I::MakeTailCall
            | I::Subst { .. } => (2, 1),

            I::CallMethodDyn(_) | I::SubstDyn => (3, 1),

            I::MatchRe { .. } => (1, 1),
            I::MatchDyn { .. } => (2, 1),
        }
    }

    /// Jump-target operands, for the verifier and the assembler.
    pub fn targets(&self) -> Vec<u32> {
        use Instr as I;
        match self {
            I::Jump(t) | I::JumpIfFalse(t) | I::JumpIfTrue(t) | I::JumpIfDefined(t)
            | I::PushHandler(t) => vec![*t],
            I::CtlDispatch { last, next, redo, .. }
            | I::LoopPush { last, next, redo, .. } => vec![*last, *next, *redo],
            _ => vec![],
        }
    }

    /// Rewrites jump-target operands through `f` (listed index → packed
    /// byte offset).
    pub fn map_targets(&mut self, mut f: impl FnMut(u32) -> u32) {
        use Instr as I;
        match self {
            I::Jump(t) | I::JumpIfFalse(t) | I::JumpIfTrue(t) | I::JumpIfDefined(t)
            | I::PushHandler(t) => *t = f(*t),
            I::CtlDispatch { last, next, redo, .. }
            | I::LoopPush { last, next, redo, .. } => {
                *last = f(*last);
                *next = f(*next);
                *redo = f(*redo);
            }
            _ => {}
        }
    }

    /// Whether control never falls through to the next instruction.
    pub fn is_terminator(&self) -> bool {
        matches!(self, Instr::Jump(_) | Instr::Return)
    }
}
