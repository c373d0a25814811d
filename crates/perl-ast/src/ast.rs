//! Node and kind definitions.

use perl_position_tracking::SourceLocation;
use perl_token::{RegexFlags, RegexOp};

/// Core AST node.
///
/// Each node carries its semantic content ([`NodeKind`]), the byte span of
/// the source it was parsed from, and the [`Annotations`] the analysis
/// passes attach for the emitter.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    /// The specific type and semantic content of this AST node
    pub kind: NodeKind,
    /// Source position for error reporting
    pub location: SourceLocation,
    /// Emitter-facing analysis results
    pub anns: Annotations,
}

impl Node {
    /// Create a new AST node with empty annotations.
    pub fn new(kind: NodeKind, location: SourceLocation) -> Self {
        Node { kind, location, anns: Annotations::default() }
    }
}

/// Sparse per-node annotation record filled by analysis passes.
///
/// Realizes the emitter-hint side channel as a compact struct: absent
/// annotations cost two bytes, and the emitter reads plain fields instead
/// of probing a map.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Annotations {
    /// Lvalue classification from the assignability pass
    pub lvalue: Option<LvalueKind>,
    /// `my \$x` / `local \@a`: create or restore a reference, not a value
    pub declared_ref: bool,
    /// For blocks: statically contains a match or substitution, so the
    /// emitter brackets it with regex-state snapshot/restore
    pub contains_regex: bool,
}

/// Lvalue classification of an assignable expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LvalueKind {
    /// Assignable as a single scalar slot
    Scalar,
    /// Assignable as a list of slots (list, array, hash, slice)
    List,
}

/// Variable namespace selected by the leading sigil.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sigil {
    /// `$x`
    Scalar,
    /// `@x`
    Array,
    /// `%x`
    Hash,
    /// `&x`
    Code,
    /// `*x`
    Glob,
    /// `$#x` - last index of an array
    ArrayLast,
}

impl Sigil {
    /// The sigil's source character (`$#` renders as two).
    pub fn as_str(self) -> &'static str {
        match self {
            Sigil::Scalar => "$",
            Sigil::Array => "@",
            Sigil::Hash => "%",
            Sigil::Code => "&",
            Sigil::Glob => "*",
            Sigil::ArrayLast => "$#",
        }
    }
}

/// One piece of an interpolated string: literal bytes or an embedded
/// expression already re-parsed into a node.
#[derive(Debug, Clone, PartialEq)]
pub enum StringPiece {
    /// Literal bytes with escapes resolved
    Literal(Vec<u8>),
    /// Interpolated expression
    Interp(Box<Node>),
}

/// Regex-family literal after parsing: pattern and replacement are
/// interpolation streams, flags come from the token layer.
#[derive(Debug, Clone, PartialEq)]
pub struct RegexNode {
    /// Which operator produced this literal
    pub op: RegexOp,
    /// Pattern interpolation stream
    pub pattern: Vec<StringPiece>,
    /// Replacement (`s///`) or search list (`tr///`)
    pub replacement: Option<Vec<StringPiece>>,
    /// Flag set, including `preserves_match`
    pub flags: RegexFlags,
}

/// Binary operators with eager operand evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
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
    /// `.`
    Concat,
    /// `x`
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

/// Short-circuit (and `xor`) logical operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    /// `&&` / `and`
    And,
    /// `||` / `or`
    Or,
    /// `//`
    DefinedOr,
    /// `xor` (eager)
    Xor,
}

/// Compound-assignment operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOp {
    /// Eager arithmetic/string compound assignment
    Bin(BinOp),
    /// `&&=`
    And,
    /// `||=`
    Or,
    /// `//=`
    DefinedOr,
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    /// Numeric negation
    Neg,
    /// `!` / `not`
    Not,
    /// `~`
    BitNot,
}

/// Declaration keywords.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeclKind {
    /// Lexical
    My,
    /// Lexical alias to a package global
    Our,
    /// Dynamic save/restore of a global (not a declaration proper)
    Local,
    /// Lexical with once-initialization
    State,
}

impl DeclKind {
    /// Keyword text.
    pub fn as_str(self) -> &'static str {
        match self {
            DeclKind::My => "my",
            DeclKind::Our => "our",
            DeclKind::Local => "local",
            DeclKind::State => "state",
        }
    }
}

/// Loop-control statements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopControlOp {
    /// Exit the loop
    Last,
    /// Start the next iteration (runs `continue`)
    Next,
    /// Restart the current iteration (no condition re-check)
    Redo,
}

impl LoopControlOp {
    /// Keyword text.
    pub fn as_str(self) -> &'static str {
        match self {
            LoopControlOp::Last => "last",
            LoopControlOp::Next => "next",
            LoopControlOp::Redo => "redo",
        }
    }
}

/// Target of a `goto`.
#[derive(Debug, Clone, PartialEq)]
pub enum GotoTarget {
    /// `goto LABEL`
    Label(String),
    /// `goto &sub` - tail call replacing the current frame
    Sub(Box<Node>),
}

/// Method name in a method call.
#[derive(Debug, Clone, PartialEq)]
pub enum MethodName {
    /// `->name`
    Named(String),
    /// `->$name` - resolved at runtime
    Dynamic(Box<Node>),
}

/// Output stream for `print`/`say`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    /// Default/`STDOUT`
    Stdout,
    /// `STDERR`
    Stderr,
}

/// `map` vs `grep`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapOp {
    /// Transform each element
    Map,
    /// Filter elements
    Grep,
}

/// Slice flavors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SliceKind {
    /// `@a[...]` - array slice
    Array,
    /// `@h{...}` - hash value slice
    Hash,
    /// `%h{...}` - hash key/value slice
    KeyValue,
}

/// The semantic content of an AST node.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    // ===== Structure =====
    /// Whole compilation unit
    Program {
        /// Top-level statements
        statements: Vec<Node>,
    },
    /// `{ ... }` attached to a construct (not a bare block statement)
    Block {
        /// Statements in order
        statements: Vec<Node>,
    },
    /// Expression used as a statement
    ExpressionStatement {
        /// The expression
        expression: Box<Node>,
    },

    // ===== Literals and simple terms =====
    /// Integer literal
    IntLiteral {
        /// Value
        value: i64,
    },
    /// Float literal
    FloatLiteral {
        /// Value
        value: f64,
    },
    /// String literal (single- or double-quoted flavor)
    StringLiteral {
        /// Interpolation stream
        pieces: Vec<StringPiece>,
        /// Whether the source flavor interpolates
        interpolates: bool,
    },
    /// `qw(...)`
    QwList {
        /// The words
        words: Vec<String>,
    },
    /// `undef`
    UndefLiteral,
    /// `wantarray`
    Wantarray,
    /// A variable with an identifier name
    Variable {
        /// Namespace sigil
        sigil: Sigil,
        /// Name without sigil, possibly package-qualified
        name: String,
    },
    /// Block dereference `${EXPR}`, `@{EXPR}`, `%{EXPR}`, `&{EXPR}`,
    /// `$#{EXPR}`, and the tight forms `$$x`, `@$x`, ...
    Deref {
        /// Namespace being produced
        sigil: Sigil,
        /// Expression yielding the reference
        expr: Box<Node>,
    },
    /// Bareword used as a value (class name, autoquoted key)
    Bareword {
        /// The word
        word: String,
    },
    /// `<FH>`, `<$fh>`, `<>`
    Readline {
        /// Handle text between the angles (may be empty)
        handle: String,
    },
    /// Bare regex or `qr//` as an expression
    RegexLiteral {
        /// The literal
        regex: RegexNode,
    },

    // ===== Aggregate access =====
    /// `$a[i]`, `$r->[i]`, `${EXPR}[i]`
    ArrayElem {
        /// Expression designating the array
        array: Box<Node>,
        /// Index expression
        index: Box<Node>,
    },
    /// `$h{k}`, `$r->{k}`, `${EXPR}{k}`
    HashElem {
        /// Expression designating the hash
        hash: Box<Node>,
        /// Key expression
        key: Box<Node>,
    },
    /// `@a[...]`, `@h{...}`, `%h{...}`
    Slice {
        /// Flavor
        kind: SliceKind,
        /// Expression designating the aggregate
        base: Box<Node>,
        /// Index/key list
        index: Box<Node>,
    },
    /// Parenthesized list
    List {
        /// Elements
        elements: Vec<Node>,
    },
    /// `[ ... ]`
    AnonArray {
        /// Elements
        elements: Vec<Node>,
    },
    /// `{ ... }` hash constructor
    AnonHash {
        /// Flattened key/value list
        elements: Vec<Node>,
    },
    /// `sub { ... }` as an expression
    AnonSub {
        /// Prototype, if written
        proto: Option<String>,
        /// Body block
        body: Box<Node>,
    },

    // ===== Operators =====
    /// Unary operator application
    Unary {
        /// Operator
        op: UnaryOp,
        /// Operand
        operand: Box<Node>,
    },
    /// `\EXPR`
    RefTake {
        /// Referent expression
        operand: Box<Node>,
    },
    /// Eager binary operator
    Binary {
        /// Operator
        op: BinOp,
        /// Left operand
        lhs: Box<Node>,
        /// Right operand
        rhs: Box<Node>,
    },
    /// Short-circuit logical operator
    Logical {
        /// Operator
        op: LogicalOp,
        /// Left operand
        lhs: Box<Node>,
        /// Right operand
        rhs: Box<Node>,
    },
    /// `=`
    Assign {
        /// Target (lvalue-classified)
        target: Box<Node>,
        /// Value
        value: Box<Node>,
    },
    /// `+=`, `.=`, `||=`, ...
    CompoundAssign {
        /// Operator
        op: AssignOp,
        /// Target (reuses the lvalue classification)
        target: Box<Node>,
        /// Value
        value: Box<Node>,
    },
    /// `++`/`--` in either position
    IncDec {
        /// True for `--`
        dec: bool,
        /// True for postfix
        postfix: bool,
        /// Target
        target: Box<Node>,
    },
    /// `?:`
    Ternary {
        /// Condition
        cond: Box<Node>,
        /// Value when true
        if_true: Box<Node>,
        /// Value when false
        if_false: Box<Node>,
    },
    /// `..` / `...`
    Range {
        /// Start
        from: Box<Node>,
        /// End
        to: Box<Node>,
        /// True for `...`
        exclusive: bool,
    },
    /// `EXPR =~ REGEX` / `EXPR !~ REGEX`
    MatchBind {
        /// Bound expression
        target: Box<Node>,
        /// The regex operand
        regex: Box<Node>,
        /// True for `!~`
        negated: bool,
    },

    // ===== Calls =====
    /// Named function or builtin call (`foo(...)`, `foo LIST`, `&foo(...)`)
    FuncCall {
        /// Function name, possibly package-qualified
        name: String,
        /// Arguments
        args: Vec<Node>,
    },
    /// Calling a code value: `$code->(...)`, `&$code(...)`
    CallCode {
        /// Expression yielding the code
        code: Box<Node>,
        /// Arguments
        args: Vec<Node>,
    },
    /// Method call `EXPR->name(...)`, `EXPR->$name(...)`, `Class->name(...)`
    MethodCall {
        /// Receiver expression (a [`NodeKind::Bareword`] for class methods)
        receiver: Box<Node>,
        /// Method name
        method: MethodName,
        /// Arguments
        args: Vec<Node>,
    },
    /// `print`/`say` with an optional filehandle
    Print {
        /// Output stream
        stream: OutputStream,
        /// Arguments (empty means `$_`)
        args: Vec<Node>,
        /// True for `say`
        say: bool,
    },
    /// `sort` with optional comparator block
    SortCall {
        /// Comparator block, `$a`/`$b` convention
        comparator: Option<Box<Node>>,
        /// Input list
        args: Vec<Node>,
    },
    /// `map`/`grep` with block or expression body
    MapGrep {
        /// Which operation
        op: MapOp,
        /// Per-element body (`$_` convention)
        body: Box<Node>,
        /// Input list
        args: Vec<Node>,
    },

    // ===== Statements =====
    /// `my`/`our`/`local`/`state` with optional initializer
    VarDecl {
        /// Declaration keyword
        kind: DeclKind,
        /// Variable or parenthesized list of variables
        target: Box<Node>,
        /// Initializer
        init: Option<Box<Node>>,
    },
    /// Named subroutine definition
    SubDef {
        /// Name, possibly package-qualified
        name: String,
        /// Prototype, if written
        proto: Option<String>,
        /// Body block
        body: Box<Node>,
    },
    /// `if`/`unless` chain
    If {
        /// True for `unless`
        negated: bool,
        /// Condition
        cond: Box<Node>,
        /// Then block
        then_block: Box<Node>,
        /// `elsif` clauses in order
        elsifs: Vec<(Node, Node)>,
        /// `else` block
        else_block: Option<Box<Node>>,
    },
    /// `while`/`until` loop
    While {
        /// Loop label
        label: Option<String>,
        /// True for `until`
        negated: bool,
        /// Condition
        cond: Box<Node>,
        /// Body block
        body: Box<Node>,
        /// `continue { ... }` block
        continue_block: Option<Box<Node>>,
    },
    /// C-style `for (init; cond; update)`
    ForC {
        /// Loop label
        label: Option<String>,
        /// Initializer statement
        init: Option<Box<Node>>,
        /// Condition (absent means true)
        cond: Option<Box<Node>>,
        /// Update expression
        update: Option<Box<Node>>,
        /// Body block
        body: Box<Node>,
    },
    /// `foreach` loop
    Foreach {
        /// Loop label
        label: Option<String>,
        /// Loop variable (absent means `$_`)
        var: Option<Box<Node>>,
        /// True when the loop variable is declared with `my`
        declare: bool,
        /// The iterated list
        list: Box<Node>,
        /// Body block
        body: Box<Node>,
    },
    /// Bare block statement (a loop that runs once)
    BareBlock {
        /// Label
        label: Option<String>,
        /// Body block
        body: Box<Node>,
    },
    /// `return`
    Return {
        /// Returned expression
        value: Option<Box<Node>>,
    },
    /// `last`/`next`/`redo`
    LoopControl {
        /// Which
        op: LoopControlOp,
        /// Optional label
        label: Option<String>,
    },
    /// `goto`
    GotoStmt {
        /// Label or `&sub` tail call
        target: GotoTarget,
    },
    /// `package NAME;`
    PackageDecl {
        /// Package name
        name: String,
    },
    /// `use`/`no`
    UseDecl {
        /// True for `no`
        is_no: bool,
        /// Module or pragma name
        module: String,
        /// Import arguments as written
        args: Vec<String>,
    },
    /// `eval { ... }`
    EvalBlock {
        /// Guarded block
        body: Box<Node>,
    },
    /// `eval EXPR`
    EvalString {
        /// Source expression
        expr: Box<Node>,
    },
    /// `do { ... }`
    DoBlock {
        /// Body block
        body: Box<Node>,
    },
}

impl Node {
    /// Convert the AST to an S-expression.
    ///
    /// Structural only: spans and annotations are omitted, so two parses of
    /// equivalent source compare equal. Used by `--parse` and the
    /// round-trip tests.
    pub fn to_sexp(&self) -> String {
        match &self.kind {
            NodeKind::Program { statements } => sexp_list("program", statements),
            NodeKind::Block { statements } => sexp_list("block", statements),
            NodeKind::ExpressionStatement { expression } => {
                format!("(expr_stmt {})", expression.to_sexp())
            }
            NodeKind::IntLiteral { value } => format!("(int {value})"),
            NodeKind::FloatLiteral { value } => format!("(float {value})"),
            NodeKind::StringLiteral { pieces, .. } => {
                let inner = pieces
                    .iter()
                    .map(|p| match p {
                        StringPiece::Literal(bytes) => {
                            format!("(lit {:?})", String::from_utf8_lossy(bytes))
                        }
                        StringPiece::Interp(node) => node.to_sexp(),
                    })
                    .collect::<Vec<_>>()
                    .join(" ");
                format!("(string {inner})")
            }
            NodeKind::QwList { words } => format!("(qw {})", words.join(" ")),
            NodeKind::UndefLiteral => "(undef)".to_string(),
            NodeKind::Wantarray => "(wantarray)".to_string(),
            NodeKind::Variable { sigil, name } => {
                format!("(variable {} {})", sigil.as_str(), name)
            }
            NodeKind::Deref { sigil, expr } => {
                format!("(deref {} {})", sigil.as_str(), expr.to_sexp())
            }
            NodeKind::Bareword { word } => format!("(bareword {word})"),
            NodeKind::Readline { handle } => format!("(readline <{handle}>)"),
            NodeKind::RegexLiteral { regex } => regex_sexp(regex),
            NodeKind::ArrayElem { array, index } => {
                format!("(array_elem {} {})", array.to_sexp(), index.to_sexp())
            }
            NodeKind::HashElem { hash, key } => {
                format!("(hash_elem {} {})", hash.to_sexp(), key.to_sexp())
            }
            NodeKind::Slice { kind, base, index } => {
                let tag = match kind {
                    SliceKind::Array => "array_slice",
                    SliceKind::Hash => "hash_slice",
                    SliceKind::KeyValue => "kv_slice",
                };
                format!("({tag} {} {})", base.to_sexp(), index.to_sexp())
            }
            NodeKind::List { elements } => sexp_list("list", elements),
            NodeKind::AnonArray { elements } => sexp_list("anon_array", elements),
            NodeKind::AnonHash { elements } => sexp_list("anon_hash", elements),
            NodeKind::AnonSub { body, .. } => format!("(anon_sub {})", body.to_sexp()),
            NodeKind::Unary { op, operand } => {
                let tag = match op {
                    UnaryOp::Neg => "neg",
                    UnaryOp::Not => "not",
                    UnaryOp::BitNot => "bitnot",
                };
                format!("({tag} {})", operand.to_sexp())
            }
            NodeKind::RefTake { operand } => format!("(ref {})", operand.to_sexp()),
            NodeKind::Binary { op, lhs, rhs } => {
                format!("({} {} {})", binop_tag(*op), lhs.to_sexp(), rhs.to_sexp())
            }
            NodeKind::Logical { op, lhs, rhs } => {
                let tag = match op {
                    LogicalOp::And => "and",
                    LogicalOp::Or => "or",
                    LogicalOp::DefinedOr => "dor",
                    LogicalOp::Xor => "xor",
                };
                format!("({tag} {} {})", lhs.to_sexp(), rhs.to_sexp())
            }
            NodeKind::Assign { target, value } => {
                format!("(assign {} {})", target.to_sexp(), value.to_sexp())
            }
            NodeKind::CompoundAssign { op, target, value } => {
                let tag = match op {
                    AssignOp::Bin(b) => binop_tag(*b),
                    AssignOp::And => "and",
                    AssignOp::Or => "or",
                    AssignOp::DefinedOr => "dor",
                };
                format!("(assign_{tag} {} {})", target.to_sexp(), value.to_sexp())
            }
            NodeKind::IncDec { dec, postfix, target } => {
                let tag = match (dec, postfix) {
                    (false, false) => "preinc",
                    (false, true) => "postinc",
                    (true, false) => "predec",
                    (true, true) => "postdec",
                };
                format!("({tag} {})", target.to_sexp())
            }
            NodeKind::Ternary { cond, if_true, if_false } => {
                format!("(ternary {} {} {})", cond.to_sexp(), if_true.to_sexp(), if_false.to_sexp())
            }
            NodeKind::Range { from, to, exclusive } => {
                let tag = if *exclusive { "xrange" } else { "range" };
                format!("({tag} {} {})", from.to_sexp(), to.to_sexp())
            }
            NodeKind::MatchBind { target, regex, negated } => {
                let tag = if *negated { "not_match" } else { "match" };
                format!("({tag} {} {})", target.to_sexp(), regex.to_sexp())
            }
            NodeKind::FuncCall { name, args } => {
                if args.is_empty() {
                    format!("(call {name})")
                } else {
                    format!("(call {name} {})", sexp_args(args))
                }
            }
            NodeKind::CallCode { code, args } => {
                format!("(call_code {} {})", code.to_sexp(), sexp_args(args))
            }
            NodeKind::MethodCall { receiver, method, args } => {
                let m = match method {
                    MethodName::Named(n) => n.clone(),
                    MethodName::Dynamic(e) => e.to_sexp(),
                };
                format!("(method_call {} {} {})", receiver.to_sexp(), m, sexp_args(args))
            }
            NodeKind::Print { stream, args, say } => {
                let tag = if *say { "say" } else { "print" };
                let fh = match stream {
                    OutputStream::Stdout => "",
                    OutputStream::Stderr => " STDERR",
                };
                format!("({tag}{fh} {})", sexp_args(args))
            }
            NodeKind::SortCall { comparator, args } => match comparator {
                Some(cmp) => format!("(sort {} {})", cmp.to_sexp(), sexp_args(args)),
                None => format!("(sort {})", sexp_args(args)),
            },
            NodeKind::MapGrep { op, body, args } => {
                let tag = match op {
                    MapOp::Map => "map",
                    MapOp::Grep => "grep",
                };
                format!("({tag} {} {})", body.to_sexp(), sexp_args(args))
            }
            NodeKind::VarDecl { kind, target, init } => match init {
                Some(init) => {
                    format!("({} {} {})", kind.as_str(), target.to_sexp(), init.to_sexp())
                }
                None => format!("({} {})", kind.as_str(), target.to_sexp()),
            },
            NodeKind::SubDef { name, body, .. } => {
                format!("(sub {name} {})", body.to_sexp())
            }
            NodeKind::If { negated, cond, then_block, elsifs, else_block } => {
                let tag = if *negated { "unless" } else { "if" };
                let mut out = format!("({tag} {} {}", cond.to_sexp(), then_block.to_sexp());
                for (c, b) in elsifs {
                    out.push_str(&format!(" (elsif {} {})", c.to_sexp(), b.to_sexp()));
                }
                if let Some(e) = else_block {
                    out.push_str(&format!(" (else {})", e.to_sexp()));
                }
                out.push(')');
                out
            }
            NodeKind::While { label, negated, cond, body, continue_block } => {
                let tag = if *negated { "until" } else { "while" };
                let mut out = format!("({tag}{}", label_sexp(label));
                out.push_str(&format!(" {} {}", cond.to_sexp(), body.to_sexp()));
                if let Some(c) = continue_block {
                    out.push_str(&format!(" (continue {})", c.to_sexp()));
                }
                out.push(')');
                out
            }
            NodeKind::ForC { label, init, cond, update, body } => {
                let part = |n: &Option<Box<Node>>| match n {
                    Some(n) => n.to_sexp(),
                    None => "()".to_string(),
                };
                format!(
                    "(for{} {} {} {} {})",
                    label_sexp(label),
                    part(init),
                    part(cond),
                    part(update),
                    body.to_sexp()
                )
            }
            NodeKind::Foreach { label, var, declare, list, body } => {
                let v = match var {
                    Some(v) if *declare => format!("(my {})", v.to_sexp()),
                    Some(v) => v.to_sexp(),
                    None => "($_)".to_string(),
                };
                format!(
                    "(foreach{} {} {} {})",
                    label_sexp(label),
                    v,
                    list.to_sexp(),
                    body.to_sexp()
                )
            }
            NodeKind::BareBlock { label, body } => {
                format!("(bare_block{} {})", label_sexp(label), body.to_sexp())
            }
            NodeKind::Return { value } => match value {
                Some(v) => format!("(return {})", v.to_sexp()),
                None => "(return)".to_string(),
            },
            NodeKind::LoopControl { op, label } => match label {
                Some(l) => format!("({} {l})", op.as_str()),
                None => format!("({})", op.as_str()),
            },
            NodeKind::GotoStmt { target } => match target {
                GotoTarget::Label(l) => format!("(goto {l})"),
                GotoTarget::Sub(s) => format!("(goto_sub {})", s.to_sexp()),
            },
            NodeKind::PackageDecl { name } => format!("(package {name})"),
            NodeKind::UseDecl { is_no, module, args } => {
                let tag = if *is_no { "no" } else { "use" };
                if args.is_empty() {
                    format!("({tag} {module})")
                } else {
                    format!("({tag} {module} {})", args.join(" "))
                }
            }
            NodeKind::EvalBlock { body } => format!("(eval_block {})", body.to_sexp()),
            NodeKind::EvalString { expr } => format!("(eval_string {})", expr.to_sexp()),
            NodeKind::DoBlock { body } => format!("(do_block {})", body.to_sexp()),
        }
    }
}

fn sexp_list(tag: &str, nodes: &[Node]) -> String {
    if nodes.is_empty() {
        return format!("({tag})");
    }
    format!("({tag} {})", sexp_args(nodes))
}

fn sexp_args(nodes: &[Node]) -> String {
    nodes.iter().map(Node::to_sexp).collect::<Vec<_>>().join(" ")
}

fn label_sexp(label: &Option<String>) -> String {
    match label {
        Some(l) => format!(" :{l}"),
        None => String::new(),
    }
}

fn regex_sexp(regex: &RegexNode) -> String {
    let tag = match regex.op {
        RegexOp::Match => "regex_match",
        RegexOp::Subst => "regex_subst",
        RegexOp::Trans => "regex_trans",
        RegexOp::Quote => "regex_qr",
    };
    let piece = |pieces: &[StringPiece]| {
        pieces
            .iter()
            .map(|p| match p {
                StringPiece::Literal(bytes) => {
                    format!("(lit {:?})", String::from_utf8_lossy(bytes))
                }
                StringPiece::Interp(node) => node.to_sexp(),
            })
            .collect::<Vec<_>>()
            .join(" ")
    };
    match &regex.replacement {
        Some(repl) => format!("({tag} ({}) ({}))", piece(&regex.pattern), piece(repl)),
        None => format!("({tag} ({}))", piece(&regex.pattern)),
    }
}

fn binop_tag(op: BinOp) -> &'static str {
    match op {
        BinOp::Add => "add",
        BinOp::Sub => "sub",
        BinOp::Mul => "mul",
        BinOp::Div => "div",
        BinOp::Mod => "mod",
        BinOp::Pow => "pow",
        BinOp::Concat => "concat",
        BinOp::Repeat => "repeat",
        BinOp::Shl => "shl",
        BinOp::Shr => "shr",
        BinOp::BitAnd => "bitand",
        BinOp::BitOr => "bitor",
        BinOp::BitXor => "bitxor",
        BinOp::NumEq => "num_eq",
        BinOp::NumNe => "num_ne",
        BinOp::NumLt => "num_lt",
        BinOp::NumGt => "num_gt",
        BinOp::NumLe => "num_le",
        BinOp::NumGe => "num_ge",
        BinOp::NumCmp => "num_cmp",
        BinOp::StrEq => "str_eq",
        BinOp::StrNe => "str_ne",
        BinOp::StrLt => "str_lt",
        BinOp::StrGt => "str_gt",
        BinOp::StrLe => "str_le",
        BinOp::StrGe => "str_ge",
        BinOp::StrCmp => "str_cmp",
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

    #[test]
    fn sexp_ignores_spans() {
        let a = Node::new(NodeKind::IntLiteral { value: 1 }, ByteSpan::new(0, 1));
        let b = Node::new(NodeKind::IntLiteral { value: 1 }, ByteSpan::new(10, 11));
        assert_eq!(a.to_sexp(), b.to_sexp());
    }

    #[test]
    fn nested_sexp() {
        let n = node(NodeKind::Binary {
            op: BinOp::Add,
            lhs: Box::new(node(NodeKind::Variable { sigil: Sigil::Scalar, name: "x".into() })),
            rhs: Box::new(node(NodeKind::IntLiteral { value: 2 })),
        });
        assert_eq!(n.to_sexp(), "(add (variable $ x) (int 2))");
    }

    #[test]
    fn annotations_default_empty() {
        let n = node(NodeKind::UndefLiteral);
        assert_eq!(n.anns, Annotations::default());
        assert!(n.anns.lvalue.is_none());
    }
}
