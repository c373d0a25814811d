//! Interpreter-owned global state.
//!
//! Everything process-global in Perl lives behind an [`Interp`] handle
//! passed explicitly through the execution engine: the named-symbol table,
//! the dynamic-variable stack, the regex capture-state stack, the pending
//! loop-control marker, and the I/O endpoints. Two interpreters never
//! share state, which keeps the core re-entrant without thread-local
//! storage.

use crate::code::RuntimeCode;
use crate::error::{RuntimeError, RuntimeResult};
use crate::handles::{ArrayHandle, HashHandle, ScalarHandle};
use crate::hash::PerlHash;
use crate::list::Marker;
use crate::scalar::Scalar;
use indexmap::IndexMap;
use std::cell::RefCell;
use std::collections::HashMap;
use std::collections::VecDeque;
use std::io::Write;
use std::rc::Rc;

/// One named symbol: five parallel slots (scalar, array, hash, code, io),
/// created lazily per Perl's typeglob semantics.
#[derive(Debug, Default)]
pub struct Glob {
    /// Fully qualified name
    pub name: String,
    scalar: RefCell<Option<ScalarHandle>>,
    array: RefCell<Option<ArrayHandle>>,
    hash: RefCell<Option<HashHandle>>,
    code: RefCell<Option<Rc<RuntimeCode>>>,
}

impl Glob {
    fn named(name: &str) -> Self {
        Glob { name: name.to_string(), ..Glob::default() }
    }

    /// The scalar slot, created on first use.
    pub fn scalar_handle(&self) -> ScalarHandle {
        self.scalar
            .borrow_mut()
            .get_or_insert_with(ScalarHandle::undef)
            .clone()
    }

    /// Rebinds the scalar slot to an existing cell (`foreach` aliasing of
    /// a global loop variable). Returns the previous cell.
    pub fn bind_scalar(&self, cell: ScalarHandle) -> ScalarHandle {
        self.scalar
            .borrow_mut()
            .replace(cell)
            .unwrap_or_else(ScalarHandle::undef)
    }

    /// Rebinds the array slot (the `@_` swap at call boundaries).
    /// Returns the previous array.
    pub fn bind_array(&self, array: ArrayHandle) -> ArrayHandle {
        self.array
            .borrow_mut()
            .replace(array)
            .unwrap_or_default()
    }

    /// The array slot, created on first use.
    pub fn array_handle(&self) -> ArrayHandle {
        self.array
            .borrow_mut()
            .get_or_insert_with(ArrayHandle::new)
            .clone()
    }

    /// The hash slot, created on first use.
    pub fn hash_handle(&self) -> HashHandle {
        self.hash
            .borrow_mut()
            .get_or_insert_with(HashHandle::new)
            .clone()
    }

    /// The code slot, when defined.
    pub fn code(&self) -> Option<Rc<RuntimeCode>> {
        self.code.borrow().clone()
    }

    /// Installs a sub into the code slot.
    pub fn set_code(&self, code: Rc<RuntimeCode>) {
        *self.code.borrow_mut() = Some(code);
    }
}

/// Process-wide named-symbol table keyed by normalized qualified names.
#[derive(Debug, Default)]
pub struct SymbolTable {
    globs: HashMap<String, Rc<Glob>>,
}

impl SymbolTable {
    /// Get-or-create the glob for a fully qualified name.
    pub fn glob(&mut self, name: &str) -> Rc<Glob> {
        self.globs
            .entry(name.to_string())
            .or_insert_with(|| Rc::new(Glob::named(name)))
            .clone()
    }

    /// Looks up an existing glob without creating one.
    pub fn lookup(&self, name: &str) -> Option<Rc<Glob>> {
        self.globs.get(name).cloned()
    }
}

/// One saved entry on the dynamic-variable stack.
#[derive(Debug)]
enum Saved {
    Scalar(ScalarHandle, Scalar),
    Array(ArrayHandle, VecDeque<ScalarHandle>),
    Hash(HashHandle, IndexMap<Vec<u8>, ScalarHandle>),
}

/// The `local` stack: push saves, `pop_to` restores in reverse order.
#[derive(Debug, Default)]
pub struct LocalStack {
    saves: Vec<Saved>,
}

impl LocalStack {
    /// Current level, for later `pop_to`.
    pub fn mark(&self) -> usize {
        self.saves.len()
    }

    /// Saves a scalar cell's value and clears it to undef.
    pub fn push_scalar(&mut self, cell: ScalarHandle) {
        let saved = cell.value();
        cell.set(Scalar::Undef);
        self.saves.push(Saved::Scalar(cell, saved));
    }

    /// Saves an array's contents and clears it.
    pub fn push_array(&mut self, array: ArrayHandle) {
        let saved = std::mem::take(&mut array.borrow_mut().elems);
        self.saves.push(Saved::Array(array, saved));
    }

    /// Saves a hash's contents and clears it.
    pub fn push_hash(&mut self, hash: HashHandle) {
        let saved = std::mem::take(&mut hash.borrow_mut().map);
        self.saves.push(Saved::Hash(hash, saved));
    }

    /// Restores every save above `level`, strictly LIFO.
    pub fn pop_to(&mut self, level: usize) {
        while self.saves.len() > level {
            match self.saves.pop() {
                Some(Saved::Scalar(cell, value)) => cell.set(value),
                Some(Saved::Array(array, elems)) => array.borrow_mut().elems = elems,
                Some(Saved::Hash(hash, map)) => hash.borrow_mut().map = map,
                None => break,
            }
        }
    }
}

/// Regex capture state: the per-match capture vector and its derived
/// views (`$1..$n`, `$&`, `` $` ``, `$'`, `%+`, `@-`, `@+`).
#[derive(Debug, Clone, Default)]
pub struct RegexState {
    /// Capture group texts, index 0 unused
    pub captures: Vec<Option<Vec<u8>>>,
    /// Named captures (`%+`)
    pub named: IndexMap<String, Vec<u8>>,
    /// `$&`
    pub matched: Option<Vec<u8>>,
    /// `` $` ``
    pub prematch: Option<Vec<u8>>,
    /// `$'`
    pub postmatch: Option<Vec<u8>>,
    /// `@-`: group start offsets
    pub starts: Vec<Option<usize>>,
    /// `@+`: group end offsets
    pub ends: Vec<Option<usize>>,
}

impl RegexState {
    /// `$1`-family read; group 0 is `$&`.
    pub fn capture(&self, index: usize) -> Scalar {
        if index == 0 {
            return self
                .matched
                .clone()
                .map(Scalar::from_bytes)
                .unwrap_or(Scalar::Undef);
        }
        self.captures
            .get(index)
            .and_then(|c| c.clone())
            .map(Scalar::from_bytes)
            .unwrap_or(Scalar::Undef)
    }
}

/// Snapshot stack for block-scoped capture state.
#[derive(Debug, Default)]
pub struct RegexStack {
    /// Live state
    pub current: RegexState,
    snapshots: Vec<RegexState>,
}

impl RegexStack {
    /// Pushes a snapshot of the current state (block entry).
    pub fn push_snapshot(&mut self) {
        self.snapshots.push(self.current.clone());
    }

    /// Restores the top snapshot (block exit).
    pub fn restore_top(&mut self) {
        if let Some(state) = self.snapshots.pop() {
            self.current = state;
        }
    }

    /// Snapshot depth, used by eval unwinding.
    pub fn depth(&self) -> usize {
        self.snapshots.len()
    }

    /// Pops snapshots down to a recorded depth without restoring (the
    /// handler then restores once).
    pub fn unwind_to(&mut self, depth: usize) {
        while self.snapshots.len() > depth {
            self.restore_top();
        }
    }
}

/// Hook through which `eval STRING` re-enters the compiler. Installed by
/// the driver crate to avoid a dependency cycle.
pub type EvalHook = Rc<dyn Fn(&str) -> Result<Rc<RuntimeCode>, String>>;

/// ARGV input state for `<>`.
#[derive(Default)]
pub struct InputState {
    /// Remaining files; `None` until the first read snapshots `@ARGV`
    pub files: Option<VecDeque<String>>,
    /// Current reader
    pub reader: Option<Box<dyn std::io::BufRead>>,
    /// Whether input is exhausted
    pub done: bool,
}

impl std::fmt::Debug for InputState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InputState").field("done", &self.done).finish()
    }
}

/// The interpreter instance: owner of all runtime-global state.
pub struct Interp {
    /// Named-symbol table
    pub symbols: SymbolTable,
    /// Dynamic-variable (`local`) stack
    pub locals: LocalStack,
    /// Regex capture-state stack
    pub regex: RegexStack,
    /// Control-flow registry: marker thrown by a call, awaiting a loop
    pub pending_ctl: Option<Marker>,
    /// Cooperative die flag set by signal handlers
    pub die_signal: Option<Scalar>,
    /// `eval STRING` compiler hook
    pub eval_hook: Option<EvalHook>,
    /// Standard output
    pub out: Box<dyn Write>,
    /// Standard error
    pub err: Box<dyn Write>,
    /// `<>` input state
    pub input: InputState,
    /// Live call depth
    pub depth: usize,
    /// Call depth limit (`StackOverflow` beyond it)
    pub max_depth: usize,
}

impl Default for Interp {
    fn default() -> Self {
        Self::new()
    }
}

impl Interp {
    /// A fresh interpreter writing to the process stdout/stderr, with the
    /// documented special-variable defaults seeded.
    pub fn new() -> Self {
        Self::with_output(Box::new(std::io::stdout()), Box::new(std::io::stderr()))
    }

    /// A fresh interpreter with custom output endpoints (tests capture
    /// output this way).
    pub fn with_output(out: Box<dyn Write>, err: Box<dyn Write>) -> Self {
        let mut interp = Interp {
            symbols: SymbolTable::default(),
            locals: LocalStack::default(),
            regex: RegexStack::default(),
            pending_ctl: None,
            die_signal: None,
            eval_hook: None,
            out,
            err,
            input: InputState::default(),
            depth: 0,
            max_depth: 1000,
        };
        interp.seed_special_variables();
        interp
    }

    /// Seeds `$_`, `$0`, `@ARGV`, `@INC`, `%ENV`, `$@`, `$!`, `$/`, `$\`,
    /// `$,`, `$"`, `$;` with their documented start-up values.
    fn seed_special_variables(&mut self) {
        self.symbols.glob("main::_").scalar_handle();
        self.symbols.glob("main::0").scalar_handle().set(Scalar::from_string("rperl".into()));
        self.symbols.glob("main::ARGV").array_handle();
        self.symbols.glob("main::INC").array_handle();
        self.symbols.glob("main::@").scalar_handle().set(Scalar::from_string(String::new()));
        self.symbols.glob("main::!").scalar_handle();
        self.symbols.glob("main::/").scalar_handle().set(Scalar::from_string("\n".into()));
        self.symbols.glob("main::\\").scalar_handle();
        self.symbols.glob("main::,").scalar_handle();
        self.symbols.glob("main::\"").scalar_handle().set(Scalar::from_string(" ".into()));
        self.symbols
            .glob("main::;")
            .scalar_handle()
            .set(Scalar::from_bytes(vec![0x1C]));
        let env = self.symbols.glob("main::ENV").hash_handle();
        let mut hash = PerlHash::default();
        for (k, v) in std::env::vars_os() {
            hash.elem_lv(k.to_string_lossy().as_bytes())
                .set(Scalar::from_bytes(v.to_string_lossy().into_owned().into_bytes()));
        }
        *env.borrow_mut() = hash;
    }

    /// `$_`'s cell.
    pub fn topic(&mut self) -> ScalarHandle {
        self.symbols.glob("main::_").scalar_handle()
    }

    /// `$@`'s cell.
    pub fn errvar(&mut self) -> ScalarHandle {
        self.symbols.glob("main::@").scalar_handle()
    }

    /// `@ARGV`.
    pub fn argv(&mut self) -> ArrayHandle {
        self.symbols.glob("main::ARGV").array_handle()
    }

    /// Seeds `@ARGV` from the command line.
    pub fn set_argv(&mut self, args: &[String]) {
        let argv = self.argv();
        argv.borrow_mut()
            .assign(args.iter().map(|a| Scalar::from_string(a.clone())));
    }

    /// Value of `$/` for record reading.
    pub fn record_separator(&mut self) -> Scalar {
        self.symbols.glob("main::/").scalar_handle().value()
    }

    /// Cooperative signal check: raises a `die` when the flag was set.
    pub fn check_signals(&mut self) -> RuntimeResult<()> {
        if let Some(payload) = self.die_signal.take() {
            return Err(RuntimeError::Die(payload));
        }
        Ok(())
    }

    /// Enters a call frame; errors past the recursion limit.
    pub fn enter_frame(&mut self) -> RuntimeResult<()> {
        self.depth += 1;
        if self.depth > self.max_depth {
            self.depth -= 1;
            return Err(RuntimeError::StackOverflow);
        }
        Ok(())
    }

    /// Leaves a call frame.
    pub fn leave_frame(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    /// Installs a named sub, creating the glob and the weak back-binding.
    pub fn install_sub(&mut self, qualified: &str, mut code: RuntimeCode) -> Rc<RuntimeCode> {
        let glob = self.symbols.glob(qualified);
        code.name = Some(qualified.to_string());
        code.glob = Some(Rc::downgrade(&glob));
        let rc = Rc::new(code);
        glob.set_code(rc.clone());
        rc
    }

    /// Resolves a method through the package and its `@ISA` chain,
    /// depth-first.
    pub fn resolve_method(&mut self, package: &str, method: &str) -> Option<Rc<RuntimeCode>> {
        let direct = format!("{package}::{method}");
        if let Some(glob) = self.symbols.lookup(&direct) {
            if let Some(code) = glob.code() {
                return Some(code);
            }
        }
        let isa_name = format!("{package}::ISA");
        let parents: Vec<String> = match self.symbols.lookup(&isa_name) {
            Some(glob) => glob
                .array_handle()
                .borrow()
                .values()
                .iter()
                .map(|v| v.display())
                .collect(),
            None => return None,
        };
        for parent in parents {
            if let Some(code) = self.resolve_method(&parent, method) {
                return Some(code);
            }
        }
        None
    }

    /// Blesses a referent into a package; only array and hash referents
    /// carry a blessing in this dialect.
    pub fn bless(&mut self, reference: &Scalar, package: &str) -> RuntimeResult<()> {
        match reference {
            Scalar::Ref(crate::scalar::RefValue::Array(a)) => {
                a.borrow_mut().blessed = Some(package.to_string());
                Ok(())
            }
            Scalar::Ref(crate::scalar::RefValue::Hash(h)) => {
                h.borrow_mut().blessed = Some(package.to_string());
                Ok(())
            }
            Scalar::Ref(_) => Err(RuntimeError::die_str(
                "Can only bless ARRAY or HASH references",
            )),
            _ => Err(RuntimeError::die_str("Can't bless non-reference value")),
        }
    }
}

impl std::fmt::Debug for Interp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Interp")
            .field("depth", &self.depth)
            .field("pending_ctl", &self.pending_ctl)
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::array::PerlArray;

    #[test]
    fn glob_slots_are_parallel() {
        let mut t = SymbolTable::default();
        let g = t.glob("main::x");
        g.scalar_handle().set(Scalar::Int(1));
        g.array_handle().borrow_mut().push_value(Scalar::Int(2));
        assert_eq!(g.scalar_handle().value().int(), 1);
        assert_eq!(g.array_handle().borrow().get(0).int(), 2);
    }

    #[test]
    fn local_stack_is_lifo() {
        let mut stack = LocalStack::default();
        let x = ScalarHandle::new(Scalar::Int(1));
        let y = ScalarHandle::new(Scalar::Int(2));
        let mark = stack.mark();
        stack.push_scalar(x.clone());
        x.set(Scalar::Int(10));
        stack.push_scalar(y.clone());
        y.set(Scalar::Int(20));
        stack.pop_to(mark);
        assert_eq!(x.value().int(), 1);
        assert_eq!(y.value().int(), 2);
    }

    #[test]
    fn nested_marks_restore_partially() {
        let mut stack = LocalStack::default();
        let x = ScalarHandle::new(Scalar::Int(1));
        stack.push_scalar(x.clone());
        x.set(Scalar::Int(10));
        let inner = stack.mark();
        stack.push_scalar(x.clone());
        x.set(Scalar::Int(100));
        stack.pop_to(inner);
        assert_eq!(x.value().int(), 10);
        stack.pop_to(0);
        assert_eq!(x.value().int(), 1);
    }

    #[test]
    fn local_array_saves_contents() {
        let mut stack = LocalStack::default();
        let a = ArrayHandle::from_array(PerlArray::from_values([Scalar::Int(1)]));
        let mark = stack.mark();
        stack.push_array(a.clone());
        assert!(a.borrow().is_empty());
        a.borrow_mut().push_value(Scalar::Int(9));
        stack.pop_to(mark);
        assert_eq!(a.borrow().get(0).int(), 1);
        assert_eq!(a.borrow().len(), 1);
    }

    #[test]
    fn regex_snapshots_nest() {
        let mut rs = RegexStack::default();
        rs.current.matched = Some(b"outer".to_vec());
        rs.push_snapshot();
        rs.current.matched = Some(b"inner".to_vec());
        rs.restore_top();
        assert_eq!(rs.current.matched.as_deref(), Some(&b"outer"[..]));
    }

    #[test]
    fn method_resolution_walks_isa() {
        let mut interp = Interp::new();
        let method = Rc::new(Method {
            name: "Base::hello".into(),
            file: "-".into(),
            slots: vec![],
            captures: vec![],
            consts: vec![],
            names: vec![],
            regexes: vec![],
            trans: vec![],
            subs: vec![],
            lines: vec![],
            body: perl_bytecode::MethodBody::Listed(vec![perl_bytecode::Instr::Return]),
        });
        interp.install_sub(
            "Base::hello",
            RuntimeCode::anon(method, vec![]),
        );
        interp
            .symbols
            .glob("Derived::ISA")
            .array_handle()
            .borrow_mut()
            .push_value(Scalar::from_string("Base".into()));
        assert!(interp.resolve_method("Derived", "hello").is_some());
        assert!(interp.resolve_method("Derived", "missing").is_none());
    }

    use perl_bytecode::Method;

    #[test]
    fn signal_flag_raises_once() {
        let mut interp = Interp::new();
        interp.die_signal = Some(Scalar::from_string("SIGINT\n".into()));
        assert!(interp.check_signals().is_err());
        assert!(interp.check_signals().is_ok());
    }
}
