//! Code values: a compiled method plus its captured environment.

use crate::handles::{ArrayHandle, HashHandle, ScalarHandle};
use crate::interp::Glob;
use crate::list::PerlList;
use crate::value::Value;
use perl_bytecode::Method;
use std::rc::{Rc, Weak};

/// One pad slot of a live frame (and one captured-environment entry).
#[derive(Debug, Clone, Default)]
pub enum PadSlot {
    /// Uninitialized spill slot
    #[default]
    Empty,
    /// A scalar lexical
    Scalar(ScalarHandle),
    /// An array lexical
    Array(ArrayHandle),
    /// A hash lexical
    Hash(HashHandle),
    /// A spilled operand
    Spill(Value),
}

impl PadSlot {
    /// Takes the slot content, leaving `Empty`.
    pub fn take(&mut self) -> PadSlot {
        std::mem::take(self)
    }
}

/// A callable: compiled method, captured environment, optional prototype,
/// and an optional weak binding back to the symbol-table entry that named
/// it (kept weak so tearing the table down stays deterministic).
#[derive(Debug, Clone)]
pub struct RuntimeCode {
    /// Qualified name for named subs, `None` for anonymous ones
    pub name: Option<String>,
    /// Prototype string, when declared
    pub proto: Option<String>,
    /// The compiled method
    pub method: Rc<Method>,
    /// Captured outer pad entries, aligned with `method.captures`
    pub env: Vec<PadSlot>,
    /// Weak back-pointer to the naming glob, for caller-side reflection
    pub glob: Option<Weak<Glob>>,
}

impl RuntimeCode {
    /// An anonymous code value.
    pub fn anon(method: Rc<Method>, env: Vec<PadSlot>) -> Self {
        RuntimeCode { name: None, proto: None, method, env, glob: None }
    }

    /// Diagnostic name (`main::__ANON__` style for anonymous subs).
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("__ANON__")
    }
}

/// Result alias used by the execution engine's call surface.
pub type CallResult = Result<PerlList, crate::error::RuntimeError>;
