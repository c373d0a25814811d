//! Runtime value model and interpreter state for the Perl compiler.
//!
//! The value model is tagged variants over reference-counted owning
//! handles: a [`Scalar`] always has a concrete tag, aggregates hand out
//! element cells for aliasing, and copying a reference copies the pointer.
//! Everything stateful lives behind an [`Interp`] instance - the named
//! symbol table, the dynamic-variable (`local`) stack, the regex
//! capture-state stack, the pending control-flow marker, and I/O - so the
//! core stays re-entrant and two interpreters never share anything.
//!
//! Non-local control flow is data, not exceptions: a returning
//! [`PerlList`] may carry a [`Marker`] (`last`/`next`/`redo`/`goto`/
//! tail-call) that the execution engine's return join and trampoline
//! interpret. `die` is the only exception-like path and is represented by
//! [`RuntimeError::Die`].

mod array;
mod code;
mod error;
mod handles;
mod hash;
mod interp;
mod io;
mod list;
mod ops;
mod rx;
mod scalar;
mod value;

pub use array::PerlArray;
pub use code::{CallResult, PadSlot, RuntimeCode};
pub use error::{RuntimeError, RuntimeResult};
pub use handles::{ArrayHandle, HashHandle, ScalarHandle, WeakScalarHandle};
pub use hash::PerlHash;
pub use interp::{EvalHook, Glob, Interp, LocalStack, RegexStack, RegexState, SymbolTable};
pub use io::{read_all_records, read_record};
pub use list::{Marker, PerlList};
pub use ops::{binary, bool_scalar, deref, unary, Derefed};
pub use rx::{do_match, do_subst, do_trans, RxProgram};
pub use scalar::{
    format_num, from_f64, numeric_from_bytes, parse_leading, str_increment, PerlStr, RefValue,
    Scalar,
};
pub use value::Value;
