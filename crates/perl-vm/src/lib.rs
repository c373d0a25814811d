//! Bytecode execution engine.
//!
//! Runs [`Method`] bodies - packed or listed, the caller cannot tell -
//! over the `perl-runtime` value model. Every frame exits through one
//! return join where the marker protocol runs: unmarked results return,
//! tail calls re-enter through the trampoline, and loop-control markers
//! propagate through the interpreter's control-flow registry until a loop
//! that answers to their label consumes them. `die` is the only
//! exception-like path; it unwinds to the innermost `eval` handler,
//! restoring the dynamic-variable and regex-state stacks to the marks
//! recorded at handler installation.

mod builtins;
mod fmt;
mod machine;

pub use fmt::sprintf;
pub use machine::{call_code, run_program, VmState};
