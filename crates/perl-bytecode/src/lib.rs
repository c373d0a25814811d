//! Bytecode layer of the Perl compiler.
//!
//! The emitter lowers each compilation unit (and each `sub`) to a
//! [`Method`]: instruction stream plus constant/name/regex pools, a pad
//! shape, and nested sub methods. Two interchangeable body encodings back
//! the same execution contract:
//!
//! - **packed** - `u8` opcodes with `u16` operands and byte-offset jumps,
//!   subject to the platform limit of 65 535 code bytes per method;
//! - **listed** - the plain [`Instr`] vector with `u32` instruction-index
//!   jumps and no size limit, used as the fallback backend.
//!
//! Callers cannot tell which encoding serves a given subroutine; the
//! assembler fails with [`AssembleError::TooLarge`] when a method does not
//! fit the packed form, and the emitter reacts by hoisting or falling back.
//!
//! The [`verify`] pass recomputes operand-stack depths per instruction and
//! rejects methods whose join edges disagree - the stack-map mechanism the
//! execution engine relies on instead of trusting the emitter.

mod disasm;
mod method;
mod op;
mod verify;

pub use disasm::disassemble;
pub use method::{assemble, assemble_with_limit, decode, AssembleError, Capture, Method, MethodBody, PackedCode, PACKED_LIMIT};
pub use op::{
    BinCode, Const, Context, DerefCode, Instr, MarkerCode, RegexSpec, SliceCode, SlotKind,
    TransSpec, UnCode, NO_LABEL,
};
pub use verify::{verify, VerifyError};
