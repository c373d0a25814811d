//! Byte-based source position tracking for the Perl compiler.
//!
//! Every token, AST node, and diagnostic in the pipeline carries a
//! [`ByteSpan`]; the [`LineIndex`] converts byte offsets into the 1-based
//! line/column pairs used by `message at FILE line N.` rendering.

mod line_index;
mod span;

pub use line_index::LineIndex;
pub use span::{ByteSpan, SourceLocation};
