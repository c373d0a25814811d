//! Runtime error surface.

use crate::scalar::Scalar;
use thiserror::Error;

/// Result type for runtime operations.
pub type RuntimeResult<T> = std::result::Result<T, RuntimeError>;

/// Errors surfaced by the runtime and the execution engine.
///
/// `Die` is the only catchable kind (`eval { }` binds it to `$@`); the
/// rest propagate to the outermost frame. `Die` carries the scalar payload
/// intact so `die $obj` survives the catch.
#[derive(Debug, Clone, Error)]
pub enum RuntimeError {
    /// `die` or a fatal builtin failure
    #[error("{}", die_display(.0))]
    Die(Scalar),

    /// Dereference of something that is not a reference
    #[error("Can't use {what} as {wanted} ref")]
    NotAReference {
        /// What was found (display form)
        what: String,
        /// The reference kind wanted (ARRAY, HASH, ...)
        wanted: &'static str,
    },

    /// Arithmetic failure
    #[error("{msg}")]
    Arithmetic {
        /// perl-style message (`Illegal division by zero`)
        msg: String,
    },

    /// Coercion failure that warrants a hard stop
    #[error("{msg}")]
    TypeCoercion {
        /// Description
        msg: String,
    },

    /// A loop-control marker reached the outermost frame unconsumed
    #[error("Label not found for \"{op} {label}\"")]
    LabelNotFound {
        /// `last`, `next`, `redo`, or `goto`
        op: &'static str,
        /// The unmatched label (empty for unlabeled)
        label: String,
    },

    /// Call recursion exceeded the interpreter limit
    #[error("Deep recursion; call stack overflow")]
    StackOverflow,

    /// Corrupt bytecode or a broken execution invariant
    #[error("internal error: {msg}")]
    Internal {
        /// Description
        msg: String,
    },
}

impl RuntimeError {
    /// Builds a `die` from a plain message.
    pub fn die_str(msg: impl Into<String>) -> Self {
        RuntimeError::Die(Scalar::from_string(msg.into()))
    }

    /// The `$@` payload for this error when caught by `eval`.
    pub fn err_payload(&self) -> Scalar {
        match self {
            RuntimeError::Die(value) => value.clone(),
            other => Scalar::from_string(format!("{other}")),
        }
    }
}

fn die_display(value: &Scalar) -> String {
    value.display()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn die_keeps_payload() {
        let err = RuntimeError::die_str("boom\n");
        let payload = err.err_payload();
        assert_eq!(payload.display(), "boom\n");
    }

    #[test]
    fn label_not_found_message() {
        let err = RuntimeError::LabelNotFound { op: "last", label: "OUTER".into() };
        assert_eq!(err.to_string(), "Label not found for \"last OUTER\"");
    }
}
