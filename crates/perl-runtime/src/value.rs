//! Operand values and context conversions.

use crate::array::PerlArray;
use crate::error::{RuntimeError, RuntimeResult};
use crate::handles::{ArrayHandle, HashHandle, ScalarHandle};
use crate::list::PerlList;
use crate::scalar::Scalar;

/// One operand on the execution stack (or spilled in a pad slot).
#[derive(Debug, Clone)]
pub enum Value {
    /// A scalar cell
    Scalar(ScalarHandle),
    /// An array
    Array(ArrayHandle),
    /// A hash
    Hash(HashHandle),
    /// A flattened list
    List(PerlList),
}

impl Value {
    /// A fresh scalar operand.
    pub fn scalar(value: Scalar) -> Self {
        Value::Scalar(ScalarHandle::new(value))
    }

    /// Flattens this operand into element cells, Perl list semantics:
    /// arrays contribute their element cells (aliasing preserved), hashes
    /// contribute key/value pairs, lists splice.
    pub fn flatten_into(self, out: &mut Vec<ScalarHandle>) {
        match self {
            Value::Scalar(h) => out.push(h),
            Value::Array(a) => out.extend(a.borrow().elems.iter().cloned()),
            Value::Hash(h) => out.extend(h.borrow().flatten()),
            Value::List(l) => out.extend(l.values),
        }
    }

    /// Scalar-context conversion: arrays yield their element count,
    /// hashes their entry count, lists their last element.
    pub fn scalarize(self) -> ScalarHandle {
        match self {
            Value::Scalar(h) => h,
            Value::Array(a) => {
                let len = a.borrow().len() as i64;
                ScalarHandle::new(Scalar::Int(len))
            }
            Value::Hash(h) => {
                let len = h.borrow().len() as i64;
                ScalarHandle::new(Scalar::Int(len))
            }
            Value::List(l) => l
                .values
                .last()
                .cloned()
                .unwrap_or_else(ScalarHandle::undef),
        }
    }

    /// Converts to a list (flattening).
    pub fn into_list(self) -> PerlList {
        match self {
            Value::List(l) => l,
            other => {
                let mut values = Vec::new();
                other.flatten_into(&mut values);
                PerlList { values, marker: None }
            }
        }
    }

    /// Requires a scalar cell (assignment targets, match targets).
    pub fn into_scalar_handle(self) -> RuntimeResult<ScalarHandle> {
        match self {
            Value::Scalar(h) => Ok(h),
            other => Err(RuntimeError::Internal {
                msg: format!("expected a scalar operand, found {}", other.kind_name()),
            }),
        }
    }

    /// Requires an array handle.
    pub fn into_array_handle(self) -> RuntimeResult<ArrayHandle> {
        match self {
            Value::Array(a) => Ok(a),
            other => Err(RuntimeError::Internal {
                msg: format!("expected an array operand, found {}", other.kind_name()),
            }),
        }
    }

    /// Requires a hash handle.
    pub fn into_hash_handle(self) -> RuntimeResult<HashHandle> {
        match self {
            Value::Hash(h) => Ok(h),
            other => Err(RuntimeError::Internal {
                msg: format!("expected a hash operand, found {}", other.kind_name()),
            }),
        }
    }

    /// Operand family name for diagnostics.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Scalar(_) => "scalar",
            Value::Array(_) => "array",
            Value::Hash(_) => "hash",
            Value::List(_) => "list",
        }
    }

    /// Builds an args array from a list, aliasing the element cells (the
    /// callee's `@_` aliases the caller's arguments).
    pub fn args_array(list: PerlList) -> ArrayHandle {
        let array = PerlArray { elems: list.values.into(), blessed: None };
        ArrayHandle::from_array(array)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn arrays_flatten_by_cell() {
        let arr = ArrayHandle::new();
        arr.borrow_mut().push_value(Scalar::Int(1));
        arr.borrow_mut().push_value(Scalar::Int(2));
        let mut out = Vec::new();
        Value::Array(arr.clone()).flatten_into(&mut out);
        assert_eq!(out.len(), 2);
        // The flattened cells alias the array's elements.
        out[0].set(Scalar::Int(99));
        assert_eq!(arr.borrow().get(0).int(), 99);
    }

    #[test]
    fn scalar_context_of_array_is_count() {
        let arr = ArrayHandle::new();
        arr.borrow_mut().push_value(Scalar::Int(5));
        let n = Value::Array(arr).scalarize();
        assert_eq!(n.value().int(), 1);
    }

    #[test]
    fn hash_flattens_to_pairs() {
        let h = HashHandle::new();
        h.borrow_mut().elem_lv(b"k").set(Scalar::Int(7));
        let list = Value::Hash(h).into_list();
        assert_eq!(list.len(), 2);
        assert_eq!(list.values[0].value().stringify(), b"k");
        assert_eq!(list.values[1].value().int(), 7);
    }
}
