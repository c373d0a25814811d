//! The array aggregate.

use crate::handles::ScalarHandle;
use crate::scalar::Scalar;
use std::collections::VecDeque;

/// Ordered sequence of scalar cells.
///
/// Elements are handles, so aliasing (`foreach` loop variables, `\$a[0]`)
/// works by handing the element cell out, never by copying. Negative
/// indices address from the end; out-of-range reads yield undef and
/// out-of-range writes extend with fresh undef cells.
#[derive(Debug, Default)]
pub struct PerlArray {
    /// Element cells in order
    pub elems: VecDeque<ScalarHandle>,
    /// Blessed package, when this array backs an object
    pub blessed: Option<String>,
}

impl PerlArray {
    /// Builds from owned values.
    pub fn from_values(values: impl IntoIterator<Item = Scalar>) -> Self {
        PerlArray {
            elems: values.into_iter().map(ScalarHandle::new).collect(),
            blessed: None,
        }
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.elems.len()
    }

    /// Whether the array is empty.
    pub fn is_empty(&self) -> bool {
        self.elems.is_empty()
    }

    /// `$#a`: last index, -1 when empty.
    pub fn last_index(&self) -> i64 {
        self.elems.len() as i64 - 1
    }

    /// Resolves a possibly negative index; `None` when before the start.
    pub fn resolve_index(&self, index: i64) -> Option<usize> {
        if index >= 0 {
            Some(index as usize)
        } else {
            let from_end = self.elems.len() as i64 + index;
            (from_end >= 0).then_some(from_end as usize)
        }
    }

    /// Read access: undef when out of range.
    pub fn get(&self, index: i64) -> Scalar {
        self.resolve_index(index)
            .and_then(|i| self.elems.get(i))
            .map(ScalarHandle::value)
            .unwrap_or(Scalar::Undef)
    }

    /// Lvalue access: extends with undef cells as needed and returns the
    /// element cell. `None` for a negative index before the start.
    pub fn elem_lv(&mut self, index: i64) -> Option<ScalarHandle> {
        let i = self.resolve_index(index)?;
        while self.elems.len() <= i {
            self.elems.push_back(ScalarHandle::undef());
        }
        Some(self.elems[i].clone())
    }

    /// Appends a value copy.
    pub fn push_value(&mut self, value: Scalar) {
        self.elems.push_back(ScalarHandle::new(value));
    }

    /// Removes and returns the last value.
    pub fn pop_value(&mut self) -> Scalar {
        self.elems
            .pop_back()
            .map(|h| h.value())
            .unwrap_or(Scalar::Undef)
    }

    /// Removes and returns the first value.
    pub fn shift_value(&mut self) -> Scalar {
        self.elems
            .pop_front()
            .map(|h| h.value())
            .unwrap_or(Scalar::Undef)
    }

    /// Prepends a value copy.
    pub fn unshift_value(&mut self, value: Scalar) {
        self.elems.push_front(ScalarHandle::new(value));
    }

    /// List assignment: replaces the contents with value copies.
    pub fn assign(&mut self, values: impl IntoIterator<Item = Scalar>) {
        self.elems = values.into_iter().map(ScalarHandle::new).collect();
    }

    /// Value copies of all elements.
    pub fn values(&self) -> Vec<Scalar> {
        self.elems.iter().map(ScalarHandle::value).collect()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn push_pop_identity() {
        let mut a = PerlArray::from_values([Scalar::Int(1), Scalar::Int(2)]);
        let before = a.len();
        a.push_value(Scalar::Int(9));
        let y = a.pop_value();
        assert_eq!(y.int(), 9);
        assert_eq!(a.len(), before);
    }

    #[test]
    fn negative_indices() {
        let a = PerlArray::from_values([Scalar::Int(10), Scalar::Int(20), Scalar::Int(30)]);
        assert_eq!(a.get(-1).int(), 30);
        assert_eq!(a.get(-3).int(), 10);
        assert!(a.get(-4).is_undef());
        assert!(a.get(7).is_undef());
    }

    #[test]
    fn lvalue_extends_with_undef() {
        let mut a = PerlArray::default();
        let cell = a.elem_lv(2).unwrap();
        cell.set(Scalar::Int(5));
        assert_eq!(a.len(), 3);
        assert!(a.get(0).is_undef());
        assert!(a.get(1).is_undef());
        assert_eq!(a.get(2).int(), 5);
    }

    #[test]
    fn element_cells_alias() {
        let mut a = PerlArray::from_values([Scalar::Int(1)]);
        let cell = a.elem_lv(0).unwrap();
        cell.set(Scalar::Int(42));
        assert_eq!(a.get(0).int(), 42);
    }
}
