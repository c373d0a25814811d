//! Reference-counted owning handles.
//!
//! All user-visible aliasing goes through handles: a pad slot, an array
//! element, and a `\$x` reference can all point at the same scalar cell.
//! Cycles are the user's problem, as in Perl; the weak forms exist for
//! back-pointers out of the global symbol table so teardown stays
//! deterministic.

use crate::array::PerlArray;
use crate::hash::PerlHash;
use crate::scalar::Scalar;
use std::cell::{Ref, RefCell, RefMut};
use std::rc::{Rc, Weak};

/// Owning handle to a scalar cell.
#[derive(Debug, Clone, Default)]
pub struct ScalarHandle(Rc<RefCell<Scalar>>);

impl ScalarHandle {
    /// A fresh cell holding the given value.
    pub fn new(value: Scalar) -> Self {
        ScalarHandle(Rc::new(RefCell::new(value)))
    }

    /// A fresh undef cell.
    pub fn undef() -> Self {
        Self::default()
    }

    /// Immutable view of the cell.
    pub fn borrow(&self) -> Ref<'_, Scalar> {
        self.0.borrow()
    }

    /// Mutable view of the cell.
    pub fn borrow_mut(&self) -> RefMut<'_, Scalar> {
        self.0.borrow_mut()
    }

    /// Value copy of the cell contents.
    pub fn value(&self) -> Scalar {
        self.0.borrow().clone()
    }

    /// Replaces the cell contents.
    pub fn set(&self, value: Scalar) {
        *self.0.borrow_mut() = value;
    }

    /// Pointer identity, used for reference numification and `==` on refs.
    pub fn ptr_id(&self) -> usize {
        Rc::as_ptr(&self.0) as usize
    }

    /// Whether two handles alias the same cell.
    pub fn same_cell(&self, other: &ScalarHandle) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Weak form for symbol-table back-pointers.
    pub fn downgrade(&self) -> WeakScalarHandle {
        WeakScalarHandle(Rc::downgrade(&self.0))
    }
}

/// Weak counterpart of [`ScalarHandle`].
#[derive(Debug, Clone)]
pub struct WeakScalarHandle(Weak<RefCell<Scalar>>);

impl WeakScalarHandle {
    /// Upgrades when the cell is still alive.
    pub fn upgrade(&self) -> Option<ScalarHandle> {
        self.0.upgrade().map(ScalarHandle)
    }
}

/// Owning handle to an array.
#[derive(Debug, Clone, Default)]
pub struct ArrayHandle(Rc<RefCell<PerlArray>>);

impl ArrayHandle {
    /// A fresh empty array.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps an existing array value.
    pub fn from_array(array: PerlArray) -> Self {
        ArrayHandle(Rc::new(RefCell::new(array)))
    }

    /// Immutable view.
    pub fn borrow(&self) -> Ref<'_, PerlArray> {
        self.0.borrow()
    }

    /// Mutable view.
    pub fn borrow_mut(&self) -> RefMut<'_, PerlArray> {
        self.0.borrow_mut()
    }

    /// Pointer identity.
    pub fn ptr_id(&self) -> usize {
        Rc::as_ptr(&self.0) as usize
    }

    /// Whether two handles alias the same array.
    pub fn same_cell(&self, other: &ArrayHandle) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

/// Owning handle to a hash.
#[derive(Debug, Clone, Default)]
pub struct HashHandle(Rc<RefCell<PerlHash>>);

impl HashHandle {
    /// A fresh empty hash.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps an existing hash value.
    pub fn from_hash(hash: PerlHash) -> Self {
        HashHandle(Rc::new(RefCell::new(hash)))
    }

    /// Immutable view.
    pub fn borrow(&self) -> Ref<'_, PerlHash> {
        self.0.borrow()
    }

    /// Mutable view.
    pub fn borrow_mut(&self) -> RefMut<'_, PerlHash> {
        self.0.borrow_mut()
    }

    /// Pointer identity.
    pub fn ptr_id(&self) -> usize {
        Rc::as_ptr(&self.0) as usize
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn aliasing_is_visible_through_both_handles() {
        let a = ScalarHandle::new(Scalar::Int(1));
        let b = a.clone();
        b.set(Scalar::Int(2));
        assert_eq!(a.value().int(), 2);
        assert!(a.same_cell(&b));
    }

    #[test]
    fn weak_handles_do_not_keep_cells_alive() {
        let weak = {
            let strong = ScalarHandle::new(Scalar::Int(1));
            strong.downgrade()
        };
        assert!(weak.upgrade().is_none());
    }
}
