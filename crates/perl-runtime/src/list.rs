//! Lists and control-flow markers.

use crate::code::RuntimeCode;
use crate::handles::{ArrayHandle, ScalarHandle};
use crate::scalar::Scalar;
use std::rc::Rc;

/// Non-local control-flow intent attached to a returning list.
///
/// Ordinary results carry no marker; `die` is not a marker (exceptions and
/// markers stay distinct).
#[derive(Debug, Clone)]
pub enum Marker {
    /// `last [LABEL]` thrown past a call boundary
    Last(Option<String>),
    /// `next [LABEL]`
    Next(Option<String>),
    /// `redo [LABEL]`
    Redo(Option<String>),
    /// `goto LABEL` escaping its method
    Goto(String),
    /// `goto &sub`: re-invoke in place through the trampoline
    TailCall {
        /// The replacement sub
        code: Rc<RuntimeCode>,
        /// Its arguments
        args: ArrayHandle,
    },
}

impl Marker {
    /// Operator name for diagnostics.
    pub fn op_name(&self) -> &'static str {
        match self {
            Marker::Last(_) => "last",
            Marker::Next(_) => "next",
            Marker::Redo(_) => "redo",
            Marker::Goto(_) => "goto",
            Marker::TailCall { .. } => "goto",
        }
    }

    /// The label this marker wants, if any.
    pub fn label(&self) -> Option<&str> {
        match self {
            Marker::Last(l) | Marker::Next(l) | Marker::Redo(l) => l.as_deref(),
            Marker::Goto(l) => Some(l),
            Marker::TailCall { .. } => None,
        }
    }

    /// Whether a loop answering to `loop_label` consumes this marker.
    /// Unlabeled markers bind to the innermost loop.
    pub fn binds_to(&self, loop_label: Option<&str>) -> bool {
        match self.label() {
            None => !matches!(self, Marker::Goto(_) | Marker::TailCall { .. }),
            Some(wanted) => loop_label == Some(wanted),
        }
    }
}

/// List value: the uniform call result. Element cells are aliased, not
/// copied; copying happens at assignment boundaries.
#[derive(Debug, Clone, Default)]
pub struct PerlList {
    /// Element cells
    pub values: Vec<ScalarHandle>,
    /// Control-flow marker, absent on ordinary results
    pub marker: Option<Marker>,
}

impl PerlList {
    /// The empty list.
    pub fn empty() -> Self {
        Self::default()
    }

    /// One-element list from a value.
    pub fn single(value: Scalar) -> Self {
        PerlList { values: vec![ScalarHandle::new(value)], marker: None }
    }

    /// One-element list aliasing an existing cell.
    pub fn single_handle(handle: ScalarHandle) -> Self {
        PerlList { values: vec![handle], marker: None }
    }

    /// List from owned values.
    pub fn from_values(values: impl IntoIterator<Item = Scalar>) -> Self {
        PerlList {
            values: values.into_iter().map(ScalarHandle::new).collect(),
            marker: None,
        }
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the list is empty.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Whether a control-flow marker rides along.
    pub fn is_marked(&self) -> bool {
        self.marker.is_some()
    }

    /// Scalar-context value: the last element, or undef.
    pub fn scalar_value(&self) -> Scalar {
        self.values.last().map(ScalarHandle::value).unwrap_or(Scalar::Undef)
    }

    /// Value copies of all elements.
    pub fn value_copies(&self) -> Vec<Scalar> {
        self.values.iter().map(ScalarHandle::value).collect()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn unlabeled_markers_bind_to_any_loop() {
        let m = Marker::Last(None);
        assert!(m.binds_to(None));
        assert!(m.binds_to(Some("OUTER")));
    }

    #[test]
    fn labeled_markers_bind_by_name() {
        let m = Marker::Next(Some("OUTER".into()));
        assert!(!m.binds_to(None));
        assert!(!m.binds_to(Some("INNER")));
        assert!(m.binds_to(Some("OUTER")));
    }

    #[test]
    fn scalar_context_takes_last() {
        let l = PerlList::from_values([Scalar::Int(1), Scalar::Int(2)]);
        assert_eq!(l.scalar_value().int(), 2);
        assert!(PerlList::empty().scalar_value().is_undef());
    }
}
