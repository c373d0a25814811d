//! Property-based tests over the value model's quantified invariants.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use perl_runtime::{
    from_f64, parse_leading, str_increment, ArrayHandle, HashHandle, LocalStack, PerlArray,
    Scalar, ScalarHandle,
};
use proptest::prelude::*;

proptest! {
    /// stringify(numify(s)) == stringify(s) for canonical integers.
    #[test]
    fn canonical_int_roundtrip(v in any::<i32>()) {
        let s = Scalar::Int(i64::from(v));
        let through = from_f64(s.num());
        prop_assert_eq!(through.stringify(), s.stringify());
    }

    /// Numifying the canonical string form recovers the integer.
    #[test]
    fn string_of_int_numifies_back(v in any::<i32>()) {
        let text = Scalar::Int(i64::from(v)).stringify();
        prop_assert_eq!(parse_leading(&text), f64::from(v));
    }

    /// parse-leading stops at the first non-numeric character.
    #[test]
    fn parse_leading_ignores_suffix(v in any::<i32>(), suffix in "[a-z]{0,8}") {
        let text = format!("{v}{suffix}");
        prop_assert_eq!(parse_leading(text.as_bytes()), f64::from(v));
    }

    /// An unrecognized prefix yields zero.
    #[test]
    fn parse_leading_garbage_is_zero(prefix in "[a-zA-Z_]{1,8}", v in any::<i32>()) {
        let text = format!("{prefix}{v}");
        prop_assert_eq!(parse_leading(text.as_bytes()), 0.0);
    }

    /// push then pop returns the pushed value and restores the length.
    #[test]
    fn push_pop_identity(init in proptest::collection::vec(any::<i64>(), 0..16), x in any::<i64>()) {
        let mut a = PerlArray::from_values(init.iter().copied().map(Scalar::Int));
        let before = a.len();
        a.push_value(Scalar::Int(x));
        let y = a.pop_value();
        prop_assert_eq!(y.int(), x);
        prop_assert_eq!(a.len(), before);
    }

    /// exists(h, k) is true iff a prior store was not followed by delete.
    #[test]
    fn exists_tracks_store_delete(keys in proptest::collection::vec("[a-c]{1,2}", 0..12)) {
        let hash = HashHandle::new();
        let mut model = std::collections::HashSet::new();
        for (i, key) in keys.iter().enumerate() {
            if i % 3 == 2 {
                hash.borrow_mut().delete(key.as_bytes());
                model.remove(key);
            } else {
                hash.borrow_mut().elem_lv(key.as_bytes()).set(Scalar::Int(i as i64));
                model.insert(key.clone());
            }
        }
        for key in ["a", "b", "c", "aa", "bb"] {
            prop_assert_eq!(hash.borrow().exists(key.as_bytes()), model.contains(key));
        }
    }

    /// Every local push restored by pop_to, strictly LIFO, any depth.
    #[test]
    fn local_stack_restores_in_reverse(values in proptest::collection::vec(any::<i64>(), 1..8)) {
        let mut stack = LocalStack::default();
        let cell = ScalarHandle::new(Scalar::Int(-1));
        let mut marks = Vec::new();
        for v in &values {
            marks.push(stack.mark());
            stack.push_scalar(cell.clone());
            cell.set(Scalar::Int(*v));
        }
        // Unwind one scope at a time and observe each outer value again.
        for (i, mark) in marks.iter().enumerate().rev() {
            prop_assert_eq!(cell.value().int(), values[i]);
            stack.pop_to(*mark);
        }
        prop_assert_eq!(cell.value().int(), -1);
    }

    /// Magic increment output stays alphanumeric and non-empty.
    #[test]
    fn str_increment_well_formed(s in "[a-zA-Z][a-zA-Z0-9]{0,6}") {
        let bumped = str_increment(s.as_bytes());
        prop_assert!(!bumped.is_empty());
        prop_assert!(bumped.iter().all(|b| b.is_ascii_alphanumeric()));
        prop_assert!(bumped.len() >= s.len());
    }
}

#[test]
fn aliasing_is_reference_counted() {
    // A cell stays alive while any handle references it.
    let array = ArrayHandle::new();
    array.borrow_mut().push_value(Scalar::Int(1));
    let cell = array.borrow_mut().elem_lv(0).unwrap();
    array.borrow_mut().pop_value();
    // The array dropped its handle; ours still reads the value.
    assert_eq!(cell.value().int(), 1);
}
