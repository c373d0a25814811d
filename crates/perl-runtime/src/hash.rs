//! The hash aggregate.

use crate::handles::ScalarHandle;
use crate::scalar::Scalar;
use indexmap::IndexMap;

/// Insertion-ordered mapping from byte-string keys to scalar cells.
///
/// Iteration order is insertion order modulo deletions (`shift_remove`
/// preserves the order of the remaining entries). `exists` is about the
/// key, `defined` about the value - they stay distinct.
#[derive(Debug, Default)]
pub struct PerlHash {
    /// Entries in insertion order
    pub map: IndexMap<Vec<u8>, ScalarHandle>,
    /// Blessed package, when this hash backs an object
    pub blessed: Option<String>,
    /// `each` iteration cursor; `keys`/`values` reset it
    pub iter_pos: usize,
}

impl PerlHash {
    /// Number of entries.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Whether the hash is empty.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Read access: undef when the key is absent.
    pub fn get(&self, key: &[u8]) -> Scalar {
        self.map.get(key).map(ScalarHandle::value).unwrap_or(Scalar::Undef)
    }

    /// Lvalue access: creates the entry with undef and returns its cell.
    pub fn elem_lv(&mut self, key: &[u8]) -> ScalarHandle {
        self.map
            .entry(key.to_vec())
            .or_insert_with(ScalarHandle::undef)
            .clone()
    }

    /// Whether the key exists (regardless of definedness).
    pub fn exists(&self, key: &[u8]) -> bool {
        self.map.contains_key(key)
    }

    /// Removes the entry, returning its value; preserves the insertion
    /// order of the remaining entries.
    pub fn delete(&mut self, key: &[u8]) -> Scalar {
        self.map
            .shift_remove(key)
            .map(|h| h.value())
            .unwrap_or(Scalar::Undef)
    }

    /// List assignment from a flat key/value sequence; an odd tail gets an
    /// undef value.
    pub fn assign(&mut self, flat: impl IntoIterator<Item = Scalar>) {
        self.map.clear();
        let mut iter = flat.into_iter();
        while let Some(key) = iter.next() {
            let value = iter.next().unwrap_or(Scalar::Undef);
            self.map
                .insert(key.stringify(), ScalarHandle::new(value));
        }
    }

    /// Keys in insertion order.
    pub fn keys(&self) -> Vec<Vec<u8>> {
        self.map.keys().cloned().collect()
    }

    /// Flattened key/value pairs in insertion order (value cells aliased).
    pub fn flatten(&self) -> Vec<ScalarHandle> {
        let mut out = Vec::with_capacity(self.map.len() * 2);
        for (k, v) in &self.map {
            out.push(ScalarHandle::new(Scalar::from_bytes(k.clone())));
            out.push(v.clone());
        }
        out
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn exists_vs_defined() {
        let mut h = PerlHash::default();
        h.elem_lv(b"k"); // creates with undef
        assert!(h.exists(b"k"));
        assert!(h.get(b"k").is_undef());
        assert!(!h.exists(b"other"));
    }

    #[test]
    fn delete_returns_value_and_keeps_order() {
        let mut h = PerlHash::default();
        h.assign([
            Scalar::from_string("a".into()),
            Scalar::Int(1),
            Scalar::from_string("b".into()),
            Scalar::Int(2),
            Scalar::from_string("c".into()),
            Scalar::Int(3),
        ]);
        let removed = h.delete(b"b");
        assert_eq!(removed.int(), 2);
        assert_eq!(h.keys(), vec![b"a".to_vec(), b"c".to_vec()]);
    }

    #[test]
    fn insertion_order_iteration() {
        let mut h = PerlHash::default();
        for (k, v) in [("z", 1), ("a", 2), ("m", 3)] {
            h.elem_lv(k.as_bytes()).set(Scalar::Int(v));
        }
        assert_eq!(h.keys(), vec![b"z".to_vec(), b"a".to_vec(), b"m".to_vec()]);
    }

    #[test]
    fn exists_iff_stored_and_not_deleted() {
        let mut h = PerlHash::default();
        assert!(!h.exists(b"x"));
        h.elem_lv(b"x").set(Scalar::Int(1));
        assert!(h.exists(b"x"));
        h.delete(b"x");
        assert!(!h.exists(b"x"));
    }
}
