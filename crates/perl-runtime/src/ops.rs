//! Operator implementations on scalar cells.
//!
//! Every operator is a pure function of its operand handles that may
//! mutate through them (in-place forms). Division by zero raises
//! `Arithmetic`; `%` follows Perl's sign-of-right-operand rule; `/`
//! produces a double unless `use integer` selected the integer variant at
//! compile time.

use crate::error::{RuntimeError, RuntimeResult};
use crate::handles::{ArrayHandle, HashHandle, ScalarHandle};
use crate::interp::Interp;
use crate::scalar::{from_f64, PerlStr, RefValue, Scalar};
use perl_bytecode::{BinCode, DerefCode, UnCode};
use std::cmp::Ordering;

/// Applies an eager binary operator; returns the result value.
pub fn binary(code: BinCode, a: &Scalar, b: &Scalar) -> RuntimeResult<Scalar> {
    use BinCode as B;
    Ok(match code {
        B::Add => from_f64(a.num() + b.num()),
        B::Sub => from_f64(a.num() - b.num()),
        B::Mul => from_f64(a.num() * b.num()),
        B::Div => {
            let denom = b.num();
            if denom == 0.0 {
                return Err(RuntimeError::Arithmetic {
                    msg: "Illegal division by zero".to_string(),
                });
            }
            let result = a.num() / denom;
            if result.fract() == 0.0 && result.abs() < 1e15 {
                // Exact quotients keep integer-ness (6/2 is 3, not 3.0).
                Scalar::Int(result as i64)
            } else {
                Scalar::Num(result)
            }
        }
        B::Mod => {
            let rhs = b.int();
            if rhs == 0 {
                return Err(RuntimeError::Arithmetic {
                    msg: "Illegal modulus zero".to_string(),
                });
            }
            // Result takes the sign of the right operand.
            let r = a.int().rem_euclid(rhs.abs());
            Scalar::Int(if rhs < 0 && r != 0 { r + rhs } else { r })
        }
        B::Pow => {
            let result = a.num().powf(b.num());
            from_f64(result)
        }
        B::IntAdd => Scalar::Int(a.int().wrapping_add(b.int())),
        B::IntSub => Scalar::Int(a.int().wrapping_sub(b.int())),
        B::IntMul => Scalar::Int(a.int().wrapping_mul(b.int())),
        B::IntDiv => {
            let rhs = b.int();
            if rhs == 0 {
                return Err(RuntimeError::Arithmetic {
                    msg: "Illegal division by zero".to_string(),
                });
            }
            Scalar::Int(a.int().wrapping_div(rhs))
        }
        B::Concat => {
            let mut bytes = a.stringify();
            bytes.extend_from_slice(&b.stringify());
            Scalar::Str(PerlStr::from_bytes(bytes))
        }
        B::Repeat => {
            let count = b.int().max(0) as usize;
            let unit = a.stringify();
            let mut bytes = Vec::with_capacity(unit.len() * count);
            for _ in 0..count {
                bytes.extend_from_slice(&unit);
            }
            Scalar::Str(PerlStr::from_bytes(bytes))
        }
        B::Shl => Scalar::Int(a.int().wrapping_shl(b.int() as u32)),
        B::Shr => Scalar::Int(((a.int() as u64) >> (b.int() as u32 & 63)) as i64),
        B::BitAnd => Scalar::Int(a.int() & b.int()),
        B::BitOr => Scalar::Int(a.int() | b.int()),
        B::BitXor => Scalar::Int(a.int() ^ b.int()),
        B::NumEq => bool_scalar(a.num() == b.num()),
        B::NumNe => bool_scalar(a.num() != b.num()),
        B::NumLt => bool_scalar(a.num() < b.num()),
        B::NumGt => bool_scalar(a.num() > b.num()),
        B::NumLe => bool_scalar(a.num() <= b.num()),
        B::NumGe => bool_scalar(a.num() >= b.num()),
        B::NumCmp => Scalar::Int(match a.num().partial_cmp(&b.num()) {
            Some(Ordering::Less) => -1,
            Some(Ordering::Equal) => 0,
            Some(Ordering::Greater) => 1,
            None => 0,
        }),
        B::StrEq => bool_scalar(a.stringify() == b.stringify()),
        B::StrNe => bool_scalar(a.stringify() != b.stringify()),
        B::StrLt => bool_scalar(a.stringify() < b.stringify()),
        B::StrGt => bool_scalar(a.stringify() > b.stringify()),
        B::StrLe => bool_scalar(a.stringify() <= b.stringify()),
        B::StrGe => bool_scalar(a.stringify() >= b.stringify()),
        B::StrCmp => Scalar::Int(match a.stringify().cmp(&b.stringify()) {
            Ordering::Less => -1,
            Ordering::Equal => 0,
            Ordering::Greater => 1,
        }),
    })
}

/// Perl's boolean values: 1 and "".
pub fn bool_scalar(b: bool) -> Scalar {
    if b {
        Scalar::Int(1)
    } else {
        Scalar::Str(PerlStr::from_string(String::new()))
    }
}

/// Applies a unary operator.
pub fn unary(code: UnCode, a: &Scalar) -> Scalar {
    match code {
        UnCode::Neg => match a {
            Scalar::Int(v) => Scalar::Int(v.wrapping_neg()),
            other => from_f64(-other.num()),
        },
        UnCode::Not => bool_scalar(!a.truthy()),
        UnCode::BitNot => Scalar::Int(!a.int()),
        UnCode::Defined => bool_scalar(!a.is_undef()),
        UnCode::StrInc => {
            let mut copy = a.clone();
            copy.increment();
            copy
        }
        UnCode::Dec => {
            let mut copy = a.clone();
            copy.decrement();
            copy
        }
    }
}

/// Dereferences a scalar cell per flavor.
///
/// Lvalue flavors autovivify through undef: the cell is mutated into a
/// reference to a fresh aggregate before the access proceeds. Symbolic
/// dereference (string contents naming a global) is honored when `strict
/// 'refs'` was off at the use site; otherwise it is `NotAReference`.
pub fn deref(
    interp: &mut Interp,
    code: DerefCode,
    cell: &ScalarHandle,
    allow_symbolic: bool,
) -> RuntimeResult<Derefed> {
    use DerefCode as D;
    let value = cell.value();
    match (&value, code) {
        (Scalar::Ref(RefValue::Scalar(h)), D::ScalarRv | D::ScalarLv) => {
            Ok(Derefed::Scalar(h.clone()))
        }
        (Scalar::Ref(RefValue::Array(h)), D::ArrayRv | D::ArrayLv) => {
            Ok(Derefed::Array(h.clone()))
        }
        (Scalar::Ref(RefValue::Hash(h)), D::HashRv | D::HashLv) => Ok(Derefed::Hash(h.clone())),
        (Scalar::Ref(RefValue::Code(c)), D::Code) => Ok(Derefed::Code(c.clone())),
        (Scalar::Code(c), D::Code) => Ok(Derefed::Code(c.clone())),
        (Scalar::Undef, D::ScalarLv) => {
            let fresh = ScalarHandle::undef();
            cell.set(Scalar::Ref(RefValue::Scalar(fresh.clone())));
            Ok(Derefed::Scalar(fresh))
        }
        (Scalar::Undef, D::ArrayLv) => {
            let fresh = ArrayHandle::new();
            cell.set(Scalar::Ref(RefValue::Array(fresh.clone())));
            Ok(Derefed::Array(fresh))
        }
        (Scalar::Undef, D::HashLv) => {
            let fresh = HashHandle::new();
            cell.set(Scalar::Ref(RefValue::Hash(fresh.clone())));
            Ok(Derefed::Hash(fresh))
        }
        // Reading through undef without autovivification: empty views.
        (Scalar::Undef, D::ArrayRv) => Ok(Derefed::Array(ArrayHandle::new())),
        (Scalar::Undef, D::HashRv) => Ok(Derefed::Hash(HashHandle::new())),
        (Scalar::Undef, D::ScalarRv) => Ok(Derefed::Scalar(ScalarHandle::undef())),
        (Scalar::Str(s), code) if allow_symbolic => {
            let name = String::from_utf8_lossy(&s.bytes).into_owned();
            let glob = interp.symbols.glob(&name);
            Ok(match code {
                D::ScalarRv | D::ScalarLv => Derefed::Scalar(glob.scalar_handle()),
                D::ArrayRv | D::ArrayLv => Derefed::Array(glob.array_handle()),
                D::HashRv | D::HashLv => Derefed::Hash(glob.hash_handle()),
                D::Code => match glob.code() {
                    Some(c) => Derefed::Code(c),
                    None => {
                        return Err(RuntimeError::die_str(format!(
                            "Undefined subroutine &{name} called"
                        )))
                    }
                },
            })
        }
        (other, code) => Err(RuntimeError::NotAReference {
            what: if other.is_undef() {
                "an undefined value".to_string()
            } else {
                format!("string (\"{}\")", other.display())
            },
            wanted: wanted_kind(code),
        }),
    }
}

/// Result of a dereference.
#[derive(Debug, Clone)]
pub enum Derefed {
    /// Scalar cell
    Scalar(ScalarHandle),
    /// Array
    Array(ArrayHandle),
    /// Hash
    Hash(HashHandle),
    /// Code
    Code(std::rc::Rc<crate::code::RuntimeCode>),
}

fn wanted_kind(code: DerefCode) -> &'static str {
    use DerefCode as D;
    match code {
        D::ScalarRv | D::ScalarLv => "SCALAR",
        D::ArrayRv | D::ArrayLv => "ARRAY",
        D::HashRv | D::HashLv => "HASH",
        D::Code => "CODE",
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn int(v: i64) -> Scalar {
        Scalar::Int(v)
    }

    #[test]
    fn division_keeps_exact_integers() {
        let r = binary(BinCode::Div, &int(6), &int(2)).unwrap();
        assert!(matches!(r, Scalar::Int(3)));
        let r = binary(BinCode::Div, &int(7), &int(2)).unwrap();
        assert_eq!(r.num(), 3.5);
    }

    #[test]
    fn division_by_zero() {
        let err = binary(BinCode::Div, &int(1), &int(0)).unwrap_err();
        assert!(err.to_string().contains("division by zero"));
    }

    #[test]
    fn modulus_sign_follows_right_operand() {
        assert_eq!(binary(BinCode::Mod, &int(7), &int(3)).unwrap().int(), 1);
        assert_eq!(binary(BinCode::Mod, &int(-7), &int(3)).unwrap().int(), 2);
        assert_eq!(binary(BinCode::Mod, &int(7), &int(-3)).unwrap().int(), -2);
        assert_eq!(binary(BinCode::Mod, &int(-7), &int(-3)).unwrap().int(), -1);
    }

    #[test]
    fn string_ops() {
        let ab = binary(BinCode::Concat, &Scalar::from_string("a".into()), &int(1)).unwrap();
        assert_eq!(ab.stringify(), b"a1");
        let rep = binary(BinCode::Repeat, &Scalar::from_string("ab".into()), &int(3)).unwrap();
        assert_eq!(rep.stringify(), b"ababab");
    }

    #[test]
    fn comparisons_yield_perl_booleans() {
        let t = binary(BinCode::NumLt, &int(1), &int(2)).unwrap();
        assert_eq!(t.int(), 1);
        let f = binary(BinCode::NumLt, &int(2), &int(1)).unwrap();
        assert_eq!(f.stringify(), b"");
        assert!(!f.truthy());
    }

    #[test]
    fn spaceship_and_cmp() {
        assert_eq!(binary(BinCode::NumCmp, &int(1), &int(2)).unwrap().int(), -1);
        assert_eq!(
            binary(
                BinCode::StrCmp,
                &Scalar::from_string("b".into()),
                &Scalar::from_string("a".into())
            )
            .unwrap()
            .int(),
            1
        );
    }

    #[test]
    fn autovivification_on_lvalue_deref() {
        let mut interp = Interp::new();
        let cell = ScalarHandle::undef();
        let d = deref(&mut interp, DerefCode::HashLv, &cell, false).unwrap();
        let Derefed::Hash(h) = d else { panic!("expected hash") };
        h.borrow_mut().elem_lv(b"k").set(int(1));
        // The cell mutated into a hash ref.
        assert_eq!(cell.value().ref_type(), "HASH");
    }

    #[test]
    fn rvalue_deref_through_undef_does_not_vivify() {
        let mut interp = Interp::new();
        let cell = ScalarHandle::undef();
        let d = deref(&mut interp, DerefCode::ArrayRv, &cell, false).unwrap();
        assert!(matches!(d, Derefed::Array(_)));
        assert!(cell.value().is_undef());
    }

    #[test]
    fn non_reference_rejected_under_strict() {
        let mut interp = Interp::new();
        let cell = ScalarHandle::new(Scalar::from_string("name".into()));
        let err = deref(&mut interp, DerefCode::ArrayRv, &cell, false).unwrap_err();
        assert!(matches!(err, RuntimeError::NotAReference { .. }));
    }

    #[test]
    fn symbolic_deref_when_allowed() {
        let mut interp = Interp::new();
        interp
            .symbols
            .glob("main::x")
            .scalar_handle()
            .set(int(42));
        let cell = ScalarHandle::new(Scalar::from_string("main::x".into()));
        let d = deref(&mut interp, DerefCode::ScalarRv, &cell, true).unwrap();
        let Derefed::Scalar(h) = d else { panic!() };
        assert_eq!(h.value().int(), 42);
    }
}
