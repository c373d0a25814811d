//! Numeric literal scanning.
//!
//! Handles decimal integers and floats (with `_` separators and exponents)
//! plus `0x`/`0o`/`0b`/legacy-octal integer forms. The scanner returns the
//! parsed value and the end offset; it never consumes trailing word
//! characters silently (those are a `BadNumber`).

use perl_error::{LexError, LexResult};
use perl_token::NumberLit;

/// Scans a numeric literal beginning at `start`. The caller guarantees the
/// byte at `start` is a digit, or a `.` followed by a digit.
pub(crate) fn scan_number(bytes: &[u8], start: usize) -> LexResult<(NumberLit, usize)> {
    let mut i = start;

    // Radix-prefixed integers.
    if bytes[i] == b'0' && i + 1 < bytes.len() {
        match bytes[i + 1] {
            b'x' | b'X' => return scan_radix(bytes, start, i + 2, 16),
            b'b' | b'B' => return scan_radix(bytes, start, i + 2, 2),
            b'o' | b'O' => return scan_radix(bytes, start, i + 2, 8),
            b'0'..=b'7' => {
                // Legacy octal, unless it turns out to be a float like 0.5
                // (impossible here: second byte is a digit) or 09 (bad).
                if !looks_like_float(bytes, i) {
                    return scan_radix(bytes, start, i + 1, 8);
                }
            }
            _ => {}
        }
    }

    let mut saw_dot = false;
    let mut saw_exp = false;
    while i < bytes.len() {
        match bytes[i] {
            b'0'..=b'9' | b'_' => i += 1,
            b'.' if !saw_dot && !saw_exp => {
                // `1..10` is a range, not a malformed float.
                if bytes.get(i + 1) == Some(&b'.') {
                    break;
                }
                saw_dot = true;
                i += 1;
            }
            b'e' | b'E' if !saw_exp => {
                let mut j = i + 1;
                if matches!(bytes.get(j), Some(b'+') | Some(b'-')) {
                    j += 1;
                }
                if !matches!(bytes.get(j), Some(b'0'..=b'9')) {
                    // `1e` followed by a non-digit: the `e` is not ours
                    // (could be `1 eq` written tightly; let it fail later).
                    break;
                }
                saw_exp = true;
                i = j;
            }
            _ => break,
        }
    }

    let text: String = bytes[start..i]
        .iter()
        .filter(|b| **b != b'_')
        .map(|b| *b as char)
        .collect();

    if saw_dot || saw_exp {
        let value = text.parse::<f64>().map_err(|e| LexError::BadNumber {
            position: start,
            reason: e.to_string(),
        })?;
        Ok((NumberLit::Float(value), i))
    } else {
        match text.parse::<i64>() {
            Ok(value) => Ok((NumberLit::Int(value), i)),
            // Integer literals beyond i64 degrade to floats, as perl does.
            Err(_) => {
                let value = text.parse::<f64>().map_err(|e| LexError::BadNumber {
                    position: start,
                    reason: e.to_string(),
                })?;
                Ok((NumberLit::Float(value), i))
            }
        }
    }
}

fn looks_like_float(bytes: &[u8], mut i: usize) -> bool {
    while i < bytes.len() && bytes[i].is_ascii_digit() {
        i += 1;
    }
    match bytes.get(i) {
        // A single dot makes it a float; `..` is a range after an integer.
        Some(b'.') => bytes.get(i + 1) != Some(&b'.'),
        Some(b'e') | Some(b'E') => true,
        _ => false,
    }
}

fn scan_radix(bytes: &[u8], start: usize, body: usize, radix: u32) -> LexResult<(NumberLit, usize)> {
    let mut i = body;
    let mut value: i64 = 0;
    let mut any = false;
    while i < bytes.len() {
        let b = bytes[i];
        if b == b'_' {
            i += 1;
            continue;
        }
        let digit = match (b as char).to_digit(radix) {
            Some(d) => d,
            None => break,
        };
        any = true;
        value = value
            .checked_mul(radix as i64)
            .and_then(|v| v.checked_add(digit as i64))
            .ok_or_else(|| LexError::BadNumber {
                position: start,
                reason: "integer constant overflows".to_string(),
            })?;
        i += 1;
    }
    if !any {
        return Err(LexError::BadNumber {
            position: start,
            reason: format!("missing digits after radix prefix (base {radix})"),
        });
    }
    Ok((NumberLit::Int(value), i))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    fn num(src: &str) -> NumberLit {
        scan_number(src.as_bytes(), 0).unwrap().0
    }

    #[test]
    fn integers() {
        assert_eq!(num("42"), NumberLit::Int(42));
        assert_eq!(num("1_000_000"), NumberLit::Int(1_000_000));
        assert_eq!(num("0xFF"), NumberLit::Int(255));
        assert_eq!(num("0b1010"), NumberLit::Int(10));
        assert_eq!(num("0o17"), NumberLit::Int(15));
        assert_eq!(num("017"), NumberLit::Int(15));
    }

    #[test]
    fn floats() {
        assert_eq!(num("3.14"), NumberLit::Float(3.14));
        assert_eq!(num("1e3"), NumberLit::Float(1000.0));
        assert_eq!(num("2.5e-1"), NumberLit::Float(0.25));
    }

    #[test]
    fn range_is_not_a_float() {
        let (lit, end) = scan_number(b"1..10", 0).unwrap();
        assert_eq!(lit, NumberLit::Int(1));
        assert_eq!(end, 1);
    }

    #[test]
    fn huge_decimal_degrades_to_float() {
        assert!(matches!(num("99999999999999999999"), NumberLit::Float(_)));
    }

    #[test]
    fn bad_radix() {
        assert!(scan_number(b"0x", 0).is_err());
    }
}
