//! `sprintf` formatting.
//!
//! Covers the directives the dialect uses: `%% %c %s %d %i %u %o %x %X
//! %e %f %g` with `-`, `0`, `+`, space, and `#` flags, width, precision,
//! and `*` for either taken from the argument list.

use perl_runtime::{format_num, RuntimeError, RuntimeResult, Scalar, ScalarHandle};

#[derive(Default)]
struct Directive {
    left: bool,
    zero: bool,
    plus: bool,
    space: bool,
    alt: bool,
    width: Option<usize>,
    precision: Option<usize>,
}

/// Formats `args` according to the perl-style format string.
pub fn sprintf(format: &Scalar, args: &[ScalarHandle]) -> RuntimeResult<Vec<u8>> {
    let fmt = format.stringify();
    let text = String::from_utf8_lossy(&fmt).into_owned();
    let mut out = Vec::new();
    let mut chars = text.chars().peekable();
    let mut next_arg = 0usize;

    let mut take = |next_arg: &mut usize| -> Scalar {
        let value = args.get(*next_arg).map(ScalarHandle::value).unwrap_or(Scalar::Undef);
        *next_arg += 1;
        value
    };

    while let Some(ch) = chars.next() {
        if ch != '%' {
            let mut buf = [0u8; 4];
            out.extend_from_slice(ch.encode_utf8(&mut buf).as_bytes());
            continue;
        }
        let mut d = Directive::default();
        // flags
        while let Some(&flag) = chars.peek() {
            match flag {
                '-' => d.left = true,
                '0' => d.zero = true,
                '+' => d.plus = true,
                ' ' => d.space = true,
                '#' => d.alt = true,
                _ => break,
            }
            chars.next();
        }
        // width
        if chars.peek() == Some(&'*') {
            chars.next();
            d.width = Some(take(&mut next_arg).int().max(0) as usize);
        } else {
            let mut width = String::new();
            while chars.peek().is_some_and(char::is_ascii_digit) {
                width.push(chars.next().unwrap_or('0'));
            }
            if !width.is_empty() {
                d.width = width.parse().ok();
            }
        }
        // precision
        if chars.peek() == Some(&'.') {
            chars.next();
            if chars.peek() == Some(&'*') {
                chars.next();
                d.precision = Some(take(&mut next_arg).int().max(0) as usize);
            } else {
                let mut prec = String::new();
                while chars.peek().is_some_and(char::is_ascii_digit) {
                    prec.push(chars.next().unwrap_or('0'));
                }
                d.precision = Some(prec.parse().unwrap_or(0));
            }
        }
        let Some(conv) = chars.next() else {
            out.push(b'%');
            break;
        };
        let rendered = match conv {
            '%' => "%".to_string(),
            'c' => {
                let code = take(&mut next_arg).int();
                u32::try_from(code)
                    .ok()
                    .and_then(char::from_u32)
                    .map(|c| c.to_string())
                    .unwrap_or_default()
            }
            's' => {
                let mut s = take(&mut next_arg).display();
                if let Some(p) = d.precision {
                    s = s.chars().take(p).collect();
                }
                s
            }
            'd' | 'i' => {
                let v = take(&mut next_arg).int();
                let body = v.abs().to_string();
                sign_and_pad(&d, v < 0, body)
            }
            'u' => {
                let v = take(&mut next_arg).int();
                (v as u64).to_string()
            }
            'o' => {
                let v = take(&mut next_arg).int() as u64;
                let body = format!("{v:o}");
                if d.alt && !body.starts_with('0') {
                    format!("0{body}")
                } else {
                    body
                }
            }
            'x' => {
                let v = take(&mut next_arg).int() as u64;
                let body = format!("{v:x}");
                if d.alt && v != 0 { format!("0x{body}") } else { body }
            }
            'X' => {
                let v = take(&mut next_arg).int() as u64;
                let body = format!("{v:X}");
                if d.alt && v != 0 { format!("0X{body}") } else { body }
            }
            'e' => {
                let v = take(&mut next_arg).num();
                let p = d.precision.unwrap_or(6);
                let s = format!("{v:.p$e}");
                fix_exponent(&s)
            }
            'f' => {
                let v = take(&mut next_arg).num();
                let p = d.precision.unwrap_or(6);
                let body = format!("{:.*}", p, v.abs());
                sign_and_pad(&d, v < 0.0, body)
            }
            'g' => {
                let v = take(&mut next_arg).num();
                format_num(v)
            }
            other => {
                return Err(RuntimeError::die_str(format!(
                    "Invalid conversion in sprintf: \"%{other}\""
                )))
            }
        };
        out.extend_from_slice(pad(&d, rendered).as_bytes());
    }
    Ok(out)
}

fn sign_and_pad(d: &Directive, negative: bool, body: String) -> String {
    let sign = if negative {
        "-"
    } else if d.plus {
        "+"
    } else if d.space {
        " "
    } else {
        ""
    };
    if d.zero && !d.left {
        if let Some(width) = d.width {
            let total = sign.len() + body.len();
            if total < width {
                return format!("{sign}{}{body}", "0".repeat(width - total));
            }
        }
    }
    format!("{sign}{body}")
}

fn pad(d: &Directive, body: String) -> String {
    let Some(width) = d.width else { return body };
    if body.len() >= width {
        return body;
    }
    let fill = " ".repeat(width - body.len());
    if d.left {
        format!("{body}{fill}")
    } else {
        format!("{fill}{body}")
    }
}

/// Rust renders `1e3` as `1e3`; perl prints `1.000000e+03`.
fn fix_exponent(s: &str) -> String {
    match s.find(['e', 'E']) {
        Some(idx) => {
            let (mantissa, exp) = s.split_at(idx);
            let exp_num: i32 = exp[1..].parse().unwrap_or(0);
            format!("{mantissa}e{}{:02}", if exp_num < 0 { "-" } else { "+" }, exp_num.abs())
        }
        None => s.to_string(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    fn fmt(template: &str, args: &[Scalar]) -> String {
        let handles: Vec<ScalarHandle> = args.iter().cloned().map(ScalarHandle::new).collect();
        let out = sprintf(&Scalar::from_string(template.into()), &handles).unwrap();
        String::from_utf8_lossy(&out).into_owned()
    }

    #[test]
    fn strings_and_ints() {
        assert_eq!(fmt("%s=%d", &[Scalar::from_string("n".into()), Scalar::Int(42)]), "n=42");
        assert_eq!(fmt("%5d|", &[Scalar::Int(42)]), "   42|");
        assert_eq!(fmt("%-5d|", &[Scalar::Int(42)]), "42   |");
        assert_eq!(fmt("%05d", &[Scalar::Int(-42)]), "-0042");
        assert_eq!(fmt("%+d", &[Scalar::Int(7)]), "+7");
    }

    #[test]
    fn floats() {
        assert_eq!(fmt("%.2f", &[Scalar::Num(3.14159)]), "3.14");
        assert_eq!(fmt("%f", &[Scalar::Num(1.5)]), "1.500000");
        assert_eq!(fmt("%e", &[Scalar::Num(1500.0)]), "1.500000e+03");
        assert_eq!(fmt("%g", &[Scalar::Num(0.5)]), "0.5");
    }

    #[test]
    fn hex_oct_char() {
        assert_eq!(fmt("%x", &[Scalar::Int(255)]), "ff");
        assert_eq!(fmt("%#X", &[Scalar::Int(255)]), "0XFF");
        assert_eq!(fmt("%o", &[Scalar::Int(8)]), "10");
        assert_eq!(fmt("%c%c", &[Scalar::Int(104), Scalar::Int(105)]), "hi");
        assert_eq!(fmt("100%%", &[]), "100%");
    }

    #[test]
    fn star_width() {
        assert_eq!(fmt("%*d", &[Scalar::Int(5), Scalar::Int(1)]), "    1");
        assert_eq!(fmt("%.*s", &[Scalar::Int(2), Scalar::from_string("abcdef".into())]), "ab");
    }

    #[test]
    fn missing_args_are_undef() {
        assert_eq!(fmt("[%s]", &[]), "[]");
    }

    #[test]
    fn bad_conversion_dies() {
        let result = sprintf(&Scalar::from_string("%q".into()), &[]);
        assert!(result.is_err());
    }
}
