//! Regex engine adapter.
//!
//! Only the state contract is part of the core: a successful match
//! replaces the interpreter's live [`RegexState`](crate::interp::RegexState)
//! (failed matches leave it untouched), and block snapshot/restore is
//! driven by the emitter. The pattern dialect itself is delegated to
//! `fancy-regex`, which covers the backreferences and lookarounds the
//! covered programs use.

use crate::error::{RuntimeError, RuntimeResult};
use crate::handles::ScalarHandle;
use crate::interp::{Interp, RegexState};
use crate::list::PerlList;
use crate::ops::bool_scalar;
use crate::scalar::{PerlStr, Scalar};
use crate::value::Value;
use indexmap::IndexMap;
use perl_bytecode::{Context, TransSpec};
use perl_token::RegexFlags;

/// A compiled pattern plus its flag record.
#[derive(Debug)]
pub struct RxProgram {
    /// Compiled engine program
    pub re: fancy_regex::Regex,
    /// The authoritative flag record (including `preserves_match`)
    pub flags: RegexFlags,
    /// Original source, for diagnostics
    pub source: String,
}

impl RxProgram {
    /// Compiles a pattern, folding the `imsx` flags into an inline group.
    pub fn compile(source: &str, flags: RegexFlags) -> RuntimeResult<Self> {
        let mut inline = String::new();
        if flags.ignore_case {
            inline.push('i');
        }
        if flags.multi_line {
            inline.push('m');
        }
        if flags.dot_all {
            inline.push('s');
        }
        if flags.extended {
            inline.push('x');
        }
        let full = if inline.is_empty() {
            source.to_string()
        } else {
            format!("(?{inline}){source}")
        };
        let re = fancy_regex::Regex::new(&full).map_err(|e| {
            RuntimeError::die_str(format!("Invalid regex: {e}"))
        })?;
        Ok(RxProgram { re, flags, source: source.to_string() })
    }
}

fn subject_string(target: &Scalar) -> String {
    String::from_utf8_lossy(&target.stringify()).into_owned()
}

/// Installs the capture state for a successful match.
fn update_state(interp: &mut Interp, subject: &str, caps: &fancy_regex::Captures<'_>, names: &[Option<String>]) {
    let whole = caps.get(0);
    let mut state = RegexState {
        captures: vec![None],
        named: IndexMap::new(),
        matched: whole.map(|m| m.as_str().as_bytes().to_vec()),
        prematch: whole.map(|m| subject[..m.start()].as_bytes().to_vec()),
        postmatch: whole.map(|m| subject[m.end()..].as_bytes().to_vec()),
        starts: vec![whole.map(|m| m.start())],
        ends: vec![whole.map(|m| m.end())],
    };
    for i in 1..caps.len() {
        let group = caps.get(i);
        state.captures.push(group.map(|m| m.as_str().as_bytes().to_vec()));
        state.starts.push(group.map(|m| m.start()));
        state.ends.push(group.map(|m| m.end()));
        if let Some(Some(name)) = names.get(i) {
            if let Some(m) = group {
                state.named.insert(name.clone(), m.as_str().as_bytes().to_vec());
            }
        }
    }
    interp.regex.current = state;
}

fn capture_names(re: &fancy_regex::Regex) -> Vec<Option<String>> {
    re.capture_names().map(|n| n.map(|s| s.to_string())).collect()
}

/// Runs a match in the given context.
///
/// Scalar context yields a Perl boolean; list context yields the capture
/// groups (or `(1)` without groups); `/g` in list context yields every
/// match's groups concatenated. A failed match leaves the capture state
/// of the last successful one intact.
pub fn do_match(
    interp: &mut Interp,
    rx: &RxProgram,
    target: &Scalar,
    ctx: Context,
    negated: bool,
) -> RuntimeResult<Value> {
    let subject = subject_string(target);
    let names = capture_names(&rx.re);

    if rx.flags.global && ctx == Context::List && !negated {
        let mut out = Vec::new();
        let mut pos = 0usize;
        loop {
            let caps = rx
                .re
                .captures_from_pos(&subject, pos)
                .map_err(engine_error)?;
            let Some(caps) = caps else { break };
            let Some(whole) = caps.get(0) else { break };
            update_state(interp, &subject, &caps, &names);
            if caps.len() > 1 {
                for i in 1..caps.len() {
                    out.push(match caps.get(i) {
                        Some(m) => Scalar::from_bytes(m.as_str().as_bytes().to_vec()),
                        None => Scalar::Undef,
                    });
                }
            } else {
                out.push(Scalar::from_bytes(whole.as_str().as_bytes().to_vec()));
            }
            pos = if whole.end() > whole.start() { whole.end() } else { whole.end() + 1 };
            if pos > subject.len() {
                break;
            }
        }
        return Ok(Value::List(PerlList::from_values(out)));
    }

    let caps = rx.re.captures(&subject).map_err(engine_error)?;
    let matched = caps.is_some();
    if let Some(caps) = &caps {
        update_state(interp, &subject, caps, &names);
    }
    let success = matched != negated;
    match ctx {
        Context::List if success && !negated => {
            let Some(caps) = &caps else {
                return Ok(Value::List(PerlList::from_values([Scalar::Int(1)])));
            };
            if caps.len() > 1 {
                let groups = (1..caps.len())
                    .map(|i| match caps.get(i) {
                        Some(m) => Scalar::from_bytes(m.as_str().as_bytes().to_vec()),
                        None => Scalar::Undef,
                    })
                    .collect::<Vec<_>>();
                Ok(Value::List(PerlList::from_values(groups)))
            } else {
                Ok(Value::List(PerlList::from_values([Scalar::Int(1)])))
            }
        }
        Context::List => Ok(Value::List(PerlList::empty())),
        _ => Ok(Value::scalar(bool_scalar(success))),
    }
}

/// Substitution: replaces matches of `rx` in the target cell, calling
/// `repl` for each match with the capture state installed.
///
/// Returns the match count, or the new string when `/r` leaves the target
/// untouched.
pub fn do_subst(
    interp: &mut Interp,
    rx: &RxProgram,
    target: &ScalarHandle,
    mut repl: impl FnMut(&mut Interp) -> RuntimeResult<Vec<u8>>,
) -> RuntimeResult<Scalar> {
    let original = subject_string(&target.value());
    let names = capture_names(&rx.re);
    let mut out = String::new();
    let mut pos = 0usize;
    let mut count = 0i64;

    loop {
        let caps = rx
            .re
            .captures_from_pos(&original, pos)
            .map_err(engine_error)?;
        let Some(caps) = caps else { break };
        let Some(whole) = caps.get(0) else { break };
        update_state(interp, &original, &caps, &names);
        out.push_str(&original[pos..whole.start()]);
        let replacement = repl(interp)?;
        out.push_str(&String::from_utf8_lossy(&replacement));
        count += 1;
        pos = whole.end();
        if whole.start() == whole.end() {
            // Empty match: copy one character and move on.
            match original[pos..].chars().next() {
                Some(c) => {
                    out.push(c);
                    pos += c.len_utf8();
                }
                None => break,
            }
        }
        if !rx.flags.global || pos > original.len() {
            break;
        }
    }
    out.push_str(&original[pos.min(original.len())..]);

    if rx.flags.non_destructive {
        return Ok(Scalar::from_string(out));
    }
    if count > 0 {
        target.set(Scalar::from_string(out));
    }
    Ok(Scalar::Int(count))
}

/// Transliteration over the target cell's bytes; returns the match count
/// (or the transformed string under `/r`).
pub fn do_trans(target: &ScalarHandle, spec: &TransSpec) -> Scalar {
    let bytes = target.value().stringify();
    let mut out = Vec::with_capacity(bytes.len());
    let mut count = 0i64;
    for &b in &bytes {
        let pos = if spec.complement {
            if spec.from.contains(&b) { None } else { Some(usize::MAX) }
        } else {
            spec.from.iter().position(|f| *f == b)
        };
        match pos {
            None => out.push(b),
            Some(idx) => {
                count += 1;
                if spec.to.is_empty() {
                    if spec.delete {
                        continue;
                    }
                    out.push(b);
                } else if idx == usize::MAX || idx >= spec.to.len() {
                    if spec.delete {
                        continue;
                    }
                    out.push(*spec.to.last().unwrap_or(&b));
                } else {
                    out.push(spec.to[idx]);
                }
            }
        }
    }
    if spec.non_destructive {
        Scalar::Str(PerlStr::from_bytes(out))
    } else {
        target.set(Scalar::Str(PerlStr::from_bytes(out)));
        Scalar::Int(count)
    }
}

fn engine_error(e: fancy_regex::Error) -> RuntimeError {
    RuntimeError::die_str(format!("Regex execution failed: {e}"))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn flags(s: &str) -> RegexFlags {
        RegexFlags::parse(perl_token::RegexOp::Match, s).unwrap()
    }

    #[test]
    fn scalar_match_sets_captures() {
        let mut interp = Interp::new();
        let rx = RxProgram::compile(r"(\w+)=(\d+)", flags("")).unwrap();
        let target = Scalar::from_string("count=42;".into());
        let result = do_match(&mut interp, &rx, &target, Context::Scalar, false).unwrap();
        let Value::Scalar(h) = result else { panic!() };
        assert!(h.value().truthy());
        assert_eq!(interp.regex.current.capture(1).stringify(), b"count");
        assert_eq!(interp.regex.current.capture(2).stringify(), b"42");
        assert_eq!(interp.regex.current.matched.as_deref(), Some(&b"count=42"[..]));
        assert_eq!(interp.regex.current.postmatch.as_deref(), Some(&b";"[..]));
    }

    #[test]
    fn failed_match_keeps_previous_state() {
        let mut interp = Interp::new();
        let rx = RxProgram::compile(r"(\d+)", flags("")).unwrap();
        do_match(&mut interp, &rx, &Scalar::from_string("n=7".into()), Context::Scalar, false)
            .unwrap();
        do_match(&mut interp, &rx, &Scalar::from_string("none".into()), Context::Scalar, false)
            .unwrap();
        assert_eq!(interp.regex.current.capture(1).stringify(), b"7");
    }

    #[test]
    fn list_context_returns_groups() {
        let mut interp = Interp::new();
        let rx = RxProgram::compile(r"(\w)(\w)", flags("")).unwrap();
        let result =
            do_match(&mut interp, &rx, &Scalar::from_string("ab".into()), Context::List, false)
                .unwrap();
        let Value::List(list) = result else { panic!() };
        assert_eq!(list.value_copies().iter().map(|v| v.display()).collect::<Vec<_>>(), ["a", "b"]);
    }

    #[test]
    fn global_list_match_collects_all() {
        let mut interp = Interp::new();
        let rx = RxProgram::compile(r"\d+", flags("g")).unwrap();
        let result =
            do_match(&mut interp, &rx, &Scalar::from_string("1 22 333".into()), Context::List, false)
                .unwrap();
        let Value::List(list) = result else { panic!() };
        assert_eq!(
            list.value_copies().iter().map(|v| v.display()).collect::<Vec<_>>(),
            ["1", "22", "333"]
        );
    }

    #[test]
    fn substitution_global() {
        let mut interp = Interp::new();
        let rx = RxProgram::compile(
            "o",
            RegexFlags::parse(perl_token::RegexOp::Subst, "g").unwrap(),
        )
        .unwrap();
        let target = ScalarHandle::new(Scalar::from_string("foo boo".into()));
        let count = do_subst(&mut interp, &rx, &target, |_| Ok(b"0".to_vec())).unwrap();
        assert_eq!(count.int(), 3);
        assert_eq!(target.value().stringify(), b"f00 b00");
    }

    #[test]
    fn substitution_nondestructive() {
        let mut interp = Interp::new();
        let rx = RxProgram::compile(
            "a",
            RegexFlags::parse(perl_token::RegexOp::Subst, "r").unwrap(),
        )
        .unwrap();
        let target = ScalarHandle::new(Scalar::from_string("abc".into()));
        let out = do_subst(&mut interp, &rx, &target, |_| Ok(b"X".to_vec())).unwrap();
        assert_eq!(out.stringify(), b"Xbc");
        assert_eq!(target.value().stringify(), b"abc");
    }

    #[test]
    fn transliteration_counts_and_maps() {
        let spec = TransSpec {
            from: (b'a'..=b'z').collect(),
            to: (b'A'..=b'Z').collect(),
            complement: false,
            delete: false,
            non_destructive: false,
        };
        let target = ScalarHandle::new(Scalar::from_string("abc-Z".into()));
        let count = do_trans(&target, &spec);
        assert_eq!(count.int(), 3);
        assert_eq!(target.value().stringify(), b"ABC-Z");
    }
}
