//! Builtin functions, dispatched by name from `CallNamed`.
//!
//! Arguments arrive as a flattened list whose element cells alias the
//! caller's operands, so mutating builtins (`chomp`, `undef`) work through
//! the cells. Aggregate-first builtins (`push`, `keys`, ...) receive their
//! aggregate as a leading reference, the `\@` prototype convention the
//! emitter applies.

use crate::fmt::sprintf;
use crate::machine::{call_code, VmState};
use perl_bytecode::Context;
use perl_runtime::{
    bool_scalar, ArrayHandle, HashHandle, Interp, PerlList, RefValue, RuntimeCode, RuntimeError,
    RuntimeResult, RxProgram, Scalar, ScalarHandle,
};
use std::rc::Rc;

/// Dispatches a builtin; `None` means the name is not a builtin.
pub(crate) fn dispatch(
    interp: &mut Interp,
    vm: &mut VmState,
    name: &str,
    args: PerlList,
    cx: Context,
    loc: (&str, u32),
) -> RuntimeResult<Option<PerlList>> {
    let result = match name {
        "join" => join(&args),
        "split" => split(interp, &args)?,
        "sprintf" => {
            let fmt = arg_value(&args, 0);
            let rest = args.values.get(1..).unwrap_or(&[]);
            PerlList::single(Scalar::from_bytes(sprintf(&fmt, rest)?))
        }
        "sort" => sort(interp, vm, &args)?,
        "map" => map_grep(interp, vm, &args, true)?,
        "grep" => map_grep(interp, vm, &args, false)?,
        "reverse" => reverse(&args, cx),
        "keys" => keys(&args)?,
        "values" => values_of(&args)?,
        "each" => each(&args)?,
        "push" => {
            let array = array_arg(&args)?;
            for v in args.values.get(1..).unwrap_or(&[]) {
                array.borrow_mut().push_value(v.value());
            }
            let len = array.borrow().len() as i64;
            PerlList::single(Scalar::Int(len))
        }
        "unshift" => {
            let array = array_arg(&args)?;
            for v in args.values.get(1..).unwrap_or(&[]).iter().rev() {
                array.borrow_mut().unshift_value(v.value());
            }
            let len = array.borrow().len() as i64;
            PerlList::single(Scalar::Int(len))
        }
        "pop" => {
            let array = array_arg(&args)?;
            let value = array.borrow_mut().pop_value();
            PerlList::single(value)
        }
        "shift" => {
            let array = array_arg(&args)?;
            let value = array.borrow_mut().shift_value();
            PerlList::single(value)
        }
        "splice" => splice(&args)?,
        "die" => return Err(die_error(&args, loc)),
        "warn" => {
            let message = death_message(&args, loc);
            let _ = std::io::Write::write_all(&mut interp.err, &message);
            PerlList::single(Scalar::Int(1))
        }
        "ref" => {
            let value = arg_scalar(&args, 0).value();
            PerlList::single(Scalar::from_string(value.ref_type()))
        }
        "bless" => {
            let reference = arg_scalar(&args, 0);
            let package = match args.values.get(1) {
                Some(p) => p.value().display(),
                None => "main".to_string(),
            };
            interp.bless(&reference.value(), &package)?;
            PerlList::single_handle(reference)
        }
        "defined" => {
            let defined = !arg_value(&args, 0).is_undef();
            PerlList::single(bool_scalar(defined))
        }
        "undef" => {
            if let Some(cell) = args.values.first() {
                cell.set(Scalar::Undef);
            }
            PerlList::single(Scalar::Undef)
        }
        "scalar" => PerlList::single(arg_value(&args, 0)),
        "length" => {
            let value = topicalized(interp, &args);
            PerlList::single(match value {
                Scalar::Undef => Scalar::Undef,
                Scalar::Str(s) => Scalar::Int(s.char_len() as i64),
                other => Scalar::Int(other.stringify().len() as i64),
            })
        }
        "substr" => substr(&args),
        "index" => {
            let haystack = arg_value(&args, 0).stringify();
            let needle = arg_value(&args, 1).stringify();
            let start = args.values.get(2).map(|v| v.value().int().max(0) as usize).unwrap_or(0);
            let found = find_sub(&haystack, &needle, start, false);
            PerlList::single(Scalar::Int(found))
        }
        "rindex" => {
            let haystack = arg_value(&args, 0).stringify();
            let needle = arg_value(&args, 1).stringify();
            let start = args
                .values
                .get(2)
                .map(|v| v.value().int().max(0) as usize)
                .unwrap_or(haystack.len());
            let found = find_sub(&haystack, &needle, start, true);
            PerlList::single(Scalar::Int(found))
        }
        "uc" => map_str(interp, &args, |s| s.to_uppercase()),
        "lc" => map_str(interp, &args, |s| s.to_lowercase()),
        "ucfirst" => map_str(interp, &args, |s| change_first(s, true)),
        "lcfirst" => map_str(interp, &args, |s| change_first(s, false)),
        "chomp" => chomp_chop(interp, &args, true),
        "chop" => chomp_chop(interp, &args, false),
        "chr" => {
            let code = topicalized(interp, &args).int();
            let ch = u32::try_from(code).ok().and_then(char::from_u32).unwrap_or('\u{FFFD}');
            PerlList::single(Scalar::from_string(ch.to_string()))
        }
        "ord" => {
            let bytes = topicalized(interp, &args).stringify();
            let ch = String::from_utf8_lossy(&bytes).chars().next().map_or(0, |c| c as i64);
            PerlList::single(Scalar::Int(ch))
        }
        "abs" => {
            let n = topicalized(interp, &args).num();
            PerlList::single(perl_runtime::from_f64(n.abs()))
        }
        "int" => PerlList::single(Scalar::Int(topicalized(interp, &args).int())),
        "sqrt" => {
            let n = topicalized(interp, &args).num();
            if n < 0.0 {
                return Err(RuntimeError::Arithmetic {
                    msg: format!("Can't take sqrt of {}", perl_runtime::format_num(n)),
                });
            }
            PerlList::single(perl_runtime::from_f64(n.sqrt()))
        }
        "hex" => {
            let s = topicalized(interp, &args).display();
            let trimmed = s.trim_start_matches("0x").trim_start_matches("0X");
            PerlList::single(Scalar::Int(i64::from_str_radix(trimmed, 16).unwrap_or(0)))
        }
        "oct" => {
            let s = topicalized(interp, &args).display();
            let value = if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
                i64::from_str_radix(hex, 16).unwrap_or(0)
            } else if let Some(bin) = s.strip_prefix("0b").or_else(|| s.strip_prefix("0B")) {
                i64::from_str_radix(bin, 2).unwrap_or(0)
            } else {
                i64::from_str_radix(s.trim(), 8).unwrap_or(0)
            };
            PerlList::single(Scalar::Int(value))
        }
        "wantarray" => PerlList::single(Scalar::Undef),
        "__install_sub__" => {
            let name = arg_value(&args, 0).display();
            let code_value = arg_value(&args, 1);
            let Scalar::Code(rc) = code_value else {
                return Err(RuntimeError::Internal { msg: "__install_sub__ without code".into() });
            };
            let mut code: RuntimeCode = (*rc).clone();
            code.proto = args.values.get(2).map(|p| p.value().display());
            interp.install_sub(&name, code);
            PerlList::empty()
        }
        "__eval_string__" => eval_string(interp, vm, &args, cx)?,
        _ => return Ok(None),
    };
    Ok(Some(result))
}

// ===== helpers =====

fn arg_scalar(args: &PerlList, i: usize) -> ScalarHandle {
    args.values.get(i).cloned().unwrap_or_else(ScalarHandle::undef)
}

fn arg_value(args: &PerlList, i: usize) -> Scalar {
    args.values.get(i).map(ScalarHandle::value).unwrap_or(Scalar::Undef)
}

/// Missing argument defaults to `$_`.
fn topicalized(interp: &mut Interp, args: &PerlList) -> Scalar {
    match args.values.first() {
        Some(v) => v.value(),
        None => interp.topic().value(),
    }
}

fn array_arg(args: &PerlList) -> RuntimeResult<ArrayHandle> {
    match arg_value(args, 0) {
        Scalar::Ref(RefValue::Array(a)) => Ok(a),
        other => Err(RuntimeError::NotAReference {
            what: other.display(),
            wanted: "ARRAY",
        }),
    }
}

fn hash_arg(args: &PerlList) -> RuntimeResult<HashHandle> {
    match arg_value(args, 0) {
        Scalar::Ref(RefValue::Hash(h)) => Ok(h),
        other => Err(RuntimeError::NotAReference {
            what: other.display(),
            wanted: "HASH",
        }),
    }
}

/// `die`/`warn` message: concatenated arguments, a lone reference kept
/// intact, and ` at FILE line N.` appended when no trailing newline.
fn die_error(args: &PerlList, loc: (&str, u32)) -> RuntimeError {
    if args.len() == 1 {
        let value = arg_value(args, 0);
        if matches!(value, Scalar::Ref(_)) {
            return RuntimeError::Die(value);
        }
    }
    RuntimeError::Die(Scalar::from_bytes(death_message(args, loc)))
}

fn death_message(args: &PerlList, loc: (&str, u32)) -> Vec<u8> {
    let mut message: Vec<u8> = args
        .values
        .iter()
        .flat_map(|v| v.value().stringify())
        .collect();
    if message.is_empty() {
        message.extend_from_slice(b"Died");
    }
    if message.last() != Some(&b'\n') {
        message.extend_from_slice(format!(" at {} line {}.\n", loc.0, loc.1).as_bytes());
    }
    message
}

// ===== output =====

/// `print`/`say` body: joins with `$,`, appends `$\` (or the `say`
/// newline), honors the selected stream.
pub(crate) fn write_list(
    interp: &mut Interp,
    list: &PerlList,
    stderr: bool,
    newline: bool,
) -> RuntimeResult<()> {
    let sep = interp.symbols.glob("main::,").scalar_handle().value();
    let ors = interp.symbols.glob("main::\\").scalar_handle().value();
    let mut out = Vec::new();
    for (i, v) in list.values.iter().enumerate() {
        if i > 0 && !sep.is_undef() {
            out.extend_from_slice(&sep.stringify());
        }
        out.extend_from_slice(&v.value().stringify());
    }
    if newline {
        out.push(b'\n');
    } else if !ors.is_undef() {
        out.extend_from_slice(&ors.stringify());
    }
    let target: &mut dyn std::io::Write = if stderr { &mut interp.err } else { &mut interp.out };
    target
        .write_all(&out)
        .map_err(|e| RuntimeError::die_str(format!("print failed: {e}")))?;
    Ok(())
}

// ===== list builtins =====

fn join(args: &PerlList) -> PerlList {
    let sep = arg_value(args, 0).stringify();
    let mut out = Vec::new();
    for (i, v) in args.values.iter().skip(1).enumerate() {
        if i > 0 {
            out.extend_from_slice(&sep);
        }
        out.extend_from_slice(&v.value().stringify());
    }
    PerlList::single(Scalar::from_bytes(out))
}

fn split(interp: &mut Interp, args: &PerlList) -> RuntimeResult<PerlList> {
    let pattern = arg_value(args, 0).display();
    let target = match args.values.get(1) {
        Some(v) => v.value(),
        None => interp.topic().value(),
    };
    let limit = args.values.get(2).map(|v| v.value().int()).unwrap_or(0);
    let text = String::from_utf8_lossy(&target.stringify()).into_owned();

    // The awk special case: a single-space pattern splits on whitespace
    // runs and skips leading whitespace.
    let mut fields: Vec<String> = if pattern == " " {
        text.split_whitespace().map(str::to_string).collect()
    } else {
        let rx = RxProgram::compile(&pattern, Default::default())?;
        let mut out = Vec::new();
        let mut pos = 0usize;
        let mut count = 0i64;
        while pos <= text.len() {
            if limit > 0 && count + 1 >= limit {
                break;
            }
            let found = rx
                .re
                .find_from_pos(&text, pos)
                .map_err(|e| RuntimeError::die_str(format!("Regex execution failed: {e}")))?;
            let Some(m) = found else { break };
            if m.end() == m.start() && m.start() == pos {
                // Zero-width match at the cursor: step one character.
                if pos >= text.len() {
                    break;
                }
                let ch = text[pos..].chars().next().map_or(1, char::len_utf8);
                out.push(text[pos..pos + ch].to_string());
                pos += ch;
                count += 1;
                continue;
            }
            out.push(text[pos..m.start()].to_string());
            pos = m.end();
            count += 1;
        }
        out.push(text[pos.min(text.len())..].to_string());
        out
    };
    if limit <= 0 {
        while fields.last().is_some_and(String::is_empty) {
            fields.pop();
        }
    }
    Ok(PerlList::from_values(fields.into_iter().map(Scalar::from_string)))
}

fn reverse(args: &PerlList, cx: Context) -> PerlList {
    if cx == Context::Scalar {
        let mut bytes = Vec::new();
        for v in &args.values {
            bytes.extend_from_slice(&v.value().stringify());
        }
        let text: String = String::from_utf8_lossy(&bytes).chars().rev().collect();
        return PerlList::single(Scalar::from_string(text));
    }
    PerlList {
        values: args.values.iter().rev().cloned().collect(),
        marker: None,
    }
}

fn keys(args: &PerlList) -> RuntimeResult<PerlList> {
    match arg_value(args, 0) {
        Scalar::Ref(RefValue::Hash(h)) => {
            h.borrow_mut().iter_pos = 0;
            let keys = h.borrow().keys();
            Ok(PerlList::from_values(keys.into_iter().map(Scalar::from_bytes)))
        }
        Scalar::Ref(RefValue::Array(a)) => {
            let len = a.borrow().len() as i64;
            Ok(PerlList::from_values((0..len).map(Scalar::Int)))
        }
        other => Err(RuntimeError::NotAReference { what: other.display(), wanted: "HASH" }),
    }
}

fn values_of(args: &PerlList) -> RuntimeResult<PerlList> {
    match arg_value(args, 0) {
        Scalar::Ref(RefValue::Hash(h)) => {
            h.borrow_mut().iter_pos = 0;
            let values: Vec<ScalarHandle> = h.borrow().map.values().cloned().collect();
            Ok(PerlList { values, marker: None })
        }
        Scalar::Ref(RefValue::Array(a)) => {
            let values: Vec<ScalarHandle> = a.borrow().elems.iter().cloned().collect();
            Ok(PerlList { values, marker: None })
        }
        other => Err(RuntimeError::NotAReference { what: other.display(), wanted: "HASH" }),
    }
}

fn each(args: &PerlList) -> RuntimeResult<PerlList> {
    let hash = hash_arg(args)?;
    let mut h = hash.borrow_mut();
    let pos = h.iter_pos;
    match h.map.get_index(pos) {
        Some((key, value)) => {
            let pair = PerlList {
                values: vec![
                    ScalarHandle::new(Scalar::from_bytes(key.clone())),
                    value.clone(),
                ],
                marker: None,
            };
            h.iter_pos += 1;
            Ok(pair)
        }
        None => {
            h.iter_pos = 0;
            Ok(PerlList::empty())
        }
    }
}

fn splice(args: &PerlList) -> RuntimeResult<PerlList> {
    let array = array_arg(args)?;
    let len = array.borrow().len() as i64;
    let offset = args.values.get(1).map(|v| v.value().int()).unwrap_or(0);
    let offset = if offset < 0 { (len + offset).max(0) } else { offset.min(len) } as usize;
    let count = args
        .values
        .get(2)
        .map(|v| v.value().int())
        .unwrap_or(len - offset as i64);
    let count = count.max(0) as usize;
    let replacement: Vec<Scalar> =
        args.values.get(3..).unwrap_or(&[]).iter().map(ScalarHandle::value).collect();

    let mut borrowed = array.borrow_mut();
    let tail: Vec<ScalarHandle> = borrowed.elems.drain(offset..).collect();
    let (removed, kept) = tail.split_at(count.min(tail.len()));
    let removed: Vec<Scalar> = removed.iter().map(ScalarHandle::value).collect();
    for value in replacement {
        borrowed.elems.push_back(ScalarHandle::new(value));
    }
    for handle in kept {
        borrowed.elems.push_back(handle.clone());
    }
    Ok(PerlList::from_values(removed))
}

// ===== strings =====

fn map_str(interp: &mut Interp, args: &PerlList, f: impl Fn(&str) -> String) -> PerlList {
    let bytes = topicalized(interp, args).stringify();
    let text = String::from_utf8_lossy(&bytes);
    PerlList::single(Scalar::from_string(f(&text)))
}

fn change_first(s: &str, upper: bool) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => {
            let mapped: String = if upper {
                first.to_uppercase().collect()
            } else {
                first.to_lowercase().collect()
            };
            mapped + chars.as_str()
        }
        None => String::new(),
    }
}

fn chomp_chop(interp: &mut Interp, args: &PerlList, chomp: bool) -> PerlList {
    let cells: Vec<ScalarHandle> = if args.values.is_empty() {
        vec![interp.topic()]
    } else {
        args.values.clone()
    };
    let rs = interp.record_separator().stringify();
    let mut removed = 0i64;
    for cell in cells {
        let mut bytes = cell.value().stringify();
        if chomp {
            if !rs.is_empty() && bytes.ends_with(&rs) {
                bytes.truncate(bytes.len() - rs.len());
                removed += rs.len() as i64;
                cell.set(Scalar::from_bytes(bytes));
            }
        } else if !bytes.is_empty() {
            bytes.pop();
            removed = 1;
            cell.set(Scalar::from_bytes(bytes));
        }
    }
    PerlList::single(Scalar::Int(removed))
}

fn substr(args: &PerlList) -> PerlList {
    let bytes = arg_value(args, 0).stringify();
    let text = String::from_utf8_lossy(&bytes).into_owned();
    let chars: Vec<char> = text.chars().collect();
    let len = chars.len() as i64;
    let offset = arg_value(args, 1).int();
    let offset = if offset < 0 { (len + offset).max(0) } else { offset.min(len) };
    let count = args
        .values
        .get(2)
        .map(|v| v.value().int())
        .unwrap_or(len - offset);
    let count = if count < 0 { (len - offset + count).max(0) } else { count };
    let out: String = chars
        .into_iter()
        .skip(offset as usize)
        .take(count as usize)
        .collect();
    PerlList::single(Scalar::from_string(out))
}

fn find_sub(haystack: &[u8], needle: &[u8], start: usize, from_end: bool) -> i64 {
    if needle.is_empty() {
        return start.min(haystack.len()) as i64;
    }
    if from_end {
        let end = start.saturating_add(needle.len()).min(haystack.len());
        for i in (0..=end.saturating_sub(needle.len())).rev() {
            if haystack[i..].starts_with(needle) {
                return i as i64;
            }
        }
        return -1;
    }
    let mut i = start;
    while i + needle.len() <= haystack.len() {
        if haystack[i..].starts_with(needle) {
            return i as i64;
        }
        i += 1;
    }
    -1
}

// ===== code-valued builtins =====

/// The comparator/body convention: the emitter always passes the code
/// value (or undef for plain `sort`) as the first element.
fn code_first(args: &PerlList) -> (Option<Rc<RuntimeCode>>, Vec<ScalarHandle>) {
    let code = match args.values.first().map(ScalarHandle::value) {
        Some(Scalar::Code(c)) => Some(c),
        _ => None,
    };
    let rest = args.values.get(1..).unwrap_or(&[]).to_vec();
    (code, rest)
}

fn sort(interp: &mut Interp, vm: &mut VmState, args: &PerlList) -> RuntimeResult<PerlList> {
    let (comparator, mut items) = code_first(args);
    match comparator {
        None => {
            items.sort_by(|x, y| x.value().stringify().cmp(&y.value().stringify()));
            Ok(PerlList { values: items, marker: None })
        }
        Some(cmp) => {
            let a_glob = interp.symbols.glob("main::a");
            let b_glob = interp.symbols.glob("main::b");
            let sorted = merge_sort(interp, vm, &cmp, &a_glob, &b_glob, items)?;
            Ok(PerlList { values: sorted, marker: None })
        }
    }
}

/// Merge sort so comparator errors propagate cleanly.
fn merge_sort(
    interp: &mut Interp,
    vm: &mut VmState,
    cmp: &Rc<RuntimeCode>,
    a_glob: &Rc<perl_runtime::Glob>,
    b_glob: &Rc<perl_runtime::Glob>,
    items: Vec<ScalarHandle>,
) -> RuntimeResult<Vec<ScalarHandle>> {
    if items.len() <= 1 {
        return Ok(items);
    }
    let mid = items.len() / 2;
    let mut right = items;
    let left = merge_sort(interp, vm, cmp, a_glob, b_glob, right.drain(..mid).collect())?;
    let right = merge_sort(interp, vm, cmp, a_glob, b_glob, right)?;

    let mut out = Vec::with_capacity(left.len() + right.len());
    let (mut li, mut ri) = (0, 0);
    while li < left.len() && ri < right.len() {
        let saved_a = a_glob.bind_scalar(left[li].clone());
        let saved_b = b_glob.bind_scalar(right[ri].clone());
        let result = call_code(interp, vm, cmp, ArrayHandle::new(), Context::Scalar);
        a_glob.bind_scalar(saved_a);
        b_glob.bind_scalar(saved_b);
        let ordering = result?.scalar_value().int();
        if ordering <= 0 {
            out.push(left[li].clone());
            li += 1;
        } else {
            out.push(right[ri].clone());
            ri += 1;
        }
    }
    out.extend_from_slice(&left[li..]);
    out.extend_from_slice(&right[ri..]);
    Ok(out)
}

fn map_grep(
    interp: &mut Interp,
    vm: &mut VmState,
    args: &PerlList,
    is_map: bool,
) -> RuntimeResult<PerlList> {
    let (body, items) = code_first(args);
    let Some(body) = body else {
        return Err(RuntimeError::Internal { msg: "map/grep without a body".into() });
    };
    let topic_glob = interp.symbols.glob("main::_");
    let mut out = Vec::new();
    for item in items {
        let saved = topic_glob.bind_scalar(item.clone());
        let result = call_code(
            interp,
            vm,
            &body,
            ArrayHandle::new(),
            if is_map { Context::List } else { Context::Scalar },
        );
        topic_glob.bind_scalar(saved);
        let list = result?;
        if interp.pending_ctl.is_some() {
            break;
        }
        if is_map {
            out.extend(list.values);
        } else if list.scalar_value().truthy() {
            out.push(item);
        }
    }
    Ok(PerlList { values: out, marker: None })
}

fn eval_string(
    interp: &mut Interp,
    vm: &mut VmState,
    args: &PerlList,
    cx: Context,
) -> RuntimeResult<PerlList> {
    let source = arg_value(args, 0).display();
    let Some(hook) = interp.eval_hook.clone() else {
        return Err(RuntimeError::die_str("string eval is not available"));
    };
    let errvar = interp.errvar();
    match hook(&source) {
        Err(message) => {
            errvar.set(Scalar::from_string(message));
            Ok(PerlList::single(Scalar::Undef))
        }
        Ok(code) => match call_code(interp, vm, &code, ArrayHandle::new(), cx) {
            Ok(result) => {
                errvar.set(Scalar::from_string(String::new()));
                Ok(result)
            }
            Err(RuntimeError::Die(payload)) => {
                errvar.set(payload);
                Ok(PerlList::single(Scalar::Undef))
            }
            Err(other) => Err(other),
        },
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn find_sub_directions() {
        assert_eq!(find_sub(b"hello world", b"o", 0, false), 4);
        assert_eq!(find_sub(b"hello world", b"o", 5, false), 7);
        assert_eq!(find_sub(b"hello world", b"o", 11, true), 7);
        assert_eq!(find_sub(b"hello", b"zz", 0, false), -1);
    }

    #[test]
    fn death_message_appends_location() {
        let args = PerlList::from_values([Scalar::from_string("boom".into())]);
        let msg = death_message(&args, ("t.pl", 3));
        assert_eq!(msg, b"boom at t.pl line 3.\n");
        let args = PerlList::from_values([Scalar::from_string("kept\n".into())]);
        assert_eq!(death_message(&args, ("t.pl", 3)), b"kept\n");
    }
}
