//! Textual disassembly of methods, used by `--disassemble`.

use crate::method::{decode, Method, MethodBody};
use crate::op::{Const, Instr};
use std::fmt::Write;

/// Renders a method (and its nested subs) as readable text.
pub fn disassemble(method: &Method) -> String {
    let mut out = String::new();
    disassemble_into(method, 0, &mut out);
    out
}

fn disassemble_into(method: &Method, depth: usize, out: &mut String) {
    let indent = "  ".repeat(depth);
    let backend = match &method.body {
        MethodBody::Listed(_) => "listed",
        MethodBody::Packed(_) => "packed",
    };
    let _ = writeln!(
        out,
        "{indent}method {} [{backend}, {} slots, {} captures]",
        method.name,
        method.slots.len(),
        method.captures.len()
    );

    match &method.body {
        MethodBody::Listed(instrs) => {
            for (i, instr) in instrs.iter().enumerate() {
                let _ = writeln!(out, "{indent}  {i:5}  {}", render(instr, method));
            }
        }
        MethodBody::Packed(packed) => {
            let mut pc = 0usize;
            while pc < packed.bytes.len() {
                match decode(&packed.bytes, pc) {
                    Some((instr, next)) => {
                        let _ = writeln!(out, "{indent}  {pc:5}  {}", render(&instr, method));
                        pc = next;
                    }
                    None => {
                        let _ = writeln!(out, "{indent}  {pc:5}  ??");
                        break;
                    }
                }
            }
        }
    }

    for sub in &method.subs {
        disassemble_into(sub, depth + 1, out);
    }
}

fn render(instr: &Instr, method: &Method) -> String {
    match instr {
        Instr::PushConst(i) => match method.consts.get(*i as usize) {
            Some(Const::Str(s)) => {
                format!("PushConst {i} ({:?})", String::from_utf8_lossy(s))
            }
            Some(c) => format!("PushConst {i} ({c:?})"),
            None => format!("PushConst {i}"),
        },
        Instr::GlobalScalar(n)
        | Instr::GlobalArray(n)
        | Instr::GlobalHash(n)
        | Instr::GlobalCode(n)
        | Instr::GlobBindScalar(n)
        | Instr::CallNamed(n, _)
        | Instr::CallMethod(n, _) => match method.names.get(*n as usize) {
            Some(name) => format!("{instr:?} ({name})"),
            None => format!("{instr:?}"),
        },
        _ => format!("{instr:?}"),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::op::SlotKind;

    #[test]
    fn lists_instructions_with_indices() {
        let method = Method {
            name: "main".into(),
            file: "-e".into(),
            slots: vec![SlotKind::Scalar],
            captures: vec![],
            consts: vec![Const::Str(b"hi".to_vec())],
            names: vec!["main::f".into()],
            regexes: vec![],
            trans: vec![],
            subs: vec![],
            lines: vec![],
            body: MethodBody::Listed(vec![
                Instr::PushConst(0),
                Instr::MakeList(1),
                Instr::Return,
            ]),
        };
        let text = disassemble(&method);
        assert!(text.contains("method main [listed, 1 slots, 0 captures]"));
        assert!(text.contains("PushConst 0 (\"hi\")"));
        assert!(text.contains("Return"));
    }
}
