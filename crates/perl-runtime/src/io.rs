//! Line-oriented input honoring `$/`.
//!
//! Implements the `<>` reading model: records come from the files named in
//! `@ARGV` (falling back to standard input when it is empty), split on the
//! input record separator. `$/` set to undef slurps, the empty string
//! selects paragraph mode, any other byte string is a literal separator.

use crate::error::{RuntimeError, RuntimeResult};
use crate::interp::Interp;
use crate::scalar::Scalar;
use std::collections::VecDeque;
use std::io::{BufRead, BufReader, Read};

/// How `$/` splits the input.
#[derive(Debug, Clone, PartialEq)]
enum RecordMode {
    Slurp,
    Paragraph,
    Separator(Vec<u8>),
}

fn record_mode(interp: &mut Interp) -> RecordMode {
    let rs = interp.record_separator();
    if rs.is_undef() {
        return RecordMode::Slurp;
    }
    let bytes = rs.stringify();
    if bytes.is_empty() {
        RecordMode::Paragraph
    } else {
        RecordMode::Separator(bytes)
    }
}

/// Reads one record from the named handle (`""`/`ARGV` or `STDIN`).
///
/// Returns `None` at end of input. Reading an unopened handle dies, as
/// perl does.
pub fn read_record(interp: &mut Interp, handle: &str) -> RuntimeResult<Option<Vec<u8>>> {
    if !handle.is_empty() && handle != "ARGV" && handle != "STDIN" {
        return Err(RuntimeError::die_str(format!(
            "readline() on unopened filehandle {handle}"
        )));
    }
    let mode = record_mode(interp);
    loop {
        if interp.input.reader.is_none() && !advance_reader(interp, handle)? {
            return Ok(None);
        }
        let Some(reader) = interp.input.reader.as_mut() else {
            return Ok(None);
        };
        let record = match &mode {
            RecordMode::Slurp => {
                let mut buf = Vec::new();
                reader
                    .read_to_end(&mut buf)
                    .map_err(|e| RuntimeError::die_str(format!("read failed: {e}")))?;
                if buf.is_empty() { None } else { Some(buf) }
            }
            RecordMode::Separator(sep) => read_until_seq(reader.as_mut(), sep)?,
            RecordMode::Paragraph => read_paragraph(reader.as_mut())?,
        };
        match record {
            Some(bytes) => return Ok(Some(bytes)),
            None => {
                // Current source is exhausted; move to the next file.
                interp.input.reader = None;
                if interp.input.done {
                    return Ok(None);
                }
            }
        }
    }
}

/// Reads every remaining record (list-context `<>`).
pub fn read_all_records(interp: &mut Interp, handle: &str) -> RuntimeResult<Vec<Vec<u8>>> {
    let mut out = Vec::new();
    while let Some(record) = read_record(interp, handle)? {
        out.push(record);
    }
    Ok(out)
}

/// Opens the next input source; snapshots `@ARGV` on first use.
fn advance_reader(interp: &mut Interp, handle: &str) -> RuntimeResult<bool> {
    if interp.input.done {
        return Ok(false);
    }
    if handle == "STDIN" {
        interp.input.reader = Some(Box::new(BufReader::new(std::io::stdin())));
        interp.input.done = true;
        return Ok(true);
    }
    if interp.input.files.is_none() {
        let argv: Vec<String> = interp
            .argv()
            .borrow()
            .values()
            .iter()
            .map(Scalar::display)
            .collect();
        interp.input.files = Some(argv.into_iter().collect::<VecDeque<_>>());
    }
    let files = interp
        .input
        .files
        .as_mut()
        .unwrap_or_else(|| unreachable!("snapshotted above"));
    match files.pop_front() {
        Some(path) => {
            let file = std::fs::File::open(&path).map_err(|e| {
                RuntimeError::die_str(format!("Can't open {path}: {e}"))
            })?;
            // $ARGV holds the current input file name.
            interp
                .symbols
                .glob("main::ARGV")
                .scalar_handle()
                .set(Scalar::from_string(path));
            interp.input.reader = Some(Box::new(BufReader::new(file)));
            Ok(true)
        }
        None => {
            if files.is_empty() && interp.input.reader.is_none() && !interp.input.done {
                // No files at all: read standard input once.
                interp.input.reader = Some(Box::new(BufReader::new(std::io::stdin())));
                interp.input.done = true;
                return Ok(true);
            }
            interp.input.done = true;
            Ok(false)
        }
    }
}

/// Reads until the byte sequence `sep` (inclusive) or EOF.
fn read_until_seq(reader: &mut dyn BufRead, sep: &[u8]) -> RuntimeResult<Option<Vec<u8>>> {
    let last = *sep.last().unwrap_or(&b'\n');
    let mut buf = Vec::new();
    loop {
        let n = reader
            .read_until(last, &mut buf)
            .map_err(|e| RuntimeError::die_str(format!("read failed: {e}")))?;
        if n == 0 {
            return Ok(if buf.is_empty() { None } else { Some(buf) });
        }
        if buf.ends_with(sep) {
            return Ok(Some(buf));
        }
    }
}

/// Paragraph mode: a record is text up to one or more blank lines; the
/// trailing newline run collapses to a single `\n\n`.
fn read_paragraph(reader: &mut dyn BufRead) -> RuntimeResult<Option<Vec<u8>>> {
    let mut buf = Vec::new();
    // Skip leading blank lines.
    loop {
        let mut line = Vec::new();
        let n = reader
            .read_until(b'\n', &mut line)
            .map_err(|e| RuntimeError::die_str(format!("read failed: {e}")))?;
        if n == 0 {
            return Ok(None);
        }
        if line != b"\n" {
            buf.extend_from_slice(&line);
            break;
        }
    }
    // Collect until a blank line or EOF.
    loop {
        let mut line = Vec::new();
        let n = reader
            .read_until(b'\n', &mut line)
            .map_err(|e| RuntimeError::die_str(format!("read failed: {e}")))?;
        if n == 0 {
            return Ok(Some(buf));
        }
        if line == b"\n" {
            buf.push(b'\n');
            return Ok(Some(buf));
        }
        buf.extend_from_slice(&line);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn separator_records() {
        let mut r = Cursor::new(b"a\nbb\nccc".to_vec());
        assert_eq!(read_until_seq(&mut r, b"\n").unwrap().unwrap(), b"a\n");
        assert_eq!(read_until_seq(&mut r, b"\n").unwrap().unwrap(), b"bb\n");
        assert_eq!(read_until_seq(&mut r, b"\n").unwrap().unwrap(), b"ccc");
        assert!(read_until_seq(&mut r, b"\n").unwrap().is_none());
    }

    #[test]
    fn multibyte_separator() {
        let mut r = Cursor::new(b"a--b--c".to_vec());
        assert_eq!(read_until_seq(&mut r, b"--").unwrap().unwrap(), b"a--");
        assert_eq!(read_until_seq(&mut r, b"--").unwrap().unwrap(), b"b--");
        assert_eq!(read_until_seq(&mut r, b"--").unwrap().unwrap(), b"c");
    }

    #[test]
    fn paragraph_records() {
        let mut r = Cursor::new(b"one\ntwo\n\n\n\nthree\n".to_vec());
        assert_eq!(read_paragraph(&mut r).unwrap().unwrap(), b"one\ntwo\n\n");
        assert_eq!(read_paragraph(&mut r).unwrap().unwrap(), b"three\n");
        assert!(read_paragraph(&mut r).unwrap().is_none());
    }
}
