//! End-to-end scenarios driven through the CLI entry point: byte-exact
//! standard output and exit codes.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use perl_interp::run_with_io;
use pretty_assertions::assert_eq;
use std::cell::RefCell;
use std::io::Write;
use std::rc::Rc;

#[derive(Clone, Default)]
struct Buf(Rc<RefCell<Vec<u8>>>);

impl Write for Buf {
    fn write(&mut self, data: &[u8]) -> std::io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(data);
        Ok(data.len())
    }
    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

fn run(args: &[&str]) -> (i32, String, String) {
    let argv: Vec<String> = args.iter().map(|s| s.to_string()).collect();
    let out = Buf::default();
    let err = Buf::default();
    let code = run_with_io(&argv, Box::new(out.clone()), Box::new(err.clone()));
    (
        code,
        String::from_utf8_lossy(&out.0.borrow()).into_owned(),
        String::from_utf8_lossy(&err.0.borrow()).into_owned(),
    )
}

// ===== the six specification scenarios =====

#[test]
fn scenario_1_sum() {
    let (code, out, _) = run(&["-e", "my $s=0; for (1..10){$s+=$_} print $s"]);
    assert_eq!((code, out.as_str()), (0, "55"));
}

#[test]
fn scenario_2_factorial() {
    let (code, out, _) = run(&["-e", "sub f{ my $n=shift; return 1 if $n<2; $n*f($n-1) } print f(5)"]);
    assert_eq!((code, out.as_str()), (0, "120"));
}

#[test]
fn scenario_3_hash_pipeline() {
    let (code, out, _) = run(&[
        "-e",
        r#"my %h=(a=>1,b=>2); print join(",", map {"$_=$h{$_}"} sort keys %h)"#,
    ]);
    assert_eq!((code, out.as_str()), (0, "a=1,b=2"));
}

#[test]
fn scenario_4_local() {
    let (code, out, _) = run(&[
        "-e",
        r#"our $x="out"; sub show{print "$x\n"} { local $x="in"; show() } show()"#,
    ]);
    assert_eq!((code, out.as_str()), (0, "in\nout\n"));
}

#[test]
fn scenario_5_eval() {
    let (code, out, _) = run(&["-e", r#"my $r=eval { die "boom\n" }; print "caught:$@""#]);
    assert_eq!((code, out.as_str()), (0, "caught:boom\n"));
}

#[test]
fn scenario_6_nested_last() {
    let (code, out, _) = run(&[
        "-e",
        r#"for my $i (1..3){ for my $j (1..3){ last if $j==2; print "$i$j "} } print ".""#,
    ]);
    assert_eq!((code, out.as_str()), (0, "11 21 31 ."));
}

// ===== exit codes and errors =====

#[test]
fn uncaught_die_exits_1_with_location() {
    let (code, out, err) = run(&["-e", "die 'kaput'"]);
    assert_eq!(code, 1);
    assert_eq!(out, "");
    assert!(err.starts_with("kaput at -e line 1."), "stderr was: {err}");
}

#[test]
fn syntax_error_exits_1_with_caret() {
    let (code, _, err) = run(&["-e", "my $x = ;"]);
    assert_eq!(code, 1);
    assert!(err.contains("at -e line 1."), "stderr was: {err}");
    assert!(err.contains('^'));
}

#[test]
fn unknown_switch_exits_2() {
    let (code, _, err) = run(&["-Z"]);
    assert_eq!(code, 2);
    assert!(err.contains("Usage:"));
}

#[test]
fn missing_program_exits_2() {
    let (code, _, err) = run(&[]);
    assert_eq!(code, 2);
    assert!(err.contains("Usage:"));
}

#[test]
fn strict_vars_violation_exits_1() {
    let (code, _, err) = run(&["-Mstrict", "-e", "$nope = 1;"]);
    assert_eq!(code, 1);
    assert!(err.contains("requires explicit package name"), "stderr was: {err}");
}

// ===== repeated -e fragments =====

#[test]
fn multiple_e_fragments_join_as_lines() {
    let (code, out, _) = run(&["-e", "my $x = 1;", "-e", "print $x + 1;"]);
    assert_eq!((code, out.as_str()), (0, "2"));
}

// ===== diagnostics =====

#[test]
fn tokenize_mode_lists_tokens() {
    let (code, out, _) = run(&["--tokenize", "-e", "my $x = 42;"]);
    assert_eq!(code, 0);
    assert!(out.contains("My"));
    assert!(out.contains("ScalarSigil"));
    assert!(out.contains("Number"));
}

#[test]
fn parse_mode_prints_sexp() {
    let (code, out, _) = run(&["--parse", "-e", "my $x = 1 + 2;"]);
    assert_eq!(code, 0);
    assert!(out.contains("(add (int 1) (int 2))"));
}

#[test]
fn disassemble_mode_prints_methods() {
    let (code, out, _) = run(&["--disassemble", "-e", "print 1 + 2;"]);
    assert_eq!(code, 0);
    assert!(out.contains("method main"));
    assert!(out.contains("Return"));
}

#[test]
fn compile_only_reports_ok() {
    let (code, out, _) = run(&["-c", "-e", "my $x = 1;"]);
    assert_eq!(code, 0);
    assert_eq!(out, "-e syntax OK\n");
}

// ===== file programs and line-mode wrappers =====

fn write_temp(name: &str, contents: &str) -> std::path::PathBuf {
    let mut path = std::env::temp_dir();
    path.push(format!("rperl-test-{}-{name}", std::process::id()));
    std::fs::write(&path, contents).unwrap();
    path
}

#[test]
fn program_file_with_args() {
    let script = write_temp("argv.pl", "print join(':', @ARGV);");
    let (code, out, _) = run(&[script.to_str().unwrap(), "a", "b"]);
    assert_eq!((code, out.as_str()), (0, "a:b"));
    let _ = std::fs::remove_file(script);
}

#[test]
fn n_wrapper_streams_lines() {
    let data = write_temp("lines.txt", "one\ntwo\nthree\n");
    let (code, out, _) = run(&["-ne", "print if /t/", data.to_str().unwrap()]);
    assert_eq!((code, out.as_str()), (0, "two\nthree\n"));
    let _ = std::fs::remove_file(data);
}

#[test]
fn p_wrapper_copies_with_edit() {
    let data = write_temp("sub.txt", "cat\ndog\n");
    let (code, out, _) = run(&["-pe", "s/o/0/", data.to_str().unwrap()]);
    assert_eq!((code, out.as_str()), (0, "cat\nd0g\n"));
    let _ = std::fs::remove_file(data);
}

#[test]
fn autosplit_populates_fields() {
    let data = write_temp("fields.txt", "a b c\nd e f\n");
    let (code, out, _) = run(&["-lane", "print $F[1]", data.to_str().unwrap()]);
    assert_eq!((code, out.as_str()), (0, "b\ne\n"));
    let _ = std::fs::remove_file(data);
}

#[test]
fn field_separator_pattern() {
    let data = write_temp("csv.txt", "1,2,3\n");
    let (code, out, _) = run(&["-F,", "-lane", "print $F[2]", data.to_str().unwrap()]);
    assert_eq!((code, out.as_str()), (0, "3\n"));
    let _ = std::fs::remove_file(data);
}

#[test]
fn slurp_mode_reads_whole_file() {
    let data = write_temp("slurp.txt", "a\nb\n");
    let (code, out, _) = run(&["-g", "-ne", "print length($_)", data.to_str().unwrap()]);
    assert_eq!((code, out.as_str()), (0, "4"));
    let _ = std::fs::remove_file(data);
}

#[test]
fn in_place_edit_with_backup() {
    let data = write_temp("inplace.txt", "aaa\n");
    let (code, _, _) = run(&["-i.orig", "-pe", "s/a/b/g", data.to_str().unwrap()]);
    assert_eq!(code, 0);
    assert_eq!(std::fs::read_to_string(&data).unwrap(), "bbb\n");
    let backup = format!("{}.orig", data.to_str().unwrap());
    assert_eq!(std::fs::read_to_string(&backup).unwrap(), "aaa\n");
    let _ = std::fs::remove_file(&data);
    let _ = std::fs::remove_file(&backup);
}

#[test]
fn x_skips_leading_garbage() {
    let script = write_temp(
        "mail.txt",
        "From: someone\n\nbody text\n#!/usr/bin/perl\nprint 'found';\n",
    );
    let (code, out, _) = run(&["-x", script.to_str().unwrap()]);
    assert_eq!((code, out.as_str()), (0, "found"));
    let _ = std::fs::remove_file(script);
}
