//! The `rperl` driver: assembles program text from the command line,
//! applies the `-n`/`-p`/`-a`/`-l` wrappers, compiles, and runs.
//!
//! Exit codes: 0 success, 1 compile or runtime error, 2 usage error.

pub mod options;

use options::{DiagnosticMode, ModuleImport, Options, RecordSep, SepValue, UsageError, USAGE};
use perl_codegen::{compile_program, EmitterConfig};
use perl_error::render_diagnostic;
use perl_runtime::{Interp, RuntimeCode, RuntimeError, Scalar};
use perl_vm::run_program;
use std::io::Write;
use std::rc::Rc;
use tracing::debug;

/// Entry point used by `main` and the test harness: parses `argv`
/// (without the program name) and runs with the given output endpoints.
pub fn run_with_io(argv: &[String], out: Box<dyn Write>, err: Box<dyn Write>) -> i32 {
    let mut err = err;
    let opts = match options::parse_args(argv) {
        Ok(opts) => opts,
        Err(UsageError(message)) => {
            let _ = writeln!(err, "{message}\n{USAGE}");
            return 2;
        }
    };

    if opts.debug {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug")),
            )
            .with_writer(std::io::stderr)
            .try_init();
    }

    match load_program(&opts) {
        Ok((source, file)) => run_loaded(&opts, &source, &file, out, err),
        Err(message) => {
            let _ = writeln!(err, "{message}\n{USAGE}");
            2
        }
    }
}

/// Resolves the program text: `-e` fragments joined by newlines, or the
/// program file (with `-x` leading-garbage skipping).
fn load_program(opts: &Options) -> Result<(String, String), String> {
    if let Some(fragments) = &opts.program {
        return Ok((fragments.join("\n"), "-e".to_string()));
    }
    let Some(path) = &opts.program_file else {
        return Err("No program file given".to_string());
    };
    let mut text = std::fs::read_to_string(path).map_err(|e| format!("Can't open {path}: {e}"))?;
    if let Some(dir) = &opts.skip_leading {
        text = skip_leading_garbage(&text);
        if let Some(dir) = dir {
            let _ = std::env::set_current_dir(dir);
        }
    }
    Ok((text, path.clone()))
}

/// `-x`: discard everything before a `#!` line mentioning perl.
fn skip_leading_garbage(text: &str) -> String {
    let mut found = false;
    let mut out = String::new();
    for line in text.lines() {
        if !found {
            if line.starts_with("#!") && line.contains("perl") {
                found = true;
            }
            continue;
        }
        out.push_str(line);
        out.push('\n');
    }
    if found { out } else { text.to_string() }
}

/// Builds the full program source: implicit `use` clauses, then the body
/// wrapped per `-n`/`-p`/`-a`/`-l`.
fn assemble_source(opts: &Options, body: &str) -> String {
    let mut source = String::new();
    for import in &opts.module_imports {
        source.push_str(&use_clause(import));
    }
    if opts.loop_lines {
        let mut inner = String::new();
        if opts.line_endings.is_some() {
            inner.push_str("chomp;\n");
        }
        if opts.autosplit {
            let pattern = opts.split_pattern.as_deref().unwrap_or(" ");
            inner.push_str(&format!("our @F = split '{}', $_;\n", escape_single(pattern)));
        }
        inner.push_str(body);
        source.push_str("LINE: while (<>) {\n");
        source.push_str(&inner);
        source.push_str("\n}\n");
        if opts.loop_print {
            source.push_str("continue {\nprint or die \"-p destination: error\";\n}\n");
        }
    } else {
        source.push_str(body);
    }
    source
}

fn use_clause(import: &ModuleImport) -> String {
    let keyword = if import.negated { "no" } else { "use" };
    if import.bare && import.imports.is_empty() {
        return format!("{keyword} {};\n", import.module);
    }
    if import.imports.is_empty() {
        return format!("{keyword} {};\n", import.module);
    }
    let list = import
        .imports
        .iter()
        .map(|i| format!("'{}'", escape_single(i)))
        .collect::<Vec<_>>()
        .join(", ");
    format!("{keyword} {} {list};\n", import.module)
}

fn escape_single(s: &str) -> String {
    s.replace('\\', "\\\\").replace('\'', "\\'")
}

fn run_loaded(
    opts: &Options,
    body: &str,
    file: &str,
    out: Box<dyn Write>,
    err: Box<dyn Write>,
) -> i32 {
    let mut err = err;
    let source = assemble_source(opts, body);
    debug!(file, len = source.len(), "program assembled");

    match opts.mode {
        DiagnosticMode::Tokenize => return dump_tokens(&source, out, err),
        DiagnosticMode::Parse => return dump_ast(&source, file, out, err),
        DiagnosticMode::Disassemble => return dump_disassembly(&source, file, out, err),
        DiagnosticMode::Run => {}
    }

    let ast = match perl_parser::Parser::new(&source).parse() {
        Ok(ast) => ast,
        Err(e) => {
            let rendered = render_diagnostic(&e.to_string(), file, &source, Some(e.position()));
            let _ = writeln!(err, "{rendered}");
            return 1;
        }
    };
    let method = match compile_program(&ast, &source, file, &EmitterConfig::default()) {
        Ok(method) => method,
        Err(e) => {
            let rendered = render_diagnostic(&e.to_string(), file, &source, e.position());
            let _ = writeln!(err, "{rendered}");
            return 1;
        }
    };

    if opts.compile_only {
        let mut out = out;
        let _ = writeln!(out, "{file} syntax OK");
        return 0;
    }

    if let Some(ext) = &opts.in_place {
        return run_in_place(opts, &source, file, ext, err);
    }

    let mut interp = Interp::with_output(out, err);
    configure_interp(&mut interp, opts, file);
    match run_program(&mut interp, &method) {
        Ok(()) => 0,
        Err(e) => {
            let message = runtime_message(&e);
            let _ = interp.err.write_all(message.as_bytes());
            let _ = interp.err.flush();
            1
        }
    }
}

/// `-i[EXT]`: each input file is processed in its own pass with standard
/// output captured and written back; a non-empty extension keeps a
/// backup.
fn run_in_place(opts: &Options, source: &str, file: &str, ext: &str, mut err: Box<dyn Write>) -> i32 {
    for path in &opts.args {
        let ast = match perl_parser::Parser::new(source).parse() {
            Ok(ast) => ast,
            Err(e) => {
                let _ = writeln!(err, "{e}");
                return 1;
            }
        };
        let method = match compile_program(&ast, source, file, &EmitterConfig::default()) {
            Ok(m) => m,
            Err(e) => {
                let _ = writeln!(err, "{e}");
                return 1;
            }
        };
        let captured = std::rc::Rc::new(std::cell::RefCell::new(Vec::<u8>::new()));
        let sink = CaptureWriter(captured.clone());
        let mut interp = Interp::with_output(Box::new(sink), Box::new(std::io::stderr()));
        configure_interp(&mut interp, opts, file);
        interp.set_argv(&[path.clone()]);
        if let Err(e) = run_program(&mut interp, &method) {
            let _ = err.write_all(runtime_message(&e).as_bytes());
            return 1;
        }
        if !ext.is_empty() {
            let backup = format!("{path}{ext}");
            if let Err(e) = std::fs::copy(path, &backup) {
                let _ = writeln!(err, "Can't write backup {backup}: {e}");
                return 1;
            }
        }
        if let Err(e) = std::fs::write(path, captured.borrow().as_slice()) {
            let _ = writeln!(err, "Can't write {path}: {e}");
            return 1;
        }
    }
    0
}

struct CaptureWriter(std::rc::Rc<std::cell::RefCell<Vec<u8>>>);

impl Write for CaptureWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }
    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Seeds `@ARGV`, `$0`, `@INC`, `$/`, `$\`, and the string-eval hook.
fn configure_interp(interp: &mut Interp, opts: &Options, file: &str) {
    interp.set_argv(&opts.args);
    interp
        .symbols
        .glob("main::0")
        .scalar_handle()
        .set(Scalar::from_string(file.to_string()));
    let inc = interp.symbols.glob("main::INC").array_handle();
    for dir in opts.include_dirs.iter().rev() {
        inc.borrow_mut().unshift_value(Scalar::from_string(dir.clone()));
    }
    if let Some(sep) = opts.record_sep {
        set_separator(interp, "main::/", sep);
    }
    if let Some(sep) = opts.line_endings {
        // -l: output record separator mirrors the input one.
        set_separator(interp, "main::\\", sep);
    }
    interp.eval_hook = Some(Rc::new(|src: &str| {
        let ast = perl_parser::Parser::new(src)
            .parse()
            .map_err(|e| e.to_string())?;
        let method = compile_program(&ast, src, "(eval)", &EmitterConfig::default())
            .map_err(|e| e.to_string())?;
        Ok(Rc::new(RuntimeCode::anon(method, Vec::new())))
    }));
}

fn set_separator(interp: &mut Interp, name: &str, sep: RecordSep) {
    let value = match sep.as_value() {
        SepValue::Bytes(bytes) => Scalar::from_bytes(bytes),
        SepValue::Undef => Scalar::Undef,
    };
    interp.symbols.glob(name).scalar_handle().set(value);
}

/// Uncaught-error rendering: `message at FILE line N.` with a final
/// newline guaranteed.
fn runtime_message(e: &RuntimeError) -> String {
    let mut message = e.to_string();
    if !message.ends_with('\n') {
        message.push('\n');
    }
    message
}

// ===== diagnostics modes =====

fn dump_tokens(source: &str, mut out: Box<dyn Write>, mut err: Box<dyn Write>) -> i32 {
    match perl_lexer::PerlLexer::new(source).tokenize() {
        Ok(tokens) => {
            for token in tokens.iter().filter(|t| !t.is_trivia()) {
                let _ = writeln!(out, "{:?}\t{:?}", token.kind, token.text);
            }
            0
        }
        Err(e) => {
            let _ = writeln!(err, "{e}");
            1
        }
    }
}

fn dump_ast(source: &str, file: &str, mut out: Box<dyn Write>, mut err: Box<dyn Write>) -> i32 {
    match perl_parser::Parser::new(source).parse() {
        Ok(ast) => {
            let _ = writeln!(out, "{}", ast.to_sexp());
            0
        }
        Err(e) => {
            let rendered = render_diagnostic(&e.to_string(), file, source, Some(e.position()));
            let _ = writeln!(err, "{rendered}");
            1
        }
    }
}

fn dump_disassembly(source: &str, file: &str, mut out: Box<dyn Write>, mut err: Box<dyn Write>) -> i32 {
    let ast = match perl_parser::Parser::new(source).parse() {
        Ok(ast) => ast,
        Err(e) => {
            let _ = writeln!(err, "{e}");
            return 1;
        }
    };
    match compile_program(&ast, source, file, &EmitterConfig::default()) {
        Ok(method) => {
            let _ = write!(out, "{}", perl_bytecode::disassemble(&method));
            0
        }
        Err(e) => {
            let _ = writeln!(err, "{e}");
            1
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    fn opts(args: &[&str]) -> Options {
        options::parse_args(&args.iter().map(|s| s.to_string()).collect::<Vec<_>>()).unwrap()
    }

    #[test]
    fn wraps_for_n() {
        let o = opts(&["-n", "-e", "print $_;"]);
        let src = assemble_source(&o, "print $_;");
        assert!(src.starts_with("LINE: while (<>) {"));
        assert!(src.contains("print $_;"));
        assert!(!src.contains("continue"));
    }

    #[test]
    fn wraps_for_p_with_continue() {
        let o = opts(&["-p", "-e", "1;"]);
        let src = assemble_source(&o, "1;");
        assert!(src.contains("continue {"));
        assert!(src.contains("print or die"));
    }

    #[test]
    fn autosplit_inserts_field_split() {
        let o = opts(&["-a", "-F,", "-e", "1;"]);
        let src = assemble_source(&o, "1;");
        assert!(src.contains("our @F = split ','"));
    }

    #[test]
    fn module_imports_become_use_clauses() {
        let o = opts(&["-Mstrict=vars", "-m-warnings", "-e", "1;"]);
        let src = assemble_source(&o, "1;");
        assert!(src.contains("use strict 'vars';"));
        assert!(src.contains("no warnings;"));
    }

    #[test]
    fn shebang_skip() {
        let text = "garbage\nmore\n#!/usr/bin/perl\nprint 1;\n";
        assert_eq!(skip_leading_garbage(text), "print 1;\n");
        // Without a marker the text is untouched.
        assert_eq!(skip_leading_garbage("print 2;"), "print 2;");
    }
}
