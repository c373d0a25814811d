//! perl(1)-style switch scanning.
//!
//! The switch grammar is not derive-parser shaped: switches cluster
//! (`-lane`), several take optional values attached to the same argument
//! (`-0777`, `-i.bak`, `-Mstrict=vars`), and scanning stops at the first
//! non-switch argument, which names the program file. Hence a hand-rolled
//! scanner with perl's exact semantics.

use std::collections::VecDeque;

/// Diagnostic modes (mutually exclusive among the first three).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DiagnosticMode {
    /// Run the program
    #[default]
    Run,
    /// Dump the token stream
    Tokenize,
    /// Dump the AST S-expression
    Parse,
    /// Dump the compiled method
    Disassemble,
}

/// Where the program text comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgramSource {
    /// Accumulated `-e`/`-E` fragments
    Inline(Vec<String>),
    /// A program file path
    File(String),
    /// Nothing given (usage error unless a diagnostic mode reads stdin)
    Missing,
}

/// Parsed command line.
#[derive(Debug, Clone, Default)]
pub struct Options {
    /// Program text source
    pub program: Option<Vec<String>>,
    /// Program file, when not inline
    pub program_file: Option<String>,
    /// `-n`: wrap in `while (<>) { ... }`
    pub loop_lines: bool,
    /// `-p`: like `-n` plus a printing continue block
    pub loop_print: bool,
    /// `-a`: autosplit into `@F`
    pub autosplit: bool,
    /// `-F`: autosplit pattern (implies `-a`)
    pub split_pattern: Option<String>,
    /// `-0[OCT]`: input record separator by code point
    pub record_sep: Option<RecordSep>,
    /// `-l[OCT]`: chomp input, set output separator
    pub line_endings: Option<RecordSep>,
    /// `-i[EXT]`: in-place edit with optional backup extension
    pub in_place: Option<String>,
    /// `-I`: module search path prepends
    pub include_dirs: Vec<String>,
    /// `-m`/`-M` implicit use/no clauses, in order
    pub module_imports: Vec<ModuleImport>,
    /// `-c`: compile only
    pub compile_only: bool,
    /// `-x[DIR]`: skip leading garbage, optionally chdir
    pub skip_leading: Option<Option<String>>,
    /// Diagnostic mode
    pub mode: DiagnosticMode,
    /// `--debug`
    pub debug: bool,
    /// Arguments for `@ARGV`
    pub args: Vec<String>,
}

/// `-0`/`-l` separator encodings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordSep {
    /// A single byte value
    Byte(u8),
    /// `-00`: paragraph mode
    Paragraph,
    /// `-0400` and beyond: slurp whole files
    Slurp,
    /// Bare `-l`: newline
    Default,
}

impl RecordSep {
    fn from_octal(digits: &str) -> RecordSep {
        if digits.is_empty() {
            return RecordSep::Default;
        }
        let value = u32::from_str_radix(digits, 8).unwrap_or(0);
        if value == 0 {
            // -00 selects paragraph mode.
            return RecordSep::Paragraph;
        }
        if value >= 0o400 {
            return RecordSep::Slurp;
        }
        RecordSep::Byte(value as u8)
    }

    /// The `$/` (or `$\`) value this separator selects.
    pub fn as_value(self) -> SepValue {
        match self {
            RecordSep::Byte(b) => SepValue::Bytes(vec![b]),
            RecordSep::Paragraph => SepValue::Bytes(Vec::new()),
            RecordSep::Slurp => SepValue::Undef,
            RecordSep::Default => SepValue::Bytes(vec![b'\n']),
        }
    }
}

/// Separator value destined for `$/`/`$\`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SepValue {
    /// A byte string
    Bytes(Vec<u8>),
    /// undef (slurp)
    Undef,
}

/// One `-M`/`-m` clause.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleImport {
    /// `no` instead of `use` (leading `-`)
    pub negated: bool,
    /// Module name
    pub module: String,
    /// Import list after `=` (comma separated)
    pub imports: Vec<String>,
    /// `-M` implies parentheses-free use; `-m` means `use MOD ()`
    pub bare: bool,
}

/// Usage failure: printed with the usage text, exit code 2.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsageError(pub String);

impl std::fmt::Display for UsageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One-line usage text.
pub const USAGE: &str = "Usage: rperl [switches] [--] [programfile] [arguments]";

/// Scans the command line (without argv[0]).
pub fn parse_args(argv: &[String]) -> Result<Options, UsageError> {
    let mut opts = Options::default();
    let mut inline: Vec<String> = Vec::new();
    let mut queue: VecDeque<&String> = argv.iter().collect();

    while let Some(arg) = queue.front().copied() {
        if arg == "--" {
            queue.pop_front();
            break;
        }
        if !arg.starts_with('-') || arg == "-" {
            break;
        }
        queue.pop_front();

        if let Some(long) = arg.strip_prefix("--") {
            match long {
                "tokenize" => set_mode(&mut opts, DiagnosticMode::Tokenize)?,
                "parse" => set_mode(&mut opts, DiagnosticMode::Parse)?,
                "disassemble" => set_mode(&mut opts, DiagnosticMode::Disassemble)?,
                "debug" => opts.debug = true,
                other => return Err(UsageError(format!("Unrecognized switch: --{other}"))),
            }
            continue;
        }

        // Cluster scan: -lane is -l -a -n -e...
        let mut chars = arg[1..].chars().peekable();
        while let Some(switch) = chars.next() {
            let rest: String = chars.clone().collect();
            match switch {
                'e' | 'E' => {
                    let code = if rest.is_empty() {
                        queue
                            .pop_front()
                            .cloned()
                            .ok_or_else(|| UsageError("No code specified for -e".into()))?
                    } else {
                        rest
                    };
                    inline.push(code);
                    break;
                }
                'n' => opts.loop_lines = true,
                'p' => {
                    opts.loop_print = true;
                    opts.loop_lines = true;
                }
                'a' => {
                    opts.autosplit = true;
                    opts.loop_lines = true;
                }
                'F' => {
                    let pattern = if rest.is_empty() {
                        queue
                            .pop_front()
                            .cloned()
                            .ok_or_else(|| UsageError("No pattern specified for -F".into()))?
                    } else {
                        rest
                    };
                    opts.split_pattern = Some(pattern);
                    opts.autosplit = true;
                    opts.loop_lines = true;
                    break;
                }
                '0' => {
                    let digits: String = rest.chars().take_while(char::is_ascii_digit).collect();
                    // Bare -0 means a NUL separator; -00 selects paragraphs.
                    opts.record_sep = Some(if digits.is_empty() {
                        RecordSep::Byte(0)
                    } else {
                        RecordSep::from_octal(&digits)
                    });
                    for _ in 0..digits.len() {
                        chars.next();
                    }
                }
                'g' => opts.record_sep = Some(RecordSep::Slurp),
                'l' => {
                    let digits: String = rest.chars().take_while(char::is_ascii_digit).collect();
                    opts.line_endings = Some(if digits.is_empty() {
                        RecordSep::Default
                    } else {
                        RecordSep::from_octal(&digits)
                    });
                    for _ in 0..digits.len() {
                        chars.next();
                    }
                }
                'i' => {
                    opts.in_place = Some(rest);
                    break;
                }
                'I' => {
                    let dir = if rest.is_empty() {
                        queue
                            .pop_front()
                            .cloned()
                            .ok_or_else(|| UsageError("No directory specified for -I".into()))?
                    } else {
                        rest
                    };
                    opts.include_dirs.push(dir);
                    break;
                }
                'm' | 'M' => {
                    let spec = if rest.is_empty() {
                        queue
                            .pop_front()
                            .cloned()
                            .ok_or_else(|| UsageError(format!("No module specified for -{switch}")))?
                    } else {
                        rest
                    };
                    opts.module_imports.push(parse_module(&spec, switch == 'm'));
                    break;
                }
                'c' => opts.compile_only = true,
                'x' => {
                    opts.skip_leading = Some((!rest.is_empty()).then(|| rest.clone()));
                    if !rest.is_empty() {
                        break;
                    }
                }
                other => {
                    return Err(UsageError(format!("Unrecognized switch: -{other}")));
                }
            }
        }
    }

    if !inline.is_empty() {
        opts.program = Some(inline);
    } else if let Some(file) = queue.pop_front() {
        opts.program_file = Some(file.clone());
    }
    opts.args = queue.into_iter().cloned().collect();
    Ok(opts)
}

fn set_mode(opts: &mut Options, mode: DiagnosticMode) -> Result<(), UsageError> {
    if opts.mode != DiagnosticMode::Run {
        return Err(UsageError(
            "--tokenize, --parse, and --disassemble are mutually exclusive".into(),
        ));
    }
    opts.mode = mode;
    Ok(())
}

fn parse_module(spec: &str, bare: bool) -> ModuleImport {
    let (negated, spec) = match spec.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, spec),
    };
    match spec.split_once('=') {
        Some((module, imports)) => ModuleImport {
            negated,
            module: module.to_string(),
            imports: imports.split(',').map(str::to_string).collect(),
            bare,
        },
        None => ModuleImport {
            negated,
            module: spec.to_string(),
            imports: Vec::new(),
            bare,
        },
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Options {
        parse_args(&args.iter().map(|s| s.to_string()).collect::<Vec<_>>()).unwrap()
    }

    #[test]
    fn inline_program_repeats() {
        let opts = parse(&["-e", "print 1;", "-e", "print 2;"]);
        assert_eq!(opts.program, Some(vec!["print 1;".into(), "print 2;".into()]));
    }

    #[test]
    fn cluster_lane() {
        let opts = parse(&["-lane", "print"]);
        assert!(opts.loop_lines && opts.autosplit);
        assert_eq!(opts.line_endings, Some(RecordSep::Default));
        assert_eq!(opts.program, Some(vec!["print".into()]));
    }

    #[test]
    fn record_separators() {
        assert_eq!(parse(&["-0", "-e", "1"]).record_sep, Some(RecordSep::Byte(0)));
        assert_eq!(parse(&["-00", "-e", "1"]).record_sep, Some(RecordSep::Paragraph));
        assert_eq!(parse(&["-012", "-e", "1"]).record_sep, Some(RecordSep::Byte(0o12)));
        assert_eq!(parse(&["-0777", "-e", "1"]).record_sep, Some(RecordSep::Slurp));
        assert_eq!(parse(&["-g", "-e", "1"]).record_sep, Some(RecordSep::Slurp));
    }

    #[test]
    fn in_place_and_include() {
        let opts = parse(&["-i.bak", "-I", "lib", "-Ilocal", "-e", "1"]);
        assert_eq!(opts.in_place.as_deref(), Some(".bak"));
        assert_eq!(opts.include_dirs, vec!["lib".to_string(), "local".to_string()]);
    }

    #[test]
    fn module_imports() {
        let opts = parse(&["-Mstrict=vars,subs", "-m-warnings", "-e", "1"]);
        assert_eq!(opts.module_imports[0].module, "strict");
        assert_eq!(opts.module_imports[0].imports, vec!["vars", "subs"]);
        assert!(!opts.module_imports[0].negated);
        assert!(opts.module_imports[1].negated);
        assert!(opts.module_imports[1].bare);
    }

    #[test]
    fn program_file_and_args() {
        let opts = parse(&["-n", "script.pl", "a", "b"]);
        assert_eq!(opts.program_file.as_deref(), Some("script.pl"));
        assert_eq!(opts.args, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn double_dash_ends_switches() {
        let opts = parse(&["-e", "1", "--", "-not-a-switch"]);
        assert_eq!(opts.args, vec!["-not-a-switch".to_string()]);
    }

    #[test]
    fn diagnostics_exclusive() {
        let args: Vec<String> = ["--tokenize", "--parse", "-e", "1"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert!(parse_args(&args).is_err());
    }

    #[test]
    fn unknown_switch_is_usage_error() {
        let args: Vec<String> = ["-Z"].iter().map(|s| s.to_string()).collect();
        assert!(parse_args(&args).is_err());
    }
}
