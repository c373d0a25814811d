//! `rperl` binary entry point.

use anyhow::Result;

fn main() -> Result<()> {
    let argv: Vec<String> = std::env::args().skip(1).collect();
    let code = perl_interp::run_with_io(
        &argv,
        Box::new(std::io::stdout()),
        Box::new(std::io::stderr()),
    );
    std::process::exit(code);
}
