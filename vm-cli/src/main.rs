//! `c0vm`: assemble, disassemble, or run a C0VM program.

use std::process::ExitCode;

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> ExitCode {
    init_tracing();
    let code = c0vm_cli::run_cli(std::env::args_os());
    ExitCode::from(code as u8)
}
