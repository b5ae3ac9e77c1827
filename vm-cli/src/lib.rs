//! Library entry points behind the `c0vm` binary: argument parsing, file
//! I/O, and wiring `-d`/`-a`/`-r` to [`c0vm_asm`] and [`c0vm_core`].
//!
//! Split out of `main.rs` so integration tests can drive the same logic
//! `main` does without spawning a subprocess.

use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{ArgGroup, Parser};

/// Assemble, disassemble, or run a C0VM program.
#[derive(Debug, Parser)]
#[command(name = "c0vm", group(
    ArgGroup::new("mode").required(true).args(["disassemble", "assemble", "run"]),
))]
pub struct Args {
    /// Disassemble a binary program to a text listing.
    #[arg(short = 'd', long)]
    pub disassemble: bool,

    /// Assemble a text listing to a binary program.
    #[arg(short = 'a', long)]
    pub assemble: bool,

    /// Run a binary program.
    #[arg(short = 'r', long)]
    pub run: bool,

    /// Input file path.
    pub input: PathBuf,

    /// Output file path, or `-` for stdout.
    #[arg(default_value = "-")]
    pub output: PathBuf,
}

/// Which operation [`Args`] selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Disassemble,
    Assemble,
    Run,
}

impl Args {
    fn mode(&self) -> Mode {
        if self.disassemble {
            Mode::Disassemble
        } else if self.assemble {
            Mode::Assemble
        } else {
            Mode::Run
        }
    }
}

fn read_input(path: &PathBuf) -> Result<Vec<u8>> {
    fs::read(path).with_context(|| format!("reading input file {}", path.display()))
}

fn write_output(path: &PathBuf, bytes: &[u8]) -> Result<()> {
    if path.as_os_str() == "-" {
        io::stdout()
            .write_all(bytes)
            .context("writing output to stdout")
    } else {
        fs::write(path, bytes).with_context(|| format!("writing output file {}", path.display()))
    }
}

fn disassemble_command(args: &Args) -> Result<()> {
    let bytes = read_input(&args.input)?;
    let program = c0vm_asm::codec::decode(&bytes).context("decoding binary program")?;
    tracing::debug!(functions = program.functions.len(), "decoded binary program");
    let text = c0vm_asm::text::disassemble(&program);
    write_output(&args.output, text.as_bytes())
}

fn assemble_command(args: &Args) -> Result<()> {
    let bytes = read_input(&args.input)?;
    let text = String::from_utf8(bytes).context("input is not valid UTF-8 text")?;
    let program = c0vm_asm::text::assemble(&text).context("assembling text listing")?;
    tracing::debug!(functions = program.functions.len(), "assembled text listing");
    let encoded = c0vm_asm::codec::encode(&program);
    write_output(&args.output, &encoded)
}

/// Runs the program, reporting a runtime fault (if any) to `args.output`.
/// Process stdin/stdout remain the VM's own I/O channels regardless of
/// `--output`, per §5: `--output` on `-r` only redirects where a fault
/// report is printed.
fn run_command(args: &Args) -> Result<()> {
    let bytes = read_input(&args.input)?;
    let program = c0vm_asm::codec::decode(&bytes).context("decoding binary program")?;
    let mut interpreter = c0vm_core::Interpreter::new(&program).context("initializing interpreter")?;

    let stdin = io::stdin();
    let mut stdin_lock = stdin.lock();
    let stdout = io::stdout();
    let mut stdout_lock = stdout.lock();

    tracing::info!(input = %args.input.display(), "running program");
    if let Err(fault) = interpreter.run(&mut stdin_lock, &mut stdout_lock) {
        tracing::warn!(error = %fault.error, "program terminated with a runtime fault");
        let report = fault.to_string();
        write_output(&args.output, report.as_bytes())?;
    }
    Ok(())
}

/// Parse `argv`, dispatch to the selected mode, and return the process
/// exit code: `2` on an argument or I/O error, `0` otherwise. A runtime
/// fault in a `-r` run is reported but does not change the exit code —
/// §7 leaves exit-status policy to the host, and this host's policy is
/// "the VM ran; whether the program it ran faulted is orthogonal to
/// whether the CLI invocation itself succeeded".
pub fn run_cli<I, T>(argv: I) -> i32
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
{
    let args = match Args::try_parse_from(argv) {
        Ok(args) => args,
        Err(e) => {
            let _ = e.print();
            return 2;
        }
    };

    let result = match args.mode() {
        Mode::Disassemble => disassemble_command(&args),
        Mode::Assemble => assemble_command(&args),
        Mode::Run => run_command(&args),
    };

    match result {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("{e:#}");
            2
        }
    }
}
