//! `piglet-vm` — runs a Piglet binary program image.
//!
//! Exit code is 0 on `DONE`, non-zero on `ABORT` or any fatal error (bad
//! usage, malformed image, stack/memory fault, division by zero).

use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use piglet_core::Program;
use piglet_jit::JitEngine;
use piglet_vm::{ExitStatus, Interpreter, VmHost};

#[derive(Parser, Debug)]
#[command(name = "piglet-vm", version, about = "Run a Piglet program image")]
struct Cli {
    /// Path to a `.pvm` binary image.
    image: PathBuf,

    /// Increase log verbosity; repeat for more (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Run the plain interpreter instead of the block JIT.
    #[arg(long)]
    interpret_only: bool,
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    piglet_cli::init_with_verbosity(cli.verbose);

    let bytes = fs::read(&cli.image).with_context(|| format!("reading {}", cli.image.display()))?;
    let program = Program::from_bytes(&bytes).map_err(|e| anyhow::anyhow!("{e}"))?;

    // Boxed so its address is stable even though `host` the local binding
    // never itself moves again after this: the JIT engine embeds raw
    // pointers into its stack/memory/signal cells as compile-time
    // constants in generated code.
    let mut host = Box::new(VmHost::new());
    let outcome = if cli.interpret_only {
        Interpreter::run(&mut host, &program)
    } else {
        let mut engine = JitEngine::new(&mut host).map_err(|e| anyhow::anyhow!("{e}"))?;
        piglet_jit::run(&program, &mut host, &mut engine)
    };

    match outcome {
        Ok(ExitStatus::Done) => Ok(ExitCode::SUCCESS),
        Ok(ExitStatus::Aborted { offset }) => {
            eprintln!("program aborted at offset {offset}");
            Ok(ExitCode::FAILURE)
        }
        Err(err) => {
            eprintln!("fatal: {err}");
            Ok(ExitCode::FAILURE)
        }
    }
}
