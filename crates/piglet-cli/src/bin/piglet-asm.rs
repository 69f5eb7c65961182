//! `piglet-asm` — assembles Piglet text source into a binary program image.

use std::fs;
use std::io::{self, Read};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "piglet-asm", version, about = "Assemble Piglet source into a .pvm image")]
struct Cli {
    /// Source file, or `-` to read from stdin.
    input: PathBuf,

    /// Output path. Defaults to the input's stem with a `.pvm` extension;
    /// `-` means "with input from stdin, write `out.pvm`".
    #[arg(short, long)]
    out: Option<PathBuf>,
}

fn main() -> Result<()> {
    piglet_cli::init();
    let cli = Cli::parse();

    let source = if cli.input == PathBuf::from("-") {
        let mut buf = String::new();
        io::stdin()
            .read_to_string(&mut buf)
            .context("reading source from stdin")?;
        buf
    } else {
        fs::read_to_string(&cli.input)
            .with_context(|| format!("reading {}", cli.input.display()))?
    };

    let program = piglet_asm::assemble(&source).map_err(|e| anyhow::anyhow!("{e}"))?;

    let out_path = cli.out.unwrap_or_else(|| default_output_path(&cli.input));
    fs::write(&out_path, program.to_bytes())
        .with_context(|| format!("writing {}", out_path.display()))?;

    eprintln!(
        "assembled {} word(s) -> {}",
        program.len(),
        out_path.display()
    );
    Ok(())
}

fn default_output_path(input: &PathBuf) -> PathBuf {
    if input == &PathBuf::from("-") {
        return PathBuf::from("out.pvm");
    }
    input.with_extension("pvm")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_output_path_replaces_extension() {
        assert_eq!(
            default_output_path(&PathBuf::from("program.pgasm")),
            PathBuf::from("program.pvm")
        );
    }

    #[test]
    fn default_output_path_for_stdin_is_out_pvm() {
        assert_eq!(default_output_path(&PathBuf::from("-")), PathBuf::from("out.pvm"));
    }
}
