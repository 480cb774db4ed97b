use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;

/// Extract DWARF debugging information into a JSON document.
#[derive(Debug, Parser)]
#[command(name = "dwex", version)]
struct Cli {
    /// Path of the binary to extract
    file: String,

    /// Write the document to a file instead of stdout
    #[arg(short, long, value_name = "PATH")]
    output: Option<PathBuf>,

    /// Emit unevaluated location bytecode instead of evaluated descriptions
    #[arg(long)]
    raw: bool,

    /// Suppress trivial single-opcode location expressions
    #[arg(long = "complex-only")]
    complex_only: bool,

    /// Attach per-FDE unwind tables
    #[arg(long = "frame-info")]
    frame_info: bool,

    /// Emit only unit-level structural metadata without traversing children
    #[arg(long = "no-traverse")]
    no_traverse: bool,

    /// Single-line JSON instead of pretty-printed
    #[arg(long)]
    compact: bool,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let options = dwex::Options {
        raw_expressions: cli.raw,
        complex_only: cli.complex_only,
        frame_info: cli.frame_info,
        no_traverse: cli.no_traverse,
    };

    dwex::File::parse(&cli.file, |file| {
        let document = dwex::document(file, &options);
        let rendered = if cli.compact {
            serde_json::to_string(&document)
        } else {
            serde_json::to_string_pretty(&document)
        }
        .expect("document serialization cannot fail");

        match &cli.output {
            Some(path) => fs::write(path, rendered.as_bytes())?,
            None => {
                let stdout = io::stdout();
                let mut stdout = stdout.lock();
                stdout.write_all(rendered.as_bytes())?;
                stdout.write_all(b"\n")?;
            }
        }
        Ok(())
    })
    .with_context(|| format!("failed to extract {}", cli.file))
}
