use std::{fs, path::PathBuf, process};

use anyhow::Context;
use bfasm::{labels::Listing, Options};
use clap::{Parser, ValueEnum};

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Emit {
    Ast,
    Labels,
    Code,
    All,
}

/// Compile bfasm macro assembly to tape code
#[derive(Parser)]
#[command(name = "bfasm")]
struct Args {
    /// Source file
    file: PathBuf,

    /// Macro to start from
    #[arg(long, default_value = "main")]
    entry: String,

    /// Stage to print
    #[arg(long, value_enum, default_value_t = Emit::Code)]
    emit: Emit,

    /// Treat the file as label code and run only the allocator
    #[arg(long)]
    labels: bool,

    /// Log filter
    #[arg(long, default_value = "warn")]
    log_level: String,
}

fn run(args: &Args) -> anyhow::Result<()> {
    let src = fs::read_to_string(&args.file)
        .with_context(|| format!("could not read {}", args.file.display()))?;

    if args.labels {
        println!("{}", bfasm::compile_labels(&src)?);
        return Ok(());
    }

    let options = Options {
        entry: args.entry.clone(),
    };
    let artifacts = bfasm::build(&src, &options)?;

    if matches!(args.emit, Emit::Ast | Emit::All) {
        print!("{}", artifacts.unit);
    }
    if matches!(args.emit, Emit::Labels | Emit::All) {
        println!("{}", Listing(&artifacts.labels));
    }
    if matches!(args.emit, Emit::Code | Emit::All) {
        println!("{}", artifacts.code);
    }

    Ok(())
}

fn main() {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(args.log_level.as_str())
        .with_writer(std::io::stderr)
        .init();

    if let Err(err) = run(&args) {
        eprintln!("{:#}", err);
        process::exit(1);
    }
}
