//! hotload - link a directory of artifacts into this process and run their
//! capability once.

use anyhow::{Context, Result};
use clap::Parser;
use hotload::{
    DEFAULT_CONSTRUCTOR_SYMBOL, LoaderConfig,
    entry::{self, DEFAULT_INPUT, RunArgs},
    linker::elf::ElfLinker,
};
use std::{io, path::PathBuf};

#[derive(Debug, Parser)]
#[command(name = "hotload", version, about)]
struct Cli {
    /// Directory holding the `.o` and `.a` artifacts to load
    dir: PathBuf,

    /// Input handed to the capability
    #[arg(default_value = DEFAULT_INPUT)]
    input: String,

    /// Refuse artifacts whose dependency versions differ from this binary's
    #[arg(long, env = "HOTLOAD_STRICT")]
    strict: bool,

    /// Constructor symbol to look up in the loaded module
    #[arg(long, value_name = "NAME", default_value = DEFAULT_CONSTRUCTOR_SYMBOL)]
    symbol: String,

    /// Log what the loader is doing
    #[arg(short, long)]
    verbose: bool,
}

fn main() {
    if let Err(e) = run() {
        eprintln!("error: {:#}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp(None)
        .init();

    let config = LoaderConfig::new()
        .constructor_symbol(cli.symbol)
        .strict_versions(cli.strict);
    let args = RunArgs::new(&cli.dir).input(cli.input);

    let mut stdout = io::stdout().lock();
    let report = entry::run(ElfLinker::new(), &args, &config, &mut stdout)
        .with_context(|| format!("failed to run artifacts in {}", cli.dir.display()))?;

    let mismatches = report.mismatches().count();
    if mismatches != 0 {
        log::info!("loaded despite {mismatches} dependency version mismatches");
    }
    Ok(())
}
