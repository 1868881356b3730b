//! The process entry boundary, minus argument parsing.
use crate::{
    LoaderConfig, Result, discover,
    linker::LinkerService,
    module::{LoadReport, ModuleManager},
};
use std::{io::Write, path::PathBuf};

/// Input used when the caller gives none.
pub const DEFAULT_INPUT: &str = "default test stuff";

/// What to load and what to feed it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunArgs {
    pub dir: PathBuf,
    pub input: Option<String>,
}

impl RunArgs {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            input: None,
        }
    }

    pub fn input(mut self, input: impl Into<String>) -> Self {
        self.input = Some(input.into());
        self
    }

    #[inline]
    pub fn input_or_default(&self) -> &str {
        self.input.as_deref().unwrap_or(DEFAULT_INPUT)
    }
}

/// Discovers the artifacts in `args.dir`, loads them, runs the capability
/// once on the input and writes its output line to `out`.
///
/// The module is unloaded before anything is written, and nothing is written
/// unless every step succeeded.
pub fn run<L, W>(
    linker: L,
    args: &RunArgs,
    config: &LoaderConfig,
    out: &mut W,
) -> Result<LoadReport>
where
    L: LinkerService + Send + Sync + 'static,
    W: Write + ?Sized,
{
    let artifacts = discover(&args.dir)?;
    let mut manager = ModuleManager::with_config(linker, config.clone());
    let report = manager.load(&artifacts)?;
    let output = manager.process(args.input_or_default())?;
    manager.unload();
    writeln!(out, "{output}")?;
    Ok(report)
}
