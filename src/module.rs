//! The module lifecycle: `Unloaded -> Linking -> Loaded -> Unloaded`.
use crate::{
    ArtifactSet, Error, LoaderConfig, Result,
    bridge::{CapabilityHandle, LiveModule, resolve_constructor},
    link_error,
    linker::LinkerService,
    manifest::{BuildManifest, ManifestParseError, extract, host_manifest},
    state_error,
    validate::{CompatibilityReport, VersionMismatch, validate},
};
use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

/// Where a [`ModuleManager`] is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleState {
    /// Nothing is mapped. A load may start.
    Unloaded,
    /// A load is running inside the linker service.
    Linking,
    /// A module is mapped and its capability is cached.
    Loaded,
}

/// What the metadata check found in one artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManifestStatus {
    /// The artifact carries no build-info block. Validation was skipped.
    Absent,
    /// A block was found but could not be parsed; treated as absent.
    Malformed(ManifestParseError),
    /// The artifact could not be read for inspection.
    Unreadable(String),
    /// The manifest was validated against the host.
    Checked(CompatibilityReport),
}

/// The metadata check of one artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactReport {
    pub path: PathBuf,
    pub status: ManifestStatus,
}

/// The advisory outcome of a successful [`ModuleManager::load`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    /// One entry per artifact, in load order.
    pub artifacts: Vec<ArtifactReport>,
}

impl LoadReport {
    /// Every version drift found, across all artifacts.
    pub fn mismatches(&self) -> impl Iterator<Item = &VersionMismatch> {
        self.artifacts
            .iter()
            .filter_map(|artifact| match &artifact.status {
                ManifestStatus::Checked(report) => Some(report),
                _ => None,
            })
            .flat_map(|report| &report.mismatches)
    }

    /// Returns `true` when no artifact drifted from the host.
    pub fn is_compatible(&self) -> bool {
        self.mismatches().next().is_none()
    }

    /// Artifacts whose build-info block was malformed.
    pub fn malformed(&self) -> impl Iterator<Item = (&Path, &ManifestParseError)> {
        self.artifacts
            .iter()
            .filter_map(|artifact| match &artifact.status {
                ManifestStatus::Malformed(err) => Some((artifact.path.as_path(), err)),
                _ => None,
            })
    }
}

fn check_artifact(path: &Path, host: &BuildManifest) -> Result<ArtifactReport> {
    let status = match fs::read(path) {
        Err(err) => {
            log::warn!("[Manifest] cannot inspect {}: {err}", path.display());
            ManifestStatus::Unreadable(err.to_string())
        }
        Ok(data) => match extract(&data) {
            Ok(None) => {
                log::debug!("[Manifest] {}: no build info", path.display());
                ManifestStatus::Absent
            }
            Ok(Some(manifest)) => {
                log::debug!(
                    "[Manifest] {}: {} with {} dependencies",
                    path.display(),
                    manifest.main,
                    manifest.deps.len()
                );
                ManifestStatus::Checked(validate(host, &manifest)?)
            }
            Err(source) => {
                let err = Error::ManifestParse {
                    artifact: path.display().to_string().into(),
                    source: source.clone(),
                };
                log::warn!("[Manifest] {err}");
                ManifestStatus::Malformed(source)
            }
        },
    };
    Ok(ArtifactReport {
        path: path.to_owned(),
        status,
    })
}

/// Owns at most one loaded module and the capability built from it.
///
/// Not meant for concurrent `load` calls; the `&mut self` receivers enforce
/// that. Capability calls through [`CapabilityHandle`]s may come from any
/// thread.
pub struct ModuleManager<L: LinkerService> {
    linker: Arc<L>,
    config: LoaderConfig,
    state: ModuleState,
    module: Option<Arc<LiveModule>>,
}

impl<L: LinkerService> ModuleManager<L> {
    #[inline]
    pub fn state(&self) -> ModuleState {
        self.state
    }

    #[inline]
    pub fn is_loaded(&self) -> bool {
        self.state == ModuleState::Loaded
    }

    #[inline]
    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    #[inline]
    pub fn linker(&self) -> &L {
        &self.linker
    }

    /// Releases the capability, then the module's memory.
    ///
    /// A no-op when nothing is loaded. Handles obtained earlier report
    /// [`Error::NotLoaded`] afterwards.
    pub fn unload(&mut self) {
        let Some(module) = self.module.take() else {
            self.state = ModuleState::Unloaded;
            return;
        };
        if Arc::strong_count(&module) > 1 {
            log::debug!("[Unload] a call is in flight, memory is released when it returns");
        }
        drop(module);
        self.state = ModuleState::Unloaded;
        log::info!("[Unload] module unloaded");
    }

    /// A handle to the cached capability.
    ///
    /// # Errors
    /// [`Error::NotLoaded`] unless a module is loaded.
    pub fn handle(&self) -> Result<CapabilityHandle> {
        self.module
            .as_ref()
            .map(CapabilityHandle::new)
            .ok_or(Error::NotLoaded)
    }

    /// Forwards `input` to the cached capability.
    pub fn process(&self, input: &str) -> Result<String> {
        self.module
            .as_ref()
            .ok_or(Error::NotLoaded)?
            .process(input)
    }

    /// The address of an exported symbol of the loaded module.
    pub fn symbol(&self, name: &str) -> Option<usize> {
        self.module.as_ref()?.symbols().get(name)
    }
}

impl<L> ModuleManager<L>
where
    L: LinkerService + Send + Sync + 'static,
{
    pub fn new(linker: L) -> Self {
        Self::with_config(linker, LoaderConfig::default())
    }

    pub fn with_config(linker: L, config: LoaderConfig) -> Self {
        Self {
            linker: Arc::new(linker),
            config,
            state: ModuleState::Unloaded,
            module: None,
        }
    }

    /// Loads `artifacts` as one module and builds its capability.
    ///
    /// Every artifact's build-info block is checked against the host first.
    /// Missing or malformed blocks and version drift are reported, not fatal,
    /// unless [`LoaderConfig::strict_versions`] is set.
    ///
    /// # Errors
    /// * [`Error::State`] if a module is already loaded.
    /// * [`Error::MissingDependency`] if an artifact needs a dependency the
    ///   host lacks.
    /// * [`Error::VersionMismatch`] in strict mode.
    /// * [`Error::Link`] if the linker service fails.
    /// * [`Error::SymbolNotFound`] if the constructor is missing. The module
    ///   is unmapped again.
    ///
    /// The manager is `Unloaded` after any error.
    pub fn load(&mut self, artifacts: &ArtifactSet) -> Result<LoadReport> {
        if self.state != ModuleState::Unloaded {
            return Err(state_error("load called while a module is loaded"));
        }
        if artifacts.is_empty() {
            log::warn!("[Load] no artifacts to load");
        }

        let host = host_manifest()?;
        let mut report = LoadReport::default();
        for path in artifacts {
            report.artifacts.push(check_artifact(path, host)?);
        }
        if self.config.strict_versions {
            for artifact in &report.artifacts {
                if let ManifestStatus::Checked(checked) = &artifact.status
                    && !checked.is_compatible()
                {
                    return Err(Error::VersionMismatch {
                        artifact: checked.artifact.clone(),
                        mismatches: checked.mismatches.clone(),
                    });
                }
            }
        }

        let linking = Linking::enter(&mut self.state);
        let module = link(&self.linker, &self.config, artifacts)?;
        linking.loaded();
        self.module = Some(Arc::new(module));
        log::info!("[Load] loaded {} artifacts", artifacts.len());
        Ok(report)
    }
}

fn link<L>(linker: &Arc<L>, config: &LoaderConfig, artifacts: &ArtifactSet) -> Result<LiveModule>
where
    L: LinkerService + Send + Sync + 'static,
{
    let registry = linker.register_host_symbols().map_err(link_error)?;
    let unit = linker.read_artifacts(artifacts.paths()).map_err(link_error)?;
    let (symbols, memory) = linker.link_and_map(unit, &registry).map_err(link_error)?;
    log::debug!("[Load] module exports {} symbols", symbols.len());
    let mapped = MappedMemory {
        linker: Arc::clone(linker),
        memory: Some(memory),
    };

    let symbol = config.symbol();
    let ctor = match unsafe { resolve_constructor(&symbols, symbol) } {
        Ok(ctor) => ctor,
        Err(err) => {
            log::warn!("[Load] {symbol} not exported, unmapping module");
            return Err(err);
        }
    };
    // an unwinding constructor drops `mapped` and unmaps the module
    let capability = ctor();
    log::debug!("[Bridge] capability constructed");

    Ok(LiveModule::new(
        capability,
        symbols,
        Box::new(move || drop(mapped)),
    ))
}

/// Marks a manager `Linking` for the duration of a load. Unless the load
/// reaches [`Linking::loaded`], the manager falls back to `Unloaded`, also
/// when the load unwinds.
struct Linking<'a> {
    state: &'a mut ModuleState,
}

impl<'a> Linking<'a> {
    fn enter(state: &'a mut ModuleState) -> Self {
        *state = ModuleState::Linking;
        Self { state }
    }

    fn loaded(self) {
        *self.state = ModuleState::Loaded;
    }
}

impl Drop for Linking<'_> {
    fn drop(&mut self) {
        if *self.state == ModuleState::Linking {
            *self.state = ModuleState::Unloaded;
        }
    }
}

/// A module's memory, handed back to its linker service when dropped.
struct MappedMemory<L: LinkerService> {
    linker: Arc<L>,
    memory: Option<L::Memory>,
}

impl<L: LinkerService> Drop for MappedMemory<L> {
    fn drop(&mut self) {
        if let Some(memory) = self.memory.take() {
            self.linker.unmap(memory);
        }
    }
}

impl<L: LinkerService> Drop for ModuleManager<L> {
    fn drop(&mut self) {
        self.unload();
    }
}

impl<L: LinkerService> core::fmt::Debug for ModuleManager<L> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ModuleManager")
            .field("state", &self.state)
            .field("config", &self.config)
            .finish()
    }
}
