use super::{BuildManifest, DependencyRef, extract};
use crate::{Error, Result};
use once_cell::sync::OnceCell;

/// The build-info block describing the dependency graph this library was
/// compiled in, rendered by the build script from `Cargo.lock`.
pub const HOST_BUILD_INFO: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/build_info.bin"));

// Keeps one copy of the block in every binary that links this crate, so the
// binary itself can be inspected with `extract`.
#[used]
static HOST_BLOCK: &[u8] = HOST_BUILD_INFO;

static HOST_MANIFEST: OnceCell<BuildManifest> = OnceCell::new();

/// Returns the host's own build manifest.
///
/// The record is parsed on first use and cached for the rest of the process.
/// A host built without a lockfile gets a manifest with no dependencies.
pub fn host_manifest() -> Result<&'static BuildManifest> {
    HOST_MANIFEST.get_or_try_init(|| match extract(HOST_BLOCK) {
        Ok(Some(manifest)) => {
            log::debug!(
                "[Manifest] host build info: {} with {} dependencies",
                manifest.main,
                manifest.deps.len()
            );
            Ok(manifest)
        }
        Ok(None) => Ok(BuildManifest {
            path: env!("CARGO_PKG_NAME").into(),
            main: DependencyRef::new(env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION")),
            deps: Vec::new(),
        }),
        Err(source) => Err(Error::HostManifest { source }),
    })
}
