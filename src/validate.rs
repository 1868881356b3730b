//! Dependency compatibility between the host and an artifact.
//!
//! The check is advisory: a version drift is reported, never enforced here.
//! Whether to reject a drifting artifact is the caller's policy, see
//! [`LoaderConfig::strict_versions`](crate::LoaderConfig::strict_versions).
use crate::{
    Error, Result,
    manifest::{BuildManifest, DependencyRef},
};
use core::fmt::{self, Display};
use hashbrown::HashMap;

/// A dependency both sides know, resolved to different versions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionMismatch {
    /// Dependency path.
    pub path: String,
    /// Effective version in the host, comma separated when several are locked.
    pub have: String,
    /// Version the artifact was built against.
    pub want: String,
}

impl Display for VersionMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "dep {} mismatch have={} want={}",
            self.path, self.have, self.want
        )
    }
}

/// The non-blocking outcome of validating one artifact manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompatibilityReport {
    /// `path@version` of the artifact's main module.
    pub artifact: String,
    /// Every dependency whose version differs from the host's.
    pub mismatches: Vec<VersionMismatch>,
}

impl CompatibilityReport {
    /// Returns `true` when no dependency drifted.
    #[inline]
    pub fn is_compatible(&self) -> bool {
        self.mismatches.is_empty()
    }
}

/// Maps every host dependency path to the refs whose versions are in effect.
/// A lockfile may pin several versions of one package, so a path can map to
/// more than one ref. Only one level of replacement is followed.
fn effective_deps(host: &BuildManifest) -> HashMap<&str, Vec<&DependencyRef>> {
    let mut having: HashMap<&str, Vec<&DependencyRef>> = HashMap::new();
    for dep in &host.deps {
        having.entry(dep.path.as_str()).or_default().push(dep.effective());
    }
    having
}

/// Checks `artifact` against `host`.
///
/// A dependency matches when the host has it at the same version. When the
/// host carries several versions of one path, matching any of them is enough.
///
/// # Errors
/// [`Error::MissingDependency`] when the artifact needs a dependency the host
/// does not have at all. Version differences are returned in the report.
pub fn validate(host: &BuildManifest, artifact: &BuildManifest) -> Result<CompatibilityReport> {
    let having = effective_deps(host);
    let mut report = CompatibilityReport {
        artifact: artifact.main.to_string(),
        mismatches: Vec::new(),
    };
    for dep in &artifact.deps {
        let Some(have) = having.get(dep.path.as_str()) else {
            // the linker should already have failed on a truly absent dependency
            log::error!(
                "[Validate] {} requires {} which the host does not provide",
                report.artifact,
                dep
            );
            return Err(Error::MissingDependency {
                path: dep.path.clone(),
            });
        };
        if have.iter().all(|have| have.version != dep.version) {
            let mismatch = VersionMismatch {
                path: dep.path.clone(),
                have: have
                    .iter()
                    .map(|have| have.version.as_str())
                    .collect::<Vec<_>>()
                    .join(", "),
                want: dep.version.clone(),
            };
            log::warn!(
                "[Validate] version mismatch while validating {}: {}",
                report.artifact,
                mismatch
            );
            report.mismatches.push(mismatch);
        }
    }
    Ok(report)
}
