//! Build manifests: the dependency graph a binary was built against.
//!
//! A manifest is either the host's own (compiled into this library by the
//! build script, see [`host_manifest`]) or one extracted from an artifact's
//! embedded build-info block (see [`extract`]). Both are read through the same
//! block format and record grammar.
mod block;
mod host;
mod parse;
mod sentinel;

pub use block::{extract, locate, render_block};
pub use host::{HOST_BUILD_INFO, host_manifest};
pub use parse::{ManifestParseError, ParseFailure, parse_records};
pub use sentinel::FRAME_LEN;

use core::fmt::{self, Display};

/// One node of a dependency graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyRef {
    /// Identifier of the dependency unit.
    pub path: String,
    /// The version the build resolved.
    pub version: String,
    /// Content checksum, when the build recorded one.
    pub checksum: Option<String>,
    /// The unit substituted for this one at build time.
    ///
    /// Only one level is modelled: a replacement never carries a replacement
    /// of its own.
    pub replacement: Option<Box<DependencyRef>>,
}

impl DependencyRef {
    pub fn new(path: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            version: version.into(),
            checksum: None,
            replacement: None,
        }
    }

    pub fn with_checksum(mut self, checksum: impl Into<String>) -> Self {
        self.checksum = Some(checksum.into());
        self
    }

    /// Attaches a replacement. Any replacement the given ref carries is dropped.
    pub fn replaced_by(mut self, mut replacement: DependencyRef) -> Self {
        replacement.replacement = None;
        self.replacement = Some(Box::new(replacement));
        self
    }

    /// The ref whose version is in effect: the replacement if present,
    /// otherwise this ref.
    #[inline]
    pub fn effective(&self) -> &DependencyRef {
        self.replacement.as_deref().unwrap_or(self)
    }
}

impl Display for DependencyRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.path, self.version)
    }
}

/// The full dependency graph embedded in a binary.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildManifest {
    /// The path of the main package the binary was built from.
    pub path: String,
    /// The main module.
    pub main: DependencyRef,
    /// Dependencies in record order.
    pub deps: Vec<DependencyRef>,
}

impl Default for DependencyRef {
    fn default() -> Self {
        Self::new("", "")
    }
}

impl BuildManifest {
    /// Looks up a dependency by path.
    pub fn dependency(&self, path: &str) -> Option<&DependencyRef> {
        self.deps.iter().find(|dep| dep.path == path)
    }

    /// Renders the manifest in the record grammar understood by
    /// [`parse_records`]. Every record is newline terminated.
    pub fn to_records(&self) -> String {
        self.to_string()
    }
}

fn write_entry(f: &mut fmt::Formatter<'_>, prefix: &str, dep: &DependencyRef) -> fmt::Result {
    write!(f, "{prefix}\t{}\t{}", dep.path, dep.version)?;
    if let Some(sum) = &dep.checksum {
        write!(f, "\t{sum}")?;
    }
    f.write_str("\n")?;
    if let Some(rep) = &dep.replacement {
        // a replace record always carries three fields
        writeln!(
            f,
            "=>\t{}\t{}\t{}",
            rep.path,
            rep.version,
            rep.checksum.as_deref().unwrap_or("")
        )?;
    }
    Ok(())
}

impl Display for BuildManifest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "path\t{}", self.path)?;
        write_entry(f, "mod", &self.main)?;
        for dep in &self.deps {
            write_entry(f, "dep", dep)?;
        }
        Ok(())
    }
}
