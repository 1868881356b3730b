use crate::{manifest::ManifestParseError, validate::VersionMismatch};
use std::{borrow::Cow, path::PathBuf};

/// Boxed error produced by code on the far side of a boundary (the linker
/// service or a loaded capability).
pub type BoxedError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Error types used throughout the `hotload` library.
///
/// Artifact-level metadata problems never show up here during a normal load:
/// they are collected into the [`LoadReport`](crate::LoadReport) instead. The
/// variants below abort the operation that produced them.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The artifact directory could not be read.
    #[error("failed to read artifact directory {}: {source}", path.display())]
    Discovery {
        /// The directory that was being enumerated.
        path: PathBuf,
        /// The underlying I/O failure.
        source: std::io::Error,
    },

    /// An embedded build-info block was found but its records are malformed.
    #[error("malformed build info in {artifact}: {source}")]
    ManifestParse {
        /// The artifact the block came from.
        artifact: Cow<'static, str>,
        /// What was wrong with the records.
        source: ManifestParseError,
    },

    /// The build record compiled into this process is malformed.
    #[error("host build info is malformed: {source}")]
    HostManifest {
        /// What was wrong with the records.
        source: ManifestParseError,
    },

    /// An artifact requires a dependency the host was not built with.
    ///
    /// The linker should already refuse such an artifact, so seeing this means
    /// the validator and the linker disagree about the dependency graph.
    #[error("missing dependency: {path}")]
    MissingDependency {
        /// Path of the dependency unknown to the host.
        path: String,
    },

    /// Dependency versions differ and strict version checking is enabled.
    #[error(
        "version mismatch while validating {artifact}: {} dependencies differ from the host",
        mismatches.len()
    )]
    VersionMismatch {
        /// `path@version` of the artifact's main module.
        artifact: String,
        /// Every mismatching dependency.
        mismatches: Vec<VersionMismatch>,
    },

    /// The linker service failed to read, link or map the artifacts.
    #[error("failed to dynamically link artifacts: {source}")]
    Link {
        /// The linker service's own error.
        source: BoxedError,
    },

    /// The constructor symbol is absent from the module or resolves to zero.
    #[error("symbol not found: {name}")]
    SymbolNotFound {
        /// The symbol that was looked up.
        name: Cow<'static, str>,
    },

    /// A capability call was made while no module is loaded.
    #[error("no implementation loaded")]
    NotLoaded,

    /// The operation is not valid in the manager's current state.
    #[error("invalid module state: {msg}")]
    State {
        /// A description of the rejected transition.
        msg: Cow<'static, str>,
    },

    /// The loaded implementation reported a failure.
    #[error("failed to process input: {source}")]
    Capability {
        /// The implementation's own error.
        source: BoxedError,
    },

    /// Writing the result failed.
    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
}

impl Error {
    /// Returns `true` for errors that leave a previously loaded module usable.
    pub fn is_call_local(&self) -> bool {
        matches!(self, Error::NotLoaded | Error::Capability { .. })
    }
}

#[cold]
#[inline(never)]
pub(crate) fn discovery_error(path: impl Into<PathBuf>, source: std::io::Error) -> Error {
    Error::Discovery {
        path: path.into(),
        source,
    }
}

#[cold]
#[inline(never)]
pub(crate) fn link_error(source: impl Into<BoxedError>) -> Error {
    Error::Link {
        source: source.into(),
    }
}

#[cold]
#[inline(never)]
pub(crate) fn symbol_not_found(name: impl Into<Cow<'static, str>>) -> Error {
    Error::SymbolNotFound { name: name.into() }
}

#[cold]
#[inline(never)]
pub(crate) fn state_error(msg: impl Into<Cow<'static, str>>) -> Error {
    Error::State { msg: msg.into() }
}

#[cold]
#[inline(never)]
pub(crate) fn capability_error(source: BoxedError) -> Error {
    Error::Capability { source }
}
