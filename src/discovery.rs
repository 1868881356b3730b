//! Artifact discovery: which files in a directory get handed to the linker.
use crate::{Result, discovery_error};
use std::{
    fs, io,
    path::{Path, PathBuf},
};

/// Extension of archive artifacts (`ar` groups of objects).
pub const ARCHIVE_EXTENSION: &str = "a";
/// Extension of loose relocatable object artifacts.
pub const OBJECT_EXTENSION: &str = "o";

/// An ordered list of artifact paths, rebuilt on every load attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArtifactSet {
    paths: Vec<PathBuf>,
}

impl ArtifactSet {
    pub fn new(paths: Vec<PathBuf>) -> Self {
        Self { paths }
    }

    #[inline]
    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.paths.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn iter(&self) -> core::slice::Iter<'_, PathBuf> {
        self.paths.iter()
    }
}

impl FromIterator<PathBuf> for ArtifactSet {
    fn from_iter<T: IntoIterator<Item = PathBuf>>(iter: T) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a ArtifactSet {
    type Item = &'a PathBuf;
    type IntoIter = core::slice::Iter<'a, PathBuf>;

    fn into_iter(self) -> Self::IntoIter {
        self.paths.iter()
    }
}

fn glob_artifacts(dir: &Path, ext: &str) -> Result<Vec<PathBuf>> {
    let pattern = format!(
        "{}/*.{ext}",
        glob::Pattern::escape(&dir.to_string_lossy())
    );
    let entries = glob::glob(&pattern).map_err(|err| {
        discovery_error(dir, io::Error::new(io::ErrorKind::InvalidInput, err))
    })?;
    let mut paths = Vec::new();
    for entry in entries {
        let path = entry.map_err(|err| discovery_error(dir, err.into_error()))?;
        if path.is_file() {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}

/// Lists the artifacts in `dir`: archives first, then loose objects, each
/// group in lexical order. Subdirectories are not searched.
///
/// # Errors
/// [`Error::Discovery`](crate::Error::Discovery) if the directory cannot be read.
pub fn discover(dir: impl AsRef<Path>) -> Result<ArtifactSet> {
    let dir = dir.as_ref();
    // glob reports an unreadable directory as an empty match
    fs::read_dir(dir).map_err(|err| discovery_error(dir, err))?;
    let archives = glob_artifacts(dir, ARCHIVE_EXTENSION)?;
    let objects = glob_artifacts(dir, OBJECT_EXTENSION)?;
    log::debug!(
        "[Discover] {}: {} archives, {} objects",
        dir.display(),
        archives.len(),
        objects.len()
    );
    Ok(archives.into_iter().chain(objects).collect())
}
