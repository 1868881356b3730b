use core::fmt::Display;
use std::borrow::Cow;

/// Errors raised by [`ElfLinker`](super::ElfLinker) while reading, linking or
/// mapping artifacts.
#[derive(Debug)]
pub enum ElfError {
    /// An artifact could not be read from disk.
    Io {
        /// The artifact being read.
        path: String,
        /// The underlying failure.
        source: std::io::Error,
    },

    /// An error occurred during memory mapping operations.
    ///
    /// This typically means one of:
    /// * the anonymous region could not be reserved
    /// * a protection change was refused
    Mmap {
        /// A descriptive message about the memory mapping error.
        msg: Cow<'static, str>,
    },

    /// An object file is not a well-formed relocatable ELF for this machine.
    ParseObject {
        /// A descriptive message about the parsing error.
        msg: Cow<'static, str>,
    },

    /// An `ar` archive could not be walked.
    ParseArchive {
        /// A descriptive message about the archive error.
        msg: Cow<'static, str>,
    },

    /// A relocation could not be applied.
    ///
    /// This error typically indicates:
    /// * an undefined strong symbol
    /// * a displacement that does not fit its field
    Relocation {
        /// A descriptive message about the relocation error.
        msg: Cow<'static, str>,
    },

    /// The artifacts use a feature this linker does not implement.
    Unsupported {
        /// What was encountered.
        msg: Cow<'static, str>,
    },
}

impl Display for ElfError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ElfError::Io { path, source } => write!(f, "I/O error reading {path}: {source}"),
            ElfError::Mmap { msg } => write!(f, "Memory mapping error: {msg}"),
            ElfError::ParseObject { msg } => write!(f, "Object parsing error: {msg}"),
            ElfError::ParseArchive { msg } => write!(f, "Archive parsing error: {msg}"),
            ElfError::Relocation { msg } => write!(f, "Relocation error: {msg}"),
            ElfError::Unsupported { msg } => write!(f, "Unsupported: {msg}"),
        }
    }
}

impl std::error::Error for ElfError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ElfError::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

#[cold]
#[inline(never)]
pub(crate) fn io_error(path: impl Into<String>, source: std::io::Error) -> ElfError {
    ElfError::Io {
        path: path.into(),
        source,
    }
}

#[cold]
#[inline(never)]
pub(crate) fn mmap_error(msg: impl Into<Cow<'static, str>>) -> ElfError {
    ElfError::Mmap { msg: msg.into() }
}

#[cold]
#[inline(never)]
pub(crate) fn parse_object_error(msg: impl Into<Cow<'static, str>>) -> ElfError {
    ElfError::ParseObject { msg: msg.into() }
}

#[cold]
#[inline(never)]
pub(crate) fn parse_archive_error(msg: impl Into<Cow<'static, str>>) -> ElfError {
    ElfError::ParseArchive { msg: msg.into() }
}

/// Creates a relocation error with the specified message.
#[cold]
#[inline(never)]
pub(crate) fn relocate_error(msg: impl Into<Cow<'static, str>>) -> ElfError {
    ElfError::Relocation { msg: msg.into() }
}

#[cold]
#[inline(never)]
pub(crate) fn unsupported_error(msg: impl Into<Cow<'static, str>>) -> ElfError {
    ElfError::Unsupported { msg: msg.into() }
}
