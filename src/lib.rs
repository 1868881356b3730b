//! # hotload
//! Load precompiled relocatable artifacts into a running process and call into
//! them through a typed capability, without restarting.
//! ## Usage
//! A directory of `.o` and `.a` artifacts is discovered, every artifact's
//! embedded build-info block is checked against the host's own dependency
//! graph, the artifacts are linked into the process by a [`LinkerService`],
//! and the well-known constructor symbol is called to obtain a
//! [`Capability`]. Unloading releases the capability and then the module's
//! memory; [`CapabilityHandle`]s report [`Error::NotLoaded`] from then on.
//! ## Example
//! ```no_run
//! use hotload::{LoaderConfig, ModuleManager, discover, linker::elf::ElfLinker};
//!
//! let artifacts = discover("plugins").unwrap();
//! let mut manager = ModuleManager::with_config(ElfLinker::new(), LoaderConfig::default());
//! let report = manager.load(&artifacts).unwrap();
//! for mismatch in report.mismatches() {
//!     eprintln!("{mismatch}");
//! }
//! let handle = manager.handle().unwrap();
//! println!("{}", handle.process("hello").unwrap());
//! manager.unload();
//! assert!(handle.process("hello").is_err());
//! ```
//! ## Safety
//! Loaded code runs with the full privileges of the host. The constructor
//! symbol is trusted to have the [`Constructor`] signature; an artifact that
//! exports something else under that name is undefined behavior.
mod bridge;
mod config;
mod discovery;
mod error;
pub mod entry;
pub mod linker;
mod macros;
pub mod manifest;
mod module;
pub mod validate;

pub(crate) use error::{capability_error, discovery_error, link_error, state_error, symbol_not_found};

pub use bridge::{Capability, CapabilityHandle, CapabilityResult, Constructor, resolve_constructor};
pub use config::{DEFAULT_CONSTRUCTOR_SYMBOL, LoaderConfig};
pub use discovery::{ARCHIVE_EXTENSION, ArtifactSet, OBJECT_EXTENSION, discover};
pub use error::{BoxedError, Error};
pub use linker::{LinkerService, SymbolRegistry, SymbolTable};
pub use module::{ArtifactReport, LoadReport, ManifestStatus, ModuleManager, ModuleState};

/// A type alias for `Result`s returned by `hotload` functions.
pub type Result<T> = core::result::Result<T, Error>;
