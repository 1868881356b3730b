//! The linker-service boundary.
//!
//! The lifecycle manager never relocates code itself. It drives an
//! implementation of [`LinkerService`] through four synchronous, fallible
//! steps and keeps whatever opaque memory token the service hands back until
//! the module is unloaded. Tests substitute a fake service that returns canned
//! symbol tables; [`elf::ElfLinker`] is the real in-process implementation.
#[cfg(unix)]
pub mod elf;

use hashbrown::HashMap;
use std::path::PathBuf;

/// A fallback used by [`SymbolRegistry`] for names it has no entry for.
pub type SymbolLookupFn = fn(&str) -> Option<usize>;

/// Host symbols that loaded artifacts may reference.
#[derive(Default, Clone)]
pub struct SymbolRegistry {
    symbols: HashMap<String, usize>,
    fallback: Option<SymbolLookupFn>,
}

impl SymbolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `name` at `addr`, replacing any previous address.
    pub fn insert(&mut self, name: impl Into<String>, addr: usize) -> Option<usize> {
        self.symbols.insert(name.into(), addr)
    }

    /// Sets the lookup consulted for names without an explicit entry.
    pub fn with_fallback(mut self, fallback: SymbolLookupFn) -> Self {
        self.fallback = Some(fallback);
        self
    }

    /// Resolves `name`, explicit entries first.
    pub fn lookup(&self, name: &str) -> Option<usize> {
        self.symbols
            .get(name)
            .copied()
            .or_else(|| self.fallback.and_then(|find| find(name)))
    }

    /// Number of explicit entries.
    #[inline]
    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}

impl core::fmt::Debug for SymbolRegistry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SymbolRegistry")
            .field("symbols", &self.symbols.len())
            .field("fallback", &self.fallback.is_some())
            .finish()
    }
}

/// Symbols exported by a linked module, by name, with absolute addresses.
#[derive(Debug, Default, Clone)]
pub struct SymbolTable {
    symbols: HashMap<String, usize>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, addr: usize) -> Option<usize> {
        self.symbols.insert(name.into(), addr)
    }

    /// Gets the address of `name`.
    #[inline]
    pub fn get(&self, name: &str) -> Option<usize> {
        self.symbols.get(name).copied()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, usize)> {
        self.symbols.iter().map(|(name, addr)| (name.as_str(), *addr))
    }
}

impl<S: Into<String>> FromIterator<(S, usize)> for SymbolTable {
    fn from_iter<T: IntoIterator<Item = (S, usize)>>(iter: T) -> Self {
        Self {
            symbols: iter
                .into_iter()
                .map(|(name, addr)| (name.into(), addr))
                .collect(),
        }
    }
}

/// The external engine that maps artifact code into the process.
///
/// Every method runs inline on the caller's thread. A hang inside the
/// service cannot be interrupted by the caller.
pub trait LinkerService {
    /// Artifacts read and parsed, ready to be linked.
    type Unit;

    /// Ownership token for the mapped code and data of one module.
    type Memory: Send + Sync + 'static;

    /// The service's failure type, carried as the source of
    /// [`Error::Link`](crate::Error::Link).
    type Error: std::error::Error + Send + Sync + 'static;

    /// Collects the host symbols artifacts may link against.
    fn register_host_symbols(&self) -> Result<SymbolRegistry, Self::Error>;

    /// Reads every artifact into one link unit.
    fn read_artifacts(&self, paths: &[PathBuf]) -> Result<Self::Unit, Self::Error>;

    /// Relocates the unit against itself and `registry` and maps it.
    fn link_and_map(
        &self,
        unit: Self::Unit,
        registry: &SymbolRegistry,
    ) -> Result<(SymbolTable, Self::Memory), Self::Error>;

    /// Releases a module's memory. Nothing may run inside it afterwards.
    fn unmap(&self, memory: Self::Memory);
}
