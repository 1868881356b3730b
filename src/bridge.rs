//! The typed side of the artifact boundary.
//!
//! A loaded module exports one constructor symbol. Its address is
//! reinterpreted as a [`Constructor`], called once per load, and the
//! capability it returns is cached next to the module's memory. Callers reach
//! the capability through a [`CapabilityHandle`], which stops working the
//! moment the module is unloaded.
use crate::{
    BoxedError, Error, Result, capability_error, linker::SymbolTable, symbol_not_found,
};
use std::sync::{Arc, Weak};

/// What [`Capability::process`] returns.
pub type CapabilityResult = core::result::Result<String, BoxedError>;

/// The contract every artifact implements.
///
/// Calls may arrive from several threads at once. Serializing them, if the
/// implementation needs it, is up to the implementation.
pub trait Capability: Send + Sync {
    /// Transforms `input` into an output string.
    fn process(&self, input: &str) -> CapabilityResult;
}

/// The signature of the constructor symbol an artifact exports.
///
/// Artifacts built with [`export_capability!`](crate::export_capability)
/// against the same `hotload` version and toolchain as the host export exactly
/// this. Anything else is undefined behavior once called.
pub type Constructor = fn() -> Box<dyn Capability>;

/// Looks `name` up in `symbols` and reinterprets its address as a
/// [`Constructor`].
///
/// # Errors
/// [`Error::SymbolNotFound`] if the name is absent or maps to address zero.
///
/// # Safety
/// The symbol must be a function with the [`Constructor`] signature, compiled
/// for the host's `Capability` layout, and its memory must stay mapped for as
/// long as the returned pointer or anything it returns is used.
pub unsafe fn resolve_constructor(symbols: &SymbolTable, name: &str) -> Result<Constructor> {
    match symbols.get(name) {
        None | Some(0) => Err(symbol_not_found(name.to_owned())),
        Some(addr) => {
            log::debug!("[Bridge] constructor {name} at {addr:#x}");
            Ok(unsafe { core::mem::transmute::<usize, Constructor>(addr) })
        }
    }
}

/// The part of a loaded module the bridge shares with handles.
///
/// The capability is released before the memory it lives in.
pub(crate) struct LiveModule {
    capability: Option<Box<dyn Capability>>,
    symbols: SymbolTable,
    release: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl LiveModule {
    /// `release` unmaps the module and runs exactly once, after the
    /// capability has been dropped.
    pub(crate) fn new(
        capability: Box<dyn Capability>,
        symbols: SymbolTable,
        release: Box<dyn FnOnce() + Send + Sync>,
    ) -> Self {
        Self {
            capability: Some(capability),
            symbols,
            release: Some(release),
        }
    }

    #[inline]
    pub(crate) fn symbols(&self) -> &SymbolTable {
        &self.symbols
    }

    pub(crate) fn process(&self, input: &str) -> Result<String> {
        let capability = self.capability.as_deref().ok_or(Error::NotLoaded)?;
        capability.process(input).map_err(capability_error)
    }
}

impl Drop for LiveModule {
    fn drop(&mut self) {
        drop(self.capability.take());
        log::trace!("[Bridge] capability released");
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

/// A non-owning reference to the capability of a loaded module.
///
/// Cloning is cheap. Every clone fails with [`Error::NotLoaded`] once the
/// module it came from is unloaded. A call already running when `unload`
/// happens keeps the module mapped until it returns.
#[derive(Clone)]
pub struct CapabilityHandle {
    module: Weak<LiveModule>,
}

impl CapabilityHandle {
    pub(crate) fn new(module: &Arc<LiveModule>) -> Self {
        Self {
            module: Arc::downgrade(module),
        }
    }

    /// Returns `true` while the module this handle came from is loaded.
    pub fn is_loaded(&self) -> bool {
        self.module.strong_count() != 0
    }

    /// Forwards `input` to the capability.
    ///
    /// # Errors
    /// [`Error::NotLoaded`] after unload, [`Error::Capability`] when the
    /// implementation fails.
    pub fn process(&self, input: &str) -> Result<String> {
        let module = self.module.upgrade().ok_or(Error::NotLoaded)?;
        module.process(input)
    }
}

impl core::fmt::Debug for CapabilityHandle {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CapabilityHandle")
            .field("loaded", &self.is_loaded())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{
        Mutex,
        atomic::{AtomicBool, Ordering},
    };

    struct Echo;

    impl Capability for Echo {
        fn process(&self, input: &str) -> CapabilityResult {
            Ok(input.to_owned())
        }
    }

    fn new_echo() -> Box<dyn Capability> {
        Box::new(Echo)
    }

    #[test]
    fn zero_address_is_not_a_constructor() {
        let symbols: SymbolTable = [("ctor", 0usize)].into_iter().collect();
        let err = unsafe { resolve_constructor(&symbols, "ctor") }.unwrap_err();
        assert!(matches!(err, Error::SymbolNotFound { ref name } if name == "ctor"));
        let err = unsafe { resolve_constructor(&symbols, "other") }.unwrap_err();
        assert!(matches!(err, Error::SymbolNotFound { .. }));
    }

    #[test]
    fn resolves_host_function() {
        let symbols: SymbolTable = [("ctor", new_echo as Constructor as usize)]
            .into_iter()
            .collect();
        let ctor = unsafe { resolve_constructor(&symbols, "ctor") }.unwrap();
        assert_eq!(ctor().process("abc").unwrap(), "abc");
    }

    struct Flagged(&'static AtomicBool);

    impl Capability for Flagged {
        fn process(&self, input: &str) -> CapabilityResult {
            Ok(input.to_owned())
        }
    }

    impl Drop for Flagged {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    #[test]
    fn capability_dropped_before_release() {
        static DROPPED: AtomicBool = AtomicBool::new(false);
        static SEEN: Mutex<Option<bool>> = Mutex::new(None);
        let module = Arc::new(LiveModule::new(
            Box::new(Flagged(&DROPPED)),
            SymbolTable::new(),
            Box::new(|| *SEEN.lock().unwrap() = Some(DROPPED.load(Ordering::SeqCst))),
        ));
        let handle = CapabilityHandle::new(&module);
        assert_eq!(handle.process("x").unwrap(), "x");
        drop(module);
        assert_eq!(*SEEN.lock().unwrap(), Some(true));
        assert!(!handle.is_loaded());
        assert!(matches!(handle.process("x"), Err(Error::NotLoaded)));
    }
}
