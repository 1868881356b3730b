/// The symbol an artifact exports its capability constructor under, unless
/// configured otherwise.
pub const DEFAULT_CONSTRUCTOR_SYMBOL: &str = "hotload_new_capability";

/// Loader policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoaderConfig {
    pub(crate) constructor_symbol: String,
    pub(crate) strict_versions: bool,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            constructor_symbol: DEFAULT_CONSTRUCTOR_SYMBOL.to_owned(),
            strict_versions: false,
        }
    }
}

impl LoaderConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks the constructor up under `symbol` instead of
    /// [`DEFAULT_CONSTRUCTOR_SYMBOL`].
    pub fn constructor_symbol(mut self, symbol: impl Into<String>) -> Self {
        self.constructor_symbol = symbol.into();
        self
    }

    /// Rejects artifacts whose dependency versions differ from the host's.
    /// Off by default: a drift is only logged.
    pub fn strict_versions(mut self, strict: bool) -> Self {
        self.strict_versions = strict;
        self
    }

    #[inline]
    pub fn symbol(&self) -> &str {
        &self.constructor_symbol
    }

    #[inline]
    pub fn is_strict(&self) -> bool {
        self.strict_versions
    }
}
