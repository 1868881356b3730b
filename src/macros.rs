/// Exports a capability constructor from an artifact crate.
///
/// Emits an unmangled `hotload_new_capability` function (the value of
/// [`DEFAULT_CONSTRUCTOR_SYMBOL`](crate::DEFAULT_CONSTRUCTOR_SYMBOL)) that
/// calls `$ctor`, and keeps the build-info block of this library in the
/// artifact so the host can validate it.
///
/// ```ignore
/// struct Upper;
///
/// impl hotload::Capability for Upper {
///     fn process(&self, input: &str) -> hotload::CapabilityResult {
///         Ok(input.to_uppercase())
///     }
/// }
///
/// fn new_upper() -> Box<dyn hotload::Capability> {
///     Box::new(Upper)
/// }
///
/// hotload::export_capability!(new_upper);
/// ```
#[macro_export]
macro_rules! export_capability {
    ($ctor:path) => {
        #[unsafe(no_mangle)]
        pub fn hotload_new_capability() -> ::std::boxed::Box<dyn $crate::Capability> {
            let ctor: $crate::Constructor = $ctor;
            ctor()
        }

        #[used]
        static HOTLOAD_BUILD_INFO: &[u8] = $crate::manifest::HOST_BUILD_INFO;
    };
}
