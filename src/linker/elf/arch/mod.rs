//! Machine-specific relocation. Only x86-64 is implemented; on every other
//! target each object is rejected as built for a foreign machine.

/// Everything a relocation routine needs about one relocation site.
pub(crate) struct RelocSite<'a> {
    pub(crate) r_type: u32,
    /// Offset of the patched field from the region base.
    pub(crate) offset: usize,
    /// Absolute address of the patched field (P).
    pub(crate) place: usize,
    /// Resolved symbol value (S).
    pub(crate) sym: usize,
    /// Addend (A).
    pub(crate) addend: i64,
    /// Symbol name, for diagnostics.
    pub(crate) name: &'a str,
}

cfg_if::cfg_if! {
    if #[cfg(target_arch = "x86_64")] {
        mod x86_64;
        pub(crate) use x86_64::*;
    } else {
        use super::{
            error::{ElfError, unsupported_error},
            mmap::MappedRegion,
            pltgot::PltGotSection,
        };

        /// No object matches this machine, so nothing is ever relocated.
        pub(crate) const EM_ARCH: u16 = elf::abi::EM_NONE;
        pub(crate) const PLT_ENTRY_SIZE: usize = 16;
        pub(crate) const PLT_ENTRY: [u8; PLT_ENTRY_SIZE] = [0; PLT_ENTRY_SIZE];

        pub(crate) fn rel_type_to_str(_r_type: u32) -> &'static str {
            "UNKNOWN"
        }

        pub(crate) fn field_width(_r_type: u32) -> usize {
            0
        }

        pub(crate) fn needs_got(_r_type: u32) -> bool {
            false
        }

        pub(crate) fn needs_plt(_r_type: u32) -> bool {
            false
        }

        pub(crate) fn relocate(
            _region: &mut MappedRegion,
            _pltgot: &mut PltGotSection,
            site: &RelocSite<'_>,
        ) -> Result<(), ElfError> {
            Err(unsupported_error(format!(
                "relocation type {} against {}",
                site.r_type, site.name
            )))
        }
    }
}
