//! x86-64 relocation of ET_REL objects.
use super::RelocSite;
use crate::linker::elf::{
    error::{ElfError, relocate_error, unsupported_error},
    mmap::MappedRegion,
    pltgot::PltGotSection,
};
use elf::abi::*;

/// The ELF machine type for x86-64 architecture.
pub(crate) const EM_ARCH: u16 = EM_X86_64;

const R_X86_64_TLSGD: u32 = 19;
const R_X86_64_TLSLD: u32 = 20;
const R_X86_64_DTPOFF32: u32 = 21;
const R_X86_64_GOTTPOFF: u32 = 22;
const R_X86_64_TPOFF32: u32 = 23;
const R_X86_64_PC64: u32 = 24;
const R_X86_64_GOTPCRELX: u32 = 41;
const R_X86_64_REX_GOTPCRELX: u32 = 42;

/// Size of each PLT entry in bytes.
pub(crate) const PLT_ENTRY_SIZE: usize = 16;

/// Template for PLT entries.
pub(crate) const PLT_ENTRY: [u8; PLT_ENTRY_SIZE] = [
    0xf3, 0x0f, 0x1e, 0xfa, // endbr64
    0xff, 0x25, 0, 0, 0, 0, // jmp *GOT+idx(%rip)
    0xcc, 0xcc, 0xcc, 0xcc, 0xcc, 0xcc, // (padding)
];

/// Map x86_64 relocation type value to human readable name.
pub(crate) fn rel_type_to_str(r_type: u32) -> &'static str {
    match r_type {
        R_X86_64_NONE => "R_X86_64_NONE",
        R_X86_64_64 => "R_X86_64_64",
        R_X86_64_PC32 => "R_X86_64_PC32",
        R_X86_64_GOT32 => "R_X86_64_GOT32",
        R_X86_64_PLT32 => "R_X86_64_PLT32",
        R_X86_64_GOTPCREL => "R_X86_64_GOTPCREL",
        R_X86_64_32 => "R_X86_64_32",
        R_X86_64_32S => "R_X86_64_32S",
        R_X86_64_PC64 => "R_X86_64_PC64",
        R_X86_64_TPOFF32 => "R_X86_64_TPOFF32",
        R_X86_64_GOTTPOFF => "R_X86_64_GOTTPOFF",
        R_X86_64_TLSGD => "R_X86_64_TLSGD",
        R_X86_64_TLSLD => "R_X86_64_TLSLD",
        R_X86_64_DTPOFF32 => "R_X86_64_DTPOFF32",
        R_X86_64_GOTPCRELX => "R_X86_64_GOTPCRELX",
        R_X86_64_REX_GOTPCRELX => "R_X86_64_REX_GOTPCRELX",
        _ => "UNKNOWN",
    }
}

/// Number of bytes `r_type` patches at its site.
pub(crate) fn field_width(r_type: u32) -> usize {
    match r_type {
        R_X86_64_NONE => 0,
        R_X86_64_64 | R_X86_64_PC64 => 8,
        _ => 4,
    }
}

/// Whether `r_type` may need a GOT slot.
pub(crate) fn needs_got(r_type: u32) -> bool {
    matches!(
        r_type,
        R_X86_64_GOTPCREL | R_X86_64_GOTPCRELX | R_X86_64_REX_GOTPCRELX | R_X86_64_PLT32
    )
}

/// Whether `r_type` may need a PLT stub.
pub(crate) fn needs_plt(r_type: u32) -> bool {
    r_type == R_X86_64_PLT32
}

fn out_of_range(site: &RelocSite<'_>) -> ElfError {
    relocate_error(format!(
        "{} against {} at {:#x} is out of range",
        rel_type_to_str(site.r_type),
        site.name,
        site.place
    ))
}

/// Applies one relocation.
pub(crate) fn relocate(
    region: &mut MappedRegion,
    pltgot: &mut PltGotSection,
    site: &RelocSite<'_>,
) -> Result<(), ElfError> {
    let s = site.sym as i64;
    let a = site.addend;
    let p = site.place as i64;
    match site.r_type {
        R_X86_64_NONE => {}
        R_X86_64_64 => {
            region.write(site.offset, s.wrapping_add(a) as u64)?;
        }
        R_X86_64_PC32 => {
            let val = i32::try_from(s.wrapping_add(a).wrapping_sub(p))
                .map_err(|_| out_of_range(site))?;
            region.write(site.offset, val)?;
        }
        R_X86_64_PC64 => {
            region.write(site.offset, s.wrapping_add(a).wrapping_sub(p))?;
        }
        R_X86_64_PLT32 => {
            let val = match i32::try_from(s.wrapping_add(a).wrapping_sub(p)) {
                Ok(val) => val,
                Err(_) => {
                    let stub = pltgot.plt_entry(region, site.sym)? as i64;
                    i32::try_from(stub.wrapping_add(a).wrapping_sub(p))
                        .map_err(|_| out_of_range(site))?
                }
            };
            region.write(site.offset, val)?;
        }
        R_X86_64_GOTPCREL | R_X86_64_GOTPCRELX | R_X86_64_REX_GOTPCRELX => {
            let got = pltgot.got_entry(region, site.sym)? as i64;
            let val = i32::try_from(got.wrapping_add(a).wrapping_sub(p))
                .map_err(|_| out_of_range(site))?;
            region.write(site.offset, val)?;
        }
        R_X86_64_32 => {
            let val = u32::try_from(s.wrapping_add(a)).map_err(|_| out_of_range(site))?;
            region.write(site.offset, val)?;
        }
        R_X86_64_32S => {
            let val = i32::try_from(s.wrapping_add(a)).map_err(|_| out_of_range(site))?;
            region.write(site.offset, val)?;
        }
        other => {
            return Err(unsupported_error(format!(
                "relocation {} ({other}) against {}",
                rel_type_to_str(other),
                site.name
            )));
        }
    }
    Ok(())
}
