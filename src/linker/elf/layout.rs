//! Placing allocated sections of every object into one region.
//!
//! Sections are grouped by the protection they need (R, RW, RX, RWX). Each
//! group becomes one page-aligned segment: sections with file content first,
//! then zero-filled ones. The synthesized GOT joins the RW group and the PLT
//! joins the RX group.
use super::{
    arch::{needs_got, needs_plt},
    error::{ElfError, unsupported_error},
    mmap::{PAGE_SIZE, ProtFlags, roundup},
    input::LinkUnit,
    pltgot::PltGotSection,
};
use elf::abi::{SHF_ALLOC, SHF_EXECINSTR, SHF_WRITE};

/// Convert section flags to memory protection flags
pub(crate) fn section_prot(sh_flags: u64) -> ProtFlags {
    let mut prot = ProtFlags::PROT_READ;
    if sh_flags & SHF_WRITE as u64 != 0 {
        prot |= ProtFlags::PROT_WRITE;
    }
    if sh_flags & SHF_EXECINSTR as u64 != 0 {
        prot |= ProtFlags::PROT_EXEC;
    }
    prot
}

/// Convert protection flags to an index for section unit management
fn prot_to_idx(prot: ProtFlags) -> usize {
    let mut idx = 0;
    if prot.contains(ProtFlags::PROT_WRITE) {
        idx |= 0b1;
    }
    if prot.contains(ProtFlags::PROT_EXEC) {
        idx |= 0b10;
    }
    idx
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Placement {
    Section { object: usize, index: usize },
    Got,
    Plt,
}

struct Item {
    placement: Placement,
    size: usize,
    align: usize,
}

/// Groups sections with the same memory protection requirements
#[derive(Default)]
struct SectionUnit {
    content_sections: Vec<Item>,
    zero_sections: Vec<Item>,
}

impl SectionUnit {
    fn add(&mut self, item: Item, zero: bool) {
        if zero {
            self.zero_sections.push(item);
        } else {
            self.content_sections.push(item);
        }
    }

    /// Assigns offsets starting at `*offset` and returns the segment, if the
    /// unit occupies any bytes.
    fn create_segment(
        &self,
        prot: ProtFlags,
        offset: &mut usize,
        mut place: impl FnMut(Placement, usize),
    ) -> Option<Segment> {
        let start = *offset;
        let mut cur = start;
        for item in self.content_sections.iter().chain(&self.zero_sections) {
            cur = roundup(cur, item.align.max(1));
            place(item.placement, cur);
            cur += item.size;
        }
        let len = roundup(cur - start, PAGE_SIZE);
        if len == 0 {
            return None;
        }
        *offset += len;
        Some(Segment {
            offset: start,
            len,
            prot,
        })
    }
}

/// A page-aligned run of the region sharing one protection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Segment {
    pub(crate) offset: usize,
    pub(crate) len: usize,
    pub(crate) prot: ProtFlags,
}

/// Region-relative placement of everything in a link unit.
#[derive(Debug)]
pub(crate) struct Layout {
    pub(crate) segments: Vec<Segment>,
    pub(crate) total_size: usize,
    section_offsets: Vec<Vec<Option<usize>>>,
    pub(crate) got_offset: usize,
    pub(crate) got_count: usize,
    pub(crate) plt_offset: usize,
    pub(crate) plt_count: usize,
}

impl Layout {
    pub(crate) fn new(unit: &LinkUnit) -> Result<Self, ElfError> {
        let mut units: [SectionUnit; 4] = Default::default();
        let mut section_offsets = Vec::with_capacity(unit.objects.len());
        let mut got_count = 0;
        let mut plt_count = 0;

        for (object, obj) in unit.objects.iter().enumerate() {
            section_offsets.push(vec![None; obj.sections.len()]);
            for (index, shdr) in obj.sections.iter().enumerate() {
                if !shdr.is_alloc() {
                    continue;
                }
                if shdr.sh_addralign > PAGE_SIZE {
                    return Err(unsupported_error(format!(
                        "{}: section {} wants {:#x} alignment",
                        obj.name, shdr.name, shdr.sh_addralign
                    )));
                }
                units[prot_to_idx(section_prot(shdr.sh_flags))].add(
                    Item {
                        placement: Placement::Section { object, index },
                        size: shdr.sh_size,
                        align: shdr.sh_addralign,
                    },
                    shdr.is_nobits(),
                );
            }
            for rela in obj.relocations.iter().flat_map(|sec| &sec.entries) {
                if needs_got(rela.r_type) {
                    got_count += 1;
                }
                if needs_plt(rela.r_type) {
                    plt_count += 1;
                }
            }
        }

        if got_count != 0 {
            units[prot_to_idx(section_prot((SHF_ALLOC | SHF_WRITE) as u64))].add(
                Item {
                    placement: Placement::Got,
                    size: PltGotSection::got_size(got_count),
                    align: size_of::<usize>(),
                },
                true,
            );
        }
        if plt_count != 0 {
            units[prot_to_idx(section_prot((SHF_ALLOC | SHF_EXECINSTR) as u64))].add(
                Item {
                    placement: Placement::Plt,
                    size: PltGotSection::plt_size(plt_count),
                    align: 16,
                },
                true,
            );
        }

        let mut got_offset = 0;
        let mut plt_offset = 0;
        let mut segments = Vec::new();
        let mut offset = 0;
        for (idx, unit) in units.iter().enumerate() {
            let mut prot = ProtFlags::PROT_READ;
            if idx & 0b1 != 0 {
                prot |= ProtFlags::PROT_WRITE;
            }
            if idx & 0b10 != 0 {
                prot |= ProtFlags::PROT_EXEC;
            }
            let segment = unit.create_segment(prot, &mut offset, |placement, at| match placement {
                Placement::Section { object, index } => section_offsets[object][index] = Some(at),
                Placement::Got => got_offset = at,
                Placement::Plt => plt_offset = at,
            });
            if let Some(segment) = segment {
                log::trace!(
                    "[Link] segment {:#x}..{:#x} {:?}",
                    segment.offset,
                    segment.offset + segment.len,
                    segment.prot
                );
                segments.push(segment);
            }
        }

        Ok(Self {
            segments,
            total_size: offset,
            section_offsets,
            got_offset,
            got_count,
            plt_offset,
            plt_count,
        })
    }

    /// Region-relative offset of a section, if it was placed.
    #[inline]
    pub(crate) fn section_offset(&self, object: usize, index: usize) -> Option<usize> {
        self.section_offsets
            .get(object)
            .and_then(|sections| sections.get(index))
            .copied()
            .flatten()
    }
}
