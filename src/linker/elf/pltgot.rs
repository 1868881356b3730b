use super::{
    arch::{PLT_ENTRY, PLT_ENTRY_SIZE},
    error::{ElfError, relocate_error},
    mmap::MappedRegion,
};
use hashbrown::{HashMap, hash_map::Entry};

/// GOT slots and PLT stubs synthesized for a module.
///
/// Slots are keyed by the absolute address they hold, so every reference to
/// the same target shares one slot and at most one stub.
pub(crate) struct PltGotSection {
    base: usize,
    got_offset: usize,
    got_cap: usize,
    cur_got_idx: usize,
    got_map: HashMap<usize, usize>,
    plt_offset: usize,
    plt_cap: usize,
    cur_plt_idx: usize,
    plt_map: HashMap<usize, usize>,
}

impl PltGotSection {
    /// `got_offset` and `plt_offset` are region-relative. Capacities are in
    /// entries.
    pub(crate) fn new(
        base: usize,
        got_offset: usize,
        got_cap: usize,
        plt_offset: usize,
        plt_cap: usize,
    ) -> Self {
        Self {
            base,
            got_offset,
            got_cap,
            cur_got_idx: 0,
            got_map: HashMap::new(),
            plt_offset,
            plt_cap,
            cur_plt_idx: 0,
            plt_map: HashMap::new(),
        }
    }

    /// Size in bytes of a GOT holding `count` entries.
    #[inline]
    pub(crate) fn got_size(count: usize) -> usize {
        count * size_of::<usize>()
    }

    /// Size in bytes of a PLT holding `count` stubs.
    #[inline]
    pub(crate) fn plt_size(count: usize) -> usize {
        count * PLT_ENTRY_SIZE
    }

    /// Returns the absolute address of the GOT slot holding `target`,
    /// filling a new slot on first use.
    pub(crate) fn got_entry(
        &mut self,
        region: &mut MappedRegion,
        target: usize,
    ) -> Result<usize, ElfError> {
        let ent_size = size_of::<usize>();
        let idx = match self.got_map.entry(target) {
            Entry::Occupied(entry) => *entry.get(),
            Entry::Vacant(entry) => {
                if self.cur_got_idx == self.got_cap {
                    return Err(relocate_error("GOT capacity exhausted"));
                }
                let idx = *entry.insert(self.cur_got_idx);
                self.cur_got_idx += 1;
                region.write(self.got_offset + idx * ent_size, target)?;
                idx
            }
        };
        Ok(self.base + self.got_offset + idx * ent_size)
    }

    /// Returns the absolute address of a stub that jumps to `target`
    /// through its GOT slot, writing the stub on first use.
    pub(crate) fn plt_entry(
        &mut self,
        region: &mut MappedRegion,
        target: usize,
    ) -> Result<usize, ElfError> {
        if let Some(idx) = self.plt_map.get(&target) {
            return Ok(self.base + self.plt_offset + idx * PLT_ENTRY_SIZE);
        }
        if self.cur_plt_idx == self.plt_cap {
            return Err(relocate_error("PLT capacity exhausted"));
        }
        let got_addr = self.got_entry(region, target)?;
        let idx = self.cur_plt_idx;
        self.cur_plt_idx += 1;
        self.plt_map.insert(target, idx);

        let stub_offset = self.plt_offset + idx * PLT_ENTRY_SIZE;
        let stub_addr = self.base + stub_offset;
        region.write_bytes(stub_offset, &PLT_ENTRY)?;
        // jmp *disp(%rip) ends 10 bytes into the stub
        let disp = i32::try_from(got_addr as i64 - stub_addr as i64 - 10)
            .map_err(|_| relocate_error("PLT stub cannot reach its GOT slot"))?;
        region.write_bytes(stub_offset + 6, &disp.to_ne_bytes())?;
        log::trace!("[Reloc] PLT stub {stub_addr:#x} -> {target:#x}");
        Ok(stub_addr)
    }
}
