//! Anonymous memory backing a linked module.
use super::error::{ElfError, mmap_error};
use bitflags::bitflags;
use core::{
    ffi::{c_int, c_void},
    ptr::NonNull,
};
use libc::{mmap, mprotect, munmap};

pub(crate) const PAGE_SIZE: usize = 0x1000;

#[inline]
pub(crate) fn roundup(x: usize, align: usize) -> usize {
    if align == 0 {
        return x;
    }
    (x + align - 1) & !(align - 1)
}

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    /// Memory protection flags for controlling access permissions.
    pub struct ProtFlags: c_int {
        /// No access allowed.
        const PROT_NONE = 0;

        /// Allow reading from the memory region.
        const PROT_READ = 1;

        /// Allow writing to the memory region.
        const PROT_WRITE = 2;

        /// Allow executing code in the memory region.
        const PROT_EXEC = 4;
    }
}

bitflags! {
    #[derive(Clone, Copy)]
    /// Memory mapping configuration flags.
    pub struct MapFlags: c_int {
        /// Create a private copy-on-write mapping.
        const MAP_PRIVATE = libc::MAP_PRIVATE;

        /// Create an anonymous mapping not backed by any file.
        const MAP_ANONYMOUS = libc::MAP_ANONYMOUS;
    }
}

/// One contiguous private anonymous mapping. Unmapped on drop.
pub struct MappedRegion {
    memory: NonNull<c_void>,
    len: usize,
}

impl MappedRegion {
    /// Reserves `len` bytes, readable and writable, so sections can be copied
    /// in and relocated before the final protections are applied.
    pub(crate) fn reserve(len: usize) -> Result<Self, ElfError> {
        let len = roundup(len.max(1), PAGE_SIZE);
        let flags = MapFlags::MAP_PRIVATE | MapFlags::MAP_ANONYMOUS;
        let prot = ProtFlags::PROT_READ | ProtFlags::PROT_WRITE;
        let ptr = unsafe {
            mmap(
                core::ptr::null_mut(),
                len,
                prot.bits(),
                flags.bits(),
                -1,
                0,
            )
        };
        if core::ptr::eq(ptr, libc::MAP_FAILED) {
            return Err(mmap_error("mmap anonymous failed"));
        }
        log::trace!("[Mmap] reserved {len:#x} bytes at {ptr:p}");
        let memory = NonNull::new(ptr).ok_or_else(|| mmap_error("mmap returned null"))?;
        Ok(Self { memory, len })
    }

    #[inline]
    pub fn base(&self) -> usize {
        self.memory.as_ptr() as usize
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns `true` if `addr` falls inside the mapping.
    #[inline]
    pub fn contains(&self, addr: usize) -> bool {
        addr >= self.base() && addr < self.base() + self.len
    }

    fn check(&self, offset: usize, len: usize) -> Result<(), ElfError> {
        match offset.checked_add(len) {
            Some(end) if end <= self.len => Ok(()),
            _ => Err(mmap_error(format!(
                "access of {len:#x} bytes at {offset:#x} outside a {:#x} byte mapping",
                self.len
            ))),
        }
    }

    /// Copies `data` to `offset` bytes past the base.
    pub(crate) fn write_bytes(&mut self, offset: usize, data: &[u8]) -> Result<(), ElfError> {
        self.check(offset, data.len())?;
        unsafe {
            core::ptr::copy_nonoverlapping(
                data.as_ptr(),
                (self.base() + offset) as *mut u8,
                data.len(),
            )
        };
        Ok(())
    }

    /// Writes `value` unaligned at `offset` bytes past the base.
    pub(crate) fn write<T: Copy>(&mut self, offset: usize, value: T) -> Result<(), ElfError> {
        self.check(offset, size_of::<T>())?;
        unsafe { core::ptr::write_unaligned((self.base() + offset) as *mut T, value) };
        Ok(())
    }

    pub(crate) fn read<T: Copy>(&self, offset: usize) -> Result<T, ElfError> {
        self.check(offset, size_of::<T>())?;
        Ok(unsafe { core::ptr::read_unaligned((self.base() + offset) as *const T) })
    }

    /// Applies `prot` to the page-aligned range `[offset, offset + len)`.
    pub(crate) fn protect(
        &mut self,
        offset: usize,
        len: usize,
        prot: ProtFlags,
    ) -> Result<(), ElfError> {
        debug_assert!(offset % PAGE_SIZE == 0);
        let res = unsafe { mprotect((self.base() + offset) as *mut c_void, len, prot.bits()) };
        if res != 0 {
            return Err(mmap_error("mprotect failed"));
        }
        log::trace!(
            "[Mmap] protect {:#x}..{:#x} {:?}",
            self.base() + offset,
            self.base() + offset + len,
            prot
        );
        Ok(())
    }
}

impl core::fmt::Debug for MappedRegion {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("MappedRegion")
            .field("base", &format_args!("{:#x}", self.base()))
            .field("len", &format_args!("{:#x}", self.len))
            .finish()
    }
}

impl Drop for MappedRegion {
    fn drop(&mut self) {
        let res = unsafe { munmap(self.memory.as_ptr(), self.len) };
        if res != 0 {
            log::error!("[Mmap] munmap of {:#x} failed", self.base());
        } else {
            log::trace!("[Mmap] unmapped {:#x} bytes at {:#x}", self.len, self.base());
        }
    }
}

// The region is plain memory owned by exactly one module.
unsafe impl Send for MappedRegion {}
unsafe impl Sync for MappedRegion {}
