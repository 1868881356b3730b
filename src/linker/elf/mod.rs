//! An in-process linker for relocatable ELF objects.
//!
//! [`ElfLinker`] reads loose `.o` files and `ar` archives, lays every
//! allocated section out in one anonymous mapping, resolves symbols against
//! the module itself and then the host, applies `RELA` relocations and runs
//! `.init_array` before handing the module back.
//!
//! Thread-local storage, common symbols and `REL` relocations are rejected
//! with [`ElfError::Unsupported`].
mod arch;
mod error;
mod layout;
mod mmap;
mod input;
mod pltgot;

pub use error::ElfError;
pub use mmap::{MappedRegion, ProtFlags};
pub use input::{LinkUnit, RelocatableObject};

use super::{LinkerService, SymbolRegistry, SymbolTable};
use arch::RelocSite;
use elf::abi::{
    SHN_ABS, SHN_COMMON, SHN_UNDEF, SHT_FINI_ARRAY, SHT_INIT_ARRAY, STB_GLOBAL, STB_LOCAL,
    STB_WEAK, STT_TLS,
};
use error::{parse_object_error, relocate_error, unsupported_error};
use hashbrown::{HashMap, hash_map::Entry};
use layout::Layout;
use pltgot::PltGotSection;
use std::{ffi::CString, path::PathBuf};

const STB_GNU_UNIQUE: u8 = 10;

/// A linked module: its mapping and the finalizers to run before unmapping.
#[derive(Debug)]
pub struct LinkedImage {
    region: MappedRegion,
    fini: Vec<usize>,
}

impl LinkedImage {
    #[inline]
    pub fn base(&self) -> usize {
        self.region.base()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.region.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.region.is_empty()
    }

    /// Returns `true` if `addr` points into the module.
    #[inline]
    pub fn contains(&self, addr: usize) -> bool {
        self.region.contains(addr)
    }
}

/// Looks `name` up among the symbols already loaded into the process.
pub fn search_process(name: &str) -> Option<usize> {
    let name = CString::new(name).ok()?;
    let addr = unsafe { libc::dlsym(libc::RTLD_DEFAULT, name.as_ptr()) };
    (!addr.is_null()).then_some(addr as usize)
}

/// The [`LinkerService`] for relocatable ELF objects.
///
/// ```no_run
/// use hotload::linker::elf::ElfLinker;
///
/// extern "C" fn host_answer() -> i32 {
///     42
/// }
///
/// let linker = ElfLinker::new().export("host_answer", host_answer as *const ());
/// ```
#[derive(Debug, Clone)]
pub struct ElfLinker {
    exports: HashMap<String, usize>,
    search_process: bool,
}

impl Default for ElfLinker {
    fn default() -> Self {
        Self {
            exports: HashMap::new(),
            search_process: true,
        }
    }
}

impl ElfLinker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `addr` available to artifacts under `name`. Explicit exports win
    /// over symbols found in the process.
    pub fn export(mut self, name: impl Into<String>, addr: *const ()) -> Self {
        self.exports.insert(name.into(), addr as usize);
        self
    }

    /// Whether names without an explicit export are looked up among the
    /// symbols already loaded into the process. On by default.
    pub fn search_process(mut self, search: bool) -> Self {
        self.search_process = search;
        self
    }
}

#[derive(Clone, Copy)]
struct GlobalDef {
    addr: usize,
    weak: bool,
}

/// Module-level symbol table built from every object's global definitions.
struct Globals<'a> {
    defs: HashMap<&'a str, GlobalDef>,
}

impl<'a> Globals<'a> {
    fn collect(unit: &'a LinkUnit, layout: &Layout, base: usize) -> Result<Self, ElfError> {
        let mut defs: HashMap<&str, GlobalDef> = HashMap::new();
        for (oi, obj) in unit.objects.iter().enumerate() {
            for sym in &obj.symbols {
                if !matches!(sym.st_bind, STB_GLOBAL | STB_WEAK | STB_GNU_UNIQUE)
                    || sym.st_shndx == SHN_UNDEF
                    || sym.name.is_empty()
                {
                    continue;
                }
                if sym.st_type == STT_TLS {
                    return Err(unsupported_error(format!(
                        "{}: thread-local symbol {}",
                        obj.name, sym.name
                    )));
                }
                let addr = match sym.st_shndx {
                    SHN_COMMON => {
                        return Err(unsupported_error(format!(
                            "{}: common symbol {}",
                            obj.name, sym.name
                        )));
                    }
                    SHN_ABS => sym.st_value as usize,
                    shndx => match layout.section_offset(oi, shndx as usize) {
                        Some(offset) => base + offset + sym.st_value as usize,
                        None => continue,
                    },
                };
                let def = GlobalDef {
                    addr,
                    weak: sym.st_bind == STB_WEAK,
                };
                match defs.entry(sym.name.as_str()) {
                    Entry::Vacant(entry) => {
                        entry.insert(def);
                    }
                    Entry::Occupied(mut entry) => {
                        let old = entry.get_mut();
                        if old.weak && !def.weak {
                            *old = def;
                        } else if !old.weak && !def.weak {
                            log::debug!(
                                "[Link] duplicate definition of {} in {}, keeping the first",
                                sym.name,
                                obj.name
                            );
                        }
                    }
                }
            }
        }
        Ok(Self { defs })
    }

    #[inline]
    fn get(&self, name: &str) -> Option<usize> {
        self.defs.get(name).map(|def| def.addr)
    }
}

fn link(unit: LinkUnit, registry: &SymbolRegistry) -> Result<(SymbolTable, LinkedImage), ElfError> {
    let layout = Layout::new(&unit)?;
    let mut region = MappedRegion::reserve(layout.total_size)?;
    let base = region.base();

    for (oi, obj) in unit.objects.iter().enumerate() {
        for (si, shdr) in obj.sections.iter().enumerate() {
            if shdr.is_nobits() {
                continue;
            }
            if let Some(offset) = layout.section_offset(oi, si) {
                region.write_bytes(offset, obj.section_data(si))?;
            }
        }
    }

    let globals = Globals::collect(&unit, &layout, base)?;
    let mut pltgot = PltGotSection::new(
        base,
        layout.got_offset,
        layout.got_count,
        layout.plt_offset,
        layout.plt_count,
    );

    for (oi, obj) in unit.objects.iter().enumerate() {
        for rela_sec in &obj.relocations {
            // relocations against debug info and other unmapped sections
            let Some(target) = layout.section_offset(oi, rela_sec.target) else {
                continue;
            };
            let target_size = obj.sections[rela_sec.target].sh_size;
            for rela in &rela_sec.entries {
                let width = arch::field_width(rela.r_type);
                let in_bounds = usize::try_from(rela.r_offset)
                    .ok()
                    .and_then(|at| at.checked_add(width))
                    .is_some_and(|end| end <= target_size);
                if !in_bounds {
                    return Err(relocate_error(format!(
                        "{}: {} at {:#x} writes past the end of its section",
                        obj.name,
                        arch::rel_type_to_str(rela.r_type),
                        rela.r_offset
                    )));
                }
                let (sym, name) = if rela.r_sym == 0 {
                    (0, "")
                } else {
                    let Some(sym) = obj.symbols.get(rela.r_sym as usize) else {
                        return Err(parse_object_error(format!(
                            "{}: relocation names symbol {} past the symbol table",
                            obj.name, rela.r_sym
                        )));
                    };
                    let value = match sym.st_shndx {
                        _ if sym.st_type == STT_TLS => {
                            return Err(unsupported_error(format!(
                                "{}: thread-local symbol {}",
                                obj.name, sym.name
                            )));
                        }
                        SHN_UNDEF => match globals.get(&sym.name).or_else(|| registry.lookup(&sym.name)) {
                            Some(addr) => addr,
                            None if sym.st_bind == STB_WEAK => 0,
                            None => {
                                return Err(relocate_error(format!(
                                    "undefined symbol {} referenced from {}",
                                    sym.name, obj.name
                                )));
                            }
                        },
                        SHN_ABS => sym.st_value as usize,
                        SHN_COMMON => {
                            return Err(unsupported_error(format!(
                                "{}: common symbol {}",
                                obj.name, sym.name
                            )));
                        }
                        _ if sym.st_bind != STB_LOCAL && !sym.name.is_empty() => {
                            match globals.get(&sym.name) {
                                Some(addr) => addr,
                                None => {
                                    return Err(relocate_error(format!(
                                        "{}: {} is defined in an unmapped section",
                                        obj.name, sym.name
                                    )));
                                }
                            }
                        }
                        shndx => match layout.section_offset(oi, shndx as usize) {
                            Some(offset) => base + offset + sym.st_value as usize,
                            None => {
                                return Err(relocate_error(format!(
                                    "{}: relocation against unmapped section {}",
                                    obj.name, shndx
                                )));
                            }
                        },
                    };
                    (value, sym.name.as_str())
                };
                let offset = target + rela.r_offset as usize;
                arch::relocate(
                    &mut region,
                    &mut pltgot,
                    &RelocSite {
                        r_type: rela.r_type,
                        offset,
                        place: base + offset,
                        sym,
                        addend: rela.r_addend,
                        name,
                    },
                )?;
            }
        }
    }

    let init = collect_array(&unit, &layout, &region, SHT_INIT_ARRAY)?;
    let fini = collect_array(&unit, &layout, &region, SHT_FINI_ARRAY)?;

    for segment in &layout.segments {
        region.protect(segment.offset, segment.len, segment.prot)?;
    }

    let exports: SymbolTable = globals
        .defs
        .iter()
        .map(|(name, def)| (*name, def.addr))
        .collect();
    log::debug!(
        "[Link] mapped {} objects at {:#x} ({:#x} bytes, {} exports)",
        unit.objects.len(),
        base,
        region.len(),
        exports.len()
    );

    for func in init {
        log::trace!("[Link] calling initializer {func:#x}");
        let func: extern "C" fn() = unsafe { core::mem::transmute(func) };
        func();
    }

    Ok((exports, LinkedImage { region, fini }))
}

/// Reads the function pointers of every `sh_type` array, in link order.
fn collect_array(
    unit: &LinkUnit,
    layout: &Layout,
    region: &MappedRegion,
    sh_type: u32,
) -> Result<Vec<usize>, ElfError> {
    let mut funcs = Vec::new();
    for (oi, obj) in unit.objects.iter().enumerate() {
        for (si, shdr) in obj.sections.iter().enumerate() {
            if shdr.sh_type != sh_type {
                continue;
            }
            let Some(offset) = layout.section_offset(oi, si) else {
                continue;
            };
            let count = shdr.sh_size / size_of::<usize>();
            for idx in 0..count {
                let func: usize = region.read(offset + idx * size_of::<usize>())?;
                if func != 0 && func != usize::MAX {
                    funcs.push(func);
                }
            }
        }
    }
    Ok(funcs)
}

impl LinkerService for ElfLinker {
    type Unit = LinkUnit;
    type Memory = LinkedImage;
    type Error = ElfError;

    fn register_host_symbols(&self) -> Result<SymbolRegistry, ElfError> {
        let mut registry = SymbolRegistry::new();
        for (name, addr) in &self.exports {
            registry.insert(name.clone(), *addr);
        }
        if self.search_process {
            registry = registry.with_fallback(search_process);
        }
        log::debug!(
            "[Link] {} host symbols exported, process search {}",
            registry.len(),
            if self.search_process { "on" } else { "off" }
        );
        Ok(registry)
    }

    fn read_artifacts(&self, paths: &[PathBuf]) -> Result<LinkUnit, ElfError> {
        let mut unit = LinkUnit::default();
        for path in paths {
            unit.push_path(path)?;
        }
        log::debug!(
            "[Link] read {} objects from {} artifacts",
            unit.len(),
            paths.len()
        );
        Ok(unit)
    }

    fn link_and_map(
        &self,
        unit: LinkUnit,
        registry: &SymbolRegistry,
    ) -> Result<(SymbolTable, LinkedImage), ElfError> {
        link(unit, registry)
    }

    fn unmap(&self, image: LinkedImage) {
        for func in image.fini.iter().rev() {
            log::trace!("[Unload] calling finalizer {func:#x}");
            let func: extern "C" fn() = unsafe { core::mem::transmute(*func) };
            func();
        }
        log::debug!("[Unload] unmapping module at {:#x}", image.base());
        drop(image);
    }
}
