#![allow(dead_code)]

use hotload::{
    Capability, CapabilityResult, Constructor, DEFAULT_CONSTRUCTOR_SYMBOL, LinkerService,
    SymbolRegistry, SymbolTable,
    manifest::{BuildManifest, DependencyRef, host_manifest, render_block},
};
use object::{
    Architecture, BinaryFormat, Endianness, SectionFlags, SectionKind, SymbolFlags, SymbolKind,
    SymbolScope, elf,
    write::{
        Object, Relocation, RelocationFlags, SectionId, StandardSection, Symbol, SymbolId,
        SymbolSection,
    },
};
use std::{
    collections::HashMap,
    fmt,
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

/// Routes the crate's log lines through the test harness; `RUST_LOG` picks
/// the level.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub struct Upper;

impl Capability for Upper {
    fn process(&self, input: &str) -> CapabilityResult {
        Ok(input.to_uppercase())
    }
}

pub struct Refuse;

impl Capability for Refuse {
    fn process(&self, input: &str) -> CapabilityResult {
        Err(format!("refusing {input:?}").into())
    }
}

pub fn new_upper() -> Box<dyn Capability> {
    Box::new(Upper)
}

pub fn new_refuse() -> Box<dyn Capability> {
    Box::new(Refuse)
}

#[derive(Debug)]
pub struct FakeError(pub &'static str);

impl fmt::Display for FakeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

impl std::error::Error for FakeError {}

/// Counts how often the fake linker mapped and unmapped a module.
#[derive(Debug, Default)]
pub struct Counters {
    pub mapped: AtomicUsize,
    pub unmapped: AtomicUsize,
}

impl Counters {
    pub fn mapped(&self) -> usize {
        self.mapped.load(Ordering::SeqCst)
    }

    pub fn unmapped(&self) -> usize {
        self.unmapped.load(Ordering::SeqCst)
    }
}

/// A linker service that maps nothing and hands out a canned symbol table.
#[derive(Debug, Clone, Default)]
pub struct FakeLinker {
    pub symbols: Vec<(String, usize)>,
    pub fail_read: bool,
    pub fail_link: bool,
    pub counters: Arc<Counters>,
}

pub struct FakeMemory(u32);

impl FakeLinker {
    /// Exports `ctor` under the default constructor symbol.
    pub fn with_constructor(ctor: Constructor) -> Self {
        Self::default().symbol(DEFAULT_CONSTRUCTOR_SYMBOL, ctor as usize)
    }

    pub fn symbol(mut self, name: &str, addr: usize) -> Self {
        self.symbols.push((name.to_owned(), addr));
        self
    }
}

impl LinkerService for FakeLinker {
    type Unit = Vec<PathBuf>;
    type Memory = FakeMemory;
    type Error = FakeError;

    fn register_host_symbols(&self) -> Result<SymbolRegistry, FakeError> {
        Ok(SymbolRegistry::new())
    }

    fn read_artifacts(&self, paths: &[PathBuf]) -> Result<Vec<PathBuf>, FakeError> {
        if self.fail_read {
            return Err(FakeError("cannot read artifacts"));
        }
        Ok(paths.to_vec())
    }

    fn link_and_map(
        &self,
        _unit: Vec<PathBuf>,
        _registry: &SymbolRegistry,
    ) -> Result<(SymbolTable, FakeMemory), FakeError> {
        if self.fail_link {
            return Err(FakeError("undefined symbol"));
        }
        self.counters.mapped.fetch_add(1, Ordering::SeqCst);
        let table = self.symbols.iter().map(|(name, addr)| (name.as_str(), *addr)).collect();
        Ok((table, FakeMemory(0xdead)))
    }

    fn unmap(&self, memory: FakeMemory) {
        assert_eq!(memory.0, 0xdead);
        self.counters.unmapped.fetch_add(1, Ordering::SeqCst);
    }
}

/// A manifest for `demo/plugin` naming `deps` as `(path, version)` pairs.
pub fn manifest(deps: &[(&str, &str)]) -> BuildManifest {
    BuildManifest {
        path: "demo/plugin".into(),
        main: DependencyRef::new("demo/plugin", "0.1.0"),
        deps: deps
            .iter()
            .map(|(path, version)| DependencyRef::new(*path, *version))
            .collect(),
    }
}

pub fn host() -> &'static BuildManifest {
    host_manifest().unwrap()
}

/// Host dependencies locked at a single version.
fn unique_host_deps() -> impl Iterator<Item = &'static DependencyRef> {
    let deps = &host().deps;
    deps.iter()
        .filter(move |dep| deps.iter().filter(|other| other.path == dep.path).count() == 1)
}

/// A manifest built against exactly the host's dependency versions.
pub fn compatible_manifest() -> BuildManifest {
    let deps: Vec<(&str, &str)> = unique_host_deps()
        .take(4)
        .map(|dep| (dep.path.as_str(), dep.effective().version.as_str()))
        .collect();
    manifest(&deps)
}

/// A manifest whose first dependency drifted from the host's version.
/// Returns the drifted path along with it.
pub fn drifted_manifest() -> (BuildManifest, String) {
    let mut drifted = compatible_manifest();
    let first = drifted
        .deps
        .first_mut()
        .expect("host is built with a lockfile");
    first.version.push_str("-drift");
    let path = first.path.clone();
    (drifted, path)
}

/// Wraps `manifest` in an otherwise meaningless artifact body.
pub fn blob_with_block(manifest: &BuildManifest) -> Vec<u8> {
    let mut data = b"\x7fELF not really an object".to_vec();
    data.extend_from_slice(&[0u8; 40]);
    data.extend_from_slice(&render_block(manifest));
    data.extend_from_slice(&[0xffu8; 17]);
    data
}

pub fn write_file(dir: &Path, name: &str, data: &[u8]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, data).unwrap();
    path
}

/// Writes a GNU `ar` archive holding `members`.
pub fn write_archive(dir: &Path, name: &str, members: &[(&str, &[u8])]) -> PathBuf {
    let mut data = b"!<arch>\n".to_vec();
    for (member, bytes) in members {
        let header = format!(
            "{:<16}{:<12}{:<6}{:<6}{:<8}{:<10}`\n",
            format!("{member}/"),
            0,
            0,
            0,
            644,
            bytes.len()
        );
        assert_eq!(header.len(), 60);
        data.extend_from_slice(header.as_bytes());
        data.extend_from_slice(bytes);
        if bytes.len() % 2 == 1 {
            data.push(b'\n');
        }
    }
    write_file(dir, name, &data)
}

struct PendingReloc {
    section: SectionId,
    offset: u64,
    target: String,
    r_type: u32,
    addend: i64,
}

/// Builds x86-64 relocatable objects for tests.
pub struct ObjectBuilder {
    obj: Object<'static>,
    symbols: HashMap<String, SymbolId>,
    relocs: Vec<PendingReloc>,
}

impl Default for ObjectBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ObjectBuilder {
    pub fn new() -> Self {
        Self {
            obj: Object::new(BinaryFormat::Elf, Architecture::X86_64, Endianness::Little),
            symbols: HashMap::new(),
            relocs: Vec::new(),
        }
    }

    fn add_symbol(&mut self, name: &str, symbol: Symbol) -> SymbolId {
        let id = self.obj.add_symbol(symbol);
        self.symbols.insert(name.to_owned(), id);
        id
    }

    fn define(&mut self, section: SectionId, name: &str, bytes: &[u8], kind: SymbolKind, weak: bool) {
        let value = self.obj.append_section_data(section, bytes, 16);
        self.add_symbol(
            name,
            Symbol {
                name: name.as_bytes().to_vec(),
                value,
                size: bytes.len() as u64,
                kind,
                scope: SymbolScope::Dynamic,
                weak,
                section: SymbolSection::Section(section),
                flags: SymbolFlags::None,
            },
        );
    }

    fn undefined(&mut self, name: &str, weak: bool) -> SymbolId {
        self.add_symbol(
            name,
            Symbol {
                name: name.as_bytes().to_vec(),
                value: 0,
                size: 0,
                kind: SymbolKind::Unknown,
                scope: SymbolScope::Dynamic,
                weak,
                section: SymbolSection::Undefined,
                flags: SymbolFlags::None,
            },
        )
    }

    /// A global function in `.text`.
    pub fn function(mut self, name: &str, code: &[u8]) -> Self {
        let text = self.obj.section_id(StandardSection::Text);
        self.define(text, name, code, SymbolKind::Text, false);
        self
    }

    /// A weak global function in `.text`.
    pub fn weak_function(mut self, name: &str, code: &[u8]) -> Self {
        let text = self.obj.section_id(StandardSection::Text);
        self.define(text, name, code, SymbolKind::Text, true);
        self
    }

    /// A global object in `.data`.
    pub fn data(mut self, name: &str, bytes: &[u8]) -> Self {
        let data = self.obj.section_id(StandardSection::Data);
        self.define(data, name, bytes, SymbolKind::Data, false);
        self
    }

    /// An undefined weak reference to `name`.
    pub fn weak_undefined(mut self, name: &str) -> Self {
        self.undefined(name, true);
        self
    }

    fn pointer_array(mut self, name: &str, sh_type: u32, function: &str) -> Self {
        let section = self
            .obj
            .add_section(Vec::new(), name.as_bytes().to_vec(), SectionKind::Elf(sh_type));
        self.obj.section_mut(section).flags = SectionFlags::Elf {
            sh_flags: u64::from(elf::SHF_ALLOC | elf::SHF_WRITE),
        };
        let offset = self.obj.append_section_data(section, &[0u8; 8], 8);
        self.relocs.push(PendingReloc {
            section,
            offset,
            target: function.to_owned(),
            r_type: elf::R_X86_64_64,
            addend: 0,
        });
        self
    }

    /// An `.init_array` entry pointing at `function`.
    pub fn init_array(self, function: &str) -> Self {
        self.pointer_array(".init_array", elf::SHT_INIT_ARRAY, function)
    }

    /// A `.fini_array` entry pointing at `function`.
    pub fn fini_array(self, function: &str) -> Self {
        self.pointer_array(".fini_array", elf::SHT_FINI_ARRAY, function)
    }

    /// Relocates `offset` bytes into the already defined symbol `at`.
    pub fn reloc(mut self, at: &str, offset: u64, target: &str, r_type: u32, addend: i64) -> Self {
        let symbol = self.obj.symbol(self.symbols[at]);
        let SymbolSection::Section(section) = symbol.section else {
            panic!("{at} is not defined in a section");
        };
        self.relocs.push(PendingReloc {
            section,
            offset: symbol.value + offset,
            target: target.to_owned(),
            r_type,
            addend,
        });
        self
    }

    /// Embeds `manifest` as a build-info block in `.rodata`.
    pub fn build_info(mut self, manifest: &BuildManifest) -> Self {
        let rodata = self.obj.section_id(StandardSection::ReadOnlyData);
        self.obj.append_section_data(rodata, &render_block(manifest), 1);
        self
    }

    /// Writes the object. Relocation targets that were never defined become
    /// strong undefined symbols.
    pub fn build(mut self) -> Vec<u8> {
        for reloc in std::mem::take(&mut self.relocs) {
            let symbol = match self.symbols.get(&reloc.target) {
                Some(id) => *id,
                None => self.undefined(&reloc.target, false),
            };
            self.obj
                .add_relocation(
                    reloc.section,
                    Relocation {
                        offset: reloc.offset,
                        symbol,
                        addend: reloc.addend,
                        flags: RelocationFlags::Elf {
                            r_type: reloc.r_type,
                        },
                    },
                )
                .unwrap();
        }
        self.obj.write().unwrap()
    }

    pub fn write_to(self, dir: &Path, name: &str) -> PathBuf {
        write_file(dir, name, &self.build())
    }
}
