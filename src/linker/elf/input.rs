//! Reading artifacts into relocatable objects.
use super::{
    arch::EM_ARCH,
    error::{ElfError, io_error, parse_archive_error, parse_object_error, unsupported_error},
};
use elf::{
    ElfBytes,
    abi::{ET_REL, SHF_ALLOC, SHF_TLS, SHT_NOBITS, SHT_REL, SHT_RELA},
    endian::AnyEndian,
    file::Class,
};
use object::read::archive::ArchiveFile;
use std::path::Path;

const ELF_MAGIC: &[u8; 4] = b"\x7fELF";
const AR_MAGIC: &[u8; 8] = b"!<arch>\n";

/// A section header, kept only for what layout and relocation need.
#[derive(Debug, Clone)]
pub(crate) struct Section {
    pub(crate) name: String,
    pub(crate) sh_type: u32,
    pub(crate) sh_flags: u64,
    pub(crate) sh_offset: usize,
    pub(crate) sh_size: usize,
    pub(crate) sh_addralign: usize,
}

impl Section {
    #[inline]
    pub(crate) fn is_alloc(&self) -> bool {
        self.sh_flags & SHF_ALLOC as u64 != 0
    }

    #[inline]
    pub(crate) fn is_nobits(&self) -> bool {
        self.sh_type == SHT_NOBITS
    }
}

#[derive(Debug, Clone)]
pub(crate) struct ObjSymbol {
    pub(crate) name: String,
    pub(crate) st_value: u64,
    pub(crate) st_shndx: u16,
    pub(crate) st_bind: u8,
    pub(crate) st_type: u8,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct Rela {
    pub(crate) r_offset: u64,
    pub(crate) r_sym: u32,
    pub(crate) r_type: u32,
    pub(crate) r_addend: i64,
}

/// Relocations that patch one section.
#[derive(Debug, Clone)]
pub(crate) struct RelaSection {
    pub(crate) target: usize,
    pub(crate) entries: Vec<Rela>,
}

/// One ET_REL object, parsed and owning its bytes.
#[derive(Debug)]
pub struct RelocatableObject {
    pub(crate) name: String,
    pub(crate) data: Vec<u8>,
    pub(crate) sections: Vec<Section>,
    pub(crate) symbols: Vec<ObjSymbol>,
    pub(crate) relocations: Vec<RelaSection>,
}

impl RelocatableObject {
    /// Parses `data` as a relocatable object for the host machine.
    pub fn parse(name: impl Into<String>, data: Vec<u8>) -> Result<Self, ElfError> {
        let name = name.into();
        let parse_err = |err: elf::ParseError| parse_object_error(format!("{name}: {err}"));
        let file = ElfBytes::<AnyEndian>::minimal_parse(&data).map_err(parse_err)?;
        if file.ehdr.e_type != ET_REL {
            return Err(parse_object_error(format!(
                "{name}: not a relocatable object (e_type {})",
                file.ehdr.e_type
            )));
        }
        if file.ehdr.e_machine != EM_ARCH || file.ehdr.class != Class::ELF64 {
            return Err(unsupported_error(format!(
                "{name}: objects for machine {} cannot be linked on this host",
                file.ehdr.e_machine
            )));
        }

        let (shdrs, shstrtab) = file.section_headers_with_strtab().map_err(parse_err)?;
        let Some(shdrs) = shdrs else {
            return Err(parse_object_error(format!("{name}: no section headers")));
        };
        let mut sections = Vec::with_capacity(shdrs.len());
        let mut relocations = Vec::new();
        for (idx, shdr) in shdrs.iter().enumerate() {
            let sec_name = match &shstrtab {
                Some(strtab) => strtab.get(shdr.sh_name as usize).map_err(parse_err)?,
                None => "",
            };
            if shdr.sh_flags & SHF_ALLOC as u64 != 0 && shdr.sh_flags & SHF_TLS as u64 != 0 {
                return Err(unsupported_error(format!(
                    "{name}: thread-local section {sec_name}"
                )));
            }
            if shdr.sh_type != SHT_NOBITS
                && (shdr.sh_offset as usize).saturating_add(shdr.sh_size as usize) > data.len()
            {
                return Err(parse_object_error(format!(
                    "{name}: section {idx} ({sec_name}) extends past the end of the file"
                )));
            }
            match shdr.sh_type {
                SHT_RELA => {
                    let entries = file
                        .section_data_as_relas(&shdr)
                        .map_err(parse_err)?
                        .map(|rela| Rela {
                            r_offset: rela.r_offset,
                            r_sym: rela.r_sym,
                            r_type: rela.r_type,
                            r_addend: rela.r_addend,
                        })
                        .collect();
                    relocations.push(RelaSection {
                        target: shdr.sh_info as usize,
                        entries,
                    });
                }
                SHT_REL if shdr.sh_size != 0 => {
                    return Err(unsupported_error(format!(
                        "{name}: REL relocations in {sec_name}"
                    )));
                }
                _ => {}
            }
            sections.push(Section {
                name: sec_name.to_owned(),
                sh_type: shdr.sh_type,
                sh_flags: shdr.sh_flags,
                sh_offset: shdr.sh_offset as usize,
                sh_size: shdr.sh_size as usize,
                sh_addralign: shdr.sh_addralign as usize,
            });
        }

        let mut symbols = Vec::new();
        if let Some((symtab, strtab)) = file.symbol_table().map_err(parse_err)? {
            for sym in symtab.iter() {
                symbols.push(ObjSymbol {
                    name: strtab.get(sym.st_name as usize).map_err(parse_err)?.to_owned(),
                    st_value: sym.st_value,
                    st_shndx: sym.st_shndx,
                    st_bind: sym.st_bind(),
                    st_type: sym.st_symtype(),
                });
            }
        }

        log::trace!(
            "[Link] parsed {}: {} sections, {} symbols, {} relocation sections",
            name,
            sections.len(),
            symbols.len(),
            relocations.len()
        );
        Ok(Self {
            name,
            data,
            sections,
            symbols,
            relocations,
        })
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The file bytes of section `idx`.
    pub(crate) fn section_data(&self, idx: usize) -> &[u8] {
        let section = &self.sections[idx];
        &self.data[section.sh_offset..section.sh_offset + section.sh_size]
    }
}

/// Every object read from an artifact set, in artifact order.
#[derive(Debug, Default)]
pub struct LinkUnit {
    pub(crate) objects: Vec<RelocatableObject>,
}

impl LinkUnit {
    pub fn objects(&self) -> &[RelocatableObject] {
        &self.objects
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Adds every ELF member of an `ar` archive. Other members, such as
    /// symbol indexes or metadata blobs, are skipped.
    pub(crate) fn push_archive(&mut self, name: &str, data: &[u8]) -> Result<(), ElfError> {
        let archive = ArchiveFile::parse(data)
            .map_err(|err| parse_archive_error(format!("{name}: {err}")))?;
        for member in archive.members() {
            let member = member.map_err(|err| parse_archive_error(format!("{name}: {err}")))?;
            let member_name = String::from_utf8_lossy(member.name());
            let bytes = member
                .data(data)
                .map_err(|err| parse_archive_error(format!("{name}({member_name}): {err}")))?;
            if !bytes.starts_with(ELF_MAGIC) {
                log::trace!("[Link] skipping non-ELF member {name}({member_name})");
                continue;
            }
            self.objects.push(RelocatableObject::parse(
                format!("{name}({member_name})"),
                bytes.to_vec(),
            )?);
        }
        Ok(())
    }

    /// Reads one artifact, either an archive or a loose object.
    pub(crate) fn push_path(&mut self, path: &Path) -> Result<(), ElfError> {
        let name = path.display().to_string();
        let data = std::fs::read(path).map_err(|err| io_error(name.clone(), err))?;
        if data.starts_with(AR_MAGIC) {
            self.push_archive(&name, &data)
        } else {
            self.objects.push(RelocatableObject::parse(name, data)?);
            Ok(())
        }
    }
}
