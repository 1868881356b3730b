mod common;

use common::{FakeLinker, new_upper};
use hotload::{
    Error, LoaderConfig,
    entry::{self, DEFAULT_INPUT, RunArgs},
};

#[test]
fn fake_linker_uppercases_input() {
    common::init_logging();
    let dir = tempfile::tempdir().unwrap();
    common::write_file(
        dir.path(),
        "plugin.o",
        &common::blob_with_block(&common::compatible_manifest()),
    );
    let mut out = Vec::new();
    let report = entry::run(
        FakeLinker::with_constructor(new_upper),
        &RunArgs::new(dir.path()).input("hello"),
        &LoaderConfig::default(),
        &mut out,
    )
    .unwrap();
    assert!(report.is_compatible());
    assert_eq!(out, b"HELLO\n");
}

#[test]
fn default_input_is_used() {
    let dir = tempfile::tempdir().unwrap();
    let mut out = Vec::new();
    entry::run(
        FakeLinker::with_constructor(new_upper),
        &RunArgs::new(dir.path()),
        &LoaderConfig::default(),
        &mut out,
    )
    .unwrap();
    assert_eq!(String::from_utf8(out).unwrap(), format!("{}\n", DEFAULT_INPUT.to_uppercase()));
}

#[test]
fn failure_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let mut out = Vec::new();
    let err = entry::run(
        FakeLinker::default(),
        &RunArgs::new(dir.path()).input("hello"),
        &LoaderConfig::default(),
        &mut out,
    )
    .unwrap_err();
    assert!(matches!(err, Error::SymbolNotFound { .. }));
    assert!(out.is_empty());

    let err = entry::run(
        FakeLinker::with_constructor(new_upper),
        &RunArgs::new(dir.path().join("missing")),
        &LoaderConfig::default(),
        &mut out,
    )
    .unwrap_err();
    assert!(matches!(err, Error::Discovery { .. }));
    assert!(out.is_empty());
}

#[cfg(all(target_arch = "x86_64", target_os = "linux"))]
mod linked {
    use super::*;
    use crate::common::{self, ObjectBuilder};
    use hotload::{Constructor, DEFAULT_CONSTRUCTOR_SYMBOL, linker::elf::ElfLinker};
    use object::elf::R_X86_64_PLT32;

    // jmp demo_make_uppercase
    const FORWARD: &[u8] = &[0xe9, 0, 0, 0, 0];

    fn plugin_dir() -> tempfile::TempDir {
        common::init_logging();
        let dir = tempfile::tempdir().unwrap();
        ObjectBuilder::new()
            .function(DEFAULT_CONSTRUCTOR_SYMBOL, FORWARD)
            .reloc(DEFAULT_CONSTRUCTOR_SYMBOL, 1, "demo_make_uppercase", R_X86_64_PLT32, -4)
            .build_info(common::host())
            .write_to(dir.path(), "plugin.o");
        dir
    }

    fn linker() -> ElfLinker {
        ElfLinker::new().export("demo_make_uppercase", new_upper as Constructor as *const ())
    }

    #[test]
    fn hello_becomes_upper_case() {
        let dir = plugin_dir();
        let mut out = Vec::new();
        let report = entry::run(
            linker(),
            &RunArgs::new(dir.path()).input("hello"),
            &LoaderConfig::new().strict_versions(true),
            &mut out,
        )
        .unwrap();
        assert_eq!(out, b"HELLO\n");
        assert_eq!(report.artifacts.len(), 1);
        assert!(report.is_compatible());
    }

    #[test]
    fn manager_reloads_linked_module() {
        let dir = plugin_dir();
        let artifacts = hotload::discover(dir.path()).unwrap();
        let mut manager = hotload::ModuleManager::new(linker());
        for _ in 0..3 {
            manager.load(&artifacts).unwrap();
            let handle = manager.handle().unwrap();
            assert_eq!(handle.process("again").unwrap(), "AGAIN");
            manager.unload();
            assert!(matches!(handle.process("again"), Err(Error::NotLoaded)));
        }
    }
}
