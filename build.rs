use std::{
    env, fs,
    path::{Path, PathBuf},
};

#[path = "src/manifest/sentinel.rs"]
mod sentinel;

const LOCKFILE: &str = "Cargo.lock";
const OUTPUT: &str = "build_info.bin";

fn find_lockfile() -> Option<PathBuf> {
    if let Ok(path) = env::var("HOTLOAD_LOCKFILE") {
        let path = PathBuf::from(path);
        if path.is_file() {
            return Some(path);
        }
    }
    let manifest_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR").ok()?);
    let local = manifest_dir.join(LOCKFILE);
    if local.is_file() {
        return Some(local);
    }
    // When built as a dependency the lockfile belongs to the consuming workspace,
    // which normally sits above the target directory.
    let out_dir = PathBuf::from(env::var("OUT_DIR").ok()?);
    out_dir
        .ancestors()
        .map(|dir| dir.join(LOCKFILE))
        .find(|path| path.is_file())
}

fn render_records(name: &str, version: &str, lockfile: Option<&Path>) -> String {
    let mut text = format!("path\t{name}\nmod\t{name}\t{version}\n");
    let Some(lockfile) = lockfile else {
        return text;
    };
    let Ok(content) = fs::read_to_string(lockfile) else {
        return text;
    };
    let Ok(lock) = content.parse::<toml::Table>() else {
        println!("cargo:warning=could not parse {}", lockfile.display());
        return text;
    };
    let packages = lock
        .get("package")
        .and_then(|packages| packages.as_array())
        .cloned()
        .unwrap_or_default();
    for package in packages.iter().filter_map(|package| package.as_table()) {
        let (Some(dep_name), Some(dep_version)) = (
            package.get("name").and_then(|v| v.as_str()),
            package.get("version").and_then(|v| v.as_str()),
        ) else {
            continue;
        };
        if dep_name == name && dep_version == version {
            continue;
        }
        match package.get("checksum").and_then(|v| v.as_str()) {
            Some(sum) => text.push_str(&format!("dep\t{dep_name}\t{dep_version}\t{sum}\n")),
            None => text.push_str(&format!("dep\t{dep_name}\t{dep_version}\n")),
        }
    }
    text
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed=src/manifest/sentinel.rs");
    println!("cargo:rerun-if-env-changed=HOTLOAD_LOCKFILE");

    let name = env::var("CARGO_PKG_NAME").unwrap();
    let version = env::var("CARGO_PKG_VERSION").unwrap();
    let lockfile = find_lockfile();
    if let Some(lockfile) = &lockfile {
        println!("cargo:rerun-if-changed={}", lockfile.display());
    }
    let records = render_records(&name, &version, lockfile.as_deref());

    let mut start = [0u8; sentinel::FRAME_LEN];
    let mut end = [0u8; sentinel::FRAME_LEN];
    hex::decode_to_slice(sentinel::START_SENTINEL_HEX, &mut start).unwrap();
    hex::decode_to_slice(sentinel::END_SENTINEL_HEX, &mut end).unwrap();

    let mut block = Vec::with_capacity(records.len() + 4 * sentinel::FRAME_LEN);
    block.extend_from_slice(&start);
    block.extend_from_slice(&[0u8; sentinel::FRAME_LEN]);
    block.extend_from_slice(records.as_bytes());
    block.extend_from_slice(&[0u8; sentinel::FRAME_LEN]);
    block.extend_from_slice(&end);

    let out = PathBuf::from(env::var("OUT_DIR").unwrap()).join(OUTPUT);
    fs::write(&out, block).unwrap();
}
