//! The build-info record grammar.
//!
//! The block body is a run of newline-terminated records, each classified by
//! a literal prefix:
//!
//! | prefix  | fields                          | effect                              |
//! |---------|---------------------------------|-------------------------------------|
//! | `path\t`| rest of line                    | sets [`BuildManifest::path`]        |
//! | `mod\t` | path, version\[, checksum\]     | sets [`BuildManifest::main`]        |
//! | `dep\t` | path, version\[, checksum\]     | appends to [`BuildManifest::deps`]  |
//! | `=>\t`  | path, version, checksum         | replaces the preceding mod/dep      |
//!
//! Lines with any other prefix are skipped, so newer writers can add record
//! kinds. Text after the last newline is not a record.
use super::{BuildManifest, DependencyRef};
use core::fmt::{self, Display};

const PATH_LINE: &str = "path\t";
const MOD_LINE: &str = "mod\t";
const DEP_LINE: &str = "dep\t";
const REP_LINE: &str = "=>\t";

/// Why a record was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseFailure {
    /// A `mod` or `dep` record without 2 or 3 tab-separated fields.
    EntryFieldCount(usize),
    /// A `=>` record without exactly 3 tab-separated fields.
    ReplaceFieldCount(usize),
    /// A `=>` record with no `mod` or `dep` record directly before it.
    DanglingReplace,
}

impl Display for ParseFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseFailure::EntryFieldCount(n) => {
                write!(f, "expected 2 or 3 tab-separated fields, found {n}")
            }
            ParseFailure::ReplaceFieldCount(n) => {
                write!(f, "replace record needs 3 tab-separated fields, found {n}")
            }
            ParseFailure::DanglingReplace => f.write_str("replace record without a module to replace"),
        }
    }
}

/// A malformed record, with its 1-based line number inside the block body.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("line {line}: {reason}")]
pub struct ManifestParseError {
    pub line: usize,
    pub reason: ParseFailure,
}

#[derive(Clone, Copy)]
enum Current {
    None,
    Main,
    Dep(usize),
}

fn read_entry(fields: &str) -> Result<DependencyRef, ParseFailure> {
    let elem: Vec<&str> = fields.split('\t').collect();
    match elem.as_slice() {
        [path, version] => Ok(DependencyRef::new(*path, *version)),
        [path, version, sum] => {
            let mut dep = DependencyRef::new(*path, *version);
            dep.checksum = non_empty(sum);
            Ok(dep)
        }
        other => Err(ParseFailure::EntryFieldCount(other.len())),
    }
}

#[inline]
fn non_empty(s: &str) -> Option<String> {
    (!s.is_empty()).then(|| s.to_string())
}

/// Parses the text body of a build-info block (framing already removed).
pub fn parse_records(data: &str) -> Result<BuildManifest, ManifestParseError> {
    let mut info = BuildManifest::default();
    let mut current = Current::None;
    let mut rest = data;
    let mut line_no = 0;

    while let Some(i) = rest.find('\n') {
        let line = &rest[..i];
        rest = &rest[i + 1..];
        line_no += 1;
        let fail = |reason| ManifestParseError {
            line: line_no,
            reason,
        };

        if let Some(elem) = line.strip_prefix(PATH_LINE) {
            info.path = elem.to_string();
            current = Current::None;
        } else if let Some(elem) = line.strip_prefix(MOD_LINE) {
            info.main = read_entry(elem).map_err(fail)?;
            current = Current::Main;
        } else if let Some(elem) = line.strip_prefix(DEP_LINE) {
            info.deps.push(read_entry(elem).map_err(fail)?);
            current = Current::Dep(info.deps.len() - 1);
        } else if let Some(elem) = line.strip_prefix(REP_LINE) {
            let fields: Vec<&str> = elem.split('\t').collect();
            let [path, version, sum] = fields.as_slice() else {
                return Err(fail(ParseFailure::ReplaceFieldCount(fields.len())));
            };
            let target = match current {
                Current::None => return Err(fail(ParseFailure::DanglingReplace)),
                Current::Main => &mut info.main,
                Current::Dep(idx) => &mut info.deps[idx],
            };
            target.replacement = Some(Box::new(DependencyRef {
                path: path.to_string(),
                version: version.to_string(),
                checksum: non_empty(sum),
                replacement: None,
            }));
            current = Current::None;
        }
    }
    Ok(info)
}
