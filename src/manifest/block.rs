//! Locating build-info blocks inside raw artifact bytes.
//!
//! Layout, bit-exact:
//!
//! ```text
//! +----------------+---------------+-----------------+---------------+--------------+
//! | start sentinel | inner framing | records (text)  | inner framing | end sentinel |
//! |    16 bytes    |   16 bytes    |  newline-sep.   |   16 bytes    |   16 bytes   |
//! +----------------+---------------+-----------------+---------------+--------------+
//! ```
use super::{
    BuildManifest, ManifestParseError, parse_records,
    sentinel::{END_SENTINEL_HEX, FRAME_LEN, START_SENTINEL_HEX},
};
use once_cell::sync::Lazy;

struct Sentinels {
    start: [u8; FRAME_LEN],
    end: [u8; FRAME_LEN],
}

static SENTINELS: Lazy<Sentinels> = Lazy::new(|| {
    let mut start = [0u8; FRAME_LEN];
    let mut end = [0u8; FRAME_LEN];
    // both are fixed 32-digit constants in sentinel.rs, so decoding cannot fail
    hex::decode_to_slice(START_SENTINEL_HEX, &mut start).expect("start sentinel is valid hex");
    hex::decode_to_slice(END_SENTINEL_HEX, &mut end).expect("end sentinel is valid hex");
    Sentinels { start, end }
});

const INNER_FRAME: [u8; FRAME_LEN] = [0; FRAME_LEN];

#[inline]
fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if haystack.len() < needle.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Finds the record text of the first build-info block in `data`.
///
/// Returns `None` when either sentinel is missing, when the end sentinel does
/// not follow the start sentinel, or when the bytes between them are too short
/// to hold both inner framing runs.
pub fn locate(data: &[u8]) -> Option<&[u8]> {
    let sentinels = &*SENTINELS;
    let start = find(data, &sentinels.start)? + FRAME_LEN;
    let end = start + find(&data[start..], &sentinels.end)?;
    let framed = &data[start..end];
    if framed.len() < 2 * FRAME_LEN {
        return None;
    }
    Some(&framed[FRAME_LEN..framed.len() - FRAME_LEN])
}

/// Extracts and parses the build manifest embedded in `data`.
///
/// `Ok(None)` means the artifact carries no block, which is common and not an
/// error. `Err` means a block was found but its records are malformed.
pub fn extract(data: &[u8]) -> Result<Option<BuildManifest>, ManifestParseError> {
    let Some(body) = locate(data) else {
        return Ok(None);
    };
    let text = String::from_utf8_lossy(body);
    parse_records(&text).map(Some)
}

/// Renders `manifest` as a complete build-info block, the inverse of
/// [`extract`].
pub fn render_block(manifest: &BuildManifest) -> Vec<u8> {
    let sentinels = &*SENTINELS;
    let records = manifest.to_records();
    let mut block = Vec::with_capacity(records.len() + 4 * FRAME_LEN);
    block.extend_from_slice(&sentinels.start);
    block.extend_from_slice(&INNER_FRAME);
    block.extend_from_slice(records.as_bytes());
    block.extend_from_slice(&INNER_FRAME);
    block.extend_from_slice(&sentinels.end);
    block
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::DependencyRef;

    fn sample() -> BuildManifest {
        BuildManifest {
            path: "demo".into(),
            main: DependencyRef::new("demo", "0.1.0"),
            deps: vec![
                DependencyRef::new("log", "0.4.27").with_checksum("abc"),
                DependencyRef::new("elf", "0.8.0")
                    .replaced_by(DependencyRef::new("../elf", "0.8.1").with_checksum("x")),
            ],
        }
    }

    #[test]
    fn sentinel_constants_decode() {
        let sentinels = &*SENTINELS;
        assert_eq!(hex::encode(sentinels.start), START_SENTINEL_HEX);
        assert_eq!(hex::encode(sentinels.end), END_SENTINEL_HEX);
        assert_ne!(sentinels.start, sentinels.end);
    }

    #[test]
    fn no_sentinels_means_no_manifest() {
        assert!(locate(b"").is_none());
        assert_eq!(extract(&[0x7f; 4096]).unwrap(), None);
    }

    #[test]
    fn end_before_start_means_no_manifest() {
        let s = &*SENTINELS;
        let mut data = Vec::new();
        data.extend_from_slice(&s.end);
        data.extend_from_slice(&[0u8; 64]);
        data.extend_from_slice(&s.start);
        data.extend_from_slice(b"dep\ta\tb\n");
        assert_eq!(extract(&data).unwrap(), None);
    }

    #[test]
    fn short_framing_means_no_manifest() {
        let s = &*SENTINELS;
        let mut data = Vec::new();
        data.extend_from_slice(&s.start);
        data.extend_from_slice(&[0u8; 31]);
        data.extend_from_slice(&s.end);
        assert!(locate(&data).is_none());
    }

    #[test]
    fn block_embedded_in_noise() {
        let manifest = sample();
        let mut data = vec![0xcc; 1000];
        data.extend_from_slice(&render_block(&manifest));
        data.extend_from_slice(&[0x90; 333]);
        assert_eq!(extract(&data).unwrap(), Some(manifest));
    }

    #[test]
    fn malformed_block_is_an_error() {
        let s = &*SENTINELS;
        let mut data = Vec::new();
        data.extend_from_slice(&s.start);
        data.extend_from_slice(&INNER_FRAME);
        data.extend_from_slice(b"=>\ta\tb\tc\n");
        data.extend_from_slice(&INNER_FRAME);
        data.extend_from_slice(&s.end);
        assert!(extract(&data).is_err());
    }
}
