// Shared with build.rs. The sentinels are kept hex encoded so the raw marker
// bytes never appear in a binary except inside a real build-info block.

/// Hex form of the 16-byte marker that opens a build-info block.
pub const START_SENTINEL_HEX: &str = "3077af0c9274080241e1c107e6d618e6";

/// Hex form of the 16-byte marker that closes a build-info block.
pub const END_SENTINEL_HEX: &str = "f932433186182072008242104116d8f2";

/// Length of each sentinel and of each inner framing run.
pub const FRAME_LEN: usize = 16;
