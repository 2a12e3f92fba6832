use crate::data::Compression;

/// Longest magic sequence inspected by [`detect_compression`].
pub const MAX_MAGIC_LEN: usize = 6;

/// Identify a compressed payload from its first bytes.
pub fn detect_compression(data: &[u8]) -> Option<Compression> {
    match data {
        [0x1F, 0x8B, ..] => Some(Compression::Gzip),
        [0x28, 0xB5, 0x2F, 0xFD, ..] => Some(Compression::Zstd),
        [0xFD, 0x37, 0x7A, 0x58, 0x5A, 0x00, ..] => Some(Compression::Xz),
        [0x42, 0x5A, 0x68, ..] => Some(Compression::Bzip2),
        _ => None,
    }
}
