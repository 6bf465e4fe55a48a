//! CRC-32 over stored containers

/// CRC-32 (IEEE, reflected, seed 0) of `bytes`
pub fn crc32(bytes: &[u8]) -> u32 {
    let mut hasher = flate2::Crc::new();
    hasher.update(bytes);
    hasher.sum()
}
