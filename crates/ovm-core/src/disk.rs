//! Data-disk sizing.
//!
//! Each distribution gets a byte-exact distinct disk size so the guest
//! can locate its `/dev/sdN` by size alone. The offset is derived from
//! an FNV-1a hash of the name, keeping the result deterministic across
//! hosts.

/// Base size before the per-name offset (301 GiB).
const BASE_SIZE: u64 = 301 * 1024 * 1024 * 1024;

/// Disk sector size used for the guest `-s` argument.
pub const SECTOR_SIZE: u64 = 512;

/// Returns the provisioned size in bytes of the data disk for `name`.
#[must_use]
pub fn data_size(name: &str) -> u64 {
    BASE_SIZE - SECTOR_SIZE * u64::from(fnv1a32(name) % 50_000 + 1)
}

/// Returns the size in 512-byte sectors.
#[must_use]
pub fn data_sectors(name: &str) -> u64 {
    data_size(name) / SECTOR_SIZE
}

/// 32-bit FNV-1a. The guest derives the same offset from the same
/// hash, so the exact variant matters; the ecosystem crates only
/// expose the 64-bit one.
fn fnv1a32(s: &str) -> u32 {
    const OFFSET_BASIS: u32 = 0x811c_9dc5;
    const PRIME: u32 = 0x0100_0193;

    let mut hash = OFFSET_BASIS;
    for byte in s.as_bytes() {
        hash ^= u32::from(*byte);
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fnv1a32_reference_vectors() {
        assert_eq!(fnv1a32(""), 0x811c_9dc5);
        assert_eq!(fnv1a32("a"), 0xe40c_292c);
        assert_eq!(fnv1a32("foobar"), 0xbf9c_f968);
    }

    #[test]
    fn size_is_deterministic() {
        assert_eq!(data_size("alpha"), data_size("alpha"));
    }

    #[test]
    fn size_stays_within_the_offset_window() {
        for name in ["a", "alpha", "some-very-long-distribution-name", ""] {
            let size = data_size(name);
            assert!(size < BASE_SIZE);
            assert!(size >= BASE_SIZE - SECTOR_SIZE * 50_000);
            assert_eq!(size % SECTOR_SIZE, 0);
        }
    }

    #[test]
    fn distinct_names_get_distinct_sizes() {
        assert_ne!(data_size("alpha"), data_size("beta"));
        assert_ne!(data_size("alpha"), data_size("alphb"));
    }

    #[test]
    fn sectors_match_bytes() {
        assert_eq!(data_sectors("alpha") * SECTOR_SIZE, data_size("alpha"));
    }
}
