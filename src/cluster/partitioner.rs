use super::partition::PARTITIONS;

/// Maps a record key to the partition that owns it.
pub trait KeyPartitioner: Send + Sync {
    fn partition_id(&self, set_name: &str, key: &[u8]) -> u32;
}

/// FNV-1a over the set name and key bytes, reduced to the partition count.
#[derive(Debug, Clone, Copy, Default)]
pub struct StablePartitioner;

impl KeyPartitioner for StablePartitioner {
    fn partition_id(&self, set_name: &str, key: &[u8]) -> u32 {
        stable_partition_for(set_name, key, PARTITIONS as u32)
    }
}

/// Computes a stable partition id for a key using FNV-1a.
///
/// The set name and the key are separated by a `0xff` byte so that
/// `("ab", "c")` and `("a", "bc")` land on different partitions.
pub fn stable_partition_for(set_name: &str, key: &[u8], partition_count: u32) -> u32 {
    if partition_count == 0 {
        return 0;
    }
    let mut hash = 14695981039346656037u64;
    for byte in set_name.as_bytes() {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(1099511628211);
    }
    hash ^= 0xff;
    hash = hash.wrapping_mul(1099511628211);
    for byte in key {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(1099511628211);
    }
    (hash % partition_count as u64) as u32
}
