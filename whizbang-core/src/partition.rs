//! Deterministic stream-to-partition hashing.
//!
//! `compute_partition` must produce the same result regardless of which
//! language or process calls it, since both this crate and the database's
//! own `compute_partition` SQL function (see `whizbang-postgres/migrations`)
//! need to agree. FNV-1a is chosen over `std`'s `DefaultHasher` for exactly
//! this reason: `DefaultHasher`'s algorithm and seed are unspecified and may
//! change between Rust releases, which would silently rebalance every
//! partition assignment on a toolchain upgrade.

use crate::ids::StreamKey;

const FNV_OFFSET_BASIS: u64 = 0xcbf29ce484222325;
const FNV_PRIME: u64 = 0x100000001b3;

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash = FNV_OFFSET_BASIS;
    for byte in bytes {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// Maps a stream to one of `partition_count` partitions. Stable across
/// restarts and processes: same `stream_id`, same `partition_count`, same
/// result, always.
pub fn compute_partition(stream_id: StreamKey, partition_count: u32) -> u32 {
    assert!(partition_count > 0, "partition_count must be positive");
    let hash = fnv1a(stream_id.as_uuid().as_bytes());
    (hash % u64::from(partition_count)) as u32
}

/// Assigns partitions to the set of currently-live instances, deterministically
/// and as evenly as the partition count allows. Instance ids are sorted first
/// so that the same live set always produces the same assignment regardless
/// of iteration order.
pub fn balance_partitions(partition_count: u32, mut instance_ids: Vec<String>) -> Vec<(u32, String)> {
    instance_ids.sort();
    if instance_ids.is_empty() {
        return Vec::new();
    }
    (0..partition_count)
        .map(|partition| {
            let owner = instance_ids[(partition as usize) % instance_ids.len()].clone();
            (partition, owner)
        })
        .collect()
}
