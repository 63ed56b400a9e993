//! Maps a key to a 64-bit hash; high 32 bits select the primary bucket index, low bits produce
//! the raw tag. See `SPEC_FULL.md` §4.1 — the reference leaves the hash-function family as an
//! external collaborator, so this crate uses an off-the-shelf `twox-hash` rather than hand-rolling
//! a multiply-shift hash. The only contract is determinism (within one filter instance) and
//! adequate avalanche.

use std::hash::{Hash, Hasher as _};

use twox_hash::XxHash64;

use crate::bucket::BitsPerTag;

/// Holds the single seed a filter uses for every hash it computes, chosen once at construction.
#[derive(Debug, Clone, Copy)]
pub struct FilterHasher {
    seed: u64,
}

impl FilterHasher {
    pub fn new(seed: u64) -> Self {
        Self { seed }
    }

    pub fn hash_key<K: Hash>(&self, key: &K) -> u64 {
        let mut hasher = XxHash64::with_seed(self.seed);
        key.hash(&mut hasher);
        hasher.finish()
    }
}

/// Masks a 64-bit hash value down to a bucket index. `num_buckets` must be a power of two.
pub fn index_hash(hv: u64, num_buckets: usize) -> usize {
    debug_assert!(num_buckets.is_power_of_two());
    (hv as usize) & (num_buckets - 1)
}

/// Derives the raw tag (always a long tag, `2 * bits_per_tag` bits) from a hash value's low bits,
/// bumping a zero result to one — zero is reserved as the "empty" sentinel.
pub fn tag_hash(hv: u64, bits_per_tag: BitsPerTag) -> u32 {
    let full_width = 2 * bits_per_tag.width();
    let mask: u64 = if full_width >= 64 {
        u64::MAX
    } else {
        (1u64 << full_width) - 1
    };
    let mut tag = (hv & mask) as u32;
    if tag == 0 {
        tag = 1;
    }
    tag
}

/// Hashes `key` once and derives both the primary bucket index and the raw tag from it, per
/// `GenerateIndexTagHash` in the reference.
pub fn generate_index_tag_hash<K: Hash>(
    hasher: &FilterHasher,
    key: &K,
    num_buckets: usize,
    bits_per_tag: BitsPerTag,
) -> (usize, u32) {
    let hash = hasher.hash_key(key);
    let index = index_hash(hash >> 32, num_buckets);
    let tag = tag_hash(hash, bits_per_tag);
    (index, tag)
}

/// The second legal bucket for a given `(index, tag)` pair. Involutive: applying it twice with the
/// same tag returns the original index.
pub fn alt_index(index: usize, tag: u32, num_buckets: usize) -> usize {
    let mixed = (index as u32) ^ tag.wrapping_mul(0x5bd1_e995);
    index_hash(mixed as u64, num_buckets)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_hash_masks_to_power_of_two_range() {
        assert_eq!(index_hash(0b1_1010_1010, 8), 0b010);
        assert_eq!(index_hash(u64::MAX, 8192), 8191);
    }

    #[test]
    fn tag_hash_never_returns_zero() {
        for bits_per_tag in [BitsPerTag::Eight, BitsPerTag::Twelve, BitsPerTag::Sixteen] {
            assert_eq!(tag_hash(0, bits_per_tag), 1);
            assert_ne!(tag_hash(u64::MAX, bits_per_tag), 0);
        }
    }

    #[test]
    fn tag_hash_stays_within_width() {
        let bits_per_tag = BitsPerTag::Twelve;
        let tag = tag_hash(u64::MAX, bits_per_tag);
        assert!(tag <= (1u32 << (2 * bits_per_tag.width())) - 1);
    }

    #[test]
    fn alt_index_is_involutive() {
        let num_buckets = 8192;
        for index in [0usize, 1, 17, 4095, 8191] {
            for tag in [1u32, 2, 100, 0xABCD, 0xFFFF_FFFF] {
                let alt = alt_index(index, tag, num_buckets);
                assert_eq!(alt_index(alt, tag, num_buckets), index);
            }
        }
    }

    #[test]
    fn hash_key_is_deterministic_within_an_instance() {
        let hasher = FilterHasher::new(7);
        assert_eq!(hasher.hash_key(&42u64), hasher.hash_key(&42u64));
        assert_ne!(hasher.hash_key(&42u64), hasher.hash_key(&43u64));
    }
}
