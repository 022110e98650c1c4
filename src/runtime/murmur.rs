//! MurmurHash64A.
//!
//! The single hash family used everywhere: key hashing in compiled
//! pipelines (through the `hash` runtime symbol), sketch feeding, and the
//! thread-token probe of the context table (through [`hash64`]).

pub const MURMUR_MAGIC: u64 = 0xc6a4_a793_5bd1_e995;
pub const MURMUR_SHIFT: u32 = 47;
pub const MURMUR_SEED: u64 = 0x8445_d61a_4e77_4912;

/// Hash a variable-length key, processing 8-byte chunks plus a tail.
pub fn murmur_hash(key: &[u8], seed: u64) -> u64 {
    let m = MURMUR_MAGIC;
    let r = MURMUR_SHIFT;
    let mut h = seed ^ (key.len() as u64).wrapping_mul(m);

    let mut chunks = key.chunks_exact(8);
    for chunk in &mut chunks {
        let mut k = u64::from_le_bytes(chunk.try_into().unwrap());
        k = k.wrapping_mul(m);
        k ^= k >> r;
        k = k.wrapping_mul(m);
        h ^= k;
        h = h.wrapping_mul(m);
    }

    let tail = chunks.remainder();
    if !tail.is_empty() {
        let mut k = 0u64;
        for (i, &b) in tail.iter().enumerate() {
            k |= u64::from(b) << (8 * i);
        }
        h ^= k;
        h = h.wrapping_mul(m);
    }

    h ^= h >> r;
    h = h.wrapping_mul(m);
    h ^= h >> r;
    h
}

/// Fast path for a single 64-bit key.
pub fn hash64(k: u64) -> u64 {
    let m = MURMUR_MAGIC;
    let r = MURMUR_SHIFT;
    let mut h = MURMUR_SEED ^ 8u64.wrapping_mul(m);
    let mut k = k.wrapping_mul(m);
    k ^= k >> r;
    k = k.wrapping_mul(m);
    h ^= k;
    h = h.wrapping_mul(m);
    h ^= h >> r;
    h = h.wrapping_mul(m);
    h ^= h >> r;
    h
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn hash64_matches_generic_on_eight_bytes() {
        for k in [0u64, 1, 42, u64::MAX, 0xdead_beef_cafe_f00d] {
            assert_eq!(hash64(k), murmur_hash(&k.to_le_bytes(), MURMUR_SEED));
        }
    }

    #[test]
    fn tail_bytes_matter() {
        assert_ne!(
            murmur_hash(b"abcdefgh1", MURMUR_SEED),
            murmur_hash(b"abcdefgh2", MURMUR_SEED)
        );
    }

    proptest! {
        #[test]
        fn deterministic(data in proptest::collection::vec(any::<u8>(), 0..64)) {
            prop_assert_eq!(murmur_hash(&data, MURMUR_SEED), murmur_hash(&data, MURMUR_SEED));
        }
    }
}
