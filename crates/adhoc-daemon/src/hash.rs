//! A deterministic content hash for correlating a forwarded datagram across hops. `msg_id` (ARQ)
//! and `msg_hash` (reward layer) are the same value: every node along a path recomputes it
//! independently from the payload bytes it is handed, so no explicit id needs to travel on the
//! wire for reward correlation to line up hop to hop. `std::collections::hash_map::DefaultHasher`
//! is unsuitable here since its `RandomState` seed varies per process; FNV-1a is fixed and cheap.
const FNV_OFFSET_BASIS: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

pub fn content_hash(bytes: &[u8]) -> u32 {
    let mut hash = FNV_OFFSET_BASIS;
    for byte in bytes {
        hash ^= u32::from(*byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_bytes_hash_identically() {
        assert_eq!(content_hash(b"hello"), content_hash(b"hello"));
    }

    #[test]
    fn different_bytes_hash_differently() {
        assert_ne!(content_hash(b"hello"), content_hash(b"world"));
    }
}
