use serde::Serialize;

const FNV1A_OFFSET: u64 = 0xcbf29ce484222325;
const FNV1A_PRIME: u64 = 0x100000001b3;

fn fnv1a_init() -> u64 {
    FNV1A_OFFSET
}

fn fnv1a_bytes(mut hash: u64, bytes: &[u8]) -> u64 {
    for byte in bytes {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(FNV1A_PRIME);
    }
    hash
}

pub fn fnv1a_hash(bytes: &[u8]) -> u64 {
    fnv1a_bytes(fnv1a_init(), bytes)
}

/// Canonical byte encoding used for keys that must be stable across runs.
pub fn canonical_bytes<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, bincode::Error> {
    bincode::serialize(value)
}

/// FNV-1a over the canonical encoding; never depends on process-randomized hashers.
pub fn stable_hash<T: Serialize + ?Sized>(value: &T) -> Result<u64, bincode::Error> {
    Ok(fnv1a_hash(&canonical_bytes(value)?))
}
