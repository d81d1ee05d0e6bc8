use sha2::Digest;
use sha2::Sha256;

pub(crate) mod storage;

pub(crate) use self::storage::CacheStorage;

/// Hex-encoded SHA-256 of the given parts, separated so that `("ab", "c")` and `("a", "bc")`
/// hash differently.
pub(crate) fn hash_key<'a>(parts: impl IntoIterator<Item = &'a [u8]>) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update((part.len() as u64).to_be_bytes());
        hasher.update(part);
    }
    hex::encode(hasher.finalize())
}
