//! Bucketer implementation.
use sha1::{Digest, Sha1};

/// Number of buckets percentage splits are expressed in. A bucket is 0.01%.
pub const BUCKET_SIZE: u32 = 10_000;

/// Maps a hash key and salt to a bucket in `[0, bucket_size)`.
pub trait Bucketer {
    /// Bucket of `hash_key` salted with `salt`. Deterministic across calls and processes.
    fn bucket(&self, hash_key: &str, salt: &str, bucket_size: u32) -> u32;
}

/// The default (and only) bucketer.
///
/// Takes the last four bytes of SHA-1 over `hash_key + salt` as a big-endian unsigned integer.
/// The result must stay identical to other FeatureProbe SDKs, otherwise users would land in
/// different percentage groups depending on the SDK evaluating the toggle.
pub struct Sha1Bucketer;

impl Bucketer for Sha1Bucketer {
    fn bucket(&self, hash_key: &str, salt: &str, bucket_size: u32) -> u32 {
        let mut hasher = Sha1::new();
        hasher.update(hash_key.as_bytes());
        hasher.update(salt.as_bytes());
        let hash = hasher.finalize();

        let mut tail = [0u8; 4];
        tail.copy_from_slice(&hash[hash.len() - 4..]);
        u32::from_be_bytes(tail) % bucket_size
    }
}
