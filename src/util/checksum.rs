// Copyright 2018-2026 the Deno authors. MIT license.

use xxhash_rust::xxh3::xxh3_64;
use xxhash_rust::xxh3::xxh3_128;

/// Short content hash used for dep file hashes and browser hashes.
pub fn hash(input: &[u8]) -> String {
  format!("{:016x}", xxh3_64(input))
}

/// Wider hash for cache-directory keys where collisions would mix
/// unrelated projects.
pub fn hash_wide(input: &[u8]) -> String {
  format!("{:032x}", xxh3_128(input))
}

/// Weak ETag over a transform result.
pub fn etag(input: &[u8]) -> String {
  format!("W/\"{}\"", hash(input))
}
