//! Token digest helpers.
//!
//! Bearer tokens and lease tokens are opaque strings. The database only ever
//! stores their SHA-256 digest; verification hashes the presented plaintext
//! and compares digests. Hashing happens on the write path only.

use sha2::{Digest, Sha256};

/// SHA-256 digest of a token, hex-encoded.
pub fn token_digest(raw: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw.as_bytes());
    hex::encode(hasher.finalize())
}
