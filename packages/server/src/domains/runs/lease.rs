//! Opaque lease tokens.
//!
//! A lease token is minted once per attempt. The plaintext travels to the
//! worker in the lease response and is never persisted; the store keeps only
//! its SHA-256 digest and every worker call is verified by re-hashing the
//! presented value.

use uuid::Uuid;

use crate::common::token_digest;

/// A freshly minted lease token: the plaintext handed to the worker exactly
/// once, and the digest the store persists.
#[derive(Debug, Clone)]
pub struct LeaseToken {
    pub plaintext: String,
    pub digest: String,
}

/// Mint a new opaque lease token.
pub fn mint_lease_token() -> LeaseToken {
    let plaintext = format!(
        "lt_{}{}",
        Uuid::new_v4().simple(),
        Uuid::new_v4().simple()
    );
    let digest = token_digest(&plaintext);
    LeaseToken { plaintext, digest }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokens_are_unique() {
        let a = mint_lease_token();
        let b = mint_lease_token();
        assert_ne!(a.plaintext, b.plaintext);
        assert_ne!(a.digest, b.digest);
    }

    #[test]
    fn test_digest_matches_plaintext() {
        let token = mint_lease_token();
        assert_eq!(token.digest, token_digest(&token.plaintext));
    }

    #[test]
    fn test_plaintext_is_opaque_prefixed() {
        let token = mint_lease_token();
        assert!(token.plaintext.starts_with("lt_"));
        assert_eq!(token.plaintext.len(), 3 + 64);
    }
}
