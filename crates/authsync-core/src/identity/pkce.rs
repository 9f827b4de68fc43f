//! PKCE verifier/challenge pairs for the authorization-code flow.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use sha2::{Digest, Sha256};

/// Challenge method sent to `/authorize`.
pub const CHALLENGE_METHOD: &str = "s256";

/// PKCE code verifier and challenge
pub struct Pkce {
    pub verifier: String,
    pub challenge: String,
}

impl Pkce {
    /// Generates a fresh pair from 32 random bytes.
    pub fn generate() -> Self {
        // Two v4 UUIDs give 32 random bytes
        let mut verifier_bytes = [0u8; 32];
        verifier_bytes[..16].copy_from_slice(uuid::Uuid::new_v4().as_bytes());
        verifier_bytes[16..].copy_from_slice(uuid::Uuid::new_v4().as_bytes());
        let verifier = URL_SAFE_NO_PAD.encode(verifier_bytes);

        Self {
            challenge: challenge_for(&verifier),
            verifier,
        }
    }
}

/// `BASE64URL(SHA256(verifier))` without padding.
pub fn challenge_for(verifier: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hasher.finalize())
}
