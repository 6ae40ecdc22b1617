//! PKCE (RFC 7636) verifier and S256 challenge.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::RngCore;
use sha2::{Digest, Sha256};

/// Cryptographically random code verifier.
///
/// 64 random bytes base64url-encoded come to ~86 characters, comfortably
/// inside the 43..=128 range the RFC requires.
#[derive(Debug, Clone)]
pub struct Verifier(String);

impl Verifier {
    pub fn generate() -> Self {
        let mut bytes = [0u8; 64];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(URL_SAFE_NO_PAD.encode(bytes))
    }

    /// `base64url(sha256(verifier))`, the S256 challenge method.
    pub fn challenge(&self) -> String {
        URL_SAFE_NO_PAD.encode(Sha256::digest(self.0.as_bytes()))
    }

    pub fn method() -> &'static str {
        "S256"
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}
