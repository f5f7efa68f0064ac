//! Access token issued on install.
//!
//! Only a salted SHA-256 digest of the token is retained. Logs carry a short
//! fingerprint of that digest, never the token itself.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::RngCore;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

const TOKEN_BYTES: usize = 32;
const SALT_BYTES: usize = 16;
const FINGERPRINT_BYTES: usize = 6;

/// Salted digest of an issued access token.
#[derive(Clone)]
pub struct TokenDigest {
    salt: [u8; SALT_BYTES],
    digest: [u8; 32],
}

impl TokenDigest {
    /// Generate a fresh token. Returns the plaintext and its digest.
    pub fn issue() -> (String, Self) {
        let mut rng = rand::thread_rng();
        let mut secret = [0u8; TOKEN_BYTES];
        rng.fill_bytes(&mut secret);
        let mut salt = [0u8; SALT_BYTES];
        rng.fill_bytes(&mut salt);

        let token = URL_SAFE_NO_PAD.encode(secret);
        let digest = salted_digest(&salt, &token);
        (token, Self { salt, digest })
    }

    /// Check a presented token in constant time.
    pub fn verify(&self, token: &str) -> bool {
        let presented = salted_digest(&self.salt, token);
        bool::from(presented[..].ct_eq(&self.digest[..]))
    }

    /// Short identifier of the token, safe to log.
    pub fn fingerprint(&self) -> String {
        let hashed = Sha256::digest(self.digest);
        URL_SAFE_NO_PAD.encode(&hashed[..FINGERPRINT_BYTES])
    }
}

impl std::fmt::Debug for TokenDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenDigest")
            .field("fingerprint", &self.fingerprint())
            .finish()
    }
}

fn salted_digest(salt: &[u8], token: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(salt);
    hasher.update(token.as_bytes());
    let mut digest = [0u8; 32];
    digest.copy_from_slice(&hasher.finalize());
    digest
}
