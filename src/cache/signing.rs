/*!
 * Keyed Hashing
 * HMAC-SHA256 helpers for cache key derivation and entry signatures
 */

use crate::core::config::ConfigError;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// HMAC-SHA256 keyed with a server-side secret
#[derive(Clone)]
pub struct KeyedHasher {
    mac: HmacSha256,
}

impl KeyedHasher {
    pub fn new(secret: &[u8]) -> Result<Self, ConfigError> {
        let mac = HmacSha256::new_from_slice(secret)
            .map_err(|e| ConfigError::Invalid(format!("invalid cache secret: {}", e)))?;
        Ok(Self { mac })
    }

    fn digest(&self, parts: &[&[u8]]) -> HmacSha256 {
        let mut mac = self.mac.clone();
        for part in parts {
            // Length prefix keeps ("ab","c") distinct from ("a","bc")
            mac.update(&(part.len() as u64).to_be_bytes());
            mac.update(part);
        }
        mac
    }

    /// Hex-encoded MAC over `parts`
    pub fn sign(&self, parts: &[&[u8]]) -> String {
        hex::encode(self.digest(parts).finalize().into_bytes())
    }

    /// Constant-time verification of a hex signature
    pub fn verify(&self, parts: &[&[u8]], signature: &str) -> bool {
        match hex::decode(signature) {
            Ok(expected) => self.digest(parts).verify_slice(&expected).is_ok(),
            Err(_) => false,
        }
    }
}

impl std::fmt::Debug for KeyedHasher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("KeyedHasher(..)")
    }
}
