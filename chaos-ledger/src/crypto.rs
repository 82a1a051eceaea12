//! Cryptographic operations for the ledger
//!
//! This module provides:
//! - SHA-256 commitments for path digests, bitstreams and blocks
//! - The published hash binding a transaction into the chain
//! - HMAC-SHA256 payload signing with the ledger's signing key

use crate::types::{Bitstream, PathDigest};
use crate::{Error, Result};
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::{Digest, Sha256};
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

/// Domain label appended when deriving the published hash
pub const PUBLISHED_LABEL: &[u8] = b"published-hash-v2";

/// Hash arbitrary bytes using SHA-256
pub fn hash_bytes(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// `data_hash = SHA256(PathDigest)`
pub fn data_hash(digest: &PathDigest) -> [u8; 32] {
    hash_bytes(digest.as_bytes())
}

/// `bits_hash = SHA256(bitstream)`, one byte (0 or 1) per bit
pub fn bits_hash(bits: &Bitstream) -> [u8; 32] {
    hash_bytes(bits.as_bits())
}

/// `published = SHA256(bits_hash || data_hash || "published-hash-v2")`
pub fn published_hash(bits_hash: &[u8; 32], data_hash: &[u8; 32]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(bits_hash);
    hasher.update(data_hash);
    hasher.update(PUBLISHED_LABEL);
    hasher.finalize().into()
}

/// Hex-encoded commitments recorded on a transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Commitments {
    /// SHA-256 of the path digest
    pub data_hash: String,
    /// SHA-256 of the bitstream
    pub bits_hash: String,
    /// Chain-level commitment
    pub published: String,
}

impl Commitments {
    /// Compute all three commitments for one generation
    pub fn compute(digest: &PathDigest, bits: &Bitstream) -> Self {
        let data = data_hash(digest);
        let bits = bits_hash(bits);
        let published = published_hash(&bits, &data);

        Self {
            data_hash: hex::encode(data),
            bits_hash: hex::encode(bits),
            published: hex::encode(published),
        }
    }
}

/// Block hash over colon-joined decimal/string fields
pub fn block_hash(
    index: usize,
    timestamp: i64,
    tx_id: &Uuid,
    data_hash: &str,
    prev_hash: &str,
) -> String {
    let preimage = format!("{}:{}:{}:{}:{}", index, timestamp, tx_id, data_hash, prev_hash);
    hex::encode(hash_bytes(preimage.as_bytes()))
}

/// First 16 hex chars of SHA-256 over the concatenated URLs
pub fn url_fingerprint(urls: &[String]) -> String {
    let mut hasher = Sha256::new();
    for url in urls {
        hasher.update(url.as_bytes());
    }
    let mut encoded = hex::encode(hasher.finalize());
    encoded.truncate(16);
    encoded
}

/// Generate a random transaction ID
pub fn generate_tx_id() -> Uuid {
    Uuid::new_v4()
}

/// HMAC-SHA256 key for signing payloads handed out by the node
#[derive(Clone)]
pub struct PayloadSigner {
    key: [u8; 32],
}

impl std::fmt::Debug for PayloadSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PayloadSigner").finish_non_exhaustive()
    }
}

impl PayloadSigner {
    /// Generate a new random key
    pub fn generate() -> Self {
        let mut key = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut key);
        Self { key }
    }

    /// Restore from the hex form stored in the snapshot
    pub fn from_hex(encoded: &str) -> Result<Self> {
        let bytes = hex::decode(encoded.trim())
            .map_err(|e| Error::Storage(format!("Invalid signing key encoding: {}", e)))?;
        let key: [u8; 32] = bytes
            .try_into()
            .map_err(|_| Error::Storage("Signing key must be 32 bytes".to_string()))?;
        Ok(Self { key })
    }

    /// Hex form for the snapshot
    pub fn to_hex(&self) -> String {
        hex::encode(self.key)
    }

    /// Hex HMAC-SHA256 over `payload`
    pub fn sign(&self, payload: &[u8]) -> String {
        let mut mac = self.mac();
        mac.update(payload);
        hex::encode(mac.finalize().into_bytes())
    }

    /// Constant-time check of a hex signature
    pub fn verify(&self, payload: &[u8], signature_hex: &str) -> bool {
        let Ok(signature) = hex::decode(signature_hex) else {
            return false;
        };
        let mut mac = self.mac();
        mac.update(payload);
        mac.verify_slice(&signature).is_ok()
    }

    fn mac(&self) -> HmacSha256 {
        HmacSha256::new_from_slice(&self.key).expect("HMAC accepts keys of any length")
    }
}
