//! HMAC-DRBG (SP800-90A style, HMAC-SHA256)
//!
//! Not strictly conformant: there is no reseed counter and no
//! personalization string beyond the seed material. Every `generate`
//! call ends with an `update(∅)` ratchet, so two calls on the same
//! instance never return the same block.

use crate::types::{MasterSeed, Transaction};
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Deterministic byte generator keyed by seed material
#[derive(Clone)]
pub struct HmacDrbg {
    k: [u8; 32],
    v: [u8; 32],
}

impl std::fmt::Debug for HmacDrbg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HmacDrbg").finish_non_exhaustive()
    }
}

impl HmacDrbg {
    /// `K = 0x00…`, `V = 0x01…`, then `update(seed_material)`
    pub fn instantiate(seed_material: &[u8]) -> Self {
        let mut drbg = Self {
            k: [0x00; 32],
            v: [0x01; 32],
        };
        drbg.update(seed_material);
        drbg
    }

    fn hmac(key: &[u8; 32], parts: &[&[u8]]) -> [u8; 32] {
        let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts keys of any length");
        for part in parts {
            mac.update(part);
        }
        mac.finalize().into_bytes().into()
    }

    /// Mix `additional_input` into the state
    pub fn update(&mut self, additional_input: &[u8]) {
        self.k = Self::hmac(&self.k, &[&self.v, &[0x00], additional_input]);
        self.v = Self::hmac(&self.k, &[&self.v]);

        if !additional_input.is_empty() {
            self.k = Self::hmac(&self.k, &[&self.v, &[0x01], additional_input]);
            self.v = Self::hmac(&self.k, &[&self.v]);
        }
    }

    /// Produce `n` bytes, then ratchet the state
    pub fn generate(&mut self, n: usize) -> Vec<u8> {
        let mut out = Vec::with_capacity(n.div_ceil(32) * 32);
        while out.len() < n {
            self.v = Self::hmac(&self.k, &[&self.v]);
            out.extend_from_slice(&self.v);
        }
        out.truncate(n);
        self.update(&[]);
        out
    }
}

/// Seed material `seed (8 LE) || sub_seed_0 (8 LE) || …`
pub fn replay_seed_material(seed: MasterSeed, sub_seeds: &[i64]) -> Vec<u8> {
    let mut material = Vec::with_capacity(8 * (1 + sub_seeds.len()));
    material.extend_from_slice(&seed.to_le_bytes());
    for sub_seed in sub_seeds {
        material.extend_from_slice(&sub_seed.to_le_bytes());
    }
    material
}

/// On-demand byte extraction bound to a transaction's seed provenance
#[derive(Debug, Clone)]
pub struct ReplayGenerator {
    drbg: HmacDrbg,
}

impl ReplayGenerator {
    /// Key from a master seed and its sub-seeds
    pub fn from_seed(seed: MasterSeed, sub_seeds: &[i64]) -> Self {
        Self {
            drbg: HmacDrbg::instantiate(&replay_seed_material(seed, sub_seeds)),
        }
    }

    /// Key from a committed transaction (independent of whitening mode)
    pub fn from_transaction(tx: &Transaction) -> Self {
        Self::from_seed(tx.master_seed, &tx.provenance.sub_seeds)
    }

    /// Next `n` bytes
    pub fn read_bytes(&mut self, n: usize) -> Vec<u8> {
        self.drbg.generate(n)
    }

    /// Next `ceil(bit_count / 8)` bytes with the unused low bits of the last byte zeroed
    pub fn read_bits_packed(&mut self, bit_count: usize) -> Vec<u8> {
        let needed = bit_count.div_ceil(8);
        let mut data = self.read_bytes(needed);
        let keep = bit_count % 8;
        if keep != 0 {
            if let Some(last) = data.last_mut() {
                *last &= 0xFFu8 << (8 - keep);
            }
        }
        data
    }
}
