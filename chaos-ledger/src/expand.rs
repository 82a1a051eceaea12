//! Bit expansion / whitening
//!
//! `expand_bits(digest, n, mode)` is a pure function: the same inputs
//! always yield the same `n` bits, MSB-first within every derived byte.
//!
//! | Mode           | Byte source                                                   |
//! |----------------|---------------------------------------------------------------|
//! | `Raw`          | `SHA256(digest ‖ "chaos-expand-v1" ‖ counter_le8)` blocks      |
//! | `LfsrWhitened` | `Raw` blocks XORed with a xorshift32 stream seeded per block  |
//! | `Drbg`         | HMAC-DRBG instantiated with the digest, one `generate` call   |
//! | `AesCounter`   | AES-256-CTR keystream; key/IV derived from the digest         |

use crate::drbg::HmacDrbg;
use crate::types::{Bitstream, PathDigest, WhiteningMode};
use aes::Aes256;
use ctr::cipher::{KeyIvInit, StreamCipher};
use sha2::{Digest, Sha256};

type Aes256Ctr = ctr::Ctr128BE<Aes256>;

/// Label for counter-mode SHA-256 blocks
pub const EXPAND_LABEL: &[u8] = b"chaos-expand-v1";
/// Label for counter blocks produced when the AES path cannot be built
pub const AES_FALLBACK_LABEL: &[u8] = b"chaos-expand-v2";
const AES_KEY_LABEL: &[u8] = b"aes-ctr-key-v1";
const AES_IV_LABEL: &[u8] = b"aes-ctr-iv-v1";
const LFSR_SEED_MASK: u32 = 0xA5A5_A5A5;

/// Expand a path digest into exactly `bit_count` bits
pub fn expand_bits(digest: &PathDigest, bit_count: usize, mode: WhiteningMode) -> Bitstream {
    let needed = bit_count.div_ceil(8);
    let bytes = expand_bytes(digest, needed, mode);
    Bitstream::from_msb_bytes(&bytes, bit_count)
}

/// Derive `len` whitened bytes from a path digest
pub fn expand_bytes(digest: &PathDigest, len: usize, mode: WhiteningMode) -> Vec<u8> {
    if len == 0 {
        return Vec::new();
    }
    match mode {
        WhiteningMode::Raw => counter_blocks(digest, EXPAND_LABEL, len, false),
        WhiteningMode::LfsrWhitened => counter_blocks(digest, EXPAND_LABEL, len, true),
        WhiteningMode::Drbg => HmacDrbg::instantiate(digest.as_bytes()).generate(len),
        WhiteningMode::AesCounter => aes_keystream(digest, len),
    }
}

/// SHA-256 block for one counter value
fn counter_block(digest: &PathDigest, label: &[u8], counter: u64) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(digest.as_bytes());
    hasher.update(label);
    hasher.update(counter.to_le_bytes());
    hasher.finalize().into()
}

fn counter_blocks(digest: &PathDigest, label: &[u8], len: usize, whiten: bool) -> Vec<u8> {
    let mut out = Vec::with_capacity(len.div_ceil(32) * 32);
    let mut counter = 0u64;
    while out.len() < len {
        let mut block = counter_block(digest, label, counter);
        if whiten {
            lfsr_whiten(&mut block);
        }
        out.extend_from_slice(&block);
        counter += 1;
    }
    out.truncate(len);
    out
}

/// XOR each byte with the low byte of a xorshift32 stepped once per byte.
///
/// The register is seeded from the block's own first four bytes (LE).
fn lfsr_whiten(block: &mut [u8; 32]) {
    let mut lfsr = u32::from_le_bytes([block[0], block[1], block[2], block[3]]) ^ LFSR_SEED_MASK;
    for byte in block.iter_mut() {
        lfsr ^= lfsr << 13;
        lfsr ^= lfsr >> 17;
        lfsr ^= lfsr << 5;
        *byte ^= (lfsr & 0xFF) as u8;
    }
}

fn labelled_hash(digest: &PathDigest, label: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(digest.as_bytes());
    hasher.update(label);
    hasher.finalize().into()
}

fn aes_keystream(digest: &PathDigest, len: usize) -> Vec<u8> {
    let key = labelled_hash(digest, AES_KEY_LABEL);
    let iv = labelled_hash(digest, AES_IV_LABEL);

    match Aes256Ctr::new_from_slices(&key, &iv[..16]) {
        Ok(mut cipher) => {
            let mut buf = vec![0u8; len];
            cipher.apply_keystream(&mut buf);
            buf
        }
        Err(e) => {
            tracing::warn!(error = %e, "AES-CTR construction failed, using labelled SHA-256 fallback");
            counter_blocks(digest, AES_FALLBACK_LABEL, len, false)
        }
    }
}

/// Rendering of packed output bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// Lowercase hex of the packed bytes
    #[default]
    Hex,
    /// Packed bytes as-is
    Raw,
    /// One `'0'`/`'1'` character per bit
    BitString,
}

impl OutputFormat {
    /// Parse a request string (`hex`, `raw`/`bytes`, `bin`); unknown → `Hex`
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "raw" | "bytes" => OutputFormat::Raw,
            "bin" => OutputFormat::BitString,
            _ => OutputFormat::Hex,
        }
    }

    /// Render `bit_count` bits held MSB-first in `packed`
    pub fn render(&self, packed: &[u8], bit_count: usize) -> Vec<u8> {
        match self {
            OutputFormat::Hex => hex::encode(packed).into_bytes(),
            OutputFormat::Raw => packed.to_vec(),
            OutputFormat::BitString => Bitstream::from_msb_bytes(packed, bit_count)
                .to_bit_string()
                .into_bytes(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn digest() -> PathDigest {
        PathDigest::from_bytes([0x5Au8; 32])
    }

    const MODES: [WhiteningMode; 4] = [
        WhiteningMode::Raw,
        WhiteningMode::LfsrWhitened,
        WhiteningMode::Drbg,
        WhiteningMode::AesCounter,
    ];

    #[test]
    fn test_exact_bit_counts() {
        for mode in MODES {
            for n in [0usize, 1, 7, 8, 9, 257, 1000] {
                assert_eq!(expand_bits(&digest(), n, mode).len(), n, "{mode:?} n={n}");
            }
        }
    }

    #[test]
    fn test_million_bits() {
        for mode in MODES {
            let bits = expand_bits(&digest(), 1_000_000, mode);
            assert_eq!(bits.len(), 1_000_000);
            assert!(bits.as_bits().iter().all(|b| *b <= 1));
        }
    }

    #[test]
    fn test_raw_first_block_matches_definition() {
        let mut hasher = Sha256::new();
        hasher.update(digest().as_bytes());
        hasher.update(b"chaos-expand-v1");
        hasher.update(0u64.to_le_bytes());
        let block: [u8; 32] = hasher.finalize().into();

        let bits = expand_bits(&digest(), 256, WhiteningMode::Raw);
        assert_eq!(bits.pack(), block.to_vec());
    }

    #[test]
    fn test_raw_second_block_uses_counter_one() {
        let bytes = expand_bytes(&digest(), 64, WhiteningMode::Raw);
        assert_eq!(&bytes[32..], &counter_block(&digest(), EXPAND_LABEL, 1));
    }

    #[test]
    fn test_lfsr_is_raw_xor_xorshift() {
        let raw = expand_bytes(&digest(), 32, WhiteningMode::Raw);
        let whitened = expand_bytes(&digest(), 32, WhiteningMode::LfsrWhitened);

        let mut lfsr = u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]) ^ 0xA5A5A5A5;
        for i in 0..32 {
            lfsr ^= lfsr << 13;
            lfsr ^= lfsr >> 17;
            lfsr ^= lfsr << 5;
            assert_eq!(whitened[i], raw[i] ^ (lfsr & 0xFF) as u8);
        }
    }

    #[test]
    fn test_drbg_mode_is_single_generate_call() {
        let expected = HmacDrbg::instantiate(digest().as_bytes()).generate(50);
        assert_eq!(expand_bytes(&digest(), 50, WhiteningMode::Drbg), expected);
    }

    #[test]
    fn test_aes_prefix_stable_and_distinct() {
        let short = expand_bytes(&digest(), 20, WhiteningMode::AesCounter);
        let long = expand_bytes(&digest(), 100, WhiteningMode::AesCounter);
        assert_eq!(&long[..20], &short[..]);
        assert_ne!(long, expand_bytes(&digest(), 100, WhiteningMode::Raw));
        assert_ne!(
            long,
            counter_blocks(&digest(), AES_FALLBACK_LABEL, 100, false)
        );
    }

    #[test]
    fn test_modes_are_distinct() {
        let outputs: Vec<Vec<u8>> = MODES
            .iter()
            .map(|m| expand_bytes(&digest(), 64, *m))
            .collect();
        for i in 0..outputs.len() {
            for j in (i + 1)..outputs.len() {
                assert_ne!(outputs[i], outputs[j]);
            }
        }
    }

    #[test]
    fn test_tail_bits_are_prefix_of_full_byte() {
        let full = expand_bits(&digest(), 16, WhiteningMode::Raw);
        let partial = expand_bits(&digest(), 11, WhiteningMode::Raw);
        assert_eq!(partial.as_bits(), &full.as_bits()[..11]);
        let packed = partial.pack();
        assert_eq!(packed.len(), 2);
        assert_eq!(packed[1] & 0x1F, 0);
    }

    #[test]
    fn test_output_format_render() {
        let packed = [0b1010_0000u8];
        assert_eq!(OutputFormat::parse("bin").render(&packed, 3), b"101".to_vec());
        assert_eq!(OutputFormat::parse("").render(&packed, 3), b"a0".to_vec());
        assert_eq!(OutputFormat::parse("bytes").render(&packed, 3), packed.to_vec());
    }
}
