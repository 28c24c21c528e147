//! Block ciphers and key derivation.
//!
//! Two ciphers appear in MDict files: a byte-chained XOR keyed by a
//! RIPEMD-128 digest, and Salsa20/8. The encryption nibble of a block's info
//! word selects one through [`BlockCipher`].

use crate::mdict::types::error::{MdictError, Result};
use byteorder::{ByteOrder, LittleEndian};
use log::{debug, trace};
use ripemd::{Digest, Ripemd128};
use twox_hash::XxHash64;

/// A block decryption scheme. Decryption happens in place.
pub trait BlockCipher: Send + Sync {
    fn name(&self) -> &'static str;

    fn decrypt_in_place(&self, data: &mut [u8], key: &[u8; 16]);
}

#[derive(Debug)]
pub struct Plain;

#[derive(Debug)]
pub struct FastXor;

#[derive(Debug)]
pub struct Salsa20x8;

impl BlockCipher for Plain {
    fn name(&self) -> &'static str {
        "none"
    }

    fn decrypt_in_place(&self, data: &mut [u8], _key: &[u8; 16]) {
        trace!("No encryption, skipping {} bytes", data.len());
    }
}

impl BlockCipher for FastXor {
    fn name(&self) -> &'static str {
        "fast-xor"
    }

    fn decrypt_in_place(&self, data: &mut [u8], key: &[u8; 16]) {
        fast_decrypt(data, key);
    }
}

impl BlockCipher for Salsa20x8 {
    fn name(&self) -> &'static str {
        "salsa20/8"
    }

    fn decrypt_in_place(&self, data: &mut [u8], key: &[u8; 16]) {
        salsa_decrypt(data, key);
    }
}

/// Registered ciphers, keyed by block encryption tag.
static CIPHERS: [(u8, &dyn BlockCipher); 3] = [(0, &Plain), (1, &FastXor), (2, &Salsa20x8)];

/// Looks up the cipher registered for `tag`.
pub fn cipher_for(tag: u8) -> Result<&'static dyn BlockCipher> {
    CIPHERS
        .iter()
        .find(|(registered, _)| *registered == tag)
        .map(|(_, cipher)| *cipher)
        .ok_or(MdictError::UnsupportedEncryption(tag))
}

/// Derives the master decryption key from a registration code and user email.
///
/// The registration code is Salsa20/8 ciphertext keyed by RIPEMD-128 of the email.
pub fn derive_master_key(reg_code: &[u8], user_id: &[u8]) -> Result<[u8; 16]> {
    debug!("Decrypting {}-byte registration code", reg_code.len());

    let mut hasher = Ripemd128::new();
    hasher.update(user_id);
    let salsa_key: [u8; 16] = hasher.finalize().into();

    let mut master_key_bytes = reg_code.to_vec();
    salsa_decrypt(&mut master_key_bytes, &salsa_key);

    master_key_bytes.try_into().map_err(|_| {
        MdictError::DecryptionError("Registration code must be exactly 16 bytes".to_string())
    })
}

/// Decrypts data using the fast XOR-based cipher (MDict v1/v2).
///
/// For each byte at position `i`: rotate left by 4 bits, then XOR with
/// `previous_ciphertext_byte ^ i ^ key[i % key.len()]`. The initial previous byte is `0x36`.
pub fn fast_decrypt(data: &mut [u8], key: &[u8]) {
    trace!("Decrypting {} bytes with fast XOR method", data.len());

    let mut prev = 0x36u8;
    for (i, byte) in data.iter_mut().enumerate() {
        let current = *byte;
        *byte = current.rotate_left(4) ^ prev ^ (i as u8) ^ key[i % key.len()];
        prev = current;
    }
}

/// Inverse of [`fast_decrypt`].
pub fn fast_encrypt(data: &mut [u8], key: &[u8]) {
    let mut prev = 0x36u8;
    for (i, byte) in data.iter_mut().enumerate() {
        let cipher = (*byte ^ prev ^ (i as u8) ^ key[i % key.len()]).rotate_left(4);
        *byte = cipher;
        prev = cipher;
    }
}

/// Derives the key that obfuscates MDict v2.x key index blocks.
///
/// `Key = RIPEMD-128(checksum_bytes || 0x3695 as little-endian u32)`, where the
/// checksum bytes are bytes 4..8 of the raw key index block.
pub fn derive_key_for_v2_index(key_index_block: &[u8]) -> Result<[u8; 16]> {
    let checksum = key_index_block.get(4..8).ok_or_else(|| {
        MdictError::InvalidFormat("Key index block too short for checksum".to_string())
    })?;
    trace!("Deriving key index key");

    let mut hasher = Ripemd128::new();
    hasher.update(checksum);
    hasher.update(0x3695u32.to_le_bytes());
    Ok(hasher.finalize().into())
}

/// Derives a 16-byte master key from a UUID (MDict v3.0).
///
/// Each half of the UUID is hashed with xxHash64 (seed 0); the two
/// big-endian digests are concatenated.
pub fn derive_key_from_uuid(uuid: &[u8]) -> [u8; 16] {
    debug!("Deriving master key from UUID ({} bytes)", uuid.len());

    let mid = uuid.len().div_ceil(2);
    let (first_half, second_half) = uuid.split_at(mid);

    let mut key = [0u8; 16];
    key[..8].copy_from_slice(&XxHash64::oneshot(0, first_half).to_be_bytes());
    key[8..].copy_from_slice(&XxHash64::oneshot(0, second_half).to_be_bytes());
    key
}

/// Decrypts data in-place using the Salsa20/8 stream cipher.
///
/// Salsa20 with 8 rounds and a 128-bit key, zero nonce. The state matrix:
/// ```text
/// [c0, k0, k1, k2]
/// [k3, c1, iv0, iv1]
/// [ctr0, ctr1, c2, k4]
/// [k5, k6, k7, c3]
/// ```
/// For a 16-byte key, `k0..k3` and `k4..k7` are identical.
pub fn salsa_decrypt(data: &mut [u8], key16: &[u8; 16]) {
    trace!("Decrypting {} bytes with Salsa20/8 (128-bit key)", data.len());

    let mut state = [0u32; 16];

    // "expand 16-byte k"
    state[0] = 0x61707865;
    state[5] = 0x3120646e;
    state[10] = 0x79622d36;
    state[15] = 0x6b206574;
    for i in 0..4 {
        state[1 + i] = LittleEndian::read_u32(&key16[i * 4..]);
        state[11 + i] = LittleEndian::read_u32(&key16[i * 4..]);
    }
    let mut keystream_block = [0u8; 64];

    for (block_index, chunk) in data.chunks_mut(64).enumerate() {
        state[8] = block_index as u32;
        state[9] = (block_index as u64 >> 32) as u32;

        let mut x = state;
        for _ in 0..4 {
            quarter_round(&mut x, 0, 4, 8, 12);
            quarter_round(&mut x, 5, 9, 13, 1);
            quarter_round(&mut x, 10, 14, 2, 6);
            quarter_round(&mut x, 15, 3, 7, 11);
            quarter_round(&mut x, 0, 1, 2, 3);
            quarter_round(&mut x, 5, 6, 7, 4);
            quarter_round(&mut x, 10, 11, 8, 9);
            quarter_round(&mut x, 15, 12, 13, 14);
        }

        for (i, val) in x.iter_mut().enumerate() {
            *val = val.wrapping_add(state[i]);
        }
        for (i, word) in x.iter().enumerate() {
            LittleEndian::write_u32(&mut keystream_block[i * 4..], *word);
        }
        for (byte, key) in chunk.iter_mut().zip(keystream_block.iter()) {
            *byte ^= key;
        }
    }
}

#[inline(always)]
fn quarter_round(x: &mut [u32; 16], a: usize, b: usize, c: usize, d: usize) {
    x[b] ^= x[a].wrapping_add(x[d]).rotate_left(7);
    x[c] ^= x[b].wrapping_add(x[a]).rotate_left(9);
    x[d] ^= x[c].wrapping_add(x[b]).rotate_left(13);
    x[a] ^= x[d].wrapping_add(x[c]).rotate_left(18);
}
