//! # Block Content Parsing & Decoding
//!
//! This module is responsible for taking a raw, on-disk block and turning it
//! into structured data (key entries or a record payload). It sits between
//! the high-level `reader` (which handles I/O) and the low-level `codec`
//! (which handles pure data transformation).
//!
//! ## Responsibilities
//! 1.  **Parse Block Prefix**: Reads the 8-byte prefix to determine compression,
//!     encryption, and checksum information.
//! 2.  **Decode Payload**: Looks up the cipher and decompressor for the prefix
//!     tags and runs them.
//! 3.  **Verify Checksum**: Validates the block's integrity.
//! 4.  **Parse Entries**: Parses the decompressed data into `KeyEntry` structs.
//! 5.  **Extract Record**: Slices a record payload out of a decompressed block.

use std::cmp::min;

use adler2::adler32_slice;
use byteorder::{BigEndian, ByteOrder, LittleEndian};
use log::trace;
use ripemd::{Digest, Ripemd128};

use crate::mdict::codec::{compression, crypto};
use crate::mdict::types::error::{MdictError, Result};
use crate::mdict::types::filetypes::FileType;
use crate::mdict::types::models::*;
use crate::mdict::utils;

/// The 8-byte prefix in front of every compressed block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockPrefix {
    pub compression_tag: u8,
    pub encryption_tag: u8,
    /// Number of leading payload bytes covered by the cipher.
    pub encrypted_len: usize,
    pub checksum: u32,
}

impl BlockPrefix {
    pub const LEN: usize = 8;

    pub fn parse(raw_block: &[u8]) -> Result<Self> {
        if raw_block.len() < Self::LEN {
            return Err(MdictError::InvalidFormat(format!(
                "Block too short: {} bytes, prefix needs {}",
                raw_block.len(),
                Self::LEN
            )));
        }
        let info = LittleEndian::read_u32(&raw_block[0..4]);
        Ok(Self {
            compression_tag: (info & 0xF) as u8,
            encryption_tag: ((info >> 4) & 0xF) as u8,
            encrypted_len: ((info >> 8) & 0xFF) as usize,
            checksum: BigEndian::read_u32(&raw_block[4..8]),
        })
    }
}

fn verify_checksum(data: &[u8], expected: u32) -> Result<()> {
    let actual = adler32_slice(data);
    if actual != expected {
        return Err(MdictError::ChecksumMismatch { expected, actual });
    }
    Ok(())
}

/// Decodes a raw, compressed/encrypted block payload.
///
/// The checksum covers the decompressed data for v1/v2 and the decrypted,
/// still compressed payload for v3.
pub fn decode_block(
    raw_block: &mut [u8],
    expected_decompressed_size: u64,
    master_key: Option<&[u8; 16]>,
    version: MdictVersion,
) -> Result<Vec<u8>> {
    let prefix = BlockPrefix::parse(raw_block)?;
    let cipher = crypto::cipher_for(prefix.encryption_tag)?;
    let decompressor = compression::decompressor_for(prefix.compression_tag)?;

    trace!(
        "Decoding block: compression={}, encryption={}, expected_size={} bytes",
        decompressor.name(),
        cipher.name(),
        expected_decompressed_size
    );

    let (checksum_bytes, payload) = raw_block.split_at_mut(BlockPrefix::LEN);

    if prefix.encryption_tag != 0 {
        let decryption_key: [u8; 16] = match master_key {
            Some(key) => *key,
            None => {
                trace!("Deriving decryption key from block checksum");
                let mut hasher = Ripemd128::new();
                hasher.update(&checksum_bytes[4..8]);
                hasher.finalize().into()
            }
        };
        let decrypt_len = min(prefix.encrypted_len, payload.len());
        cipher.decrypt_in_place(&mut payload[..decrypt_len], &decryption_key);
    }

    if version == MdictVersion::V3 {
        verify_checksum(payload, prefix.checksum)?;
    }

    let mut decompressed = Vec::new();
    decompressor.decompress_into(&mut decompressed, payload, expected_decompressed_size)?;

    if version != MdictVersion::V3 {
        verify_checksum(&decompressed, prefix.checksum)?;
    }

    Ok(decompressed)
}

/// Parses key entries from a decompressed key block.
///
/// Each entry is `[record offset][text][terminator unit]`.
pub fn parse_key_entries(
    data: &[u8],
    version: MdictVersion,
    encoding: MdictEncoding,
) -> Result<Vec<KeyEntry>> {
    let mut entries = Vec::new();
    let mut reader = data;

    while !reader.is_empty() {
        let record_id = utils::read_number(&mut reader, version.number_width())?;
        let text = read_null_terminated_string(&mut reader, encoding)?;
        entries.push(KeyEntry { id: record_id, text });
    }

    Ok(entries)
}

/// Slices a record out of a decompressed record block and processes it.
pub fn parse_record<T: FileType>(
    block_bytes: &[u8],
    info: &RecordInfo,
    encoding: MdictEncoding,
    stylesheet: &StyleSheet,
) -> Result<RecordData<T::Record>> {
    let record_slice = record_slice(block_bytes, info)?;
    T::process_record(record_slice, encoding, stylesheet)
}

/// Returns the raw payload bytes of a record within its decompressed block.
pub fn record_slice<'a>(block_bytes: &'a [u8], info: &RecordInfo) -> Result<&'a [u8]> {
    let start = info.offset_in_block;
    let end = start.checked_add(info.size).filter(|end| *end <= block_bytes.len() as u64);
    match end {
        Some(end) => Ok(&block_bytes[start as usize..end as usize]),
        None => Err(MdictError::SizeMismatch {
            context: format!("record at offset {} in block", start),
            expected: start.saturating_add(info.size),
            found: block_bytes.len() as u64,
        }),
    }
}

/// Reads a null-terminated string from a byte slice and advances the slice.
fn read_null_terminated_string(reader: &mut &[u8], encoding: MdictEncoding) -> Result<String> {
    let width = utils::unit_width(encoding);
    let end_pos = if width == 2 {
        reader
            .chunks_exact(2)
            .position(|chunk| chunk == [0, 0])
            .map(|chunk_index| chunk_index * 2)
    } else {
        reader.iter().position(|&byte| byte == 0)
    }
    .ok_or_else(|| MdictError::InvalidFormat("Missing null terminator in key text".to_string()))?;

    let (decoded, _) = encoding.decode_without_bom_handling(&reader[..end_pos]);
    *reader = &reader[end_pos + width..];

    Ok(decoded.into_owned())
}
