//! Common utilities for index parsing across all MDict versions.
//!
//! Shared helpers used by both v1/v2 and v3 index parsers: skipping text
//! fields without decoding them, bounding block descriptors, and classifying
//! key index failures.

use crate::mdict::codec::compression::MAX_BLOCK_SIZE;
use crate::mdict::types::error::{MdictError, Result};
use crate::mdict::types::models::{BlockMeta, BlockType, MdictEncoding, MdictVersion};
use crate::mdict::utils;

/// Skips a length-prefixed text field without decoding its content.
///
/// The prefix counts text units, not bytes. V1 stores no terminator after
/// the text; V2/V3 include one terminator unit.
pub fn skip_text(reader: &mut &[u8], version: MdictVersion, encoding: MdictEncoding) -> Result<()> {
    let text_len_units = utils::read_small_number(reader, version.small_number_width())?;

    let terminator_units = match version {
        MdictVersion::V1 => 0,
        MdictVersion::V2 | MdictVersion::V3 => 1,
    };

    let total_bytes = ((text_len_units + terminator_units) as usize) * utils::unit_width(encoding);
    if reader.len() < total_bytes {
        return Err(MdictError::InvalidFormat("Incomplete key text in index".to_string()));
    }

    *reader = &reader[total_bytes..];
    Ok(())
}

/// Reclassifies integrity failures raised while decoding the key index or key section info.
///
/// Unsupported tags, I/O errors, and missing passcodes keep their own class.
pub fn key_index_corrupt(err: MdictError) -> MdictError {
    match err {
        MdictError::ChecksumMismatch { .. }
        | MdictError::DecompressionError(_)
        | MdictError::DecryptionError(_)
        | MdictError::SizeMismatch { .. }
        | MdictError::InvalidFormat(_) => MdictError::KeyIndexCorrupt(Box::new(err)),
        other => other,
    }
}

/// Rejects a block descriptor that reaches past the end of the file or
/// declares more than [`MAX_BLOCK_SIZE`] decompressed bytes.
pub fn check_block(block: &BlockMeta, stream_len: u64, block_type: BlockType, index: usize) -> Result<()> {
    let end = block.file_offset.checked_add(block.compressed_size);
    if end.map_or(true, |end| end > stream_len) {
        return Err(MdictError::InvalidFormat(format!(
            "{} block {} ({} bytes at offset {}) extends past the end of the file ({} bytes)",
            block_type, index, block.compressed_size, block.file_offset, stream_len
        )));
    }
    if block.decompressed_size > MAX_BLOCK_SIZE {
        return Err(MdictError::InvalidFormat(format!(
            "{} block {} declares {} decompressed bytes",
            block_type, index, block.decompressed_size
        )));
    }
    Ok(())
}

/// Checks that the per-block entry counts add up to the declared total.
pub fn check_entry_total(per_block: u64, declared: u64) -> Result<()> {
    if per_block != declared {
        return Err(MdictError::CountMismatch {
            item_type: "key entries in index".to_string(),
            expected: declared,
            found: per_block,
        });
    }
    Ok(())
}
