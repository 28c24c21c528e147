//! Parser for MDict format versions 1.x and 2.x.
//!
//! ```text
//! [key section info]   v1: 4 x u32 / v2: 5 x u64 + Adler-32
//! [key index]          v1: raw / v2: prefixed, compressed, optionally obfuscated
//! [key blocks]
//! [record section info] 4 x number
//! [record index]       (compressed size, decompressed size) pairs
//! [record blocks]
//! ```

use std::io::{Read, Seek, SeekFrom};

use adler2::adler32_slice;
use byteorder::{BigEndian, ReadBytesExt};
use log::{debug, info, warn};

use super::common;
use crate::mdict::{
    codec::{compression, crypto},
    format::content::BlockPrefix,
    types::{
        error::{MdictError, Result},
        models::{BlockMeta, BlockType, KeyBlockInfo, MdictHeader, MdictVersion, RecordBlockInfo},
    },
    utils,
};

/// Declared sizes from the key section info.
#[derive(Debug)]
struct KeySectionInfo {
    num_blocks: u64,
    num_entries: u64,
    index_decompressed_len: Option<u64>,
    index_compressed_len: u64,
    blocks_len: u64,
}

/// Main parser for v1/v2 files. The reader must be positioned right after the header.
pub fn parse<R: Read + Seek>(file: &mut R, header: &MdictHeader) -> Result<(KeyBlockInfo, RecordBlockInfo)> {
    let stream_len = utils::stream_len(file)?;
    let key_info = parse_key_block_index(file, header, stream_len)?;

    // Key blocks end where the record section starts.
    let record_section = key_info
        .blocks
        .last()
        .map_or(file.stream_position()?, |b| b.file_offset + b.compressed_size);
    file.seek(SeekFrom::Start(record_section))?;

    let record_info = parse_record_block_index(file, header, stream_len)?;

    info!(
        "Index parsed: {} key blocks, {} record blocks, {} entries",
        key_info.blocks.len(),
        record_info.blocks.len(),
        key_info.num_entries
    );

    Ok((key_info, record_info))
}

/// Parses the key section info, the key index, and derives the key block table.
fn parse_key_block_index<R: Read + Seek>(
    file: &mut R,
    header: &MdictHeader,
    stream_len: u64,
) -> Result<KeyBlockInfo> {
    info!("Parsing {} block info section", BlockType::Key);

    let section = read_key_section_info(file, header).map_err(common::key_index_corrupt)?;
    info!(
        "Key block info: blocks={}, entries={}, index_compressed={} bytes",
        section.num_blocks, section.num_entries, section.index_compressed_len
    );

    let mut raw_index = utils::read_declared(file, section.index_compressed_len, "key index")
        .map_err(common::key_index_corrupt)?;
    let index_data = decode_key_index(&mut raw_index, section.index_decompressed_len, header)
        .map_err(common::key_index_corrupt)?;

    let first_block_offset = file.stream_position()?;
    let blocks = extract_key_block_metas(&index_data, header, first_block_offset, stream_len)
        .map_err(common::key_index_corrupt)?;

    if blocks.len() as u64 != section.num_blocks {
        return Err(MdictError::CountMismatch {
            item_type: format!("{} blocks in index", BlockType::Key),
            expected: section.num_blocks,
            found: blocks.len() as u64,
        });
    }
    common::check_entry_total(blocks.iter().map(|b| b.num_entries).sum(), section.num_entries)?;

    let actual_len: u64 = blocks.iter().map(|b| b.compressed_size).sum();
    if actual_len != section.blocks_len {
        warn!(
            "Key blocks length mismatch: section info says {}, index sums to {}",
            section.blocks_len, actual_len
        );
    }

    debug!("{} index metadata: {} blocks defined", BlockType::Key, blocks.len());
    Ok(KeyBlockInfo {
        blocks,
        num_entries: section.num_entries,
    })
}

fn read_key_section_info<R: Read>(file: &mut R, header: &MdictHeader) -> Result<KeySectionInfo> {
    let width = header.version.number_width();
    let info_size = match header.version {
        MdictVersion::V1 => 16, // 4 fields * 4 bytes
        _ => 40,                // 5 fields * 8 bytes
    };
    let mut info_bytes = vec![0u8; info_size];
    file.read_exact(&mut info_bytes)?;

    if header.encryption_flags.encrypt_record_blocks {
        let key = header.master_key.as_ref().ok_or(MdictError::PasscodeRequired)?;
        debug!("Decrypting key section info (Salsa20/8)");
        crypto::salsa_decrypt(&mut info_bytes, key);
    }

    if header.version == MdictVersion::V2 {
        let checksum_expected = file.read_u32::<BigEndian>()?;
        let checksum_actual = adler32_slice(&info_bytes);
        if checksum_actual != checksum_expected {
            return Err(MdictError::ChecksumMismatch {
                expected: checksum_expected,
                actual: checksum_actual,
            });
        }
    }

    let mut reader = info_bytes.as_slice();
    let num_blocks = utils::read_number(&mut reader, width)?;
    let num_entries = utils::read_number(&mut reader, width)?;
    let index_decompressed_len = if header.version == MdictVersion::V2 {
        Some(utils::read_number(&mut reader, width)?)
    } else {
        None
    };
    let index_compressed_len = utils::read_number(&mut reader, width)?;
    let blocks_len = utils::read_number(&mut reader, width)?;

    Ok(KeySectionInfo {
        num_blocks,
        num_entries,
        index_decompressed_len,
        index_compressed_len,
        blocks_len,
    })
}

/// Removes the key index obfuscation in place.
///
/// The payload after the 8-byte prefix is fast-XOR decrypted with
/// `RIPEMD-128(checksum bytes || 0x3695 LE)`.
pub fn deobfuscate_key_index(raw_index: &mut [u8]) -> Result<()> {
    let key = crypto::derive_key_for_v2_index(raw_index)?;
    crypto::cipher_for(1)?.decrypt_in_place(&mut raw_index[BlockPrefix::LEN..], &key);
    Ok(())
}

/// Decodes the raw key index block. V1 indexes are stored as-is.
fn decode_key_index(
    raw_index: &mut [u8],
    decompressed_len: Option<u64>,
    header: &MdictHeader,
) -> Result<Vec<u8>> {
    let Some(decompressed_len) = decompressed_len else {
        debug!("Processing v1.x key index ({} bytes, uncompressed)", raw_index.len());
        return Ok(raw_index.to_vec());
    };

    debug!(
        "Processing v2.x key index (compressed: {} bytes, decompressed: {} bytes)",
        raw_index.len(),
        decompressed_len
    );
    let prefix = BlockPrefix::parse(raw_index)?;

    if header.encryption_flags.encrypt_key_index {
        debug!("Decrypting key index (fast XOR with checksum-derived key)");
        deobfuscate_key_index(raw_index)?;
    }

    let decompressed = compression::decompress_payload(
        &raw_index[BlockPrefix::LEN..],
        prefix.compression_tag,
        decompressed_len,
    )?;

    let checksum_actual = adler32_slice(&decompressed);
    if checksum_actual != prefix.checksum {
        return Err(MdictError::ChecksumMismatch {
            expected: prefix.checksum,
            actual: checksum_actual,
        });
    }
    debug!("Key index decoded: {} bytes", decompressed.len());
    Ok(decompressed)
}

/// Extracts key block descriptors from the decoded key index.
fn extract_key_block_metas(
    index_data: &[u8],
    header: &MdictHeader,
    first_block_offset: u64,
    stream_len: u64,
) -> Result<Vec<BlockMeta>> {
    let width = header.version.number_width();
    let mut blocks = Vec::new();
    let mut reader = index_data;
    let mut file_offset = first_block_offset;
    let mut decompressed_offset = 0u64;

    while !reader.is_empty() {
        let num_entries = utils::read_number(&mut reader, width)?;
        // First and last key of the block
        common::skip_text(&mut reader, header.version, header.encoding)?;
        common::skip_text(&mut reader, header.version, header.encoding)?;
        let compressed_size = utils::read_number(&mut reader, width)?;
        let decompressed_size = utils::read_number(&mut reader, width)?;

        let block = BlockMeta {
            compressed_size,
            decompressed_size,
            file_offset,
            decompressed_offset,
            num_entries,
        };
        common::check_block(&block, stream_len, BlockType::Key, blocks.len())?;
        blocks.push(block);
        file_offset += compressed_size;
        decompressed_offset += decompressed_size;
    }

    Ok(blocks)
}

/// Parses the record section info and record index into the prefix-sum table.
fn parse_record_block_index<R: Read + Seek>(
    file: &mut R,
    header: &MdictHeader,
    stream_len: u64,
) -> Result<RecordBlockInfo> {
    info!("Parsing {} block info section", BlockType::Record);
    let width = header.version.number_width();

    let num_blocks = utils::read_number(file, width)?;
    let num_entries = utils::read_number(file, width)?;
    let index_len = utils::read_number(file, width)?;
    let blocks_len = utils::read_number(file, width)?;
    debug!(
        "Record section: blocks={}, entries={}, index={} bytes, data={} bytes",
        num_blocks, num_entries, index_len, blocks_len
    );

    let index_data = utils::read_declared(file, index_len, "record index")?;

    let mut reader = index_data.as_slice();
    let mut file_offset = file.stream_position()?;
    let mut decompressed_offset = 0u64;
    let mut blocks = Vec::new();
    while !reader.is_empty() {
        let compressed_size = utils::read_number(&mut reader, width)?;
        let decompressed_size = utils::read_number(&mut reader, width)?;
        let block = BlockMeta {
            compressed_size,
            decompressed_size,
            file_offset,
            decompressed_offset,
            num_entries: 0,
        };
        common::check_block(&block, stream_len, BlockType::Record, blocks.len())?;
        blocks.push(block);
        file_offset += compressed_size;
        decompressed_offset += decompressed_size;
    }

    if blocks.len() as u64 != num_blocks {
        return Err(MdictError::CountMismatch {
            item_type: format!("{} blocks in index", BlockType::Record),
            expected: num_blocks,
            found: blocks.len() as u64,
        });
    }
    let actual_len: u64 = blocks.iter().map(|b| b.compressed_size).sum();
    if actual_len != blocks_len {
        warn!(
            "Record blocks length mismatch: section info says {}, index sums to {}",
            blocks_len, actual_len
        );
    }

    Ok(RecordBlockInfo::new(blocks))
}
