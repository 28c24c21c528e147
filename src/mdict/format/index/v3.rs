//! Index parser for MDict format version 3.0.
//!
//! V3 introduces a fundamentally different structure from v1/v2:
//! - Four separate sections: KeyData, KeyIndex, RecordData, RecordIndex
//! - Sections can appear in any order (requires scanning)
//! - Each section has a 12-byte header (4-byte type + 8-byte size)
//! - Index sections are compressed and describe the blocks of their data section
//! - Data blocks have inline size headers that may conflict with the index

use std::io::{Read, Seek, SeekFrom};

use byteorder::{BigEndian, ReadBytesExt};
use log::{debug, info, trace, warn};

use super::common;
use crate::mdict::{
    format::content,
    types::{
        error::{MdictError, Result},
        models::{BlockMeta, BlockType, KeyBlockInfo, MdictHeader, RecordBlockInfo, V3BlockType},
    },
    utils,
};

/// One index entry: `(entries in block, stored block size, decompressed size)`.
type IndexEntry = (u64, u64, u64);

/// Parses the complete index structure for v3.0 MDict files.
///
/// 1. Scan the file to locate all four sections
/// 2. Decode the key and record indexes
/// 3. Walk the data sections and reconcile inline sizes with the indexes
pub fn parse<R: Read + Seek>(file: &mut R, header: &MdictHeader) -> Result<(KeyBlockInfo, RecordBlockInfo)> {
    info!("Parsing v3.0 MDict file");

    let start = file.stream_position()?;
    let stream_len = utils::stream_len(file)?;
    let offsets = scan_block_offsets(file, start)?;

    let key_index = parse_index(file, header, offsets.key_index, BlockType::Key)
        .map_err(common::key_index_corrupt)?;
    let record_index = parse_index(file, header, offsets.record_index, BlockType::Record)?;

    let key_blocks = parse_block_metadata(file, offsets.key_data, &key_index, BlockType::Key, stream_len)?;
    let record_blocks =
        parse_block_metadata(file, offsets.record_data, &record_index, BlockType::Record, stream_len)?;

    let num_entries = key_blocks.iter().map(|b| b.num_entries).sum();
    info!(
        "V3.0 file opened: {} key blocks, {} record blocks, {} entries",
        key_blocks.len(),
        record_blocks.len(),
        num_entries
    );

    Ok((
        KeyBlockInfo {
            blocks: key_blocks,
            num_entries,
        },
        RecordBlockInfo::new(record_blocks),
    ))
}

/// Reads data block headers and reconciles them with index metadata.
///
/// When the inline sizes disagree with the index, the index wins.
fn parse_block_metadata<R: Read + Seek>(
    file: &mut R,
    offset: u64,
    index: &[IndexEntry],
    block_type: BlockType,
    stream_len: u64,
) -> Result<Vec<BlockMeta>> {
    info!("Reading v3.0 {} blocks metadata", block_type);

    file.seek(SeekFrom::Start(offset))?;
    let num_blocks = file.read_u32::<BigEndian>()? as usize;
    let _total_size = file.read_u64::<BigEndian>()?;
    debug!("{} data section: {} blocks", block_type, num_blocks);

    if num_blocks != index.len() {
        return Err(MdictError::CountMismatch {
            item_type: format!("{} blocks in v3 index", block_type),
            expected: num_blocks as u64,
            found: index.len() as u64,
        });
    }

    let mut blocks = Vec::with_capacity(index.len());
    let mut decompressed_offset = 0u64;

    for (i, &(num_entries, index_block_size, index_decomp)) in index.iter().enumerate() {
        let inline_decomp = u64::from(file.read_u32::<BigEndian>()?);
        let inline_comp = u64::from(file.read_u32::<BigEndian>()?);

        // Index size includes the 8-byte inline header
        let index_comp = index_block_size.saturating_sub(8);
        let (compressed_size, decompressed_size) = if (inline_comp, inline_decomp) != (index_comp, index_decomp) {
            warn!(
                "{} block {} size mismatch (inline: {}, {}) vs (index: {}, {}). Using index values.",
                block_type, i, inline_comp, inline_decomp, index_comp, index_decomp
            );
            (index_comp, index_decomp)
        } else {
            (inline_comp, inline_decomp)
        };

        let file_offset = file.stream_position()?;
        let block = BlockMeta {
            compressed_size,
            decompressed_size,
            file_offset,
            decompressed_offset,
            num_entries,
        };
        common::check_block(&block, stream_len, block_type, i)?;
        blocks.push(block);
        file.seek(SeekFrom::Start(file_offset + compressed_size))?;
        decompressed_offset += decompressed_size;
    }

    debug!("Parsed {} {} block metadata entries", blocks.len(), block_type);
    Ok(blocks)
}

/// Decodes a v3 index section.
///
/// Index sections hold `[num sub-blocks u32][total size u64]` followed by
/// compressed sub-blocks. Key entries are `entry count, first key, last key,
/// block size, decompressed size`; record entries are just the two sizes.
fn parse_index<R: Read + Seek>(
    file: &mut R,
    header: &MdictHeader,
    offset: u64,
    block_type: BlockType,
) -> Result<Vec<IndexEntry>> {
    info!("Parsing and decoding v3.0 {} index", block_type);

    file.seek(SeekFrom::Start(offset))?;
    let num_blocks = file.read_u32::<BigEndian>()? as usize;
    let _total_size = file.read_u64::<BigEndian>()?;
    debug!("{} index contains {} sub-blocks", block_type, num_blocks);

    let mut entries = Vec::new();
    for _ in 0..num_blocks {
        let decompressed_size = u64::from(file.read_u32::<BigEndian>()?);
        let compressed_size = u64::from(file.read_u32::<BigEndian>()?);

        let mut raw = utils::read_declared(file, compressed_size, "v3 index block")?;
        let decompressed = content::decode_block(
            &mut raw,
            decompressed_size,
            header.master_key.as_ref(),
            header.version,
        )?;

        if block_type == BlockType::Record && decompressed.len() % 16 != 0 {
            return Err(MdictError::InvalidFormat(format!(
                "Record index block has invalid size: {}",
                decompressed.len()
            )));
        }

        let mut reader = decompressed.as_slice();
        while !reader.is_empty() {
            let entry = match block_type {
                BlockType::Key => {
                    let num_entries = u64::from(reader.read_u32::<BigEndian>().map_err(|_| {
                        MdictError::InvalidFormat("Truncated key index entry".to_string())
                    })?);
                    common::skip_text(&mut reader, header.version, header.encoding)?;
                    common::skip_text(&mut reader, header.version, header.encoding)?;
                    let block_size = utils::read_number(&mut reader, 4)?;
                    let decompressed_size = utils::read_number(&mut reader, 4)?;
                    (num_entries, block_size, decompressed_size)
                }
                BlockType::Record => {
                    let block_size = utils::read_number(&mut reader, 8)?;
                    let decompressed_size = utils::read_number(&mut reader, 8)?;
                    (0, block_size, decompressed_size)
                }
            };
            entries.push(entry);
        }
    }

    debug!("Parsed {} {} index entries", entries.len(), block_type);
    Ok(entries)
}

/// Data offsets of the four v3 sections.
#[derive(Debug, Clone, Copy)]
pub struct SectionOffsets {
    pub key_data: u64,
    pub key_index: u64,
    pub record_data: u64,
    pub record_index: u64,
}

/// Scans the v3 file structure to locate all four required sections.
///
/// Each section starts with a 12-byte header:
/// - 4 bytes: section type identifier
/// - 8 bytes: section data size (excluding header)
pub fn scan_block_offsets<R: Read + Seek>(file: &mut R, start_offset: u64) -> Result<SectionOffsets> {
    info!("Scanning v3.0 file structure for section offsets");

    file.seek(SeekFrom::Start(start_offset))?;

    let mut offsets = [
        (V3BlockType::KeyData, None),
        (V3BlockType::KeyIndex, None),
        (V3BlockType::RecordData, None),
        (V3BlockType::RecordIndex, None),
    ];

    while let Ok(block_type_raw) = file.read_u32::<BigEndian>() {
        let block_type = V3BlockType::try_from(block_type_raw)?;
        let block_size = file.read_u64::<BigEndian>()?;
        let block_data_offset = file.stream_position()?;

        trace!(
            "Found section: type={:?}, size={} bytes, offset={}",
            block_type, block_size, block_data_offset
        );

        if let Some(slot) = offsets.iter_mut().find(|(t, _)| *t == block_type) {
            slot.1 = Some(block_data_offset);
        }
        let next = block_data_offset.checked_add(block_size).ok_or_else(|| {
            MdictError::InvalidFormat(format!("{:?} section size {} overflows", block_type, block_size))
        })?;
        file.seek(SeekFrom::Start(next))?;
    }

    let get_offset = |block_type: V3BlockType| {
        offsets
            .iter()
            .find(|(t, _)| *t == block_type)
            .and_then(|(_, o)| *o)
            .ok_or_else(|| MdictError::InvalidFormat(format!("Missing {:?} section in v3.0 file", block_type)))
    };

    let sections = SectionOffsets {
        key_data: get_offset(V3BlockType::KeyData)?,
        key_index: get_offset(V3BlockType::KeyIndex)?,
        record_data: get_offset(V3BlockType::RecordData)?,
        record_index: get_offset(V3BlockType::RecordIndex)?,
    };
    debug!("V3.0 section scan complete: {:?}", sections);
    Ok(sections)
}
