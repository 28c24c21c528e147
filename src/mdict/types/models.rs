//! Header, block table and entry models shared by the parsers and the reader.

use std::collections::{BTreeMap, HashMap};

use encoding_rs::Encoding;
use super::error::{MdictError, Result};

/// Text encoding of keys and records.
pub type MdictEncoding = &'static Encoding;

/// Optional 16-byte master key.
pub type MasterKey = Option<[u8; 16]>;

/// Style number to `(opening tags, closing tags)`, from the header `StyleSheet` attribute.
pub type StyleSheet = HashMap<u8, (String, String)>;

/// The header `Encrypted` bitmask: 0x01 covers record blocks (and the v2 key
/// section info), 0x02 the key index.
#[derive(Debug, Default, Clone, Copy)]
pub struct EncryptionFlags {
    pub encrypt_record_blocks: bool,
    pub encrypt_key_index: bool,
}

/// User-visible metadata from the header attributes.
#[derive(Debug, Clone, Default)]
pub struct MdictMetadata {
    pub title: String,
    pub engine_version: String,
    pub description: Option<String>,
    pub stylesheet: StyleSheet,
    /// UUID used for key derivation in MDict v3.0 files.
    pub uuid: Option<Vec<u8>>,
    /// Every attribute of the header element, verbatim.
    pub attributes: BTreeMap<String, String>,
}

/// Everything the index and block parsers need from the header.
#[derive(Debug)]
pub struct MdictHeader {
    pub version: MdictVersion,
    pub encoding: MdictEncoding,
    pub encryption_flags: EncryptionFlags,
    /// From the passcode, or the UUID of v3 files.
    pub master_key: MasterKey,
    pub metadata: MdictMetadata,
}

/// A headword and the offset of its record in the record stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyEntry {
    pub id: u64,
    pub text: String,
}

/// Where one block lives on disk and in the decompressed stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockMeta {
    /// Stored size, prefix included.
    pub compressed_size: u64,
    pub decompressed_size: u64,
    pub file_offset: u64,
    /// Sum of the decompressed sizes of all earlier blocks.
    pub decompressed_offset: u64,
    /// Declared number of key entries. Always 0 for record blocks.
    pub num_entries: u64,
}

impl BlockMeta {
    pub fn decompressed_end(&self) -> u64 {
        self.decompressed_offset + self.decompressed_size
    }
}

/// Key block descriptors plus the declared total entry count.
#[derive(Debug, Clone, Default)]
pub struct KeyBlockInfo {
    pub blocks: Vec<BlockMeta>,
    pub num_entries: u64,
}

/// Record block descriptors forming the virtual decompressed record stream.
#[derive(Debug, Clone, Default)]
pub struct RecordBlockInfo {
    pub blocks: Vec<BlockMeta>,
    pub total_decompressed_size: u64,
}

impl RecordBlockInfo {
    pub fn new(blocks: Vec<BlockMeta>) -> Self {
        let total_decompressed_size = blocks.iter().map(|b| b.decompressed_size).sum();
        Self { blocks, total_decompressed_size }
    }

    /// Finds the block containing `offset` by binary search over the prefix sums.
    pub fn locate(&self, offset: u64) -> Option<usize> {
        let after = self.blocks.partition_point(|block| block.decompressed_offset <= offset);
        let index = after.checked_sub(1)?;
        (offset < self.blocks[index].decompressed_end()).then_some(index)
    }
}

/// A record's block and its byte range inside the decompressed block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordInfo {
    pub block_index: usize,
    pub offset_in_block: u64,
    pub size: u64,
}

/// A decoded record: either content or an `@@@LINK=` redirect to another key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordData<T> {
    Content(T),
    Redirect(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MdictVersion {
    V1,
    V2,
    V3,
}

impl MdictVersion {
    /// Width of counts, sizes and offsets: 4 bytes in v1, 8 afterwards.
    pub fn number_width(&self) -> usize {
        match self {
            MdictVersion::V1 => 4,
            MdictVersion::V2 | MdictVersion::V3 => 8,
        }
    }

    /// Width of the length prefix before first/last keys in the key index.
    pub fn small_number_width(&self) -> usize {
        match self {
            MdictVersion::V1 => 1,
            MdictVersion::V2 | MdictVersion::V3 => 2,
        }
    }
}

impl TryFrom<f32> for MdictVersion {
    type Error = MdictError;
    fn try_from(v: f32) -> Result<Self> {
        if v < 2.0 {
            Ok(Self::V1)
        } else if v < 3.0 {
            Ok(Self::V2)
        } else if v < 4.0 {
            Ok(Self::V3)
        } else {
            Err(MdictError::UnsupportedVersion(v))
        }
    }
}

/// Section tags of v3 files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum V3BlockType {
    RecordData = 0x01000000,
    RecordIndex = 0x02000000,
    KeyData = 0x03000000,
    KeyIndex = 0x04000000,
}

impl TryFrom<u32> for V3BlockType {
    type Error = MdictError;
    fn try_from(value: u32) -> Result<Self> {
        match value {
            0x01000000 => Ok(Self::RecordData),
            0x02000000 => Ok(Self::RecordIndex),
            0x03000000 => Ok(Self::KeyData),
            0x04000000 => Ok(Self::KeyIndex),
            _ => Err(MdictError::InvalidFormat(
                format!("Unknown v3 block type: {:#010x}", value)
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockType {
    Key,
    Record,
}

impl std::fmt::Display for BlockType {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            BlockType::Key => write!(f, "key"),
            BlockType::Record => write!(f, "record"),
        }
    }
}
