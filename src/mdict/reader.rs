use std::fs::File;
use std::io::{ErrorKind, Read, Seek, SeekFrom};
use std::marker::PhantomData;
use std::path::Path;
use std::sync::Mutex;

use log::{debug, info};

use super::cache::{BlockCache, SharedBlock};
use super::format;
use super::format::content;
use super::iter::{KeysIterator, RecordIterator};
use super::types::error::{MdictError, Result};
use super::types::filetypes::FileType;
use super::types::models::*;
use super::utils;

/// Decoder knobs for [`MdictReader::open`].
#[derive(Debug, Clone)]
pub struct ReaderOptions {
    /// `(regcode_hex, user_email)` for files with encrypted record blocks.
    pub passcode: Option<(String, String)>,
    /// Overrides the header encoding of v1/v2 MDX files.
    pub encoding_override: Option<String>,
    /// Applies the header `StyleSheet` to MDX records.
    pub substitute_styles: bool,
    /// Maximum number of decoded record blocks kept in memory.
    pub cache_blocks: usize,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        Self {
            passcode: None,
            encoding_override: None,
            substitute_styles: true,
            cache_blocks: 8,
        }
    }
}

/// The main reader for MDict dictionary files.
///
/// Parses both .mdx (dictionary) and .mdd (data) files.
/// Supports MDict format versions 1.x, 2.x, and 3.x.
///
/// The reader is `Sync`: record blocks can be decoded from several threads.
/// The file handle is locked only for the raw read of a block.
#[derive(Debug)]
pub struct MdictReader<T: FileType> {
    file: Mutex<File>,
    header: MdictHeader,
    key_block_info: KeyBlockInfo,
    record_block_info: RecordBlockInfo,
    cache: BlockCache,
    /// Empty when style substitution is disabled.
    stylesheet: StyleSheet,
    _file_type: PhantomData<T>,
}

impl<T: FileType> MdictReader<T> {
    /// Opens an MDict file and parses its header and block indexes.
    ///
    /// Priority for determining text encoding (highest → lowest):
    /// 1. v3 files are always UTF-8
    /// 2. `FileType::ENCODING_OVERRIDE` (MDD forces UTF-16LE)
    /// 3. `options.encoding_override`
    /// 4. Encoding declared in the dictionary header
    pub fn open(path: impl AsRef<Path>, options: &ReaderOptions) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening {} file: {}", T::DEBUG_NAME, path.display());
        let mut file = File::open(path)?;

        let passcode = options
            .passcode
            .as_ref()
            .map(|(code, email)| (code.as_str(), email.as_str()));
        let mut header = format::header::parse(&mut file, passcode)?;

        if header.version == MdictVersion::V3 {
            debug!("V3.0 detected: forcing UTF-8 encoding");
            header.encoding = encoding_rs::UTF_8;
        } else {
            let user_encoding = options
                .encoding_override
                .as_deref()
                .map(utils::parse_encoding)
                .transpose()?;
            let final_encoding = T::ENCODING_OVERRIDE
                .or(user_encoding)
                .unwrap_or(header.encoding);
            if header.encoding != final_encoding {
                info!(
                    "Text encoding overridden: header='{}', final='{}'",
                    header.encoding.name(),
                    final_encoding.name()
                );
            }
            header.encoding = final_encoding;
        }

        let (key_block_info, record_block_info) = format::index::parse(&mut file, &header)?;

        let stylesheet = if options.substitute_styles {
            header.metadata.stylesheet.clone()
        } else {
            StyleSheet::new()
        };
        let cache = BlockCache::new(record_block_info.blocks.len(), options.cache_blocks);

        info!(
            "{} ready: {} entries, {} key blocks, {} record blocks ({} bytes decompressed)",
            T::DEBUG_NAME,
            key_block_info.num_entries,
            key_block_info.blocks.len(),
            record_block_info.blocks.len(),
            record_block_info.total_decompressed_size
        );

        Ok(Self {
            file: Mutex::new(file),
            header,
            key_block_info,
            record_block_info,
            cache,
            stylesheet,
            _file_type: PhantomData,
        })
    }

    pub fn header(&self) -> &MdictHeader {
        &self.header
    }

    /// Returns the total number of entries declared by the key index.
    pub fn num_entries(&self) -> u64 {
        self.key_block_info.num_entries
    }

    pub fn num_key_blocks(&self) -> usize {
        self.key_block_info.blocks.len()
    }

    pub fn num_record_blocks(&self) -> usize {
        self.record_block_info.blocks.len()
    }

    /// Length of the virtual decompressed record stream.
    pub fn total_record_decomp_size(&self) -> u64 {
        self.record_block_info.total_decompressed_size
    }

    pub fn record_block_info(&self) -> &RecordBlockInfo {
        &self.record_block_info
    }

    /// Iterates key entries lazily. Only key blocks are decoded.
    pub fn iter_keys(&self) -> KeysIterator<'_, T> {
        KeysIterator::new(self)
    }

    /// Returns an iterator over all `(key, record)` pairs in on-disk order.
    pub fn iter_records(&self) -> RecordIterator<'_, T> {
        self.iter_keys().with_record_info().with_records()
    }

    /// Decodes every key block and returns all key entries in on-disk order.
    pub fn key_entries(&self) -> Result<Vec<KeyEntry>> {
        let mut entries = Vec::new();
        for block_index in 0..self.num_key_blocks() {
            entries.extend(self.read_key_block_entries(block_index)?);
        }
        Ok(entries)
    }

    /// Pairs every key entry with the location of its record.
    ///
    /// A record runs up to the next key's offset, or to the end of the
    /// record stream for the last key.
    pub fn entry_locations(&self) -> Result<Vec<(KeyEntry, RecordInfo)>> {
        self.locate_records(self.key_entries()?)
    }

    /// Pairs already decoded key entries with their record locations.
    pub fn locate_records(&self, entries: Vec<KeyEntry>) -> Result<Vec<(KeyEntry, RecordInfo)>> {
        let next_ids: Vec<u64> = entries
            .iter()
            .skip(1)
            .map(|e| e.id)
            .chain(std::iter::once(self.total_record_decomp_size()))
            .collect();
        entries
            .into_iter()
            .zip(next_ids)
            .map(|(entry, next_id)| {
                let info = self.record_info(entry.id, next_id)?;
                Ok((entry, info))
            })
            .collect()
    }

    /// Locates the record spanning `[id, next_id)` in the record stream.
    ///
    /// Binary search over the record block prefix sums finds the owning block.
    pub fn record_info(&self, id: u64, next_id: u64) -> Result<RecordInfo> {
        let block_index = self.record_block_info.locate(id).ok_or_else(|| {
            MdictError::InvalidFormat(format!(
                "Record offset {} is outside the record stream ({} bytes)",
                id, self.record_block_info.total_decompressed_size
            ))
        })?;
        let block = &self.record_block_info.blocks[block_index];

        let size = next_id.checked_sub(id).ok_or_else(|| {
            MdictError::InvalidFormat(format!("Record offsets out of order: {} then {}", id, next_id))
                .in_block(BlockType::Record, block_index)
        })?;
        if next_id > block.decompressed_end() {
            return Err(MdictError::SizeMismatch {
                context: format!("record at stream offset {}", id),
                expected: size,
                found: block.decompressed_end() - id,
            }
            .in_block(BlockType::Record, block_index));
        }

        Ok(RecordInfo {
            block_index,
            offset_in_block: id - block.decompressed_offset,
            size,
        })
    }

    /// Reads, decodes, and processes a single record.
    ///
    /// - For `MdictReader<Mdx>`, the content is a `String`.
    /// - For `MdictReader<Mdd>`, the content is a `Vec<u8>`.
    pub fn read_record(&self, record_info: &RecordInfo) -> Result<RecordData<T::Record>> {
        let block = self.record_block(record_info.block_index)?;
        self.parse_record(&block, record_info)
    }

    /// Processes a record from an already decoded block.
    pub fn parse_record(&self, block_bytes: &[u8], info: &RecordInfo) -> Result<RecordData<T::Record>> {
        content::parse_record::<T>(block_bytes, info, self.header.encoding, &self.stylesheet)
            .map_err(|e| e.in_block(BlockType::Record, info.block_index))
    }

    /// Returns the decoded record block, decoding it at most once while it stays cached.
    pub fn record_block(&self, block_index: usize) -> Result<SharedBlock> {
        let block_meta = *self.record_block_info.blocks.get(block_index).ok_or_else(|| {
            MdictError::InvalidFormat(format!("Invalid record block index: {}", block_index))
        })?;
        self.cache
            .get_or_decode(block_index, || self.read_and_decode_block(block_meta))
            .map_err(|e| e.in_block(BlockType::Record, block_index))
    }

    /// Decodes one key block and checks its entry count against the index.
    pub fn read_key_block_entries(&self, block_index: usize) -> Result<Vec<KeyEntry>> {
        let block_meta = *self.key_block_info.blocks.get(block_index).ok_or_else(|| {
            MdictError::InvalidFormat(format!("Invalid key block index: {}", block_index))
        })?;

        let entries = self
            .read_and_decode_block(block_meta)
            .and_then(|data| content::parse_key_entries(&data, self.header.version, self.header.encoding))
            .map_err(|e| e.in_block(BlockType::Key, block_index))?;

        if entries.len() as u64 != block_meta.num_entries {
            return Err(MdictError::CountMismatch {
                item_type: "entries in key block".to_string(),
                expected: block_meta.num_entries,
                found: entries.len() as u64,
            }
            .in_block(BlockType::Key, block_index));
        }
        Ok(entries)
    }

    /// Reads a raw block from disk and decodes it. The file lock covers only the read.
    fn read_and_decode_block(&self, block_meta: BlockMeta) -> Result<Vec<u8>> {
        let mut raw_block = vec![0u8; block_meta.compressed_size as usize];
        {
            let mut file = self.file.lock().map_err(|_| MdictError::LockPoisoned)?;
            file.seek(SeekFrom::Start(block_meta.file_offset))?;
            file.read_exact(&mut raw_block).map_err(|e| {
                if e.kind() == ErrorKind::UnexpectedEof {
                    MdictError::InvalidFormat(format!(
                        "Block at offset {} truncated ({} bytes declared)",
                        block_meta.file_offset, block_meta.compressed_size
                    ))
                } else {
                    MdictError::Io(e)
                }
            })?;
        }

        content::decode_block(
            &mut raw_block,
            block_meta.decompressed_size,
            self.header.master_key.as_ref(),
            self.header.version,
        )
    }
}
