//! Sequential access to entries in on-disk order.
//!
//! Each stage wraps the previous one:
//!
//! 1. [`KeysIterator`] decodes key blocks one at a time
//! 2. [`RecordInfoIterator`] pairs each key with its record location
//! 3. [`RecordIterator`] decodes the records themselves
//!
//! Every stage stops after yielding its first error.
//!
//! # Example
//! ```no_run
//! # use mdict_bundler::mdict::{MdictReader, Mdx, ReaderOptions};
//! # let reader = MdictReader::<Mdx>::open("dict.mdx", &ReaderOptions::default()).unwrap();
//! for result in reader.iter_records() {
//!     let (key, record) = result.unwrap();
//!     println!("{}: {:?}", key, record);
//! }
//! ```

use std::iter::Peekable;
use std::vec::IntoIter;

use super::cache::SharedBlock;
use super::reader::MdictReader;
use super::types::error::Result;
use super::types::filetypes::FileType;
use super::types::models::{KeyEntry, RecordData, RecordInfo};

/// Yields every [`KeyEntry`], decoding one key block at a time.
pub struct KeysIterator<'a, T: FileType> {
    reader: &'a MdictReader<T>,
    next_block: usize,
    pending: IntoIter<KeyEntry>,
    stopped: bool,
}

impl<'a, T: FileType> KeysIterator<'a, T> {
    pub(super) fn new(reader: &'a MdictReader<T>) -> Self {
        Self {
            reader,
            next_block: 0,
            pending: Vec::new().into_iter(),
            stopped: false,
        }
    }

    pub fn with_record_info(self) -> RecordInfoIterator<'a, T> {
        RecordInfoIterator {
            reader: self.reader,
            keys: self.peekable(),
        }
    }
}

impl<T: FileType> Iterator for KeysIterator<'_, T> {
    type Item = Result<KeyEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.stopped {
            if let Some(entry) = self.pending.next() {
                return Some(Ok(entry));
            }
            if self.next_block == self.reader.num_key_blocks() {
                self.stopped = true;
                break;
            }
            match self.reader.read_key_block_entries(self.next_block) {
                Ok(entries) => {
                    self.pending = entries.into_iter();
                    self.next_block += 1;
                }
                Err(e) => {
                    self.stopped = true;
                    return Some(Err(e));
                }
            }
        }
        None
    }
}

/// Pairs each key with the location of its record.
///
/// A record ends where the next key's record starts, or at the end of the
/// record stream.
pub struct RecordInfoIterator<'a, T: FileType> {
    reader: &'a MdictReader<T>,
    keys: Peekable<KeysIterator<'a, T>>,
}

impl<'a, T: FileType> RecordInfoIterator<'a, T> {
    pub fn with_records(self) -> RecordIterator<'a, T> {
        RecordIterator {
            reader: self.reader,
            locations: self,
            held: None,
        }
    }
}

impl<T: FileType> Iterator for RecordInfoIterator<'_, T> {
    type Item = Result<(KeyEntry, RecordInfo)>;

    fn next(&mut self) -> Option<Self::Item> {
        let entry = match self.keys.next()? {
            Ok(entry) => entry,
            Err(e) => return Some(Err(e)),
        };
        let end = match self.keys.peek() {
            Some(Ok(next)) => next.id,
            _ => self.reader.total_record_decomp_size(),
        };
        Some(self.reader.record_info(entry.id, end).map(|info| (entry, info)))
    }
}

/// Yields `(key, record)` pairs.
///
/// Keeps the most recent record block so neighbouring entries skip the cache lookup.
pub struct RecordIterator<'a, T: FileType> {
    reader: &'a MdictReader<T>,
    locations: RecordInfoIterator<'a, T>,
    held: Option<(usize, SharedBlock)>,
}

impl<T: FileType> RecordIterator<'_, T> {
    fn block(&mut self, block_index: usize) -> Result<SharedBlock> {
        if let Some((held_index, block)) = &self.held {
            if *held_index == block_index {
                return Ok(SharedBlock::clone(block));
            }
        }
        let block = self.reader.record_block(block_index)?;
        self.held = Some((block_index, SharedBlock::clone(&block)));
        Ok(block)
    }
}

impl<T: FileType> Iterator for RecordIterator<'_, T> {
    type Item = Result<(String, RecordData<T::Record>)>;

    fn next(&mut self) -> Option<Self::Item> {
        let (entry, info) = match self.locations.next()? {
            Ok(pair) => pair,
            Err(e) => return Some(Err(e)),
        };
        let record = self
            .block(info.block_index)
            .and_then(|block| self.reader.parse_record(&block, &info));
        Some(record.map(|record| (entry.text, record)))
    }
}
