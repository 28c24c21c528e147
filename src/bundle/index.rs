//! `KeyText.index`: the binary sorted headword index of a bundle.
//!
//! All integers are little-endian.
//!
//! ```text
//! header (24 bytes)
//!   [4]  magic "MDKX"
//!   [2]  version (1)
//!   [2]  flags (0)
//!   [4]  entry count
//!   [8]  body length
//!   [4]  key pool length
//! records (20 bytes each, sorted by key bytes)
//!   [4]  key offset in pool
//!   [4]  key length
//!   [8]  body offset
//!   [4]  body length
//! key pool (UTF-8)
//! ```

use std::cmp::Ordering;

use byteorder::{ByteOrder, LittleEndian};

use super::{OutputBundle, PackagingError, Result};

pub const MAGIC: &[u8; 4] = b"MDKX";
pub const VERSION: u16 = 1;
pub const HEADER_LEN: usize = 24;
pub const RECORD_LEN: usize = 20;

fn overflow(what: &str) -> PackagingError {
    PackagingError::IndexOverflow(format!("{} does not fit in 32 bits", what))
}

/// Serializes the index of `bundle`.
pub fn encode(bundle: &OutputBundle) -> Result<Vec<u8>> {
    let pool_len: usize = bundle.index.iter().map(|r| r.headword.len()).sum();
    let count = u32::try_from(bundle.index.len()).map_err(|_| overflow("entry count"))?;
    let pool_len_u32 = u32::try_from(pool_len).map_err(|_| overflow("key pool"))?;

    let mut out = Vec::with_capacity(HEADER_LEN + bundle.index.len() * RECORD_LEN + pool_len);
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&VERSION.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&count.to_le_bytes());
    out.extend_from_slice(&(bundle.body.len() as u64).to_le_bytes());
    out.extend_from_slice(&pool_len_u32.to_le_bytes());

    let mut key_offset = 0u32;
    for record in &bundle.index {
        let key_len = record.headword.len() as u32;
        out.extend_from_slice(&key_offset.to_le_bytes());
        out.extend_from_slice(&key_len.to_le_bytes());
        out.extend_from_slice(&record.offset.to_le_bytes());
        out.extend_from_slice(&record.length.to_le_bytes());
        key_offset += key_len;
    }
    for record in &bundle.index {
        out.extend_from_slice(record.headword.as_bytes());
    }
    Ok(out)
}

/// A parsed `KeyText.index` supporting binary-search lookup.
#[derive(Debug, Clone)]
pub struct BundleIndex {
    bytes: Vec<u8>,
    count: usize,
    body_len: u64,
    pool_start: usize,
}

impl BundleIndex {
    pub fn parse(bytes: Vec<u8>) -> Result<Self> {
        let malformed = |msg: String| PackagingError::MalformedIndex(msg);
        if bytes.len() < HEADER_LEN || &bytes[0..4] != MAGIC {
            return Err(malformed("missing MDKX header".to_string()));
        }
        let version = LittleEndian::read_u16(&bytes[4..6]);
        if version != VERSION {
            return Err(malformed(format!("unsupported version {}", version)));
        }
        let count = LittleEndian::read_u32(&bytes[8..12]) as usize;
        let body_len = LittleEndian::read_u64(&bytes[12..20]);
        let pool_len = LittleEndian::read_u32(&bytes[20..24]) as usize;
        let pool_start = HEADER_LEN + count * RECORD_LEN;
        if bytes.len() != pool_start + pool_len {
            return Err(malformed(format!(
                "expected {} bytes, found {}",
                pool_start + pool_len,
                bytes.len()
            )));
        }

        let index = Self {
            bytes,
            count,
            body_len,
            pool_start,
        };
        for i in 0..count {
            let (offset, len) = index.key_range(i);
            if index.bytes.get(offset..offset + len).is_none() {
                return Err(malformed(format!("key {} lies outside the key pool", i)));
            }
        }
        Ok(index)
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn body_len(&self) -> u64 {
        self.body_len
    }

    fn record(&self, i: usize) -> &[u8] {
        let start = HEADER_LEN + i * RECORD_LEN;
        &self.bytes[start..start + RECORD_LEN]
    }

    fn key_range(&self, i: usize) -> (usize, usize) {
        let record = self.record(i);
        let offset = LittleEndian::read_u32(&record[0..4]) as usize;
        let len = LittleEndian::read_u32(&record[4..8]) as usize;
        (self.pool_start + offset, len)
    }

    fn key_bytes(&self, i: usize) -> &[u8] {
        let (offset, len) = self.key_range(i);
        &self.bytes[offset..offset + len]
    }

    /// `(headword, body offset, body length)` of slot `i`.
    pub fn get(&self, i: usize) -> Option<(String, u64, u32)> {
        if i >= self.count {
            return None;
        }
        let record = self.record(i);
        Some((
            String::from_utf8_lossy(self.key_bytes(i)).into_owned(),
            LittleEndian::read_u64(&record[8..16]),
            LittleEndian::read_u32(&record[16..20]),
        ))
    }

    pub fn iter(&self) -> impl Iterator<Item = (String, u64, u32)> + '_ {
        (0..self.count).filter_map(move |i| self.get(i))
    }

    /// Finds the body range of `headword` by binary search over the sorted records.
    pub fn lookup(&self, headword: &str) -> Option<(u64, u32)> {
        let target = headword.as_bytes();
        let (mut lo, mut hi) = (0usize, self.count);
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            match self.key_bytes(mid).cmp(target) {
                Ordering::Less => lo = mid + 1,
                Ordering::Greater => hi = mid,
                Ordering::Equal => {
                    let record = self.record(mid);
                    return Some((
                        LittleEndian::read_u64(&record[8..16]),
                        LittleEndian::read_u32(&record[16..20]),
                    ));
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::IndexRecord;

    fn bundle() -> OutputBundle {
        OutputBundle {
            body: b"AAABBZZZZ".to_vec(),
            index: vec![
                IndexRecord { headword: "apple".into(), offset: 0, length: 3 },
                IndexRecord { headword: "bank".into(), offset: 3, length: 2 },
                IndexRecord { headword: "zoo".into(), offset: 5, length: 4 },
            ],
        }
    }

    #[test]
    fn layout_and_lookup() {
        let bytes = encode(&bundle()).unwrap();
        assert_eq!(&bytes[0..4], b"MDKX");
        assert_eq!(bytes.len(), HEADER_LEN + 3 * RECORD_LEN + "applebankzoo".len());

        let index = BundleIndex::parse(bytes).unwrap();
        assert_eq!(index.len(), 3);
        assert_eq!(index.body_len(), 9);
        assert_eq!(index.lookup("bank"), Some((3, 2)));
        assert_eq!(index.lookup("zoo"), Some((5, 4)));
        assert_eq!(index.lookup("cat"), None);
        assert_eq!(index.get(0), Some(("apple".to_string(), 0, 3)));
    }

    #[test]
    fn rejects_truncated_index() {
        let mut bytes = encode(&bundle()).unwrap();
        bytes.pop();
        assert!(matches!(BundleIndex::parse(bytes), Err(PackagingError::MalformedIndex(_))));
        assert!(BundleIndex::parse(b"MDK".to_vec()).is_err());
    }
}
