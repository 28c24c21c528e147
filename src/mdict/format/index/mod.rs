//! # Index Parsing Dispatcher
//!
//! Entry point for parsing the key and record block indexes of an MDict
//! file. Dispatches to the version-specific parser based on the header.

use std::io::{Read, Seek};

use crate::mdict::types::error::Result;
use crate::mdict::types::models::{KeyBlockInfo, MdictHeader, MdictVersion, RecordBlockInfo};

pub mod common;
pub mod v1v2;
pub mod v3;

/// Parses the key and record block tables.
///
/// The reader must be positioned right after the header. Key blocks carry
/// their declared entry counts; record blocks carry the prefix sums of the
/// virtual decompressed record stream.
pub fn parse<R: Read + Seek>(file: &mut R, header: &MdictHeader) -> Result<(KeyBlockInfo, RecordBlockInfo)> {
    match header.version {
        MdictVersion::V3 => v3::parse(file, header),
        MdictVersion::V1 | MdictVersion::V2 => v1v2::parse(file, header),
    }
}
