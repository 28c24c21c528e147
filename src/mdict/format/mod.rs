//! On-disk layout of MDict files.
//!
//! ```text
//! header   length-prefixed attribute text      header::parse
//! index    key and record block tables         index::parse
//! blocks   prefixed, compressed, maybe encrypted  content::decode_block
//! ```
//!
//! Parsers here work on any `Read + Seek` source and know nothing about
//! caching or threads; [`MdictReader`](crate::mdict::reader::MdictReader)
//! drives them.

pub mod content;
pub mod header;
pub mod index;
