//! MDict (MDX/MDD) decoding.
//!
//! - [`format`]: header, index and block parsing
//! - [`codec`]: decompressor and cipher tables
//! - [`reader`]: random and sequential access with a shared block cache
//! - [`resources`]: MDD volumes as a resource namespace

pub mod cache;
pub mod codec;
pub mod format;
pub mod iter;
pub mod reader;
pub mod resources;
pub mod types;
pub mod utils;

pub use reader::{MdictReader, ReaderOptions};
pub use resources::{ResourceEntry, ResourceNamespace, ResourcePayload, ResourceStore};
pub use types::error::{ErrorClass, MdictError, Result};
pub use types::filetypes::{FileType, Mdd, Mdx};
pub use types::models::{KeyEntry, MdictHeader, MdictVersion, RecordData, RecordInfo};
