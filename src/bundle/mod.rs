//! The macOS dictionary bundle: in-memory assembly and on-disk packaging.
//!
//! ```text
//! <Name>.dictionary/
//!   Contents/
//!     Info.plist
//!     Resources/
//!       Body.data
//!       KeyText.index
//!       DefaultStyle.css
//!       media/<canonical path>
//! ```

pub mod index;
pub mod packager;
pub mod plist;

use std::path::PathBuf;

use log::debug;
use thiserror::Error;

use crate::transform::TransformedEntry;

pub use index::BundleIndex;
pub use packager::{stage_ddk_project, withdraw, Packager, StagedDir};

/// Fallback stylesheet when the dictionary ships none.
pub const DEFAULT_STYLESHEET: &str = "\
/* Default dictionary styles */
h1 { font-size: 1.2em; font-weight: bold; color: #333; }
.definition { margin: 10px 0; line-height: 1.5; }
a { color: #0066cc; text-decoration: none; }
a:hover { text-decoration: underline; }
";

/// Errors raised while writing a bundle. Every variant belongs to the packaging I/O class.
#[derive(Debug, Error)]
pub enum PackagingError {
    #[error("Destination {0} already exists (pass --force to replace it)")]
    DestinationExists(PathBuf),

    #[error("Failed to {action} {path}: {source}")]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write property list: {0}")]
    Plist(String),

    #[error("Refusing to write resource outside the bundle: {0:?}")]
    InvalidResourcePath(String),

    #[error("Bundle index overflow: {0}")]
    IndexOverflow(String),

    #[error("Malformed bundle index: {0}")]
    MalformedIndex(String),
}

impl PackagingError {
    pub(crate) fn io(action: &'static str, path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.into();
        move |source| PackagingError::Io { action, path, source }
    }
}

pub type Result<T> = std::result::Result<T, PackagingError>;

/// Caller-supplied identity written to `Info.plist`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleIdentity {
    pub name: String,
    pub display_name: String,
    pub identifier: String,
    pub version: String,
    pub copyright: String,
    pub manufacturer: String,
    pub development_region: String,
    pub front_matter_id: String,
}

impl BundleIdentity {
    /// Identity with defaults derived from the bundle name.
    pub fn for_name(name: &str) -> Self {
        let slug: String = name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '-' })
            .collect();
        Self {
            name: name.to_string(),
            display_name: name.to_string(),
            identifier: format!("com.mdict-bundler.{}", slug.trim_matches('-')),
            version: "1.0".to_string(),
            copyright: String::new(),
            manufacturer: String::new(),
            development_region: "English".to_string(),
            front_matter_id: "front_matter".to_string(),
        }
    }
}

/// One index slot: a headword and the body range holding its fragments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexRecord {
    pub headword: String,
    pub offset: u64,
    pub length: u32,
}

/// The body blob and the sorted index partitioning it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutputBundle {
    pub body: Vec<u8>,
    pub index: Vec<IndexRecord>,
}

impl OutputBundle {
    /// Concatenates fragments in byte-wise headword order, source position breaking ties.
    ///
    /// Fragments sharing a headword are merged into one index slot covering all of them.
    pub fn assemble(mut entries: Vec<TransformedEntry>) -> Result<Self> {
        entries.sort_by(|a, b| {
            a.headword
                .as_bytes()
                .cmp(b.headword.as_bytes())
                .then(a.position.cmp(&b.position))
        });

        let mut bundle = OutputBundle {
            body: Vec::with_capacity(entries.iter().map(|e| e.fragment.len()).sum()),
            index: Vec::with_capacity(entries.len()),
        };
        let mut merged = 0usize;

        for entry in entries {
            let offset = bundle.body.len() as u64;
            let fragment_len = u32::try_from(entry.fragment.len()).map_err(|_| {
                PackagingError::IndexOverflow(format!("entry {:?} exceeds 4 GiB", entry.headword))
            })?;
            bundle.body.extend_from_slice(entry.fragment.as_bytes());

            match bundle.index.last_mut() {
                Some(last) if last.headword == entry.headword => {
                    last.length = last.length.checked_add(fragment_len).ok_or_else(|| {
                        PackagingError::IndexOverflow(format!("headword {:?} exceeds 4 GiB", entry.headword))
                    })?;
                    merged += 1;
                }
                _ => bundle.index.push(IndexRecord {
                    headword: entry.headword,
                    offset,
                    length: fragment_len,
                }),
            }
        }

        debug!(
            "Assembled bundle: {} index slots, {} merged duplicates, {} body bytes",
            bundle.index.len(),
            merged,
            bundle.body.len()
        );
        Ok(bundle)
    }

    /// Body bytes of the slot for `headword`.
    pub fn fragment(&self, headword: &str) -> Option<&[u8]> {
        let i = self
            .index
            .binary_search_by(|r| r.headword.as_bytes().cmp(headword.as_bytes()))
            .ok()?;
        let record = &self.index[i];
        let start = record.offset as usize;
        self.body.get(start..start + record.length as usize)
    }
}
