//! # mdict-bundler
//!
//! Converts MDict dictionaries (`.mdx` with optional `.mdd` resource volumes)
//! into macOS `.dictionary` bundles.
//!
//! - [`mdict`]: MDX/MDD decoding for format versions 1.x, 2.x and 3.x
//! - [`transform`]: entry HTML to Apple dictionary XHTML
//! - [`bundle`]: bundle assembly and packaging
//! - [`convert`]: the end-to-end pipeline driven by a [`ConvertConfig`]
pub mod bundle;
pub mod config;
pub mod convert;
pub mod mdict;
pub mod transform;

// Re-export the main types for convenience
pub use bundle::{BundleIdentity, BundleIndex, OutputBundle, PackagingError};
pub use config::{ConvertConfig, IdentityOverrides, MddSource};
pub use convert::{convert, ConversionReport, ConvertError, Stage};
pub use mdict::{
    ErrorClass, KeyEntry, MdictError, MdictHeader, MdictReader, Mdd, Mdx, ReaderOptions,
    RecordData, ResourceStore,
};
