//! Shared decoding types: the error taxonomy, block and header models, and
//! the MDX/MDD record specializations.

pub mod error;
pub mod filetypes;
pub mod models;
