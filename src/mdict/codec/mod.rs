//! Block codecs, each looked up by the 4-bit tag stored in the block prefix.
//!
//! - [`compression`]: stored, LZO and zlib payloads
//! - [`crypto`]: fast XOR and Salsa20/8 ciphers plus key derivation

pub mod compression;
pub mod crypto;
