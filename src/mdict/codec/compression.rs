//! Decompression algorithms for MDict data blocks.
//!
//! Every block names its compression scheme with a 4-bit tag. Tags map to
//! [`Decompressor`] strategies through a lookup table:
//! - 0: stored (no compression)
//! - 1: LZO via lzokay
//! - 2: zlib via flate2

use std::io::Read;

use flate2::read::ZlibDecoder;
use log::trace;
use lzokay::decompress::decompress as lzokay_decompress;

use crate::mdict::types::error::{MdictError, Result};

/// Upper bound on the decompressed size of a single block.
pub const MAX_BLOCK_SIZE: u64 = 256 * 1024 * 1024;

fn output_len(expected_size: u64) -> Result<usize> {
    if expected_size > MAX_BLOCK_SIZE {
        return Err(MdictError::SizeMismatch {
            context: format!("decompressed block (limit {} bytes)", MAX_BLOCK_SIZE),
            expected: MAX_BLOCK_SIZE,
            found: expected_size,
        });
    }
    Ok(expected_size as usize)
}

/// A block decompression scheme.
pub trait Decompressor: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &'static str;

    /// Decompresses `payload` into `output`, which is resized to `expected_size`.
    ///
    /// Fails unless exactly `expected_size` bytes are produced.
    fn decompress_into(&self, output: &mut Vec<u8>, payload: &[u8], expected_size: u64) -> Result<()>;
}

#[derive(Debug)]
pub struct Stored;

#[derive(Debug)]
pub struct Lzo;

#[derive(Debug)]
pub struct Zlib;

impl Decompressor for Stored {
    fn name(&self) -> &'static str {
        "stored"
    }

    fn decompress_into(&self, output: &mut Vec<u8>, payload: &[u8], expected_size: u64) -> Result<()> {
        trace!("No compression, copying {} bytes", payload.len());
        if payload.len() as u64 != expected_size {
            return Err(MdictError::SizeMismatch {
                context: "no-compression payload".to_string(),
                expected: expected_size,
                found: payload.len() as u64,
            });
        }
        output.clear();
        output.extend_from_slice(payload);
        Ok(())
    }
}

impl Decompressor for Lzo {
    fn name(&self) -> &'static str {
        "lzo"
    }

    fn decompress_into(&self, output: &mut Vec<u8>, payload: &[u8], expected_size: u64) -> Result<()> {
        trace!("Decompressing with LZO: {} bytes -> {} bytes (expected)", payload.len(), expected_size);
        output.clear();
        output.resize(output_len(expected_size)?, 0);
        let bytes_written = lzokay_decompress(payload, output).map_err(|e| {
            MdictError::DecompressionError(format!("LZO decompression failed: {:?}", e))
        })?;
        if bytes_written as u64 != expected_size {
            return Err(MdictError::SizeMismatch {
                context: "LZO decompressed block".to_string(),
                expected: expected_size,
                found: bytes_written as u64,
            });
        }
        Ok(())
    }
}

impl Decompressor for Zlib {
    fn name(&self) -> &'static str {
        "zlib"
    }

    fn decompress_into(&self, output: &mut Vec<u8>, payload: &[u8], expected_size: u64) -> Result<()> {
        trace!("Decompressing with Zlib: {} bytes -> {} bytes (expected)", payload.len(), expected_size);
        let limit = output_len(expected_size)?;
        output.clear();
        output.reserve(limit);
        ZlibDecoder::new(payload)
            .take(expected_size + 1)
            .read_to_end(output)
            .map_err(|e| MdictError::DecompressionError(format!("Zlib decompression failed: {}", e)))?;
        if output.len() as u64 != expected_size {
            return Err(MdictError::SizeMismatch {
                context: "zlib decompressed block".to_string(),
                expected: expected_size,
                found: output.len() as u64,
            });
        }
        Ok(())
    }
}

/// Registered decompressors, keyed by block compression tag.
static DECOMPRESSORS: [(u8, &dyn Decompressor); 3] = [(0, &Stored), (1, &Lzo), (2, &Zlib)];

/// Looks up the decompressor registered for `tag`.
pub fn decompressor_for(tag: u8) -> Result<&'static dyn Decompressor> {
    DECOMPRESSORS
        .iter()
        .find(|(registered, _)| *registered == tag)
        .map(|(_, decompressor)| *decompressor)
        .ok_or(MdictError::UnsupportedCompression(tag))
}

/// Decompresses `payload` with the scheme named by `tag`.
pub fn decompress_payload(payload: &[u8], tag: u8, expected_size: u64) -> Result<Vec<u8>> {
    let decompressor = decompressor_for(tag)?;
    let mut output = Vec::new();
    decompressor.decompress_into(&mut output, payload, expected_size)?;
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::ZlibEncoder;
    use flate2::Compression;
    use std::io::Write;

    #[test]
    fn zlib_round_trip_through_table() {
        let data = b"the quick brown fox jumps over the lazy dog".repeat(10);
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&data).unwrap();
        let compressed = encoder.finish().unwrap();

        let out = decompress_payload(&compressed, 2, data.len() as u64).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn stored_size_must_match() {
        assert!(matches!(
            decompress_payload(b"abc", 0, 4),
            Err(MdictError::SizeMismatch { .. })
        ));
        assert_eq!(decompress_payload(b"abc", 0, 3).unwrap(), b"abc");
    }

    #[test]
    fn unknown_tag_is_unsupported() {
        assert!(matches!(decompressor_for(7), Err(MdictError::UnsupportedCompression(7))));
        assert_eq!(decompressor_for(1).unwrap().name(), "lzo");
    }

    /// LZO1X stream of one literal run: `17 + len`, the bytes, then the end marker.
    const LZO_HELLO: &[u8] = &[0x16, b'h', b'e', b'l', b'l', b'o', 0x11, 0x00, 0x00];

    #[test]
    fn lzo_literal_run() {
        let mut out = Vec::new();
        Lzo.decompress_into(&mut out, LZO_HELLO, 5).unwrap();
        assert_eq!(out, b"hello");
        assert_eq!(decompress_payload(LZO_HELLO, 1, 5).unwrap(), b"hello");
    }

    #[test]
    fn lzo_size_must_match() {
        assert!(matches!(
            decompress_payload(LZO_HELLO, 1, 8),
            Err(MdictError::SizeMismatch { expected: 8, found: 5, .. })
        ));
        assert!(matches!(
            decompress_payload(LZO_HELLO, 1, 3),
            Err(MdictError::DecompressionError(_))
        ));
    }

    #[test]
    fn oversized_blocks_are_refused_before_allocating() {
        for tag in [1, 2] {
            assert!(matches!(
                decompress_payload(&[0; 16], tag, u64::MAX / 2),
                Err(MdictError::SizeMismatch { .. })
            ));
        }
    }

    #[test]
    fn garbage_zlib_is_a_decompression_error() {
        assert!(matches!(
            decompress_payload(&[1, 2, 3, 4], 2, 10),
            Err(MdictError::DecompressionError(_))
        ));
    }
}
