//! Custom error types for the MDict decoding layer.

use thiserror::Error;

use super::models::BlockType;

/// The primary error type for all decoding operations in this crate.
#[derive(Debug, Error)]
pub enum MdictError {
    /// An error originating from I/O operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The header is truncated, fails its checksum, or its attribute text cannot be parsed.
    #[error("Malformed header: {0}")]
    MalformedHeader(String),

    /// The MDict file version is unsupported (e.g., 4.0+).
    #[error("Unsupported MDict version: {0}. Only v1.x, v2.x, and v3.x are supported.")]
    UnsupportedVersion(f32),

    /// The header declares a text encoding outside the supported set.
    #[error("Unknown text encoding declared in header: {0:?}")]
    UnknownEncoding(String),

    /// A block carries a compression tag with no registered decompressor.
    #[error("Unsupported compression tag: {0}")]
    UnsupportedCompression(u8),

    /// A block carries an encryption tag with no registered cipher.
    #[error("Unsupported encryption tag: {0}")]
    UnsupportedEncryption(u8),

    /// A checksum validation failed, indicating data corruption.
    #[error("Checksum mismatch: expected {expected:#x}, got {actual:#x}")]
    ChecksumMismatch { expected: u32, actual: u32 },

    /// An error occurred during decryption, often due to a wrong key or corrupted data.
    #[error("Decryption failed: {0}")]
    DecryptionError(String),

    /// An error occurred during decompression.
    #[error("Decompression failed: {0}")]
    DecompressionError(String),

    /// The key index or key section info could not be decoded.
    #[error("Key index corrupt: {0}")]
    KeyIndexCorrupt(#[source] Box<MdictError>),

    /// A key block failed checksum, decompression, or entry parsing.
    #[error("Key block {block_index} corrupt: {source}")]
    KeyBlockCorrupt {
        block_index: usize,
        #[source]
        source: Box<MdictError>,
    },

    /// A record block failed checksum or decompression, or an entry does not fit in it.
    #[error("Record block {block_index} corrupt: {source}")]
    RecordBlockCorrupt {
        block_index: usize,
        #[source]
        source: Box<MdictError>,
    },

    /// A declared count of items does not match the actual number of items found.
    #[error("Count mismatch for {item_type}: expected {expected}, but found {found}")]
    CountMismatch {
        item_type: String,
        expected: u64,
        found: u64,
    },

    /// A buffer or data block has an unexpected size after an operation.
    #[error("Size mismatch for {context}: expected {expected} bytes, but found {found} bytes")]
    SizeMismatch {
        context: String,
        expected: u64,
        found: u64,
    },

    /// The file is structurally invalid or does not conform to the MDict format.
    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    /// The file is encrypted, but no passcode was provided to derive the decryption key.
    #[error("Encrypted file requires a passcode, but none was provided.")]
    PasscodeRequired,

    /// A mutex lock was poisoned, indicating a panic in another thread holding the lock.
    #[error("A mutex lock was poisoned, indicating a panic in another thread holding the lock.")]
    LockPoisoned,
}

/// Coarse failure classes, used for diagnostics and process exit codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Header, version, encoding, or structural layout problems.
    Format,
    KeyBlockCorrupt,
    RecordBlockCorrupt,
    /// Unknown compression or cipher tag.
    UnsupportedFeature,
    /// Reading the input failed.
    Io,
    /// Writing the output bundle failed.
    PackagingIo,
}

impl ErrorClass {
    pub fn exit_code(self) -> i32 {
        match self {
            ErrorClass::Io => 1,
            ErrorClass::Format => 2,
            ErrorClass::KeyBlockCorrupt => 3,
            ErrorClass::RecordBlockCorrupt => 4,
            ErrorClass::UnsupportedFeature => 5,
            ErrorClass::PackagingIo => 6,
        }
    }
}

impl MdictError {
    /// Attaches a block index to integrity failures raised while decoding a block.
    ///
    /// Unsupported tags and I/O errors pass through unchanged.
    pub fn in_block(self, block_type: BlockType, block_index: usize) -> Self {
        match self {
            MdictError::ChecksumMismatch { .. }
            | MdictError::DecompressionError(_)
            | MdictError::DecryptionError(_)
            | MdictError::SizeMismatch { .. }
            | MdictError::CountMismatch { .. }
            | MdictError::InvalidFormat(_) => {
                let source = Box::new(self);
                match block_type {
                    BlockType::Key => MdictError::KeyBlockCorrupt { block_index, source },
                    BlockType::Record => MdictError::RecordBlockCorrupt { block_index, source },
                }
            }
            other => other,
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            MdictError::Io(_) | MdictError::LockPoisoned => ErrorClass::Io,
            MdictError::KeyIndexCorrupt(_) | MdictError::KeyBlockCorrupt { .. } => {
                ErrorClass::KeyBlockCorrupt
            }
            MdictError::RecordBlockCorrupt { .. } => ErrorClass::RecordBlockCorrupt,
            MdictError::UnsupportedCompression(_) | MdictError::UnsupportedEncryption(_) => {
                ErrorClass::UnsupportedFeature
            }
            _ => ErrorClass::Format,
        }
    }
}

/// A convenience `Result` type alias using the crate's `MdictError` type.
pub type Result<T> = std::result::Result<T, MdictError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integrity_errors_pick_up_block_index() {
        let err = MdictError::ChecksumMismatch { expected: 1, actual: 2 }.in_block(BlockType::Key, 3);
        match &err {
            MdictError::KeyBlockCorrupt { block_index, .. } => assert_eq!(*block_index, 3),
            other => panic!("unexpected error {:?}", other),
        }
        assert_eq!(err.class(), ErrorClass::KeyBlockCorrupt);
        assert!(err.to_string().contains("Key block 3"));
    }

    #[test]
    fn unsupported_tags_are_not_wrapped() {
        let err = MdictError::UnsupportedCompression(9).in_block(BlockType::Record, 0);
        assert!(matches!(err, MdictError::UnsupportedCompression(9)));
        assert_eq!(err.class().exit_code(), 5);
    }
}
