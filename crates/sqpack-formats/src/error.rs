//! Error types for SqPack format operations

use thiserror::Error;

/// SqPack format error type
#[derive(Debug, Error)]
pub enum SqPackError {
    /// I/O error while reading an index or dat file
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Binary parsing error
    #[error("binary parsing error: {0}")]
    BinRw(#[from] binrw::Error),

    /// Invalid SqPack magic bytes
    #[error("invalid SqPack magic: {0:02X?}")]
    InvalidMagic([u8; 8]),

    /// Packed file type tag not in {empty, standard, model, texture}
    #[error("unsupported packed file type: {0}")]
    UnsupportedFileType(u32),

    /// Block header is malformed or does not fit its block
    #[error("invalid block header at 0x{offset:X}: {reason}")]
    InvalidBlockHeader {
        /// Physical offset of the block in the dat file
        offset: u64,
        /// What was wrong with it
        reason: String,
    },

    /// Inflating a block failed
    #[error("decompression failed: {0}")]
    DecompressionFailed(String),

    /// A block inflated to a different size than its header declared
    #[error("decompressed size mismatch: expected {expected}, got {actual}")]
    SizeMismatch {
        /// Size declared by the block header
        expected: usize,
        /// Size actually produced
        actual: usize,
    },

    /// Fewer bytes available than a structure requires
    #[error("truncated data: expected {expected} bytes, got {actual}")]
    TruncatedData {
        /// Bytes required
        expected: usize,
        /// Bytes available
        actual: usize,
    },

    /// A table offset or size points outside its container
    #[error("out of bounds: {0}")]
    OutOfBounds(String),
}

/// Result type for SqPack format operations
pub type Result<T> = std::result::Result<T, SqPackError>;

impl SqPackError {
    /// Convert into an `io::Error`, preserving truncation as `UnexpectedEof`.
    pub fn into_io(self) -> std::io::Error {
        match self {
            Self::Io(e) => e,
            e @ Self::TruncatedData { .. } => {
                std::io::Error::new(std::io::ErrorKind::UnexpectedEof, e)
            }
            e => std::io::Error::new(std::io::ErrorKind::InvalidData, e),
        }
    }
}
