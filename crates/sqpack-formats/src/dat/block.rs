//! Compressed block decoding
//!
//! Every block starts with a 16-byte header. A `compressed_size` of 32000
//! marks a block stored raw; anything else is raw DEFLATE that must inflate
//! to exactly `decompressed_size` bytes.

use crate::error::{Result, SqPackError};
use binrw::BinRead;
use binrw::io::Cursor;
use flate2::read::DeflateDecoder;
use std::io::Read;
use tracing::trace;

/// Size of the per-block header
pub const BLOCK_HEADER_SIZE: usize = 16;

/// `compressed_size` value marking a block that is stored uncompressed
pub const UNCOMPRESSED_BLOCK_MARKER: u32 = 32000;

/// Upper bound on a single block's decompressed size
///
/// Shipped blocks never exceed 16000 bytes; the bound keeps a corrupt
/// header from requesting an absurd allocation.
pub const MAX_BLOCK_DECOMPRESSED_SIZE: u32 = 1024 * 1024;

/// Header at the start of every block
#[derive(Debug, Clone, Copy, PartialEq, Eq, BinRead)]
#[br(little)]
pub struct BlockHeader {
    /// Size of this header (payload starts here)
    pub header_size: u32,
    /// Always 0 in shipped data
    pub version: u32,
    /// Payload size, or 32000 for a raw block
    pub compressed_size: u32,
    /// Size after decompression
    pub decompressed_size: u32,
}

impl BlockHeader {
    /// Parse a block header and check it is usable
    pub fn parse(bytes: &[u8], block_offset: u64) -> Result<Self> {
        if bytes.len() < BLOCK_HEADER_SIZE {
            return Err(SqPackError::InvalidBlockHeader {
                offset: block_offset,
                reason: format!("block of {} bytes is smaller than its header", bytes.len()),
            });
        }

        let header = Self::read(&mut Cursor::new(bytes))?;

        if (header.header_size as usize) < BLOCK_HEADER_SIZE {
            return Err(SqPackError::InvalidBlockHeader {
                offset: block_offset,
                reason: format!("header size {} below minimum", header.header_size),
            });
        }
        if header.decompressed_size > MAX_BLOCK_DECOMPRESSED_SIZE {
            return Err(SqPackError::InvalidBlockHeader {
                offset: block_offset,
                reason: format!("decompressed size {} too large", header.decompressed_size),
            });
        }

        Ok(header)
    }

    /// Stored without compression
    pub const fn is_raw(&self) -> bool {
        self.compressed_size == UNCOMPRESSED_BLOCK_MARKER
    }

    /// Number of payload bytes following the header
    pub const fn payload_size(&self) -> usize {
        if self.is_raw() {
            self.decompressed_size as usize
        } else {
            self.compressed_size as usize
        }
    }
}

/// Decode one block into `out`, replacing its contents.
///
/// `block` holds the physical block bytes starting at its header; trailing
/// alignment padding is ignored.
pub fn decode_block(block: &[u8], block_offset: u64, out: &mut Vec<u8>) -> Result<BlockHeader> {
    let header = BlockHeader::parse(block, block_offset)?;

    let start = header.header_size as usize;
    let end = start + header.payload_size();
    let payload = block.get(start..end).ok_or_else(|| SqPackError::InvalidBlockHeader {
        offset: block_offset,
        reason: format!(
            "payload 0x{start:X}..0x{end:X} exceeds block size 0x{:X}",
            block.len()
        ),
    })?;

    out.clear();
    let expected = header.decompressed_size as usize;

    if header.is_raw() {
        trace!("Raw block at 0x{:X}: {} bytes", block_offset, expected);
        out.extend_from_slice(payload);
        return Ok(header);
    }

    out.reserve(expected);
    DeflateDecoder::new(payload)
        .take(expected as u64 + 1)
        .read_to_end(out)
        .map_err(|e| SqPackError::DecompressionFailed(format!("block at 0x{block_offset:X}: {e}")))?;

    if out.len() != expected {
        return Err(SqPackError::SizeMismatch {
            expected,
            actual: out.len(),
        });
    }

    trace!(
        "Inflated block at 0x{:X}: {} -> {} bytes",
        block_offset,
        payload.len(),
        expected
    );
    Ok(header)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::DeflateEncoder;
    use std::io::Write;

    fn block(compressed_size: u32, decompressed_size: u32, payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&16u32.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());
        out.extend_from_slice(&compressed_size.to_le_bytes());
        out.extend_from_slice(&decompressed_size.to_le_bytes());
        out.extend_from_slice(payload);
        out.resize(out.len().next_multiple_of(128), 0);
        out
    }

    #[test]
    fn test_raw_block_is_copied_verbatim() {
        let payload: Vec<u8> = (0..200u32).map(|i| (i * 7) as u8).collect();
        let data = block(UNCOMPRESSED_BLOCK_MARKER, 200, &payload);

        let mut out = Vec::new();
        let header = decode_block(&data, 0, &mut out).unwrap();
        assert!(header.is_raw());
        assert_eq!(out, payload);
    }

    #[test]
    fn test_deflate_block() {
        let payload = b"hello hello hello hello hello".repeat(10);
        let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&payload).unwrap();
        let compressed = encoder.finish().unwrap();

        let data = block(compressed.len() as u32, payload.len() as u32, &compressed);
        let mut out = vec![0xAA; 4];
        decode_block(&data, 0x80, &mut out).unwrap();
        assert_eq!(out, payload);
    }

    #[test]
    fn test_size_mismatch_is_an_error() {
        let payload = b"abcdefgh".repeat(4);
        let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&payload).unwrap();
        let compressed = encoder.finish().unwrap();

        let data = block(compressed.len() as u32, 64, &compressed);
        let mut out = Vec::new();
        assert!(matches!(
            decode_block(&data, 0, &mut out),
            Err(SqPackError::SizeMismatch {
                expected: 64,
                actual: 32
            })
        ));
    }

    #[test]
    fn test_undersized_block_is_an_error() {
        let mut out = Vec::new();
        assert!(matches!(
            decode_block(&[0u8; 8], 0x400, &mut out),
            Err(SqPackError::InvalidBlockHeader { offset: 0x400, .. })
        ));
    }

    #[test]
    fn test_payload_overrun_is_an_error() {
        let mut data = block(UNCOMPRESSED_BLOCK_MARKER, 100, &[1u8; 100]);
        data.truncate(64);
        let mut out = Vec::new();
        assert!(matches!(
            decode_block(&data, 0, &mut out),
            Err(SqPackError::InvalidBlockHeader { .. })
        ));
    }
}
