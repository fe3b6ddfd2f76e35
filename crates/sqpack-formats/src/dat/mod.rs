//! Packed files stored in `.datN` files
//!
//! Every file in a dat starts with a 24-byte packed header that names its
//! layout, followed by layout-specific tables and a run of compressed blocks.
//! [`BlockLayout`] turns those tables into a uniform block map and
//! [`PackedFileStream`] reads through it.

mod block;
mod layout;
mod source;
mod stream;

pub use block::{
    BLOCK_HEADER_SIZE, BlockHeader, MAX_BLOCK_DECOMPRESSED_SIZE, UNCOMPRESSED_BLOCK_MARKER,
    decode_block,
};
pub use layout::{
    BlockLayout, MODEL_HEADER_SIZE, MODEL_SLOT_COUNT, ModelLocator, StandardBlockInfo, TextureMip,
};
pub use source::ReadAt;
pub use stream::PackedFileStream;

use crate::error::{Result, SqPackError};
use binrw::BinRead;
use binrw::io::Cursor;
use std::fmt;

/// Size of the common packed-file header
pub const PACKED_HEADER_SIZE: usize = 24;

/// Allocation unit for packed files in a dat
pub const UNIT_SIZE: u64 = 128;

/// Layout of a packed file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PackedFileKind {
    /// No data blocks; reads as zeros
    Empty,
    /// Plain block run
    Standard,
    /// Model chunks behind a locator table
    Model,
    /// Texture mips behind a verbatim header region
    Texture,
}

impl PackedFileKind {
    /// Decode the on-disk type tag
    pub fn from_raw(value: u32) -> Result<Self> {
        match value {
            1 => Ok(Self::Empty),
            2 => Ok(Self::Standard),
            3 => Ok(Self::Model),
            4 => Ok(Self::Texture),
            other => Err(SqPackError::UnsupportedFileType(other)),
        }
    }

    /// On-disk type tag
    pub const fn as_raw(self) -> u32 {
        match self {
            Self::Empty => 1,
            Self::Standard => 2,
            Self::Model => 3,
            Self::Texture => 4,
        }
    }
}

impl fmt::Display for PackedFileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Empty => "empty",
            Self::Standard => "standard",
            Self::Model => "model",
            Self::Texture => "texture",
        };
        f.write_str(name)
    }
}

/// Common header at the start of every packed file
#[derive(Debug, Clone, Copy, PartialEq, Eq, BinRead)]
#[br(little)]
pub struct PackedFileHeader {
    /// Size of the header including layout tables; data starts here
    pub header_size: u32,
    /// Raw type tag, see [`PackedFileKind`]
    pub kind_raw: u32,
    /// Logical (decompressed) size of the file
    pub decompressed_size: u32,
    /// Reserved space in 128-byte units
    pub allocated_units: u32,
    /// Occupied space in 128-byte units
    pub occupied_units: u32,
    /// Block count (standard), mip count (texture) or version (model)
    pub block_count_or_version: u32,
}

impl PackedFileHeader {
    /// Parse from the first 24 bytes of a packed file
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < PACKED_HEADER_SIZE {
            return Err(SqPackError::TruncatedData {
                expected: PACKED_HEADER_SIZE,
                actual: data.len(),
            });
        }
        let header = Self::read(&mut Cursor::new(data))?;
        if (header.header_size as usize) < PACKED_HEADER_SIZE {
            return Err(SqPackError::OutOfBounds(format!(
                "packed header size {} below minimum",
                header.header_size
            )));
        }
        Ok(header)
    }

    /// Read the header of the packed file at `offset`
    pub fn read_from<S: ReadAt + ?Sized>(source: &S, offset: u64) -> Result<Self> {
        let mut buf = [0u8; PACKED_HEADER_SIZE];
        source.read_exact_at(offset, &mut buf)?;
        Self::parse(&buf)
    }

    /// Decoded layout kind
    pub fn kind(&self) -> Result<PackedFileKind> {
        PackedFileKind::from_raw(self.kind_raw)
    }

    /// Bytes reserved for this entry in the dat, padding included
    pub const fn reserved_bytes(&self) -> u64 {
        self.allocated_units as u64 * UNIT_SIZE
    }

    /// Bytes actually occupied by this entry in the dat
    pub const fn occupied_bytes(&self) -> u64 {
        self.occupied_units as u64 * UNIT_SIZE
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn header_bytes(kind: u32) -> Vec<u8> {
        [128u32, kind, 1000, 10, 8, 2]
            .iter()
            .flat_map(|v| v.to_le_bytes())
            .collect()
    }

    #[test]
    fn test_parse_header() {
        let header = PackedFileHeader::parse(&header_bytes(2)).unwrap();
        assert_eq!(header.kind().unwrap(), PackedFileKind::Standard);
        assert_eq!(header.decompressed_size, 1000);
        assert_eq!(header.reserved_bytes(), 1280);
        assert_eq!(header.occupied_bytes(), 1024);
        assert_eq!(header.block_count_or_version, 2);
    }

    #[test]
    fn test_unknown_kind() {
        let header = PackedFileHeader::parse(&header_bytes(9)).unwrap();
        assert!(matches!(
            header.kind(),
            Err(SqPackError::UnsupportedFileType(9))
        ));
    }

    #[test]
    fn test_truncated_header() {
        assert!(matches!(
            PackedFileHeader::parse(&[0u8; 10]),
            Err(SqPackError::TruncatedData { expected: 24, .. })
        ));
    }

    #[test]
    fn test_kind_tags() {
        for kind in [
            PackedFileKind::Empty,
            PackedFileKind::Standard,
            PackedFileKind::Model,
            PackedFileKind::Texture,
        ] {
            assert_eq!(PackedFileKind::from_raw(kind.as_raw()).unwrap(), kind);
        }
    }
}
