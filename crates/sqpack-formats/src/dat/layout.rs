//! Block maps for the standard, model and texture layouts
//!
//! All three layouts reduce to the same triple: the logical offset where
//! each block starts (`request_offsets`, with one extra trailing entry equal
//! to the declared file size), the physical offset of each block in the dat
//! (`block_offsets`) and the number of physical bytes to read for it
//! (`block_sizes`). Model and texture files additionally expose a prefix
//! that is not block-compressed: a synthesized model header, or the raw
//! texture header region.

use super::block::{BLOCK_HEADER_SIZE, BlockHeader};
use super::{PACKED_HEADER_SIZE, PackedFileHeader, PackedFileKind, ReadAt};
use crate::error::{Result, SqPackError};
use binrw::BinRead;
use binrw::io::Cursor;
use tracing::debug;

/// Number of chunk slots in a model locator
pub const MODEL_SLOT_COUNT: usize = 11;

/// Size of the synthesized model header at logical offset 0
pub const MODEL_HEADER_SIZE: usize = 0x44;

const MODEL_LOCATOR_SIZE: usize = 184;
const TEXTURE_MIP_SIZE: usize = 20;
const STANDARD_BLOCK_INFO_SIZE: usize = 8;
const MAX_TABLE_SIZE: u32 = 1024 * 1024;

// Slot indices: 0 stack, 1 runtime, 2..5 vertex, 5..8 edge geometry, 8..11 index.
const MODEL_SLOT_ORDER: [usize; MODEL_SLOT_COUNT] = [0, 1, 2, 5, 8, 3, 6, 9, 4, 7, 10];
const MODEL_VERTEX_SLOT: usize = 2;
const MODEL_INDEX_SLOT: usize = 8;
const MODEL_LODS: usize = 3;

/// Block descriptor of a standard file
#[derive(Debug, Clone, Copy, BinRead)]
#[br(little)]
pub struct StandardBlockInfo {
    /// Offset relative to the end of the packed header
    pub offset: u32,
    /// Physical block size including its header and padding
    pub block_size: u16,
    /// Bytes this block inflates to
    pub decompressed_size: u16,
}

/// Mip descriptor of a texture file
#[derive(Debug, Clone, Copy, BinRead)]
#[br(little)]
pub struct TextureMip {
    /// Offset of the first sub-block, relative to the end of the packed header
    pub compressed_offset: u32,
    /// Physical size of all sub-blocks
    pub compressed_size: u32,
    /// Bytes this mip inflates to
    pub decompressed_size: u32,
    /// Index of the first sub-block in the size table
    pub first_block_index: u32,
    /// Number of sub-blocks
    pub block_count: u32,
}

/// Chunk locator of a model file
#[derive(Debug, Clone, Copy, BinRead)]
#[br(little)]
pub struct ModelLocator {
    /// Decompressed size of each slot, aligned
    pub decompressed_sizes: [u32; MODEL_SLOT_COUNT],
    /// Physical size of each slot
    pub chunk_sizes: [u32; MODEL_SLOT_COUNT],
    /// Offset of each slot's first block, relative to the end of the packed header
    pub first_block_offsets: [u32; MODEL_SLOT_COUNT],
    /// Index of each slot's first block in the size table
    pub first_block_indices: [u16; MODEL_SLOT_COUNT],
    /// Number of blocks per slot
    pub block_counts: [u16; MODEL_SLOT_COUNT],
    pub vertex_declaration_count: u16,
    pub material_count: u16,
    pub lod_count: u8,
    pub index_streaming: u8,
    pub edge_geometry: u8,
    pub padding: u8,
}

struct PhysicalBlock {
    offset: u64,
    size: u32,
    decompressed: u64,
}

#[derive(Default)]
struct LayoutParts {
    prefix: Vec<u8>,
    blocks: Vec<PhysicalBlock>,
}

/// Resolved block map of one packed file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockLayout {
    kind: PackedFileKind,
    header: PackedFileHeader,
    prefix: Vec<u8>,
    request_offsets: Vec<u64>,
    block_offsets: Vec<u64>,
    block_sizes: Vec<u32>,
}

impl BlockLayout {
    /// Read the packed file at `entry_offset` and derive its block map.
    pub fn resolve<S: ReadAt + ?Sized>(source: &S, entry_offset: u64) -> Result<Self> {
        let header = PackedFileHeader::read_from(source, entry_offset)?;
        let kind = header.kind()?;

        if header.header_size > MAX_TABLE_SIZE {
            return Err(SqPackError::OutOfBounds(format!(
                "packed header size 0x{:X} at 0x{entry_offset:X} is implausible",
                header.header_size
            )));
        }

        let mut table = vec![0u8; header.header_size as usize];
        source.read_exact_at(entry_offset, &mut table)?;
        let data_start = entry_offset + u64::from(header.header_size);

        let parts = match kind {
            PackedFileKind::Empty => LayoutParts::default(),
            PackedFileKind::Standard => Self::standard(&header, &table, data_start)?,
            PackedFileKind::Texture => Self::texture(source, &header, &table, data_start)?,
            PackedFileKind::Model => Self::model(source, &header, &table, data_start)?,
        };

        let layout = Self::finish(kind, header, parts);
        debug!(
            "Resolved {} layout at 0x{:X}: {} blocks, {} bytes",
            kind,
            entry_offset,
            layout.block_count(),
            layout.len()
        );
        Ok(layout)
    }

    fn standard(header: &PackedFileHeader, table: &[u8], data_start: u64) -> Result<LayoutParts> {
        let count = header.block_count_or_version as usize;
        let infos = table_slice(table, PACKED_HEADER_SIZE, count, STANDARD_BLOCK_INFO_SIZE, "block table")?;

        let mut cursor = Cursor::new(infos);
        let mut blocks = Vec::with_capacity(count);
        for _ in 0..count {
            let info = StandardBlockInfo::read(&mut cursor)?;
            blocks.push(PhysicalBlock {
                offset: data_start + u64::from(info.offset),
                size: u32::from(info.block_size),
                decompressed: u64::from(info.decompressed_size),
            });
        }

        Ok(LayoutParts {
            prefix: Vec::new(),
            blocks,
        })
    }

    fn texture<S: ReadAt + ?Sized>(
        source: &S,
        header: &PackedFileHeader,
        table: &[u8],
        data_start: u64,
    ) -> Result<LayoutParts> {
        let mip_count = header.block_count_or_version as usize;
        let mip_bytes = table_slice(table, PACKED_HEADER_SIZE, mip_count, TEXTURE_MIP_SIZE, "mip table")?;

        let mut cursor = Cursor::new(mip_bytes);
        let mut mips = Vec::with_capacity(mip_count);
        for _ in 0..mip_count {
            mips.push(TextureMip::read(&mut cursor)?);
        }

        let sub_block_count = mips
            .iter()
            .map(|m| m.first_block_index as usize + m.block_count as usize)
            .max()
            .unwrap_or(0);
        let sub_block_sizes = read_u16_table(
            table,
            PACKED_HEADER_SIZE + mip_count * TEXTURE_MIP_SIZE,
            sub_block_count,
        )?;

        let mut prefix = Vec::new();
        if let Some(first) = mips.first() {
            if first.compressed_offset > MAX_TABLE_SIZE {
                return Err(SqPackError::OutOfBounds(format!(
                    "texture header region of 0x{:X} bytes is implausible",
                    first.compressed_offset
                )));
            }
            prefix.resize(first.compressed_offset as usize, 0);
            source.read_exact_at(data_start, &mut prefix)?;
        }

        let mut blocks = Vec::with_capacity(sub_block_count);
        for mip in &mips {
            let mut offset = data_start + u64::from(mip.compressed_offset);
            let first = mip.first_block_index as usize;
            for &size in &sub_block_sizes[first..first + mip.block_count as usize] {
                let decompressed = read_decompressed_size(source, offset)?;
                blocks.push(PhysicalBlock {
                    offset,
                    size: u32::from(size),
                    decompressed,
                });
                offset += u64::from(size);
            }
        }

        Ok(LayoutParts { prefix, blocks })
    }

    fn model<S: ReadAt + ?Sized>(
        source: &S,
        header: &PackedFileHeader,
        table: &[u8],
        data_start: u64,
    ) -> Result<LayoutParts> {
        let locator_bytes = table_slice(table, PACKED_HEADER_SIZE, 1, MODEL_LOCATOR_SIZE, "model locator")?;
        let locator = ModelLocator::read(&mut Cursor::new(locator_bytes))?;

        let block_count = (0..MODEL_SLOT_COUNT)
            .map(|slot| {
                usize::from(locator.first_block_indices[slot]) + usize::from(locator.block_counts[slot])
            })
            .max()
            .unwrap_or(0);
        let block_sizes = read_u16_table(table, PACKED_HEADER_SIZE + MODEL_LOCATOR_SIZE, block_count)?;

        let mut blocks = Vec::with_capacity(block_count);
        let mut slot_starts = [0u64; MODEL_SLOT_COUNT];
        let mut logical = MODEL_HEADER_SIZE as u64;

        for slot in MODEL_SLOT_ORDER {
            let count = usize::from(locator.block_counts[slot]);
            if count == 0 {
                continue;
            }
            slot_starts[slot] = logical;

            let first = usize::from(locator.first_block_indices[slot]);
            let mut offset = data_start + u64::from(locator.first_block_offsets[slot]);
            for &size in &block_sizes[first..first + count] {
                let decompressed = read_decompressed_size(source, offset)?;
                blocks.push(PhysicalBlock {
                    offset,
                    size: u32::from(size),
                    decompressed,
                });
                offset += u64::from(size);
                logical += decompressed;
            }
        }

        Ok(LayoutParts {
            prefix: synthesize_model_header(header, &locator, &slot_starts),
            blocks,
        })
    }

    fn finish(kind: PackedFileKind, header: PackedFileHeader, parts: LayoutParts) -> Self {
        let len = u64::from(header.decompressed_size);
        let count = parts.blocks.len();

        let mut request_offsets = Vec::with_capacity(count + 1);
        let mut block_offsets = Vec::with_capacity(count);
        let mut block_sizes = Vec::with_capacity(count);

        let mut logical = parts.prefix.len() as u64;
        for block in parts.blocks {
            request_offsets.push(logical.min(len));
            block_offsets.push(block.offset);
            block_sizes.push(block.size);
            logical += block.decompressed;
        }
        // Declared size wins over the block sum in both directions.
        request_offsets.push(len);

        Self {
            kind,
            header,
            prefix: parts.prefix,
            request_offsets,
            block_offsets,
            block_sizes,
        }
    }

    /// Layout kind
    pub const fn kind(&self) -> PackedFileKind {
        self.kind
    }

    /// Packed header the layout was derived from
    pub const fn packed_header(&self) -> &PackedFileHeader {
        &self.header
    }

    /// Declared logical size
    pub const fn len(&self) -> u64 {
        self.header.decompressed_size as u64
    }

    /// Declared logical size is zero
    pub const fn is_empty(&self) -> bool {
        self.header.decompressed_size == 0
    }

    /// Bytes exposed verbatim before the first block
    pub fn prefix(&self) -> &[u8] {
        &self.prefix
    }

    /// Logical start of each block, plus a final entry equal to [`len`](Self::len)
    pub fn request_offsets(&self) -> &[u64] {
        &self.request_offsets
    }

    /// Physical start of each block in the dat
    pub fn block_offsets(&self) -> &[u64] {
        &self.block_offsets
    }

    /// Physical byte count to read for each block
    pub fn block_sizes(&self) -> &[u32] {
        &self.block_sizes
    }

    /// Number of blocks
    pub fn block_count(&self) -> usize {
        self.block_offsets.len()
    }

    /// Index of the block whose logical range contains `pos`.
    ///
    /// `None` when `pos` precedes the first block or lies past the end.
    pub fn block_containing(&self, pos: u64) -> Option<usize> {
        let count = self.block_count();
        if count == 0 || pos < self.request_offsets[0] || pos >= self.len() {
            return None;
        }
        let insertion = self.request_offsets[..count].partition_point(|&start| start <= pos);
        Some(insertion - 1)
    }
}

fn table_slice<'a>(
    table: &'a [u8],
    start: usize,
    count: usize,
    entry_size: usize,
    name: &str,
) -> Result<&'a [u8]> {
    let end = count
        .checked_mul(entry_size)
        .and_then(|len| len.checked_add(start))
        .filter(|&end| end <= table.len())
        .ok_or_else(|| {
            SqPackError::OutOfBounds(format!(
                "{name} with {count} entries exceeds packed header of 0x{:X} bytes",
                table.len()
            ))
        })?;
    Ok(&table[start..end])
}

fn read_u16_table(table: &[u8], start: usize, count: usize) -> Result<Vec<u16>> {
    let bytes = table_slice(table, start, count, 2, "block size table")?;
    Ok(bytes
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect())
}

fn read_decompressed_size<S: ReadAt + ?Sized>(source: &S, offset: u64) -> Result<u64> {
    let mut buf = [0u8; BLOCK_HEADER_SIZE];
    source.read_exact_at(offset, &mut buf)?;
    Ok(u64::from(BlockHeader::parse(&buf, offset)?.decompressed_size))
}

fn synthesize_model_header(
    header: &PackedFileHeader,
    locator: &ModelLocator,
    slot_starts: &[u64; MODEL_SLOT_COUNT],
) -> Vec<u8> {
    let mut out = Vec::with_capacity(MODEL_HEADER_SIZE);
    out.extend_from_slice(&header.block_count_or_version.to_le_bytes());
    out.extend_from_slice(&locator.decompressed_sizes[0].to_le_bytes());
    out.extend_from_slice(&locator.decompressed_sizes[1].to_le_bytes());
    out.extend_from_slice(&locator.vertex_declaration_count.to_le_bytes());
    out.extend_from_slice(&locator.material_count.to_le_bytes());

    for base in [MODEL_VERTEX_SLOT, MODEL_INDEX_SLOT] {
        for lod in 0..MODEL_LODS {
            out.extend_from_slice(&(slot_starts[base + lod] as u32).to_le_bytes());
        }
    }
    for base in [MODEL_VERTEX_SLOT, MODEL_INDEX_SLOT] {
        for lod in 0..MODEL_LODS {
            out.extend_from_slice(&locator.decompressed_sizes[base + lod].to_le_bytes());
        }
    }

    out.extend_from_slice(&[
        locator.lod_count,
        locator.index_streaming,
        locator.edge_geometry,
        locator.padding,
    ]);
    out
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn standard_entry(blocks: &[(u32, u16, u16)], decompressed_size: u32) -> Vec<u8> {
        let mut out = Vec::new();
        for v in [128u32, 2, decompressed_size, 0, 0, blocks.len() as u32] {
            out.extend_from_slice(&v.to_le_bytes());
        }
        for &(offset, size, decompressed) in blocks {
            out.extend_from_slice(&offset.to_le_bytes());
            out.extend_from_slice(&size.to_le_bytes());
            out.extend_from_slice(&decompressed.to_le_bytes());
        }
        out.resize(128, 0);
        out
    }

    #[test]
    fn test_standard_offsets() {
        let entry = standard_entry(&[(0, 128, 100), (128, 128, 50), (256, 256, 200)], 350);
        let layout = BlockLayout::resolve(entry.as_slice(), 0).unwrap();

        assert_eq!(layout.kind(), PackedFileKind::Standard);
        assert_eq!(layout.request_offsets(), &[0, 100, 150, 350]);
        assert_eq!(layout.block_offsets(), &[128, 256, 384]);
        assert_eq!(layout.block_sizes(), &[128, 128, 256]);
        assert!(layout.prefix().is_empty());
    }

    #[test]
    fn test_declared_size_caps_offsets() {
        let entry = standard_entry(&[(0, 128, 100), (128, 128, 100)], 80);
        let layout = BlockLayout::resolve(entry.as_slice(), 0).unwrap();
        assert_eq!(layout.request_offsets(), &[0, 80, 80]);
        assert_eq!(layout.block_containing(79), Some(0));
        assert_eq!(layout.block_containing(80), None);
    }

    #[test]
    fn test_declared_size_extends_last_block() {
        let entry = standard_entry(&[(0, 128, 100)], 150);
        let layout = BlockLayout::resolve(entry.as_slice(), 0).unwrap();
        assert_eq!(layout.request_offsets(), &[0, 150]);
        assert_eq!(layout.block_containing(149), Some(0));
    }

    #[test]
    fn test_block_containing() {
        let entry = standard_entry(&[(0, 128, 100), (128, 128, 50), (256, 256, 200)], 350);
        let layout = BlockLayout::resolve(entry.as_slice(), 0).unwrap();
        assert_eq!(layout.block_containing(0), Some(0));
        assert_eq!(layout.block_containing(99), Some(0));
        assert_eq!(layout.block_containing(100), Some(1));
        assert_eq!(layout.block_containing(150), Some(2));
        assert_eq!(layout.block_containing(349), Some(2));
        assert_eq!(layout.block_containing(350), None);
    }

    #[test]
    fn test_block_table_overrun() {
        let mut entry = standard_entry(&[], 10);
        entry[20..24].copy_from_slice(&100u32.to_le_bytes());
        assert!(matches!(
            BlockLayout::resolve(entry.as_slice(), 0),
            Err(SqPackError::OutOfBounds(_))
        ));
    }

    #[test]
    fn test_empty_layout() {
        let mut entry = Vec::new();
        for v in [128u32, 1, 64, 1, 1, 0] {
            entry.extend_from_slice(&v.to_le_bytes());
        }
        entry.resize(128, 0);

        let layout = BlockLayout::resolve(entry.as_slice(), 0).unwrap();
        assert_eq!(layout.kind(), PackedFileKind::Empty);
        assert_eq!(layout.block_count(), 0);
        assert_eq!(layout.request_offsets(), &[64]);
        assert_eq!(layout.block_containing(0), None);
    }
}
