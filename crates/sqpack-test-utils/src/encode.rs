//! Encoders producing packed files in the layouts the readers understand

use flate2::Compression;
use flate2::write::DeflateEncoder;
use std::io::Write;

/// Packed files and blocks are aligned to this many bytes
pub const ALIGNMENT: usize = 128;

/// `compressed_size` marker for a block stored without compression
pub const RAW_BLOCK_MARKER: u32 = 32000;

const PACKED_HEADER_SIZE: usize = 24;
const MODEL_SLOTS: usize = 11;
const MODEL_LOCATOR_SIZE: usize = 184;

/// One data block before encoding
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Block {
    /// Deflate-compressed payload
    Compressed(Vec<u8>),
    /// Payload stored verbatim behind the 32000 marker
    Raw(Vec<u8>),
}

impl Block {
    /// Decompressed contents
    pub fn payload(&self) -> &[u8] {
        match self {
            Self::Compressed(data) | Self::Raw(data) => data,
        }
    }

    /// Encode with its 16-byte header, padded to [`ALIGNMENT`]
    pub fn encode(&self) -> Vec<u8> {
        let (compressed_size, body) = match self {
            Self::Compressed(data) => {
                let body = deflate(data);
                (body.len() as u32, body)
            }
            Self::Raw(data) => (RAW_BLOCK_MARKER, data.clone()),
        };

        let mut out = Vec::with_capacity(16 + body.len());
        push_u32(&mut out, 16);
        push_u32(&mut out, 0);
        push_u32(&mut out, compressed_size);
        push_u32(&mut out, self.payload().len() as u32);
        out.extend_from_slice(&body);
        pad(&mut out);
        out
    }
}

/// Split `data` into compressed blocks of at most `block_size` bytes
pub fn chunk(data: &[u8], block_size: usize) -> Vec<Block> {
    data.chunks(block_size.max(1))
        .map(|c| Block::Compressed(c.to_vec()))
        .collect()
}

/// Raw DEFLATE without zlib framing
pub fn deflate(data: &[u8]) -> Vec<u8> {
    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
    // Writing into a Vec cannot fail
    let _ = encoder.write_all(data);
    encoder.finish().unwrap_or_default()
}

/// Standard packed file whose declared size is the sum of its payloads
pub fn standard_file(blocks: &[Block]) -> Vec<u8> {
    let declared = blocks.iter().map(|b| b.payload().len()).sum::<usize>();
    standard_file_with_size(blocks, declared as u32)
}

/// Standard packed file with an explicit declared size
pub fn standard_file_with_size(blocks: &[Block], declared: u32) -> Vec<u8> {
    let encoded: Vec<Vec<u8>> = blocks.iter().map(Block::encode).collect();

    let mut table = Vec::new();
    let mut offset = 0u32;
    for (block, bytes) in blocks.iter().zip(&encoded) {
        push_u32(&mut table, offset);
        push_u16(&mut table, bytes.len() as u16);
        push_u16(&mut table, block.payload().len() as u16);
        offset += bytes.len() as u32;
    }

    assemble(2, declared, blocks.len() as u32, &table, &encoded.concat())
}

/// Packed file of the empty type
pub fn empty_file(declared: u32) -> Vec<u8> {
    assemble(1, declared, 0, &[], &[])
}

/// Texture packed file: a verbatim `header` region followed by one block run per mip
pub fn texture_file(header: &[u8], mips: &[Vec<Block>]) -> Vec<u8> {
    let mut data = header.to_vec();
    let mut mip_table = Vec::new();
    let mut size_table = Vec::new();
    let mut first_block = 0u32;
    let mut declared = header.len();

    for blocks in mips {
        let compressed_offset = data.len() as u32;
        let mut compressed_size = 0u32;
        let mut decompressed_size = 0u32;
        for block in blocks {
            let bytes = block.encode();
            push_u16(&mut size_table, bytes.len() as u16);
            compressed_size += bytes.len() as u32;
            decompressed_size += block.payload().len() as u32;
            data.extend_from_slice(&bytes);
        }

        push_u32(&mut mip_table, compressed_offset);
        push_u32(&mut mip_table, compressed_size);
        push_u32(&mut mip_table, decompressed_size);
        push_u32(&mut mip_table, first_block);
        push_u32(&mut mip_table, blocks.len() as u32);

        first_block += blocks.len() as u32;
        declared += decompressed_size as usize;
    }

    mip_table.extend_from_slice(&size_table);
    assemble(4, declared as u32, mips.len() as u32, &mip_table, &data)
}

/// Model contents, slot by slot
///
/// Slots: 0 stack, 1 runtime, 2..5 vertex, 5..8 edge geometry, 8..11 index.
#[derive(Debug, Clone, Default)]
pub struct ModelSpec {
    /// Written into the synthesized header's version field
    pub version: u32,
    /// Blocks of each slot
    pub slots: [Vec<Block>; MODEL_SLOTS],
    pub vertex_declaration_count: u16,
    pub material_count: u16,
    pub lod_count: u8,
    pub index_streaming: u8,
    pub edge_geometry: u8,
}

impl ModelSpec {
    /// Decompressed size of one slot
    pub fn slot_size(&self, slot: usize) -> u32 {
        self.slots[slot]
            .iter()
            .map(|b| b.payload().len() as u32)
            .sum()
    }
}

/// Model packed file. Blocks are stored in slot order; readers must
/// reorder them into stack, runtime, then vertex/edge/index per LOD.
pub fn model_file(spec: &ModelSpec) -> Vec<u8> {
    let mut decompressed_sizes = [0u32; MODEL_SLOTS];
    let mut chunk_sizes = [0u32; MODEL_SLOTS];
    let mut first_offsets = [0u32; MODEL_SLOTS];
    let mut first_indices = [0u16; MODEL_SLOTS];
    let mut block_counts = [0u16; MODEL_SLOTS];

    let mut data = Vec::new();
    let mut size_table = Vec::new();
    let mut block_index = 0u16;

    for (slot, blocks) in spec.slots.iter().enumerate() {
        first_offsets[slot] = data.len() as u32;
        first_indices[slot] = block_index;
        block_counts[slot] = blocks.len() as u16;
        decompressed_sizes[slot] = spec.slot_size(slot);

        for block in blocks {
            let bytes = block.encode();
            push_u16(&mut size_table, bytes.len() as u16);
            chunk_sizes[slot] += bytes.len() as u32;
            data.extend_from_slice(&bytes);
            block_index += 1;
        }
    }

    let mut locator = Vec::with_capacity(MODEL_LOCATOR_SIZE + size_table.len());
    for table in [decompressed_sizes, chunk_sizes, first_offsets] {
        for value in table {
            push_u32(&mut locator, value);
        }
    }
    for table in [first_indices, block_counts] {
        for value in table {
            push_u16(&mut locator, value);
        }
    }
    push_u16(&mut locator, spec.vertex_declaration_count);
    push_u16(&mut locator, spec.material_count);
    locator.extend_from_slice(&[spec.lod_count, spec.index_streaming, spec.edge_geometry, 0]);
    locator.extend_from_slice(&size_table);

    let declared = 0x44 + decompressed_sizes.iter().sum::<u32>();
    assemble(3, declared, spec.version, &locator, &data)
}

fn assemble(kind: u32, declared: u32, count_or_version: u32, tables: &[u8], data: &[u8]) -> Vec<u8> {
    let header_size = (PACKED_HEADER_SIZE + tables.len()).next_multiple_of(ALIGNMENT);
    let total = (header_size + data.len()).next_multiple_of(ALIGNMENT);
    let units = (total / ALIGNMENT) as u32;

    let mut out = Vec::with_capacity(total);
    push_u32(&mut out, header_size as u32);
    push_u32(&mut out, kind);
    push_u32(&mut out, declared);
    push_u32(&mut out, units);
    push_u32(&mut out, units);
    push_u32(&mut out, count_or_version);
    out.extend_from_slice(tables);
    out.resize(header_size, 0);
    out.extend_from_slice(data);
    out.resize(total, 0);
    out
}

fn pad(out: &mut Vec<u8>) {
    out.resize(out.len().next_multiple_of(ALIGNMENT), 0);
}

pub(crate) fn push_u32(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_le_bytes());
}

pub(crate) fn push_u16(out: &mut Vec<u8>, value: u16) {
    out.extend_from_slice(&value.to_le_bytes());
}
