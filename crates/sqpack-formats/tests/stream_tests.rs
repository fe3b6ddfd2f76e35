//! Block-compressed stream behaviour over synthetic packed files

#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]

use pretty_assertions::assert_eq;
use proptest::prelude::*;
use sqpack_formats::dat::{BlockLayout, MODEL_HEADER_SIZE, PackedFileKind, PackedFileStream};
use sqpack_formats::SqPackError;
use sqpack_test_utils::encode::{self, Block, ModelSpec};
use std::io::{ErrorKind, Read, Seek, SeekFrom};

fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len)
        .map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed))
        .collect()
}

/// Place a packed file after some unrelated bytes so entry offsets are non-zero
fn in_dat(packed: &[u8]) -> (Vec<u8>, u64) {
    let mut dat = vec![0xEE; 0x800];
    let offset = dat.len() as u64;
    dat.extend_from_slice(packed);
    (dat, offset)
}

#[test]
fn test_partial_read_spans_three_blocks() {
    let first = pattern(100, 1);
    let second = pattern(50, 2);
    let third = pattern(200, 3);
    let packed = encode::standard_file(&[
        Block::Compressed(first.clone()),
        Block::Compressed(second.clone()),
        Block::Raw(third.clone()),
    ]);
    let (dat, offset) = in_dat(&packed);

    let mut stream = PackedFileStream::new(dat.as_slice(), offset);
    let layout = stream.layout().unwrap();
    assert_eq!(layout.request_offsets(), &[0, 100, 150, 350]);

    let mut buf = vec![0u8; 120];
    let read = stream.read_at(90, &mut buf).unwrap();
    assert_eq!(read, 120);

    let mut expected = first[90..].to_vec();
    expected.extend_from_slice(&second);
    expected.extend_from_slice(&third[..60]);
    assert_eq!(buf, expected);
    assert_eq!(stream.position(), 210);
}

#[test]
fn test_single_byte_reads_cross_block_boundaries() {
    let blocks = [pattern(100, 1), pattern(50, 2), pattern(200, 3)];
    let packed = encode::standard_file(&[
        Block::Compressed(blocks[0].clone()),
        Block::Compressed(blocks[1].clone()),
        Block::Raw(blocks[2].clone()),
    ]);
    let (dat, offset) = in_dat(&packed);
    let expected = blocks.concat();

    let mut stream = PackedFileStream::new(dat.as_slice(), offset);
    let mut data = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        match stream.read(&mut byte).unwrap() {
            0 => break,
            n => data.extend_from_slice(&byte[..n]),
        }
    }
    assert_eq!(data.len(), expected.len());
    for start in [100usize, 150] {
        assert_eq!(&data[start - 2..start + 2], &expected[start - 2..start + 2], "around {start}");
    }
    assert_eq!(data, expected);

    for start in [100u64, 150] {
        let mut pair = [0u8; 2];
        stream.seek(SeekFrom::Start(start - 1)).unwrap();
        stream.read_exact(&mut pair).unwrap();
        let at = start as usize;
        assert_eq!(pair, [expected[at - 1], expected[at]], "pair at {start}");
        assert_eq!(stream.position(), start + 1);
    }
}

#[test]
fn test_raw_block_marker() {
    let payload = pattern(500, 9);
    let packed = encode::standard_file(&[Block::Raw(payload.clone())]);
    let mut stream = PackedFileStream::new(packed, 0);
    assert_eq!(stream.read_all().unwrap(), payload);
}

#[test]
fn test_declared_size_smaller_than_blocks() {
    let packed = encode::standard_file_with_size(
        &[Block::Compressed(pattern(100, 0)), Block::Compressed(pattern(100, 1))],
        150,
    );
    let mut stream = PackedFileStream::new(packed, 0);
    let layout = stream.layout().unwrap();
    assert_eq!(*layout.request_offsets().last().unwrap(), 150);

    let data = stream.read_all().unwrap();
    assert_eq!(data.len(), 150);
    assert_eq!(&data[100..], &pattern(100, 1)[..50]);
}

#[test]
fn test_declared_size_larger_than_blocks_zero_fills() {
    let packed = encode::standard_file_with_size(&[Block::Compressed(pattern(100, 4))], 160);
    let mut stream = PackedFileStream::new(packed, 0);
    let layout = stream.layout().unwrap();
    assert_eq!(layout.request_offsets(), &[0, 160]);

    let data = stream.read_all().unwrap();
    assert_eq!(&data[..100], &pattern(100, 4)[..]);
    assert_eq!(&data[100..], &[0u8; 60][..]);
}

#[test]
fn test_empty_file_reads_zeros() {
    let packed = encode::empty_file(300);
    let mut stream = PackedFileStream::new(packed, 0);
    assert_eq!(stream.layout().unwrap().kind(), PackedFileKind::Empty);
    assert_eq!(stream.read_all().unwrap(), vec![0u8; 300]);
}

#[test]
fn test_texture_header_region_then_mips() {
    let header = pattern(0x50, 7);
    let mip0 = pattern(3000, 1);
    let mip1 = pattern(700, 2);
    let packed = encode::texture_file(
        &header,
        &[encode::chunk(&mip0, 1024), vec![Block::Raw(mip1.clone())]],
    );
    let (dat, offset) = in_dat(&packed);

    let mut stream = PackedFileStream::new(dat.as_slice(), offset);
    let layout = stream.layout().unwrap();
    assert_eq!(layout.kind(), PackedFileKind::Texture);
    assert_eq!(layout.prefix(), header.as_slice());
    assert_eq!(layout.block_count(), 4);
    assert_eq!(layout.request_offsets()[0], 0x50);

    let mut expected = header.clone();
    expected.extend_from_slice(&mip0);
    expected.extend_from_slice(&mip1);
    assert_eq!(stream.read_all().unwrap(), expected);

    // A read straddling the header region and the first block
    let mut buf = [0u8; 32];
    stream.read_at(0x40, &mut buf).unwrap();
    assert_eq!(&buf[..], &expected[0x40..0x60]);
}

fn u32_at(data: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes(data[offset..offset + 4].try_into().unwrap())
}

#[test]
fn test_model_reorders_chunks_and_synthesizes_header() {
    let stack = pattern(120, 1);
    let runtime = pattern(80, 2);
    let vertex0 = pattern(2000, 3);
    let vertex1 = pattern(300, 4);
    let edge0 = pattern(40, 5);
    let index0 = pattern(600, 6);

    let mut spec = ModelSpec {
        version: 0x0100_0005,
        vertex_declaration_count: 3,
        material_count: 2,
        lod_count: 2,
        ..ModelSpec::default()
    };
    spec.slots[0] = vec![Block::Compressed(stack.clone())];
    spec.slots[1] = vec![Block::Raw(runtime.clone())];
    spec.slots[2] = encode::chunk(&vertex0, 512);
    spec.slots[3] = vec![Block::Compressed(vertex1.clone())];
    spec.slots[5] = vec![Block::Compressed(edge0.clone())];
    spec.slots[8] = vec![Block::Compressed(index0.clone())];

    let packed = encode::model_file(&spec);
    let mut stream = PackedFileStream::new(packed, 0);
    let data = stream.read_all().unwrap();

    let header = &data[..MODEL_HEADER_SIZE];
    let mut body = stack.clone();
    body.extend_from_slice(&runtime);
    body.extend_from_slice(&vertex0);
    body.extend_from_slice(&edge0);
    body.extend_from_slice(&index0);
    body.extend_from_slice(&vertex1);
    assert_eq!(&data[MODEL_HEADER_SIZE..], body.as_slice());

    let vertex0_at = (MODEL_HEADER_SIZE + 120 + 80) as u32;
    let index0_at = vertex0_at + 2000 + 40;
    let vertex1_at = index0_at + 600;

    assert_eq!(u32_at(header, 0x00), 0x0100_0005);
    assert_eq!(u32_at(header, 0x04), 120);
    assert_eq!(u32_at(header, 0x08), 80);
    assert_eq!(u16::from_le_bytes([header[0x0C], header[0x0D]]), 3);
    assert_eq!(u16::from_le_bytes([header[0x0E], header[0x0F]]), 2);
    assert_eq!(u32_at(header, 0x10), vertex0_at);
    assert_eq!(u32_at(header, 0x14), vertex1_at);
    assert_eq!(u32_at(header, 0x18), 0);
    assert_eq!(u32_at(header, 0x1C), index0_at);
    assert_eq!(u32_at(header, 0x28), 2000);
    assert_eq!(u32_at(header, 0x2C), 300);
    assert_eq!(u32_at(header, 0x34), 600);
    assert_eq!(header[0x40], 2);
}

#[test]
fn test_clones_read_independently() {
    let data = pattern(4000, 11);
    let packed = encode::standard_file(&encode::chunk(&data, 1000));
    let mut a = PackedFileStream::new(packed.as_slice(), 0);
    a.seek(SeekFrom::Start(2500)).unwrap();
    let mut b = a.clone();

    b.seek(SeekFrom::Start(10)).unwrap();
    let mut from_b = [0u8; 10];
    b.read_exact(&mut from_b).unwrap();

    let mut from_a = [0u8; 10];
    a.read_exact(&mut from_a).unwrap();

    assert_eq!(&from_a[..], &data[2500..2510]);
    assert_eq!(&from_b[..], &data[10..20]);
}

#[test]
fn test_truncated_dat_is_eof() {
    let packed = encode::standard_file(&encode::chunk(&pattern(2000, 1), 1000));
    let truncated = packed[..packed.len() - 200].to_vec();

    let mut stream = PackedFileStream::new(truncated, 0);
    let mut buf = Vec::new();
    let err = stream.read_to_end(&mut buf).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnexpectedEof);
}

#[test]
fn test_corrupt_block_header_is_invalid_data() {
    let mut packed = encode::standard_file(&[Block::Compressed(pattern(300, 1))]);
    // First block starts right after the 128-byte packed header; zero its header_size
    packed[128..132].copy_from_slice(&0u32.to_le_bytes());

    let mut stream = PackedFileStream::new(packed.clone(), 0);
    let mut buf = [0u8; 16];
    let err = stream.read(&mut buf).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidData);

    let mut direct = PackedFileStream::new(packed, 0);
    assert!(matches!(
        direct.read_at(0, &mut buf),
        Err(SqPackError::InvalidBlockHeader { offset: 128, .. })
    ));
}

#[test]
fn test_unknown_type_tag() {
    let mut packed = encode::empty_file(10);
    packed[4..8].copy_from_slice(&7u32.to_le_bytes());
    assert!(matches!(
        BlockLayout::resolve(packed.as_slice(), 0),
        Err(SqPackError::UnsupportedFileType(7))
    ));
}

proptest! {
    #[test]
    fn chunked_reads_match_full_read(
        data in proptest::collection::vec(any::<u8>(), 1..6000),
        block_size in 1usize..1500,
        chunks in proptest::collection::vec(1usize..700, 1..40),
    ) {
        let blocks: Vec<Block> = data
            .chunks(block_size)
            .enumerate()
            .map(|(i, c)| if i % 3 == 2 { Block::Raw(c.to_vec()) } else { Block::Compressed(c.to_vec()) })
            .collect();
        let packed = encode::standard_file(&blocks);

        let mut full_stream = PackedFileStream::new(packed.as_slice(), 0);
        let full = full_stream.read_all().unwrap();
        prop_assert_eq!(&full, &data);

        let mut stream = PackedFileStream::new(packed.as_slice(), 0);
        let mut pieced = Vec::new();
        let mut sizes = chunks.iter().cycle();
        loop {
            let mut buf = vec![0u8; *sizes.next().unwrap()];
            let n = stream.read(&mut buf).unwrap();
            if n == 0 {
                break;
            }
            pieced.extend_from_slice(&buf[..n]);
        }
        prop_assert_eq!(pieced, full);
    }

    #[test]
    fn positioned_reads_match_slices(
        data in proptest::collection::vec(any::<u8>(), 1..4000),
        block_size in 16usize..1024,
        offset in 0usize..4500,
        len in 0usize..1200,
    ) {
        let packed = encode::standard_file(&encode::chunk(&data, block_size));
        let mut stream = PackedFileStream::new(packed, 0);

        let mut buf = vec![0u8; len];
        let n = stream.read_at(offset as u64, &mut buf).unwrap();

        let start = offset.min(data.len());
        let end = (offset + len).min(data.len());
        prop_assert_eq!(&buf[..n], &data[start..end]);
    }
}
