//! Index parsing against synthetic game directories

#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]

use sqpack_formats::{IndexFile, IndexId, PackedFileStream, PathHashes, Platform};
use sqpack_test_utils::encode::{self, Block};
use sqpack_test_utils::{GameDirBuilder, require_game_data};

fn index_path(root: &std::path::Path, id: IndexId) -> std::path::PathBuf {
    root.join("sqpack")
        .join(id.expansion_dir())
        .join(id.index_file_name(Platform::Win32))
}

#[test]
fn test_hash_lookup_and_read() {
    let id = IndexId::from_path("exd/root.exl").unwrap();
    let hashes = PathHashes::of("exd/root.exl");
    let body = b"EXLT,2\nAchievement,209\n".to_vec();

    let mut builder = GameDirBuilder::new();
    let offset = builder.add_file(
        id.0,
        hashes.folder,
        hashes.file,
        &encode::standard_file(&[Block::Compressed(body.clone())]),
    );
    let other = PathHashes::of("exd/achievement.exh");
    builder.add_file(id.0, other.folder, other.file, &encode::empty_file(4));
    let dir = builder.write_temp().unwrap();

    let index = IndexFile::open(&index_path(dir.path(), id)).unwrap();
    assert_eq!(index.entries().len(), 2);
    assert_eq!(index.file_count(), 2);
    assert!(index.entries().windows(2).all(|w| w[0].hash <= w[1].hash));

    let entry = index.find(hashes.folder, hashes.file).unwrap();
    assert_eq!(entry.offset, offset);
    assert_eq!(entry.data_file_id, 0);
    assert!(!entry.is_synonym);
    assert_eq!(entry.folder_hash(), hashes.folder);

    let dat = std::fs::read(builder.dat_path(dir.path(), id.0)).unwrap();
    let mut stream = PackedFileStream::new(dat, entry.offset);
    assert_eq!(stream.read_all().unwrap(), body);

    assert!(index.find(hashes.folder, 0xDEAD_BEEF).is_none());
}

#[test]
fn test_synonym_rows() {
    let id = IndexId::new(0x04, 0, 0);
    let first = "chara/xls/charamake/human.cmp";
    let second = "chara/xls/charamake/HUMAN.cmp";
    let hashes = PathHashes::of(first);

    let mut builder = GameDirBuilder::new();
    builder.add_synonym(id.0, hashes.folder, hashes.file, first, &encode::empty_file(8));
    builder.add_synonym(id.0, hashes.folder, hashes.file, second, &encode::empty_file(16));
    let plain = PathHashes::of("chara/xls/attackoffset.bin");
    builder.add_file(id.0, plain.folder, plain.file, &encode::empty_file(1));
    let stale = "chara/xls/charamake/stale.cmp";
    let stale_hashes = PathHashes::of(stale);
    builder.add_stale_synonym(id.0, stale_hashes.folder, stale_hashes.file, stale);
    let dir = builder.write_temp().unwrap();

    let index = IndexFile::open(&index_path(dir.path(), id)).unwrap();
    assert_eq!(index.synonyms().len(), 2);
    assert!(index.synonyms().iter().all(|s| s.path != stale));
    assert!(index.find_synonym(stale).is_none());
    assert_eq!(index.synonyms()[1].path, second);
    assert_eq!(index.synonyms()[1].conflict_index, 1);
    // One real row plus the synonym-flagged row standing in for both paths
    assert_eq!(index.file_count(), 3);

    let flagged = index.find(hashes.folder, hashes.file).unwrap();
    assert!(flagged.is_synonym);

    let synonym = index.find_synonym("CHARA/xls/charamake/human.cmp").unwrap();
    assert_eq!(synonym.file_hash, hashes.file);
}

#[test]
fn test_index_header_bounds() {
    let mut builder = GameDirBuilder::new();
    builder.add_file(0, 1, 2, &encode::empty_file(1));
    let dir = builder.write_temp().unwrap();

    let mut data = std::fs::read(index_path(dir.path(), IndexId(0))).unwrap();
    // Point the hash table far past the end
    data[0x408..0x40C].copy_from_slice(&0x00FF_0000u32.to_le_bytes());
    assert!(IndexFile::parse(&data).is_err());
}

#[test]
fn test_real_installation_root_exl() {
    let game = require_game_data!();
    let id = IndexId::from_path("exd/root.exl").unwrap();
    let index = IndexFile::open(&index_path(&game, id)).unwrap();

    let hashes = PathHashes::of("exd/root.exl");
    let entry = index.find(hashes.folder, hashes.file).unwrap();
    let dat = std::fs::read(
        game.join("sqpack")
            .join(id.expansion_dir())
            .join(id.dat_file_name(Platform::Win32, entry.data_file_id)),
    )
    .unwrap();
    let text = PackedFileStream::new(dat, entry.offset).read_all().unwrap();
    assert!(text.starts_with(b"EXLT"));
}
