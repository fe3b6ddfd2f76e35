//! Hash database properties over generated path lists

#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]

use proptest::prelude::*;
use sqpack_formats::path::CATEGORIES;
use sqpack_formats::{IndexId, PathHashes, sqpack_hash};
use sqpack_vfs::HashDatabase;

fn path_strategy() -> impl Strategy<Value = String> {
    let category = prop::sample::select(CATEGORIES.iter().map(|&(name, _)| name).collect::<Vec<_>>());
    let segment = "[a-zA-Z0-9_]{1,12}";
    (
        category,
        prop::option::of(0u8..5),
        prop::collection::vec(segment, 0..4),
        "[a-zA-Z0-9_]{1,16}\\.[a-z]{3}",
    )
        .prop_map(|(category, expansion, folders, file)| {
            let mut parts = vec![category.to_string()];
            if let Some(n) = expansion {
                parts.push(format!("ex{n}"));
            }
            parts.extend(folders);
            parts.push(file);
            parts.join("/")
        })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn names_rehash_to_their_keys(paths in prop::collection::vec(path_strategy(), 1..80)) {
        let db = HashDatabase::build(&paths);

        for folder in db.folders() {
            prop_assert_eq!(sqpack_hash(folder.name()), folder.hash());
            for (hash, name) in folder.files() {
                prop_assert_eq!(sqpack_hash(name), hash);
            }
        }

        for path in &paths {
            let id = IndexId::from_path(path).unwrap();
            let hashes = PathHashes::of(path);
            let folder = db.resolve_folder(id, hashes.folder).unwrap();
            let name = folder.file_name(hashes.file).unwrap();
            prop_assert!(path.to_lowercase().ends_with(&name.to_lowercase()));
        }

        let reloaded = HashDatabase::from_cache_bytes(&db.to_cache_bytes().unwrap()).unwrap();
        prop_assert_eq!(reloaded, db);
    }
}

#[test]
fn test_explicit_index_id_paths() {
    let db = HashDatabase::build(["000000/abc.dat", "000000/def.dat"]);
    let hashes = PathHashes::of("000000/def.dat");

    let folder = db.resolve_folder(IndexId(0), hashes.folder).unwrap();
    assert_eq!(db.resolve_file_name(&folder, hashes.file), Some("def.dat"));
    assert_eq!(db.resolve_file_name(&folder, 0x0BAD_F00D), None);
    assert_eq!(db.find_file_name_any_folder(IndexId(0), 0x0BAD_F00D), None);
}
