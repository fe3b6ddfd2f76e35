//! SqPack archive format support
//!
//! This crate reads the on-disk pieces of a SqPack game archive:
//!
//! - [`path`]: the CRC-based path hash and path to index-id mapping
//! - [`index`]: `.index` files (hash table and synonym table)
//! - [`dat`]: packed files in `.datN` files, their block layouts and a
//!   seekable [`PackedFileStream`] that decompresses blocks on demand
//!
//! Nothing here is async or keeps global state; the `sqpack-vfs` crate
//! builds the browsable filesystem on top.
//!
//! # Example
//!
//! ```no_run
//! use sqpack_formats::{IndexFile, PathHashes, PackedFileStream};
//! use std::io::Read;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let index = IndexFile::open("game/sqpack/ffxiv/0a0000.win32.index".as_ref())?;
//! let hashes = PathHashes::of("exd/root.exl");
//! if let Some(entry) = index.find(hashes.folder, hashes.file) {
//!     let dat = std::fs::read(format!("game/sqpack/ffxiv/0a0000.win32.dat{}", entry.data_file_id))?;
//!     let mut stream = PackedFileStream::new(dat, entry.offset);
//!     let mut text = String::new();
//!     stream.read_to_string(&mut text)?;
//!     println!("{text}");
//! }
//! # Ok(())
//! # }
//! ```

pub mod dat;
pub mod error;
pub mod index;
pub mod path;

pub use dat::{
    BlockHeader, BlockLayout, PackedFileHeader, PackedFileKind, PackedFileStream, ReadAt,
};
pub use error::{Result, SqPackError};
pub use index::{IndexEntry, IndexFile, Locator, SqPackHeader, SynonymEntry};
pub use path::{IndexId, PathHashes, Platform, sqpack_hash, split_path};
