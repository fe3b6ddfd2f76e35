//! Lists one folder of a SqPack game directory.
//!
//! ```text
//! cargo run --example dump_tree -- --game ~/ffxiv/game --paths paths.txt exd
//! cargo run --example dump_tree -- --game ~/ffxiv/game --hash-db paths.db --search "*.exh"
//! ```
//!
//! `--paths` builds the hash database from a plain path list (one path per
//! line) and writes it next to the list as `<list>.db` for later runs.
use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use sqpack_formats::Platform;
use sqpack_vfs::{HashDatabase, SearchOptions, VfsConfig, VirtualFileSystem};
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Clone, Copy, ValueEnum)]
enum PlatformArg {
    Win32,
    Ps3,
    Ps4,
    Ps5,
}

impl From<PlatformArg> for Platform {
    fn from(arg: PlatformArg) -> Self {
        match arg {
            PlatformArg::Win32 => Self::Win32,
            PlatformArg::Ps3 => Self::Ps3,
            PlatformArg::Ps4 => Self::Ps4,
            PlatformArg::Ps5 => Self::Ps5,
        }
    }
}

#[derive(Parser)]
#[command(name = "dump_tree")]
struct Cli {
    /// Game directory containing `sqpack/`.
    #[clap(long, env = "SQPACK_GAME_PATH")]
    pub game: PathBuf,

    /// Compressed hash database cache.
    #[clap(long, conflicts_with = "paths")]
    pub hash_db: Option<PathBuf>,

    /// Plain path list to build the hash database from.
    #[clap(long)]
    pub paths: Option<PathBuf>,

    /// Platform suffix of the archive files.
    #[clap(long, value_enum, default_value = "win32")]
    pub platform: PlatformArg,

    /// Search below the folder instead of listing it.
    #[clap(long)]
    pub search: Option<String>,

    /// Folder to list, `/` separated. Empty lists the categories.
    #[clap(default_value = "")]
    pub folder: String,
}

async fn print_folder(vfs: &VirtualFileSystem, folder: sqpack_vfs::FolderId) -> Result<()> {
    let folder = vfs.file_names_resolved(folder).await?;

    for child in vfs.folders(folder)? {
        println!("{:>12}  {}", "<dir>", vfs.folder_path(child)?);
    }

    for file in vfs.files(folder)? {
        let path = vfs.file_path(file)?;
        match vfs.lookup(file).and_then(|lookup| lookup.size()) {
            Ok(size) => println!("{size:>12}  {path}"),
            Err(e) => println!("{:>12}  {path} ({e})", "?"),
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let args = Cli::parse();

    let config = VfsConfig::new(&args.game).with_platform(args.platform.into());
    let vfs = if let Some(list) = &args.paths {
        let reader = BufReader::new(File::open(list).with_context(|| format!("opening {}", list.display()))?);
        let cache = list.with_extension("db");
        let hashdb = HashDatabase::write_cached_file(reader, &cache)?;
        info!("Wrote hash database to {}", cache.display());
        VirtualFileSystem::with_hash_database(config, hashdb)?
    } else if let Some(cache) = &args.hash_db {
        VirtualFileSystem::open(config.with_hash_db_cache(cache))?
    } else {
        VirtualFileSystem::open(config)?
    };

    let folder = vfs
        .find_folder(&args.folder)
        .await
        .with_context(|| format!("no folder {:?}", args.folder))?;

    match &args.search {
        Some(query) => {
            let results = vfs
                .search(folder, query, SearchOptions::from_config(vfs.config()), Arc::new(()))
                .await?;
            for &id in &results.folders {
                println!("{}", vfs.folder_path(id)?);
            }
            for &id in &results.files {
                println!("{}", vfs.file_path(id)?);
            }
            info!(
                "{} folders and {} files matched ({} entries, {} timed out)",
                results.folders.len(),
                results.files.len(),
                results.processed,
                results.timed_out
            );
        }
        None => print_folder(&vfs, folder).await?,
    }

    Ok(())
}
