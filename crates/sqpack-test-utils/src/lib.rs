//! Test utilities for sqpack-rs
//!
//! Provides synthetic archive builders for unit and integration tests, and
//! discovery of a real game installation for opt-in tests and examples.

pub mod encode;
pub mod writer;

pub use encode::{Block, ModelSpec};
pub use writer::GameDirBuilder;

use std::path::{Path, PathBuf};

/// Environment variable pointing at a game directory (the one holding `sqpack/`)
pub const GAME_PATH_ENV: &str = "SQPACK_GAME_PATH";

/// Attempts to locate a real game installation
pub fn find_game_data() -> Option<PathBuf> {
    // Strategy 1: Check environment variable
    if let Ok(path) = std::env::var(GAME_PATH_ENV) {
        let path = PathBuf::from(shellexpand::tilde(&path).to_string());
        if is_valid_game_data(&path) {
            return Some(path);
        }
    }

    // Strategy 2: Check common installation paths
    common_game_paths()
        .into_iter()
        .find(|path| is_valid_game_data(path))
}

fn common_game_paths() -> Vec<PathBuf> {
    let candidates: &[&str] = if cfg!(windows) {
        &[
            "C:\\Program Files (x86)\\SquareEnix\\FINAL FANTASY XIV - A Realm Reborn\\game",
            "C:\\Program Files\\SquareEnix\\FINAL FANTASY XIV - A Realm Reborn\\game",
        ]
    } else if cfg!(target_os = "macos") {
        &[
            "~/Library/Application Support/FINAL FANTASY XIV ONLINE/Bottles/published_Final_Fantasy/drive_c/Program Files (x86)/SquareEnix/FINAL FANTASY XIV - A Realm Reborn/game",
        ]
    } else {
        &[
            "~/.xlcore/ffxiv/game",
            "~/games/ffxiv/game",
            "/opt/ffxiv/game",
        ]
    };

    candidates
        .iter()
        .map(|p| PathBuf::from(shellexpand::tilde(p).to_string()))
        .collect()
}

/// Check if a path looks like a game directory with SqPack data
pub fn is_valid_game_data(path: &Path) -> bool {
    path.join("sqpack").join("ffxiv").is_dir()
}

/// Print instructions for pointing tests at a game installation
pub fn print_setup_instructions() {
    println!("Game Data Setup Instructions:");
    println!("=============================");
    println!();
    println!("To run tests and examples that require game files, set:");
    println!();
    println!("  {GAME_PATH_ENV} = /path/to/game");
    println!();
    println!("The directory should contain:");
    println!("  - sqpack/ffxiv/  (base game index and dat files)");
    println!("  - sqpack/exN/    (expansion index and dat files, optional)");
}

/// Get a game data path or skip the test with a helpful message
#[macro_export]
macro_rules! require_game_data {
    () => {
        match $crate::find_game_data() {
            Some(path) => path,
            None => {
                println!("Skipping test - no game data found");
                $crate::print_setup_instructions();
                return;
            }
        }
    };
}
