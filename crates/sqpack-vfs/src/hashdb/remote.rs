//! Downloading path lists over HTTP

use super::HashDatabase;
use crate::{Result, VfsError};
use flate2::read::GzDecoder;
use std::io::Read;
use std::path::Path;
use std::time::Duration;
use tracing::info;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Fetch a newline-delimited path list. Gzip-compressed bodies are
/// detected by their magic bytes and inflated.
pub async fn download_path_list(url: &str) -> Result<Vec<String>> {
    let _ = rustls::crypto::ring::default_provider().install_default();

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(300))
        .build()
        .map_err(|e| VfsError::Download(e.to_string()))?;

    let body = client
        .get(url)
        .send()
        .await
        .and_then(reqwest::Response::error_for_status)
        .map_err(|e| VfsError::Download(format!("{url}: {e}")))?
        .bytes()
        .await
        .map_err(|e| VfsError::Download(format!("{url}: {e}")))?;

    let text = if body.starts_with(&GZIP_MAGIC) {
        let mut text = String::new();
        GzDecoder::new(body.as_ref())
            .read_to_string(&mut text)
            .map_err(|e| VfsError::Download(format!("{url}: gzip body: {e}")))?;
        text
    } else {
        String::from_utf8_lossy(&body).into_owned()
    };

    let paths: Vec<String> = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(String::from)
        .collect();

    info!("Downloaded {} paths from {}", paths.len(), url);
    Ok(paths)
}

/// Download a path list, build the database and write its cache file
pub async fn write_cached_file_from_url<P: AsRef<Path>>(url: &str, cache_path: P) -> Result<HashDatabase> {
    let paths = download_path_list(url).await?;
    let cache_path = cache_path.as_ref().to_path_buf();

    tokio::task::spawn_blocking(move || {
        let db = HashDatabase::build(paths);
        db.save(&cache_path)?;
        Ok::<_, VfsError>(db)
    })
    .await
    .map_err(|e| VfsError::Task(e.to_string()))?
}
