//! Reuse of extracted files left in the temp directory by an interrupted run.

use crate::tools::makemkv::is_mkv;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tokio::fs;
use tracing::debug;

/// Non-empty `.mkv` files directly inside `temp_dir`, oldest first.
///
/// Age is the creation time, or the modification time on filesystems that
/// don't record creation. Entries that vanish while listing are skipped.
pub async fn find_leftover_files(temp_dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut found: Vec<(SystemTime, PathBuf)> = Vec::new();

    let mut entries = fs::read_dir(temp_dir).await?;
    loop {
        let entry = match entries.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(e) => {
                debug!("Stopped listing {}: {}", temp_dir.display(), e);
                break;
            }
        };
        let path = entry.path();
        if !is_mkv(&path) {
            continue;
        }
        let metadata = match entry.metadata().await {
            Ok(metadata) => metadata,
            Err(e) => {
                debug!("Skipping {}: {}", path.display(), e);
                continue;
            }
        };
        if !metadata.is_file() || metadata.len() == 0 {
            continue;
        }
        let age = metadata
            .created()
            .or_else(|_| metadata.modified())
            .unwrap_or(SystemTime::UNIX_EPOCH);
        found.push((age, path));
    }

    found.sort();
    Ok(found.into_iter().map(|(_, path)| path).collect())
}
