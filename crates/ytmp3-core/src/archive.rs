//! Download archive: skip videos that were already converted
//!
//! Same line format as yt-dlp's `--download-archive` file (`youtube <id>`),
//! so an archive written by either tool is understood by both.

use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug)]
pub struct DownloadArchive {
    path: PathBuf,
    seen: HashSet<String>,
}

impl DownloadArchive {
    /// Load an archive file; a missing file yields an empty archive.
    pub async fn load(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();

        let seen: HashSet<String> = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content
                .lines()
                .filter_map(|line| {
                    line.trim()
                        .strip_prefix("youtube ")
                        .map(|id| id.to_string())
                })
                .collect(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => HashSet::new(),
            Err(e) => return Err(e),
        };

        debug!("Loaded download archive with {} entries", seen.len());
        Ok(Self { path, seen })
    }

    pub fn contains(&self, video_id: &str) -> bool {
        self.seen.contains(video_id)
    }

    /// Record a completed video id, appending to the archive file.
    pub async fn record(&mut self, video_id: &str) -> io::Result<()> {
        if !self.seen.insert(video_id.to_string()) {
            return Ok(());
        }

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut content = match tokio::fs::read_to_string(&self.path).await {
            Ok(c) => c,
            Err(e) if e.kind() == io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(e),
        };
        if !content.is_empty() && !content.ends_with('\n') {
            content.push('\n');
        }
        content.push_str(&format!("youtube {}\n", video_id));

        tokio::fs::write(&self.path, content).await
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let archive = DownloadArchive::load(dir.path().join("downloaded.txt"))
            .await
            .unwrap();
        assert!(archive.is_empty());
        assert!(!archive.contains("abc123"));
    }

    #[tokio::test]
    async fn test_record_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("downloaded.txt");

        let mut archive = DownloadArchive::load(&path).await.unwrap();
        archive.record("dQw4w9WgXcQ").await.unwrap();
        archive.record("abc123").await.unwrap();
        // Duplicate records are a no-op.
        archive.record("abc123").await.unwrap();
        assert_eq!(archive.len(), 2);

        let reloaded = DownloadArchive::load(&path).await.unwrap();
        assert_eq!(reloaded.len(), 2);
        assert!(reloaded.contains("dQw4w9WgXcQ"));
        assert!(reloaded.contains("abc123"));
        assert!(!reloaded.contains("zzz"));
    }

    #[tokio::test]
    async fn test_yt_dlp_format_compatibility() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("downloaded.txt");
        tokio::fs::write(&path, "youtube one\n\nyoutube two\nnot-an-entry\n")
            .await
            .unwrap();

        let archive = DownloadArchive::load(&path).await.unwrap();
        assert!(archive.contains("one"));
        assert!(archive.contains("two"));
        assert_eq!(archive.len(), 2);
    }
}
