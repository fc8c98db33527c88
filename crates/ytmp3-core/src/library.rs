//! Library of completed conversions
//!
//! A JSON index keyed by entry id, written atomically on every mutation.
//! Entries are immutable once created; removal is an explicit caller
//! action and never deletes the audio file itself.

use crate::error::LibraryError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

/// A completed, persisted output record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LibraryEntry {
    pub id: Uuid,
    pub path: PathBuf,
    pub title: String,
    /// Best-effort: yt-dlp artist tag, falling back to uploader/channel.
    pub artist: Option<String>,
    pub duration_secs: Option<f64>,
    pub format: String,
    pub created_at: DateTime<Utc>,
}

/// Fields supplied by the queue manager when a job succeeds; id and
/// timestamp are assigned by the store.
#[derive(Debug, Clone)]
pub struct NewEntry {
    pub path: PathBuf,
    pub title: String,
    pub artist: Option<String>,
    pub duration_secs: Option<f64>,
    pub format: String,
}

pub struct LibraryStore {
    index_path: PathBuf,
    entries: Mutex<Vec<LibraryEntry>>,
}

impl LibraryStore {
    /// Open a library index; a missing file yields an empty library.
    pub fn open(index_path: impl AsRef<Path>) -> Result<Self, LibraryError> {
        let index_path = index_path.as_ref().to_path_buf();

        let entries = match std::fs::read_to_string(&index_path) {
            Ok(content) => serde_json::from_str(&content)
                .map_err(|e| LibraryError::Corrupt(e.to_string()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };

        debug!("Opened library at {:?}", index_path);
        Ok(Self {
            index_path,
            entries: Mutex::new(entries),
        })
    }

    /// Add a completed output. Returns the stored entry.
    pub async fn add(&self, new: NewEntry) -> Result<LibraryEntry, LibraryError> {
        let entry = LibraryEntry {
            id: Uuid::new_v4(),
            path: new.path,
            title: new.title,
            artist: new.artist,
            duration_secs: new.duration_secs,
            format: new.format,
            created_at: Utc::now(),
        };

        let mut entries = self.entries.lock().await;
        entries.push(entry.clone());
        self.persist(&entries)?;

        info!("Library entry added: {}", entry.title);
        Ok(entry)
    }

    /// All entries in creation order.
    pub async fn list(&self) -> Vec<LibraryEntry> {
        self.entries.lock().await.clone()
    }

    /// Entries whose artist matches `needle`, case-insensitive. With
    /// `exact` the whole artist must match, otherwise substring.
    pub async fn find_by_artist(&self, needle: &str, exact: bool) -> Vec<LibraryEntry> {
        let needle = needle.to_lowercase();
        self.entries
            .lock()
            .await
            .iter()
            .filter(|e| match &e.artist {
                Some(artist) => {
                    let artist = artist.to_lowercase();
                    if exact {
                        artist == needle
                    } else {
                        artist.contains(&needle)
                    }
                }
                None => false,
            })
            .cloned()
            .collect()
    }

    /// Remove an entry from the index. The audio file is left in place.
    pub async fn remove(&self, id: &Uuid) -> Result<LibraryEntry, LibraryError> {
        let mut entries = self.entries.lock().await;
        let idx = entries
            .iter()
            .position(|e| e.id == *id)
            .ok_or_else(|| LibraryError::NotFound(id.to_string()))?;

        let removed = entries.remove(idx);
        self.persist(&entries)?;

        info!("Library entry removed: {}", removed.title);
        Ok(removed)
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    // Write-then-rename so a crash never leaves a half-written index.
    fn persist(&self, entries: &[LibraryEntry]) -> Result<(), LibraryError> {
        let parent = match self.index_path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&parent)?;

        let json = serde_json::to_string_pretty(entries)
            .map_err(|e| LibraryError::Corrupt(e.to_string()))?;

        let mut tmp = tempfile::NamedTempFile::new_in(&parent)?;
        tmp.write_all(json.as_bytes())?;
        tmp.persist(&self.index_path)
            .map_err(|e| LibraryError::Io(e.error))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(title: &str, artist: Option<&str>) -> NewEntry {
        NewEntry {
            path: PathBuf::from(format!("/music/{}.mp3", title)),
            title: title.to_string(),
            artist: artist.map(String::from),
            duration_secs: Some(212.0),
            format: "mp3".to_string(),
        }
    }

    #[tokio::test]
    async fn test_add_and_list_in_creation_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = LibraryStore::open(dir.path().join("library.json")).unwrap();

        store.add(entry("First", Some("Alpha"))).await.unwrap();
        store.add(entry("Second", Some("Beta"))).await.unwrap();

        let all = store.list().await;
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].title, "First");
        assert_eq!(all[1].title, "Second");
    }

    #[tokio::test]
    async fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let index = dir.path().join("library.json");

        {
            let store = LibraryStore::open(&index).unwrap();
            store.add(entry("Kept", Some("Alpha"))).await.unwrap();
        }

        let store = LibraryStore::open(&index).unwrap();
        let all = store.list().await;
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].title, "Kept");
    }

    #[tokio::test]
    async fn test_find_by_artist() {
        let dir = tempfile::tempdir().unwrap();
        let store = LibraryStore::open(dir.path().join("library.json")).unwrap();

        store.add(entry("One", Some("Daft Punk"))).await.unwrap();
        store.add(entry("Two", Some("Punk Floyd"))).await.unwrap();
        store.add(entry("Three", None)).await.unwrap();

        let substring = store.find_by_artist("punk", false).await;
        assert_eq!(substring.len(), 2);

        let exact = store.find_by_artist("daft punk", true).await;
        assert_eq!(exact.len(), 1);
        assert_eq!(exact[0].title, "One");

        assert!(store.find_by_artist("nobody", false).await.is_empty());
    }

    #[tokio::test]
    async fn test_remove() {
        let dir = tempfile::tempdir().unwrap();
        let store = LibraryStore::open(dir.path().join("library.json")).unwrap();

        let kept = store.add(entry("Keep", None)).await.unwrap();
        let gone = store.add(entry("Drop", None)).await.unwrap();

        store.remove(&gone.id).await.unwrap();
        assert!(matches!(
            store.remove(&gone.id).await,
            Err(LibraryError::NotFound(_))
        ));

        let all = store.list().await;
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id, kept.id);
    }

    #[tokio::test]
    async fn test_corrupt_index_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let index = dir.path().join("library.json");
        std::fs::write(&index, "{ not json").unwrap();

        assert!(matches!(
            LibraryStore::open(&index),
            Err(LibraryError::Corrupt(_))
        ));
    }
}
