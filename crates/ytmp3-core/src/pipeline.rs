//! Per-job conversion pipeline
//!
//! Runs one job to completion: probe metadata, apply the artist filter
//! and archive gates, invoke the extraction collaborator, then the
//! transcoding collaborator, and hand the result to the library store.
//! The worker operates on value types and cloned Arc dependencies; the
//! queue manager owns all job-record bookkeeping.

use crate::archive::DownloadArchive;
use crate::error::{ExtractError, TranscodeError};
use crate::extractor::{ExtractRequest, MediaExtractor, ProbedMedia};
use crate::job::JobRequest;
use crate::library::{LibraryEntry, LibraryStore, NewEntry};
use crate::transcoder::{sanitize_filename, MediaTags, TranscodeRequest, Transcoder};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Fraction of overall progress assigned to the extraction stage; the
/// transcoding stage gets the rest.
const EXTRACT_SPAN: f32 = 0.5;

/// Progress as observed by the queue manager: overall fraction plus the
/// resolved title once the probe has run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProgressUpdate {
    pub fraction: f32,
    pub title: Option<String>,
}

/// Behavior knobs shared by all jobs of one queue manager.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub output_dir: PathBuf,
    pub cookies: Option<PathBuf>,
    pub embed_thumbnail: bool,
    pub write_tags: bool,
    /// Case-insensitive substring required in uploader/channel/artist.
    pub artist_filter: Option<String>,
    pub keep_temp: bool,
    /// Root for per-job temp directories; system temp if unset.
    pub temp_root: Option<PathBuf>,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("downloads"),
            cookies: None,
            embed_thumbnail: false,
            write_tags: true,
            artist_filter: None,
            keep_temp: false,
            temp_root: None,
        }
    }
}

/// Cloned Arc dependencies handed to each worker.
#[derive(Clone)]
pub struct WorkerDeps {
    pub extractor: Arc<dyn MediaExtractor>,
    pub transcoder: Arc<dyn Transcoder>,
    pub library: Arc<LibraryStore>,
    /// Cross-run dedup; `None` disables archiving.
    pub archive: Option<Arc<Mutex<DownloadArchive>>>,
    pub settings: PipelineSettings,
}

/// How a job run ended when it did not succeed. `Failed` carries the
/// message recorded on the job; it is always non-empty.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("cancelled")]
    Cancelled,

    #[error("{stage}: {message}")]
    Failed { stage: &'static str, message: String },
}

impl PipelineError {
    fn failed(stage: &'static str, message: impl std::fmt::Display) -> Self {
        Self::Failed {
            stage,
            message: message.to_string(),
        }
    }
}

impl From<ExtractError> for PipelineError {
    fn from(e: ExtractError) -> Self {
        match e {
            ExtractError::Cancelled => PipelineError::Cancelled,
            other => PipelineError::failed("extract", other),
        }
    }
}

impl From<TranscodeError> for PipelineError {
    fn from(e: TranscodeError) -> Self {
        match e {
            TranscodeError::Cancelled => PipelineError::Cancelled,
            other => PipelineError::failed("transcode", other),
        }
    }
}

/// Run one job to completion. Returns the library entry on success.
pub async fn run_job(
    request: &JobRequest,
    deps: &WorkerDeps,
    progress: &watch::Sender<ProgressUpdate>,
    cancel: &CancellationToken,
) -> Result<LibraryEntry, PipelineError> {
    let settings = &deps.settings;

    // 1. Probe metadata (also resolves search expressions).
    let probed = tokio::select! {
        () = cancel.cancelled() => return Err(PipelineError::Cancelled),
        result = deps.extractor.probe(&request.source) => {
            result.map_err(PipelineError::from)?
        }
    };

    let title = probed.title.clone();
    let _ = progress.send(ProgressUpdate {
        fraction: 0.0,
        title: Some(title.clone()),
    });
    debug!("Resolved: {} ({})", title, probed.id);

    // 2. Artist filter gate.
    if let Some(ref needle) = settings.artist_filter {
        if !artist_matches(&probed, needle) {
            return Err(PipelineError::failed(
                "filter",
                format!("skipped: uploader/channel does not include '{}'", needle),
            ));
        }
    }

    // 3. Archive gate.
    if let Some(ref archive) = deps.archive {
        if archive.lock().await.contains(&probed.id) {
            return Err(PipelineError::failed(
                "archive",
                format!("skipped: '{}' already in download archive", probed.id),
            ));
        }
    }

    // 4. Extract into a per-job temp directory.
    let temp_dir = match settings.temp_root {
        Some(ref root) => tempfile::tempdir_in(root),
        None => tempfile::tempdir(),
    }
    .map_err(|e| PipelineError::failed("setup", e))?;
    let temp_path = temp_dir.path().to_path_buf();

    let extract_request = ExtractRequest {
        source: probed
            .webpage_url
            .clone()
            .unwrap_or_else(|| request.source.clone()),
        video_id: probed.id.clone(),
        dest_dir: temp_path.clone(),
        cookies: settings.cookies.clone(),
        want_thumbnail: settings.embed_thumbnail,
    };

    let (stage_tx, stage_rx) = watch::channel(0.0f32);
    let bridge = spawn_bridge(stage_rx, progress.clone(), 0.0, EXTRACT_SPAN, title.clone());

    let extracted = {
        let result = deps
            .extractor
            .extract(&extract_request, &stage_tx, cancel)
            .await;
        drop(stage_tx);
        result?
    };
    let _ = bridge.await;

    // 5. Transcode to the final output path.
    let output_dir = request
        .output_dir
        .clone()
        .unwrap_or_else(|| settings.output_dir.clone());
    let output = output_path(&output_dir, &title, &probed.id, request.format.extension());

    let tags = settings.write_tags.then(|| MediaTags {
        title: title.clone(),
        artist: probed.best_artist().map(String::from),
        date: probed.upload_date.clone(),
        source_id: probed.id.clone(),
    });

    let transcode_request = TranscodeRequest {
        input: extracted.media_path.clone(),
        output: output.clone(),
        format: request.format,
        bitrate: request.bitrate,
        duration_secs: probed.duration,
        tags,
        thumbnail: extracted.thumbnail_path.clone(),
    };

    let (stage_tx, stage_rx) = watch::channel(0.0f32);
    let bridge = spawn_bridge(
        stage_rx,
        progress.clone(),
        EXTRACT_SPAN,
        1.0 - EXTRACT_SPAN,
        title.clone(),
    );

    {
        let result = deps
            .transcoder
            .transcode(&transcode_request, &stage_tx, cancel)
            .await;
        drop(stage_tx);
        result?;
    }
    let _ = bridge.await;

    if settings.keep_temp {
        debug!("Temp files kept at: {}", temp_path.display());
        std::mem::forget(temp_dir);
    }

    // 6. Record the id so reruns skip it.
    if let Some(ref archive) = deps.archive {
        if let Err(e) = archive.lock().await.record(&probed.id).await {
            warn!("Failed to update download archive: {}", e);
        }
    }

    // 7. Hand off to the library store.
    let entry = deps
        .library
        .add(NewEntry {
            path: output,
            title: title.clone(),
            artist: probed.best_artist().map(String::from),
            duration_secs: probed.duration,
            format: request.format.extension().to_string(),
        })
        .await
        .map_err(|e| PipelineError::failed("library", e))?;

    let _ = progress.send(ProgressUpdate {
        fraction: 1.0,
        title: Some(title),
    });

    info!("Job complete: {}", entry.path.display());
    Ok(entry)
}

/// Forward a collaborator's 0..1 stage progress into the job's overall
/// fraction. Ends when the stage sender is dropped.
fn spawn_bridge(
    mut stage_rx: watch::Receiver<f32>,
    overall: watch::Sender<ProgressUpdate>,
    base: f32,
    span: f32,
    title: String,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while stage_rx.changed().await.is_ok() {
            let fraction = base + *stage_rx.borrow() * span;
            let _ = overall.send(ProgressUpdate {
                fraction: fraction.clamp(0.0, 1.0),
                title: Some(title.clone()),
            });
        }
    })
}

/// Match the filter needle against uploader, channel and artist, the way
/// the probe reports them.
fn artist_matches(probed: &ProbedMedia, needle: &str) -> bool {
    let needle = needle.trim().to_lowercase();
    if needle.is_empty() {
        return true;
    }

    [&probed.uploader, &probed.channel, &probed.artist]
        .into_iter()
        .flatten()
        .any(|field| field.to_lowercase().contains(&needle))
}

/// Title-derived output path; falls back to a video-id suffix when the
/// plain name is already taken.
fn output_path(dir: &std::path::Path, title: &str, video_id: &str, ext: &str) -> PathBuf {
    let safe_title = sanitize_filename(title);
    let plain = dir.join(format!("{}.{}", safe_title, ext));
    if !plain.exists() {
        return plain;
    }
    dir.join(format!("{} [{}].{}", safe_title, video_id, ext))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn probed(artist: Option<&str>, uploader: Option<&str>, channel: Option<&str>) -> ProbedMedia {
        ProbedMedia {
            id: "abc123".to_string(),
            title: "Song".to_string(),
            artist: artist.map(String::from),
            uploader: uploader.map(String::from),
            channel: channel.map(String::from),
            duration: Some(180.0),
            upload_date: None,
            webpage_url: None,
        }
    }

    #[test]
    fn test_artist_matches_any_field() {
        let media = probed(Some("Daft Punk"), Some("DaftPunkVEVO"), Some("Vevo"));
        assert!(artist_matches(&media, "daft"));
        assert!(artist_matches(&media, "VEVO"));
        assert!(!artist_matches(&media, "beatles"));
    }

    #[test]
    fn test_artist_matches_missing_fields() {
        let media = probed(None, None, None);
        assert!(!artist_matches(&media, "anyone"));
        // Empty filter matches everything.
        assert!(artist_matches(&media, ""));
        assert!(artist_matches(&media, "  "));
    }

    #[test]
    fn test_output_path_collision() {
        let dir = tempfile::tempdir().unwrap();

        let first = output_path(dir.path(), "My Song", "abc123", "mp3");
        assert_eq!(first, dir.path().join("My Song.mp3"));

        std::fs::write(&first, b"x").unwrap();
        let second = output_path(dir.path(), "My Song", "abc123", "mp3");
        assert_eq!(second, dir.path().join("My Song [abc123].mp3"));
    }

    #[test]
    fn test_failed_error_message_is_nonempty() {
        let e = PipelineError::failed("extract", "boom");
        assert_eq!(e.to_string(), "extract: boom");
    }
}
