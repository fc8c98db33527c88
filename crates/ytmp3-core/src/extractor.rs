//! yt-dlp collaborator driver
//!
//! The extractor is invoked as an opaque subprocess: given a source
//! identifier and an output directory it writes a raw media file there,
//! emitting progress lines parsed as percentages. A probe step resolves
//! metadata (and search expressions) without downloading anything.

use crate::error::ExtractError;
use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::OnceLock;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Metadata resolved by the probe step.
#[derive(Debug, Clone, Deserialize)]
pub struct ProbedMedia {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub artist: Option<String>,
    #[serde(default)]
    pub uploader: Option<String>,
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub upload_date: Option<String>,
    #[serde(default)]
    pub webpage_url: Option<String>,
}

impl ProbedMedia {
    /// Best-effort artist: tag first, then uploader, then channel.
    pub fn best_artist(&self) -> Option<&str> {
        self.artist
            .as_deref()
            .or(self.uploader.as_deref())
            .or(self.channel.as_deref())
    }
}

#[derive(Debug, Clone)]
pub struct ExtractRequest {
    /// URL or search expression, already normalized.
    pub source: String,
    /// Video id from the probe; keys the output filename.
    pub video_id: String,
    /// Directory the raw media file is written to.
    pub dest_dir: PathBuf,
    pub cookies: Option<PathBuf>,
    pub want_thumbnail: bool,
}

#[derive(Debug)]
pub struct ExtractedMedia {
    pub media_path: PathBuf,
    pub thumbnail_path: Option<PathBuf>,
}

/// Seam for the extraction collaborator. Production drives yt-dlp; tests
/// substitute in-process fakes.
#[async_trait]
pub trait MediaExtractor: Send + Sync {
    async fn probe(&self, source: &str) -> Result<ProbedMedia, ExtractError>;

    async fn extract(
        &self,
        request: &ExtractRequest,
        progress: &watch::Sender<f32>,
        cancel: &CancellationToken,
    ) -> Result<ExtractedMedia, ExtractError>;
}

#[derive(Debug)]
pub struct YtDlpExtractor {
    yt_dlp_path: PathBuf,
}

impl YtDlpExtractor {
    pub fn new(yt_dlp_path: PathBuf) -> Self {
        Self { yt_dlp_path }
    }

    fn find_media_file(&self, dest_dir: &Path, video_id: &str) -> Result<PathBuf, ExtractError> {
        let extensions = ["opus", "m4a", "webm", "mp3", "ogg", "aac", "mp4", "mkv"];

        for ext in extensions {
            let path = dest_dir.join(format!("{}.{}", video_id, ext));
            if path.exists() {
                debug!("Found media file: {}", path.display());
                return Ok(path);
            }
        }

        Err(ExtractError::NoMediaFile)
    }

    fn find_thumbnail(&self, dest_dir: &Path, video_id: &str) -> Option<PathBuf> {
        for ext in ["jpg", "png", "webp"] {
            let path = dest_dir.join(format!("{}.{}", video_id, ext));
            if path.exists() {
                return Some(path);
            }
        }
        None
    }
}

#[async_trait]
impl MediaExtractor for YtDlpExtractor {
    /// Resolve metadata without downloading.
    /// Uses: yt-dlp --dump-json --no-download
    async fn probe(&self, source: &str) -> Result<ProbedMedia, ExtractError> {
        debug!("Probing source: {}", source);

        let mut cmd = Command::new(&self.yt_dlp_path);
        cmd.args([
            "--dump-json",
            "--no-download",
            "--no-warnings",
            "--no-playlist",
            "--default-search",
            "ytsearch",
        ]);
        cmd.arg(source);

        let output = cmd.output().await.map_err(spawn_error)?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(classify_failure(source, output.status.code(), &stderr));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let line = stdout
            .lines()
            .find(|l| !l.trim().is_empty())
            .ok_or_else(|| ExtractError::MetadataParse("empty probe output".to_string()))?;

        let probed: ProbedMedia =
            serde_json::from_str(line).map_err(|e| ExtractError::MetadataParse(e.to_string()))?;

        debug!("Probed: {} ({})", probed.title, probed.id);
        Ok(probed)
    }

    /// Download the best audio stream into the destination directory.
    async fn extract(
        &self,
        request: &ExtractRequest,
        progress: &watch::Sender<f32>,
        cancel: &CancellationToken,
    ) -> Result<ExtractedMedia, ExtractError> {
        info!("Extracting audio from: {}", request.source);

        let output_template = request.dest_dir.join("%(id)s.%(ext)s");

        let mut cmd = Command::new(&self.yt_dlp_path);
        cmd.args([
            "-f",
            "bestaudio/best",
            "--no-playlist",
            "--no-warnings",
            "--newline",
            "--no-overwrites",
        ]);
        cmd.arg("-o").arg(&output_template);
        if request.want_thumbnail {
            cmd.args(["--write-thumbnail", "--convert-thumbnails", "jpg"]);
        }
        if let Some(ref cookies) = request.cookies {
            cmd.arg("--cookies").arg(cookies);
        }
        cmd.arg(&request.source);

        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        let mut child = cmd.spawn().map_err(spawn_error)?;

        let stdout = child.stdout.take().ok_or(ExtractError::YtDlpFailed {
            code: None,
            stderr: "no stdout handle".to_string(),
        })?;
        let mut stderr = child.stderr.take().ok_or(ExtractError::YtDlpFailed {
            code: None,
            stderr: "no stderr handle".to_string(),
        })?;

        let stderr_task = tokio::spawn(async move {
            let mut buf = String::new();
            let _ = stderr.read_to_string(&mut buf).await;
            buf
        });

        let mut lines = BufReader::new(stdout).lines();
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    let _ = child.start_kill();
                    let _ = child.wait().await;
                    return Err(ExtractError::Cancelled);
                }
                line = lines.next_line() => match line? {
                    Some(line) => {
                        if let Some(fraction) = parse_progress_line(&line) {
                            let _ = progress.send(fraction);
                        }
                    }
                    None => break,
                }
            }
        }

        let status = tokio::select! {
            () = cancel.cancelled() => {
                let _ = child.start_kill();
                let _ = child.wait().await;
                return Err(ExtractError::Cancelled);
            }
            status = child.wait() => status?,
        };

        let stderr_text = stderr_task.await.unwrap_or_default();

        if !status.success() {
            debug!("yt-dlp stderr: {}", stderr_text);
            return Err(classify_failure(
                &request.source,
                status.code(),
                &stderr_text,
            ));
        }

        let media_path = self.find_media_file(&request.dest_dir, &request.video_id)?;
        let thumbnail_path = if request.want_thumbnail {
            self.find_thumbnail(&request.dest_dir, &request.video_id)
        } else {
            None
        };

        let _ = progress.send(1.0);
        Ok(ExtractedMedia {
            media_path,
            thumbnail_path,
        })
    }
}

fn spawn_error(e: std::io::Error) -> ExtractError {
    if e.kind() == std::io::ErrorKind::NotFound {
        ExtractError::YtDlpNotFound
    } else {
        ExtractError::Io(e)
    }
}

fn classify_failure(source: &str, code: Option<i32>, stderr: &str) -> ExtractError {
    if stderr.contains("Video unavailable") || stderr.contains("Private video") {
        return ExtractError::VideoUnavailable(source.to_string());
    }
    if stderr.contains("is not a valid URL") {
        return ExtractError::InvalidUrl(source.to_string());
    }

    ExtractError::YtDlpFailed {
        code,
        stderr: stderr_tail(stderr),
    }
}

/// Last few stderr lines, so job error messages stay readable.
fn stderr_tail(stderr: &str) -> String {
    let lines: Vec<&str> = stderr.lines().filter(|l| !l.trim().is_empty()).collect();
    let tail = lines
        .iter()
        .rev()
        .take(4)
        .rev()
        .copied()
        .collect::<Vec<_>>()
        .join("; ");

    if tail.is_empty() {
        "no output on stderr".to_string()
    } else {
        tail
    }
}

/// Parse a yt-dlp `--newline` progress line like
/// `[download]  42.3% of 4.05MiB at 1.2MiB/s ETA 00:02` into a fraction.
pub fn parse_progress_line(line: &str) -> Option<f32> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"\[download\]\s+([\d.]+)%").unwrap());

    let captures = re.captures(line)?;
    let percent: f32 = captures.get(1)?.as_str().parse().ok()?;
    Some((percent / 100.0).clamp(0.0, 1.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_progress_line() {
        assert_eq!(
            parse_progress_line("[download]  42.3% of 4.05MiB at 1.2MiB/s ETA 00:02"),
            Some(0.423)
        );
        assert_eq!(parse_progress_line("[download] 100% of 4.05MiB"), Some(1.0));
        assert_eq!(parse_progress_line("[download] Destination: x.webm"), None);
        assert_eq!(parse_progress_line("[ExtractAudio] Destination: x.opus"), None);
        assert_eq!(parse_progress_line(""), None);
    }

    #[test]
    fn test_parse_progress_clamps() {
        assert_eq!(parse_progress_line("[download] 150.0% of ~3MiB"), Some(1.0));
    }

    #[test]
    fn test_best_artist_fallback_chain() {
        let mut probed = ProbedMedia {
            id: "abc".to_string(),
            title: "Song".to_string(),
            artist: Some("Tagged".to_string()),
            uploader: Some("Uploader".to_string()),
            channel: Some("Channel".to_string()),
            duration: None,
            upload_date: None,
            webpage_url: None,
        };
        assert_eq!(probed.best_artist(), Some("Tagged"));

        probed.artist = None;
        assert_eq!(probed.best_artist(), Some("Uploader"));

        probed.uploader = None;
        assert_eq!(probed.best_artist(), Some("Channel"));

        probed.channel = None;
        assert_eq!(probed.best_artist(), None);
    }

    #[test]
    fn test_classify_failure() {
        assert!(matches!(
            classify_failure("u", Some(1), "ERROR: Video unavailable"),
            ExtractError::VideoUnavailable(_)
        ));
        assert!(matches!(
            classify_failure("u", Some(1), "ERROR: 'u' is not a valid URL"),
            ExtractError::InvalidUrl(_)
        ));
        match classify_failure("u", Some(1), "ERROR: something else\n") {
            ExtractError::YtDlpFailed { code, stderr } => {
                assert_eq!(code, Some(1));
                assert!(stderr.contains("something else"));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_stderr_tail_never_empty() {
        assert_eq!(stderr_tail(""), "no output on stderr");
        assert_eq!(stderr_tail("\n\n"), "no output on stderr");
        let long = "a\nb\nc\nd\ne\nf";
        assert_eq!(stderr_tail(long), "c; d; e; f");
    }

    #[test]
    fn test_probe_json_shape() {
        let json = r#"{"id":"dQw4w9WgXcQ","title":"Never Gonna Give You Up",
            "uploader":"Rick Astley","duration":212.0,
            "webpage_url":"https://www.youtube.com/watch?v=dQw4w9WgXcQ"}"#;
        let probed: ProbedMedia = serde_json::from_str(json).unwrap();
        assert_eq!(probed.id, "dQw4w9WgXcQ");
        assert_eq!(probed.best_artist(), Some("Rick Astley"));
        assert_eq!(probed.duration, Some(212.0));
    }
}
