//! FFmpeg collaborator driver
//!
//! One ffmpeg pass per job: encode the raw media to the target format and
//! bitrate, write metadata tags, and optionally embed the thumbnail as
//! cover art. Progress is read from `-progress pipe:1` output against the
//! duration reported by the probe.

use crate::error::TranscodeError;
use crate::job::OutputFormat;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Tags written into the output file.
#[derive(Debug, Clone, Default)]
pub struct MediaTags {
    pub title: String,
    pub artist: Option<String>,
    pub date: Option<String>,
    /// Video id, recorded as a comment tag for provenance.
    pub source_id: String,
}

#[derive(Debug, Clone)]
pub struct TranscodeRequest {
    pub input: PathBuf,
    pub output: PathBuf,
    pub format: OutputFormat,
    /// kbps; ignored for lossless formats.
    pub bitrate: u32,
    /// Duration in seconds, used to turn out_time into a fraction.
    pub duration_secs: Option<f64>,
    pub tags: Option<MediaTags>,
    pub thumbnail: Option<PathBuf>,
}

/// Seam for the transcoding collaborator.
#[async_trait]
pub trait Transcoder: Send + Sync {
    async fn transcode(
        &self,
        request: &TranscodeRequest,
        progress: &watch::Sender<f32>,
        cancel: &CancellationToken,
    ) -> Result<(), TranscodeError>;
}

#[derive(Debug)]
pub struct FfmpegTranscoder {
    ffmpeg_path: PathBuf,
}

impl FfmpegTranscoder {
    pub fn new(ffmpeg_path: PathBuf) -> Self {
        Self { ffmpeg_path }
    }

    fn build_command(&self, request: &TranscodeRequest) -> Command {
        let mut cmd = Command::new(&self.ffmpeg_path);
        cmd.args(["-hide_banner", "-loglevel", "error", "-nostats"]);
        cmd.args(["-progress", "pipe:1"]);
        cmd.arg("-i").arg(&request.input);

        // Thumbnails only embed cleanly into containers with attached_pic
        // support; skip for wav/opus.
        let supports_art = matches!(
            request.format,
            OutputFormat::Mp3 | OutputFormat::Aac | OutputFormat::Flac
        );
        if let Some(thumbnail) = request.thumbnail.as_ref().filter(|_| supports_art) {
            cmd.arg("-i").arg(thumbnail);
            cmd.args(["-map", "0:a", "-map", "1:v"]);
            cmd.args(["-c:v", "mjpeg"]);
            cmd.args(["-disposition:v", "attached_pic"]);
        }

        for arg in codec_args(request.format) {
            cmd.arg(arg);
        }
        if uses_bitrate(request.format) {
            cmd.args(["-b:a", &format!("{}k", request.bitrate)]);
        }

        if let Some(ref tags) = request.tags {
            cmd.args(["-metadata", &format!("title={}", tags.title)]);
            if let Some(ref artist) = tags.artist {
                cmd.args(["-metadata", &format!("artist={}", artist)]);
            }
            if let Some(ref date) = tags.date {
                cmd.args(["-metadata", &format!("date={}", format_upload_date(date))]);
            }
            cmd.args(["-metadata", &format!("comment=YouTube: {}", tags.source_id)]);
        }

        cmd.arg("-y").arg(&request.output);
        cmd
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn transcode(
        &self,
        request: &TranscodeRequest,
        progress: &watch::Sender<f32>,
        cancel: &CancellationToken,
    ) -> Result<(), TranscodeError> {
        info!(
            "Transcoding to {} at {}k: {}",
            request.format,
            request.bitrate,
            request.output.display()
        );

        if let Some(parent) = request.output.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut cmd = self.build_command(request);
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        let mut child = cmd.spawn().map_err(spawn_error)?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| TranscodeError::FfmpegFailed {
                code: None,
                stderr: "no stdout handle".to_string(),
            })?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| TranscodeError::FfmpegFailed {
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
                    return Err(TranscodeError::Cancelled);
                }
                line = lines.next_line() => match line? {
                    Some(line) => {
                        if let Some(fraction) = parse_progress_line(&line, request.duration_secs) {
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
                return Err(TranscodeError::Cancelled);
            }
            status = child.wait() => status?,
        };

        let stderr_text = stderr_task.await.unwrap_or_default();

        if !status.success() {
            debug!("ffmpeg stderr: {}", stderr_text);
            let stderr = stderr_text.trim();
            return Err(TranscodeError::FfmpegFailed {
                code: status.code(),
                stderr: if stderr.is_empty() {
                    "no output on stderr".to_string()
                } else {
                    stderr.to_string()
                },
            });
        }

        let _ = progress.send(1.0);
        debug!("Transcoded to: {}", request.output.display());
        Ok(())
    }
}

fn spawn_error(e: std::io::Error) -> TranscodeError {
    if e.kind() == std::io::ErrorKind::NotFound {
        TranscodeError::FfmpegNotFound
    } else {
        TranscodeError::Io(e)
    }
}

fn codec_args(format: OutputFormat) -> Vec<&'static str> {
    match format {
        OutputFormat::Mp3 => vec!["-c:a", "libmp3lame"],
        OutputFormat::Aac => vec!["-c:a", "aac"],
        OutputFormat::Flac => vec!["-c:a", "flac", "-compression_level", "8"],
        OutputFormat::Wav => vec!["-c:a", "pcm_s16le"],
        OutputFormat::Opus => vec!["-c:a", "libopus"],
    }
}

fn uses_bitrate(format: OutputFormat) -> bool {
    matches!(
        format,
        OutputFormat::Mp3 | OutputFormat::Aac | OutputFormat::Opus
    )
}

/// YouTube dates are YYYYMMDD; tags want YYYY-MM-DD.
fn format_upload_date(date: &str) -> String {
    if date.len() == 8 && date.chars().all(|c| c.is_ascii_digit()) {
        format!("{}-{}-{}", &date[0..4], &date[4..6], &date[6..8])
    } else {
        date.to_string()
    }
}

/// Parse an ffmpeg `-progress pipe:1` key=value line into a fraction of
/// the known duration.
pub fn parse_progress_line(line: &str, duration_secs: Option<f64>) -> Option<f32> {
    let duration = duration_secs.filter(|d| *d > 0.0)?;

    let value = line.trim().strip_prefix("out_time_ms=")?;
    let out_time_us: f64 = value.parse().ok()?;
    // Despite the name, out_time_ms is in microseconds.
    let out_secs = out_time_us / 1_000_000.0;

    Some(((out_secs / duration) as f32).clamp(0.0, 1.0))
}

/// Sanitize a title for use as a filename.
pub fn sanitize_filename(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            _ => c,
        })
        .collect::<String>()
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_progress_line() {
        // 100 seconds into a 200 second track
        assert_eq!(
            parse_progress_line("out_time_ms=100000000", Some(200.0)),
            Some(0.5)
        );
        assert_eq!(parse_progress_line("frame=123", Some(200.0)), None);
        assert_eq!(parse_progress_line("out_time_ms=1000", None), None);
        assert_eq!(parse_progress_line("out_time_ms=junk", Some(200.0)), None);
    }

    #[test]
    fn test_parse_progress_clamps_past_duration() {
        assert_eq!(
            parse_progress_line("out_time_ms=300000000", Some(200.0)),
            Some(1.0)
        );
    }

    #[test]
    fn test_codec_args() {
        assert_eq!(codec_args(OutputFormat::Mp3), vec!["-c:a", "libmp3lame"]);
        assert!(uses_bitrate(OutputFormat::Mp3));
        assert!(uses_bitrate(OutputFormat::Opus));
        assert!(!uses_bitrate(OutputFormat::Flac));
        assert!(!uses_bitrate(OutputFormat::Wav));
    }

    #[test]
    fn test_format_upload_date() {
        assert_eq!(format_upload_date("20240131"), "2024-01-31");
        assert_eq!(format_upload_date("2024-01-31"), "2024-01-31");
        assert_eq!(format_upload_date("unknown"), "unknown");
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("Normal Title"), "Normal Title");
        assert_eq!(
            sanitize_filename("Title/With:Special*Chars"),
            "Title_With_Special_Chars"
        );
        assert_eq!(sanitize_filename("  Spaces  "), "Spaces");
    }
}
