//! Job model for the download queue

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// Identifier for a queued conversion job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Mp3,
    Aac,
    Flac,
    Wav,
    Opus,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Mp3 => "mp3",
            OutputFormat::Aac => "m4a",
            OutputFormat::Flac => "flac",
            OutputFormat::Wav => "wav",
            OutputFormat::Opus => "opus",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "mp3" => Some(OutputFormat::Mp3),
            "aac" | "m4a" => Some(OutputFormat::Aac),
            "flac" => Some(OutputFormat::Flac),
            "wav" => Some(OutputFormat::Wav),
            "opus" => Some(OutputFormat::Opus),
            _ => None,
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Mp3 => write!(f, "MP3"),
            OutputFormat::Aac => write!(f, "AAC"),
            OutputFormat::Flac => write!(f, "FLAC"),
            OutputFormat::Wav => write!(f, "WAV"),
            OutputFormat::Opus => write!(f, "Opus"),
        }
    }
}

/// A requested conversion: what to fetch and what to produce.
#[derive(Debug, Clone)]
pub struct JobRequest {
    /// URL or yt-dlp search expression.
    pub source: String,
    pub format: OutputFormat,
    /// Target bitrate in kbps (ignored for lossless formats).
    pub bitrate: u32,
    /// Output directory override; falls back to the configured default.
    pub output_dir: Option<PathBuf>,
}

impl JobRequest {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            format: OutputFormat::Mp3,
            bitrate: 192,
            output_dir: None,
        }
    }
}

/// Lifecycle of a job. Transitions only move forward:
/// `Queued -> Running -> {Succeeded | Failed | Cancelled}`, with the one
/// shortcut `Queued -> Cancelled` for jobs cancelled before they start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// Whether moving from `self` to `next` is a legal forward transition.
    pub fn can_transition(&self, next: JobStatus) -> bool {
        match (self, next) {
            (JobStatus::Queued, JobStatus::Running) => true,
            (JobStatus::Queued, JobStatus::Cancelled) => true,
            (JobStatus::Running, s) if s.is_terminal() => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Queued => write!(f, "queued"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Succeeded => write!(f, "succeeded"),
            JobStatus::Failed => write!(f, "failed"),
            JobStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// One tracked conversion task, owned by the queue manager.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: JobId,
    pub request: JobRequest,
    pub status: JobStatus,
    /// 0.0 to 1.0 across both collaborator stages.
    pub progress: f32,
    /// Monotonic submission sequence, defines FIFO order.
    pub position: u64,
    /// Present iff status is `Failed`.
    pub error: Option<String>,
    /// Resolved title, once the probe has run.
    pub title: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Present iff status is terminal.
    pub finished_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(request: JobRequest, position: u64) -> Self {
        Self {
            id: JobId::new(),
            request,
            status: JobStatus::Queued,
            progress: 0.0,
            position,
            error: None,
            title: None,
            created_at: Utc::now(),
            finished_at: None,
        }
    }
}

/// Snapshot returned by `QueueManager::progress`.
#[derive(Debug, Clone, PartialEq)]
pub struct JobProgress {
    pub status: JobStatus,
    pub fraction: f32,
}

/// Turn free text into a yt-dlp input: URLs and explicit search
/// expressions pass through, anything else becomes a top-result search.
pub fn normalize_source(input: &str) -> String {
    let trimmed = input.trim();
    if trimmed.starts_with("http://")
        || trimmed.starts_with("https://")
        || trimmed.starts_with("ytsearch")
    {
        trimmed.to_string()
    } else {
        format!("ytsearch1:{}", trimmed)
    }
}

/// Normalize bitrate input like "192", "192k" or "320K" to kbps.
/// Unparseable input falls back to 192.
pub fn normalize_bitrate(input: &str) -> u32 {
    let cleaned = input.trim().to_lowercase();
    let cleaned = cleaned.strip_suffix('k').unwrap_or(&cleaned);
    cleaned.parse().unwrap_or(192)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_transitions_only() {
        use JobStatus::*;

        assert!(Queued.can_transition(Running));
        assert!(Queued.can_transition(Cancelled));
        assert!(Running.can_transition(Succeeded));
        assert!(Running.can_transition(Failed));
        assert!(Running.can_transition(Cancelled));

        // No backward or sideways moves.
        assert!(!Running.can_transition(Queued));
        assert!(!Succeeded.can_transition(Running));
        assert!(!Failed.can_transition(Succeeded));
        assert!(!Cancelled.can_transition(Queued));
        assert!(!Queued.can_transition(Succeeded));
        assert!(!Queued.can_transition(Failed));
    }

    #[test]
    fn test_terminal_states() {
        assert!(!JobStatus::Queued.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert!(JobStatus::Succeeded.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_normalize_source() {
        assert_eq!(
            normalize_source("https://youtu.be/dQw4w9WgXcQ"),
            "https://youtu.be/dQw4w9WgXcQ"
        );
        assert_eq!(
            normalize_source("ytsearch3:some song"),
            "ytsearch3:some song"
        );
        assert_eq!(normalize_source("never gonna give"), "ytsearch1:never gonna give");
        assert_eq!(normalize_source("  padded title  "), "ytsearch1:padded title");
    }

    #[test]
    fn test_normalize_bitrate() {
        assert_eq!(normalize_bitrate("192"), 192);
        assert_eq!(normalize_bitrate("192k"), 192);
        assert_eq!(normalize_bitrate("320K"), 320);
        assert_eq!(normalize_bitrate(" 128 "), 128);
        assert_eq!(normalize_bitrate("lots"), 192);
        assert_eq!(normalize_bitrate(""), 192);
    }

    #[test]
    fn test_format_round_trip() {
        assert_eq!(OutputFormat::from_str("mp3"), Some(OutputFormat::Mp3));
        assert_eq!(OutputFormat::from_str("M4A"), Some(OutputFormat::Aac));
        assert_eq!(OutputFormat::from_str("ogg"), None);
        assert_eq!(OutputFormat::Mp3.extension(), "mp3");
        assert_eq!(OutputFormat::Aac.extension(), "m4a");
    }
}
