//! Error types for ytmp3-core

use crate::job::JobId;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Ytmp3Error>;

#[derive(Error, Debug)]
pub enum Ytmp3Error {
    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Extraction failed: {0}")]
    Extract(#[from] ExtractError),

    #[error("Transcoding failed: {0}")]
    Transcode(#[from] TranscodeError),

    #[error("Library error: {0}")]
    Library(#[from] LibraryError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors surfaced directly to callers of the queue manager.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("No such job: {0}")]
    NotFound(JobId),
}

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("yt-dlp not found. Install with: brew install yt-dlp")]
    YtDlpNotFound,

    #[error("yt-dlp failed with exit code {code:?}: {stderr}")]
    YtDlpFailed { code: Option<i32>, stderr: String },

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Video unavailable or private: {0}")]
    VideoUnavailable(String),

    #[error("Failed to parse metadata: {0}")]
    MetadataParse(String),

    #[error("No media file produced")]
    NoMediaFile,

    #[error("Extraction cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum TranscodeError {
    #[error("ffmpeg not found. Install with: brew install ffmpeg")]
    FfmpegNotFound,

    #[error("ffmpeg failed with exit code {code:?}: {stderr}")]
    FfmpegFailed { code: Option<i32>, stderr: String },

    #[error("Transcoding cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum LibraryError {
    #[error("No such library entry: {0}")]
    NotFound(String),

    #[error("Library index is corrupt: {0}")]
    Corrupt(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load config: {0}")]
    LoadError(String),

    #[error("Invalid config value: {0}")]
    InvalidValue(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
