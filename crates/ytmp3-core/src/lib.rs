//! ytmp3-core: download queue manager for YouTube-to-audio conversion
//!
//! Jobs are converted by two external collaborators, yt-dlp and ffmpeg,
//! invoked as subprocesses behind trait seams. Completed outputs land in
//! a JSON-indexed library.

pub mod archive;
pub mod config;
pub mod error;
pub mod extractor;
pub mod job;
pub mod library;
pub mod pipeline;
pub mod queue;
pub mod transcoder;

pub use config::Config;
pub use error::{Result, Ytmp3Error};
pub use job::{Job, JobId, JobRequest, JobStatus, OutputFormat};
pub use library::{LibraryEntry, LibraryStore};
pub use queue::{QueueConfig, QueueEvent, QueueManager};
