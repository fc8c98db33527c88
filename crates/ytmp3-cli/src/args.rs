use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "ytmp3")]
#[command(author, version, about = "YouTube to MP3 converter with a concurrent download queue")]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// URLs or search text to convert (shorthand for `download <INPUT>...`)
    #[arg(value_name = "INPUT")]
    pub inputs: Vec<String>,

    #[command(flatten)]
    pub options: DownloadOptions,

    /// Verbose output (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file path
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Convert one or more URLs or searches to audio files
    Download {
        /// YouTube URLs or search text (searches use the top result)
        #[arg(value_name = "INPUT", required = true)]
        inputs: Vec<String>,

        #[command(flatten)]
        options: DownloadOptions,
    },

    /// Browse and manage completed conversions
    Library {
        #[command(subcommand)]
        action: LibraryAction,
    },

    /// Check that yt-dlp and ffmpeg are available
    Doctor,

    /// Show configuration
    Config,
}

#[derive(Subcommand)]
pub enum LibraryAction {
    /// List entries in creation order
    List {
        /// Only entries whose artist matches this text (case-insensitive)
        #[arg(short, long)]
        artist: Option<String>,

        /// Require the whole artist name to match, not a substring
        #[arg(long, requires = "artist")]
        exact: bool,
    },

    /// Remove an entry from the library index (the audio file is kept)
    Remove {
        /// Entry id as shown by `library list`
        id: String,
    },
}

#[derive(clap::Args, Clone)]
pub struct DownloadOptions {
    /// Output format
    #[arg(short, long, value_enum, default_value = "mp3")]
    pub format: OutputFormat,

    /// Target bitrate in kbps, e.g. 128, 192, 320 ('k' suffix optional)
    #[arg(short, long, default_value = "192")]
    pub bitrate: String,

    /// Output directory
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Maximum jobs converted at once
    #[arg(short, long)]
    pub parallel: Option<usize>,

    /// Only convert videos whose uploader/channel/artist contains this text
    #[arg(long, value_name = "TEXT")]
    pub only_artist: Option<String>,

    /// Embed the video thumbnail as cover art
    #[arg(long)]
    pub embed_thumbnail: bool,

    /// Do not write title/artist/date tags
    #[arg(long)]
    pub no_metadata: bool,

    /// Cookies file for age-restricted or region-locked videos
    #[arg(long, value_name = "FILE")]
    pub cookies: Option<PathBuf>,

    /// Convert even if the video is already in the download archive
    #[arg(long)]
    pub no_archive: bool,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    /// MP3 - Lossy, widely compatible (default)
    Mp3,
    /// AAC - Lossy, good quality/size ratio
    Aac,
    /// FLAC - Lossless compression
    Flac,
    /// WAV - Uncompressed PCM
    Wav,
    /// Opus - Lossy, best quality/size ratio
    Opus,
}

impl From<OutputFormat> for ytmp3_core::OutputFormat {
    fn from(format: OutputFormat) -> Self {
        match format {
            OutputFormat::Mp3 => ytmp3_core::OutputFormat::Mp3,
            OutputFormat::Aac => ytmp3_core::OutputFormat::Aac,
            OutputFormat::Flac => ytmp3_core::OutputFormat::Flac,
            OutputFormat::Wav => ytmp3_core::OutputFormat::Wav,
            OutputFormat::Opus => ytmp3_core::OutputFormat::Opus,
        }
    }
}
