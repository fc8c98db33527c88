//! Configuration management for ytmp3

use crate::error::ConfigError;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub paths: PathsConfig,
    pub output: OutputConfig,
    pub queue: QueueSection,
    pub filter: FilterConfig,
    pub archive: ArchiveConfig,
    pub temp: TempConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Path to yt-dlp binary (auto-detected if not set)
    pub yt_dlp: Option<PathBuf>,
    /// Path to FFmpeg binary (auto-detected if not set)
    pub ffmpeg: Option<PathBuf>,
    /// Cookies file for age-restricted or region-locked videos
    pub cookies: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Default output format
    pub default_format: String,
    /// Default output directory
    pub default_directory: PathBuf,
    /// Default bitrate in kbps for lossy formats
    pub bitrate: u32,
    /// Embed the video thumbnail as cover art
    pub embed_thumbnail: bool,
    /// Write title/artist/date tags
    pub write_tags: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueSection {
    /// Maximum jobs running at once
    pub max_concurrent: usize,
    /// Seconds to wait for a cancelled collaborator before force-killing it
    pub cancel_grace_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterConfig {
    /// Only convert videos whose uploader/channel/artist contains this
    /// text (case-insensitive)
    pub artist: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveConfig {
    /// Skip videos already recorded in the download archive
    pub enabled: bool,
    /// Archive file location; defaults to `downloaded.txt` in the output
    /// directory
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TempConfig {
    /// Clean up temp files after processing
    pub cleanup: bool,
    /// Custom temp directory (uses system temp if not set)
    pub directory: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            paths: PathsConfig {
                yt_dlp: None,
                ffmpeg: None,
                cookies: None,
            },
            output: OutputConfig {
                default_format: "mp3".to_string(),
                default_directory: PathBuf::from("downloads"),
                bitrate: 192,
                embed_thumbnail: false,
                write_tags: true,
            },
            queue: QueueSection {
                max_concurrent: 2,
                cancel_grace_secs: 5,
            },
            filter: FilterConfig { artist: None },
            archive: ArchiveConfig {
                enabled: true,
                path: None,
            },
            temp: TempConfig {
                cleanup: true,
                directory: None,
            },
        }
    }
}

impl Config {
    /// Load configuration from file and environment
    pub fn load(config_file: Option<&Path>) -> Result<Self, ConfigError> {
        let mut figment = Figment::new().merge(Serialized::defaults(Config::default()));

        // Load from default config directory
        if let Some(config_dir) = dirs::config_dir() {
            let default_config = config_dir.join("ytmp3/config.toml");
            if default_config.exists() {
                figment = figment.merge(Toml::file(&default_config));
            }
        }

        // Load from specified config file
        if let Some(path) = config_file {
            figment = figment.merge(Toml::file(path));
        }

        // Load from environment
        figment = figment.merge(Env::prefixed("YTMP3_").split("__"));

        let config: Config = figment
            .extract()
            .map_err(|e| ConfigError::LoadError(e.to_string()))?;

        if config.queue.max_concurrent == 0 {
            return Err(ConfigError::InvalidValue(
                "queue.max_concurrent must be at least 1".to_string(),
            ));
        }

        Ok(config)
    }

    /// Get yt-dlp path, auto-detecting if not configured
    pub fn yt_dlp_path(&self) -> Result<PathBuf, ConfigError> {
        if let Some(ref path) = self.paths.yt_dlp {
            Ok(path.clone())
        } else {
            which::which("yt-dlp")
                .map_err(|_| ConfigError::InvalidValue("yt-dlp not found in PATH".to_string()))
        }
    }

    /// Get FFmpeg path, auto-detecting if not configured
    pub fn ffmpeg_path(&self) -> Result<PathBuf, ConfigError> {
        if let Some(ref path) = self.paths.ffmpeg {
            Ok(path.clone())
        } else {
            which::which("ffmpeg")
                .map_err(|_| ConfigError::InvalidValue("ffmpeg not found in PATH".to_string()))
        }
    }

    /// Archive file location for a given output directory
    pub fn archive_path(&self, output_dir: &Path) -> PathBuf {
        self.archive
            .path
            .clone()
            .unwrap_or_else(|| output_dir.join("downloaded.txt"))
    }

    /// Get temp directory
    pub fn temp_dir(&self) -> PathBuf {
        self.temp.directory.clone().unwrap_or_else(std::env::temp_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.queue.max_concurrent, 2);
        assert_eq!(config.output.default_format, "mp3");
        assert_eq!(config.output.bitrate, 192);
        assert!(config.archive.enabled);
        assert!(config.filter.artist.is_none());
    }

    #[test]
    fn test_archive_path_default() {
        let config = Config::default();
        let dir = PathBuf::from("/music");
        assert_eq!(config.archive_path(&dir), PathBuf::from("/music/downloaded.txt"));
    }
}
