use anyhow::Result;
use std::path::Path;
use ytmp3_core::config::Config;

pub async fn run(config_path: Option<&Path>) -> Result<()> {
    let config = Config::load(config_path)?;

    println!("ytmp3 configuration\n");

    println!("[paths]");
    if let Some(ref p) = config.paths.yt_dlp {
        println!("  yt_dlp = {:?}", p);
    } else {
        println!("  yt_dlp = (auto-detect)");
    }
    if let Some(ref p) = config.paths.ffmpeg {
        println!("  ffmpeg = {:?}", p);
    } else {
        println!("  ffmpeg = (auto-detect)");
    }
    if let Some(ref p) = config.paths.cookies {
        println!("  cookies = {:?}", p);
    } else {
        println!("  cookies = (none)");
    }

    println!("\n[output]");
    println!("  default_format = {:?}", config.output.default_format);
    println!("  default_directory = {:?}", config.output.default_directory);
    println!("  bitrate = {}", config.output.bitrate);
    println!("  embed_thumbnail = {}", config.output.embed_thumbnail);
    println!("  write_tags = {}", config.output.write_tags);

    println!("\n[queue]");
    println!("  max_concurrent = {}", config.queue.max_concurrent);
    println!("  cancel_grace_secs = {}", config.queue.cancel_grace_secs);

    println!("\n[filter]");
    if let Some(ref artist) = config.filter.artist {
        println!("  artist = {:?}", artist);
    } else {
        println!("  artist = (none)");
    }

    println!("\n[archive]");
    println!("  enabled = {}", config.archive.enabled);
    if let Some(ref p) = config.archive.path {
        println!("  path = {:?}", p);
    } else {
        println!("  path = (downloaded.txt in the output directory)");
    }

    println!("\n[temp]");
    println!("  cleanup = {}", config.temp.cleanup);
    if let Some(ref d) = config.temp.directory {
        println!("  directory = {:?}", d);
    } else {
        println!("  directory = (system temp)");
    }

    // Show config file locations
    println!("\nConfig file locations (in priority order):");
    if let Some(p) = config_path {
        println!("  1. {} (specified)", p.display());
    }
    if let Some(config_dir) = dirs::config_dir() {
        println!("  2. {}/ytmp3/config.toml", config_dir.display());
    }
    println!("  3. Environment variables (YTMP3_*)");

    Ok(())
}
