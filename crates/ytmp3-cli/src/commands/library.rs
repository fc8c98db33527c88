use anyhow::{Context, Result};
use std::path::Path;
use uuid::Uuid;

use crate::args::LibraryAction;
use ytmp3_core::{config::Config, library::LibraryStore};

pub async fn run(action: &LibraryAction, config_path: Option<&Path>) -> Result<()> {
    let config = Config::load(config_path)?;
    let store = LibraryStore::open(config.output.default_directory.join("library.json"))?;

    match action {
        LibraryAction::List { artist, exact } => {
            let entries = match artist {
                Some(needle) => store.find_by_artist(needle, *exact).await,
                None => store.list().await,
            };

            if entries.is_empty() {
                println!("Library is empty");
                return Ok(());
            }

            for entry in &entries {
                println!(
                    "{}  {}  {} - {}  [{}]",
                    entry.id,
                    entry.created_at.format("%Y-%m-%d %H:%M"),
                    entry.artist.as_deref().unwrap_or("Unknown artist"),
                    entry.title,
                    format_duration(entry.duration_secs),
                );
                println!("    {}", entry.path.display());
            }
            println!("\n{} entries", entries.len());
        }

        LibraryAction::Remove { id } => {
            let id: Uuid = id.parse().context("invalid entry id")?;
            let removed = store.remove(&id).await?;
            println!("Removed from library: {}", removed.title);
            println!("The file itself was kept: {}", removed.path.display());
        }
    }

    Ok(())
}

fn format_duration(secs: Option<f64>) -> String {
    match secs {
        Some(secs) if secs >= 0.0 => {
            let total = secs.round() as u64;
            format!("{}:{:02}", total / 60, total % 60)
        }
        _ => "?:??".to_string(),
    }
}
