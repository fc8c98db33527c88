use anyhow::{bail, Result};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::Mutex;

use crate::args::DownloadOptions;
use ytmp3_core::{
    archive::DownloadArchive,
    config::Config,
    extractor::YtDlpExtractor,
    job::{normalize_bitrate, JobId, JobRequest, JobStatus},
    library::LibraryStore,
    pipeline::{PipelineSettings, WorkerDeps},
    queue::{QueueConfig, QueueEvent, QueueManager},
    transcoder::FfmpegTranscoder,
};

pub async fn run(inputs: &[String], options: &DownloadOptions, config_path: Option<&Path>) -> Result<()> {
    let config = Config::load(config_path)?;

    let output_dir = options
        .output
        .clone()
        .unwrap_or_else(|| config.output.default_directory.clone());
    tokio::fs::create_dir_all(&output_dir).await?;

    // Wire up collaborators and stores
    let extractor = Arc::new(YtDlpExtractor::new(config.yt_dlp_path()?));
    let transcoder = Arc::new(FfmpegTranscoder::new(config.ffmpeg_path()?));
    let library = Arc::new(LibraryStore::open(output_dir.join("library.json"))?);

    let archive = if options.no_archive || !config.archive.enabled {
        None
    } else {
        let archive = DownloadArchive::load(config.archive_path(&output_dir)).await?;
        Some(Arc::new(Mutex::new(archive)))
    };

    let settings = PipelineSettings {
        output_dir: output_dir.clone(),
        cookies: options.cookies.clone().or_else(|| config.paths.cookies.clone()),
        embed_thumbnail: options.embed_thumbnail || config.output.embed_thumbnail,
        write_tags: !options.no_metadata && config.output.write_tags,
        artist_filter: options
            .only_artist
            .clone()
            .or_else(|| config.filter.artist.clone()),
        keep_temp: !config.temp.cleanup,
        temp_root: config.temp.directory.clone(),
    };

    let deps = WorkerDeps {
        extractor,
        transcoder,
        library: library.clone(),
        archive,
        settings,
    };

    let parallel = options.parallel.unwrap_or(config.queue.max_concurrent).max(1);
    let queue = QueueManager::new(
        QueueConfig {
            max_concurrent: parallel,
            cancel_grace: Duration::from_secs(config.queue.cancel_grace_secs),
        },
        deps,
    );

    // Subscribe before submitting so no event is missed
    let mut events = queue.subscribe();
    queue.start();

    let mut submitted: Vec<(JobId, &str)> = Vec::new();
    for input in inputs {
        let mut request = JobRequest::new(input.clone());
        request.format = options.format.into();
        request.bitrate = normalize_bitrate(&options.bitrate);

        match queue.submit(request).await {
            Ok(id) => submitted.push((id, input.as_str())),
            Err(e) => eprintln!("Skipping '{}': {}", input, e),
        }
    }

    if submitted.is_empty() {
        bail!("nothing to convert");
    }

    println!(
        "Converting {} item(s) with {} parallel worker(s)\n",
        submitted.len(),
        parallel
    );

    let multi = MultiProgress::new();
    let style = ProgressStyle::with_template(
        "{spinner:.cyan} [{bar:30.cyan/blue}] {percent:>3}% {msg}",
    )?
    .progress_chars("=>-");

    let mut bars: HashMap<JobId, ProgressBar> = HashMap::new();
    for (id, input) in &submitted {
        let bar = multi.add(ProgressBar::new(100));
        bar.set_style(style.clone());
        bar.set_message(truncate(input, 45));
        bar.enable_steady_tick(Duration::from_millis(100));
        bars.insert(*id, bar);
    }

    // Drive bars from the queue's event stream until every job is terminal
    let mut remaining = submitted.len();
    while remaining > 0 {
        match events.recv().await {
            Ok(QueueEvent::Progress { id, fraction, title }) => {
                if let Some(bar) = bars.get(&id) {
                    bar.set_position((fraction * 100.0) as u64);
                    if let Some(title) = title {
                        bar.set_message(truncate(&title, 45));
                    }
                }
            }
            Ok(QueueEvent::Finished { id, status }) => {
                remaining -= 1;
                if let Some(bar) = bars.get(&id) {
                    match status {
                        JobStatus::Succeeded => {
                            bar.set_position(100);
                            bar.finish();
                        }
                        JobStatus::Failed => bar.abandon_with_message(format!(
                            "Failed: {}",
                            bar.message()
                        )),
                        _ => bar.abandon_with_message(format!("Cancelled: {}", bar.message())),
                    }
                }
            }
            Ok(_) => {}
            Err(RecvError::Lagged(_)) => continue,
            Err(RecvError::Closed) => break,
        }
    }

    // Summary
    let jobs = queue.jobs().await;
    let succeeded = jobs
        .iter()
        .filter(|j| j.status == JobStatus::Succeeded)
        .count();
    let failed: Vec<_> = jobs
        .iter()
        .filter(|j| j.status == JobStatus::Failed)
        .collect();

    println!("\nDone: {} succeeded, {} failed", succeeded, failed.len());
    println!("Output directory: {}", output_dir.display());

    if !failed.is_empty() {
        println!("\nFailures:");
        for job in &failed {
            println!(
                "  {} - {}",
                job.title.as_deref().unwrap_or(&job.request.source),
                job.error.as_deref().unwrap_or("unknown error")
            );
        }
        bail!("{} of {} jobs failed", failed.len(), jobs.len());
    }

    Ok(())
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", cut)
    }
}
