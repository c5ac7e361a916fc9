// QuestSage - src/bin/main.rs
//
// Entry point for the full pipeline: resolve every input line, fetch
// metadata for each song, request generated levels, optionally push each
// archive to the headset as it lands, then commit.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use reqwest::Client;
use thiserror::Error;

use quest_sage::batch_runner::{run_batch, DEFAULT_CONCURRENCY};
use quest_sage::level_requester::{JobError, LevelRequester, DEFAULT_OUTPUT_DIR};
use quest_sage::metadata::TrackMetadata;
use quest_sage::metadata_fetcher::MetadataFetcher;
use quest_sage::quest_uploader::{DeviceError, DeviceEndpoint, QuestUploader};
use quest_sage::song_resolver::SongResolver;
use quest_sage::BEATSAGE_BASE_URL;

/// Batch Beatsage level generation and Quest upload.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Newline-delimited file of YouTube/SoundCloud URLs.
    #[arg(short, long, default_value = "urls.txt")]
    urls: PathBuf,

    /// Quest IP address. Falls back to the settings file when omitted.
    #[arg(short, long)]
    quest_ip: Option<String>,

    /// One-line file holding the Quest IP address.
    #[arg(long, default_value = "settings.txt")]
    settings: PathBuf,

    /// Generate archives only; skip the device upload and commit.
    #[arg(long)]
    skip_upload: bool,

    /// Directory the generated archives land in.
    #[arg(long, default_value = DEFAULT_OUTPUT_DIR)]
    levels_dir: PathBuf,

    /// Maximum in-flight operations per batch stage.
    #[arg(short, long, default_value_t = DEFAULT_CONCURRENCY)]
    concurrency: usize,

    /// SoundCloud API client id, needed only for SoundCloud input lines.
    #[arg(long, env = "SOUNDCLOUD_CLIENT_ID")]
    soundcloud_client_id: Option<String>,
}

#[derive(Error, Debug)]
enum PipelineError {
    #[error(transparent)]
    Job(#[from] JobError),
    #[error(transparent)]
    Device(#[from] DeviceError),
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let raw = tokio::fs::read_to_string(&args.urls)
        .await
        .unwrap_or_else(|e| {
            eprintln!("Could not read {}: {e}", args.urls.display());
            std::process::exit(1);
        });
    let lines: Vec<&str> = raw.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
    if lines.is_empty() {
        eprintln!("{} holds no URLs, nothing to do.", args.urls.display());
        std::process::exit(1);
    }

    let uploader = if args.skip_upload {
        None
    } else {
        let address = match &args.quest_ip {
            Some(ip) => ip.clone(),
            None => tokio::fs::read_to_string(&args.settings)
                .await
                .unwrap_or_else(|e| {
                    eprintln!(
                        "Could not read {} (pass --quest-ip instead): {e}",
                        args.settings.display()
                    );
                    std::process::exit(1);
                }),
        };
        let endpoint = DeviceEndpoint::parse(&address).unwrap_or_else(|e| {
            eprintln!("{e}");
            std::process::exit(1);
        });
        Some(endpoint)
    };

    // One HTTP client shared by every concurrent task. Generation jobs are
    // slow, so the per-request timeout is generous.
    let client = Client::builder()
        .timeout(Duration::from_secs(600))
        .build()
        .expect("HTTP client construction cannot fail with these options");

    let mut failed = false;

    // Stage 1: resolve input lines into song URLs.
    println!("[QuestSage] Resolving {} input line(s)", lines.len());
    let resolver = SongResolver::new(
        client.clone(),
        args.soundcloud_client_id.clone().unwrap_or_default(),
    );
    let mut song_urls = Vec::new();
    for line in &lines {
        match resolver.resolve(line).await {
            Ok(urls) => {
                for url in &urls {
                    println!("  {url}");
                }
                song_urls.extend(urls);
            }
            Err(e) => {
                eprintln!("[QuestSage] Could not resolve \"{line}\": {e}");
                failed = true;
            }
        }
    }
    if song_urls.is_empty() {
        eprintln!("[QuestSage] Nothing resolved, giving up.");
        std::process::exit(1);
    }

    // Stage 2: fetch metadata for every song.
    println!("[QuestSage] Fetching metadata for {} song(s)", song_urls.len());
    let fetcher = MetadataFetcher::new(client.clone(), BEATSAGE_BASE_URL.to_string());
    let metadata_results = run_batch(song_urls.clone(), args.concurrency, |_, url| {
        let fetcher = &fetcher;
        async move { fetcher.fetch(&url).await }
    })
    .await;

    let mut songs: Vec<(String, TrackMetadata)> = Vec::new();
    for (url, result) in song_urls.into_iter().zip(metadata_results) {
        match result {
            Ok(metadata) => {
                println!("  {} ({url})", metadata.title);
                songs.push((url, metadata));
            }
            Err(e) => {
                eprintln!("[QuestSage] Metadata fetch failed for {url}: {e}");
                failed = true;
            }
        }
    }

    // Stage 3: request a level per song, uploading each archive as it lands.
    println!("[QuestSage] Requesting {} level(s)", songs.len());
    let requester = LevelRequester::new(client.clone(), BEATSAGE_BASE_URL.to_string())
        .with_output_dir(args.levels_dir.clone());
    let device = uploader.map(|endpoint| QuestUploader::new(client.clone(), endpoint));

    let titles: Vec<String> = songs.iter().map(|(_, m)| m.title.clone()).collect();
    let level_results = run_batch(songs, args.concurrency, |_, (url, metadata)| {
        let requester = &requester;
        let device = device.as_ref();
        async move {
            let archive = requester.request(&url, &metadata).await?;
            if let Some(quest) = device {
                quest.upload(&archive.path).await?;
            }
            Ok::<_, PipelineError>(archive)
        }
    })
    .await;

    let mut landed = 0;
    for (title, result) in titles.into_iter().zip(level_results) {
        match result {
            Ok(archive) => {
                println!("[QuestSage] Done: {} -> {}", archive.title, archive.path.display());
                landed += 1;
            }
            Err(e) => {
                eprintln!("[QuestSage] Level generation failed for \"{title}\": {e}");
                failed = true;
            }
        }
    }

    // Stage 4: apply everything that made it onto the device.
    if let Some(quest) = &device {
        if landed > 0 {
            if let Err(e) = quest.commit().await {
                eprintln!("[QuestSage] Commit failed: {e}");
                failed = true;
            }
        }
    }

    if failed {
        std::process::exit(1);
    }
}
