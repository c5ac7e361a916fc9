// QuestSage - src/bin/upload.rs
//
// Pushes archives that already sit in the levels directory to the headset
// and commits them. Useful after a run with --skip-upload, or when the
// headset was off while levels were generated.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use reqwest::Client;

use quest_sage::batch_runner::{run_batch, DEFAULT_CONCURRENCY};
use quest_sage::level_requester::DEFAULT_OUTPUT_DIR;
use quest_sage::quest_uploader::{DeviceEndpoint, QuestUploader};

/// Upload previously generated level archives to the Quest and commit them.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Quest IP address. Falls back to the settings file when omitted.
    #[arg(short, long)]
    quest_ip: Option<String>,

    /// One-line file holding the Quest IP address.
    #[arg(long, default_value = "settings.txt")]
    settings: PathBuf,

    /// Directory of .zip archives to push.
    #[arg(long, default_value = DEFAULT_OUTPUT_DIR)]
    levels_dir: PathBuf,

    /// Maximum in-flight uploads.
    #[arg(short, long, default_value_t = DEFAULT_CONCURRENCY)]
    concurrency: usize,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

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

    let mut archives: Vec<PathBuf> = Vec::new();
    let mut entries = tokio::fs::read_dir(&args.levels_dir).await.unwrap_or_else(|e| {
        eprintln!("Could not read {}: {e}", args.levels_dir.display());
        std::process::exit(1);
    });
    while let Ok(Some(entry)) = entries.next_entry().await {
        let path = entry.path();
        if path.extension().is_some_and(|ext| ext == "zip") {
            archives.push(path);
        }
    }
    archives.sort();
    if archives.is_empty() {
        eprintln!("No archives in {}, nothing to upload.", args.levels_dir.display());
        std::process::exit(1);
    }
    println!("[QuestSage] Uploading {} archive(s)", archives.len());

    let client = Client::builder()
        .timeout(Duration::from_secs(600))
        .build()
        .expect("HTTP client construction cannot fail with these options");
    let quest = QuestUploader::new(client, endpoint);

    let names: Vec<String> = archives
        .iter()
        .map(|p| p.display().to_string())
        .collect();
    let results = run_batch(archives, args.concurrency, |_, path| {
        let quest = &quest;
        async move { quest.upload(&path).await }
    })
    .await;

    let mut failed = false;
    let mut pushed = 0;
    for (name, result) in names.into_iter().zip(results) {
        match result {
            Ok(()) => pushed += 1,
            Err(e) => {
                eprintln!("[QuestSage] Upload failed for {name}: {e}");
                failed = true;
            }
        }
    }

    if pushed > 0 {
        if let Err(e) = quest.commit().await {
            eprintln!("[QuestSage] Commit failed: {e}");
            failed = true;
        }
    }
    println!("[QuestSage] Pushed {pushed} archive(s)");

    if failed {
        std::process::exit(1);
    }
}
