// QuestSage - level_requester.rs

use std::path::{Path, PathBuf};
use std::time::Duration;

use indicatif::ProgressBar;
use reqwest::multipart::Form;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::time::{sleep, Instant};

use crate::metadata::{LevelArchive, TrackMetadata};
use crate::timing::PollTiming;

pub const DEFAULT_OUTPUT_DIR: &str = "levels";

/// Generation parameters submitted with every job.
const DIFFICULTIES: &str = "Hard,Expert,ExpertPlus,Normal";
const MODES: &str = "Standard,90Degree,OneSaber";
const EVENTS: &str = "DotBlocks,Obstacles";
const ENVIRONMENT: &str = "DefaultEnvironment";
const SYSTEM_TAG: &str = "v2";

#[derive(Error, Debug)]
pub enum JobError {
    #[error("Network request failed: {0}")]
    Network(#[from] reqwest::Error),
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Malformed service response: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Job creation returned an unsuccessful status code: {0}")]
    Create(StatusCode),
    #[error("Job creation response carried no job id")]
    MissingJobId,
    #[error("Heartbeat returned an unsuccessful status code: {0}")]
    Heartbeat(StatusCode),
    #[error("Job {job_id} still pending after {waited:?}")]
    TimedOut { job_id: String, waited: Duration },
    #[error("Archive download returned an unsuccessful status code: {0}")]
    Download(StatusCode),
}

#[derive(Deserialize)]
struct JobTicket {
    id: Option<String>,
}

#[derive(Deserialize)]
struct Heartbeat {
    status: String,
}

/// Submits one generation job, polls it to completion and streams the
/// resulting archive to disk.
pub struct LevelRequester {
    client: Client,
    base_url: String,
    timing: PollTiming,
    output_dir: PathBuf,
}

impl LevelRequester {
    pub fn new(client: Client, base_url: String) -> Self {
        Self {
            client,
            base_url,
            timing: PollTiming::heartbeat(),
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
        }
    }

    pub fn with_timing(mut self, timing: PollTiming) -> Self {
        self.timing = timing;
        self
    }

    pub fn with_output_dir(mut self, output_dir: PathBuf) -> Self {
        self.output_dir = output_dir;
        self
    }

    /// Runs the whole job lifecycle for one song and returns the archive.
    pub async fn request(
        &self,
        song_url: &str,
        metadata: &TrackMetadata,
    ) -> Result<LevelArchive, JobError> {
        let job_id = self.create_job(song_url, metadata).await?;
        println!("[Beatsage] Job {job_id} pending for \"{}\"", metadata.title);
        self.wait_until_done(&job_id).await?;

        let filename = format!("{}.zip", sanitize_title(&metadata.title));
        let path = self.output_dir.join(filename);
        self.download_archive(&job_id, &path).await?;
        println!("[Beatsage] Level saved at: {}", path.display());

        Ok(LevelArchive {
            title: metadata.title.clone(),
            path,
        })
    }

    async fn create_job(
        &self,
        song_url: &str,
        metadata: &TrackMetadata,
    ) -> Result<String, JobError> {
        let form = Form::new()
            .text("youtube_url", song_url.to_string())
            .text("cover_art", "(binary)")
            .text("audio_metadata_title", metadata.title.clone())
            .text("audio_metadata_artist", metadata.artist_or_empty().to_string())
            .text("difficulties", DIFFICULTIES)
            .text("modes", MODES)
            .text("events", EVENTS)
            .text("environment", ENVIRONMENT)
            .text("system_tag", SYSTEM_TAG);

        let response = self
            .client
            .post(format!("{}/beatsaber_custom_level_create", self.base_url))
            .multipart(form)
            .send()
            .await?;
        if response.status() != StatusCode::OK {
            return Err(JobError::Create(response.status()));
        }

        let body = response.bytes().await?;
        let ticket: JobTicket = serde_json::from_slice(&body)?;
        ticket.id.ok_or(JobError::MissingJobId)
    }

    /// Sleeps, polls the heartbeat, repeats until the job reports done or
    /// the poll budget runs out.
    async fn wait_until_done(&self, job_id: &str) -> Result<(), JobError> {
        let started = Instant::now();
        let mut attempts = 0;
        loop {
            if attempts >= self.timing.max_attempts || started.elapsed() >= self.timing.max_wait {
                return Err(JobError::TimedOut {
                    job_id: job_id.to_string(),
                    waited: started.elapsed(),
                });
            }
            sleep(self.timing.interval).await;
            attempts += 1;

            let response = self
                .client
                .get(format!(
                    "{}/beatsaber_custom_level_heartbeat/{job_id}",
                    self.base_url
                ))
                .send()
                .await?;
            if response.status() != StatusCode::OK {
                return Err(JobError::Heartbeat(response.status()));
            }

            let body = response.bytes().await?;
            let heartbeat: Heartbeat = serde_json::from_slice(&body)?;
            if heartbeat.status.eq_ignore_ascii_case("done") {
                return Ok(());
            }
        }
    }

    /// Streams the archive body to `path` chunk by chunk; the whole file is
    /// never held in memory.
    async fn download_archive(&self, job_id: &str, path: &Path) -> Result<(), JobError> {
        let mut response = self
            .client
            .get(format!(
                "{}/beatsaber_custom_level_download/{job_id}",
                self.base_url
            ))
            .send()
            .await?;
        if response.status() != StatusCode::OK {
            return Err(JobError::Download(response.status()));
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let mut file = fs::File::create(path).await?;

        let pb = match response.content_length() {
            Some(len) => ProgressBar::new(len),
            None => ProgressBar::new_spinner(),
        };
        while let Some(chunk) = response.chunk().await? {
            file.write_all(&chunk).await?;
            pb.inc(chunk.len() as u64);
        }
        pb.finish_and_clear();
        file.flush().await?;
        Ok(())
    }
}

/// Replaces everything that is not ASCII alphanumeric, `-` or `.` with `_`
/// and caps the result at 150 characters. Idempotent.
pub fn sanitize_title(title: &str) -> String {
    let mut sanitized: String = title
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect();
    sanitized.truncate(150);
    sanitized
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use axum::extract::Path as AxumPath;
    use axum::http::StatusCode as AxumStatus;
    use axum::routing::{get, post};
    use axum::{Json, Router};

    use super::*;

    async fn serve(router: Router) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        addr
    }

    fn fast_timing() -> PollTiming {
        PollTiming {
            interval: Duration::from_millis(5),
            max_wait: Duration::from_secs(2),
            max_attempts: 20,
        }
    }

    #[test]
    fn sanitize_replaces_and_truncates() {
        assert_eq!(sanitize_title("Echo (feat. Tauren Wells)"), "Echo__feat._Tauren_Wells_");
        let long = "x".repeat(400);
        assert_eq!(sanitize_title(&long).len(), 150);
    }

    #[test]
    fn sanitize_is_idempotent() {
        let once = sanitize_title("Söng / Title: with? weird* chars");
        assert_eq!(sanitize_title(&once), once);
        let long_once = sanitize_title(&"Spaced Out Name!".repeat(40));
        assert_eq!(sanitize_title(&long_once), long_once);
    }

    /// Happy path: job created, pending on the first heartbeat, done on the
    /// second, archive streamed to disk.
    #[tokio::test]
    async fn full_job_lifecycle_lands_the_archive() {
        let polls = Arc::new(AtomicU32::new(0));
        let polls_in_route = Arc::clone(&polls);
        let router = Router::new()
            .route(
                "/beatsaber_custom_level_create",
                post(|| async { Json(serde_json::json!({"id": "job-42"})) }),
            )
            .route(
                "/beatsaber_custom_level_heartbeat/:id",
                get(move |AxumPath(id): AxumPath<String>| {
                    let polls = Arc::clone(&polls_in_route);
                    async move {
                        assert_eq!(id, "job-42");
                        let status = if polls.fetch_add(1, Ordering::SeqCst) == 0 {
                            "PENDING"
                        } else {
                            "DONE"
                        };
                        Json(serde_json::json!({"status": status}))
                    }
                }),
            )
            .route(
                "/beatsaber_custom_level_download/:id",
                get(|| async { b"PK\x03\x04 not a real zip".to_vec() }),
            );
        let addr = serve(router).await;

        let dir = tempfile::tempdir().unwrap();
        let requester = LevelRequester::new(Client::new(), format!("http://{addr}"))
            .with_timing(fast_timing())
            .with_output_dir(dir.path().to_path_buf());

        let metadata = TrackMetadata {
            title: "My Song".to_string(),
            artist: Some("Somebody".to_string()),
            ..Default::default()
        };
        let archive = requester.request("https://youtube.com/watch?v=x", &metadata).await.unwrap();

        assert_eq!(archive.title, "My Song");
        assert_eq!(archive.path, dir.path().join("My_Song.zip"));
        let bytes = std::fs::read(&archive.path).unwrap();
        assert!(!bytes.is_empty());
        assert_eq!(polls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn exhausted_heartbeat_budget_times_out() {
        let router = Router::new()
            .route(
                "/beatsaber_custom_level_create",
                post(|| async { Json(serde_json::json!({"id": "slow-job"})) }),
            )
            .route(
                "/beatsaber_custom_level_heartbeat/:id",
                get(|| async { Json(serde_json::json!({"status": "pending"})) }),
            );
        let addr = serve(router).await;

        let dir = tempfile::tempdir().unwrap();
        let requester = LevelRequester::new(Client::new(), format!("http://{addr}"))
            .with_timing(PollTiming {
                interval: Duration::from_millis(5),
                max_wait: Duration::from_millis(30),
                max_attempts: 3,
            })
            .with_output_dir(dir.path().to_path_buf());

        let err = requester
            .request("url", &TrackMetadata { title: "Stuck".into(), ..Default::default() })
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::TimedOut { .. }));
    }

    #[tokio::test]
    async fn failed_job_creation_propagates_the_status() {
        let router = Router::new().route(
            "/beatsaber_custom_level_create",
            post(|| async { AxumStatus::INTERNAL_SERVER_ERROR }),
        );
        let addr = serve(router).await;

        let dir = tempfile::tempdir().unwrap();
        let requester = LevelRequester::new(Client::new(), format!("http://{addr}"))
            .with_timing(fast_timing())
            .with_output_dir(dir.path().to_path_buf());

        let err = requester
            .request("url", &TrackMetadata { title: "Nope".into(), ..Default::default() })
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::Create(status) if status == StatusCode::INTERNAL_SERVER_ERROR));
    }

    #[tokio::test]
    async fn job_ticket_without_an_id_is_rejected() {
        let router = Router::new().route(
            "/beatsaber_custom_level_create",
            post(|| async { Json(serde_json::json!({"queue_position": 7})) }),
        );
        let addr = serve(router).await;

        let dir = tempfile::tempdir().unwrap();
        let requester = LevelRequester::new(Client::new(), format!("http://{addr}"))
            .with_timing(fast_timing())
            .with_output_dir(dir.path().to_path_buf());

        let err = requester
            .request("url", &TrackMetadata { title: "No Id".into(), ..Default::default() })
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::MissingJobId));
    }
}
