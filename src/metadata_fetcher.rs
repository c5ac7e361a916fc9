// QuestSage - metadata_fetcher.rs

use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde_json::json;
use thiserror::Error;
use tokio::time::sleep;

use crate::metadata::TrackMetadata;

const MAX_ATTEMPTS: u32 = 3;
const RATE_LIMIT_BACKOFF: Duration = Duration::from_secs(60);

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Network request failed: {0}")]
    Network(#[from] reqwest::Error),
    #[error("Malformed metadata response: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Metadata fetch gave up after {attempts} attempts (last status: {last_status:?})")]
    RetriesExhausted {
        attempts: u32,
        last_status: Option<StatusCode>,
    },
}

/// Fetches track metadata from the generation service, backing off on 429.
pub struct MetadataFetcher {
    client: Client,
    base_url: String,
    max_attempts: u32,
    backoff: Duration,
}

impl MetadataFetcher {
    pub fn new(client: Client, base_url: String) -> Self {
        Self {
            client,
            base_url,
            max_attempts: MAX_ATTEMPTS,
            backoff: RATE_LIMIT_BACKOFF,
        }
    }

    /// Override the retry budget. Tests shrink the backoff to milliseconds.
    pub fn with_retry(mut self, max_attempts: u32, backoff: Duration) -> Self {
        self.max_attempts = max_attempts;
        self.backoff = backoff;
        self
    }

    /// POSTs `{"youtube_url": <url>}` to the metadata endpoint.
    ///
    /// 429 means the service is rate limiting us: sleep and try again. Any
    /// other non-200 also consumes an attempt. If no attempt ever yields a
    /// 200 the fetch fails explicitly rather than passing a junk body on.
    pub async fn fetch(&self, song_url: &str) -> Result<TrackMetadata, FetchError> {
        let mut last_status = None;
        for attempt in 1..=self.max_attempts {
            let response = self
                .client
                .post(format!("{}/youtube_metadata", self.base_url))
                .json(&json!({ "youtube_url": song_url }))
                .send()
                .await?;
            let status = response.status();
            last_status = Some(status);

            if status == StatusCode::OK {
                let body = response.bytes().await?;
                return Ok(serde_json::from_slice(&body)?);
            }
            if status == StatusCode::TOO_MANY_REQUESTS && attempt < self.max_attempts {
                println!(
                    "[Beatsage] Rate limited on {song_url}, waiting {:?} before retrying",
                    self.backoff
                );
                sleep(self.backoff).await;
            }
        }
        Err(FetchError::RetriesExhausted {
            attempts: self.max_attempts,
            last_status,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use axum::http::StatusCode as AxumStatus;
    use axum::response::IntoResponse;
    use axum::routing::post;
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

    fn fetcher_for(addr: SocketAddr) -> MetadataFetcher {
        MetadataFetcher::new(Client::new(), format!("http://{addr}"))
            .with_retry(3, Duration::from_millis(5))
    }

    #[tokio::test]
    async fn parses_metadata_on_200() {
        let router = Router::new().route(
            "/youtube_metadata",
            post(|| async {
                Json(serde_json::json!({
                    "title": "Echo",
                    "artist": "Elevation Worship",
                    "extractor": "youtube",
                    "view_count": 1000,
                }))
            }),
        );
        let addr = serve(router).await;

        let metadata = fetcher_for(addr).fetch("https://youtube.com/watch?v=x").await.unwrap();
        assert_eq!(metadata.title, "Echo");
        assert_eq!(metadata.artist.as_deref(), Some("Elevation Worship"));
        assert_eq!(metadata.view_count, Some(1000));
    }

    #[tokio::test]
    async fn recovers_after_rate_limiting() {
        let hits = Arc::new(AtomicU32::new(0));
        let hits_in_route = Arc::clone(&hits);
        let router = Router::new().route(
            "/youtube_metadata",
            post(move || {
                let hits = Arc::clone(&hits_in_route);
                async move {
                    if hits.fetch_add(1, Ordering::SeqCst) < 2 {
                        AxumStatus::TOO_MANY_REQUESTS.into_response()
                    } else {
                        Json(serde_json::json!({"title": "Late Bloomer"})).into_response()
                    }
                }
            }),
        );
        let addr = serve(router).await;

        let metadata = fetcher_for(addr).fetch("url").await.unwrap();
        assert_eq!(metadata.title, "Late Bloomer");
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn stops_after_the_configured_attempt_count() {
        let hits = Arc::new(AtomicU32::new(0));
        let hits_in_route = Arc::clone(&hits);
        let router = Router::new().route(
            "/youtube_metadata",
            post(move || {
                hits_in_route.fetch_add(1, Ordering::SeqCst);
                async { AxumStatus::TOO_MANY_REQUESTS }
            }),
        );
        let addr = serve(router).await;

        let err = fetcher_for(addr).fetch("url").await.unwrap_err();
        match err {
            FetchError::RetriesExhausted {
                attempts,
                last_status,
            } => {
                assert_eq!(attempts, 3);
                assert_eq!(last_status, Some(StatusCode::TOO_MANY_REQUESTS));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn final_non_200_is_not_silently_accepted() {
        let router = Router::new().route(
            "/youtube_metadata",
            post(|| async { AxumStatus::BAD_GATEWAY }),
        );
        let addr = serve(router).await;

        let err = fetcher_for(addr).fetch("url").await.unwrap_err();
        assert!(matches!(err, FetchError::RetriesExhausted { .. }));
    }
}
