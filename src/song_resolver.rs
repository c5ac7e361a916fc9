// QuestSage - song_resolver.rs

use reqwest::{Client, StatusCode};
use serde::Deserialize;
use thiserror::Error;
use url::Url;

const SOUNDCLOUD_API_BASE: &str = "https://api-v2.soundcloud.com";

#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("Network request failed: {0}")]
    Network(#[from] reqwest::Error),
    #[error("Not a valid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("SoundCloud resolve returned an unsuccessful status code: {0}")]
    Unsuccessful(StatusCode),
    #[error("SoundCloud resolve returned an unrecognized resource kind")]
    UnrecognizedKind,
    #[error("Malformed resolve response: {0}")]
    Json(#[from] serde_json::Error),
}

/// What the SoundCloud resolve endpoint can hand back for a permalink.
#[derive(Deserialize, Debug)]
#[serde(tag = "kind")]
enum Resolved {
    #[serde(rename = "track")]
    Track { permalink_url: String },
    #[serde(rename = "playlist")]
    Playlist { tracks: Vec<PlaylistEntry> },
    #[serde(other)]
    Other,
}

#[derive(Deserialize, Debug)]
struct PlaylistEntry {
    permalink_url: String,
}

/// Turns one line of user input into canonical song URLs.
///
/// YouTube links pass through untouched. Anything else is treated as a
/// SoundCloud permalink and resolved remotely, expanding playlists into their
/// contained tracks.
pub struct SongResolver {
    client: Client,
    api_base: String,
    client_id: String,
}

impl SongResolver {
    pub fn new(client: Client, client_id: String) -> Self {
        Self::with_api_base(client, SOUNDCLOUD_API_BASE.to_string(), client_id)
    }

    pub fn with_api_base(client: Client, api_base: String, client_id: String) -> Self {
        Self {
            client,
            api_base,
            client_id,
        }
    }

    pub async fn resolve(&self, line: &str) -> Result<Vec<String>, ResolveError> {
        let line = line.trim();
        if line.contains("youtube") {
            return Ok(vec![line.to_string()]);
        }
        self.resolve_soundcloud(line).await
    }

    async fn resolve_soundcloud(&self, permalink: &str) -> Result<Vec<String>, ResolveError> {
        // Reject garbage lines locally instead of bouncing them off the API.
        Url::parse(permalink)?;

        let response = self
            .client
            .get(format!("{}/resolve", self.api_base))
            .query(&[("url", permalink), ("client_id", &self.client_id)])
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(ResolveError::Unsuccessful(response.status()));
        }

        let body = response.bytes().await?;
        match serde_json::from_slice(&body)? {
            Resolved::Track { permalink_url } => Ok(vec![permalink_url]),
            Resolved::Playlist { tracks } => Ok(tracks
                .into_iter()
                .map(|track| track.permalink_url)
                .collect()),
            Resolved::Other => Err(ResolveError::UnrecognizedKind),
        }
    }
}
