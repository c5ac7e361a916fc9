// QuestSage - metadata.rs

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Track metadata as returned by the generation service's metadata endpoint.
/// Only the title is guaranteed; everything else depends on the platform the
/// track came from.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct TrackMetadata {
    pub title: String,
    #[serde(default)]
    pub artist: Option<String>,
    #[serde(default)]
    pub uploader: Option<String>,
    /// Platform identifier, e.g. "youtube" or "soundcloud".
    #[serde(default)]
    pub extractor: Option<String>,
    #[serde(default)]
    pub view_count: Option<u64>,
    #[serde(default)]
    pub like_count: Option<u64>,
}

impl TrackMetadata {
    /// Artist string for job submission. The service tolerates an empty
    /// artist field, so absent metadata degrades to that.
    pub fn artist_or_empty(&self) -> &str {
        self.artist.as_deref().unwrap_or("")
    }
}

/// A generated level archive sitting on local disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LevelArchive {
    pub title: String,
    pub path: PathBuf,
}
