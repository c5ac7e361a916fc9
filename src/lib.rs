// QuestSage - lib.rs
//
// Batch pipeline: resolve song URLs, fetch their metadata, request generated
// levels, push the archives to a Quest headset and commit them.

pub mod batch_runner;
pub mod level_requester;
pub mod metadata;
pub mod metadata_fetcher;
pub mod quest_uploader;
pub mod song_resolver;
pub mod timing;

/// The generation service all jobs go to.
pub const BEATSAGE_BASE_URL: &str = "https://beatsage.com";
