// QuestSage - quest_uploader.rs

use std::net::Ipv4Addr;
use std::path::Path;
use std::time::Duration;

use reqwest::multipart::{Form, Part};
use reqwest::{Client, StatusCode};
use thiserror::Error;
use tokio::fs;
use tokio::time::{sleep, Instant};

use crate::timing::PollTiming;

/// The headset's sideload service always listens here.
pub const QUEST_PORT: u16 = 50000;

#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("Not a valid device IPv4 address: {0}")]
    InvalidAddress(String),
    #[error("Network request failed: {0}")]
    Network(#[from] reqwest::Error),
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Device did not become reachable within {waited:?}")]
    Unreachable { waited: Duration },
    #[error("Upload returned an unexpected status code: {0}")]
    Upload(StatusCode),
    #[error("Commit returned an unsuccessful status code: {0}")]
    Commit(StatusCode),
}

/// Local network address of the headset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceEndpoint {
    ip: Ipv4Addr,
    port: u16,
}

impl DeviceEndpoint {
    /// Parses a user-supplied dotted quad.
    pub fn parse(input: &str) -> Result<Self, DeviceError> {
        let ip = input
            .trim()
            .parse::<Ipv4Addr>()
            .map_err(|_| DeviceError::InvalidAddress(input.trim().to_string()))?;
        Ok(Self {
            ip,
            port: QUEST_PORT,
        })
    }

    /// Tests point this at an ephemeral local port.
    pub fn with_port(ip: Ipv4Addr, port: u16) -> Self {
        Self { ip, port }
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}:{}{}", self.ip, self.port, path)
    }

    pub fn probe_url(&self) -> String {
        self.url("/main/upload")
    }

    pub fn upload_url(&self) -> String {
        self.url("/host/beatsaber/upload")
    }

    pub fn commit_url(&self) -> String {
        self.url("/host/beatsaber/commitconfig")
    }
}

/// Uploads generated archives to the headset and applies them.
pub struct QuestUploader {
    client: Client,
    endpoint: DeviceEndpoint,
    timing: PollTiming,
}

impl QuestUploader {
    pub fn new(client: Client, endpoint: DeviceEndpoint) -> Self {
        Self {
            client,
            endpoint,
            timing: PollTiming::probe(),
        }
    }

    pub fn with_timing(mut self, timing: PollTiming) -> Self {
        self.timing = timing;
        self
    }

    /// Probes the device's upload page until a connection succeeds.
    ///
    /// Connection-level failures are expected while the headset is asleep or
    /// off the network and are retried; anything else propagates. Exhausting
    /// the probe budget surfaces `Unreachable`.
    pub async fn wait_until_reachable(&self) -> Result<(), DeviceError> {
        let started = Instant::now();
        let mut attempts = 0;
        loop {
            match self.client.get(self.endpoint.probe_url()).send().await {
                Ok(_) => return Ok(()),
                Err(e) if e.is_connect() || e.is_timeout() => {
                    attempts += 1;
                    if attempts >= self.timing.max_attempts
                        || started.elapsed() >= self.timing.max_wait
                    {
                        return Err(DeviceError::Unreachable {
                            waited: started.elapsed(),
                        });
                    }
                    println!("[Quest] Trying to find the device to upload to");
                    sleep(self.timing.interval).await;
                }
                Err(e) => return Err(DeviceError::Network(e)),
            }
        }
    }

    /// Waits for the device, then uploads one archive. The device answers a
    /// successful upload with 204. No partial-upload resume; a failure means
    /// the whole file goes again.
    pub async fn upload(&self, archive_path: &Path) -> Result<(), DeviceError> {
        self.wait_until_reachable().await?;

        let filename = archive_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "level.zip".to_string());
        let bytes = fs::read(archive_path).await?;
        let form = Form::new().part("file", Part::bytes(bytes).file_name(filename));

        let response = self
            .client
            .post(self.endpoint.upload_url())
            .multipart(form)
            .send()
            .await?;
        if response.status() != StatusCode::NO_CONTENT {
            return Err(DeviceError::Upload(response.status()));
        }
        println!("[Quest] Finished upload of {}", archive_path.display());
        Ok(())
    }

    /// Tells the device to apply everything uploaded so far. One shot, no
    /// retry.
    pub async fn commit(&self) -> Result<(), DeviceError> {
        println!("[Quest] Starting commit");
        let response = self.client.post(self.endpoint.commit_url()).send().await?;
        if !response.status().is_success() {
            return Err(DeviceError::Commit(response.status()));
        }
        Ok(())
    }
}
