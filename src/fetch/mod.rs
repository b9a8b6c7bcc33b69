// src/fetch/mod.rs

use anyhow::{Context, Result};
use reqwest::blocking::Client;
use tracing::debug;

use crate::config::SourcesConfig;

pub mod urls;
pub mod zips;

/// Blocking network collaborator: one attempt per call, no retries.
pub trait Fetch {
    fn get_text(&self, url: &str) -> Result<String>;
    fn get_bytes(&self, url: &str) -> Result<Vec<u8>>;
}

/// `reqwest` client with the configured per-call deadline and user agent.
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(sources: &SourcesConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(sources.timeout())
            .user_agent(sources.user_agent.clone())
            .build()
            .context("building HTTP client")?;
        Ok(Self { client })
    }
}

impl Fetch for HttpFetcher {
    fn get_text(&self, url: &str) -> Result<String> {
        debug!("Fetching text from {}", url);
        self.client
            .get(url)
            .send()
            .with_context(|| format!("GET {} failed", url))?
            .error_for_status()
            .with_context(|| format!("Non-success status {}", url))?
            .text()
            .with_context(|| format!("Reading text from {}", url))
    }

    fn get_bytes(&self, url: &str) -> Result<Vec<u8>> {
        debug!("Fetching bytes from {}", url);
        let bytes = self
            .client
            .get(url)
            .send()
            .with_context(|| format!("GET {} failed", url))?
            .error_for_status()
            .with_context(|| format!("Non-success status {}", url))?
            .bytes()
            .with_context(|| format!("Reading body from {}", url))?;
        Ok(bytes.to_vec())
    }
}
