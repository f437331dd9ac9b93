//! Feed download over HTTP, behind a trait so tests can substitute canned
//! bytes or failures.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::JobError;

#[async_trait]
pub trait FeedSource: Send + Sync {
    /// Download one feed snapshot. Any transport failure, timeout or non-2xx
    /// status surfaces as [`JobError::FeedUnavailable`].
    async fn fetch(&self, url: &str) -> Result<Bytes, JobError>;
}

pub struct HttpFeedSource {
    client: reqwest::Client,
}

impl HttpFeedSource {
    pub fn new() -> reqwest::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl FeedSource for HttpFeedSource {
    async fn fetch(&self, url: &str) -> Result<Bytes, JobError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| JobError::FeedUnavailable(e.to_string()))?
            .error_for_status()
            .map_err(|e| JobError::FeedUnavailable(e.to_string()))?;

        response
            .bytes()
            .await
            .map_err(|e| JobError::FeedUnavailable(e.to_string()))
    }
}
