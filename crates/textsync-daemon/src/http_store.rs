//! Document store backed by the content API over HTTP.

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;
use std::time::Duration;
use textsync_core::store::{DocumentStore, Result, StoreError};
use tracing::debug;

/// Upper bound on a single request, connection included.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Reads and writes the document with plain-text `GET`/`POST` against one URL.
pub struct HttpStore {
    url: String,
    client: reqwest::Client,
}

impl HttpStore {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        Self::with_timeout(url, REQUEST_TIMEOUT)
    }

    pub fn with_timeout(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::limited(10))
            .timeout(timeout)
            .build()
            .map_err(|e| StoreError::Http(e.to_string()))?;

        Ok(Self {
            url: url.into(),
            client,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl DocumentStore for HttpStore {
    async fn read(&self) -> Result<Option<String>> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| StoreError::Http(e.to_string()))?;

        if response.status() == StatusCode::NOT_FOUND {
            debug!("No document at {}", self.url);
            return Ok(None);
        }

        let body = response
            .error_for_status()
            .map_err(|e| StoreError::Read(e.to_string()))?
            .text()
            .await
            .map_err(|e| StoreError::Read(e.to_string()))?;

        Ok(if body.is_empty() { None } else { Some(body) })
    }

    async fn write(&self, content: &str) -> Result<()> {
        self.client
            .post(&self.url)
            .header(CONTENT_TYPE, "text/plain; charset=utf-8")
            .body(content.to_string())
            .send()
            .await
            .map_err(|e| StoreError::Http(e.to_string()))?
            .error_for_status()
            .map_err(|e| StoreError::Write(e.to_string()))?;
        Ok(())
    }
}
