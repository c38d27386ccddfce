//! Archive retrieval.
//!
//! The pipeline only needs "URL in, bytes out"; [`Fetcher`] is that seam and
//! [`HttpFetcher`] the reqwest-backed implementation.

use async_trait::async_trait;
use rtmerge_schema::RuntimeId;
use thiserror::Error;

use crate::Reporter;

#[derive(Error, Debug)]
pub enum FetchError {
    #[cfg(feature = "network")]
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("No archive available at {0}")]
    NotFound(String),
}

/// Retrieves one package archive fully into memory.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(
        &self,
        url: &str,
        runtime: &RuntimeId,
        reporter: &dyn Reporter,
    ) -> Result<Vec<u8>, FetchError>;
}

/// Downloads archives over HTTP(S), streaming the body into a buffer.
#[cfg(feature = "network")]
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

#[cfg(feature = "network")]
impl HttpFetcher {
    /// Build a client that identifies itself with [`crate::USER_AGENT`].
    pub fn new() -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .user_agent(crate::USER_AGENT)
            .build()?;
        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[cfg(feature = "network")]
#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(
        &self,
        url: &str,
        runtime: &RuntimeId,
        reporter: &dyn Reporter,
    ) -> Result<Vec<u8>, FetchError> {
        use futures::StreamExt;

        tracing::debug!("{runtime}: GET {url}");
        let response = self.client.get(url).send().await?.error_for_status()?;

        let total_size = response.content_length();
        let mut buffer = Vec::with_capacity(
            total_size
                .and_then(|n| usize::try_from(n).ok())
                .unwrap_or(0),
        );
        reporter.downloading(runtime, 0, total_size);

        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            buffer.extend_from_slice(&chunk);
            reporter.downloading(runtime, buffer.len() as u64, total_size);
        }

        reporter.fetched(runtime, buffer.len() as u64);
        Ok(buffer)
    }
}
