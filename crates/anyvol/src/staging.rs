//! Staging of remote volume sources.
//!
//! Some mount helpers (`squashfuse`) only accept a local file. For their
//! types the source URL is downloaded once at create time and the volume
//! record points at the local copy.

use std::path::Path;

use anyvol_common::{AnyvolError, AnyvolResult};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, Url};
use tokio::io::AsyncWriteExt;

/// Whether `src` names a remote resource that should be staged.
#[must_use]
pub fn is_remote(src: &str) -> bool {
    src.contains("://")
}

/// Downloads a source URL to a local file.
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    /// Fetch `url` into `dest`, replacing its content.
    ///
    /// # Errors
    ///
    /// Returns [`AnyvolError::Download`] if the source can not be fetched.
    async fn fetch(&self, url: &str, dest: &Path) -> AnyvolResult<()>;
}

/// Fetcher for `http`, `https` and `file` URLs.
#[derive(Debug, Clone, Default)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    /// Create a fetcher with a default HTTP client.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    async fn fetch_http(&self, url: Url, dest: &Path) -> AnyvolResult<()> {
        let failed = |message: String| AnyvolError::Download {
            url: url.to_string(),
            message,
        };

        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| failed(e.to_string()))?;

        if !response.status().is_success() {
            return Err(failed(format!("server returned {}", response.status())));
        }

        let mut file = tokio::fs::File::create(dest).await?;
        let mut stream = response.bytes_stream();
        let mut written = 0u64;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| failed(e.to_string()))?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.sync_all().await?;

        tracing::debug!(url = %url, bytes = written, "Downloaded source");
        Ok(())
    }
}

#[async_trait]
impl SourceFetcher for HttpFetcher {
    async fn fetch(&self, url: &str, dest: &Path) -> AnyvolResult<()> {
        let parsed = Url::parse(url).map_err(|e| AnyvolError::Download {
            url: url.to_string(),
            message: e.to_string(),
        })?;

        tracing::info!(url, dest = %dest.display(), "Staging volume source");

        match parsed.scheme() {
            "http" | "https" => self.fetch_http(parsed, dest).await,
            "file" => {
                let source = parsed.to_file_path().map_err(|()| AnyvolError::Download {
                    url: url.to_string(),
                    message: "not a local path".to_string(),
                })?;
                tokio::fs::copy(&source, dest)
                    .await
                    .map_err(|e| AnyvolError::Download {
                        url: url.to_string(),
                        message: e.to_string(),
                    })?;
                Ok(())
            }
            scheme => Err(AnyvolError::Download {
                url: url.to_string(),
                message: format!("unsupported scheme '{scheme}'"),
            }),
        }
    }
}
