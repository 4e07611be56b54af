pub mod discogs;
pub mod lastfm;
pub mod rate_limit;

use async_trait::async_trait;
use futures::StreamExt;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

pub use discogs::DiscogsClient;
pub use lastfm::LastfmClient;
pub use rate_limit::RateLimiter;

/// Límite de tamaño de una descarga remota.
const MAX_DOWNLOAD_BYTES: usize = 64 * 1024 * 1024;

/// What to look for, independent of any provider's query syntax.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtworkQuery {
    /// A profile photo of an artist.
    Artist { artist: String },
    /// Cover art of the release containing a track.
    Release { artist: String, title: String },
}

impl ArtworkQuery {
    pub fn artist(artist: impl Into<String>) -> Self {
        ArtworkQuery::Artist {
            artist: artist.into(),
        }
    }

    pub fn release(artist: impl Into<String>, title: impl Into<String>) -> Self {
        ArtworkQuery::Release {
            artist: artist.into(),
            title: title.into(),
        }
    }
}

/// Best match reported by a provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderResult {
    Found { url: String },
    NoMatch,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    /// Quota exhausted (HTTP 429 or equivalent).
    #[error("provider rate limit reached")]
    RateLimited,

    /// Network failure or 5xx.
    #[error("provider unavailable: {0}")]
    Unavailable(String),

    /// Response did not have the expected shape.
    #[error("malformed provider response: {0}")]
    Malformed(String),
}

/// Outcome of one search plus the quota signal, which is reported on success
/// and on failure alike.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderReply {
    pub outcome: Result<ProviderResult, ProviderError>,
    pub remaining_quota: Option<u32>,
}

impl ProviderReply {
    pub fn found(url: impl Into<String>) -> Self {
        Self {
            outcome: Ok(ProviderResult::Found { url: url.into() }),
            remaining_quota: None,
        }
    }

    pub fn no_match() -> Self {
        Self {
            outcome: Ok(ProviderResult::NoMatch),
            remaining_quota: None,
        }
    }

    pub fn failed(error: ProviderError) -> Self {
        Self {
            outcome: Err(error),
            remaining_quota: None,
        }
    }

    pub fn with_quota(mut self, remaining: Option<u32>) -> Self {
        self.remaining_quota = remaining;
        self
    }
}

/// External artwork search service.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ArtworkProvider: Send + Sync {
    /// Busca la mejor coincidencia; sólo se usa el primer resultado.
    async fn search(&self, query: &ArtworkQuery) -> ProviderReply;

    /// Nombre del proveedor para logs
    fn name(&self) -> &'static str;
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("download of {url} failed: {message}")]
pub struct DownloadError {
    pub url: String,
    pub message: String,
}

/// Raw bytes of a located remote asset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Downloaded {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
}

/// Downloads a remote asset in full.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AssetFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Downloaded, DownloadError>;
}

/// Shared HTTP client builder for providers and downloads.
pub fn http_client(timeout: Duration) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(concat!("open-media/", env!("CARGO_PKG_VERSION")))
        .build()
}

/// [`AssetFetcher`] over reqwest.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    max_bytes: usize,
}

impl HttpFetcher {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            max_bytes: MAX_DOWNLOAD_BYTES,
        }
    }

    /// Overrides the download size cap.
    pub fn with_max_bytes(mut self, max_bytes: usize) -> Self {
        self.max_bytes = max_bytes;
        self
    }
}

#[async_trait]
impl AssetFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<Downloaded, DownloadError> {
        let fail = |message: String| DownloadError {
            url: url.to_string(),
            message,
        };

        let parsed = url::Url::parse(url).map_err(|e| fail(e.to_string()))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(fail(format!("unsupported scheme {}", parsed.scheme())));
        }

        let response = self
            .client
            .get(parsed)
            .send()
            .await
            .map_err(|e| fail(e.to_string()))?;

        if !response.status().is_success() {
            return Err(fail(format!("status {}", response.status())));
        }

        if response
            .content_length()
            .is_some_and(|len| len > self.max_bytes as u64)
        {
            return Err(fail("asset too large".to_string()));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_string());

        // Content-Length puede faltar (chunked): se corta al pasar el límite
        let mut bytes = Vec::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| fail(e.to_string()))?;
            if bytes.len() + chunk.len() > self.max_bytes {
                return Err(fail("asset too large".to_string()));
            }
            bytes.extend_from_slice(&chunk);
        }

        debug!("⬇️ Descargados {} bytes de {}", bytes.len(), url);
        Ok(Downloaded { bytes, content_type })
    }
}
