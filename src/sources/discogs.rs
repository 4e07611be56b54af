use super::{ArtworkProvider, ArtworkQuery, ProviderError, ProviderReply};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::{debug, error};

const DEFAULT_BASE_URL: &str = "https://api.discogs.com";
const QUOTA_HEADER: &str = "x-discogs-ratelimit-remaining";

#[derive(Debug, Deserialize)]
struct SearchResponse {
    results: Vec<SearchResult>,
}

#[derive(Debug, Deserialize)]
struct SearchResult {
    #[serde(default)]
    cover_image: Option<String>,
}

/// Discogs "database search" client.
pub struct DiscogsClient {
    token: String,
    base_url: String,
    client: reqwest::Client,
}

impl DiscogsClient {
    pub fn new(token: String, client: reqwest::Client) -> Self {
        Self {
            token,
            base_url: DEFAULT_BASE_URL.to_string(),
            client,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn query_params(query: &ArtworkQuery) -> Vec<(&'static str, String)> {
        match query {
            ArtworkQuery::Artist { artist } => vec![("q", artist.clone()), ("type", "artist".to_string())],
            ArtworkQuery::Release { artist, title } => vec![
                ("q", title.clone()),
                ("artist", artist.clone()),
                ("type", "release".to_string()),
            ],
        }
    }

    /// Discogs sirve un GIF "spacer" roto cuando no hay portada; sólo aceptamos JPEG.
    fn pick_cover(response: SearchResponse) -> Option<String> {
        let url = response.results.into_iter().next()?.cover_image?;
        let path = url.split(['?', '#']).next().unwrap_or_default().to_ascii_lowercase();
        if path.ends_with(".jpg") || path.ends_with(".jpeg") {
            Some(url)
        } else {
            None
        }
    }
}

#[async_trait]
impl ArtworkProvider for DiscogsClient {
    async fn search(&self, query: &ArtworkQuery) -> ProviderReply {
        debug!("🔍 Búsqueda Discogs: {:?}", query);

        let mut params = Self::query_params(query);
        params.push(("per_page", "1".to_string()));
        params.push(("token", self.token.clone()));

        let response = match self
            .client
            .get(format!("{}/database/search", self.base_url))
            .query(&params)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                error!("❌ Discogs no disponible: {}", e);
                return ProviderReply::failed(ProviderError::Unavailable(e.to_string()));
            }
        };

        let quota = response
            .headers()
            .get(QUOTA_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u32>().ok());

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return ProviderReply::failed(ProviderError::RateLimited).with_quota(quota);
        }
        if status == StatusCode::NOT_FOUND {
            return ProviderReply::no_match().with_quota(quota);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!("❌ Discogs API error: {} - {}", status, body);
            return ProviderReply::failed(ProviderError::Unavailable(format!("status {}", status)))
                .with_quota(quota);
        }

        match response.json::<SearchResponse>().await {
            Ok(parsed) => match Self::pick_cover(parsed) {
                Some(url) => ProviderReply::found(url),
                None => ProviderReply::no_match(),
            }
            .with_quota(quota),
            Err(e) => ProviderReply::failed(ProviderError::Malformed(e.to_string())).with_quota(quota),
        }
    }

    fn name(&self) -> &'static str {
        "Discogs"
    }
}
