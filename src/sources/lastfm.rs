use super::{ArtworkProvider, ArtworkQuery, ProviderError, ProviderReply};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::{debug, error};

const DEFAULT_BASE_URL: &str = "https://ws.audioscrobbler.com/2.0/";

/// Tamaños de imagen de Last.fm, del preferido al último recurso.
const PREFERRED_SIZES: [&str; 4] = ["extralarge", "large", "mega", "medium"];

#[derive(Debug, Deserialize)]
struct Image {
    #[serde(rename = "#text", default)]
    url: String,
    #[serde(default)]
    size: String,
}

#[derive(Debug, Deserialize)]
struct ArtistInfo {
    artist: ArtistBody,
}

#[derive(Debug, Deserialize)]
struct ArtistBody {
    #[serde(default)]
    image: Vec<Image>,
}

#[derive(Debug, Deserialize)]
struct TrackInfo {
    track: TrackBody,
}

#[derive(Debug, Deserialize)]
struct TrackBody {
    #[serde(default)]
    album: Option<AlbumBody>,
}

#[derive(Debug, Deserialize)]
struct AlbumBody {
    #[serde(default)]
    image: Vec<Image>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    error: u32,
    #[serde(default)]
    message: String,
}

/// Last.fm client (`artist.getinfo` / `track.getInfo`).
///
/// Last.fm reports no quota header, so replies never carry one.
pub struct LastfmClient {
    api_key: String,
    base_url: String,
    client: reqwest::Client,
}

impl LastfmClient {
    pub fn new(api_key: String, client: reqwest::Client) -> Self {
        Self {
            api_key,
            base_url: DEFAULT_BASE_URL.to_string(),
            client,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn query_params(query: &ArtworkQuery) -> Vec<(&'static str, String)> {
        match query {
            ArtworkQuery::Artist { artist } => vec![
                ("method", "artist.getinfo".to_string()),
                ("artist", artist.clone()),
            ],
            ArtworkQuery::Release { artist, title } => vec![
                ("method", "track.getInfo".to_string()),
                ("artist", artist.clone()),
                ("track", title.clone()),
            ],
        }
    }

    fn pick_image(images: &[Image]) -> Option<String> {
        PREFERRED_SIZES.iter().find_map(|size| {
            images
                .iter()
                .find(|img| img.size == *size && !img.url.trim().is_empty())
                .map(|img| img.url.clone())
        })
    }

    /// Interpreta el cuerpo JSON. Last.fm devuelve errores con HTTP 200.
    fn parse(query: &ArtworkQuery, body: &str) -> ProviderReply {
        let value: serde_json::Value = match serde_json::from_str(body) {
            Ok(value) => value,
            Err(e) => return ProviderReply::failed(ProviderError::Malformed(e.to_string())),
        };

        if value.get("error").is_some() {
            return match serde_json::from_value::<ApiError>(value) {
                // 29: rate limit exceeded
                Ok(err) if err.error == 29 => ProviderReply::failed(ProviderError::RateLimited),
                // 11/16: servicio caído temporalmente
                Ok(err) if err.error == 11 || err.error == 16 => {
                    ProviderReply::failed(ProviderError::Unavailable(err.message))
                }
                Ok(err) => {
                    debug!("Last.fm sin resultado ({}): {}", err.error, err.message);
                    ProviderReply::no_match()
                }
                Err(e) => ProviderReply::failed(ProviderError::Malformed(e.to_string())),
            };
        }

        let image = match query {
            ArtworkQuery::Artist { .. } => serde_json::from_value::<ArtistInfo>(value)
                .map(|info| Self::pick_image(&info.artist.image)),
            ArtworkQuery::Release { .. } => serde_json::from_value::<TrackInfo>(value)
                .map(|info| info.track.album.and_then(|album| Self::pick_image(&album.image))),
        };

        match image {
            Ok(Some(url)) => ProviderReply::found(url),
            Ok(None) => ProviderReply::no_match(),
            Err(e) => ProviderReply::failed(ProviderError::Malformed(e.to_string())),
        }
    }
}

#[async_trait]
impl ArtworkProvider for LastfmClient {
    async fn search(&self, query: &ArtworkQuery) -> ProviderReply {
        debug!("🔍 Búsqueda Last.fm: {:?}", query);

        let mut params = Self::query_params(query);
        params.push(("api_key", self.api_key.clone()));
        params.push(("format", "json".to_string()));

        let response = match self.client.get(&self.base_url).query(&params).send().await {
            Ok(response) => response,
            Err(e) => {
                error!("❌ Last.fm no disponible: {}", e);
                return ProviderReply::failed(ProviderError::Unavailable(e.to_string()));
            }
        };

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return ProviderReply::failed(ProviderError::RateLimited);
        }
        if status.is_server_error() {
            return ProviderReply::failed(ProviderError::Unavailable(format!("status {}", status)));
        }

        // Last.fm responde 4xx con el mismo cuerpo de error JSON
        match response.text().await {
            Ok(body) => Self::parse(query, &body),
            Err(e) => ProviderReply::failed(ProviderError::Unavailable(e.to_string())),
        }
    }

    fn name(&self) -> &'static str {
        "Last.fm"
    }
}
