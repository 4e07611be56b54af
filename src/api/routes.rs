use super::auth::Credentials;
use super::{ClassListing, Description, MediaService, ServeError, UploadError};
use crate::media::TransformError;
use crate::resolver::{ResolutionSource, Resolution, ResolveError};
use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::{header, HeaderMap, HeaderName, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use tracing::{error, warn};

/// Límite del cuerpo de una subida (vídeos incluidos).
const MAX_UPLOAD_BYTES: usize = 256 * 1024 * 1024;

const MEDIA_SOURCE: HeaderName = HeaderName::from_static("x-media-source");

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<MediaService>,
    pub credentials: Credentials,
    /// `Cache-Control: max-age` for resolved assets, in seconds.
    pub max_age: u64,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/music/artist/{artist}", get(artist_image))
        .route("/music/track/{artist}/{title}", get(track_image))
        .route("/static/{group}", post(upload))
        .route("/static/{group}/{name}", get(static_asset))
        .route("/describe", get(describe))
        .route("/describe/{group}/{name}", get(describe_class))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .with_state(state)
}

/// JSON error body: `{ "success": false, "message": ... }`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!("❌ {} {}", self.status, self.message);
        } else {
            warn!("⚠️ {} {}", self.status, self.message);
        }

        let body = Json(json!({ "success": false, "message": self.message }));
        if self.status == StatusCode::UNAUTHORIZED {
            return (self.status, [(header::WWW_AUTHENTICATE, "Basic realm=\"upload\"")], body).into_response();
        }
        (self.status, body).into_response()
    }
}

impl From<ResolveError> for ApiError {
    fn from(err: ResolveError) -> Self {
        let status = match &err {
            ResolveError::ProviderUnavailable { .. } | ResolveError::Download(_) => StatusCode::BAD_GATEWAY,
            ResolveError::Transform(_) | ResolveError::Storage(_) | ResolveError::Task(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        ApiError::new(status, err.to_string())
    }
}

impl From<ServeError> for ApiError {
    fn from(err: ServeError) -> Self {
        match err {
            ServeError::InvalidClass(_) => ApiError::new(StatusCode::NOT_FOUND, err.to_string()),
            ServeError::Resolve(inner) => inner.into(),
        }
    }
}

impl From<UploadError> for ApiError {
    fn from(err: UploadError) -> Self {
        let status = match &err {
            UploadError::InvalidClass(_)
            | UploadError::MissingResource
            | UploadError::MissingFilename
            | UploadError::MimeMismatch { .. }
            // Un fichero subido que no se puede decodificar es culpa del cliente
            | UploadError::Transform(TransformError::Decode(_)) => StatusCode::BAD_REQUEST,
            UploadError::Transform(_) | UploadError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        ApiError::new(status, err.to_string())
    }
}

fn media_response(resolution: Resolution, max_age: u64) -> Response {
    let (source, cache_control) = match resolution.source {
        ResolutionSource::Hit => ("hit", format!("public, max-age={}", max_age)),
        ResolutionSource::Fetched => ("fetched", format!("public, max-age={}", max_age)),
        // El default nunca se cachea aguas abajo
        ResolutionSource::Default(_) => ("default", "no-cache".to_string()),
    };

    (
        [
            (header::CONTENT_TYPE, resolution.content_type.to_string()),
            (header::CACHE_CONTROL, cache_control),
            (MEDIA_SOURCE, source.to_string()),
        ],
        resolution.bytes,
    )
        .into_response()
}

async fn artist_image(State(state): State<AppState>, Path(artist): Path<String>) -> Result<Response, ApiError> {
    let resolution = state.service.artist_image(&artist).await?;
    Ok(media_response(resolution, state.max_age))
}

async fn track_image(
    State(state): State<AppState>,
    Path((artist, title)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let resolution = state.service.track_image(&artist, &title).await?;
    Ok(media_response(resolution, state.max_age))
}

async fn static_asset(
    State(state): State<AppState>,
    Path((group, name)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let resolution = state.service.static_asset(&group, &name).await?;
    Ok(media_response(resolution, state.max_age))
}

async fn describe(State(state): State<AppState>) -> Json<Description> {
    Json(state.service.describe())
}

async fn describe_class(
    State(state): State<AppState>,
    Path((group, name)): Path<(String, String)>,
) -> Result<Json<ClassListing>, ApiError> {
    Ok(Json(state.service.describe_class(&group, &name).await?))
}

/// `POST /static/{group}`: multipart with a `resource` file and a `filename` field.
async fn upload(
    State(state): State<AppState>,
    Path(group): Path<String>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Response, ApiError> {
    let authorization = headers.get(header::AUTHORIZATION).and_then(|v| v.to_str().ok());
    if !state.credentials.accepts(authorization) {
        return Err(ApiError::new(StatusCode::UNAUTHORIZED, "invalid credentials"));
    }

    let mut filename = None;
    let mut mime_type = None;
    let mut resource = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::new(StatusCode::BAD_REQUEST, e.body_text()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "resource" => {
                mime_type = field.content_type().map(str::to_string);
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::new(StatusCode::BAD_REQUEST, e.body_text()))?;
                resource = Some(bytes.to_vec());
            }
            "filename" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| ApiError::new(StatusCode::BAD_REQUEST, e.body_text()))?;
                filename = Some(text);
            }
            _ => {}
        }
    }

    let receipt = state
        .service
        .upload(&group, filename.as_deref(), mime_type.as_deref(), resource)
        .await?;

    Ok((StatusCode::CREATED, Json(json!({ "success": true, "data": receipt }))).into_response())
}
