//! # Media Module
//!
//! Transform pipeline applied to every asset before it is persisted.
//!
//! Images are cover-resized to the class dimensions and re-encoded at the
//! class quality; videos are re-encoded by `ffmpeg`, bounded by the class
//! dimensions. Errors are always returned to the caller, the pipeline never
//! substitutes a default on its own.

pub mod raster;
pub mod video;

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tracing::debug;

/// Coarse MIME class (`image/*` vs `video/*`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
}

impl MediaKind {
    /// Top-level type of a MIME string, e.g. `image` for `image/jpeg`.
    pub fn from_mime(mime: &str) -> Option<Self> {
        let top = mime.split('/').next()?.trim().to_ascii_lowercase();
        match top.as_str() {
            "image" => Some(MediaKind::Image),
            "video" => Some(MediaKind::Video),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Image => "image",
            MediaKind::Video => "video",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Formats the pipeline can write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Jpeg,
    Png,
    Mp4,
}

impl OutputFormat {
    pub fn from_mime(mime: &str) -> Option<Self> {
        match mime.trim().to_ascii_lowercase().as_str() {
            "image/jpeg" | "image/jpg" => Some(OutputFormat::Jpeg),
            "image/png" => Some(OutputFormat::Png),
            "video/mp4" => Some(OutputFormat::Mp4),
            _ => None,
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            OutputFormat::Jpeg => "image/jpeg",
            OutputFormat::Png => "image/png",
            OutputFormat::Mp4 => "video/mp4",
        }
    }

    pub fn kind(&self) -> MediaKind {
        match self {
            OutputFormat::Jpeg | OutputFormat::Png => MediaKind::Image,
            OutputFormat::Mp4 => MediaKind::Video,
        }
    }
}

/// Per-class output configuration. Built once from [`crate::config`].
#[derive(Debug, Clone, PartialEq)]
pub struct TransformSpec {
    pub width: u32,
    pub height: u32,
    /// 1-100 for images; CRF for video.
    pub quality: f32,
    pub format: OutputFormat,
    pub extension: String,
}

impl TransformSpec {
    pub fn mime_type(&self) -> &'static str {
        self.format.mime_type()
    }

    pub fn kind(&self) -> MediaKind {
        self.format.kind()
    }
}

#[derive(Debug, Clone, Error)]
pub enum TransformError {
    #[error("could not decode source image: {0}")]
    Decode(String),

    #[error("could not encode {format:?} output: {message}")]
    Encode { format: OutputFormat, message: String },

    #[error("source is {source_kind}, class expects {expected}")]
    KindMismatch { source_kind: MediaKind, expected: MediaKind },

    #[error("ffmpeg failed: {0}")]
    Ffmpeg(String),

    #[error("transform task failed: {0}")]
    Task(String),
}

/// Runs the class-specific transform for a downloaded or uploaded asset.
#[derive(Debug, Clone)]
pub struct TransformPipeline {
    ffmpeg: video::Ffmpeg,
}

impl TransformPipeline {
    pub fn new(ffmpeg: video::Ffmpeg) -> Self {
        Self { ffmpeg }
    }

    /// Produces the bytes to persist for `spec`.
    ///
    /// `source_hint` is the MIME type or extension reported by whoever supplied
    /// the bytes. It is only used to reject obvious kind mismatches; images are
    /// decoded by content sniffing.
    pub async fn transform(
        &self,
        raw: Vec<u8>,
        source_hint: Option<&str>,
        spec: &TransformSpec,
    ) -> Result<Vec<u8>, TransformError> {
        if let Some(source_kind) = source_hint.and_then(MediaKind::from_mime) {
            if source_kind != spec.kind() {
                return Err(TransformError::KindMismatch {
                    source_kind,
                    expected: spec.kind(),
                });
            }
        }

        debug!(
            "🎨 Transformando {} bytes a {}x{} {:?}",
            raw.len(),
            spec.width,
            spec.height,
            spec.format
        );

        match spec.kind() {
            MediaKind::Image => {
                let spec = spec.clone();
                tokio::task::spawn_blocking(move || raster::cover_and_encode(&raw, &spec))
                    .await
                    .map_err(|e| TransformError::Task(e.to_string()))?
            }
            MediaKind::Video => self.ffmpeg.transcode(&raw, spec).await,
        }
    }
}

impl Default for TransformPipeline {
    fn default() -> Self {
        Self::new(video::Ffmpeg::default())
    }
}
