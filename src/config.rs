use crate::media::{OutputFormat, TransformSpec};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Where a class lives and how it is populated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClassGroup {
    /// Provider-backed artwork, expired by the pruner.
    Music,
    /// Uploaded assets, never fetched nor pruned.
    Static,
}

impl ClassGroup {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClassGroup::Music => "music",
            ClassGroup::Static => "static",
        }
    }
}

/// A resource class with its immutable transform spec.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceClass {
    pub name: String,
    pub group: ClassGroup,
    pub spec: TransformSpec,
    /// File name under the defaults directory installed as `default.<ext>`.
    pub default_resource: String,
}

impl ResourceClass {
    /// Directory relative to the media root, e.g. `music/artist`.
    pub fn dir(&self) -> PathBuf {
        Path::new(self.group.as_str()).join(&self.name)
    }

    /// Stable identifier used to key in-flight resolutions.
    pub fn id(&self) -> String {
        format!("{}/{}", self.group.as_str(), self.name)
    }

    pub fn mime_type(&self) -> &'static str {
        self.spec.mime_type()
    }

    pub fn is_prunable(&self) -> bool {
        self.group == ClassGroup::Music
    }

    /// Quita la extensión de la clase si viene en la URL (`daft punk.jpg`).
    pub fn strip_extension<'a>(&self, raw: &'a str) -> &'a str {
        let suffix = format!(".{}", self.spec.extension);
        match raw.len().checked_sub(suffix.len()) {
            Some(cut) if raw.is_char_boundary(cut) && raw[cut..].eq_ignore_ascii_case(&suffix) => &raw[..cut],
            _ => raw,
        }
    }
}

/// Serialized shape of one class, as written in `MEDIA_CLASSES_FILE`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClassSettings {
    pub name: String,
    pub mime_type: String,
    pub file_extension: String,
    pub default_resource: String,
    pub quality: f32,
    pub width: u32,
    pub height: u32,
}

impl ClassSettings {
    fn new(name: &str, mime: &str, ext: &str, default: &str, quality: f32, width: u32, height: u32) -> Self {
        Self {
            name: name.to_string(),
            mime_type: mime.to_string(),
            file_extension: ext.to_string(),
            default_resource: default.to_string(),
            quality,
            width,
            height,
        }
    }

    pub fn into_class(self, group: ClassGroup) -> Result<ResourceClass> {
        let format = OutputFormat::from_mime(&self.mime_type)
            .with_context(|| format!("Unsupported MIME type {} for class {}", self.mime_type, self.name))?;

        Ok(ResourceClass {
            name: self.name.trim().to_lowercase(),
            group,
            spec: TransformSpec {
                width: self.width,
                height: self.height,
                quality: self.quality,
                format,
                extension: self.file_extension.trim_start_matches('.').to_lowercase(),
            },
            default_resource: self.default_resource,
        })
    }
}

/// File format of `MEDIA_CLASSES_FILE`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClassTable {
    pub music: ClassSettings,
    #[serde(rename = "static")]
    pub static_groups: Vec<ClassSettings>,
}

impl Default for ClassTable {
    fn default() -> Self {
        Self {
            music: ClassSettings::new("music", "image/jpeg", "jpg", "raw-logo-only.jpg", 75.0, 640, 640),
            static_groups: vec![
                ClassSettings::new("exec", "image/jpeg", "jpg", "raw-logo.jpg", 80.0, 640, 640),
                ClassSettings::new("shows", "image/jpeg", "jpg", "raw-logo-only.jpg", 75.0, 640, 640),
                ClassSettings::new("marketing", "image/jpeg", "jpg", "raw-banner.jpg", 82.0, 1920, 1080),
                ClassSettings::new("icons", "image/png", "png", "raw-icon.png", 100.0, 16, 16),
                ClassSettings::new("video", "video/mp4", "mp4", "raw-timelapse.mp4", 22.0, 1920, 1080),
            ],
        }
    }
}

impl ClassTable {
    /// Expands the table: the music settings yield the `artist` and `track` classes.
    pub fn into_classes(self) -> Result<Vec<ResourceClass>> {
        let mut classes = Vec::with_capacity(self.static_groups.len() + 2);
        for name in ["artist", "track"] {
            let mut music = self.music.clone();
            music.name = name.to_string();
            classes.push(music.into_class(ClassGroup::Music)?);
        }
        for group in self.static_groups {
            classes.push(group.into_class(ClassGroup::Static)?);
        }
        Ok(classes)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Discogs,
    Lastfm,
}

/// When the pruner runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PruneSchedule {
    /// Every day at local midnight.
    Midnight,
    Every(Duration),
}

impl std::str::FromStr for PruneSchedule {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "midnight" | "daily" => Ok(PruneSchedule::Midnight),
            other => Ok(PruneSchedule::Every(
                humantime::parse_duration(other).with_context(|| format!("Invalid PRUNE_SCHEDULE: {}", s))?,
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    // Servidor
    pub port: u16,
    pub cache_max_age: u64, // En segundos

    // Paths
    pub media_root: PathBuf,
    pub defaults_dir: PathBuf,

    // Proveedor
    pub provider: ProviderKind,
    pub discogs_api_key: Option<String>,
    pub lastfm_api_key: Option<String>,
    pub http_timeout: Duration,
    pub max_download_bytes: usize,
    pub rate_limit_threshold: u32,
    pub rate_limit_cooldown: Duration,

    // Subidas
    pub upload_user: String,
    pub upload_password: String,

    // Poda
    pub cache_ttl: Duration,
    pub prune_schedule: PruneSchedule,

    pub ffmpeg_path: PathBuf,
    pub classes: Vec<ResourceClass>,
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let provider = match std::env::var("ARTWORK_PROVIDER")
            .unwrap_or_else(|_| "discogs".to_string())
            .to_lowercase()
            .as_str()
        {
            "discogs" => ProviderKind::Discogs,
            "lastfm" => ProviderKind::Lastfm,
            other => anyhow::bail!("Unknown ARTWORK_PROVIDER: {}", other),
        };

        let classes = match std::env::var("MEDIA_CLASSES_FILE") {
            Ok(path) if !path.trim().is_empty() => {
                let raw = std::fs::read_to_string(&path)
                    .with_context(|| format!("Reading MEDIA_CLASSES_FILE {}", path))?;
                serde_json::from_str::<ClassTable>(&raw)
                    .with_context(|| format!("Parsing MEDIA_CLASSES_FILE {}", path))?
            }
            _ => ClassTable::default(),
        }
        .into_classes()?;

        let config = Self {
            port: std::env::var("PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()?,
            cache_max_age: std::env::var("CACHE_MAX_AGE")
                .unwrap_or_else(|_| "604800".to_string()) // 7 días
                .parse()?,

            media_root: std::env::var("MEDIA_ROOT")
                .unwrap_or_else(|_| "./media".to_string())
                .into(),
            defaults_dir: std::env::var("DEFAULTS_DIR")
                .unwrap_or_else(|_| "./media/defaults".to_string())
                .into(),

            provider,
            discogs_api_key: std::env::var("DISCOGS_API_KEY").ok().filter(|s| !s.trim().is_empty()),
            lastfm_api_key: std::env::var("LASTFM_API_KEY").ok().filter(|s| !s.trim().is_empty()),
            http_timeout: parse_duration_var("HTTP_TIMEOUT", "10s")?,
            max_download_bytes: std::env::var("MAX_DOWNLOAD_BYTES")
                .unwrap_or_else(|_| (64 * 1024 * 1024).to_string())
                .parse()?,
            rate_limit_threshold: std::env::var("RATE_LIMIT_THRESHOLD")
                .unwrap_or_else(|_| "5".to_string())
                .parse()?,
            rate_limit_cooldown: parse_duration_var("RATE_LIMIT_COOLDOWN", "10s")?,

            upload_user: std::env::var("UPLOAD_USER").context("UPLOAD_USER must be set")?,
            upload_password: std::env::var("UPLOAD_PASSWORD").context("UPLOAD_PASSWORD must be set")?,

            cache_ttl: parse_duration_var("CACHE_TTL", "14d")?,
            prune_schedule: std::env::var("PRUNE_SCHEDULE")
                .unwrap_or_else(|_| "midnight".to_string())
                .parse()?,

            ffmpeg_path: std::env::var("FFMPEG_PATH")
                .unwrap_or_else(|_| "ffmpeg".to_string())
                .into(),
            classes,
        };

        // Create directories if they don't exist
        std::fs::create_dir_all(&config.media_root)?;

        config.validate()?;

        Ok(config)
    }

    /// Validates configuration values for correctness.
    ///
    /// # Validation Rules
    ///
    /// - The selected provider must have its API key
    /// - Upload credentials must not be empty
    /// - Class names must be unique, dimensions non-zero, image quality in 1..=100
    /// - TTL, cooldown and download cap must be non-zero
    pub fn validate(&self) -> Result<()> {
        match self.provider {
            ProviderKind::Discogs if self.discogs_api_key.is_none() => {
                anyhow::bail!("DISCOGS_API_KEY must be set when ARTWORK_PROVIDER=discogs")
            }
            ProviderKind::Lastfm if self.lastfm_api_key.is_none() => {
                anyhow::bail!("LASTFM_API_KEY must be set when ARTWORK_PROVIDER=lastfm")
            }
            _ => {}
        }

        if self.upload_user.is_empty() || self.upload_password.is_empty() {
            anyhow::bail!("Upload credentials must not be empty");
        }

        if self.cache_ttl.is_zero() {
            anyhow::bail!("CACHE_TTL must be greater than 0");
        }

        if self.max_download_bytes == 0 {
            anyhow::bail!("MAX_DOWNLOAD_BYTES must be greater than 0");
        }

        if self.rate_limit_cooldown.is_zero() {
            anyhow::bail!("RATE_LIMIT_COOLDOWN must be greater than 0");
        }

        if let PruneSchedule::Every(interval) = self.prune_schedule {
            if interval.is_zero() {
                anyhow::bail!("PRUNE_SCHEDULE interval must be greater than 0");
            }
        }

        let mut seen = std::collections::HashSet::new();
        for class in &self.classes {
            if class.name.is_empty() || class.name.contains(['/', '\\', '.']) {
                anyhow::bail!("Invalid class name: {:?}", class.name);
            }
            if !seen.insert(class.id()) {
                anyhow::bail!("Duplicate class: {}", class.id());
            }
            if class.spec.width == 0 || class.spec.height == 0 {
                anyhow::bail!("Class {} must have non-zero dimensions", class.id());
            }
            if class.spec.kind() == crate::media::MediaKind::Image
                && !(1.0..=100.0).contains(&class.spec.quality)
            {
                anyhow::bail!("Class {} quality must be between 1 and 100, got: {}", class.id(), class.spec.quality);
            }
        }

        Ok(())
    }

    /// Log-safe summary: never prints credentials.
    pub fn summary(&self) -> String {
        format!(
            "Config Summary:\n  \
            Server: port {}, max-age {}s\n  \
            Media: {} (defaults {})\n  \
            Provider: {:?}, timeout {}, rate limit <= {} -> {} cooldown\n  \
            Pruning: TTL {}, schedule {:?}\n  \
            Classes: {}",
            self.port,
            self.cache_max_age,
            self.media_root.display(),
            self.defaults_dir.display(),
            self.provider,
            humantime::format_duration(self.http_timeout),
            self.rate_limit_threshold,
            humantime::format_duration(self.rate_limit_cooldown),
            humantime::format_duration(self.cache_ttl),
            self.prune_schedule,
            self.classes.iter().map(|c| c.id()).collect::<Vec<_>>().join(", ")
        )
    }
}

fn parse_duration_var(var: &str, default: &str) -> Result<Duration> {
    let raw = std::env::var(var).unwrap_or_else(|_| default.to_string());
    humantime::parse_duration(raw.trim()).with_context(|| format!("Invalid {}: {}", var, raw))
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    pub fn music_class(name: &str) -> ResourceClass {
        ClassTable::default()
            .into_classes()
            .unwrap()
            .into_iter()
            .find(|c| c.group == ClassGroup::Music && c.name == name)
            .unwrap()
    }

    pub fn static_class(name: &str) -> ResourceClass {
        ClassTable::default()
            .into_classes()
            .unwrap()
            .into_iter()
            .find(|c| c.group == ClassGroup::Static && c.name == name)
            .unwrap()
    }

    pub fn test_config(media_root: &Path) -> Config {
        Config {
            port: 0,
            cache_max_age: 604800,
            media_root: media_root.to_path_buf(),
            defaults_dir: media_root.join("defaults"),
            provider: ProviderKind::Discogs,
            discogs_api_key: Some("token".to_string()),
            lastfm_api_key: None,
            http_timeout: Duration::from_secs(5),
            max_download_bytes: 64 * 1024 * 1024,
            rate_limit_threshold: 5,
            rate_limit_cooldown: Duration::from_secs(10),
            upload_user: "admin".to_string(),
            upload_password: "secret".to_string(),
            cache_ttl: Duration::from_secs(14 * 24 * 3600),
            prune_schedule: PruneSchedule::Midnight,
            ffmpeg_path: "ffmpeg".into(),
            classes: ClassTable::default().into_classes().unwrap(),
        }
    }
}
