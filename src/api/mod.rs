//! # API Module
//!
//! [`MediaService`] is the entry point for every request: it maps a class and
//! raw identifiers onto resolver calls, handles uploads into static groups and
//! describes what is stored. [`routes`] exposes it over HTTP.

pub mod auth;
pub mod routes;

use crate::cache::{key, CacheKey, CacheStore, StoreError};
use crate::config::{ClassGroup, ResourceClass};
use crate::media::{MediaKind, TransformError};
use crate::resolver::{Resolution, ResolveError, Resolver, ResolverStats};
use crate::sources::ArtworkQuery;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum ServeError {
    #[error("unknown resource class {0}")]
    InvalidClass(String),

    #[error(transparent)]
    Resolve(#[from] ResolveError),
}

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("unknown resource class {0}")]
    InvalidClass(String),

    #[error("missing resource")]
    MissingResource,

    #[error("missing filename")]
    MissingFilename,

    #[error("resource is {found}, {class} expects {expected}")]
    MimeMismatch {
        found: String,
        class: String,
        expected: MediaKind,
    },

    #[error(transparent)]
    Transform(#[from] TransformError),

    #[error(transparent)]
    Storage(#[from] StoreError),
}

/// Public view of a class.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassInfo {
    pub group: ClassGroup,
    pub name: String,
    pub path: String,
    pub mime_type: &'static str,
    pub width: u32,
    pub height: u32,
}

impl From<&ResourceClass> for ClassInfo {
    fn from(class: &ResourceClass) -> Self {
        Self {
            group: class.group,
            name: class.name.clone(),
            path: format!("/{}", class.id()),
            mime_type: class.mime_type(),
            width: class.spec.width,
            height: class.spec.height,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RateLimitInfo {
    pub remaining: Option<u32>,
    pub cooldown_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Description {
    pub classes: Vec<ClassInfo>,
    pub stats: ResolverStats,
    pub rate_limit: RateLimitInfo,
}

#[derive(Debug, Clone, Serialize)]
pub struct EntryInfo {
    pub hash: String,
    pub size: u64,
    pub created: DateTime<Utc>,
    pub protected: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClassListing {
    pub class: ClassInfo,
    pub entries: Vec<EntryInfo>,
}

/// Result of a successful upload.
#[derive(Debug, Clone, Serialize)]
pub struct UploadReceipt {
    pub class: String,
    pub name: String,
    pub hash: String,
    pub size: u64,
    pub mime_type: &'static str,
}

pub struct MediaService {
    classes: Vec<ResourceClass>,
    resolver: Arc<Resolver>,
    defaults_dir: PathBuf,
}

impl MediaService {
    pub fn new(classes: Vec<ResourceClass>, resolver: Arc<Resolver>, defaults_dir: impl Into<PathBuf>) -> Self {
        Self {
            classes,
            resolver,
            defaults_dir: defaults_dir.into(),
        }
    }

    pub fn resolver(&self) -> &Arc<Resolver> {
        &self.resolver
    }

    fn store(&self) -> &CacheStore {
        self.resolver.store()
    }

    pub fn class(&self, group: ClassGroup, name: &str) -> Option<&ResourceClass> {
        let name = name.trim().to_lowercase();
        self.classes.iter().find(|c| c.group == group && c.name == name)
    }

    fn music_class(&self, name: &str) -> Result<&ResourceClass, ServeError> {
        self.class(ClassGroup::Music, name)
            .ok_or_else(|| ServeError::InvalidClass(format!("music/{}", name)))
    }

    /// Artist photo. A trailing class extension on the name is ignored.
    pub async fn artist_image(&self, raw_artist: &str) -> Result<Resolution, ServeError> {
        let class = self.music_class("artist")?;
        let key = CacheKey::new(class.strip_extension(raw_artist));
        let plan = [ArtworkQuery::artist(key.normalized())];
        Ok(self.resolver.resolve(class, &key, &plan).await?)
    }

    /// Release cover for a track, falling back to the artist's photo.
    pub async fn track_image(&self, raw_artist: &str, raw_title: &str) -> Result<Resolution, ServeError> {
        let class = self.music_class("track")?;
        let artist = key::normalize(raw_artist);
        let title = key::normalize(class.strip_extension(raw_title));
        let key = CacheKey::composite(&[&artist, &title]);

        let mut plan = Vec::with_capacity(2);
        if !title.is_empty() {
            plan.push(ArtworkQuery::release(artist.clone(), title));
        }
        if !artist.is_empty() {
            plan.push(ArtworkQuery::artist(artist));
        }
        Ok(self.resolver.resolve(class, &key, &plan).await?)
    }

    /// Stored asset of a static group, or the group default.
    pub async fn static_asset(&self, group: &str, raw_name: &str) -> Result<Resolution, ServeError> {
        let class = self
            .class(ClassGroup::Static, group)
            .ok_or_else(|| ServeError::InvalidClass(format!("static/{}", group)))?;
        let key = CacheKey::new(class.strip_extension(raw_name));
        Ok(self.resolver.serve_stored(class, &key).await?)
    }

    /// Transforms and stores an uploaded asset under `hash(normalize(filename))`.
    ///
    /// Nothing is written unless every check and the transform succeed.
    pub async fn upload(
        &self,
        group: &str,
        filename: Option<&str>,
        mime_type: Option<&str>,
        resource: Option<Vec<u8>>,
    ) -> Result<UploadReceipt, UploadError> {
        let class = self
            .class(ClassGroup::Static, group)
            .ok_or_else(|| UploadError::InvalidClass(format!("static/{}", group)))?;

        let resource = resource.filter(|bytes| !bytes.is_empty()).ok_or(UploadError::MissingResource)?;

        let key = CacheKey::new(class.strip_extension(filename.unwrap_or_default()));
        if key.is_empty() {
            return Err(UploadError::MissingFilename);
        }

        let found = mime_type.unwrap_or_default().trim().to_string();
        let expected = class.spec.kind();
        if MediaKind::from_mime(&found) != Some(expected) {
            return Err(UploadError::MimeMismatch {
                found: if found.is_empty() { "unknown".to_string() } else { found },
                class: class.id(),
                expected,
            });
        }

        let transformed = self
            .resolver
            .pipeline()
            .transform(resource, Some(found.as_str()), &class.spec)
            .await?;
        let entry = self.store().write(class, key.hash(), &transformed).await?;

        info!("📤 Subido {} a {}", key, class.id());
        Ok(UploadReceipt {
            class: class.id(),
            name: key.normalized().to_string(),
            hash: key.hash().to_string(),
            size: entry.size,
            mime_type: class.mime_type(),
        })
    }

    pub fn describe(&self) -> Description {
        let limiter = self.resolver.limiter();
        Description {
            classes: self.classes.iter().map(ClassInfo::from).collect(),
            stats: self.resolver.stats(),
            rate_limit: RateLimitInfo {
                remaining: limiter.remaining(),
                cooldown_secs: limiter.cooldown_left().map(|left| left.as_secs()),
            },
        }
    }

    /// Lists what is stored for one class.
    pub async fn describe_class(&self, group: &str, name: &str) -> Result<ClassListing, ServeError> {
        let class = parse_group(group)
            .and_then(|group| self.class(group, name))
            .ok_or_else(|| ServeError::InvalidClass(format!("{}/{}", group, name)))?;

        let entries = self
            .store()
            .list_all(class)
            .await
            .map_err(ResolveError::from)?
            .into_iter()
            .map(|entry| EntryInfo {
                hash: entry.hash,
                size: entry.size,
                created: entry.created.into(),
                protected: entry.protected,
            })
            .collect();

        Ok(ClassListing {
            class: ClassInfo::from(class),
            entries,
        })
    }

    /// Copies each class's bundled default into place if it is missing.
    ///
    /// A missing bundled file is logged, not fatal; requests that fall back to
    /// that default will fail until it exists.
    pub async fn install_defaults(&self) -> Result<usize, StoreError> {
        let mut installed = 0;
        for class in &self.classes {
            self.store().prepare(class).await?;
            if tokio::fs::try_exists(self.store().default_path(class)).await.unwrap_or(false) {
                continue;
            }

            let source = self.defaults_dir.join(&class.default_resource);
            match tokio::fs::read(&source).await {
                Ok(bytes) => {
                    self.store().install_default(class, &bytes).await?;
                    installed += 1;
                }
                Err(e) => warn!("⚠️ Default de {} no disponible en {}: {}", class.id(), source.display(), e),
            }
        }
        Ok(installed)
    }
}

fn parse_group(raw: &str) -> Option<ClassGroup> {
    match raw.trim().to_lowercase().as_str() {
        "music" => Some(ClassGroup::Music),
        "static" => Some(ClassGroup::Static),
        _ => None,
    }
}
