use crate::config::ResourceClass;
use bytes::Bytes;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use thiserror::Error;
use tracing::{debug, info};

/// Nombre reservado del recurso por defecto dentro de cada clase.
pub const DEFAULT_STEM: &str = "default";

#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("no cached entry at {}", path.display())]
    NotFound { path: PathBuf },

    #[error("invalid cache key {0:?}")]
    InvalidKey(String),

    #[error("storage error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: Arc<io::Error>,
    },
}

impl StoreError {
    fn io(path: &Path, err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::NotFound {
            StoreError::NotFound {
                path: path.to_path_buf(),
            }
        } else {
            StoreError::Io {
                path: path.to_path_buf(),
                source: Arc::new(err),
            }
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

/// One stored asset.
///
/// `created` is the time the file was written. Entries are never rewritten in
/// place, so this is also the time of the last successful repopulation.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub hash: String,
    pub path: PathBuf,
    pub created: SystemTime,
    pub extension: String,
    pub size: u64,
    pub protected: bool,
}

impl CacheEntry {
    /// Age relative to `now`; zero if the clock went backwards.
    pub fn age_at(&self, now: SystemTime) -> Duration {
        now.duration_since(self.created).unwrap_or_default()
    }

    fn from_metadata(path: PathBuf, meta: &std::fs::Metadata) -> Option<Self> {
        let stem = path.file_stem()?.to_str()?.to_string();
        let extension = path.extension()?.to_str()?.to_string();
        let created = meta.created().or_else(|_| meta.modified()).ok()?;

        Some(Self {
            protected: stem == DEFAULT_STEM,
            hash: stem,
            path,
            created,
            extension,
            size: meta.len(),
        })
    }
}

/// Filesystem store: `<root>/<class dir>/<hash>.<ext>`.
#[derive(Debug, Clone)]
pub struct CacheStore {
    root: PathBuf,
}

impl CacheStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn class_dir(&self, class: &ResourceClass) -> PathBuf {
        self.root.join(class.dir())
    }

    /// Path for `hash`. Only hex digests and the reserved default name are accepted.
    pub fn path_for(&self, class: &ResourceClass, hash: &str) -> Result<PathBuf, StoreError> {
        if !is_valid_hash(hash) {
            return Err(StoreError::InvalidKey(hash.to_string()));
        }
        Ok(self
            .class_dir(class)
            .join(format!("{}.{}", hash, class.spec.extension)))
    }

    pub fn default_path(&self, class: &ResourceClass) -> PathBuf {
        self.class_dir(class)
            .join(format!("{}.{}", DEFAULT_STEM, class.spec.extension))
    }

    /// Crea el directorio de la clase si no existe.
    pub async fn prepare(&self, class: &ResourceClass) -> Result<(), StoreError> {
        let dir = self.class_dir(class);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| StoreError::io(&dir, e))
    }

    pub async fn exists(&self, class: &ResourceClass, hash: &str) -> bool {
        match self.path_for(class, hash) {
            Ok(path) => tokio::fs::try_exists(&path).await.unwrap_or(false),
            Err(_) => false,
        }
    }

    pub async fn entry(&self, class: &ResourceClass, hash: &str) -> Result<CacheEntry, StoreError> {
        let path = self.path_for(class, hash)?;
        Self::entry_at(path).await
    }

    pub async fn age_of(&self, class: &ResourceClass, hash: &str) -> Result<Duration, StoreError> {
        Ok(self.entry(class, hash).await?.age_at(SystemTime::now()))
    }

    pub async fn read(&self, class: &ResourceClass, hash: &str) -> Result<Bytes, StoreError> {
        let path = self.path_for(class, hash)?;
        Self::read_at(&path).await
    }

    pub async fn read_default(&self, class: &ResourceClass) -> Result<Bytes, StoreError> {
        Self::read_at(&self.default_path(class)).await
    }

    /// Writes `bytes` under `hash`, replacing any previous entry.
    ///
    /// The old file is removed first so the new entry's timestamp is this
    /// write's. The bytes land in a temp file in the same directory and are
    /// renamed into place, so readers never see a partial file.
    pub async fn write(
        &self,
        class: &ResourceClass,
        hash: &str,
        bytes: &[u8],
    ) -> Result<CacheEntry, StoreError> {
        if hash == DEFAULT_STEM {
            return Err(StoreError::InvalidKey(hash.to_string()));
        }
        let path = self.path_for(class, hash)?;
        self.write_at(class, path, bytes).await
    }

    /// Installs the protected default asset of a class.
    pub async fn install_default(
        &self,
        class: &ResourceClass,
        bytes: &[u8],
    ) -> Result<CacheEntry, StoreError> {
        let path = self.default_path(class);
        self.write_at(class, path, bytes).await
    }

    /// Idempotent: deleting a missing entry succeeds.
    pub async fn delete(&self, class: &ResourceClass, hash: &str) -> Result<(), StoreError> {
        let path = self.path_for(class, hash)?;
        Self::remove_at(&path).await
    }

    /// Snapshot of every entry of a class, default included.
    pub async fn list_all(&self, class: &ResourceClass) -> Result<Vec<CacheEntry>, StoreError> {
        let dir = self.class_dir(class);
        let mut reader = match tokio::fs::read_dir(&dir).await {
            Ok(reader) => reader,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::io(&dir, e)),
        };

        let mut entries = Vec::new();
        while let Some(item) = reader
            .next_entry()
            .await
            .map_err(|e| StoreError::io(&dir, e))?
        {
            let path = item.path();
            let is_temp = path
                .file_name()
                .and_then(|n| n.to_str())
                .map_or(true, |n| n.starts_with('.'));
            if is_temp {
                continue;
            }

            // Una entrada puede desaparecer entre read_dir y metadata (pruner, reescritura)
            let meta = match item.metadata().await {
                Ok(meta) if meta.is_file() => meta,
                _ => continue,
            };

            if let Some(entry) = CacheEntry::from_metadata(path, &meta) {
                if entry.extension == class.spec.extension {
                    entries.push(entry);
                }
            }
        }

        entries.sort_by(|a, b| a.hash.cmp(&b.hash));
        Ok(entries)
    }

    async fn write_at(
        &self,
        class: &ResourceClass,
        path: PathBuf,
        bytes: &[u8],
    ) -> Result<CacheEntry, StoreError> {
        self.prepare(class).await?;
        Self::remove_at(&path).await?;

        let dir = self.class_dir(class);
        let target = path.clone();
        let data = bytes.to_vec();
        tokio::task::spawn_blocking(move || -> Result<(), StoreError> {
            let mut tmp = tempfile::NamedTempFile::new_in(&dir).map_err(|e| StoreError::io(&dir, e))?;
            tmp.write_all(&data).map_err(|e| StoreError::io(tmp.path(), e))?;
            tmp.as_file().sync_all().map_err(|e| StoreError::io(tmp.path(), e))?;
            tmp.persist(&target)
                .map_err(|e| StoreError::io(&target, e.error))?;
            Ok(())
        })
        .await
        .map_err(|e| StoreError::Io {
            path: path.clone(),
            source: Arc::new(io::Error::other(e.to_string())),
        })??;

        let entry = Self::entry_at(path).await?;
        info!("💾 Guardado {} ({} bytes)", entry.path.display(), entry.size);
        Ok(entry)
    }

    async fn entry_at(path: PathBuf) -> Result<CacheEntry, StoreError> {
        let meta = tokio::fs::metadata(&path)
            .await
            .map_err(|e| StoreError::io(&path, e))?;
        CacheEntry::from_metadata(path.clone(), &meta).ok_or_else(|| StoreError::Io {
            path,
            source: Arc::new(io::Error::other("missing timestamp or extension")),
        })
    }

    async fn read_at(path: &Path) -> Result<Bytes, StoreError> {
        let data = tokio::fs::read(path)
            .await
            .map_err(|e| StoreError::io(path, e))?;
        Ok(Bytes::from(data))
    }

    async fn remove_at(path: &Path) -> Result<(), StoreError> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => {
                debug!("🗑️ Eliminado {}", path.display());
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::io(path, e)),
        }
    }
}

fn is_valid_hash(hash: &str) -> bool {
    hash == DEFAULT_STEM || (!hash.is_empty() && hash.chars().all(|c| c.is_ascii_hexdigit()))
}
