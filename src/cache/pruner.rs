use super::store::{CacheStore, StoreError};
use crate::config::{PruneSchedule, ResourceClass};
use chrono::Local;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Outcome of one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PruneReport {
    pub scanned: usize,
    pub removed: usize,
    pub failed: usize,
}

/// Time-based eviction of provider-backed entries.
///
/// Only entries older than the TTL are removed; protected defaults and
/// classes that are not prunable are never touched. A single failure is
/// logged and the sweep moves on.
pub struct Pruner {
    store: CacheStore,
    classes: Vec<ResourceClass>,
    ttl: Duration,
}

impl Pruner {
    pub fn new(store: CacheStore, classes: impl IntoIterator<Item = ResourceClass>, ttl: Duration) -> Self {
        Self {
            store,
            classes: classes.into_iter().filter(|c| c.is_prunable()).collect(),
            ttl,
        }
    }

    pub async fn sweep(&self) -> PruneReport {
        self.sweep_at(SystemTime::now()).await
    }

    /// Sweeps every prunable class as if the clock read `now`.
    pub async fn sweep_at(&self, now: SystemTime) -> PruneReport {
        let mut report = PruneReport::default();

        for class in &self.classes {
            let entries = match self.store.list_all(class).await {
                Ok(entries) => entries,
                Err(e) => {
                    warn!("⚠️ No se pudo listar {}: {}", class.id(), e);
                    report.failed += 1;
                    continue;
                }
            };

            for entry in entries {
                report.scanned += 1;
                if entry.protected || entry.age_at(now) <= self.ttl {
                    continue;
                }

                match self.store.delete(class, &entry.hash).await {
                    Ok(()) => report.removed += 1,
                    // Ya borrado por otro camino
                    Err(StoreError::NotFound { .. }) => {}
                    Err(e) => {
                        warn!("⚠️ Error podando {}: {}", entry.path.display(), e);
                        report.failed += 1;
                    }
                }
            }
        }

        info!(
            "🧹 Poda completada: {} revisadas, {} eliminadas, {} fallidas",
            report.scanned, report.removed, report.failed
        );
        report
    }

    /// Spawns the background sweep loop.
    pub fn start(self: Arc<Self>, schedule: PruneSchedule) -> JoinHandle<()> {
        tokio::spawn(async move {
            match schedule {
                PruneSchedule::Every(period) => {
                    let mut ticker = tokio::time::interval(period);
                    // El primer tick es inmediato
                    ticker.tick().await;
                    loop {
                        ticker.tick().await;
                        self.sweep().await;
                    }
                }
                PruneSchedule::Midnight => loop {
                    let wait = until_next_midnight();
                    debug!("Próxima poda en {}", humantime::format_duration(wait));
                    tokio::time::sleep(wait).await;
                    self.sweep().await;
                },
            }
        })
    }
}

/// Time until the next local midnight; a day if the local calendar can't say.
fn until_next_midnight() -> Duration {
    let now = Local::now();
    now.date_naive()
        .succ_opt()
        .and_then(|tomorrow| tomorrow.and_hms_opt(0, 0, 0))
        .and_then(|midnight| midnight.and_local_timezone(Local).earliest())
        .and_then(|midnight| (midnight - now).to_std().ok())
        .filter(|wait| !wait.is_zero())
        .unwrap_or(Duration::from_secs(24 * 3600))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::key::CacheKey;
    use crate::config::test_support::{music_class, static_class};

    const TTL: Duration = Duration::from_secs(14 * 24 * 3600);

    fn all_classes() -> Vec<ResourceClass> {
        vec![music_class("artist"), music_class("track"), static_class("exec")]
    }

    #[tokio::test]
    async fn test_entry_survives_until_ttl_passes() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::new(dir.path());
        let class = music_class("artist");
        let hash = CacheKey::new("daft punk").hash().to_string();
        let written = store.write(&class, &hash, b"art").await.unwrap().created;
        let pruner = Pruner::new(store.clone(), all_classes(), TTL);

        let report = pruner.sweep_at(written + TTL - Duration::from_secs(1)).await;
        assert_eq!(report.removed, 0);
        assert!(store.exists(&class, &hash).await);

        let report = pruner.sweep_at(written + TTL + Duration::from_secs(1)).await;
        assert_eq!(report.removed, 1);
        assert!(!store.exists(&class, &hash).await);
    }

    #[tokio::test]
    async fn test_defaults_and_static_classes_are_kept() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::new(dir.path());
        let artist = music_class("artist");
        let exec = static_class("exec");
        store.install_default(&artist, b"default").await.unwrap();
        let uploaded = CacheKey::new("jane doe").hash().to_string();
        store.write(&exec, &uploaded, b"headshot").await.unwrap();
        let pruner = Pruner::new(store.clone(), all_classes(), TTL);

        let far_future = SystemTime::now() + TTL + Duration::from_secs(1000);
        let report = pruner.sweep_at(far_future).await;

        assert_eq!(report.removed, 0);
        assert_eq!(report.scanned, 1);
        assert!(store.read_default(&artist).await.is_ok());
        assert!(store.exists(&exec, &uploaded).await);
    }

    #[tokio::test]
    async fn test_missing_class_directories_are_not_failures() {
        let dir = tempfile::tempdir().unwrap();
        let pruner = Pruner::new(CacheStore::new(dir.path()), all_classes(), TTL);
        assert_eq!(pruner.sweep().await, PruneReport::default());
    }

    #[test]
    fn test_next_midnight_is_within_a_day() {
        let wait = until_next_midnight();
        assert!(wait > Duration::ZERO);
        assert!(wait <= Duration::from_secs(25 * 3600));
    }
}
