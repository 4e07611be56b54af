//! # Resolver
//!
//! Turns a normalized key into bytes to serve:
//!
//! ```text
//! HIT  ──────────────────────────────────────────────▶ SERVED
//! MISS ─▶ FETCHING ─▶ TRANSFORMING ─▶ STORED ─────────▶ SERVED
//!            └─(cooldown | rate limited | no match)──▶ DEFAULT_SERVED
//! ```
//!
//! The read path never checks freshness; stale entries are served until the
//! pruner removes them.
//!
//! Concurrent misses for the same `(class, hash)` share one in-flight
//! resolution. It runs in its own task, so a caller that goes away does not
//! cancel the fetch; the cache is populated for whoever asks next.

use crate::cache::{CacheKey, CacheStore, StoreError};
use crate::config::ResourceClass;
use crate::media::{TransformError, TransformPipeline};
use crate::sources::{
    ArtworkProvider, ArtworkQuery, AssetFetcher, DownloadError, ProviderError, ProviderResult, RateLimiter,
};
use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Error)]
pub enum ResolveError {
    #[error("{provider} unavailable: {message}")]
    ProviderUnavailable { provider: &'static str, message: String },

    #[error(transparent)]
    Download(#[from] DownloadError),

    #[error(transparent)]
    Transform(#[from] TransformError),

    #[error(transparent)]
    Storage(#[from] StoreError),

    #[error("resolution task failed: {0}")]
    Task(String),
}

/// Why the class default was served.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DefaultReason {
    NoMatch,
    RateLimited,
    CoolingDown,
    /// Static classes: nothing uploaded under this key.
    NotStored,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionSource {
    Hit,
    Fetched,
    Default(DefaultReason),
}

/// Bytes to serve plus where they came from.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub bytes: Bytes,
    pub content_type: &'static str,
    pub source: ResolutionSource,
}

/// Counter snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResolverStats {
    pub hits: u64,
    pub misses: u64,
    pub fetches: u64,
    pub defaults: u64,
    pub failures: u64,
    pub deduplicated: u64,
    pub in_flight: usize,
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    fetches: AtomicU64,
    defaults: AtomicU64,
    failures: AtomicU64,
    deduplicated: AtomicU64,
}

type SharedResolution = Shared<BoxFuture<'static, Result<Resolution, ResolveError>>>;

struct Flight {
    id: u64,
    future: SharedResolution,
}

/// (class id, hash)
type FlightKey = (String, String);

/// Removes a flight from the registry when its task ends, panics included.
struct FlightGuard {
    resolver: Arc<Resolver>,
    key: FlightKey,
    id: u64,
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        let id = self.id;
        self.resolver.in_flight.remove_if(&self.key, |_, flight| flight.id == id);
    }
}

pub struct Resolver {
    store: CacheStore,
    provider: Arc<dyn ArtworkProvider>,
    fetcher: Arc<dyn AssetFetcher>,
    pipeline: TransformPipeline,
    limiter: Arc<RateLimiter>,
    in_flight: DashMap<FlightKey, Flight>,
    next_flight: AtomicU64,
    counters: Counters,
}

impl Resolver {
    pub fn new(
        store: CacheStore,
        provider: Arc<dyn ArtworkProvider>,
        fetcher: Arc<dyn AssetFetcher>,
        pipeline: TransformPipeline,
        limiter: Arc<RateLimiter>,
    ) -> Self {
        Self {
            store,
            provider,
            fetcher,
            pipeline,
            limiter,
            in_flight: DashMap::new(),
            next_flight: AtomicU64::new(0),
            counters: Counters::default(),
        }
    }

    pub fn store(&self) -> &CacheStore {
        &self.store
    }

    pub fn pipeline(&self) -> &TransformPipeline {
        &self.pipeline
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Resolves `key`, trying each query of `plan` in order on a miss.
    ///
    /// Multi-tier fallbacks (release art, then artist art) are expressed as a
    /// plan with several queries; the first match wins.
    pub async fn resolve(
        self: &Arc<Self>,
        class: &ResourceClass,
        key: &CacheKey,
        plan: &[ArtworkQuery],
    ) -> Result<Resolution, ResolveError> {
        if key.is_empty() {
            return self.serve_default(class, DefaultReason::NoMatch).await;
        }

        if let Some(hit) = self.try_hit(class, key).await? {
            return Ok(hit);
        }

        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        debug!("❌ Cache miss {} {}", class.id(), key);

        let result = self.join_flight(class, key, plan).await;
        if result.is_err() {
            self.counters.failures.fetch_add(1, Ordering::Relaxed);
        }
        result
    }

    /// Lookup only: serves the stored entry or the class default.
    pub async fn serve_stored(&self, class: &ResourceClass, key: &CacheKey) -> Result<Resolution, ResolveError> {
        if !key.is_empty() {
            if let Some(hit) = self.try_hit(class, key).await? {
                return Ok(hit);
            }
        }
        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        self.serve_default(class, DefaultReason::NotStored).await
    }

    pub fn stats(&self) -> ResolverStats {
        ResolverStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            fetches: self.counters.fetches.load(Ordering::Relaxed),
            defaults: self.counters.defaults.load(Ordering::Relaxed),
            failures: self.counters.failures.load(Ordering::Relaxed),
            deduplicated: self.counters.deduplicated.load(Ordering::Relaxed),
            in_flight: self.in_flight.len(),
        }
    }

    async fn try_hit(&self, class: &ResourceClass, key: &CacheKey) -> Result<Option<Resolution>, ResolveError> {
        if !self.store.exists(class, key.hash()).await {
            return Ok(None);
        }

        match self.store.read(class, key.hash()).await {
            Ok(bytes) => {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                debug!("✅ Cache hit {} {}", class.id(), key);
                Ok(Some(Resolution {
                    bytes,
                    content_type: class.mime_type(),
                    source: ResolutionSource::Hit,
                }))
            }
            // Podado entre exists y read: se trata como miss
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn join_flight(self: &Arc<Self>, class: &ResourceClass, key: &CacheKey, plan: &[ArtworkQuery]) -> SharedResolution {
        let flight_key: FlightKey = (class.id(), key.hash().to_string());

        match self.in_flight.entry(flight_key.clone()) {
            Entry::Occupied(existing) => {
                self.counters.deduplicated.fetch_add(1, Ordering::Relaxed);
                debug!("🔗 Esperando resolución en curso para {}", key);
                existing.get().future.clone()
            }
            Entry::Vacant(slot) => {
                let id = self.next_flight.fetch_add(1, Ordering::Relaxed);
                let this = Arc::clone(self);
                let class = class.clone();
                let key = key.clone();
                let plan = plan.to_vec();

                let handle = tokio::spawn(async move {
                    // Se crea al primer poll: nunca se suelta con el entry bloqueado
                    let guard = FlightGuard {
                        resolver: this,
                        key: flight_key,
                        id,
                    };
                    let result = guard.resolver.populate(&class, &key, &plan).await;
                    drop(guard);
                    result
                });

                let future = async move {
                    handle
                        .await
                        .unwrap_or_else(|e| Err(ResolveError::Task(e.to_string())))
                }
                .boxed()
                .shared();

                slot.insert(Flight {
                    id,
                    future: future.clone(),
                });
                future
            }
        }
    }

    async fn populate(
        &self,
        class: &ResourceClass,
        key: &CacheKey,
        plan: &[ArtworkQuery],
    ) -> Result<Resolution, ResolveError> {
        // Otro flight pudo terminar entre nuestro miss y el registro
        if let Some(hit) = self.try_hit(class, key).await? {
            return Ok(hit);
        }

        for query in plan {
            if !self.limiter.allowed() {
                debug!("⏳ Proveedor en pausa, sirviendo default para {}", key);
                return self.serve_default(class, DefaultReason::CoolingDown).await;
            }

            let reply = self.provider.search(query).await;
            if let Some(remaining) = reply.remaining_quota {
                self.limiter.record_quota(remaining);
            }

            match reply.outcome {
                Ok(ProviderResult::Found { url }) => {
                    return self.fetch_and_store(class, key, &url).await;
                }
                Ok(ProviderResult::NoMatch) => {
                    debug!("{} sin coincidencia para {:?}", self.provider.name(), query);
                }
                Err(ProviderError::Malformed(message)) => {
                    warn!("⚠️ Respuesta inesperada de {}: {}", self.provider.name(), message);
                }
                Err(ProviderError::RateLimited) => {
                    self.limiter.trip();
                    return self.serve_default(class, DefaultReason::RateLimited).await;
                }
                Err(ProviderError::Unavailable(message)) => {
                    error!("❌ {} no disponible: {}", self.provider.name(), message);
                    return Err(ResolveError::ProviderUnavailable {
                        provider: self.provider.name(),
                        message,
                    });
                }
            }
        }

        self.serve_default(class, DefaultReason::NoMatch).await
    }

    async fn fetch_and_store(&self, class: &ResourceClass, key: &CacheKey, url: &str) -> Result<Resolution, ResolveError> {
        info!("⬇️ Descargando {} para {}", url, key);
        let downloaded = self.fetcher.fetch(url).await?;

        let transformed = self
            .pipeline
            .transform(downloaded.bytes, downloaded.content_type.as_deref(), &class.spec)
            .await?;

        self.store.write(class, key.hash(), &transformed).await?;
        self.counters.fetches.fetch_add(1, Ordering::Relaxed);

        Ok(Resolution {
            bytes: Bytes::from(transformed),
            content_type: class.mime_type(),
            source: ResolutionSource::Fetched,
        })
    }

    async fn serve_default(&self, class: &ResourceClass, reason: DefaultReason) -> Result<Resolution, ResolveError> {
        let bytes = self.store.read_default(class).await?;
        self.counters.defaults.fetch_add(1, Ordering::Relaxed);
        Ok(Resolution {
            bytes,
            content_type: class.mime_type(),
            source: ResolutionSource::Default(reason),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_support::music_class;
    use crate::media::test_support::sample_image;
    use crate::sources::{Downloaded, MockArtworkProvider, MockAssetFetcher, ProviderReply};
    use async_trait::async_trait;
    use image::ImageFormat;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::sync::Notify;

    const DEFAULT_BYTES: &[u8] = b"default artwork";

    async fn setup(
        provider: impl ArtworkProvider + 'static,
        fetcher: impl AssetFetcher + 'static,
    ) -> (TempDir, Arc<Resolver>) {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::new(dir.path());
        for name in ["artist", "track"] {
            store.install_default(&music_class(name), DEFAULT_BYTES).await.unwrap();
        }
        let resolver = Resolver::new(
            store,
            Arc::new(provider),
            Arc::new(fetcher),
            TransformPipeline::default(),
            Arc::new(RateLimiter::new(5, Duration::from_secs(10))),
        );
        (dir, Arc::new(resolver))
    }

    fn png_fetcher() -> MockAssetFetcher {
        let raw = sample_image(900, 600, ImageFormat::Png);
        let mut fetcher = MockAssetFetcher::new();
        fetcher.expect_fetch().returning(move |_| {
            Ok(Downloaded {
                bytes: raw.clone(),
                content_type: Some("image/png".to_string()),
            })
        });
        fetcher
    }

    fn provider_replying(reply: ProviderReply, times: usize) -> MockArtworkProvider {
        let mut provider = MockArtworkProvider::new();
        provider.expect_search().times(times).returning(move |_| reply.clone());
        provider.expect_name().return_const("mock");
        provider
    }

    #[tokio::test]
    async fn test_miss_fetches_transforms_and_stores() {
        let provider = provider_replying(ProviderReply::found("https://img.example/daft.png").with_quota(Some(50)), 1);
        let (_dir, resolver) = setup(provider, png_fetcher()).await;
        let class = music_class("artist");
        let key = CacheKey::new("Daft   Punk");
        assert_eq!(key.normalized(), "daft punk");

        let resolution = resolver
            .resolve(&class, &key, &[ArtworkQuery::artist(key.normalized())])
            .await
            .unwrap();

        assert_eq!(resolution.source, ResolutionSource::Fetched);
        assert_eq!(resolution.content_type, "image/jpeg");

        let stored = resolver.store().read(&class, key.hash()).await.unwrap();
        assert_eq!(resolution.bytes, stored);
        let decoded = image::load_from_memory(&stored).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (640, 640));
        assert_eq!(image::guess_format(&stored).unwrap(), ImageFormat::Jpeg);

        let entry = resolver.store().entry(&class, key.hash()).await.unwrap();
        assert_eq!(entry.path.file_name().unwrap().to_str().unwrap(), format!("{}.jpg", key.hash()));
        assert_eq!(resolver.limiter().remaining(), Some(50));
    }

    #[tokio::test]
    async fn test_hit_never_calls_provider() {
        let provider = provider_replying(ProviderReply::no_match(), 0);
        let mut fetcher = MockAssetFetcher::new();
        fetcher.expect_fetch().times(0);
        let (_dir, resolver) = setup(provider, fetcher).await;
        let class = music_class("artist");
        let key = CacheKey::new("air");
        resolver.store().write(&class, key.hash(), b"cached").await.unwrap();

        for _ in 0..3 {
            let resolution = resolver.resolve(&class, &key, &[ArtworkQuery::artist("air")]).await.unwrap();
            assert_eq!(resolution.source, ResolutionSource::Hit);
            assert_eq!(resolution.bytes, Bytes::from_static(b"cached"));
        }
        assert_eq!(resolver.stats().hits, 3);
        assert_eq!(resolver.stats().misses, 0);
    }

    #[tokio::test]
    async fn test_no_match_serves_default_without_writing() {
        let provider = provider_replying(ProviderReply::no_match(), 1);
        let mut fetcher = MockAssetFetcher::new();
        fetcher.expect_fetch().times(0);
        let (_dir, resolver) = setup(provider, fetcher).await;
        let class = music_class("artist");
        let key = CacheKey::new("unknown artist");

        let resolution = resolver.resolve(&class, &key, &[ArtworkQuery::artist("unknown artist")]).await.unwrap();

        assert_eq!(resolution.source, ResolutionSource::Default(DefaultReason::NoMatch));
        assert_eq!(resolution.bytes, Bytes::from_static(DEFAULT_BYTES));
        assert!(!resolver.store().exists(&class, key.hash()).await);
    }

    #[tokio::test]
    async fn test_malformed_reply_is_treated_as_no_match() {
        let provider = provider_replying(ProviderReply::failed(ProviderError::Malformed("html".into())), 1);
        let (_dir, resolver) = setup(provider, MockAssetFetcher::new()).await;
        let class = music_class("artist");
        let key = CacheKey::new("x");

        let resolution = resolver.resolve(&class, &key, &[ArtworkQuery::artist("x")]).await.unwrap();
        assert_eq!(resolution.source, ResolutionSource::Default(DefaultReason::NoMatch));
    }

    #[tokio::test]
    async fn test_rate_limited_serves_default_and_suppresses_next_call() {
        let provider = provider_replying(ProviderReply::failed(ProviderError::RateLimited), 1);
        let (_dir, resolver) = setup(provider, MockAssetFetcher::new()).await;
        let class = music_class("artist");

        let first = resolver
            .resolve(&class, &CacheKey::new("a"), &[ArtworkQuery::artist("a")])
            .await
            .unwrap();
        assert_eq!(first.source, ResolutionSource::Default(DefaultReason::RateLimited));
        assert!(!resolver.limiter().allowed());

        // times(1): la segunda resolución no debe llegar al proveedor
        let second = resolver
            .resolve(&class, &CacheKey::new("b"), &[ArtworkQuery::artist("b")])
            .await
            .unwrap();
        assert_eq!(second.source, ResolutionSource::Default(DefaultReason::CoolingDown));
    }

    #[tokio::test]
    async fn test_low_quota_trips_cooldown_after_success() {
        let provider = provider_replying(ProviderReply::found("https://img.example/a.png").with_quota(Some(3)), 1);
        let (_dir, resolver) = setup(provider, png_fetcher()).await;
        let class = music_class("artist");

        let first = resolver
            .resolve(&class, &CacheKey::new("a"), &[ArtworkQuery::artist("a")])
            .await
            .unwrap();
        assert_eq!(first.source, ResolutionSource::Fetched);

        let second = resolver
            .resolve(&class, &CacheKey::new("b"), &[ArtworkQuery::artist("b")])
            .await
            .unwrap();
        assert_eq!(second.source, ResolutionSource::Default(DefaultReason::CoolingDown));
    }

    #[tokio::test]
    async fn test_provider_unavailable_is_an_error() {
        let provider = provider_replying(ProviderReply::failed(ProviderError::Unavailable("503".into())), 1);
        let (_dir, resolver) = setup(provider, MockAssetFetcher::new()).await;
        let class = music_class("artist");
        let key = CacheKey::new("x");

        let err = resolver.resolve(&class, &key, &[ArtworkQuery::artist("x")]).await.unwrap_err();
        assert!(matches!(err, ResolveError::ProviderUnavailable { provider: "mock", .. }));
        assert!(!resolver.store().exists(&class, key.hash()).await);
        assert_eq!(resolver.stats().failures, 1);
        assert_eq!(resolver.stats().in_flight, 0);
    }

    #[tokio::test]
    async fn test_transform_failure_writes_nothing() {
        let provider = provider_replying(ProviderReply::found("https://img.example/broken.jpg"), 1);
        let mut fetcher = MockAssetFetcher::new();
        fetcher.expect_fetch().returning(|_| {
            Ok(Downloaded {
                bytes: b"truncated".to_vec(),
                content_type: Some("image/jpeg".to_string()),
            })
        });
        let (_dir, resolver) = setup(provider, fetcher).await;
        let class = music_class("artist");
        let key = CacheKey::new("x");

        let err = resolver.resolve(&class, &key, &[ArtworkQuery::artist("x")]).await.unwrap_err();
        assert!(matches!(err, ResolveError::Transform(TransformError::Decode(_))));
        assert!(!resolver.store().exists(&class, key.hash()).await);
        // Sólo queda el default
        assert_eq!(resolver.store().list_all(&class).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_download_failure_is_an_error() {
        let provider = provider_replying(ProviderReply::found("https://img.example/gone.jpg"), 1);
        let mut fetcher = MockAssetFetcher::new();
        fetcher.expect_fetch().returning(|url| {
            Err(DownloadError {
                url: url.to_string(),
                message: "status 404".to_string(),
            })
        });
        let (_dir, resolver) = setup(provider, fetcher).await;

        let err = resolver
            .resolve(&music_class("artist"), &CacheKey::new("x"), &[ArtworkQuery::artist("x")])
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::Download(_)));
    }

    #[tokio::test]
    async fn test_track_falls_back_to_artist_query() {
        let mut provider = MockArtworkProvider::new();
        provider.expect_search().times(2).returning(|query| match query {
            ArtworkQuery::Release { .. } => ProviderReply::no_match(),
            ArtworkQuery::Artist { .. } => ProviderReply::found("https://img.example/artist.png"),
        });
        provider.expect_name().return_const("mock");
        let (_dir, resolver) = setup(provider, png_fetcher()).await;
        let class = music_class("track");
        let key = CacheKey::composite(&["daft punk", "one more time"]);

        let resolution = resolver
            .resolve(
                &class,
                &key,
                &[
                    ArtworkQuery::release("daft punk", "one more time"),
                    ArtworkQuery::artist("daft punk"),
                ],
            )
            .await
            .unwrap();

        assert_eq!(resolution.source, ResolutionSource::Fetched);
        assert!(resolver.store().exists(&class, key.hash()).await);
    }

    #[tokio::test]
    async fn test_empty_key_serves_default() {
        let provider = provider_replying(ProviderReply::no_match(), 0);
        let (_dir, resolver) = setup(provider, MockAssetFetcher::new()).await;

        let resolution = resolver
            .resolve(&music_class("artist"), &CacheKey::new("   "), &[ArtworkQuery::artist("")])
            .await
            .unwrap();
        assert_eq!(resolution.source, ResolutionSource::Default(DefaultReason::NoMatch));
    }

    #[tokio::test]
    async fn test_serve_stored_never_fetches() {
        let provider = provider_replying(ProviderReply::no_match(), 0);
        let (_dir, resolver) = setup(provider, MockAssetFetcher::new()).await;
        let class = music_class("artist");
        let key = CacheKey::new("exec name");

        let miss = resolver.serve_stored(&class, &key).await.unwrap();
        assert_eq!(miss.source, ResolutionSource::Default(DefaultReason::NotStored));

        resolver.store().write(&class, key.hash(), b"uploaded").await.unwrap();
        let hit = resolver.serve_stored(&class, &key).await.unwrap();
        assert_eq!(hit.source, ResolutionSource::Hit);
    }

    /// Proveedor lento que avisa al empezar cada búsqueda.
    struct SlowProvider {
        delay: Duration,
        started: Arc<Notify>,
    }

    impl SlowProvider {
        fn new(delay: Duration) -> Self {
            Self {
                delay,
                started: Arc::new(Notify::new()),
            }
        }
    }

    #[async_trait]
    impl ArtworkProvider for SlowProvider {
        async fn search(&self, _query: &ArtworkQuery) -> ProviderReply {
            self.started.notify_one();
            tokio::time::sleep(self.delay).await;
            ProviderReply::found("https://img.example/slow.png")
        }

        fn name(&self) -> &'static str {
            "slow"
        }
    }

    /// Entra en pánico en la primera búsqueda y encuentra en las siguientes.
    #[derive(Default)]
    struct PanicOnceProvider {
        calls: std::sync::atomic::AtomicUsize,
    }

    #[async_trait]
    impl ArtworkProvider for PanicOnceProvider {
        async fn search(&self, _query: &ArtworkQuery) -> ProviderReply {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                panic!("provider blew up");
            }
            ProviderReply::found("https://img.example/retry.png")
        }

        fn name(&self) -> &'static str {
            "panic-once"
        }
    }

    #[tokio::test]
    async fn test_panicked_resolution_does_not_poison_the_key() {
        let (_dir, resolver) = setup(PanicOnceProvider::default(), png_fetcher()).await;
        let class = music_class("artist");
        let key = CacheKey::new("boards of canada");
        let plan = [ArtworkQuery::artist(key.normalized())];

        let first = resolver.resolve(&class, &key, &plan).await.unwrap_err();
        assert!(matches!(first, ResolveError::Task(_)));
        assert_eq!(resolver.stats().in_flight, 0);

        let second = resolver.resolve(&class, &key, &plan).await.unwrap();
        assert_eq!(second.source, ResolutionSource::Fetched);
        assert!(resolver.store().exists(&class, key.hash()).await);
        assert_eq!(resolver.stats().in_flight, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_misses_share_one_fetch() {
        let provider = SlowProvider::new(Duration::from_millis(200));
        let (_dir, resolver) = setup(provider, png_fetcher()).await;
        let class = music_class("artist");

        let tasks: Vec<_> = (0..8)
            .map(|i| {
                let resolver = Arc::clone(&resolver);
                let class = class.clone();
                // Mismo artista con distinto espaciado/caso
                let raw = if i % 2 == 0 { "Daft Punk" } else { "  daft   PUNK " };
                tokio::spawn(async move {
                    let key = CacheKey::new(raw);
                    resolver.resolve(&class, &key, &[ArtworkQuery::artist(key.normalized())]).await
                })
            })
            .collect();

        let results = futures::future::join_all(tasks).await;
        let first = results[0].as_ref().unwrap().as_ref().unwrap().bytes.clone();
        for result in results {
            let resolution = result.unwrap().unwrap();
            assert_ne!(resolution.source, ResolutionSource::Default(DefaultReason::NoMatch));
            assert_eq!(resolution.bytes, first);
        }

        let stats = resolver.stats();
        assert_eq!(stats.fetches, 1);
        assert_eq!(stats.deduplicated + stats.hits, 7);
        assert_eq!(stats.in_flight, 0);
        assert_eq!(resolver.store().list_all(&class).await.unwrap().len(), 2); // entrada + default
    }

    #[tokio::test]
    async fn test_abandoned_request_still_populates_cache() {
        let provider = SlowProvider::new(Duration::from_millis(100));
        let started = Arc::clone(&provider.started);
        let (_dir, resolver) = setup(provider, png_fetcher()).await;
        let class = music_class("artist");
        let key = CacheKey::new("justice");

        let request = {
            let resolver = Arc::clone(&resolver);
            let class = class.clone();
            let key = key.clone();
            tokio::spawn(async move { resolver.resolve(&class, &key, &[ArtworkQuery::artist("justice")]).await })
        };

        // El cliente se va en cuanto empieza la búsqueda
        started.notified().await;
        request.abort();
        assert!(request.await.unwrap_err().is_cancelled());

        let mut stored = false;
        for _ in 0..100 {
            if resolver.store().exists(&class, key.hash()).await {
                stored = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(stored, "the spawned resolution should finish without its caller");
    }
}
