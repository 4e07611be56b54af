use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{error, info};

mod api;
mod cache;
mod config;
mod media;
mod resolver;
mod sources;

use crate::api::auth::Credentials;
use crate::api::routes::{self, AppState};
use crate::api::MediaService;
use crate::cache::{CacheStore, Pruner};
use crate::config::{Config, ProviderKind};
use crate::media::{video::Ffmpeg, TransformPipeline};
use crate::resolver::Resolver;
use crate::sources::{ArtworkProvider, DiscogsClient, HttpFetcher, LastfmClient, RateLimiter};

#[tokio::main]
async fn main() -> Result<()> {
    // Inicializar logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("open_media=debug".parse()?)
                .add_directive("hyper=info".parse()?)
                .add_directive("reqwest=info".parse()?),
        )
        .init();

    info!("🖼️ Iniciando Open Media v{}", env!("CARGO_PKG_VERSION"));

    // Cargar configuración
    let config = Config::load()?;

    // Manejar health check si es necesario
    if std::env::args().any(|arg| arg == "--health-check") {
        return health_check(&config).await;
    }

    info!("{}", config.summary());

    let client = sources::http_client(config.http_timeout)?;

    let provider: Arc<dyn ArtworkProvider> = match config.provider {
        ProviderKind::Discogs => {
            let token = config.discogs_api_key.clone().context("DISCOGS_API_KEY must be set")?;
            Arc::new(DiscogsClient::new(token, client.clone()))
        }
        ProviderKind::Lastfm => {
            let key = config.lastfm_api_key.clone().context("LASTFM_API_KEY must be set")?;
            Arc::new(LastfmClient::new(key, client.clone()))
        }
    };
    info!("🔌 Proveedor de artwork: {}", provider.name());

    let store = CacheStore::new(&config.media_root);
    let limiter = Arc::new(RateLimiter::new(config.rate_limit_threshold, config.rate_limit_cooldown));
    let pipeline = TransformPipeline::new(Ffmpeg::new(config.ffmpeg_path.clone()));

    let resolver = Arc::new(Resolver::new(
        store.clone(),
        provider,
        Arc::new(HttpFetcher::new(client).with_max_bytes(config.max_download_bytes)),
        pipeline,
        limiter,
    ));

    let service = Arc::new(MediaService::new(
        config.classes.clone(),
        resolver,
        config.defaults_dir.clone(),
    ));

    let installed = service.install_defaults().await?;
    info!("📦 {} recursos por defecto instalados", installed);

    // Poda programada
    let pruner = Arc::new(Pruner::new(store, config.classes.clone(), config.cache_ttl));
    let _pruner_task = pruner.start(config.prune_schedule);
    info!("🧹 Poda programada: {:?}", config.prune_schedule);

    let app = routes::router(AppState {
        service,
        credentials: Credentials::new(config.upload_user.clone(), config.upload_password.clone()),
        max_age: config.cache_max_age,
    });

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port)).await?;
    info!("🚀 Servidor escuchando en {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Error al registrar Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("⚠️ Señal de shutdown recibida, cerrando...");
}

async fn health_check(config: &Config) -> Result<()> {
    // Verificar dependencias críticas
    let ffmpeg = Ffmpeg::new(config.ffmpeg_path.clone()).version().await?;
    tokio::fs::create_dir_all(&config.media_root).await?;

    info!("✅ {}", ffmpeg);
    println!("OK");
    Ok(())
}
