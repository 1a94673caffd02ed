//! Read-only mirrors of third-party media profiles (AniList, Last.fm, VNDB),
//! normalized and cached behind a small JSON API.

pub mod api;
pub mod cache;
pub mod config;
pub mod keys;
pub mod metrics_defs;
pub mod mirror;
pub mod normalize;
pub mod pagination;
pub mod sources;
pub mod types;
pub mod upstream;

#[cfg(test)]
mod testutils;

use cache::{Cache, CacheError, CacheStore, MemoryStore, SqliteStore};
use config::{CacheBackend, Config, ValidationError};
use mirror::MediaMirror;
use shared::admin_service::AdminService;
use shared::http::run_http_service;
use std::convert::Infallible;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(thiserror::Error, Debug)]
pub enum MirrorError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("cache error: {0}")]
    Cache(#[from] CacheError),
    #[error("could not build http client: {0}")]
    Client(#[from] reqwest::Error),
    #[error("invalid config: {0}")]
    Validation(#[from] ValidationError),
}

fn open_store(backend: &CacheBackend) -> Result<Arc<dyn CacheStore>, CacheError> {
    let store: Arc<dyn CacheStore> = match backend {
        CacheBackend::Memory { max_capacity } => Arc::new(MemoryStore::new(*max_capacity)),
        CacheBackend::Sqlite { path } => Arc::new(SqliteStore::open(path)?),
    };
    tracing::info!(backend = store.name(), "cache store ready");
    Ok(store)
}

/// Runs the public API and the admin listener until either fails.
pub async fn run(config: Config) -> Result<(), MirrorError> {
    config.validate()?;

    let cache = Cache::new(open_store(&config.cache.backend)?);
    let cleanup = cache.spawn_cleanup(config.cache.cleanup_interval(), config.cache.retention());
    let mirror = MediaMirror::new(&config, cache)?;

    let ready = Arc::new(AtomicBool::new(false));
    let flag = ready.clone();
    let admin_service: AdminService<_, Infallible> =
        AdminService::new(move || flag.load(Ordering::Relaxed));

    let api_task = api::serve(config.listener.clone(), mirror, ready);
    let admin_task = run_http_service(
        &config.admin_listener.host,
        config.admin_listener.port,
        admin_service,
    );

    let result = tokio::try_join!(api_task, admin_task);
    cleanup.abort();
    result?;
    Ok(())
}
