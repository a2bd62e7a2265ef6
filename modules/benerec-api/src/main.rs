use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    routing::{get, post},
    Router,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

use benerec_common::Config;
use benerec_engine::{
    jobs::{spawn_nightly_loop, spawn_refresh_worker, RetryPolicy},
    EngineSnapshot, GenerationOrchestrator, RecommendationJobs, RefreshQueue, SnapshotStore,
};
use benerec_index::{Embedder, VectorIndex};
use benerec_store::{PgDocumentStore, RedisCache};

mod rest;

pub struct AppState {
    pub orchestrator: GenerationOrchestrator,
    pub refresh_queue: RefreshQueue,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("benerec=info".parse()?))
        .init();

    info!("Recommendation engine starting...");

    let config = Config::from_env();

    // External collaborators. The vector index is fatal if missing or
    // corrupt — there is no degraded mode for the warm path.
    let docs: Arc<dyn benerec_store::DocumentStore> = Arc::new(
        PgDocumentStore::connect(&config.database_url).await?,
    );
    let cache: Arc<dyn benerec_store::RecommendationCache> = Arc::new(
        RedisCache::connect(&config.redis_url, config.cache_expiry_secs()).await?,
    );
    let index = Arc::new(
        VectorIndex::load(Path::new(&config.index_path))
            .with_context(|| format!("loading vector index from {}", config.index_path))?,
    );
    if index.dim() != Some(config.embedding_dimension) {
        tracing::warn!(
            index_dim = ?index.dim(),
            configured_dim = config.embedding_dimension,
            "Index dimension differs from EMBEDDING_DIMENSION; searches use the index's width"
        );
    }
    let embedder: Arc<dyn benerec_index::TextEmbedder> = Arc::new(Embedder::new(
        &config.embed_api_key,
        &config.embed_base_url,
        &config.embed_model,
    ));

    // Initial snapshot, then periodic rebuild-and-swap.
    let snapshots = Arc::new(SnapshotStore::new(EngineSnapshot::empty()));
    snapshots.rebuild(docs.as_ref()).await;
    snapshots.spawn_reload_loop(docs.clone(), config.snapshot_reload_hours);

    // Background generation: refresh worker + nightly batch.
    let jobs = Arc::new(RecommendationJobs::new(
        docs,
        cache.clone(),
        embedder,
        index,
        config.top_k,
    ));
    let (refresh_queue, refresh_rx) = RefreshQueue::new(1024);
    spawn_refresh_worker(jobs.clone(), refresh_rx, RetryPolicy::default());
    spawn_nightly_loop(jobs, config.nightly_interval_hours, RetryPolicy::default());

    let state = Arc::new(AppState {
        orchestrator: GenerationOrchestrator::new(snapshots, cache, config.top_k),
        refresh_queue,
    });

    let app = Router::new()
        // Health check
        .route("/", get(|| async { "ok" }))
        // Recommendations
        .route("/recommendations/{user_id}", get(rest::get_recommendations))
        .route(
            "/recommendations/refresh/{user_id}",
            post(rest::refresh_recommendations),
        )
        .with_state(state)
        .layer(
            tower_http::cors::CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
        );

    let addr = format!("{}:{}", config.api_host, config.api_port);
    info!(addr = addr.as_str(), "Recommendation API listening");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
