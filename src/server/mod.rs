//! HTTP surface
//!
//! A thin axum layer in front of the coordination pipeline: the
//! coordinate-search endpoint plus the cache administrative endpoints.
//! Everything interesting happens in [`crate::coordinate`]; this module
//! only wires state and maps errors to status codes.

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use dotenvy::dotenv;
use tokio::net::TcpListener;

use crate::cache::FilterJoinCache;
use crate::config::ServerConfig;
use crate::coordinate::CoordinateSearchService;
use crate::search::elastic::ElasticSearchService;
use crate::search::SearchService;

pub mod handlers;

use handlers::{cache_clear_handler, cache_stats_handler, coordinate_search_handler, health_check};

#[derive(Clone)]
pub struct AppState {
    pub coordinate: Arc<CoordinateSearchService>,
    pub cache: Arc<FilterJoinCache>,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/_coordinate_search", post(coordinate_search_handler))
        .route("/{indices}/_coordinate_search", post(coordinate_search_handler))
        .route("/_filterjoin/cache/clear", post(cache_clear_handler))
        .route("/_filterjoin/cache/stats", get(cache_stats_handler))
        .with_state(state)
}

pub async fn run() {
    dotenv().ok();

    let config = match ServerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            log::error!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    run_with_config(config).await;
}

pub async fn run_with_config(config: ServerConfig) {
    dotenv().ok();

    log::info!(
        "Server configuration: http={}:{}, upstream={}, default_lookup_size={}",
        config.http_host,
        config.http_port,
        config.upstream_url,
        config.default_lookup_size
    );

    let search: Arc<dyn SearchService> =
        Arc::new(ElasticSearchService::new(config.upstream_url.clone()));
    let cache = Arc::new(FilterJoinCache::from_env());
    let coordinate = Arc::new(CoordinateSearchService::new(
        search,
        cache.clone(),
        config.default_lookup_size,
    ));

    let state = AppState { coordinate, cache };
    let app = build_router(state);

    let addr = format!("{}:{}", config.http_host, config.http_port);
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            log::error!("Failed to bind {}: {}", addr, e);
            std::process::exit(1);
        }
    };
    log::info!("Listening on {}", addr);

    if let Err(e) = axum::serve(listener, app).await {
        log::error!("Server error: {}", e);
    }
}
