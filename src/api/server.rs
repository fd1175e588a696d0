//! API server using Axum
//!
//! Serves the reverse proxy entry point next to the admin, self-report, batch trigger
//! and health endpoints.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing::{info, instrument};

use crate::bump::BumpEngine;
use crate::clock::Clock;
use crate::config::Config;
use crate::error::{Result, RentError};
use crate::proxy::{ProxyHandler, UpstreamFetcher};
use crate::repository::{TenantCache, TenantStore};

use super::middleware::cors_layer;
use super::routes;

/// Shared state for API handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<dyn TenantStore>,
    pub cache: Arc<TenantCache>,
    pub clock: Arc<dyn Clock>,
    pub proxy: Arc<ProxyHandler>,
    pub engine: Arc<BumpEngine>,
}

impl AppState {
    /// Wire the cache, proxy handler and bump engine around one store and fetcher
    pub fn new(
        config: Config,
        store: Arc<dyn TenantStore>,
        fetcher: Arc<dyn UpstreamFetcher>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let cache = Arc::new(TenantCache::new(
            config.proxy.tenant_cache_ttl,
            clock.clone(),
        ));

        let proxy = Arc::new(ProxyHandler::new(
            config.proxy.clone(),
            config.site.clone(),
            store.clone(),
            cache.clone(),
            fetcher.clone(),
            clock.clone(),
        ));

        let engine = Arc::new(BumpEngine::new(
            config.bump.clone(),
            config.site.clone(),
            config.proxy.rental_offset,
            store.clone(),
            cache.clone(),
            fetcher,
            clock.clone(),
        ));

        Self {
            config: Arc::new(config),
            store,
            cache,
            clock,
            proxy,
            engine,
        }
    }
}

/// API server
pub struct ApiServer {
    state: AppState,
}

impl ApiServer {
    /// Create a new API server
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    /// Build the router
    pub fn build_router(&self) -> Router {
        routes::create_router(self.state.clone())
            .layer(cors_layer())
            .layer(TraceLayer::new_for_http())
    }

    /// Run the API server
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let addr: SocketAddr = self
            .state
            .config
            .server_addr()
            .parse()
            .map_err(|e| RentError::InvalidConfig(format!("Invalid server address: {}", e)))?;

        let router = self.build_router();

        info!("API server listening on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;

        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.changed().await;
            })
            .await
            .map_err(|e| RentError::Internal(e.to_string()))?;

        info!("API server shut down");
        Ok(())
    }
}
