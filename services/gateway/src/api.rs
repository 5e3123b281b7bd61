//! API server builder and router

use std::sync::Arc;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::http::StatusCode;
use axum::routing::get;
use registry::{MemoryRegistry, Registry};
use tower_http::trace::TraceLayer;

use crate::bridge::{DownloadAssembler, UploadBridge};
use crate::config::Limits;
use crate::queue::{MemoryQueue, TaskQueue};

/// Shared state handed to every handler.
#[derive(Debug, Clone)]
pub(crate) struct AppState {
    pub(crate) registry: Registry,
    pub(crate) queue: Arc<dyn TaskQueue>,
    pub(crate) limits: Limits,
    pub(crate) uploads: UploadBridge,
    pub(crate) downloads: DownloadAssembler,
}

/// Gateway builder for configuring and creating the HTTP service
#[derive(Debug, Default)]
pub struct GatewayBuilder {
    registry: Option<Registry>,
    queue: Option<Arc<dyn TaskQueue>>,
    limits: Limits,
}

impl GatewayBuilder {
    /// Create a new gateway builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the registry the gateway bridges to
    pub fn registry(mut self, registry: Registry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Set the task queue manifests are submitted to
    pub fn queue(mut self, queue: Arc<dyn TaskQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    /// Set the request limits
    pub fn limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    /// Build the gateway service
    ///
    /// Returns a Router that can be served with any tower-compatible server.
    /// Without an explicit registry or queue, in-memory ones are used.
    pub fn build(self) -> Router {
        let registry = self.registry.unwrap_or_else(|| {
            tracing::warn!("No registry configured, using an in-memory registry");
            MemoryRegistry::new().into()
        });
        let queue = self.queue.unwrap_or_else(|| Arc::new(MemoryQueue::new()));

        let state = AppState {
            uploads: UploadBridge::new(registry.clone(), self.limits.chunk_size),
            downloads: DownloadAssembler::new(registry.clone()),
            registry,
            queue,
            limits: self.limits,
        };

        let body_limit = match self.limits.max_body_size {
            Some(max) => DefaultBodyLimit::max(max),
            None => DefaultBodyLimit::disable(),
        };

        Router::new()
            .route("/ready", get(ready))
            .merge(crate::artifact::router())
            .merge(crate::manifest::router())
            .with_state(state)
            .layer(body_limit)
            .layer(TraceLayer::new_for_http())
    }
}

/// Readiness probe
async fn ready() -> StatusCode {
    StatusCode::OK
}
