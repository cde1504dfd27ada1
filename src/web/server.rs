//! Web server implementation using axum

use anyhow::{Context, Result};
use axum::http::{HeaderName, Method};
use axum::Router;
use std::sync::Arc;
use tokio::sync::oneshot;
use tower_http::cors::{Any, CorsLayer};

use wacheck_core::{ListenerHandle, LookupPipeline, SessionClient};

use crate::config::ServerSettings;

use super::api::{self, ApiState};

/// HTTP front end over the lookup pipeline
pub struct WebServer<C: SessionClient> {
    settings: ServerSettings,
    pipeline: Arc<LookupPipeline<C>>,
}

impl<C: SessionClient> WebServer<C> {
    /// Create a new web server
    pub fn new(settings: ServerSettings, pipeline: Arc<LookupPipeline<C>>) -> Self {
        Self { settings, pipeline }
    }

    /// Build the router with all routes and layers
    pub fn router(&self) -> Router {
        let api_state = Arc::new(ApiState {
            pipeline: Arc::clone(&self.pipeline),
        });

        // Read-only API; any origin may query it
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([Method::GET])
            .allow_headers([HeaderName::from_static("content-type")]);

        api::routes(api_state).layer(cors)
    }

    /// Bind the listener and serve in a background task.
    ///
    /// Binding happens before returning so that address errors surface to the
    /// caller; the returned handle stops the server gracefully.
    pub async fn start(self) -> Result<ListenerHandle> {
        // Host is taken verbatim: IPv4/IPv6 literals and resolvable names
        let host = self.settings.host.as_str();
        let port = self.settings.port;
        let listener = tokio::net::TcpListener::bind((host, port))
            .await
            .with_context(|| format!("Failed to bind {}:{}", host, port))?;
        let local_addr = listener
            .local_addr()
            .context("Failed to read bound address")?;

        let app = self.router();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();

        tracing::info!("Web server listening on http://{}", local_addr);

        let task = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = stop_rx.await;
                })
                .await
                .context("Web server failed")
        });

        Ok(ListenerHandle::new(stop_tx, task))
    }
}
