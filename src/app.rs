//! Process wiring: build components in dependency order, serve, tear down

use std::sync::Arc;
use std::time::Duration;

use wacheck_core::{
    LookupCache, LookupPipeline, SessionClient, SessionManager, ShutdownCoordinator,
    ShutdownReason,
};

use crate::config::Settings;
use crate::pairing;
use crate::web::WebServer;

/// Run the service until a signal or a fatal session error; returns the exit code
pub async fn run<C: SessionClient>(settings: Settings, client: C) -> i32 {
    let coordinator =
        ShutdownCoordinator::new(Duration::from_secs(settings.server.shutdown_grace_secs));

    let cache = LookupCache::new(settings.cache.ttl(), settings.cache.max_entries);
    coordinator.attach_cache(cache.clone());
    coordinator.attach_task(cache.spawn_sweeper(settings.cache.sweep_interval()));

    let session = Arc::new(SessionManager::new(client));
    coordinator.attach_session(Arc::clone(&session));
    coordinator.attach_task(pairing::spawn_presenter(session.subscribe()));
    // Before the listener: lookups must never see an unstarted session
    session.start();

    let pipeline = Arc::new(LookupPipeline::new(Arc::clone(&session), cache));
    match WebServer::new(settings.server.clone(), pipeline).start().await {
        Ok(listener) => coordinator.attach_listener(listener),
        Err(e) => {
            return coordinator
                .shutdown(ShutdownReason::Fatal(format!("{:#}", e)))
                .await
        }
    }

    let reason = tokio::select! {
        reason = wait_for_signal() => reason,
        reason = supervise_session(&session, settings.session.ready_timeout()) => reason,
    };
    coordinator.shutdown(reason).await
}

/// Resolve with a fatal reason if the session never becomes ready.
///
/// Once ready, a later disconnect only degrades service, so this never
/// resolves after that point.
async fn supervise_session<C: SessionClient>(
    session: &SessionManager<C>,
    ready_timeout: Option<Duration>,
) -> ShutdownReason {
    if let Err(e) = session.await_ready(ready_timeout).await {
        let detail = session.status().detail.unwrap_or_else(|| e.to_string());
        return ShutdownReason::Fatal(format!("session setup failed: {}", detail));
    }
    tracing::info!("Session ready; serving lookups");

    let mut status = session.watch();
    let lost = status
        .wait_for(|s| s.state.is_terminal())
        .await
        .map(|s| s.state);
    if let Ok(state) = lost {
        tracing::warn!(%state, "Session lost; only cached results can be served");
    }
    std::future::pending().await
}

async fn wait_for_signal() -> ShutdownReason {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => tokio::select! {
                reason = ctrl_c() => reason,
                _ = sigterm.recv() => ShutdownReason::Signal("SIGTERM"),
            },
            Err(e) => {
                tracing::warn!("Failed to install SIGTERM handler: {}", e);
                ctrl_c().await
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c().await
    }
}

async fn ctrl_c() -> ShutdownReason {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to install Ctrl-C handler: {}", e);
        std::future::pending::<()>().await;
    }
    ShutdownReason::Signal("SIGINT")
}
