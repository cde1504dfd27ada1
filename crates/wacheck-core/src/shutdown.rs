//! Ordered teardown of transport, session and cache.
//!
//! Components are attached as they are constructed, so the coordinator can
//! run at any point of startup: whatever was never attached is skipped.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::cache::LookupCache;
use crate::client::SessionClient;
use crate::session::SessionManager;

/// Why the process is going down
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownReason {
    /// Voluntary termination (SIGINT, SIGTERM)
    Signal(&'static str),
    /// Unrecoverable startup or session setup error
    Fatal(String),
}

impl ShutdownReason {
    pub fn exit_code(&self) -> i32 {
        match self {
            ShutdownReason::Signal(_) => 0,
            ShutdownReason::Fatal(_) => 1,
        }
    }
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownReason::Signal(name) => write!(f, "received {}", name),
            ShutdownReason::Fatal(detail) => write!(f, "fatal error: {}", detail),
        }
    }
}

/// Handle to a running transport listener
pub struct ListenerHandle {
    stop_tx: oneshot::Sender<()>,
    task: JoinHandle<Result<()>>,
}

impl ListenerHandle {
    /// `stop_tx` asks the listener to stop accepting; `task` resolves once it has drained
    pub fn new(stop_tx: oneshot::Sender<()>, task: JoinHandle<Result<()>>) -> Self {
        Self { stop_tx, task }
    }

    /// Stop accepting connections and wait up to `grace` for in-flight requests
    pub async fn stop(self, grace: Duration) -> Result<()> {
        let Self { stop_tx, mut task } = self;
        // The listener may already have exited on its own
        let _ = stop_tx.send(());

        match tokio::time::timeout(grace, &mut task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => Err(anyhow!("listener task failed: {}", join_err)),
            Err(_) => {
                task.abort();
                Err(anyhow!("listener did not drain within {:?}", grace))
            }
        }
    }
}

/// Coordinates process teardown
pub struct ShutdownCoordinator<C: SessionClient> {
    grace: Duration,
    listener: Mutex<Option<ListenerHandle>>,
    session: Mutex<Option<Arc<SessionManager<C>>>>,
    cache: Mutex<Option<LookupCache>>,
    /// Background tasks (cache sweeper, event presenters) aborted after the listener stops
    tasks: Mutex<Vec<JoinHandle<()>>>,
    started: AtomicBool,
}

impl<C: SessionClient> ShutdownCoordinator<C> {
    /// `grace` bounds how long the listener may take to drain
    pub fn new(grace: Duration) -> Self {
        Self {
            grace,
            listener: Mutex::new(None),
            session: Mutex::new(None),
            cache: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
        }
    }

    pub fn attach_listener(&self, listener: ListenerHandle) {
        *self.listener.lock() = Some(listener);
    }

    pub fn attach_session(&self, session: Arc<SessionManager<C>>) {
        *self.session.lock() = Some(session);
    }

    pub fn attach_cache(&self, cache: LookupCache) {
        *self.cache.lock() = Some(cache);
    }

    pub fn attach_task(&self, task: JoinHandle<()>) {
        self.tasks.lock().push(task);
    }

    /// Tear everything down and return the process exit code.
    ///
    /// Steps run in order, each on its own: a missing or failing component
    /// never skips the ones after it. Only the first call does any work.
    pub async fn shutdown(&self, reason: ShutdownReason) -> i32 {
        let exit_code = reason.exit_code();
        if self.started.swap(true, Ordering::SeqCst) {
            tracing::debug!(%reason, "Shutdown already in progress");
            return exit_code;
        }

        match &reason {
            ShutdownReason::Signal(_) => tracing::info!(%reason, "Shutting down"),
            ShutdownReason::Fatal(_) => tracing::error!(%reason, "Shutting down"),
        }

        // 1. Stop accepting new requests
        let listener = self.listener.lock().take();
        match listener {
            Some(listener) => match listener.stop(self.grace).await {
                Ok(()) => tracing::info!("Listener stopped"),
                Err(e) => tracing::warn!("Listener stop failed: {:#}", e),
            },
            None => tracing::debug!("No listener attached"),
        }

        let tasks: Vec<_> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            task.abort();
        }

        // 2. Tear down the session
        let session = self.session.lock().take();
        match session {
            Some(session) => session.shutdown().await,
            None => tracing::debug!("No session attached"),
        }

        // 3. Dispose of cached results
        let cache = self.cache.lock().take();
        match cache {
            Some(cache) => cache.flush(),
            None => tracing::debug!("No cache attached"),
        }

        tracing::info!(exit_code, "Shutdown complete");
        exit_code
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{DemoClient, PairingMode};
    use crate::lookup::Identifier;
    use crate::session::SessionState;

    const GRACE: Duration = Duration::from_secs(1);

    fn listener() -> (ListenerHandle, Arc<AtomicBool>) {
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let stopped = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stopped);
        let task = tokio::spawn(async move {
            let _ = stop_rx.await;
            flag.store(true, Ordering::SeqCst);
            Ok(())
        });
        (ListenerHandle::new(stop_tx, task), stopped)
    }

    #[tokio::test]
    async fn test_exit_codes() {
        assert_eq!(ShutdownReason::Signal("SIGTERM").exit_code(), 0);
        assert_eq!(ShutdownReason::Fatal("boom".to_string()).exit_code(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_with_nothing_attached() {
        let coordinator: ShutdownCoordinator<DemoClient> = ShutdownCoordinator::new(GRACE);
        let code = coordinator
            .shutdown(ShutdownReason::Fatal("session construction failed".to_string()))
            .await;
        assert_eq!(code, 1);
    }

    #[tokio::test]
    async fn test_full_shutdown_order() {
        let coordinator = ShutdownCoordinator::new(GRACE);

        let (handle, stopped) = listener();
        coordinator.attach_listener(handle);

        let session = Arc::new(SessionManager::new(DemoClient::new()));
        session.start();
        session
            .await_ready(Some(Duration::from_secs(5)))
            .await
            .unwrap();
        coordinator.attach_session(Arc::clone(&session));

        let cache = LookupCache::new(Duration::from_secs(60), 10);
        let key = Identifier::parse("1555").unwrap();
        cache
            .get_or_compute(key.clone(), |_| async {
                Ok(crate::lookup::LookupResult::NotRegistered)
            })
            .await
            .unwrap();
        coordinator.attach_cache(cache.clone());

        let sweeper = cache.spawn_sweeper(Duration::from_secs(1));
        coordinator.attach_task(sweeper);

        let code = coordinator.shutdown(ShutdownReason::Signal("SIGINT")).await;
        assert_eq!(code, 0);
        assert!(stopped.load(Ordering::SeqCst));
        assert_eq!(session.state(), SessionState::Disconnected);
        assert!(session.client().was_destroyed());
        assert!(cache.get(&key).is_none());
    }

    #[tokio::test]
    async fn test_shutdown_before_ready_skips_client_teardown() {
        let coordinator = ShutdownCoordinator::new(GRACE);
        let session = Arc::new(SessionManager::new(DemoClient::new().with_pairing(
            PairingMode::Manual {
                code: "pair-me".to_string(),
            },
        )));
        session.start();
        coordinator.attach_session(Arc::clone(&session));

        let code = coordinator.shutdown(ShutdownReason::Signal("SIGTERM")).await;
        assert_eq!(code, 0);
        assert!(!session.client().was_destroyed());
        assert!(session.state().is_terminal());
    }

    #[tokio::test]
    async fn test_second_shutdown_is_noop() {
        let coordinator = ShutdownCoordinator::new(GRACE);
        let session = Arc::new(SessionManager::new(DemoClient::new()));
        coordinator.attach_session(Arc::clone(&session));

        assert_eq!(
            coordinator.shutdown(ShutdownReason::Signal("SIGINT")).await,
            0
        );
        assert_eq!(
            coordinator
                .shutdown(ShutdownReason::Fatal("late".to_string()))
                .await,
            1
        );
        assert_eq!(session.state(), SessionState::Disconnected);
    }

    #[tokio::test]
    async fn test_listener_that_never_drains_is_aborted() {
        let (stop_tx, _stop_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async {
            std::future::pending::<()>().await;
            Ok(())
        });
        let handle = ListenerHandle::new(stop_tx, task);

        let err = handle.stop(Duration::from_millis(20)).await.unwrap_err();
        assert!(err.to_string().contains("did not drain"));
    }
}
