//! SessionManager — sole owner of the external session client.
//!
//! All state transitions go through [`SessionState::next`], so a signal that
//! arrives in the wrong state is rejected and logged instead of corrupting the
//! lifecycle. Status is published on a `watch` channel (readiness gate) and
//! notable changes on a `broadcast` channel (presentation, supervision).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;

use super::events::SessionEvent;
use super::state::{SessionState, SessionStatus, Trigger};
use crate::client::{ClientSignal, SessionClient};
use crate::error::LookupError;
use crate::lookup::{Identifier, LookupResult, Profile};

/// Broadcast channel capacity for session events
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Drives the external session client through its lifecycle and gates queries
pub struct SessionManager<C: SessionClient> {
    client: C,
    status: watch::Sender<SessionStatus>,
    events: broadcast::Sender<SessionEvent>,
    /// Task that runs `initialize` and applies client signals
    driver: Mutex<Option<JoinHandle<()>>>,
    started: AtomicBool,
    shutting_down: AtomicBool,
    /// Set once the session reached Ready; only then is the client torn down
    brought_up: AtomicBool,
}

impl<C: SessionClient> SessionManager<C> {
    pub fn new(client: C) -> Self {
        let (status, _) = watch::channel(SessionStatus::default());
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            client,
            status,
            events,
            driver: Mutex::new(None),
            started: AtomicBool::new(false),
            shutting_down: AtomicBool::new(false),
            brought_up: AtomicBool::new(false),
        }
    }

    /// Borrow the underlying client
    pub fn client(&self) -> &C {
        &self.client
    }

    /// Current lifecycle state
    pub fn state(&self) -> SessionState {
        self.status.borrow().state
    }

    /// Current state plus detail
    pub fn status(&self) -> SessionStatus {
        self.status.borrow().clone()
    }

    pub fn is_ready(&self) -> bool {
        self.state() == SessionState::Ready
    }

    /// Watch status changes (readiness gate)
    pub fn watch(&self) -> watch::Receiver<SessionStatus> {
        self.status.subscribe()
    }

    /// Subscribe to session events.
    ///
    /// If the receiver falls behind, older events are dropped (lagged).
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Begin establishing the session. Idempotent.
    pub fn start(self: &Arc<Self>) {
        if self.started.swap(true, Ordering::SeqCst) {
            tracing::debug!("Session already started");
            return;
        }

        self.transition(Trigger::Start, None);

        let manager = Arc::clone(self);
        let task = tokio::spawn(async move {
            manager.drive().await;
        });
        *self.driver.lock() = Some(task);
    }

    /// Run `initialize` while applying the signals it produces
    async fn drive(&self) {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let init = self.client.initialize(tx);
        tokio::pin!(init);
        let mut launched = false;

        loop {
            tokio::select! {
                result = &mut init, if !launched => {
                    launched = true;
                    if let Err(e) = result {
                        self.fail_setup(e);
                        return;
                    }
                    tracing::debug!("Session client launched");
                }
                signal = rx.recv() => match signal {
                    Some(signal) => self.apply_signal(signal),
                    None => {
                        if !launched {
                            if let Err(e) = init.as_mut().await {
                                self.fail_setup(e);
                            }
                        }
                        tracing::debug!("Session client signal channel closed");
                        return;
                    }
                },
            }
        }
    }

    fn fail_setup(&self, err: anyhow::Error) {
        self.transition(Trigger::SetupFailed, Some(format!("{:#}", err)));
    }

    fn apply_signal(&self, signal: ClientSignal) {
        match signal {
            ClientSignal::CredentialRequired { code } => {
                if self.transition(Trigger::CredentialRequested, None) {
                    let _ = self.events.send(SessionEvent::CredentialRequired { code });
                }
            }
            ClientSignal::Authenticated => {
                self.transition(Trigger::CredentialAccepted, None);
            }
            ClientSignal::Ready => {
                self.transition(Trigger::HandshakeSucceeded, None);
            }
            ClientSignal::AuthFailure { message } => {
                self.transition(Trigger::HandshakeRejected, Some(message));
            }
            ClientSignal::Disconnected { reason } => {
                // Losing the session before it was ever usable is a setup failure
                let trigger = if self.is_ready() {
                    Trigger::ConnectionLost
                } else {
                    Trigger::SetupFailed
                };
                self.transition(trigger, Some(reason));
            }
        }
    }

    /// Apply a transition; returns false (and logs) if it is illegal
    fn transition(&self, trigger: Trigger, detail: Option<String>) -> bool {
        let mut change = None;
        self.status.send_if_modified(|status| match status.state.next(trigger) {
            Some(to) => {
                change = Some((status.state, to));
                if to == SessionState::Ready {
                    self.brought_up.store(true, Ordering::SeqCst);
                }
                status.state = to;
                status.detail = detail.clone();
                true
            }
            None => false,
        });

        let Some((from, to)) = change else {
            tracing::warn!(state = %self.state(), ?trigger, "Ignoring illegal session transition");
            return false;
        };
        if from == to {
            return true;
        }

        match (to, trigger) {
            (SessionState::Failed, _) => tracing::error!(
                from = %from,
                detail = detail.as_deref().unwrap_or(""),
                "Session failed"
            ),
            (SessionState::Disconnected, Trigger::ConnectionLost) => tracing::warn!(
                reason = detail.as_deref().unwrap_or(""),
                "Session disconnected; lookups will report not ready until restart"
            ),
            _ => tracing::info!(from = %from, to = %to, "Session state changed"),
        }

        let _ = self
            .events
            .send(SessionEvent::StateChanged { from, to, detail });
        true
    }

    /// Wait until the session is Ready or terminal.
    ///
    /// Does not block other callers. Fails if a terminal state is reached
    /// or the timeout elapses first.
    pub async fn await_ready(&self, timeout: Option<Duration>) -> Result<(), LookupError> {
        let mut rx = self.status.subscribe();
        let wait = async move {
            rx.wait_for(|s| s.state == SessionState::Ready || s.state.is_terminal())
                .await
                .map(|s| s.state)
        };

        let outcome = match timeout {
            Some(limit) => match tokio::time::timeout(limit, wait).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    return Err(LookupError::NotReady {
                        state: self.state(),
                    })
                }
            },
            None => wait.await,
        };

        match outcome {
            Ok(SessionState::Ready) => Ok(()),
            Ok(state) => Err(LookupError::NotReady { state }),
            Err(_) => Err(LookupError::NotReady {
                state: self.state(),
            }),
        }
    }

    /// Look up an identifier through the client. Only valid while Ready.
    ///
    /// A failure in any of the calls fails the whole lookup; absent fields
    /// are normalized to `None` but a failed fetch is never papered over.
    pub async fn query(&self, id: &Identifier) -> Result<LookupResult, LookupError> {
        let state = self.state();
        if state != SessionState::Ready {
            return Err(LookupError::NotReady { state });
        }

        let registered = self
            .client
            .is_registered_user(id)
            .await
            .map_err(LookupError::query)?;
        if !registered {
            return Ok(LookupResult::NotRegistered);
        }

        let contact = self
            .client
            .get_contact_by_id(id)
            .await
            .map_err(LookupError::query)?;
        let avatar_url = self
            .client
            .get_profile_pic_url(id)
            .await
            .map_err(LookupError::query)?;

        Ok(LookupResult::Registered(Profile::from_contact(
            contact, avatar_url,
        )))
    }

    /// Tear the session down. Idempotent and safe from every state.
    ///
    /// The client is destroyed only if the session reached Ready; a
    /// half-initialized or never-launched client is left alone.
    pub async fn shutdown(&self) {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            tracing::debug!("Session shutdown already requested");
            return;
        }

        let driver = self.driver.lock().take();
        if let Some(task) = driver {
            task.abort();
        }

        let state = self.state();
        if !state.is_terminal() {
            self.transition(Trigger::Shutdown, Some("shutdown requested".to_string()));
        }

        if self.brought_up.load(Ordering::SeqCst) {
            match self.client.destroy().await {
                Ok(()) => tracing::info!("Session client destroyed"),
                Err(e) => tracing::warn!("Failed to destroy session client: {:#}", e),
            }
        } else {
            tracing::info!(state = %state, "Session never became ready; skipping client teardown");
        }
    }
}
