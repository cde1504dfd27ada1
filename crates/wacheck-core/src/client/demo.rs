//! Scripted in-memory session client.
//!
//! Runs the full lifecycle (optional pairing, authentication, ready) without
//! any external process. Backs `wacheck demo` and the test suites.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use parking_lot::Mutex;
use tokio::sync::{mpsc, Notify};

use super::{ClientSignal, Contact, SessionClient};
use crate::lookup::Identifier;

/// How the demo client handles the pairing step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PairingMode {
    /// A stored credential is restored; no pairing code is shown
    Restored,
    /// Show a code and accept it automatically after the delay
    Auto { code: String, delay: Duration },
    /// Show a code and wait for [`DemoClient::approve_pairing`]
    Manual { code: String },
}

/// A registered identifier in the demo directory
#[derive(Debug, Clone, Default)]
pub struct DemoProfile {
    pub contact: Contact,
    pub avatar_url: Option<String>,
}

impl DemoProfile {
    pub fn new(pushname: Option<&str>, number: &str) -> Self {
        Self {
            contact: Contact {
                pushname: pushname.map(str::to_string),
                number: Some(number.to_string()),
                is_business: false,
            },
            avatar_url: None,
        }
    }

    pub fn business(mut self) -> Self {
        self.contact.is_business = true;
        self
    }

    pub fn with_avatar(mut self, url: &str) -> Self {
        self.avatar_url = Some(url.to_string());
        self
    }
}

/// Scripted session client
pub struct DemoClient {
    directory: HashMap<String, DemoProfile>,
    pairing: PairingMode,
    latency: Duration,
    setup_error: Option<String>,
    auth_failure: Option<String>,
    failing_avatars: HashSet<String>,
    pairing_approved: Arc<Notify>,
    signals: Mutex<Option<mpsc::UnboundedSender<ClientSignal>>>,
    initialized: AtomicBool,
    destroyed: AtomicBool,
    registration_checks: AtomicUsize,
    contact_fetches: AtomicUsize,
}

impl Default for DemoClient {
    fn default() -> Self {
        Self::new()
    }
}

impl DemoClient {
    /// Empty directory, restored credential, no latency
    pub fn new() -> Self {
        Self {
            directory: HashMap::new(),
            pairing: PairingMode::Restored,
            latency: Duration::ZERO,
            setup_error: None,
            auth_failure: None,
            failing_avatars: HashSet::new(),
            pairing_approved: Arc::new(Notify::new()),
            signals: Mutex::new(None),
            initialized: AtomicBool::new(false),
            destroyed: AtomicBool::new(false),
            registration_checks: AtomicUsize::new(0),
            contact_fetches: AtomicUsize::new(0),
        }
    }

    /// Client used by `wacheck demo`: a short pairing step, a few registered
    /// numbers and enough latency to make caching visible
    pub fn showcase() -> Self {
        Self::new()
            .with_pairing(PairingMode::Auto {
                code: "wacheck-demo-pairing-code".to_string(),
                delay: Duration::from_secs(3),
            })
            .with_latency(Duration::from_millis(400))
            .with_registered("15559999999", DemoProfile::new(Some("Alice"), "15559999999"))
            .with_registered(
                "15550000001",
                DemoProfile::new(Some("Bob's Bakery"), "15550000001")
                    .business()
                    .with_avatar("https://example.invalid/avatars/bob.jpg"),
            )
            .with_registered("15550000002", DemoProfile::new(None, "15550000002"))
    }

    pub fn with_registered(mut self, id: &str, profile: DemoProfile) -> Self {
        self.directory.insert(id.to_string(), profile);
        self
    }

    pub fn with_pairing(mut self, pairing: PairingMode) -> Self {
        self.pairing = pairing;
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Make `initialize` itself fail
    pub fn with_setup_error(mut self, message: &str) -> Self {
        self.setup_error = Some(message.to_string());
        self
    }

    /// Launch successfully, then report an authentication failure
    pub fn with_auth_failure(mut self, message: &str) -> Self {
        self.auth_failure = Some(message.to_string());
        self
    }

    /// Make avatar lookups for this identifier fail
    pub fn with_failing_avatar(mut self, id: &str) -> Self {
        self.failing_avatars.insert(id.to_string());
        self
    }

    /// Accept the pending pairing code (for [`PairingMode::Manual`])
    pub fn approve_pairing(&self) {
        self.pairing_approved.notify_one();
    }

    /// Simulate the network dropping the session
    pub fn disconnect(&self, reason: &str) {
        if let Some(tx) = self.signals.lock().as_ref() {
            let _ = tx.send(ClientSignal::Disconnected {
                reason: reason.to_string(),
            });
        }
    }

    /// Number of registration checks served (one per upstream lookup)
    pub fn registration_checks(&self) -> usize {
        self.registration_checks.load(Ordering::SeqCst)
    }

    pub fn contact_fetches(&self) -> usize {
        self.contact_fetches.load(Ordering::SeqCst)
    }

    pub fn was_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    pub fn was_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    async fn simulate_latency(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }
}

impl SessionClient for DemoClient {
    async fn initialize(&self, signals: mpsc::UnboundedSender<ClientSignal>) -> Result<()> {
        if let Some(message) = &self.setup_error {
            bail!("{}", message);
        }
        self.initialized.store(true, Ordering::SeqCst);
        *self.signals.lock() = Some(signals.clone());

        let pairing = self.pairing.clone();
        let auth_failure = self.auth_failure.clone();
        let approved = Arc::clone(&self.pairing_approved);

        tokio::spawn(async move {
            match pairing {
                PairingMode::Restored => {}
                PairingMode::Auto { code, delay } => {
                    let _ = signals.send(ClientSignal::CredentialRequired { code });
                    tokio::time::sleep(delay).await;
                }
                PairingMode::Manual { code } => {
                    let _ = signals.send(ClientSignal::CredentialRequired { code });
                    approved.notified().await;
                }
            }

            if let Some(message) = auth_failure {
                let _ = signals.send(ClientSignal::AuthFailure { message });
                return;
            }
            let _ = signals.send(ClientSignal::Authenticated);
            let _ = signals.send(ClientSignal::Ready);
        });

        Ok(())
    }

    async fn is_registered_user(&self, id: &Identifier) -> Result<bool> {
        self.registration_checks.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency().await;
        Ok(self.directory.contains_key(id.as_str()))
    }

    async fn get_contact_by_id(&self, id: &Identifier) -> Result<Contact> {
        self.contact_fetches.fetch_add(1, Ordering::SeqCst);
        match self.directory.get(id.as_str()) {
            Some(profile) => Ok(profile.contact.clone()),
            None => bail!("no contact for {}", id),
        }
    }

    async fn get_profile_pic_url(&self, id: &Identifier) -> Result<Option<String>> {
        if self.failing_avatars.contains(id.as_str()) {
            bail!("profile picture request timed out");
        }
        Ok(self
            .directory
            .get(id.as_str())
            .and_then(|p| p.avatar_url.clone()))
    }

    async fn destroy(&self) -> Result<()> {
        self.destroyed.store(true, Ordering::SeqCst);
        *self.signals.lock() = None;
        Ok(())
    }
}
