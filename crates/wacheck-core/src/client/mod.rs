//! Capability interface of the external session client.
//!
//! The client is treated as a black box with its own internal concurrency.
//! `SessionManager` is the only owner of an instance; everything else reaches
//! it through the manager's readiness gate.

mod demo;

use std::future::Future;

use anyhow::Result;
use serde::Deserialize;
use tokio::sync::mpsc;

use crate::lookup::Identifier;

pub use demo::{DemoClient, DemoProfile, PairingMode};

/// Lifecycle signals emitted by a session client while it establishes
/// (and later loses) its session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientSignal {
    /// An out-of-band pairing step is needed; `code` must be presented to the operator
    CredentialRequired { code: String },
    /// The presented credential was accepted (or a stored one was restored)
    Authenticated,
    /// The session is fully established and can serve queries
    Ready,
    /// The remote side rejected authentication
    AuthFailure { message: String },
    /// The session dropped
    Disconnected { reason: String },
}

/// Public contact metadata as reported upstream
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    /// Display name chosen by the user
    #[serde(default)]
    pub pushname: Option<String>,
    /// Canonical number as the network formats it
    #[serde(default)]
    pub number: Option<String>,
    /// Whether the account is a business account
    #[serde(default)]
    pub is_business: bool,
}

/// Trait for external session clients
///
/// `initialize` may take a long time; progress is reported through the
/// signal channel rather than the return value. `destroy` is only called by
/// the manager once the session was actually brought up.
pub trait SessionClient: Send + Sync + 'static {
    /// Launch the underlying resource and begin establishing the session
    fn initialize(
        &self,
        signals: mpsc::UnboundedSender<ClientSignal>,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Whether the identifier has an account on the network
    fn is_registered_user(&self, id: &Identifier) -> impl Future<Output = Result<bool>> + Send;

    /// Fetch contact metadata for a registered identifier
    fn get_contact_by_id(&self, id: &Identifier) -> impl Future<Output = Result<Contact>> + Send;

    /// Fetch the avatar URL. `Ok(None)` means the user has no (visible) avatar.
    fn get_profile_pic_url(
        &self,
        id: &Identifier,
    ) -> impl Future<Output = Result<Option<String>>> + Send;

    /// Release the underlying resource
    fn destroy(&self) -> impl Future<Output = Result<()>> + Send;
}
