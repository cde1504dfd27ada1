//! Push notifications emitted by the session manager.
//!
//! Consumers call [`SessionManager::subscribe`](super::SessionManager::subscribe)
//! to receive these via a `broadcast::Receiver`. The pairing code is one of
//! them so that any presentation layer (terminal QR, web page, log) can show it.

use super::state::SessionState;

/// Events emitted by the session manager
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The session moved to a new state
    StateChanged {
        from: SessionState,
        to: SessionState,
        detail: Option<String>,
    },

    /// A pairing code must be presented to the operator
    CredentialRequired {
        /// Opaque pairing payload (typically encoded as a QR code)
        code: String,
    },
}
