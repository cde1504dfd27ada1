use std::fmt;

use serde::Serialize;

/// Lifecycle state of the external session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// `start()` has not been called
    #[default]
    Uninitialized,
    /// Waiting for the operator to complete the out-of-band pairing step
    AwaitingCredential,
    /// Client launched, handshake in progress
    Authenticating,
    /// Serving queries
    Ready,
    /// Session lost or shut down; terminal for serving
    Disconnected,
    /// Session could not be established; terminal
    Failed,
}

impl SessionState {
    /// No transition leaves a terminal state
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Disconnected | SessionState::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::Uninitialized => "uninitialized",
            SessionState::AwaitingCredential => "awaiting_credential",
            SessionState::Authenticating => "authenticating",
            SessionState::Ready => "ready",
            SessionState::Disconnected => "disconnected",
            SessionState::Failed => "failed",
        }
    }

    /// Transition table. `None` means the trigger is illegal in this state.
    pub fn next(self, trigger: Trigger) -> Option<SessionState> {
        use SessionState::*;

        match (self, trigger) {
            (Uninitialized, Trigger::Start) => Some(Authenticating),
            // The need for pairing is only known once the client is up.
            // A refreshed code keeps the session in AwaitingCredential.
            (Authenticating | AwaitingCredential, Trigger::CredentialRequested) => {
                Some(AwaitingCredential)
            }
            (AwaitingCredential | Authenticating, Trigger::CredentialAccepted) => {
                Some(Authenticating)
            }
            (Authenticating, Trigger::HandshakeSucceeded) => Some(Ready),
            (
                Uninitialized | AwaitingCredential | Authenticating,
                Trigger::HandshakeRejected | Trigger::SetupFailed,
            ) => Some(Failed),
            (Ready, Trigger::ConnectionLost) => Some(Disconnected),
            (state, Trigger::Shutdown) if !state.is_terminal() => Some(Disconnected),
            _ => None,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Events that drive [`SessionState`] transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Start,
    CredentialRequested,
    CredentialAccepted,
    HandshakeSucceeded,
    HandshakeRejected,
    SetupFailed,
    ConnectionLost,
    Shutdown,
}

/// Snapshot of the session published to watchers
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionStatus {
    pub state: SessionState,
    /// Human-readable detail for the last transition (failure cause, disconnect reason)
    pub detail: Option<String>,
}
