//! Session lifecycle management for the single external client

mod events;
mod manager;
mod state;

pub use events::SessionEvent;
pub use manager::SessionManager;
pub use state::{SessionState, SessionStatus, Trigger};
