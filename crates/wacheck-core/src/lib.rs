//! Core library for wacheck.
//!
//! Owns the three pieces with real invariants: the session lifecycle state
//! machine around the single external client, the request-coalescing lookup
//! cache, and the shutdown coordinator. Transport and configuration live in
//! the `wacheck` binary crate.

pub mod cache;
pub mod client;
pub mod error;
pub mod lookup;
pub mod session;
pub mod shutdown;

pub use cache::{CacheStats, CacheStatus, LookupCache};
pub use client::{ClientSignal, Contact, SessionClient};
pub use error::LookupError;
pub use lookup::{Identifier, LookupOutcome, LookupPipeline, LookupResult, LookupSource, Profile};
pub use session::{SessionEvent, SessionManager, SessionState, SessionStatus};
pub use shutdown::{ListenerHandle, ShutdownCoordinator, ShutdownReason};
