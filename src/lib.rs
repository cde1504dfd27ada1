//! wacheck — cached identifier lookups over a single long-lived messaging session
//!
//! The session, cache and shutdown logic live in `wacheck-core`; this crate
//! adds configuration, the HTTP transport, the bridge-backed client and the
//! terminal pairing presenter.

pub mod app;
pub mod bridge;
pub mod config;
pub mod pairing;
pub mod web;
