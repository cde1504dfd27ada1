//! HTTP transport for identifier lookups
//!
//! Provides `GET /check/{identifier}` and an operator `GET /status` view.

mod api;
mod server;

pub use api::X_CACHE_STATUS;
pub use server::WebServer;
