//! Subprocess automation bridge speaking newline-delimited JSON

mod client;
pub mod protocol;

pub use client::BridgeClient;
