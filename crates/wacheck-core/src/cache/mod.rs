//! Time-bounded, request-coalescing lookup cache

mod store;

pub use store::{CacheStats, CacheStatus, LookupCache};
