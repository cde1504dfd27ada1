//! Lookup types and the per-request pipeline

mod identifier;
mod pipeline;
mod types;

pub use identifier::Identifier;
pub use pipeline::LookupPipeline;
pub use types::{LookupOutcome, LookupResult, LookupSource, Profile};
