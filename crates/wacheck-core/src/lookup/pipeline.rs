use std::sync::Arc;

use crate::cache::LookupCache;
use crate::client::SessionClient;
use crate::error::LookupError;
use crate::session::SessionManager;

use super::identifier::Identifier;
use super::types::LookupOutcome;

/// Per-request orchestration: validate, consult the cache, coalesce misses
/// into one gated upstream query. Holds no state of its own.
pub struct LookupPipeline<C: SessionClient> {
    session: Arc<SessionManager<C>>,
    cache: LookupCache,
}

impl<C: SessionClient> LookupPipeline<C> {
    pub fn new(session: Arc<SessionManager<C>>, cache: LookupCache) -> Self {
        Self { session, cache }
    }

    pub fn session(&self) -> &Arc<SessionManager<C>> {
        &self.session
    }

    pub fn cache(&self) -> &LookupCache {
        &self.cache
    }

    /// Handle one lookup request
    ///
    /// Invalid input never reaches the cache or the session. Failures are
    /// logged with the identifier and cause only.
    pub async fn handle(&self, raw: &str) -> Result<LookupOutcome, LookupError> {
        let id = match Identifier::parse(raw) {
            Ok(id) => id,
            Err(err) => {
                tracing::debug!(input = %raw, "Rejected invalid identifier");
                return Err(err);
            }
        };

        let session = Arc::clone(&self.session);
        let outcome = self
            .cache
            .get_or_compute(id.clone(), move |key| async move {
                session.query(&key).await
            })
            .await;

        match outcome {
            Ok((result, status)) => {
                tracing::debug!(
                    identifier = %id,
                    cache = status.as_header(),
                    registered = result.is_registered(),
                    "Lookup served"
                );
                Ok(LookupOutcome {
                    result,
                    source: status.into(),
                })
            }
            Err(err @ LookupError::NotReady { .. }) => {
                tracing::debug!(identifier = %id, "Lookup rejected: {}", err);
                Err(err)
            }
            Err(err) => {
                tracing::error!(
                    identifier = %id,
                    category = err.category(),
                    cause = %err,
                    "Lookup failed"
                );
                Err(err)
            }
        }
    }
}
