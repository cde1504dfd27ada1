//! REST API handlers for lookups and status

use axum::{
    extract::{rejection::PathRejection, Path, State},
    http::{header, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use serde::Serialize;
use std::sync::Arc;

use wacheck_core::{
    CacheStats, LookupError, LookupPipeline, LookupResult, LookupSource, SessionClient,
    SessionState,
};

/// Response header carrying HIT or MISS
pub const X_CACHE_STATUS: HeaderName = HeaderName::from_static("x-cache-status");

/// Body for every unexpected failure; never carries details
const INTERNAL_ERROR_MESSAGE: &str = "An internal server error occurred.";

/// Seconds a client should wait before retrying a not-ready lookup
const NOT_READY_RETRY_AFTER_SECS: &str = "5";

/// Shared application state for API handlers
pub struct ApiState<C: SessionClient> {
    pub pipeline: Arc<LookupPipeline<C>>,
}

/// Successful lookup body
#[derive(Debug, Serialize)]
pub struct CheckResponse<'a> {
    pub success: bool,
    pub result: &'a LookupResult,
    pub source: LookupSource,
}

/// Operator status body
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub state: SessionState,
    pub detail: Option<String>,
    pub cached_entries: usize,
    pub ttl_seconds: u64,
    pub cache: CacheStats,
}

/// Lookup and status routes over shared state
pub fn routes<C: SessionClient>(state: Arc<ApiState<C>>) -> Router {
    Router::new()
        // An empty identifier is a validation failure, not an unknown route
        .route("/check/", get(check_identifier::<C>))
        .route("/check/{identifier}", get(check_identifier::<C>))
        .route("/status", get(get_status::<C>))
        .with_state(state)
}

/// Helper to create JSON failure responses
fn json_error(status: StatusCode, body: serde_json::Value) -> Response {
    (status, Json(body)).into_response()
}

/// Map a pipeline error to its response. Every shape carries `success:false`.
fn error_response(err: &LookupError) -> Response {
    match err {
        LookupError::Validation { .. } => json_error(
            StatusCode::BAD_REQUEST,
            serde_json::json!({"success": false, "error": "validation"}),
        ),
        LookupError::NotReady { state } => {
            let mut response = json_error(
                StatusCode::SERVICE_UNAVAILABLE,
                serde_json::json!({"success": false, "error": "not_ready", "state": state}),
            );
            response.headers_mut().insert(
                header::RETRY_AFTER,
                HeaderValue::from_static(NOT_READY_RETRY_AFTER_SECS),
            );
            response
        }
        LookupError::Query { .. } | LookupError::SetupFailure { .. } => json_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            serde_json::json!({"success": false, "error": INTERNAL_ERROR_MESSAGE}),
        ),
    }
}

/// GET /check/{identifier}
pub async fn check_identifier<C: SessionClient>(
    State(state): State<Arc<ApiState<C>>>,
    identifier: Result<Path<String>, PathRejection>,
) -> Response {
    // Undecodable segments (e.g. invalid UTF-8) and the empty route both
    // go through the pipeline's own validation
    let identifier = match identifier {
        Ok(Path(identifier)) => identifier,
        Err(rejection) => {
            tracing::debug!(%rejection, "Identifier could not be extracted from path");
            String::new()
        }
    };

    match state.pipeline.handle(&identifier).await {
        Ok(outcome) => {
            let cache_status = outcome.source.cache_status().as_header();
            let body = CheckResponse {
                success: true,
                result: &outcome.result,
                source: outcome.source,
            };
            (
                StatusCode::OK,
                [(X_CACHE_STATUS, HeaderValue::from_static(cache_status))],
                Json(body),
            )
                .into_response()
        }
        Err(err) => error_response(&err),
    }
}

/// GET /status
pub async fn get_status<C: SessionClient>(
    State(state): State<Arc<ApiState<C>>>,
) -> Json<StatusResponse> {
    let status = state.pipeline.session().status();
    let cache = state.pipeline.cache();
    let stats = cache.stats();
    Json(StatusResponse {
        state: status.state,
        detail: status.detail,
        cached_entries: stats.entries,
        ttl_seconds: cache.ttl().as_secs(),
        cache: stats,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use http::Request;
    use http_body_util::BodyExt;
    use pretty_assertions::assert_eq;
    use std::time::Duration;
    use tower::ServiceExt;
    use wacheck_core::client::{DemoClient, DemoProfile, PairingMode};
    use wacheck_core::{LookupCache, SessionManager};

    fn demo_client() -> DemoClient {
        DemoClient::new()
            .with_registered("15559999999", DemoProfile::new(Some("Alice"), "15559999999"))
    }

    fn pipeline_for(client: DemoClient) -> Arc<LookupPipeline<DemoClient>> {
        let session = Arc::new(SessionManager::new(client));
        session.start();
        Arc::new(LookupPipeline::new(
            session,
            LookupCache::new(Duration::from_secs(3600), 100),
        ))
    }

    async fn ready_pipeline(client: DemoClient) -> Arc<LookupPipeline<DemoClient>> {
        let pipeline = pipeline_for(client);
        pipeline
            .session()
            .await_ready(Some(Duration::from_secs(5)))
            .await
            .unwrap();
        pipeline
    }

    /// Build a Router with the API routes
    fn test_router(pipeline: Arc<LookupPipeline<DemoClient>>) -> Router {
        routes(Arc::new(ApiState { pipeline }))
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, http::HeaderMap, serde_json::Value) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, headers, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_unregistered_then_cache_hit() {
        let app = test_router(ready_pipeline(demo_client()).await);

        let (status, headers, body) = get_json(app.clone(), "/check/15551234567").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers[&X_CACHE_STATUS], "MISS");
        assert_eq!(
            body,
            serde_json::json!({"success": true, "result": {"registered": false}, "source": "live"})
        );

        let (status, headers, body) = get_json(app, "/check/15551234567").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers[&X_CACHE_STATUS], "HIT");
        assert_eq!(
            body,
            serde_json::json!({"success": true, "result": {"registered": false}, "source": "cache"})
        );
    }

    #[tokio::test]
    async fn test_registered_profile_body() {
        let app = test_router(ready_pipeline(demo_client()).await);

        let (status, _, body) = get_json(app, "/check/15559999999").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body["result"],
            serde_json::json!({
                "registered": true,
                "displayName": "Alice",
                "canonicalNumber": "15559999999",
                "avatarUrl": null,
                "isBusiness": false
            })
        );
    }

    #[tokio::test]
    async fn test_invalid_identifier_is_bad_request() {
        let pipeline = ready_pipeline(demo_client()).await;
        let app = test_router(Arc::clone(&pipeline));

        let (status, headers, body) = get_json(app, "/check/abc").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(headers.get(&X_CACHE_STATUS).is_none());
        assert_eq!(
            body,
            serde_json::json!({"success": false, "error": "validation"})
        );
        assert_eq!(pipeline.session().client().registration_checks(), 0);
        assert_eq!(pipeline.cache().stats().misses, 0);
    }

    #[tokio::test]
    async fn test_undecodable_identifier_is_validation_error() {
        let pipeline = ready_pipeline(demo_client()).await;
        let app = test_router(Arc::clone(&pipeline));

        let (status, _, body) = get_json(app, "/check/%FF").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(
            body,
            serde_json::json!({"success": false, "error": "validation"})
        );
        assert_eq!(pipeline.session().client().registration_checks(), 0);
    }

    #[tokio::test]
    async fn test_empty_identifier_is_validation_error() {
        let pipeline = ready_pipeline(demo_client()).await;
        let app = test_router(Arc::clone(&pipeline));

        let (status, headers, body) = get_json(app, "/check/").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(headers.get(&X_CACHE_STATUS).is_none());
        assert_eq!(
            body,
            serde_json::json!({"success": false, "error": "validation"})
        );
        assert_eq!(pipeline.cache().stats().misses, 0);
    }

    #[tokio::test]
    async fn test_not_ready_while_pairing() {
        let pipeline = pipeline_for(demo_client().with_pairing(PairingMode::Manual {
            code: "pair-me".to_string(),
        }));
        let mut rx = pipeline.session().watch();
        rx.wait_for(|s| s.state == SessionState::AwaitingCredential)
            .await
            .unwrap();
        let app = test_router(Arc::clone(&pipeline));

        let (status, headers, body) = get_json(app, "/check/15559999999").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(headers[header::RETRY_AFTER], "5");
        assert_eq!(
            body,
            serde_json::json!({"success": false, "error": "not_ready", "state": "awaiting_credential"})
        );
        assert!(pipeline.cache().is_empty());
    }

    #[tokio::test]
    async fn test_query_failure_is_generic_500() {
        let client = demo_client().with_failing_avatar("15559999999");
        let app = test_router(ready_pipeline(client).await);

        let (status, _, body) = get_json(app, "/check/15559999999").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            body,
            serde_json::json!({"success": false, "error": "An internal server error occurred."})
        );
    }

    #[tokio::test]
    async fn test_status_reports_session_and_cache() {
        let app = test_router(ready_pipeline(demo_client()).await);
        let _ = get_json(app.clone(), "/check/15551234567").await;

        let (status, _, body) = get_json(app, "/status").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["state"], "ready");
        assert_eq!(body["ttlSeconds"], 3600);
        assert_eq!(body["cachedEntries"], 1);
        assert_eq!(body["cache"]["misses"], 1);
    }
}
