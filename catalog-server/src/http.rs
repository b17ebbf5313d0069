/**
 * CATALOG API - HTTP surface of the topic catalog
 *
 * ROUTES:
 * - POST /api/samples          : merge one sample into the catalog (201)
 * - GET  /api/topics           : paginated listing, optional broker_id filter
 * - GET  /api/topics/search    : exact (broker_id, topic) lookup
 * - GET  /health               : liveness
 *
 * MIDDLEWARE: request logging and permissive CORS (preflight answered here,
 * before routing).
 *
 * ERRORS: 400 for malformed input, 404 for unknown topics, 500 with a generic
 * message for store failures (the detail goes to the log only).
 */

use axum::body::Bytes;
use axum::extract::{Query, Request, State};
use axum::http::header::{ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN};
use axum::http::{HeaderValue, Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use catalog_core::{CatalogEntry, CatalogStore, ListQuery, Sample, StoreError, TopicListResponse};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info};

const DEFAULT_LIMIT: u32 = 100;

type ApiError = (StatusCode, String);

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn CatalogStore>,
}

impl AppState {
    pub fn new(store: Arc<dyn CatalogStore>) -> Self {
        Self { store }
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/samples", post(create_sample))
        .route("/api/topics", get(list_topics))
        .route("/api/topics/search", get(search_topic))
        .with_state(state)
        .layer(middleware::from_fn(cors))
        .layer(middleware::from_fn(log_requests))
}

async fn log_requests(req: Request, next: Next) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let started = Instant::now();

    let response = next.run(req).await;

    info!(
        %method,
        %path,
        status = response.status().as_u16(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "request"
    );
    response
}

async fn cors(req: Request, next: Next) -> Response {
    let mut response = if req.method() == Method::OPTIONS {
        StatusCode::OK.into_response()
    } else {
        next.run(req).await
    };

    let headers = response.headers_mut();
    headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    headers.insert(ACCESS_CONTROL_ALLOW_METHODS, HeaderValue::from_static("GET, POST, OPTIONS"));
    headers.insert(ACCESS_CONTROL_ALLOW_HEADERS, HeaderValue::from_static("Content-Type"));
    response
}

fn internal_error(e: StoreError) -> ApiError {
    error!(error = %e, "catalog store failure");
    (StatusCode::INTERNAL_SERVER_ERROR, "internal server error".to_string())
}

// GET /health
async fn health() -> Json<Value> {
    Json(json!({ "status": "healthy" }))
}

// POST /api/samples
async fn create_sample(State(app): State<AppState>, body: Bytes) -> Result<(StatusCode, Json<Value>), ApiError> {
    let sample: Sample = serde_json::from_slice(&body)
        .map_err(|e| (StatusCode::BAD_REQUEST, format!("invalid request body: {e}")))?;

    if sample.broker_id.is_empty() || sample.topic.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "broker_id and topic are required".to_string()));
    }

    app.store.upsert(&sample).await.map_err(internal_error)?;
    Ok((StatusCode::CREATED, Json(json!({ "status": "ok" }))))
}

/// Unparsable, negative or zero values fall back to `default`.
fn count_param(params: &HashMap<String, String>, key: &str, default: u32) -> u32 {
    params
        .get(key)
        .and_then(|v| v.parse::<u32>().ok())
        .filter(|v| *v > 0 || default == 0)
        .unwrap_or(default)
}

// GET /api/topics?broker_id=&limit=&offset=
async fn list_topics(
    State(app): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<TopicListResponse>, ApiError> {
    let query = ListQuery {
        broker_id: params.get("broker_id").filter(|b| !b.is_empty()).cloned(),
        limit: count_param(&params, "limit", DEFAULT_LIMIT),
        offset: count_param(&params, "offset", 0),
    };

    let page = app.store.list(&query).await.map_err(internal_error)?;
    Ok(Json(TopicListResponse {
        topics: page.rows,
        total: page.total,
    }))
}

// GET /api/topics/search?broker_id=&topic=
async fn search_topic(
    State(app): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<CatalogEntry>, ApiError> {
    let required = |key: &str| params.get(key).filter(|v| !v.is_empty());
    let (Some(broker_id), Some(topic)) = (required("broker_id"), required("topic")) else {
        return Err((StatusCode::BAD_REQUEST, "broker_id and topic are required".to_string()));
    };

    match app.store.get(broker_id, topic).await.map_err(internal_error)? {
        Some(entry) => Ok(Json(entry)),
        None => Err((StatusCode::NOT_FOUND, "topic not found".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use catalog_core::{PayloadType, SqlCatalogStore};
    use time::OffsetDateTime;
    use tower::ServiceExt;

    async fn app() -> (Router, Arc<SqlCatalogStore>) {
        let store = Arc::new(SqlCatalogStore::connect("sqlite::memory:").await.unwrap());
        store.migrate().await.unwrap();
        (build_router(AppState::new(store.clone())), store)
    }

    async fn call(app: &Router, req: axum::http::Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(req).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    fn get_req(uri: &str) -> axum::http::Request<Body> {
        axum::http::Request::get(uri).body(Body::empty()).unwrap()
    }

    fn post_sample(body: impl Into<Body>) -> axum::http::Request<Body> {
        axum::http::Request::post("/api/samples")
            .header("content-type", "application/json")
            .body(body.into())
            .unwrap()
    }

    async fn seed(store: &SqlCatalogStore, broker_id: &str, topic: &str, seen_at: i64) {
        store
            .upsert(&Sample {
                broker_id: broker_id.into(),
                topic: topic.into(),
                payload_type: PayloadType::Json,
                payload: br#"{"v":1}"#.to_vec(),
                timestamp: OffsetDateTime::from_unix_timestamp(seen_at).unwrap(),
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn health_reports_healthy() {
        let (app, _) = app().await;
        let (status, body) = call(&app, get_req("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "status": "healthy" }));
    }

    #[tokio::test]
    async fn create_sample_upserts() {
        let (app, store) = app().await;
        let body = json!({
            "broker_id": "test-broker",
            "topic": "test/topic",
            "payload_type": "json",
            "payload": "eyJ0ZW1wIjogMjIuNX0=",
            "timestamp": "2024-05-01T10:00:00Z"
        });

        let (status, response) = call(&app, post_sample(body.to_string())).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(response, json!({ "status": "ok" }));

        let entry = store.get("test-broker", "test/topic").await.unwrap().unwrap();
        assert_eq!(entry.sample_payload, br#"{"temp": 22.5}"#);
        assert_eq!(entry.payload_type, PayloadType::Json);
    }

    #[tokio::test]
    async fn create_sample_rejects_bad_input() {
        let (app, _) = app().await;

        let (status, _) = call(&app, post_sample("invalid json")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let missing_topic = json!({
            "broker_id": "test-broker",
            "topic": "",
            "payload_type": "text",
            "payload": "",
            "timestamp": "2024-05-01T10:00:00Z"
        });
        let (status, _) = call(&app, post_sample(missing_topic.to_string())).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn list_topics_paginates_and_filters() {
        let (app, store) = app().await;
        seed(&store, "b1", "t/1", 1_700_000_001).await;
        seed(&store, "b1", "t/2", 1_700_000_002).await;
        seed(&store, "b2", "t/3", 1_700_000_003).await;

        let (status, body) = call(&app, get_req("/api/topics")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total"], 3);
        assert_eq!(body["topics"][0]["topic"], "t/3");

        let (_, body) = call(&app, get_req("/api/topics?broker_id=b1&limit=1&offset=1")).await;
        assert_eq!(body["total"], 2);
        assert_eq!(body["topics"].as_array().unwrap().len(), 1);
        assert_eq!(body["topics"][0]["topic"], "t/1");

        let (_, body) = call(&app, get_req("/api/topics?limit=-5&offset=abc")).await;
        assert_eq!(body["topics"].as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn search_topic_lookup() {
        let (app, store) = app().await;
        seed(&store, "b1", "plant/temp", 1_700_000_000).await;

        let (status, body) = call(&app, get_req("/api/topics/search?broker_id=b1&topic=plant/temp")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["broker_id"], "b1");
        assert_eq!(body["payload_type"], "json");

        let (status, _) = call(&app, get_req("/api/topics/search?broker_id=b1&topic=missing")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = call(&app, get_req("/api/topics/search?broker_id=b1")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn store_failures_are_internal_errors() {
        // no migrate: every statement fails on the missing table
        let store = Arc::new(SqlCatalogStore::connect("sqlite::memory:").await.unwrap());
        let app = build_router(AppState::new(store));

        let body = json!({
            "broker_id": "b1",
            "topic": "plant/temp",
            "payload_type": "text",
            "payload": "MjEuNQ==",
            "timestamp": "2024-05-01T10:00:00Z"
        });
        let response = app.clone().oneshot(post_sample(body.to_string())).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"internal server error");

        let (status, _) = call(&app, get_req("/api/topics")).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);

        let (status, _) = call(&app, get_req("/api/topics/search?broker_id=b1&topic=plant/temp")).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn preflight_gets_cors_headers() {
        let (app, _) = app().await;
        let req = axum::http::Request::builder()
            .method(Method::OPTIONS)
            .uri("/api/samples")
            .body(Body::empty())
            .unwrap();

        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        assert_eq!(response.headers()[ACCESS_CONTROL_ALLOW_METHODS], "GET, POST, OPTIONS");
    }
}
