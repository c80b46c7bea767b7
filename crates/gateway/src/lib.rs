//! HTTP API gateway for MeshBrain.
//!
//! A thin surface over the [`Orchestrator`]: request parsing, status codes
//! and JSON shapes live here, everything else lives behind `handle()`.
//!
//! Endpoints:
//!
//! - `POST /v1/messages`                  : Send a message, get a reply
//! - `GET  /healthz`                      : Tier availability and provider counters (`?deep=true` adds live provider checks)
//! - `GET  /v1/memory/stats`              : Per-tier record counts and queue depth
//! - `GET  /v1/users/{id}/history`        : WARM + COLD history (`?since&until`, RFC 3339)
//! - `PUT  /v1/users/{id}/preferences`    : Merge preference keys for a user
//!
//! Built on Axum for high performance async HTTP.

use axum::extract::DefaultBodyLimit;
use axum::extract::rejection::JsonRejection;
use axum::{
    Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post, put},
};
use chrono::{DateTime, Utc};
use meshbrain_agent::{InboundMessage, Orchestrator, Reply};
use meshbrain_core::error::{Error, RequestError};
use meshbrain_core::memory::TimeRange;
use meshbrain_core::turn::Turn;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};

/// Maximum accepted request body.
const MAX_BODY_BYTES: usize = 1024 * 1024;

type SharedState = Arc<Orchestrator>;

type ApiResult<T> = Result<Json<T>, (StatusCode, Json<ErrorResponse>)>;

/// Build the Axum router with all gateway routes.
///
/// Layers applied:
/// - CORS limited to the methods the API uses, no cross-origin by default
/// - Request body size limit (1 MB)
/// - HTTP trace logging
pub fn build_router(orchestrator: SharedState) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([
            axum::http::Method::GET,
            axum::http::Method::POST,
            axum::http::Method::PUT,
        ])
        .allow_headers([axum::http::header::CONTENT_TYPE]);

    Router::new()
        .route("/healthz", get(health_handler))
        .route("/v1/messages", post(message_handler))
        .route("/v1/memory/stats", get(stats_handler))
        .route("/v1/users/{id}/history", get(history_handler))
        .route("/v1/users/{id}/preferences", put(preferences_handler))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(cors)
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(orchestrator)
}

/// Start the gateway server.
///
/// Builds the orchestrator once, starts the background sweeper when
/// `memory.sweep_interval_secs` is non-zero, and serves until Ctrl-C.
/// Queued WARM writes are drained before returning.
pub async fn start(config: meshbrain_config::AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", config.gateway.host, config.gateway.port);

    let orchestrator = Arc::new(Orchestrator::from_config(&config).await?);

    let sweeper = match config.memory.sweep_interval_secs {
        0 => None,
        secs => Some(
            orchestrator
                .memory()
                .spawn_sweeper(Duration::from_secs(secs)),
        ),
    };

    let app = build_router(orchestrator.clone());

    info!(%addr, "Gateway listening");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(handle) = sweeper {
        handle.abort();
    }
    info!("Draining background records and pending WARM writes");
    orchestrator.flush().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

// ── Wire types ────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Body of `POST /v1/messages`. Missing fields are reported as contract
/// violations rather than deserialization failures.
#[derive(Debug, Deserialize)]
struct MessageRequest {
    #[serde(default)]
    user_id: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    channel: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HealthQuery {
    #[serde(default)]
    deep: bool,
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    since: Option<String>,
    until: Option<String>,
}

#[derive(Debug, Serialize)]
struct HistoryResponse {
    user_id: String,
    count: usize,
    turns: Vec<Turn>,
}

#[derive(Debug, Serialize)]
struct PreferencesResponse {
    user_id: String,
    preferences: BTreeMap<String, String>,
}

fn bad_request(message: impl Into<String>) -> (StatusCode, Json<ErrorResponse>) {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

fn error_status(e: &Error) -> (StatusCode, Json<ErrorResponse>) {
    match e {
        Error::Request(req) => bad_request(req.to_string()),
        Error::Memory(_) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ErrorResponse {
                error: e.to_string(),
            }),
        ),
        _ => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse {
                error: e.to_string(),
            }),
        ),
    }
}

fn parse_bound(name: &str, value: Option<&str>) -> Result<Option<DateTime<Utc>>, String> {
    value
        .filter(|v| !v.is_empty())
        .map(|v| {
            DateTime::parse_from_rfc3339(v)
                .map(|t| t.with_timezone(&Utc))
                .map_err(|e| format!("'{name}' must be an RFC 3339 timestamp: {e}"))
        })
        .transpose()
}

// ── Handlers ──────────────────────────────────────────────────────────────

async fn health_handler(
    State(orchestrator): State<SharedState>,
    Query(query): Query<HealthQuery>,
) -> Json<meshbrain_agent::HealthReport> {
    if query.deep {
        Json(orchestrator.check_health().await)
    } else {
        Json(orchestrator.health().await)
    }
}

async fn stats_handler(
    State(orchestrator): State<SharedState>,
) -> Json<meshbrain_memory::MemoryStats> {
    Json(orchestrator.memory().stats().await)
}

/// `POST /v1/messages`: answer one message.
async fn message_handler(
    State(orchestrator): State<SharedState>,
    body: Result<Json<MessageRequest>, JsonRejection>,
) -> ApiResult<Reply> {
    let Json(req) = body.map_err(|e| bad_request(format!("Invalid request body: {e}")))?;

    let mut inbound = InboundMessage::new(req.user_id, req.message);
    if let Some(channel) = req.channel.filter(|c| !c.trim().is_empty()) {
        inbound = inbound.with_channel(channel);
    }

    let reply = orchestrator.handle(inbound).await.map_err(|e| {
        warn!(error = %e, "Rejected message");
        bad_request(e.to_string())
    })?;
    Ok(Json(reply))
}

/// `GET /v1/users/{id}/history`: chronological WARM + COLD export.
async fn history_handler(
    State(orchestrator): State<SharedState>,
    Path(user_id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<HistoryResponse> {
    let since = parse_bound("since", query.since.as_deref()).map_err(bad_request)?;
    let until = parse_bound("until", query.until.as_deref()).map_err(bad_request)?;

    let turns = orchestrator
        .export_history(&user_id, TimeRange::new(since, until))
        .await
        .map_err(|e| {
            error!(user_id = %user_id, error = %e, "History export failed");
            error_status(&e)
        })?;

    Ok(Json(HistoryResponse {
        user_id,
        count: turns.len(),
        turns,
    }))
}

/// `PUT /v1/users/{id}/preferences`: merge the given keys, return the full set.
async fn preferences_handler(
    State(orchestrator): State<SharedState>,
    Path(user_id): Path<String>,
    body: Result<Json<BTreeMap<String, String>>, JsonRejection>,
) -> ApiResult<PreferencesResponse> {
    let Json(updates) = body.map_err(|e| bad_request(format!("Invalid request body: {e}")))?;

    if user_id.trim().is_empty() {
        return Err(bad_request(RequestError::EmptyUserId.to_string()));
    }
    if updates.keys().any(|k| k.trim().is_empty()) {
        return Err(bad_request("Preference keys must not be empty"));
    }

    for (key, value) in &updates {
        orchestrator
            .set_preference(&user_id, key, value)
            .await
            .map_err(|e| {
                error!(user_id = %user_id, key = %key, error = %e, "Preference update failed");
                error_status(&e)
            })?;
    }

    let preferences = orchestrator.memory().preferences(&user_id).await;
    Ok(Json(PreferencesResponse {
        user_id,
        preferences,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use meshbrain_agent::OrchestratorSettings;
    use meshbrain_config::MemoryConfig;
    use meshbrain_core::error::ProviderError;
    use meshbrain_core::provider::{Generation, GenerationRequest, Provider, Usage};
    use meshbrain_core::{ManualClock, TierStore};
    use meshbrain_memory::{InMemoryStore, MemoryManager};
    use meshbrain_providers::{ProviderRouter, StaticFallback};
    use tower::ServiceExt;

    struct EchoProvider;

    #[async_trait]
    impl Provider for EchoProvider {
        fn name(&self) -> &str {
            "echo"
        }

        async fn generate(&self, request: &GenerationRequest) -> Result<Generation, ProviderError> {
            Ok(Generation {
                text: format!("echo: {}", request.user_message()),
                model: "echo-1".into(),
                usage: Some(Usage {
                    prompt_tokens: 3,
                    completion_tokens: 2,
                    total_tokens: 5,
                }),
            })
        }
    }

    struct DownProvider;

    #[async_trait]
    impl Provider for DownProvider {
        fn name(&self) -> &str {
            "down"
        }

        async fn generate(&self, _request: &GenerationRequest) -> Result<Generation, ProviderError> {
            Err(ProviderError::Network("connection refused".into()))
        }
    }

    struct TestApp {
        app: Router,
        warm: Arc<InMemoryStore>,
    }

    fn test_app(provider: Arc<dyn Provider>) -> TestApp {
        let warm = Arc::new(InMemoryStore::warm());
        let memory = MemoryManager::new(
            warm.clone(),
            Arc::new(InMemoryStore::cold()),
            &MemoryConfig::default(),
            Arc::new(ManualClock::starting_now()),
        );
        let router = ProviderRouter::builder()
            .add(provider, Duration::from_secs(5))
            .fallback(StaticFallback::new("static reply").with_greeting("static hello"))
            .build()
            .unwrap();
        let orchestrator = Orchestrator::new(
            Arc::new(memory),
            Arc::new(router),
            OrchestratorSettings::default(),
        );
        TestApp {
            app: build_router(Arc::new(orchestrator)),
            warm,
        }
    }

    async fn send(app: &Router, req: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = app.clone().oneshot(req).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn health_endpoint() {
        let t = test_app(Arc::new(EchoProvider));
        let (status, json) = send(&t.app, get("/healthz")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["tiers"]["warm"], true);
        assert_eq!(json["providers"][0]["provider"], "echo");
        assert!(json.get("provider_checks").is_none());
    }

    #[tokio::test]
    async fn deep_health_checks_providers() {
        let t = test_app(Arc::new(EchoProvider));
        let (status, json) = send(&t.app, get("/healthz?deep=true")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["provider_checks"][0]["provider"], "echo");
        assert_eq!(json["provider_checks"][0]["reachable"], true);
    }

    #[tokio::test]
    async fn health_reports_degraded_warm() {
        let t = test_app(Arc::new(EchoProvider));
        t.warm.set_available(false);
        let (status, json) = send(&t.app, get("/healthz")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "degraded");
        assert_eq!(json["tiers"]["warm"], false);
    }

    #[tokio::test]
    async fn message_roundtrip() {
        let t = test_app(Arc::new(EchoProvider));
        let (status, json) = send(
            &t.app,
            post_json(
                "/v1/messages",
                serde_json::json!({"user_id": "u1", "message": "what's my balance?"}),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["response_text"], "echo: what's my balance?");
        assert_eq!(json["provider_used"], "echo");
        assert_eq!(json["had_error"], false);
        assert_eq!(json["context_turns_used"], 0);
        assert_eq!(json["usage"]["total_tokens"], 5);
        assert_eq!(t.warm.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn second_message_uses_context() {
        let t = test_app(Arc::new(EchoProvider));
        let body = serde_json::json!({"user_id": "u1", "message": "first"});
        send(&t.app, post_json("/v1/messages", body)).await;

        let body = serde_json::json!({"user_id": "u1", "message": "second"});
        let (_, json) = send(&t.app, post_json("/v1/messages", body)).await;
        assert_eq!(json["context_turns_used"], 2);
    }

    #[tokio::test]
    async fn all_providers_down_gets_static_reply() {
        let t = test_app(Arc::new(DownProvider));
        let body = serde_json::json!({"user_id": "u1", "message": "hello"});
        let (status, json) = send(&t.app, post_json("/v1/messages", body)).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["response_text"], "static hello");
        assert_eq!(json["provider_used"], "static");
        assert_eq!(json["had_error"], true);
        assert_eq!(json["attempts"][0]["outcome"]["status"], "failed");
        assert_eq!(json["attempts"][0]["outcome"]["kind"], "network");
    }

    #[tokio::test]
    async fn missing_or_empty_fields_are_rejected() {
        let t = test_app(Arc::new(EchoProvider));

        let (status, json) = send(
            &t.app,
            post_json("/v1/messages", serde_json::json!({"message": "hi"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(json["error"].as_str().unwrap().contains("user_id"));

        let (status, _) = send(
            &t.app,
            post_json("/v1/messages", serde_json::json!({"user_id": "u1", "message": "  "})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let bad = Request::builder()
            .method("POST")
            .uri("/v1/messages")
            .header("content-type", "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let (status, _) = send(&t.app, bad).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        assert_eq!(t.warm.write_count(), 0);
    }

    #[tokio::test]
    async fn channel_defaults_to_http() {
        let t = test_app(Arc::new(EchoProvider));
        let body = serde_json::json!({"user_id": "u1", "message": "hi there"});
        send(&t.app, post_json("/v1/messages", body)).await;

        let (status, json) = send(&t.app, get("/v1/users/u1/history")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["count"], 2);
        assert_eq!(json["turns"][0]["role"], "user");
        assert_eq!(json["turns"][0]["metadata"]["channel"], "http");
        assert_eq!(json["turns"][1]["role"], "assistant");
        assert_eq!(json["turns"][1]["metadata"]["provider"], "echo");
    }

    #[tokio::test]
    async fn history_honours_range_and_rejects_bad_timestamps() {
        let t = test_app(Arc::new(EchoProvider));
        let body = serde_json::json!({"user_id": "u1", "message": "hi there"});
        send(&t.app, post_json("/v1/messages", body)).await;

        let (status, json) = send(
            &t.app,
            get("/v1/users/u1/history?until=2000-01-01T00:00:00Z"),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["count"], 0);

        let (status, json) = send(&t.app, get("/v1/users/u1/history?since=yesterday")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(json["error"].as_str().unwrap().contains("since"));
    }

    #[tokio::test]
    async fn preferences_merge_and_feed_context() {
        let t = test_app(Arc::new(EchoProvider));
        let req = Request::builder()
            .method("PUT")
            .uri("/v1/users/u1/preferences")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"language": "pt-BR", "tone": "formal"}"#))
            .unwrap();
        let (status, json) = send(&t.app, req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["preferences"]["language"], "pt-BR");
        assert_eq!(json["preferences"]["tone"], "formal");

        let req = Request::builder()
            .method("PUT")
            .uri("/v1/users/u1/preferences")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"tone": "casual"}"#))
            .unwrap();
        let (_, json) = send(&t.app, req).await;
        assert_eq!(json["preferences"]["language"], "pt-BR");
        assert_eq!(json["preferences"]["tone"], "casual");
    }

    #[tokio::test]
    async fn empty_preference_key_is_rejected() {
        let t = test_app(Arc::new(EchoProvider));
        let req = Request::builder()
            .method("PUT")
            .uri("/v1/users/u1/preferences")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"": "x"}"#))
            .unwrap();
        let (status, _) = send(&t.app, req).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn stats_endpoint() {
        let t = test_app(Arc::new(EchoProvider));
        let body = serde_json::json!({"user_id": "u1", "message": "hi there"});
        send(&t.app, post_json("/v1/messages", body)).await;

        let (status, json) = send(&t.app, get("/v1/memory/stats")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["hot_turns"], 2);
        assert_eq!(json["warm_turns"], 2);
        assert_eq!(json["queue"]["depth"], 0);
    }

    #[tokio::test]
    async fn unknown_route_is_404() {
        let t = test_app(Arc::new(EchoProvider));
        let (status, _) = send(&t.app, get("/v1/nope")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
