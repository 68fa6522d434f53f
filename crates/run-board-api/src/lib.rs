//! # Run-Board HTTP Service
//!
//! HTTP layer for the run-board dashboard: the GitHub webhook intake
//! endpoint and the read API the dashboard frontend consumes.
//!
//! This crate provides:
//! - Webhook endpoint with HMAC-SHA256 signature verification
//! - Repository and run read API
//! - Health, readiness, and prometheus metrics endpoints

// Public modules
pub mod config;
pub mod metrics;

pub use config::{
    ConfigError, LogFormat, LoggingConfig, ServerConfig, ServiceConfig, StorageBackend,
    StorageConfig, WebhookConfig,
};
pub use metrics::ServiceMetrics;

use axum::{
    extract::{DefaultBodyLimit, Path, State},
    http::{HeaderMap, StatusCode},
    middleware,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use bytes::Bytes;
use prometheus::TextEncoder;
use run_board_core::{
    webhook::{WebhookHeaders, WebhookProcessor, WebhookRequest},
    DashboardStats, IngestOutcome, RepoFullName, RepositoryWithRuns, RepositoryWithWorkflows,
    RunStore, StoreError, StoreHealth, Timestamp, WebhookError, WorkflowRun,
};
use serde::Serialize;
use std::{collections::HashMap, net::SocketAddr, sync::Arc};
use tower::ServiceBuilder;
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info, instrument, warn};

// ============================================================================
// Application State
// ============================================================================

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Configuration for the service
    pub config: ServiceConfig,

    /// Webhook pipeline for GitHub deliveries
    pub ingestor: Arc<dyn WebhookProcessor>,

    /// Run store serving the read API
    pub store: Arc<dyn RunStore>,

    /// Metrics collector for observability
    pub metrics: Arc<ServiceMetrics>,
}

impl AppState {
    /// Create new application state
    pub fn new(
        config: ServiceConfig,
        ingestor: Arc<dyn WebhookProcessor>,
        store: Arc<dyn RunStore>,
        metrics: Arc<ServiceMetrics>,
    ) -> Self {
        Self {
            config,
            ingestor,
            store,
            metrics,
        }
    }
}

// ============================================================================
// HTTP Server
// ============================================================================

/// Create HTTP router with all endpoints
pub fn create_router(state: AppState) -> Router {
    let webhook_routes =
        Router::new().route(&state.config.webhooks.endpoint_path, post(handle_webhook));

    let api_routes = Router::new()
        .route("/api/repositories", get(list_repositories))
        .route("/api/repositories/{owner}/{name}", get(get_repository))
        .route("/api/stats", get(get_dashboard_stats))
        .route("/api/runs/in-progress", get(list_in_progress_runs));

    let health_routes = Router::new()
        .route("/health", get(handle_health_check))
        .route("/ready", get(handle_readiness_check));

    let observability_routes = Router::new().route("/metrics", get(metrics_endpoint));

    Router::new()
        .merge(webhook_routes)
        .merge(api_routes)
        .merge(health_routes)
        .merge(observability_routes)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CompressionLayer::new())
                .layer(CorsLayer::permissive())
                .layer(middleware::from_fn(request_logging_middleware))
                .layer(middleware::from_fn_with_state(
                    state.clone(),
                    metrics_middleware,
                ))
                .into_inner(),
        )
        .layer(DefaultBodyLimit::max(
            state.config.server.max_payload_size_bytes,
        ))
        .with_state(state)
}

/// Start HTTP server
///
/// Binds per `config.server`, serves until SIGINT/SIGTERM, then drains
/// in-flight requests before returning.
pub async fn start_server(
    config: ServiceConfig,
    ingestor: Arc<dyn WebhookProcessor>,
    store: Arc<dyn RunStore>,
    metrics: Arc<ServiceMetrics>,
) -> Result<(), ServiceError> {
    let host: std::net::IpAddr = config.server.host.parse().map_err(|_| {
        ServiceError::Configuration(ConfigError::Invalid {
            message: format!("server.host '{}' is not an IP address", config.server.host),
        })
    })?;
    let addr = SocketAddr::from((host, config.server.port));

    let state = AppState::new(config, ingestor, store, metrics);
    let app = create_router(state);

    let listener =
        tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| ServiceError::BindFailed {
                address: addr.to_string(),
                message: e.to_string(),
            })?;

    info!("Starting HTTP server on {}", addr);

    let shutdown_signal = async {
        let ctrl_c = async {
            tokio::signal::ctrl_c()
                .await
                .expect("Failed to install Ctrl+C signal handler");
        };

        #[cfg(unix)]
        let terminate = async {
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("Failed to install SIGTERM signal handler")
                .recv()
                .await;
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                info!("Received SIGINT (Ctrl+C), initiating graceful shutdown");
            },
            _ = terminate => {
                info!("Received SIGTERM, initiating graceful shutdown");
            },
        }
    };

    // In-flight requests drain before the server returns; new connections
    // stop being accepted as soon as the signal arrives.
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await
        .map_err(|e| ServiceError::ServerFailed {
            message: e.to_string(),
        })?;

    info!("HTTP server shutdown complete");
    Ok(())
}

// ============================================================================
// Webhook Handler
// ============================================================================

/// Handle GitHub webhook deliveries
///
/// Answers with exactly three status codes: `200` for processed or ignored
/// deliveries, `401` for signature rejections, `500` for everything else.
/// Absent headers are handled inside the pipeline (an unknown event kind is
/// acknowledged, a missing signature fails verification), so this handler
/// never rejects on headers alone.
#[instrument(skip(state, headers, body), fields(event_type, delivery_id))]
pub async fn handle_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookResponse>, WebhookHandlerError> {
    state.metrics.webhook_requests_total.inc();

    let header_map: HashMap<String, String> = headers
        .iter()
        .map(|(k, v)| {
            (
                k.as_str().to_lowercase(),
                v.to_str().unwrap_or("").to_string(),
            )
        })
        .collect();

    let webhook_headers = WebhookHeaders::from_http_headers(&header_map);
    let event = webhook_headers.event_type.clone();
    let delivery_id = webhook_headers.delivery_id.clone();

    tracing::Span::current().record("event_type", event.as_str());
    tracing::Span::current().record("delivery_id", delivery_id.as_str());

    let outcome = state
        .ingestor
        .process_webhook(WebhookRequest::new(webhook_headers, body))
        .await
        .map_err(|e| {
            state.metrics.record_ingest_failure(&e);
            WebhookHandlerError::Processing(e)
        })?;

    state.metrics.record_ingest_outcome(&outcome);
    match &outcome {
        IngestOutcome::Stored { run_id, repository } => {
            info!(
                run_id = %run_id,
                repository = %repository,
                "Webhook delivery stored"
            );
        }
        IngestOutcome::Ignored { event_type } => {
            info!(
                ignored_event = %event_type,
                "Webhook delivery acknowledged without processing"
            );
        }
    }

    Ok(Json(WebhookResponse {
        received: true,
        event,
        delivery_id,
    }))
}

// ============================================================================
// Read API Handlers
// ============================================================================

/// List every repository with its recent runs grouped by workflow
#[instrument(skip(state))]
async fn list_repositories(
    State(state): State<AppState>,
) -> Result<Json<Vec<RepositoryWithWorkflows>>, ApiError> {
    let listing = state.store.list_repositories_with_runs().await?;
    Ok(Json(listing))
}

/// Fetch a single repository and its most recent runs
///
/// A full name that fails validation cannot name a stored repository, so it
/// maps to the same 404 as an unknown one.
#[instrument(skip(state))]
async fn get_repository(
    State(state): State<AppState>,
    Path((owner, name)): Path<(String, String)>,
) -> Result<Json<RepositoryWithRuns>, ApiError> {
    let full_name =
        RepoFullName::from_parts(&owner, &name).map_err(|_| ApiError::RepositoryNotFound)?;

    match state.store.repository_with_runs(&full_name).await? {
        Some(view) => Ok(Json(view)),
        None => Err(ApiError::RepositoryNotFound),
    }
}

/// Dashboard summary counters
#[instrument(skip(state))]
async fn get_dashboard_stats(
    State(state): State<AppState>,
) -> Result<Json<DashboardStats>, ApiError> {
    let stats = state.store.dashboard_stats().await?;
    Ok(Json(stats))
}

/// Runs currently in the in-progress family, newest first
#[instrument(skip(state))]
async fn list_in_progress_runs(
    State(state): State<AppState>,
) -> Result<Json<Vec<WorkflowRun>>, ApiError> {
    let runs = state.store.in_progress_runs().await?;
    Ok(Json(runs))
}

// ============================================================================
// Health Check Handlers
// ============================================================================

/// Basic health check endpoint, including the store probe
#[instrument(skip(state))]
async fn handle_health_check(
    State(state): State<AppState>,
) -> Result<Json<HealthResponse>, StatusCode> {
    let start = std::time::Instant::now();
    let mut checks = HashMap::new();

    checks.insert(
        "service".to_string(),
        HealthCheckResult {
            healthy: true,
            message: "Service is running".to_string(),
            duration_ms: start.elapsed().as_millis() as u64,
        },
    );

    let store_start = std::time::Instant::now();
    let store_health = state
        .store
        .health_check()
        .await
        .unwrap_or_else(|e| StoreHealth {
            healthy: false,
            backend: "unknown",
            error_message: Some(e.to_string()),
        });
    checks.insert(
        "store".to_string(),
        HealthCheckResult {
            healthy: store_health.healthy,
            message: store_health
                .error_message
                .unwrap_or_else(|| format!("{} store reachable", store_health.backend)),
            duration_ms: store_start.elapsed().as_millis() as u64,
        },
    );

    let is_healthy = checks.values().all(|check| check.healthy);

    let response = HealthResponse {
        status: if is_healthy {
            "healthy".to_string()
        } else {
            "unhealthy".to_string()
        },
        timestamp: Timestamp::now(),
        checks,
        version: env!("CARGO_PKG_VERSION").to_string(),
    };

    if is_healthy {
        Ok(Json(response))
    } else {
        Err(StatusCode::SERVICE_UNAVAILABLE)
    }
}

/// Readiness check for load balancers
#[instrument(skip(state))]
async fn handle_readiness_check(
    State(state): State<AppState>,
) -> Result<Json<ReadinessResponse>, StatusCode> {
    let ready = state
        .store
        .health_check()
        .await
        .map(|health| health.healthy)
        .unwrap_or(false);

    let response = ReadinessResponse {
        ready,
        timestamp: Timestamp::now(),
    };

    if ready {
        Ok(Json(response))
    } else {
        Err(StatusCode::SERVICE_UNAVAILABLE)
    }
}

// ============================================================================
// Observability Handlers
// ============================================================================

/// Prometheus metrics endpoint
#[instrument(skip_all)]
async fn metrics_endpoint(State(_state): State<AppState>) -> Result<String, StatusCode> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();

    encoder
        .encode_to_string(&metric_families)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

// ============================================================================
// Middleware
// ============================================================================

/// Request logging middleware with correlation ID tracking
///
/// Honors an inbound `x-correlation-id` header or generates a UUID, records
/// it on the request span, echoes it on the response, and logs completion at
/// a level matching the status class.
#[instrument(skip(request, next), fields(
    method = %request.method(),
    uri = %request.uri(),
    correlation_id
))]
async fn request_logging_middleware(
    mut request: axum::extract::Request,
    next: axum::middleware::Next,
) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let start = std::time::Instant::now();

    let correlation_id = request
        .headers()
        .get("x-correlation-id")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    tracing::Span::current().record("correlation_id", correlation_id.as_str());

    // Downstream handlers can read the id from request extensions.
    request.extensions_mut().insert(correlation_id.clone());

    let mut response = next.run(request).await;
    let duration = start.elapsed();

    if let Ok(header_value) = correlation_id.parse() {
        response
            .headers_mut()
            .insert("x-correlation-id", header_value);
    }

    let status = response.status();

    if status.is_server_error() {
        error!(
            correlation_id = %correlation_id,
            method = %method,
            uri = %uri,
            status = %status,
            duration_ms = %duration.as_millis(),
            "Request completed with server error"
        );
    } else if status.is_client_error() {
        warn!(
            correlation_id = %correlation_id,
            method = %method,
            uri = %uri,
            status = %status,
            duration_ms = %duration.as_millis(),
            "Request completed with client error"
        );
    } else {
        info!(
            correlation_id = %correlation_id,
            method = %method,
            uri = %uri,
            status = %status,
            duration_ms = %duration.as_millis(),
            "Request completed"
        );
    }

    response
}

/// HTTP metrics middleware
async fn metrics_middleware(
    State(state): State<AppState>,
    request: axum::extract::Request,
    next: axum::middleware::Next,
) -> Response {
    let start = std::time::Instant::now();
    let response = next.run(request).await;
    state.metrics.record_http_request(start.elapsed());
    response
}

// ============================================================================
// Response Types
// ============================================================================

/// Acknowledgement returned to the webhook sender
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookResponse {
    pub received: bool,
    pub event: String,
    pub delivery_id: String,
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: Timestamp,
    pub checks: HashMap<String, HealthCheckResult>,
    pub version: String,
}

/// Health check result for individual components
#[derive(Debug, Serialize, Clone)]
pub struct HealthCheckResult {
    pub healthy: bool,
    pub message: String,
    pub duration_ms: u64,
}

/// Readiness check response
#[derive(Debug, Serialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    pub timestamp: Timestamp,
}

// ============================================================================
// Error Types
// ============================================================================

/// Webhook handler errors with HTTP status code mapping
///
/// The intake endpoint's contract is three status codes only:
///
/// - `401 Unauthorized` for signature rejections, body
///   `{"error": "Invalid signature"}`
/// - `500 Internal Server Error` for every other pipeline failure, body
///   `{"error": "Internal server error"}`
/// - `200 OK` otherwise (including ignored event kinds)
///
/// Client-visible bodies carry no failure detail; the specifics are logged
/// server-side with the correlation id.
#[derive(Debug, thiserror::Error)]
pub enum WebhookHandlerError {
    #[error("Processing failed: {0}")]
    Processing(#[from] WebhookError),
}

impl IntoResponse for WebhookHandlerError {
    fn into_response(self) -> Response {
        let Self::Processing(e) = self;

        if e.is_authentication_failure() {
            warn!(error = %e, "Rejected webhook delivery with invalid signature");
            (
                StatusCode::UNAUTHORIZED,
                Json(serde_json::json!({ "error": "Invalid signature" })),
            )
                .into_response()
        } else {
            error!(
                error = %e,
                category = ?e.error_category(),
                transient = e.is_transient(),
                "Webhook processing failed"
            );
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "error": "Internal server error" })),
            )
                .into_response()
        }
    }
}

/// Read API errors with HTTP status code mapping
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Repository not found")]
    RepositoryNotFound,

    #[error("Store query failed: {0}")]
    Store(#[from] StoreError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            Self::RepositoryNotFound => (
                StatusCode::NOT_FOUND,
                Json(serde_json::json!({ "error": "Repository not found" })),
            )
                .into_response(),
            Self::Store(e) => {
                error!(
                    error = %e,
                    category = ?e.error_category(),
                    "Read query failed"
                );
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(serde_json::json!({ "error": "Internal server error" })),
                )
                    .into_response()
            }
        }
    }
}

/// Service-level errors
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Failed to bind to address {address}: {message}")]
    BindFailed { address: String, message: String },

    #[error("Server failed: {message}")]
    ServerFailed { message: String },

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("Store initialization failed: {message}")]
    StoreInitFailed { message: String },
}

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
