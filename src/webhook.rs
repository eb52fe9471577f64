use std::{net::SocketAddr, sync::Arc};

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Notify;

use crate::coordinator::{Coordinator, StartOutcome};
use crate::session::SessionSummary;
use crate::signature;
use crate::telemetry::ChannelStatsSnapshot;

pub const EVENT_URL_VALIDATION: &str = "endpoint.url_validation";
pub const EVENT_RTMS_STARTED: &str = "meeting.rtms_started";
pub const EVENT_RTMS_STOPPED: &str = "meeting.rtms_stopped";

pub struct WebhookState {
    pub coordinator: Coordinator,
    pub secret_token: Option<String>,
    pub control_token: Option<String>,
}

impl std::fmt::Debug for WebhookState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookState")
            .field("secret_token", &"[redacted]")
            .field("control_token", &"[redacted]")
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct WebhookEvent {
    event: String,
    #[serde(default)]
    payload: Value,
}

#[derive(Debug, Deserialize)]
struct UrlValidationPayload {
    #[serde(rename = "plainToken")]
    plain_token: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct UrlValidationResponse {
    #[serde(rename = "plainToken")]
    plain_token: String,
    #[serde(rename = "encryptedToken")]
    encrypted_token: String,
}

#[derive(Debug, Default, Deserialize)]
struct RtmsPayload {
    #[serde(default)]
    meeting_uuid: String,
    #[serde(default)]
    rtms_stream_id: String,
    #[serde(default)]
    server_urls: String,
}

#[derive(Serialize)]
struct StatusResponse {
    status: String,
    #[serde(rename = "ts")]
    timestamp: String,
    version: String,
    sessions: usize,
    runtime: RuntimeInfo,
}

#[derive(Serialize)]
struct RuntimeInfo {
    channels: ChannelStatsSnapshot,
}

#[derive(Serialize)]
struct SessionListResponse {
    sessions: Vec<SessionSummary>,
}

pub fn router(state: Arc<WebhookState>, webhook_path: &str) -> Router {
    let authenticated_routes = Router::new()
        .route("/v1/sessions", get(list_sessions))
        .with_state(state.clone())
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    Router::new()
        .route(webhook_path, post(webhook))
        .route("/v1/status", get(status))
        .with_state(state)
        .merge(authenticated_routes)
}

/// Bind `addr` (falling back to an OS-assigned port on the same ip), serve
/// until `shutdown` fires, and return the address actually bound.
pub async fn start(
    addr: &str,
    webhook_path: &str,
    state: Arc<WebhookState>,
    shutdown: Arc<Notify>,
) -> anyhow::Result<SocketAddr> {
    let requested_addr: SocketAddr = addr.parse().map_err(|e| {
        anyhow::anyhow!("invalid listen address '{addr}': {e} (use numeric ip, not hostname)")
    })?;

    let (listener, bound_addr) = match tokio::net::TcpListener::bind(requested_addr).await {
        Ok(listener) => {
            let bound = listener.local_addr()?;
            (listener, bound)
        }
        Err(e) => {
            crate::logging::warn_kv(
                "webhook port unavailable, trying fallback",
                &[
                    ("requested_addr", &requested_addr.to_string()),
                    ("error", &e.to_string()),
                ],
            );
            let fallback_addr = SocketAddr::new(requested_addr.ip(), 0);
            match tokio::net::TcpListener::bind(fallback_addr).await {
                Ok(listener) => {
                    let bound = listener.local_addr()?;
                    (listener, bound)
                }
                Err(fallback_err) => {
                    return Err(anyhow::anyhow!(
                        "failed to bind webhook server: requested {requested_addr} failed ({e}), fallback to port 0 also failed ({fallback_err})"
                    ));
                }
            }
        }
    };

    let app = router(state, webhook_path);
    tokio::spawn(async move {
        let result = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                shutdown.notified().await;
            })
            .await;
        if let Err(e) = result {
            crate::logging::error(format!("webhook server error: {e}"));
        }
        crate::logging::info("webhook server stopped");
    });

    crate::logging::info_kv(
        "webhook server listening",
        &[("addr", &bound_addr.to_string()), ("path", webhook_path)],
    );
    Ok(bound_addr)
}

async fn auth_middleware(
    State(state): State<Arc<WebhookState>>,
    headers: HeaderMap,
    req: axum::http::Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> impl IntoResponse {
    let token = match &state.control_token {
        Some(t) => t,
        None => return next.run(req).await,
    };
    let expected = format!("Bearer {token}");
    if let Some(value) = headers.get(axum::http::header::AUTHORIZATION) {
        if value.to_str().map(|v| v == expected).unwrap_or(false) {
            return next.run(req).await;
        }
    }
    (StatusCode::UNAUTHORIZED, "unauthorized").into_response()
}

async fn webhook(
    State(state): State<Arc<WebhookState>>,
    Json(body): Json<WebhookEvent>,
) -> axum::response::Response {
    crate::logging::debug_kv("webhook received", &[("event", &body.event)]);
    match body.event.as_str() {
        EVENT_URL_VALIDATION => url_validation(&state, body.payload),
        EVENT_RTMS_STARTED => {
            let payload: RtmsPayload = serde_json::from_value(body.payload).unwrap_or_default();
            match state.coordinator.on_session_start(
                &payload.meeting_uuid,
                &payload.rtms_stream_id,
                &payload.server_urls,
            ) {
                StartOutcome::Invalid => {
                    (StatusCode::BAD_REQUEST, "missing or invalid session identifiers")
                        .into_response()
                }
                StartOutcome::Started | StartOutcome::Duplicate => StatusCode::OK.into_response(),
            }
        }
        EVENT_RTMS_STOPPED => {
            let payload: RtmsPayload = serde_json::from_value(body.payload).unwrap_or_default();
            if payload.meeting_uuid.is_empty() {
                return (StatusCode::BAD_REQUEST, "missing meeting_uuid").into_response();
            }
            state.coordinator.on_session_stop(&payload.meeting_uuid);
            StatusCode::OK.into_response()
        }
        other => {
            crate::logging::debug_kv("webhook event ignored", &[("event", other)]);
            StatusCode::OK.into_response()
        }
    }
}

fn url_validation(state: &WebhookState, payload: Value) -> axum::response::Response {
    let secret = match &state.secret_token {
        Some(s) => s,
        None => {
            crate::logging::warn("url validation requested but no webhook secret token configured");
            return (StatusCode::INTERNAL_SERVER_ERROR, "webhook secret token not configured")
                .into_response();
        }
    };
    let payload: UrlValidationPayload = match serde_json::from_value(payload) {
        Ok(p) => p,
        Err(_) => return (StatusCode::BAD_REQUEST, "missing plainToken").into_response(),
    };
    let encrypted_token = signature::url_validation_token(secret, &payload.plain_token);
    Json(UrlValidationResponse {
        plain_token: payload.plain_token,
        encrypted_token,
    })
    .into_response()
}

async fn status(State(state): State<Arc<WebhookState>>) -> impl IntoResponse {
    Json(StatusResponse {
        status: "ok".to_string(),
        timestamp: Utc::now().to_rfc3339(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        sessions: state.coordinator.registry().len(),
        runtime: RuntimeInfo {
            channels: state.coordinator.stats().snapshot(),
        },
    })
}

async fn list_sessions(State(state): State<Arc<WebhookState>>) -> impl IntoResponse {
    Json(SessionListResponse {
        sessions: state.coordinator.sessions(),
    })
}
