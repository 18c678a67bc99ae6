// src/api.rs
//! Route handlers and shared state for the public HTTP surface.

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use futures::StreamExt;
use metrics::counter;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tower_http::cors::CorsLayer;

use crate::chat::history::ChatHistory;
use crate::chat::provider::{ChatProvider, ChatTurn, CompletionRequest};
use crate::chat::retry::RetryPolicy;
use crate::chat::{self, MAX_HISTORY_TURNS};
use crate::codes::aggregator::Aggregator;
use crate::codes::report::{CodeReport, ReportLog};
use crate::codes::types::Scope;
use crate::ratelimit::{RateDecision, RateLimiter};

const HEALTH_CACHE_CONTROL: &str = "public, s-maxage=60, stale-while-revalidate=600";

#[derive(Clone)]
pub struct AppState {
    pub aggregator: Arc<Aggregator>,
    pub reports: Arc<ReportLog>,
    pub limiter: Arc<RateLimiter>,
    pub chat_provider: Arc<dyn ChatProvider>,
    pub retry: RetryPolicy,
    pub chat_history: Arc<ChatHistory>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/api/codes", get(get_codes))
        .route("/api/codes/health", get(codes_health))
        .route("/api/codes/report", post(report_code))
        .route("/api/chat/message", post(chat_message))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

/// Caller-facing error envelope. Every handler failure serializes as
/// `{ok:false, code, message}`; internal detail stays in the logs.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("missing required field: code")]
    MissingCode,
    #[error("message must not be empty")]
    EmptyMessage,
    #[error("unknown scope; expected active, past7, or all")]
    InvalidScope,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            ApiError::MissingCode | ApiError::EmptyMessage | ApiError::InvalidScope => {
                (StatusCode::BAD_REQUEST, "bad_request", self.to_string())
            }
            ApiError::Internal(e) => {
                tracing::error!(error = ?e, "internal api error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal",
                    "internal error".to_string(),
                )
            }
        };
        (
            status,
            Json(json!({ "ok": false, "code": code, "message": message })),
        )
            .into_response()
    }
}

async fn get_codes(
    State(state): State<AppState>,
    Query(q): Query<HashMap<String, String>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let scope = match q.get("scope").map(String::as_str) {
        None | Some("") | Some("all") => Scope::All,
        Some("active") => Scope::Active,
        Some("past7") => Scope::Past7,
        Some(_) => return Err(ApiError::InvalidScope),
    };
    let result = state.aggregator.aggregate_cached(scope).await;
    Ok(Json(json!({ "codes": result.codes })))
}

async fn codes_health(State(state): State<AppState>) -> Response {
    match state.aggregator.health_report().await {
        Ok(report) => {
            let mut resp = Json(report).into_response();
            resp.headers_mut().insert(
                header::CACHE_CONTROL,
                HeaderValue::from_static(HEALTH_CACHE_CONTROL),
            );
            resp
        }
        Err(e) => {
            tracing::error!(error = ?e, "codes health pipeline failed");
            let mut resp = (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "ok": false,
                    "code": "internal",
                    "message": "code health is temporarily unavailable",
                })),
            )
                .into_response();
            resp.headers_mut()
                .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
            resp
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReportBody {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    guild_id: Option<String>,
    #[serde(default)]
    user_id: Option<String>,
}

async fn report_code(
    State(state): State<AppState>,
    Json(body): Json<ReportBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let code = body
        .code
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .ok_or(ApiError::MissingCode)?;

    let report = CodeReport {
        code,
        reason: body.reason,
        guild_id: body.guild_id,
        user_id: body.user_id,
        reported_at: Utc::now(),
    };
    state.reports.append(&report).await?;
    Ok(Json(json!({ "ok": true })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChatBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    personality_mode: Option<String>,
    #[serde(default)]
    conversation_history: Option<Vec<ChatTurn>>,
    #[serde(default)]
    user_id: Option<String>,
}

async fn chat_message(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<ChatBody>,
) -> Result<Response, ApiError> {
    let message = body.message.trim().to_string();
    if message.is_empty() {
        return Err(ApiError::EmptyMessage);
    }

    let caller = caller_key(body.user_id.as_deref(), &headers);
    if let RateDecision::Limited {
        retry_after_secs,
        reset_at_ms,
    } = state.limiter.check(&caller).await
    {
        counter!("chat_rate_limited_total").increment(1);
        return Ok(rate_limited_response(retry_after_secs, reset_at_ms));
    }

    // Client-supplied history wins; otherwise fall back to what we remember.
    let mut history = match body.conversation_history {
        Some(h) if !h.is_empty() => h,
        _ => state
            .chat_history
            .recent_turns(&caller, MAX_HISTORY_TURNS / 2),
    };
    if history.len() > MAX_HISTORY_TURNS {
        history.drain(0..history.len() - MAX_HISTORY_TURNS);
    }

    let req = CompletionRequest {
        system_prompt: chat::system_prompt(body.personality_mode.as_deref()).to_string(),
        history,
        message,
    };
    let frames = chat::exchange_frames(
        Arc::clone(&state.chat_provider),
        state.retry,
        req,
        Arc::clone(&state.chat_history),
        caller,
    );

    Response::builder()
        .header(header::CONTENT_TYPE, "application/x-ndjson")
        .header(header::CACHE_CONTROL, "no-store")
        .body(Body::from_stream(frames.map(Ok::<_, Infallible>)))
        .map_err(|e| ApiError::Internal(e.into()))
}

fn rate_limited_response(retry_after_secs: u64, reset_at_ms: u64) -> Response {
    let mut resp = (
        StatusCode::TOO_MANY_REQUESTS,
        Json(json!({
            "ok": false,
            "code": "rate_limited",
            "message": "too many chat requests; try again shortly",
        })),
    )
        .into_response();
    let headers = resp.headers_mut();
    if let Ok(v) = HeaderValue::from_str(&retry_after_secs.to_string()) {
        headers.insert(header::RETRY_AFTER, v);
    }
    if let Ok(v) = HeaderValue::from_str(&(reset_at_ms / 1_000).to_string()) {
        headers.insert("x-ratelimit-reset", v);
    }
    resp
}

/// Rate-limit key: authenticated user id when present, else the client
/// network address from proxy headers.
fn caller_key(user_id: Option<&str>, headers: &HeaderMap) -> String {
    if let Some(u) = user_id.map(str::trim).filter(|s| !s.is_empty()) {
        return format!("user:{u}");
    }
    for name in ["x-forwarded-for", "x-real-ip"] {
        let addr = headers
            .get(name)
            .and_then(|h| h.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|s| !s.is_empty());
        if let Some(addr) = addr {
            return format!("ip:{addr}");
        }
    }
    "anonymous".to_string()
}
