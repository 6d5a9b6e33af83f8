//! REST endpoints: inbound webhook, contacts, segments, blacklist, follow-ups.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::error;

use crate::compliance::{BlacklistScope, BlacklistSource};
use crate::contacts::{AgentProfile, normalize_phone};
use crate::error::{DatabaseError, PipelineError};
use crate::followup::FollowUpScheduler;
use crate::pipeline::{ImportRow, InboundEvent, InboundProcessor};
use crate::segments::{Segment, segment_contacts};
use crate::store::Database;

/// Messages returned alongside a contact.
const CONTACT_HISTORY_LIMIT: u32 = 50;

/// Shared state for all routes.
#[derive(Clone)]
pub struct ApiState {
    pub db: Arc<dyn Database>,
    pub processor: Arc<InboundProcessor>,
    pub scheduler: Arc<FollowUpScheduler>,
}

/// JSON error body with a status code.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }
}

impl From<PipelineError> for ApiError {
    fn from(e: PipelineError) -> Self {
        let status = match &e {
            PipelineError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            PipelineError::UnknownAgent(_) | PipelineError::ContactNotFound { .. } => {
                StatusCode::NOT_FOUND
            }
            PipelineError::Delivery(_) | PipelineError::Llm(_) => StatusCode::BAD_GATEWAY,
            PipelineError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: e.to_string(),
        }
    }
}

impl From<DatabaseError> for ApiError {
    fn from(e: DatabaseError) -> Self {
        match e {
            DatabaseError::NotFound { .. } => Self::not_found(e.to_string()),
            other => Self {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                message: other.to_string(),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!(status = %self.status, error = %self.message, "Request failed");
        }
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

type ApiResult = Result<Response, ApiError>;

/// GET /health
async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION") }))
}

/// POST /api/inbound
async fn inbound(State(state): State<ApiState>, Json(event): Json<InboundEvent>) -> ApiResult {
    let outcome = state.processor.process(event).await?;
    Ok(Json(outcome).into_response())
}

#[derive(Debug, Deserialize)]
struct AgentBody {
    name: String,
    from_number: String,
    #[serde(default)]
    webhook_url: Option<String>,
}

/// PUT /api/agents/{agent}
async fn put_agent(
    State(state): State<ApiState>,
    Path(agent_id): Path<String>,
    Json(body): Json<AgentBody>,
) -> ApiResult {
    let from_number = normalize_phone(&body.from_number, state.processor.default_country())
        .map_err(|e| ApiError::bad_request(e.to_string()))?;
    let agent = AgentProfile {
        id: agent_id,
        name: body.name,
        from_number,
        webhook_url: body.webhook_url.filter(|u| !u.trim().is_empty()),
    };
    state.db.upsert_agent(&agent).await?;
    Ok(Json(agent).into_response())
}

/// POST /api/agents/{agent}/follow-ups/run
async fn run_follow_ups(State(state): State<ApiState>, Path(agent_id): Path<String>) -> ApiResult {
    let report = state
        .scheduler
        .process_agent_follow_ups(&agent_id, Utc::now())
        .await?;
    Ok(Json(report).into_response())
}

/// GET /api/agents/{agent}/contacts/{phone}
async fn get_contact(
    State(state): State<ApiState>,
    Path((agent_id, raw_phone)): Path<(String, String)>,
) -> ApiResult {
    let phone = normalize_phone(&raw_phone, state.processor.default_country())
        .map_err(|e| ApiError::bad_request(e.to_string()))?;
    let contact = state
        .db
        .get_contact(&agent_id, &phone)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("no contact {phone} for agent {agent_id}")))?;
    let messages = state
        .db
        .recent_messages(&agent_id, &phone, CONTACT_HISTORY_LIMIT)
        .await?;
    Ok(Json(json!({ "contact": contact, "messages": messages })).into_response())
}

#[derive(Debug, Deserialize)]
struct ImportBody {
    contacts: Vec<ImportRow>,
}

/// POST /api/agents/{agent}/contacts/import
async fn import_contacts(
    State(state): State<ApiState>,
    Path(agent_id): Path<String>,
    Json(body): Json<ImportBody>,
) -> ApiResult {
    let report = state
        .processor
        .import_contacts(&agent_id, body.contacts, Utc::now())
        .await?;
    Ok(Json(report).into_response())
}

/// GET /api/agents/{agent}/segments/{segment}
async fn get_segment(
    State(state): State<ApiState>,
    Path((agent_id, name)): Path<(String, String)>,
) -> ApiResult {
    let segment: Segment = name.parse().map_err(ApiError::bad_request)?;
    let contacts = segment_contacts(state.db.as_ref(), &agent_id, &segment, Utc::now()).await?;
    Ok(Json(json!({
        "segment": segment.to_string(),
        "count": contacts.len(),
        "contacts": contacts,
    }))
    .into_response())
}

/// GET /api/agents/{agent}/blacklist
async fn list_blacklist(State(state): State<ApiState>, Path(agent_id): Path<String>) -> ApiResult {
    let entries = state.processor.compliance().list_blocked(&agent_id).await?;
    Ok(Json(entries).into_response())
}

#[derive(Debug, Deserialize)]
struct BlockBody {
    phone: String,
    #[serde(default)]
    reason: Option<String>,
    /// Block for every agent instead of just this one.
    #[serde(default)]
    global: bool,
}

/// POST /api/agents/{agent}/blacklist
async fn add_blacklist(
    State(state): State<ApiState>,
    Path(agent_id): Path<String>,
    Json(body): Json<BlockBody>,
) -> ApiResult {
    let phone = normalize_phone(&body.phone, state.processor.default_country())
        .map_err(|e| ApiError::bad_request(e.to_string()))?;
    let scope = if body.global {
        BlacklistScope::Global
    } else {
        BlacklistScope::Agent(agent_id)
    };
    let entry = state
        .processor
        .compliance()
        .block(&phone, scope, body.reason, BlacklistSource::Manual, Utc::now())
        .await?;
    Ok((StatusCode::CREATED, Json(entry)).into_response())
}

#[derive(Debug, Deserialize)]
struct UnblockBody {
    phone: String,
    /// Absent for a global entry.
    #[serde(default)]
    agent_id: Option<String>,
    removed_by: String,
    #[serde(default)]
    reason: Option<String>,
}

/// POST /api/blacklist/remove
async fn remove_blacklist(
    State(state): State<ApiState>,
    Json(body): Json<UnblockBody>,
) -> ApiResult {
    let phone = normalize_phone(&body.phone, state.processor.default_country())
        .map_err(|e| ApiError::bad_request(e.to_string()))?;
    if body.removed_by.trim().is_empty() {
        return Err(ApiError::bad_request("removed_by is required"));
    }
    let scope = match body.agent_id {
        Some(id) if !id.trim().is_empty() => BlacklistScope::Agent(id),
        _ => BlacklistScope::Global,
    };
    let removed = state
        .processor
        .compliance()
        .unblock(&phone, &scope, &body.removed_by, body.reason.as_deref(), Utc::now())
        .await?;
    if !removed {
        return Err(ApiError::not_found(format!("{phone} is not blacklisted ({scope})")));
    }
    Ok(Json(json!({ "removed": true, "phone": phone, "scope": scope })).into_response())
}

/// Build the full router.
pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/inbound", post(inbound))
        .route("/api/agents/{agent}", put(put_agent))
        .route("/api/agents/{agent}/follow-ups/run", post(run_follow_ups))
        .route("/api/agents/{agent}/contacts/import", post(import_contacts))
        .route("/api/agents/{agent}/contacts/{phone}", get(get_contact))
        .route("/api/agents/{agent}/segments/{segment}", get(get_segment))
        .route("/api/agents/{agent}/blacklist", get(list_blacklist).post(add_blacklist))
        .route("/api/blacklist/remove", post(remove_blacklist))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
