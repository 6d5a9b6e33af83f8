//! Error types for Lead Assist.
//!
//! One enum per seam. Analysis code never surfaces [`LlmError`] to a lead:
//! it falls back locally and logs. Only the follow-up generator propagates
//! it, so an ungenerated nudge is counted as failed instead of sent.

use std::time::Duration;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Delivery error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),
}

/// Bad or missing `LEAD_ASSIST_*` settings.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    MissingEnvVar(String),

    #[error("{key} is invalid: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Could not read config file: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Could not open database: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("{entity} {id} not found")]
    NotFound { entity: String, id: String },

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Stored JSON is invalid: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for DatabaseError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// Completion-service errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("{provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("{provider} rate limited (retry after {retry_after:?})")]
    RateLimited {
        provider: String,
        retry_after: Option<Duration>,
    },

    #[error("{provider} returned an unusable response: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("{provider} rejected the API key")]
    AuthFailed { provider: String },

    #[error("Response is not the expected JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl LlmError {
    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::RateLimited { .. } | Self::RequestFailed { .. })
    }
}

/// Outbound delivery errors (SMS gateway, webhooks).
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("SMS to {to} failed: {reason}")]
    SendFailed { to: String, reason: String },

    #[error("Gateway answered {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("HTTP error: {0}")]
    Http(String),
}

/// Errors from inbound processing, imports, and follow-up passes.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Unknown agent: {0}")]
    UnknownAgent(String),

    #[error("Contact not found: {agent_id}/{phone}")]
    ContactNotFound { agent_id: String, phone: String },

    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error(transparent)]
    Delivery(#[from] GatewayError),

    #[error(transparent)]
    Llm(#[from] LlmError),
}

pub type Result<T> = std::result::Result<T, Error>;
