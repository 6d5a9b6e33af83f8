//! Configuration types.
//!
//! Everything is read from `LEAD_ASSIST_*` environment variables with
//! documented defaults. Component configs own their `from_env`; this module
//! assembles them.

use std::fmt::Display;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

use crate::channels::TwilioConfig;
use crate::error::ConfigError;
use crate::followup::FollowUpConfig;
use crate::intelligence::EscalationConfig;
use crate::llm::LlmConfig;
use crate::pipeline::PipelineConfig;

/// Default follow-up schedule: top of every hour.
pub const DEFAULT_FOLLOW_UP_CRON: &str = "0 0 * * * *";

/// Read `key` and parse it, or return `default` when unset.
///
/// A set but unparseable value is an error, not a silent default.
pub fn env_or<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    match std::env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => {
            raw.trim()
                .parse()
                .map_err(|e: T::Err| ConfigError::InvalidValue {
                    key: key.to_string(),
                    message: e.to_string(),
                })
        }
        _ => Ok(default),
    }
}

/// Parse a cron expression for the follow-up ticker.
pub fn parse_schedule(expr: &str) -> Result<cron::Schedule, ConfigError> {
    cron::Schedule::from_str(expr).map_err(|e| ConfigError::InvalidValue {
        key: "LEAD_ASSIST_FOLLOWUP_CRON".into(),
        message: format!("invalid cron '{expr}': {e}"),
    })
}

/// Top-level application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// HTTP listen address.
    pub bind_addr: SocketAddr,
    /// libSQL database file.
    pub db_path: PathBuf,
    /// Daily rolling log files are written here when set.
    pub log_dir: Option<PathBuf>,
    /// Schedule for the automatic follow-up pass.
    pub follow_up_schedule: cron::Schedule,
    /// Used for agents without their own webhook.
    pub default_webhook_url: Option<String>,
    pub llm: LlmConfig,
    /// `None` runs with the dry-run SMS gateway.
    pub twilio: Option<TwilioConfig>,
    pub pipeline: PipelineConfig,
    pub follow_up: FollowUpConfig,
    pub escalation: EscalationConfig,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let cron_expr: String =
            env_or("LEAD_ASSIST_FOLLOWUP_CRON", DEFAULT_FOLLOW_UP_CRON.to_string())?;

        Ok(Self {
            bind_addr: env_or("LEAD_ASSIST_BIND", SocketAddr::from(([127, 0, 0, 1], 8080)))?,
            db_path: env_or("LEAD_ASSIST_DB_PATH", PathBuf::from("data/lead-assist.db"))?,
            log_dir: std::env::var("LEAD_ASSIST_LOG_DIR").ok().map(PathBuf::from),
            follow_up_schedule: parse_schedule(&cron_expr)?,
            default_webhook_url: std::env::var("LEAD_ASSIST_WEBHOOK_URL").ok(),
            llm: LlmConfig::from_env()?,
            twilio: TwilioConfig::from_env()?,
            pipeline: PipelineConfig::from_env()?,
            follow_up: FollowUpConfig::from_env()?,
            escalation: EscalationConfig::from_env()?,
        })
    }
}
