use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use lead_assist::api::{ApiState, router};
use lead_assist::channels::{DryRunGateway, Notifier, SmsGateway, TwilioGateway, WebhookNotifier};
use lead_assist::config::AppConfig;
use lead_assist::followup::{FollowUpScheduler, spawn_follow_up_ticker};
use lead_assist::intelligence::ReplyGenerator;
use lead_assist::llm::create_provider;
use lead_assist::pipeline::{ContactLocks, InboundProcessor};
use lead_assist::store::{Database, LibSqlBackend};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env().context("loading configuration")?;

    // Initialize tracing; the guard flushes the file writer on exit.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let _log_guard = match &config.log_dir {
        Some(dir) => {
            let file_appender = tracing_appender::rolling::daily(dir, "lead-assist.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().with_target(false))
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_writer(non_blocking),
                )
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .init();
            None
        }
    };

    info!(version = env!("CARGO_PKG_VERSION"), model = %config.llm.model, "Lead Assist starting");

    // ── Database ─────────────────────────────────────────────────────────
    let db: Arc<dyn Database> = Arc::new(
        LibSqlBackend::new_local(&config.db_path)
            .await
            .with_context(|| format!("opening database at {}", config.db_path.display()))?,
    );
    info!(path = %config.db_path.display(), "Database ready");

    // ── Services ─────────────────────────────────────────────────────────
    let llm = create_provider(&config.llm).context("creating LLM provider")?;

    let gateway: Arc<dyn SmsGateway> = match config.twilio.clone() {
        Some(twilio) => Arc::new(TwilioGateway::new(twilio).context("creating Twilio gateway")?),
        None => {
            warn!("Twilio not configured, SMS will be logged instead of sent");
            Arc::new(DryRunGateway)
        }
    };
    let notifier = WebhookNotifier::new(config.default_webhook_url.clone())
        .context("creating webhook notifier")?;
    let notifier: Arc<dyn Notifier> = Arc::new(notifier);
    let locks = Arc::new(ContactLocks::new());

    let processor = Arc::new(InboundProcessor::new(
        db.clone(),
        llm.clone(),
        gateway.clone(),
        notifier.clone(),
        locks.clone(),
        config.pipeline.clone(),
        config.escalation.clone(),
    ));
    let scheduler = Arc::new(FollowUpScheduler::new(
        db.clone(),
        ReplyGenerator::new(llm),
        gateway,
        notifier,
        locks,
        config.follow_up.clone(),
    ));

    let _ticker = spawn_follow_up_ticker(scheduler.clone(), config.follow_up_schedule.clone());

    // ── HTTP ─────────────────────────────────────────────────────────────
    let app = router(ApiState {
        db,
        processor,
        scheduler,
    });
    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("binding {}", config.bind_addr))?;
    info!(addr = %config.bind_addr, "HTTP server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down");
        })
        .await
        .context("HTTP server")?;
    Ok(())
}
