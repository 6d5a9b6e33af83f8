//! Follow-up scenario tests against a file-backed store.
//!
//! A contact silent for eight days with two nudges sent gets nudge #3, then
//! is archived once the grace period passes. Scheduler instances are rebuilt
//! between passes to mimic a process restart.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use lead_assist::channels::{NotificationEvent, Notifier, SmsGateway};
use lead_assist::contacts::{AgentProfile, Contact, ContactStatus, Message, MessageKind};
use lead_assist::error::{GatewayError, LlmError};
use lead_assist::followup::{
    FollowUpConfig, FollowUpDecision, FollowUpOutcome, FollowUpScheduler, evaluate,
};
use lead_assist::intelligence::ReplyGenerator;
use lead_assist::llm::{CompletionRequest, CompletionResponse, FinishReason, LlmProvider};
use lead_assist::pipeline::ContactLocks;
use lead_assist::store::{Database, LibSqlBackend};

const AGENT: &str = "solar";
const PHONE: &str = "+33612345678";

/// Always drafts the same nudge.
struct NudgeLlm;

#[async_trait]
impl LlmProvider for NudgeLlm {
    fn model_name(&self) -> &str {
        "stub"
    }

    async fn complete(&self, _request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        Ok(CompletionResponse {
            content: r#"{"send": true, "message": "Did you get a chance to look at the roof survey slots?"}"#.into(),
            input_tokens: 0,
            output_tokens: 0,
            finish_reason: FinishReason::Stop,
        })
    }
}

#[derive(Default)]
struct CountingGateway {
    sent: Mutex<Vec<(String, String)>>,
}

impl CountingGateway {
    fn count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl SmsGateway for CountingGateway {
    fn name(&self) -> &str {
        "counting"
    }

    async fn send(&self, _from: &str, to: &str, body: &str) -> Result<String, GatewayError> {
        let mut sent = self.sent.lock().unwrap();
        sent.push((to.to_string(), body.to_string()));
        Ok(format!("SM{}", sent.len()))
    }
}

struct NullNotifier;

#[async_trait]
impl Notifier for NullNotifier {
    async fn notify(
        &self,
        _agent: &AgentProfile,
        _event: &NotificationEvent,
    ) -> Result<(), GatewayError> {
        Ok(())
    }
}

async fn open(path: &Path) -> Arc<dyn Database> {
    Arc::new(LibSqlBackend::new_local(path).await.unwrap())
}

fn scheduler(db: Arc<dyn Database>, gateway: Arc<CountingGateway>) -> FollowUpScheduler {
    FollowUpScheduler::new(
        db,
        ReplyGenerator::new(Arc::new(NudgeLlm)),
        gateway,
        Arc::new(NullNotifier),
        Arc::new(ContactLocks::new()),
        FollowUpConfig {
            send_delay: std::time::Duration::ZERO,
            ..FollowUpConfig::default()
        },
    )
}

/// Contacted lead, silent since `now - 8d`, with two nudges already sent.
async fn seed(db: &Arc<dyn Database>, now: DateTime<Utc>) {
    db.upsert_agent(&AgentProfile {
        id: AGENT.into(),
        name: "Sunny Roofs".into(),
        from_number: "+15550000001".into(),
        webhook_url: None,
    })
    .await
    .unwrap();

    let mut contact = Contact::new(AGENT, PHONE, now - Duration::days(12));
    db.insert_contact_if_absent(&contact).await.unwrap();
    contact.status = ContactStatus::Contacted;
    contact.last_message_at = Some(now - Duration::days(8));
    db.save_contact(&contact).await.unwrap();

    for (n, days_ago) in [(0u8, 7), (1, 5)] {
        let sent_at = now - Duration::days(days_ago);
        let nudge =
            Message::outbound(AGENT, PHONE, MessageKind::FollowUp, "earlier nudge", sent_at);
        assert!(db.record_follow_up(n, &nudge).await.unwrap());
    }
}

#[tokio::test]
async fn third_nudge_then_archive() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("leads.db");
    let now = Utc::now();

    let db = open(&path).await;
    seed(&db, now).await;

    let contact = db.get_contact(AGENT, PHONE).await.unwrap().unwrap();
    assert!(matches!(
        evaluate(&contact, now, &FollowUpConfig::default()),
        FollowUpDecision::Send { follow_up_number: 3, .. }
    ));

    let gateway = Arc::new(CountingGateway::default());
    let report = scheduler(db.clone(), gateway.clone())
        .process_agent_follow_ups(AGENT, now)
        .await
        .unwrap();
    assert_eq!(report.sent, 1);
    assert!(matches!(
        report.details[0].outcome,
        FollowUpOutcome::Sent { follow_up_number: 3, .. }
    ));

    let contact = db.get_contact(AGENT, PHONE).await.unwrap().unwrap();
    assert_eq!(contact.follow_up_count, 3);
    assert_eq!(contact.status, ContactStatus::Contacted);
    drop(db);

    // "Restart": reopen the file, new scheduler, same instant. Nothing is resent.
    let db = open(&path).await;
    let report = scheduler(db.clone(), gateway.clone())
        .process_agent_follow_ups(AGENT, now)
        .await
        .unwrap();
    assert_eq!(report.sent, 0);
    assert_eq!(report.archived, 0);
    assert_eq!(gateway.count(), 1);

    // Two days later the lead is still silent: archived.
    let later = now + Duration::days(2);
    let report = scheduler(db.clone(), gateway.clone())
        .process_agent_follow_ups(AGENT, later)
        .await
        .unwrap();
    assert_eq!(report.archived, 1);
    assert_eq!(gateway.count(), 1);

    let contact = db.get_contact(AGENT, PHONE).await.unwrap().unwrap();
    assert_eq!(contact.status, ContactStatus::Disqualified);
    assert!(contact.tags.contains_id("sys_disqualified"));

    // Archived contacts are no longer part of a pass.
    let report = scheduler(db, gateway)
        .process_agent_follow_ups(AGENT, later + Duration::days(30))
        .await
        .unwrap();
    assert_eq!(report.evaluated, 0);
}

#[tokio::test]
async fn concurrent_passes_send_once() {
    let dir = tempfile::tempdir().unwrap();
    let db = open(&dir.path().join("leads.db")).await;
    let now = Utc::now();
    seed(&db, now).await;

    let gateway = Arc::new(CountingGateway::default());
    let shared = Arc::new(scheduler(db.clone(), gateway.clone()));
    let (a, b) = tokio::join!(
        shared.process_agent_follow_ups(AGENT, now),
        shared.process_agent_follow_ups(AGENT, now),
    );
    assert_eq!(a.unwrap().sent + b.unwrap().sent, 1);
    assert_eq!(gateway.count(), 1);

    let contact = db.get_contact(AGENT, PHONE).await.unwrap().unwrap();
    assert_eq!(contact.follow_up_count, 3);
}
