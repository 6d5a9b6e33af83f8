//! HTTP surface tests, driven through the router with `oneshot`.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::{Value, json};
use tower::ServiceExt;

use lead_assist::api::{ApiState, router};
use lead_assist::channels::{NotificationEvent, Notifier, SmsGateway};
use lead_assist::contacts::AgentProfile;
use lead_assist::error::{GatewayError, LlmError};
use lead_assist::followup::{FollowUpConfig, FollowUpScheduler};
use lead_assist::intelligence::{EscalationConfig, ReplyGenerator};
use lead_assist::llm::{CompletionRequest, CompletionResponse, FinishReason, LlmProvider};
use lead_assist::pipeline::{ContactLocks, InboundProcessor, PipelineConfig};
use lead_assist::store::{Database, LibSqlBackend};

/// Scores every lead hot; everything else gets a plain reply.
struct StubLlm;

#[async_trait]
impl LlmProvider for StubLlm {
    fn model_name(&self) -> &str {
        "stub"
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let system = request.system_prompt().unwrap_or_default();
        let content = if system.contains("score sales lead") {
            r#"{"scores": {"budget": {"points": 25}, "authority": {"points": 25}, "need": {"points": 20}, "timing": {"points": 15}}}"#
        } else if system.contains("classify the intent") {
            r#"{"primary_intent": "product_question", "confidence": 0.8}"#
        } else if system.contains("extract facts") {
            r#"{"new_info": {"company": "Dupont SARL"}}"#
        } else {
            r#"{"message": "Thanks! What size is your roof?"}"#
        };
        Ok(CompletionResponse {
            content: content.into(),
            input_tokens: 0,
            output_tokens: 0,
            finish_reason: FinishReason::Stop,
        })
    }
}

#[derive(Default)]
struct Outbox {
    sent: Mutex<usize>,
}

#[async_trait]
impl SmsGateway for Outbox {
    fn name(&self) -> &str {
        "outbox"
    }

    async fn send(&self, _from: &str, _to: &str, _body: &str) -> Result<String, GatewayError> {
        let mut sent = self.sent.lock().unwrap();
        *sent += 1;
        Ok(format!("SM{sent}"))
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

async fn app() -> Router {
    let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
    let llm: Arc<dyn LlmProvider> = Arc::new(StubLlm);
    let gateway: Arc<dyn SmsGateway> = Arc::new(Outbox::default());
    let notifier: Arc<dyn Notifier> = Arc::new(NullNotifier);
    let locks = Arc::new(ContactLocks::new());

    let processor = Arc::new(InboundProcessor::new(
        db.clone(),
        llm.clone(),
        gateway.clone(),
        notifier.clone(),
        locks.clone(),
        PipelineConfig {
            default_country: "33".into(),
            ..PipelineConfig::default()
        },
        EscalationConfig::default(),
    ));
    let scheduler = Arc::new(FollowUpScheduler::new(
        db.clone(),
        ReplyGenerator::new(llm),
        gateway,
        notifier,
        locks,
        FollowUpConfig::default(),
    ));
    router(ApiState {
        db,
        processor,
        scheduler,
    })
}

async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let req = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(match body {
            Some(v) => Body::from(v.to_string()),
            None => Body::empty(),
        })
        .unwrap();
    let res = app.clone().oneshot(req).await.unwrap();
    let status = res.status();
    let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

async fn with_agent() -> Router {
    let app = app().await;
    let (status, _) = call(
        &app,
        "PUT",
        "/api/agents/solar",
        Some(json!({"name": "Sunny Roofs", "from_number": "+15550000001"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    app
}

#[tokio::test]
async fn health_reports_ok() {
    let app = app().await;
    let (status, json) = call(&app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
}

#[tokio::test]
async fn inbound_then_contact_and_segment() {
    let app = with_agent().await;

    let (status, outcome) = call(
        &app,
        "POST",
        "/api/inbound",
        Some(json!({
            "agent_id": "solar",
            "phone": "06 12 34 56 78",
            "body": "Do you install on flat roofs?"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(outcome["phone"], "+33612345678");
    assert_eq!(outcome["action"], "replied");
    assert_eq!(outcome["label"], "hot");

    let (status, view) = call(&app, "GET", "/api/agents/solar/contacts/+33612345678", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(view["contact"]["context"]["company"], "Dupont SARL");
    assert_eq!(view["messages"].as_array().unwrap().len(), 2);

    let (status, hot) = call(&app, "GET", "/api/agents/solar/segments/hot", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(hot["count"], 1);

    let (_, cold) = call(&app, "GET", "/api/agents/solar/segments/cold", None).await;
    assert_eq!(cold["count"], 0);
}

#[tokio::test]
async fn bad_requests_are_reported() {
    let app = with_agent().await;

    let (status, json) = call(&app, "GET", "/api/agents/solar/segments/lukewarm", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["error"].as_str().unwrap().contains("lukewarm"));

    let (status, _) = call(
        &app,
        "POST",
        "/api/inbound",
        Some(json!({"agent_id": "solar", "phone": "+33612345678", "body": "   "})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = call(
        &app,
        "POST",
        "/api/inbound",
        Some(json!({"agent_id": "ghost", "phone": "+33612345678", "body": "hi"})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = call(&app, "GET", "/api/agents/solar/contacts/+33699999999", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn blacklist_add_list_remove() {
    let app = with_agent().await;

    let (status, entry) = call(
        &app,
        "POST",
        "/api/agents/solar/blacklist",
        Some(json!({"phone": "0612345678", "reason": "asked by phone"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(entry["phone"], "+33612345678");

    let (_, list) = call(&app, "GET", "/api/agents/solar/blacklist", None).await;
    assert_eq!(list.as_array().unwrap().len(), 1);

    let (_, outcome) = call(
        &app,
        "POST",
        "/api/inbound",
        Some(json!({"agent_id": "solar", "phone": "+33612345678", "body": "hello"})),
    )
    .await;
    assert_eq!(outcome["action"], "blocked");

    let remove = json!({"phone": "+33612345678", "agent_id": "solar", "removed_by": "ops"});
    let (status, _) = call(&app, "POST", "/api/blacklist/remove", Some(remove.clone())).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = call(&app, "POST", "/api/blacklist/remove", Some(remove)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, list) = call(&app, "GET", "/api/agents/solar/blacklist", None).await;
    assert!(list.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn import_and_follow_up_run() {
    let app = with_agent().await;

    let (status, report) = call(
        &app,
        "POST",
        "/api/agents/solar/contacts/import",
        Some(json!({"contacts": [
            {"phone": "+33600000001", "name": "Ana"},
            {"phone": "06 00 00 00 02"},
            {"phone": "abc"}
        ]})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["created"], 2);
    assert_eq!(report["invalid"], 1);

    // Imported contacts are pending, so the pass has nothing to do yet.
    let (status, run) = call(&app, "POST", "/api/agents/solar/follow-ups/run", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(run["evaluated"], 0);
    assert_eq!(run["sent"], 0);

    let (status, _) = call(&app, "POST", "/api/agents/ghost/follow-ups/run", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
