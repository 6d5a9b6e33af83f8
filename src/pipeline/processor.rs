//! Inbound processor: runs one lead message through compliance, analysis,
//! lifecycle, and reply.
//!
//! Flow (all under the contact's lock):
//! 1. Validate, normalize the number, store the message
//! 2. Opt-out keywords and blacklist (short-circuit, no LLM)
//! 3. Classify and extract concurrently, then score
//! 4. Escalation verdict, lifecycle transitions, tags
//! 5. Holding message or auto-reply, re-checked against the blacklist
//!    right before sending

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use super::locks::ContactLocks;
use super::types::{ImportReport, ImportRow, InboundEvent, PipelineAction, PipelineOutcome};
use crate::channels::{NotificationEvent, NotificationKind, Notifier, SmsGateway, spawn_notify};
use crate::compliance::{ComplianceGate, detect_opt_out};
use crate::config::env_or;
use crate::contacts::{
    AgentProfile, Contact, ContactStatus, LifecycleEvent, Message, MessageKind, auto_tag,
    normalize_phone,
};
use crate::error::{ConfigError, PipelineError};
use crate::intelligence::{
    ContextExtractor, EscalationConfig, EscalationDecision, EscalationEvaluator, EscalationInput,
    IntentClassifier, QualificationLabel, QualificationScorer, ReplyGenerator, Rubric,
};
use crate::llm::LlmProvider;
use crate::store::Database;

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Calling code (without `+`) for national-format numbers.
    pub default_country: String,
    /// Conversation messages loaded for analysis.
    pub history_limit: u32,
    /// Send generated replies. Escalation holding messages are sent either way.
    pub auto_reply: bool,
    pub rubric: Rubric,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            default_country: "1".into(),
            history_limit: 20,
            auto_reply: true,
            rubric: Rubric::bant(),
        }
    }
}

impl PipelineConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let rubric = match std::env::var("LEAD_ASSIST_RUBRIC_PATH").ok().map(PathBuf::from) {
            Some(path) => {
                let raw = std::fs::read_to_string(&path)?;
                serde_json::from_str(&raw).map_err(|e| ConfigError::InvalidValue {
                    key: "LEAD_ASSIST_RUBRIC_PATH".into(),
                    message: format!("{}: {e}", path.display()),
                })?
            }
            None => defaults.rubric,
        };
        Ok(Self {
            default_country: env_or("LEAD_ASSIST_DEFAULT_COUNTRY", defaults.default_country)?,
            history_limit: env_or("LEAD_ASSIST_HISTORY_LIMIT", defaults.history_limit)?,
            auto_reply: env_or("LEAD_ASSIST_AUTO_REPLY", defaults.auto_reply)?,
            rubric,
        })
    }
}

/// Processes inbound SMS for every agent.
pub struct InboundProcessor {
    db: Arc<dyn Database>,
    compliance: ComplianceGate,
    extractor: ContextExtractor,
    classifier: IntentClassifier,
    scorer: QualificationScorer,
    escalation: EscalationEvaluator,
    replies: ReplyGenerator,
    gateway: Arc<dyn SmsGateway>,
    notifier: Arc<dyn Notifier>,
    locks: Arc<ContactLocks>,
    config: PipelineConfig,
    min_confidence: f32,
}

impl InboundProcessor {
    pub fn new(
        db: Arc<dyn Database>,
        llm: Arc<dyn LlmProvider>,
        gateway: Arc<dyn SmsGateway>,
        notifier: Arc<dyn Notifier>,
        locks: Arc<ContactLocks>,
        config: PipelineConfig,
        escalation: EscalationConfig,
    ) -> Self {
        Self {
            compliance: ComplianceGate::new(db.clone()),
            extractor: ContextExtractor::new(llm.clone()),
            classifier: IntentClassifier::new(llm.clone()),
            scorer: QualificationScorer::new(llm.clone(), config.rubric.clone()),
            min_confidence: escalation.min_confidence,
            escalation: EscalationEvaluator::new(llm.clone(), escalation),
            replies: ReplyGenerator::new(llm),
            db,
            gateway,
            notifier,
            locks,
            config,
        }
    }

    pub fn compliance(&self) -> &ComplianceGate {
        &self.compliance
    }

    pub fn default_country(&self) -> &str {
        &self.config.default_country
    }

    /// Process one inbound message end to end.
    pub async fn process(&self, event: InboundEvent) -> Result<PipelineOutcome, PipelineError> {
        let body = event.body.trim();
        if body.is_empty() {
            return Err(PipelineError::InvalidInput("empty message body".into()));
        }
        let phone = normalize_phone(&event.phone, &self.config.default_country)
            .map_err(|e| PipelineError::InvalidInput(e.to_string()))?;
        let agent = self
            .db
            .get_agent(&event.agent_id)
            .await?
            .ok_or_else(|| PipelineError::UnknownAgent(event.agent_id.clone()))?;
        let now = event.received_at;

        info!(
            agent = %agent.id,
            phone = %phone,
            chars = body.chars().count(),
            "Processing inbound message"
        );

        let _guard = self.locks.acquire(&agent.id, &phone).await;

        self.db
            .insert_contact_if_absent(&Contact::new(&agent.id, &phone, now))
            .await?;
        let mut contact = self
            .db
            .get_contact(&agent.id, &phone)
            .await?
            .ok_or_else(|| PipelineError::ContactNotFound {
                agent_id: agent.id.clone(),
                phone: phone.clone(),
            })?;

        self.db
            .insert_message(&Message::inbound(&agent.id, &phone, body, now))
            .await?;
        contact.last_message_at = Some(now);
        contact.updated_at = now;

        // Step 1: compliance (fast, no LLM)
        let opt_out = detect_opt_out(body);
        if opt_out.is_opt_out {
            self.db.save_contact(&contact).await?;
            let keyword = opt_out.matched_keyword.unwrap_or_default();
            self.compliance
                .handle_opt_out(&phone, &agent.id, keyword, now)
                .await?;
            contact.status = contact.status.transition(LifecycleEvent::OptedOut);
            self.notify(
                &agent,
                &contact,
                NotificationKind::OptOut,
                None,
                format!("Opt-out keyword '{keyword}'"),
                now,
            );
            return Ok(short_circuit(contact, PipelineAction::OptedOut));
        }

        let block = self.compliance.check_blocked(&phone, &agent.id).await?;
        if block.blocked || contact.status.is_terminal() {
            self.db.save_contact(&contact).await?;
            debug!(
                agent = %agent.id,
                phone = %phone,
                scope = ?block.scope,
                "Sender is blocked, message stored only"
            );
            return Ok(short_circuit(contact, PipelineAction::Blocked));
        }

        // Step 2: analysis
        let history = self
            .db
            .recent_messages(&agent.id, &phone, self.config.history_limit)
            .await?;
        let prior = &history[..history.len().saturating_sub(1)];
        let (intent, extraction) = tokio::join!(
            self.classifier.classify(body, prior),
            self.extractor.extract(body, &contact.context),
        );
        contact.context = extraction.merged;
        if contact.name.is_none() {
            contact.name = contact.context.name.clone();
        }

        let score = self.scorer.score(&history, &contact.context).await;
        match score.total {
            // A neutral fallback never replaces a real earlier score.
            Some(_) if score.fallback && contact.score.is_some() => {}
            Some(total) => contact.score = Some(total),
            None => {}
        }

        let turns = self.db.count_inbound_messages(&agent.id, &phone).await?;
        let escalation = if contact.status == ContactStatus::Escalated {
            EscalationDecision::none()
        } else {
            self.escalation
                .should_escalate(EscalationInput {
                    message: body,
                    history: &history,
                    context: &contact.context,
                    intent: &intent,
                    score: contact.score,
                    turns,
                })
                .await
        };

        // Step 3: lifecycle and tags
        let label = QualificationLabel::from_score(contact.score);
        contact.status = contact.status.transition(LifecycleEvent::Reengaged);
        let before = contact.status;
        if label == QualificationLabel::Hot && intent.confirms_buying(self.min_confidence) {
            contact.status = contact.status.transition(LifecycleEvent::Qualified);
        }
        let newly_qualified =
            before != ContactStatus::Qualified && contact.status == ContactStatus::Qualified;
        contact.tags = auto_tag(&contact.tags, contact.score, contact.status);
        if escalation.should_escalate {
            contact.status = contact.status.transition(LifecycleEvent::Escalated);
            contact.tags = auto_tag(&contact.tags, contact.score, contact.status);
        }
        self.db.save_contact(&contact).await?;

        // Step 4: outbound
        let (text, kind) = if escalation.should_escalate {
            (escalation.suggested_message.clone(), MessageKind::Escalation)
        } else if self.config.auto_reply && contact.status.allows_automation() {
            let reply = self
                .replies
                .generate_reply(&agent, &history, &contact.context, &intent)
                .await;
            (Some(reply.text), MessageKind::AutoReply)
        } else {
            (None, MessageKind::AutoReply)
        };

        let reply = match text {
            Some(text) => self.deliver(&agent, &mut contact, kind, text, now).await?,
            None => None,
        };

        if escalation.should_escalate {
            self.notify(
                &agent,
                &contact,
                NotificationKind::Escalation,
                Some(&escalation),
                escalation.reason.clone(),
                now,
            );
        } else if newly_qualified {
            self.notify(
                &agent,
                &contact,
                NotificationKind::Qualified,
                None,
                "Hot lead with confirmed buying intent".into(),
                now,
            );
        }

        let action = if escalation.should_escalate {
            PipelineAction::Escalated
        } else if reply.is_some() {
            PipelineAction::Replied
        } else {
            PipelineAction::NoReply
        };
        info!(
            agent = %agent.id,
            phone = %phone,
            action = action.label(),
            intent = intent.primary_intent.as_str(),
            score = ?contact.score,
            status = %contact.status,
            "Inbound message processed"
        );

        Ok(PipelineOutcome {
            agent_id: contact.agent_id.clone(),
            phone: contact.phone.clone(),
            action,
            status: contact.status,
            intent: Some(intent.primary_intent),
            label,
            score: Some(score),
            tags: contact.tags.ids(),
            escalation: escalation.should_escalate.then_some(escalation),
            reply,
            new_facts: extraction
                .new_info
                .facts()
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
        })
    }

    /// Send `text` unless the number got blocked meanwhile, then record it.
    /// A delivery failure is logged and leaves the contact untouched.
    async fn deliver(
        &self,
        agent: &AgentProfile,
        contact: &mut Contact,
        kind: MessageKind,
        text: String,
        now: DateTime<Utc>,
    ) -> Result<Option<String>, PipelineError> {
        let block = self.compliance.check_blocked(&contact.phone, &agent.id).await?;
        if block.blocked {
            debug!(agent = %agent.id, phone = %contact.phone, "Reply suppressed by blacklist");
            return Ok(None);
        }

        if let Err(e) = self.gateway.send(&agent.from_number, &contact.phone, &text).await {
            warn!(agent = %agent.id, phone = %contact.phone, error = %e, "Reply delivery failed");
            return Ok(None);
        }
        self.db
            .insert_message(&Message::outbound(&agent.id, &contact.phone, kind, text.as_str(), now))
            .await?;
        contact.status = contact.status.transition(LifecycleEvent::OutboundSent);
        contact.updated_at = now;
        self.db.save_contact(contact).await?;
        Ok(Some(text))
    }

    fn notify(
        &self,
        agent: &AgentProfile,
        contact: &Contact,
        kind: NotificationKind,
        escalation: Option<&EscalationDecision>,
        reason: String,
        now: DateTime<Utc>,
    ) {
        spawn_notify(
            self.notifier.clone(),
            agent.clone(),
            NotificationEvent {
                event: kind,
                agent_id: agent.id.clone(),
                phone: contact.phone.clone(),
                status: contact.status,
                score: contact.score,
                urgency: escalation.map(|e| e.urgency),
                reason,
                internal_note: escalation.and_then(|e| e.internal_note.clone()),
                occurred_at: now,
            },
        );
    }

    /// Create `pending` contacts for an agent from a list of raw numbers.
    ///
    /// Malformed numbers are counted and reported; blacklisted numbers are
    /// skipped; numbers already known are left as they are.
    pub async fn import_contacts(
        &self,
        agent_id: &str,
        rows: Vec<ImportRow>,
        now: DateTime<Utc>,
    ) -> Result<ImportReport, PipelineError> {
        if self.db.get_agent(agent_id).await?.is_none() {
            return Err(PipelineError::UnknownAgent(agent_id.to_string()));
        }

        let mut report = ImportReport::default();
        for row in rows {
            let phone = match normalize_phone(&row.phone, &self.config.default_country) {
                Ok(phone) => phone,
                Err(e) => {
                    report.invalid += 1;
                    report.rejected.push((row.phone, e.to_string()));
                    continue;
                }
            };
            if self.compliance.check_blocked(&phone, agent_id).await?.blocked {
                report.blacklisted += 1;
                continue;
            }
            let mut contact = Contact::new(agent_id, &phone, now);
            contact.name = row.name.filter(|n| !n.trim().is_empty());
            if self.db.insert_contact_if_absent(&contact).await? {
                report.created += 1;
            } else {
                report.existing += 1;
            }
        }

        info!(
            agent = %agent_id,
            created = report.created,
            existing = report.existing,
            blacklisted = report.blacklisted,
            invalid = report.invalid,
            "Contact import complete"
        );
        Ok(report)
    }
}

fn short_circuit(contact: Contact, action: PipelineAction) -> PipelineOutcome {
    PipelineOutcome {
        label: QualificationLabel::from_score(contact.score),
        tags: contact.tags.ids(),
        agent_id: contact.agent_id,
        phone: contact.phone,
        action,
        status: contact.status,
        intent: None,
        score: None,
        escalation: None,
        reply: None,
        new_facts: Vec::new(),
    }
}
