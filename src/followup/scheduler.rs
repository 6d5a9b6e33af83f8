//! Follow-up scheduler: walks an agent's silent contacts and sends due nudges.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use super::cadence::{FollowUpConfig, FollowUpDecision, days_silent, evaluate};
use crate::channels::{NotificationEvent, NotificationKind, Notifier, SmsGateway, spawn_notify};
use crate::compliance::ComplianceGate;
use crate::contacts::{
    AgentProfile, ContactStatus, LifecycleEvent, MAX_FOLLOW_UPS, Message, MessageKind, auto_tag,
};
use crate::error::PipelineError;
use crate::intelligence::{FollowUpDraft, NudgeContext, ReplyGenerator};
use crate::pipeline::ContactLocks;
use crate::store::{ContactFilter, Database};

const REPLIED_AFTER_LAST_NUDGE: &str = "lead replied after the last follow-up";

/// What happened to one contact during a pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum FollowUpOutcome {
    Sent { follow_up_number: u8, delivery_id: String },
    NotDue { next_in_days: i64 },
    Blocked { reason: Option<String> },
    Declined { reason: String },
    /// Moved to `disqualified` after the last nudge went unanswered.
    Archived,
    /// Nothing to do: state changed between listing and locking, or the
    /// lead answered the last nudge.
    Skipped { reason: String },
    /// The contact could not be processed; the pass moved on.
    Failed { error: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct FollowUpDetail {
    pub phone: String,
    #[serde(flatten)]
    pub outcome: FollowUpOutcome,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct FollowUpReport {
    pub agent_id: String,
    pub evaluated: usize,
    pub sent: usize,
    pub skipped: usize,
    pub failed: usize,
    pub archived: usize,
    pub details: Vec<FollowUpDetail>,
}

pub struct FollowUpScheduler {
    db: Arc<dyn Database>,
    compliance: ComplianceGate,
    generator: ReplyGenerator,
    gateway: Arc<dyn SmsGateway>,
    notifier: Arc<dyn Notifier>,
    locks: Arc<ContactLocks>,
    config: FollowUpConfig,
}

impl FollowUpScheduler {
    pub fn new(
        db: Arc<dyn Database>,
        generator: ReplyGenerator,
        gateway: Arc<dyn SmsGateway>,
        notifier: Arc<dyn Notifier>,
        locks: Arc<ContactLocks>,
        config: FollowUpConfig,
    ) -> Self {
        Self {
            compliance: ComplianceGate::new(db.clone()),
            db,
            generator,
            gateway,
            notifier,
            locks,
            config,
        }
    }

    /// Run one follow-up pass over an agent's `contacted` contacts.
    ///
    /// A failure on one contact is logged and counted; the pass continues.
    pub async fn process_agent_follow_ups(
        &self,
        agent_id: &str,
        now: DateTime<Utc>,
    ) -> Result<FollowUpReport, PipelineError> {
        let agent = self
            .db
            .get_agent(agent_id)
            .await?
            .ok_or_else(|| PipelineError::UnknownAgent(agent_id.to_string()))?;

        let filter = ContactFilter {
            status: Some(ContactStatus::Contacted),
            ..ContactFilter::for_agent(agent_id)
        };
        let contacts = self.db.list_contacts(&filter).await?;

        let mut report = FollowUpReport {
            agent_id: agent_id.to_string(),
            ..Default::default()
        };

        for contact in contacts {
            report.evaluated += 1;
            // Cheap pre-check so the common "not due yet" case never locks.
            let early = match evaluate(&contact, now, &self.config) {
                FollowUpDecision::Wait { next_in_days } => {
                    Some(FollowUpOutcome::NotDue { next_in_days })
                }
                FollowUpDecision::Engaged => Some(FollowUpOutcome::Skipped {
                    reason: REPLIED_AFTER_LAST_NUDGE.into(),
                }),
                _ => None,
            };
            if let Some(outcome) = early {
                report.skipped += 1;
                report.details.push(FollowUpDetail {
                    phone: contact.phone,
                    outcome,
                });
                continue;
            }

            match self.process_contact(&agent, &contact.phone, now).await {
                Ok(outcome) => {
                    match &outcome {
                        FollowUpOutcome::Sent { .. } => report.sent += 1,
                        FollowUpOutcome::Archived => report.archived += 1,
                        _ => report.skipped += 1,
                    }
                    let sent = matches!(outcome, FollowUpOutcome::Sent { .. });
                    report.details.push(FollowUpDetail {
                        phone: contact.phone,
                        outcome,
                    });
                    if sent && !self.config.send_delay.is_zero() {
                        tokio::time::sleep(self.config.send_delay).await;
                    }
                }
                Err(e) => {
                    warn!(
                        agent = %agent_id,
                        phone = %contact.phone,
                        error = %e,
                        "Follow-up failed"
                    );
                    report.failed += 1;
                    report.details.push(FollowUpDetail {
                        phone: contact.phone,
                        outcome: FollowUpOutcome::Failed {
                            error: e.to_string(),
                        },
                    });
                }
            }
        }

        info!(
            agent = %agent_id,
            evaluated = report.evaluated,
            sent = report.sent,
            skipped = report.skipped,
            failed = report.failed,
            archived = report.archived,
            "Follow-up pass complete"
        );
        Ok(report)
    }

    /// One pass per registered agent, concurrently.
    pub async fn run_all_agents(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<(String, Result<FollowUpReport, PipelineError>)>, PipelineError> {
        let agent_ids = self.db.list_agent_ids().await?;
        let passes = agent_ids.iter().map(|id| self.process_agent_follow_ups(id, now));
        let results = join_all(passes).await;
        Ok(agent_ids.into_iter().zip(results).collect())
    }

    /// Re-evaluate and act on one contact while holding its lock.
    async fn process_contact(
        &self,
        agent: &AgentProfile,
        phone: &str,
        now: DateTime<Utc>,
    ) -> Result<FollowUpOutcome, PipelineError> {
        let _guard = self.locks.acquire(&agent.id, phone).await;

        let Some(mut contact) = self.db.get_contact(&agent.id, phone).await? else {
            return Ok(FollowUpOutcome::Skipped {
                reason: "contact no longer exists".into(),
            });
        };
        if contact.status != ContactStatus::Contacted {
            return Ok(FollowUpOutcome::Skipped {
                reason: format!("status is now {}", contact.status),
            });
        }

        let follow_up_number = match evaluate(&contact, now, &self.config) {
            FollowUpDecision::Wait { next_in_days } => {
                return Ok(FollowUpOutcome::NotDue { next_in_days });
            }
            FollowUpDecision::Engaged => {
                return Ok(FollowUpOutcome::Skipped {
                    reason: REPLIED_AFTER_LAST_NUDGE.into(),
                });
            }
            FollowUpDecision::Archive => {
                // The last nudge gets the same gap to be answered as any other.
                if let Some(last) = contact.last_follow_up_at {
                    let ready_at = last + self.config.min_gap;
                    if ready_at > now {
                        return Ok(FollowUpOutcome::NotDue {
                            next_in_days: ((ready_at - now).num_hours() + 23) / 24,
                        });
                    }
                }
                contact.status = contact.status.transition(LifecycleEvent::FollowUpsExhausted);
                contact.tags = auto_tag(&contact.tags, contact.score, contact.status);
                contact.updated_at = now;
                self.db.save_contact(&contact).await?;
                info!(agent = %agent.id, phone = %phone, "Follow-ups exhausted, contact archived");

                spawn_notify(
                    self.notifier.clone(),
                    agent.clone(),
                    NotificationEvent {
                        event: NotificationKind::FollowUpsExhausted,
                        agent_id: agent.id.clone(),
                        phone: phone.to_string(),
                        status: contact.status,
                        score: contact.score,
                        urgency: None,
                        reason: format!("No reply after {MAX_FOLLOW_UPS} follow-ups"),
                        internal_note: None,
                        occurred_at: now,
                    },
                );
                return Ok(FollowUpOutcome::Archived);
            }
            FollowUpDecision::Send { follow_up_number, .. } => follow_up_number,
        };

        let block = self.compliance.check_blocked(phone, &agent.id).await?;
        if block.blocked {
            debug!(agent = %agent.id, phone = %phone, "Follow-up suppressed by blacklist");
            return Ok(FollowUpOutcome::Blocked {
                reason: block.reason,
            });
        }

        let history = self
            .db
            .recent_messages(&agent.id, phone, self.config.history_limit)
            .await?;
        let draft = self
            .generator
            .generate_follow_up(&NudgeContext {
                agent,
                history: &history,
                context: &contact.context,
                days_silent: days_silent(&contact, now),
                prior_follow_ups: contact.follow_up_count,
            })
            .await?;

        let body = match draft {
            FollowUpDraft::Send { message } => message,
            FollowUpDraft::Decline { reason } => {
                debug!(agent = %agent.id, phone = %phone, reason = %reason, "Follow-up declined");
                return Ok(FollowUpOutcome::Declined { reason });
            }
        };

        let delivery_id = self.gateway.send(&agent.from_number, phone, &body).await?;
        let message = Message::outbound(&agent.id, phone, MessageKind::FollowUp, body, now);
        let recorded = self
            .db
            .record_follow_up(contact.follow_up_count, &message)
            .await?;
        if !recorded {
            warn!(
                agent = %agent.id,
                phone = %phone,
                expected = contact.follow_up_count,
                "Follow-up sent but counter had moved; not recorded twice"
            );
        }
        info!(
            agent = %agent.id,
            phone = %phone,
            follow_up_number,
            gateway = self.gateway.name(),
            "Follow-up sent"
        );
        Ok(FollowUpOutcome::Sent {
            follow_up_number,
            delivery_id,
        })
    }
}

/// Run a follow-up pass for every agent at each upcoming fire time of
/// `schedule`.
pub fn spawn_follow_up_ticker(
    scheduler: Arc<FollowUpScheduler>,
    schedule: cron::Schedule,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let Some(next) = schedule.upcoming(Utc).next() else {
                warn!("Follow-up schedule has no upcoming fire time, ticker stopped");
                return;
            };
            let wait = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);
            debug!(next = %next, "Next follow-up pass scheduled");
            tokio::time::sleep(wait).await;

            match scheduler.run_all_agents(Utc::now()).await {
                Ok(results) => {
                    for (agent_id, result) in results {
                        if let Err(e) = result {
                            error!(agent = %agent_id, error = %e, "Follow-up pass failed");
                        }
                    }
                }
                Err(e) => error!(error = %e, "Could not list agents for follow-up pass"),
            }
        }
    })
}
