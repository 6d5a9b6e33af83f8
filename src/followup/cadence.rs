//! Follow-up cadence: a pure decision over persisted contact state.
//!
//! Nothing here depends on in-memory progress, so re-running a pass after a
//! restart re-derives exactly the same decisions.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::env_or;
use crate::contacts::{Contact, MAX_FOLLOW_UPS};
use crate::error::ConfigError;

/// One cadence row: nudge `follow_up_number` becomes due `day` days into
/// the silence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CadenceStep {
    pub day: i64,
    pub follow_up_number: u8,
}

/// Day 1 → #1, day 3 → #2, day 7 → #3.
pub const DEFAULT_CADENCE: [CadenceStep; 3] = [
    CadenceStep { day: 1, follow_up_number: 1 },
    CadenceStep { day: 3, follow_up_number: 2 },
    CadenceStep { day: 7, follow_up_number: 3 },
];

#[derive(Debug, Clone, PartialEq)]
pub struct FollowUpConfig {
    /// Ascending by day.
    pub cadence: Vec<CadenceStep>,
    /// No nudge within this long of the previous one.
    pub min_gap: chrono::Duration,
    /// Pause between consecutive sends in one agent's batch.
    pub send_delay: Duration,
    /// Conversation messages given to the nudge generator.
    pub history_limit: u32,
}

impl Default for FollowUpConfig {
    fn default() -> Self {
        Self {
            cadence: DEFAULT_CADENCE.to_vec(),
            min_gap: chrono::Duration::hours(24),
            send_delay: Duration::from_secs(1),
            history_limit: 12,
        }
    }
}

impl FollowUpConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let min_gap_hours: i64 = env_or("LEAD_ASSIST_FOLLOWUP_MIN_GAP_HOURS", 24)?;
        let send_delay_ms: u64 = env_or("LEAD_ASSIST_FOLLOWUP_SEND_DELAY_MS", 1000)?;
        Ok(Self {
            min_gap: chrono::Duration::hours(min_gap_hours.max(0)),
            send_delay: Duration::from_millis(send_delay_ms),
            history_limit: env_or("LEAD_ASSIST_FOLLOWUP_HISTORY", defaults.history_limit)?,
            ..defaults
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum FollowUpDecision {
    Send { follow_up_number: u8, reason: String },
    Wait { next_in_days: i64 },
    /// Nudge budget spent; the contact is done with automated follow-ups.
    Archive,
    /// Nudge budget spent but the lead answered the last one. Left to the
    /// conversation instead of being archived.
    Engaged,
}

impl FollowUpDecision {
    pub fn is_needed(&self) -> bool {
        matches!(self, Self::Send { .. })
    }
}

/// Whole days since the lead last wrote (or since creation), never negative.
pub fn days_silent(contact: &Contact, now: DateTime<Utc>) -> i64 {
    (now - contact.silence_anchor()).num_days().max(0)
}

/// Decide what to do with one contact at `now`.
///
/// Steps are tried in ascending day order and the first one that is both
/// reached and not yet sent wins. Once `MAX_FOLLOW_UPS` nudges went out the
/// answer is `Archive` regardless of elapsed time, unless the lead wrote
/// after the last nudge.
pub fn evaluate(
    contact: &Contact,
    now: DateTime<Utc>,
    config: &FollowUpConfig,
) -> FollowUpDecision {
    let count = contact.follow_up_count;
    if count >= MAX_FOLLOW_UPS {
        return exhausted(contact);
    }

    let days = days_silent(contact, now);
    let due = config
        .cadence
        .iter()
        .find(|step| days >= step.day && count < step.follow_up_number);

    if let Some(step) = due {
        if let Some(last) = contact.last_follow_up_at {
            let ready_at = last + config.min_gap;
            if ready_at > now {
                let hours = (ready_at - now).num_hours();
                return FollowUpDecision::Wait {
                    next_in_days: (hours + 23) / 24,
                };
            }
        }
        return FollowUpDecision::Send {
            follow_up_number: step.follow_up_number,
            reason: format!(
                "{days} days silent, nudge #{} of {MAX_FOLLOW_UPS}",
                step.follow_up_number
            ),
        };
    }

    match config
        .cadence
        .iter()
        .find(|step| count < step.follow_up_number && step.day > days)
    {
        Some(next) => FollowUpDecision::Wait {
            next_in_days: (next.day - days).max(0),
        },
        None => exhausted(contact),
    }
}

fn exhausted(contact: &Contact) -> FollowUpDecision {
    if contact.replied_since_last_follow_up() {
        FollowUpDecision::Engaged
    } else {
        FollowUpDecision::Archive
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::contacts::ContactStatus;

    fn contact(days_ago: i64, count: u8, now: DateTime<Utc>) -> Contact {
        let mut c = Contact::new("a1", "+33612345678", now - Duration::days(30));
        c.status = ContactStatus::Contacted;
        c.last_message_at = Some(now - Duration::days(days_ago));
        c.follow_up_count = count;
        c
    }

    fn eval(days_ago: i64, count: u8) -> FollowUpDecision {
        let now = Utc::now();
        evaluate(&contact(days_ago, count, now), now, &FollowUpConfig::default())
    }

    #[test]
    fn day_one_sends_first_nudge() {
        assert!(matches!(eval(1, 0), FollowUpDecision::Send { follow_up_number: 1, .. }));
    }

    #[test]
    fn count_three_always_archives() {
        for days in [0, 1, 7, 365] {
            assert_eq!(eval(days, 3), FollowUpDecision::Archive);
        }
    }

    #[test]
    fn reply_after_last_nudge_is_not_archived() {
        let now = Utc::now();
        let mut c = contact(0, 3, now);
        c.last_follow_up_at = Some(now - Duration::days(2));
        c.last_message_at = Some(now - Duration::hours(1));
        assert_eq!(evaluate(&c, now, &FollowUpConfig::default()), FollowUpDecision::Engaged);

        // Silent since the last nudge: archived as usual.
        c.last_message_at = Some(now - Duration::days(9));
        assert_eq!(evaluate(&c, now, &FollowUpConfig::default()), FollowUpDecision::Archive);
    }

    #[test]
    fn eight_days_with_two_sent_sends_third() {
        assert!(matches!(eval(8, 2), FollowUpDecision::Send { follow_up_number: 3, .. }));
    }

    #[test]
    fn first_match_wins_in_day_order() {
        // Long silence, nothing sent yet: nudge #1 first, not #3.
        assert!(matches!(eval(10, 0), FollowUpDecision::Send { follow_up_number: 1, .. }));
        assert!(matches!(eval(4, 1), FollowUpDecision::Send { follow_up_number: 2, .. }));
    }

    #[test]
    fn waits_until_next_threshold() {
        assert_eq!(eval(0, 0), FollowUpDecision::Wait { next_in_days: 1 });
        assert_eq!(eval(1, 1), FollowUpDecision::Wait { next_in_days: 2 });
        assert_eq!(eval(5, 2), FollowUpDecision::Wait { next_in_days: 2 });
    }

    #[test]
    fn recent_nudge_blocks_the_next_one() {
        let now = Utc::now();
        let mut c = contact(10, 1, now);
        c.last_follow_up_at = Some(now - Duration::hours(2));
        assert_eq!(
            evaluate(&c, now, &FollowUpConfig::default()),
            FollowUpDecision::Wait { next_in_days: 1 }
        );

        c.last_follow_up_at = Some(now - Duration::days(2));
        assert!(evaluate(&c, now, &FollowUpConfig::default()).is_needed());
    }

    #[test]
    fn never_messaged_contact_counts_from_creation() {
        let now = Utc::now();
        let mut c = Contact::new("a1", "+33612345678", now - Duration::days(2));
        c.status = ContactStatus::Contacted;
        assert!(matches!(
            evaluate(&c, now, &FollowUpConfig::default()),
            FollowUpDecision::Send { follow_up_number: 1, .. }
        ));
    }
}
