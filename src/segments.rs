//! Named segments: read-only views over an agent's contacts.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::contacts::{Contact, ContactStatus, Tag};
use crate::contacts::tags::{HOT_THRESHOLD, WARM_THRESHOLD};
use crate::error::DatabaseError;
use crate::store::{ContactFilter, Database};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Segment {
    Hot,
    Warm,
    Cold,
    Qualified,
    Disqualified,
    Escalated,
    OptedOut,
    /// Contacted leads who have not written for a week.
    Silent7d,
    /// Wrote in the last 24 hours.
    Active24h,
    /// Created in the last 7 days.
    New7d,
    /// Any contact carrying a tag.
    Tagged(String),
}

impl Segment {
    /// Build the store filter for this segment as of `now`.
    pub fn filter(&self, agent_id: &str, now: DateTime<Utc>) -> ContactFilter {
        let base = ContactFilter::for_agent(agent_id);
        match self {
            Self::Hot => ContactFilter {
                min_score: Some(HOT_THRESHOLD),
                ..base
            },
            Self::Warm => ContactFilter {
                min_score: Some(WARM_THRESHOLD),
                max_score: Some(HOT_THRESHOLD - 1),
                ..base
            },
            Self::Cold => ContactFilter {
                max_score: Some(WARM_THRESHOLD - 1),
                ..base
            },
            Self::Qualified => status(base, ContactStatus::Qualified),
            Self::Disqualified => status(base, ContactStatus::Disqualified),
            Self::Escalated => status(base, ContactStatus::Escalated),
            Self::OptedOut => status(base, ContactStatus::OptedOut),
            Self::Silent7d => ContactFilter {
                status: Some(ContactStatus::Contacted),
                silent_since: Some(now - Duration::days(7)),
                ..base
            },
            Self::Active24h => ContactFilter {
                active_since: Some(now - Duration::hours(24)),
                ..base
            },
            Self::New7d => ContactFilter {
                created_after: Some(now - Duration::days(7)),
                ..base
            },
            Self::Tagged(tag) => ContactFilter {
                tag: Some(tag.clone()),
                ..base
            },
        }
    }
}

fn status(base: ContactFilter, status: ContactStatus) -> ContactFilter {
    ContactFilter {
        status: Some(status),
        ..base
    }
}

impl FromStr for Segment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some(tag) = s.strip_prefix("tag:") {
            return Tag::parse(tag)
                .map(|t| Self::Tagged(t.id().to_string()))
                .ok_or_else(|| format!("invalid tag '{tag}'"));
        }
        match s {
            "hot" => Ok(Self::Hot),
            "warm" => Ok(Self::Warm),
            "cold" => Ok(Self::Cold),
            "qualified" => Ok(Self::Qualified),
            "disqualified" => Ok(Self::Disqualified),
            "escalated" => Ok(Self::Escalated),
            "opted_out" => Ok(Self::OptedOut),
            "silent_7d" => Ok(Self::Silent7d),
            "active_24h" => Ok(Self::Active24h),
            "new_7d" => Ok(Self::New7d),
            other => Err(format!("unknown segment '{other}'")),
        }
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hot => f.write_str("hot"),
            Self::Warm => f.write_str("warm"),
            Self::Cold => f.write_str("cold"),
            Self::Qualified => f.write_str("qualified"),
            Self::Disqualified => f.write_str("disqualified"),
            Self::Escalated => f.write_str("escalated"),
            Self::OptedOut => f.write_str("opted_out"),
            Self::Silent7d => f.write_str("silent_7d"),
            Self::Active24h => f.write_str("active_24h"),
            Self::New7d => f.write_str("new_7d"),
            Self::Tagged(tag) => write!(f, "tag:{tag}"),
        }
    }
}

/// Contacts in `segment`, newest created first.
pub async fn segment_contacts(
    db: &dyn Database,
    agent_id: &str,
    segment: &Segment,
    now: DateTime<Utc>,
) -> Result<Vec<Contact>, DatabaseError> {
    db.list_contacts(&segment.filter(agent_id, now)).await
}
