//! Contact tags and the score/status projection.
//!
//! Score tags live in a single `Option<ScoreTier>` slot, so `sys_hot`,
//! `sys_warm` and `sys_cold` can never coexist on a contact.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::model::ContactStatus;

/// Score at or above which a lead is hot.
pub const HOT_THRESHOLD: u8 = 80;
/// Score at or above which a lead is warm.
pub const WARM_THRESHOLD: u8 = 50;

const SYSTEM_PREFIX: &str = "sys_";

/// Mutually exclusive score tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreTier {
    Hot,
    Warm,
    Cold,
}

impl ScoreTier {
    pub fn from_score(score: u8) -> Self {
        if score >= HOT_THRESHOLD {
            Self::Hot
        } else if score >= WARM_THRESHOLD {
            Self::Warm
        } else {
            Self::Cold
        }
    }

    pub fn tag_id(&self) -> &'static str {
        match self {
            Self::Hot => "sys_hot",
            Self::Warm => "sys_warm",
            Self::Cold => "sys_cold",
        }
    }
}

/// System tags asserted from lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusTag {
    Qualified,
    Disqualified,
}

impl StatusTag {
    pub fn tag_id(&self) -> &'static str {
        match self {
            Self::Qualified => "sys_qualified",
            Self::Disqualified => "sys_disqualified",
        }
    }
}

/// Any tag a contact can carry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Tag {
    Score(ScoreTier),
    Status(StatusTag),
    Custom(String),
}

impl Tag {
    /// Parse a tag identifier. Unknown `sys_` identifiers are rejected.
    pub fn parse(id: &str) -> Option<Self> {
        let id = id.trim();
        match id {
            "sys_hot" => Some(Self::Score(ScoreTier::Hot)),
            "sys_warm" => Some(Self::Score(ScoreTier::Warm)),
            "sys_cold" => Some(Self::Score(ScoreTier::Cold)),
            "sys_qualified" => Some(Self::Status(StatusTag::Qualified)),
            "sys_disqualified" => Some(Self::Status(StatusTag::Disqualified)),
            "" => None,
            other if other.starts_with(SYSTEM_PREFIX) => None,
            other => Some(Self::Custom(other.to_string())),
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Self::Score(t) => t.tag_id(),
            Self::Status(t) => t.tag_id(),
            Self::Custom(s) => s,
        }
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

/// The tags on one contact. Serialized as a flat list of identifiers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct TagSet {
    score: Option<ScoreTier>,
    status: BTreeSet<StatusTag>,
    custom: BTreeSet<String>,
}

impl TagSet {
    pub fn score_tier(&self) -> Option<ScoreTier> {
        self.score
    }

    pub fn contains(&self, tag: &Tag) -> bool {
        match tag {
            Tag::Score(t) => self.score == Some(*t),
            Tag::Status(t) => self.status.contains(t),
            Tag::Custom(s) => self.custom.contains(s),
        }
    }

    pub fn contains_id(&self, id: &str) -> bool {
        Tag::parse(id).is_some_and(|t| self.contains(&t))
    }

    /// Insert a tag. A score tier replaces whatever tier was there.
    pub fn insert(&mut self, tag: Tag) {
        match tag {
            Tag::Score(t) => self.score = Some(t),
            Tag::Status(t) => {
                self.status.insert(t);
            }
            Tag::Custom(s) => {
                self.custom.insert(s);
            }
        }
    }

    pub fn remove(&mut self, tag: &Tag) -> bool {
        match tag {
            Tag::Score(t) if self.score == Some(*t) => {
                self.score = None;
                true
            }
            Tag::Score(_) => false,
            Tag::Status(t) => self.status.remove(t),
            Tag::Custom(s) => self.custom.remove(s),
        }
    }

    /// Identifiers in stable order: score tier, status tags, custom tags.
    pub fn ids(&self) -> Vec<String> {
        self.score
            .iter()
            .map(|t| t.tag_id().to_string())
            .chain(self.status.iter().map(|t| t.tag_id().to_string()))
            .chain(self.custom.iter().cloned())
            .collect()
    }

    pub fn len(&self) -> usize {
        usize::from(self.score.is_some()) + self.status.len() + self.custom.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<Vec<String>> for TagSet {
    fn from(ids: Vec<String>) -> Self {
        let mut set = TagSet::default();
        for id in ids {
            if let Some(tag) = Tag::parse(&id) {
                set.insert(tag);
            }
        }
        set
    }
}

impl From<TagSet> for Vec<String> {
    fn from(set: TagSet) -> Self {
        set.ids()
    }
}

/// Project score and lifecycle status onto the tag set.
///
/// A defined score replaces the score tier wholesale. `qualified` and
/// `disqualified` assert their tag and retract the other one; a contact back
/// in an active conversation loses `sys_disqualified`. Custom tags are
/// untouched.
pub fn auto_tag(tags: &TagSet, score: Option<u8>, status: ContactStatus) -> TagSet {
    let mut out = tags.clone();
    if let Some(score) = score {
        out.insert(Tag::Score(ScoreTier::from_score(score)));
    }
    let qualified = Tag::Status(StatusTag::Qualified);
    let disqualified = Tag::Status(StatusTag::Disqualified);
    match status {
        ContactStatus::Qualified => {
            out.remove(&disqualified);
            out.insert(qualified);
        }
        ContactStatus::Disqualified => {
            out.remove(&qualified);
            out.insert(disqualified);
        }
        ContactStatus::Contacted | ContactStatus::Escalated => {
            out.remove(&disqualified);
        }
        ContactStatus::Pending | ContactStatus::OptedOut => {}
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hot_score_retracts_other_tiers() {
        let mut tags = TagSet::default();
        tags.insert(Tag::Score(ScoreTier::Cold));
        let tags = auto_tag(&tags, Some(85), ContactStatus::Contacted);
        assert!(tags.contains_id("sys_hot"));
        assert!(!tags.contains_id("sys_warm"));
        assert!(!tags.contains_id("sys_cold"));
    }

    #[test]
    fn tier_boundaries() {
        assert_eq!(ScoreTier::from_score(80), ScoreTier::Hot);
        assert_eq!(ScoreTier::from_score(79), ScoreTier::Warm);
        assert_eq!(ScoreTier::from_score(50), ScoreTier::Warm);
        assert_eq!(ScoreTier::from_score(49), ScoreTier::Cold);
        assert_eq!(ScoreTier::from_score(0), ScoreTier::Cold);
    }

    #[test]
    fn unset_score_leaves_tier_alone() {
        let mut tags = TagSet::default();
        tags.insert(Tag::Score(ScoreTier::Warm));
        let tags = auto_tag(&tags, None, ContactStatus::Contacted);
        assert_eq!(tags.score_tier(), Some(ScoreTier::Warm));
    }

    #[test]
    fn status_tags_asserted() {
        let tags = auto_tag(&TagSet::default(), Some(90), ContactStatus::Qualified);
        assert_eq!(tags.ids(), vec!["sys_hot", "sys_qualified"]);
        let tags = auto_tag(&TagSet::default(), Some(10), ContactStatus::Disqualified);
        assert!(tags.contains(&Tag::Status(StatusTag::Disqualified)));
    }

    #[test]
    fn status_tags_are_mutually_exclusive() {
        let archived = auto_tag(&TagSet::default(), Some(20), ContactStatus::Disqualified);
        // Lead wrote back and is talking again.
        let active = auto_tag(&archived, Some(60), ContactStatus::Contacted);
        assert!(!active.contains_id("sys_disqualified"));

        let mut stale = archived.clone();
        stale.insert(Tag::Status(StatusTag::Disqualified));
        let qualified = auto_tag(&stale, Some(90), ContactStatus::Qualified);
        assert_eq!(qualified.ids(), vec!["sys_hot", "sys_qualified"]);

        // Escalation keeps the qualification.
        let escalated = auto_tag(&qualified, Some(90), ContactStatus::Escalated);
        assert!(escalated.contains_id("sys_qualified"));

        let requalified_then_lost = auto_tag(&qualified, Some(30), ContactStatus::Disqualified);
        assert_eq!(requalified_then_lost.ids(), vec!["sys_cold", "sys_disqualified"]);
    }

    #[test]
    fn custom_tags_survive_projection() {
        let mut tags = TagSet::default();
        tags.insert(Tag::Custom("webinar-2024".into()));
        let tags = auto_tag(&tags, Some(60), ContactStatus::Contacted);
        assert!(tags.contains_id("webinar-2024"));
        assert!(tags.contains_id("sys_warm"));
    }

    #[test]
    fn deserializing_conflicting_ids_keeps_one_tier() {
        let tags: TagSet = serde_json::from_str(r#"["sys_hot", "sys_cold", "vip"]"#).unwrap();
        assert_eq!(tags.score_tier(), Some(ScoreTier::Cold));
        assert_eq!(tags.len(), 2);
        let json = serde_json::to_string(&tags).unwrap();
        assert_eq!(json, r#"["sys_cold","vip"]"#);
    }

    #[test]
    fn unknown_system_ids_are_rejected() {
        assert!(Tag::parse("sys_vip").is_none());
        assert!(Tag::parse("  ").is_none());
        assert_eq!(Tag::parse("vip"), Some(Tag::Custom("vip".into())));
    }
}
