//! Contacts: the lead record, its memory, and its tags.

pub mod context;
pub mod model;
pub mod phone;
pub mod tags;

pub use context::{ExtractedContext, MergeField};
pub use model::{
    AgentProfile, Contact, ContactStatus, LifecycleEvent, MAX_FOLLOW_UPS, Message, MessageKind,
    MessageRole,
};
pub use phone::{PhoneError, normalize_phone};
pub use tags::{ScoreTier, StatusTag, Tag, TagSet, auto_tag};
