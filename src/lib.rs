//! Lead Assist: SMS lead qualification and follow-up orchestration.

pub mod api;
pub mod channels;
pub mod compliance;
pub mod config;
pub mod contacts;
pub mod error;
pub mod followup;
pub mod intelligence;
pub mod llm;
pub mod pipeline;
pub mod segments;
pub mod store;
