//! Automated follow-ups for leads that went quiet.
//!
//! [`cadence`] decides from stored state alone; [`scheduler`] acts on those
//! decisions under the per-contact lock.

pub mod cadence;
pub mod scheduler;

pub use cadence::{
    CadenceStep, DEFAULT_CADENCE, FollowUpConfig, FollowUpDecision, days_silent, evaluate,
};
pub use scheduler::{
    FollowUpDetail, FollowUpOutcome, FollowUpReport, FollowUpScheduler, spawn_follow_up_ticker,
};
