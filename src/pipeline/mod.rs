//! Inbound message pipeline.
//!
//! Every SMS from a lead flows through [`InboundProcessor::process`]:
//! compliance first, then classification, extraction and scoring, then the
//! escalation verdict, lifecycle update, and reply. Work on one contact is
//! serialized by [`ContactLocks`], which the follow-up scheduler shares.

pub mod locks;
pub mod processor;
pub mod types;

pub use locks::{ContactGuard, ContactLocks};
pub use processor::{InboundProcessor, PipelineConfig};
pub use types::{ImportReport, ImportRow, InboundEvent, PipelineAction, PipelineOutcome};
