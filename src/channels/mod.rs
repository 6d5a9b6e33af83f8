//! Outbound channels: SMS delivery and webhook notifications.

pub mod sms;
#[cfg(test)]
pub(crate) mod testing;
pub mod webhook;

pub use sms::{DryRunGateway, SmsGateway, TwilioConfig, TwilioGateway};
pub use webhook::{NotificationEvent, NotificationKind, Notifier, WebhookNotifier, spawn_notify};
