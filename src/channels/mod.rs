//! Channel delivery primitives.
//!
//! Dashboard delivery is a store write and lives with the dispatcher;
//! email and webhook are external calls and live here.

pub mod mailer;
pub mod webhook;

pub use mailer::{Mailer, NoopMailer};
pub use webhook::{WebhookSender, WEBHOOK_TIMEOUT_SECS, WEBHOOK_USER_AGENT};
