//! Budget-deviation alerting and notification dispatch.
//!
//! Compares budgeted vs realized cost per project category, raises
//! severity-tiered alerts from configurable thresholds, fans each alert out
//! to dashboard/email/webhook notifications, and delivers them with bounded
//! retries. Every pass is a short-lived invocation over the shared SQLite
//! store — there is no resident scheduler here; the host triggers
//! evaluation and dispatch per request.

pub mod channels;
pub mod db;
pub mod deviation;
pub mod dispatch;
pub mod error;
pub mod evaluator;
pub mod fanout;
mod migrations;

pub use channels::webhook::test_webhook;
pub use channels::{Mailer, NoopMailer, WebhookSender};
pub use db::AlertDb;
pub use dispatch::{Dispatcher, DispatchSummary};
pub use error::EngineError;
pub use evaluator::{evaluate, EvaluationSummary};
