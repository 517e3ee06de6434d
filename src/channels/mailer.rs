//! Outbound mail seam.
//!
//! The engine renders subject and body; address resolution and actual
//! delivery belong to the host's mail collaborator behind this trait.

use async_trait::async_trait;

/// External mail collaborator.
#[async_trait]
pub trait Mailer: Send + Sync {
    /// Deliver one message. `to` is the recipient's user id; the
    /// implementation owns the mapping to an address.
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), String>;
}

/// Mailer for deployments without email configured: logs and reports
/// success so email notifications don't pile up as permanent errors.
pub struct NoopMailer;

#[async_trait]
impl Mailer for NoopMailer {
    async fn send(&self, to: &str, subject: &str, _body: &str) -> Result<(), String> {
        log::warn!("No mailer configured; dropping email to {}: {}", to, subject);
        Ok(())
    }
}
