//! Notification dispatch pass.
//!
//! Scans deliverable notifications and attempts each channel send with a
//! bounded worker pool. Delivery outcomes go straight back to the store:
//! the summary counts are the only signal that leaves a pass. Channel
//! sends are not idempotent — a retried webhook may duplicate the remote
//! side effect, which receivers must tolerate.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::task::JoinSet;

use crate::channels::{Mailer, WebhookSender};
use crate::db::{AlertDb, NotificationPayload};
use crate::error::EngineError;

/// Concurrent channel sends per wave. Email and webhook calls are
/// I/O-bound; the store writes stay on the calling thread.
pub const DISPATCH_CONCURRENCY: usize = 4;

/// Outcome of one dispatch pass.
#[derive(Debug, Clone, Copy, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchSummary {
    pub attempted: usize,
    pub sent: usize,
    pub errored: usize,
}

/// Drives deliveries for pending and retryable notifications.
pub struct Dispatcher {
    mailer: Arc<dyn Mailer>,
    webhook: WebhookSender,
}

impl Dispatcher {
    pub fn new(mailer: Arc<dyn Mailer>) -> Self {
        Self {
            mailer,
            webhook: WebhookSender::new(),
        }
    }

    /// Run one pass over deliverable notifications, optionally narrowed to
    /// a single alert.
    ///
    /// `cancel` is honored between waves; an in-flight send finishes and
    /// its outcome is still recorded, but no further wave starts.
    pub async fn run(
        &self,
        db: &AlertDb,
        alert_id: Option<&str>,
        cancel: &AtomicBool,
    ) -> Result<DispatchSummary, EngineError> {
        let candidates = db.list_dispatchable(alert_id)?;
        let mut summary = DispatchSummary::default();

        for wave in candidates.chunks(DISPATCH_CONCURRENCY) {
            if cancel.load(Ordering::Relaxed) {
                log::info!(
                    "Dispatch cancelled with {} notifications left",
                    candidates.len() - summary.attempted
                );
                break;
            }

            let mut outcomes: Vec<(String, Result<(), String>)> = Vec::with_capacity(wave.len());
            let mut workers: JoinSet<(String, Result<(), String>)> = JoinSet::new();

            for notification in wave {
                summary.attempted += 1;

                match notification.decode_payload() {
                    // Dashboard delivery is "visible in the store" — a
                    // direct write, no worker slot.
                    Ok(NotificationPayload::Dashboard) => {
                        if db.mark_notification_sent(&notification.id)? {
                            summary.sent += 1;
                        } else {
                            log::debug!(
                                "Dispatch: {} already delivered by a concurrent pass",
                                notification.id
                            );
                        }
                    }
                    Ok(NotificationPayload::Email { to }) => {
                        let mailer = Arc::clone(&self.mailer);
                        let id = notification.id.clone();
                        let subject = notification.title.clone();
                        let body = notification.body.clone();
                        workers.spawn(async move {
                            let result = mailer.send(&to, &subject, &body).await;
                            (id, result)
                        });
                    }
                    Ok(NotificationPayload::Webhook { url, body }) => {
                        let sender = self.webhook.clone();
                        let id = notification.id.clone();
                        workers.spawn(async move {
                            let result = sender.deliver(&url, &body).await;
                            (id, result)
                        });
                    }
                    Err(e) => {
                        outcomes.push((
                            notification.id.clone(),
                            Err(format!("undecodable payload: {}", e)),
                        ));
                    }
                }
            }

            while let Some(joined) = workers.join_next().await {
                match joined {
                    Ok(outcome) => outcomes.push(outcome),
                    Err(e) => log::error!("Dispatch worker failed: {}", e),
                }
            }

            for (id, result) in outcomes {
                match result {
                    Ok(()) => {
                        if !db.mark_notification_sent(&id)? {
                            log::debug!("Dispatch: {} marked by a concurrent pass", id);
                        }
                        summary.sent += 1;
                    }
                    Err(message) => {
                        log::warn!("Dispatch: delivery of {} failed: {}", id, message);
                        if db.record_failed_attempt(&id, &message)? {
                            summary.errored += 1;
                        } else {
                            // Bound reached under a concurrent pass; the row
                            // stays ERROR and is surfaced via list_exhausted.
                            log::warn!("Dispatch: {} exhausted its attempts", id);
                            summary.errored += 1;
                        }
                    }
                }
            }
        }

        log::info!(
            "Dispatch pass: {} attempted, {} sent, {} errored",
            summary.attempted,
            summary.sent,
            summary.errored
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::mailer::test_support::{FailingMailer, RecordingMailer};
    use crate::channels::webhook::test_server;
    use crate::db::alerts::test_fixtures::sample_alert;
    use crate::db::configs::AlertConfigInput;
    use crate::db::notifications::DEFAULT_MAX_ATTEMPTS;
    use crate::db::test_utils::test_db;
    use crate::db::{AlertDb, DbAlert};
    use crate::fanout;

    fn never_cancel() -> AtomicBool {
        AtomicBool::new(false)
    }

    fn config_input(project_id: &str) -> AlertConfigInput {
        AlertConfigInput {
            project_id: project_id.to_string(),
            owner_id: "u-1".to_string(),
            tenant_id: "t-1".to_string(),
            threshold_low: 10.0,
            threshold_medium: 15.0,
            threshold_high: 25.0,
            threshold_critical: 40.0,
            notify_dashboard: false,
            notify_email: false,
            notify_webhook: false,
            webhook_url: None,
            per_category: true,
            per_stage: false,
            check_interval_hours: 24,
        }
    }

    /// Create an alert and fan it out through a config with the given
    /// channels enabled.
    fn alert_with_channels(
        db: &AlertDb,
        project: &str,
        category: &str,
        dashboard: bool,
        email: bool,
        webhook_url: Option<&str>,
    ) -> DbAlert {
        let alert = db.create_alert(&sample_alert(project, Some(category))).unwrap();
        let mut input = config_input(project);
        input.owner_id = format!("u-{}", category);
        input.notify_dashboard = dashboard;
        input.notify_email = email;
        input.notify_webhook = webhook_url.is_some();
        input.webhook_url = webhook_url.map(str::to_string);
        let config = db.save_config(&input).unwrap();
        fanout::fan_out(db, &alert, &[config]).unwrap();
        alert
    }

    #[tokio::test]
    async fn dashboard_is_sent_without_external_calls() {
        let db = test_db();
        let project = db.insert_project("Tower A", "t-1").unwrap();
        alert_with_channels(&db, &project, "steel", true, false, None);

        let dispatcher = Dispatcher::new(Arc::new(FailingMailer));
        let summary = dispatcher.run(&db, None, &never_cancel()).await.unwrap();
        assert_eq!(summary.attempted, 1);
        assert_eq!(summary.sent, 1);
        assert_eq!(summary.errored, 0);

        // Nothing left for a second pass
        let second = dispatcher.run(&db, None, &never_cancel()).await.unwrap();
        assert_eq!(second.attempted, 0);
    }

    #[tokio::test]
    async fn email_delivers_through_the_mailer() {
        let db = test_db();
        let project = db.insert_project("Tower A", "t-1").unwrap();
        alert_with_channels(&db, &project, "steel", false, true, None);

        let mailer = Arc::new(RecordingMailer::default());
        let dispatcher = Dispatcher::new(mailer.clone());
        let summary = dispatcher.run(&db, None, &never_cancel()).await.unwrap();
        assert_eq!(summary.sent, 1);

        let sent = mailer.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "u-steel");
        assert!(sent[0].1.contains("MEDIUM"));
    }

    #[tokio::test]
    async fn email_failure_records_attempt_and_retries_until_bound() {
        let db = test_db();
        let project = db.insert_project("Tower A", "t-1").unwrap();
        let alert = alert_with_channels(&db, &project, "steel", false, true, None);

        let dispatcher = Dispatcher::new(Arc::new(FailingMailer));
        for attempt in 1..=DEFAULT_MAX_ATTEMPTS {
            let summary = dispatcher.run(&db, None, &never_cancel()).await.unwrap();
            assert_eq!(summary.errored, 1, "attempt {}", attempt);

            let row = &db
                .conn_ref()
                .query_row(
                    "SELECT attempts, status, last_error FROM notifications WHERE alert_id = ?1",
                    [&alert.id],
                    |r| {
                        Ok((
                            r.get::<_, i64>(0)?,
                            r.get::<_, String>(1)?,
                            r.get::<_, Option<String>>(2)?,
                        ))
                    },
                )
                .unwrap();
            assert_eq!(row.0, attempt);
            assert_eq!(row.1, "ERROR");
            assert_eq!(row.2.as_deref(), Some("SMTP relay unavailable"));
        }

        // Bound reached: excluded from all subsequent passes, surfaced to
        // the operator instead.
        let after = dispatcher.run(&db, None, &never_cancel()).await.unwrap();
        assert_eq!(after.attempted, 0);
        assert_eq!(db.list_exhausted().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn webhook_500_errors_every_notification_once() {
        let db = test_db();
        let project = db.insert_project("Tower A", "t-1").unwrap();
        let (url, _requests) = test_server::spawn("HTTP/1.1 500 Internal Server Error", 3);
        for category in ["steel", "concrete", "labor"] {
            alert_with_channels(&db, &project, category, false, false, Some(&url));
        }

        let dispatcher = Dispatcher::new(Arc::new(FailingMailer));
        let summary = dispatcher.run(&db, None, &never_cancel()).await.unwrap();
        assert_eq!(summary.attempted, 3);
        assert_eq!(summary.sent, 0);
        assert_eq!(summary.errored, 3);

        let attempts: Vec<i64> = {
            let mut stmt = db
                .conn_ref()
                .prepare("SELECT attempts FROM notifications ORDER BY id")
                .unwrap();
            stmt.query_map([], |r| r.get(0))
                .unwrap()
                .map(|r| r.unwrap())
                .collect()
        };
        assert_eq!(attempts, vec![1, 1, 1]);
    }

    #[tokio::test]
    async fn webhook_2xx_marks_sent() {
        let db = test_db();
        let project = db.insert_project("Tower A", "t-1").unwrap();
        let (url, requests) = test_server::spawn("HTTP/1.1 200 OK", 1);
        let alert = alert_with_channels(&db, &project, "steel", false, false, Some(&url));

        let dispatcher = Dispatcher::new(Arc::new(FailingMailer));
        let summary = dispatcher.run(&db, None, &never_cancel()).await.unwrap();
        assert_eq!(summary.sent, 1);

        let raw = requests.recv().unwrap();
        assert!(raw.contains(&format!("\"obra_id\":\"{}\"", project)));

        let status: String = db
            .conn_ref()
            .query_row(
                "SELECT status FROM notifications WHERE alert_id = ?1",
                [&alert.id],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(status, "SENT");
    }

    #[tokio::test]
    async fn alert_filter_narrows_the_pass() {
        let db = test_db();
        let project = db.insert_project("Tower A", "t-1").unwrap();
        let first = alert_with_channels(&db, &project, "steel", true, false, None);
        let second = alert_with_channels(&db, &project, "concrete", true, false, None);

        let dispatcher = Dispatcher::new(Arc::new(FailingMailer));
        let summary = dispatcher.run(&db, Some(&first.id), &never_cancel()).await.unwrap();
        assert_eq!(summary.attempted, 1);

        let remaining = db.list_dispatchable(None).unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].alert_id, second.id);
    }

    #[tokio::test]
    async fn cancel_stops_before_the_first_wave() {
        let db = test_db();
        let project = db.insert_project("Tower A", "t-1").unwrap();
        alert_with_channels(&db, &project, "steel", true, false, None);

        let dispatcher = Dispatcher::new(Arc::new(FailingMailer));
        let cancelled = AtomicBool::new(true);
        let summary = dispatcher.run(&db, None, &cancelled).await.unwrap();
        assert_eq!(summary.attempted, 0);

        // Nothing was consumed; a later pass still delivers
        let later = dispatcher.run(&db, None, &never_cancel()).await.unwrap();
        assert_eq!(later.sent, 1);
    }

    #[tokio::test]
    async fn mixed_channels_resolve_in_one_pass() {
        let db = test_db();
        let project = db.insert_project("Tower A", "t-1").unwrap();
        let (url, _requests) = test_server::spawn("HTTP/1.1 200 OK", 1);
        alert_with_channels(&db, &project, "steel", true, true, Some(&url));

        let mailer = Arc::new(RecordingMailer::default());
        let dispatcher = Dispatcher::new(mailer.clone());
        let summary = dispatcher.run(&db, None, &never_cancel()).await.unwrap();
        assert_eq!(summary.attempted, 3);
        assert_eq!(summary.sent, 3);
        assert_eq!(summary.errored, 0);
        assert_eq!(mailer.sent.lock().unwrap().len(), 1);

        let statuses: Vec<String> = {
            let mut stmt = db
                .conn_ref()
                .prepare("SELECT DISTINCT status FROM notifications")
                .unwrap();
            stmt.query_map([], |r| r.get(0))
                .unwrap()
                .map(|r| r.unwrap())
                .collect()
        };
        assert_eq!(statuses, vec!["SENT".to_string()]);
    }
}
