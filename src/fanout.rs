//! Notification fan-out.
//!
//! Materializes one PENDING notification per (configuration × enabled
//! channel) for a newly created or reactivated alert. Pure materialization:
//! rendering and insertion only, no delivery.

use chrono::Utc;

use crate::db::notifications::{NewNotification, DEFAULT_MAX_ATTEMPTS};
use crate::db::{AlertDb, Channel, DbAlert, DbAlertConfig, NotificationPayload, WebhookBody};
use crate::error::EngineError;

/// Short human title for an alert, used by dashboard and email.
fn render_title(alert: &DbAlert) -> String {
    match alert.category.as_deref() {
        Some(category) => format!("{} budget deviation in {}", alert.severity, category),
        None => format!("{} budget deviation", alert.severity),
    }
}

/// Body text for an alert. Dashboard and email share the wording; email
/// clients handle the longer line fine and the dashboard truncates.
fn render_body(alert: &DbAlert) -> String {
    let direction = if alert.deviation_amount >= 0.0 { "over" } else { "under" };
    let scope = alert.category.as_deref().unwrap_or("the overall budget");
    format!(
        "Realized cost {:.2} against {:.2} budgeted for {} — {:.1}% {} budget.",
        alert.realized, alert.budgeted, scope, alert.deviation_pct, direction
    )
}

/// The fixed webhook body for an alert.
fn webhook_body(alert: &DbAlert) -> WebhookBody {
    WebhookBody {
        alert_type: alert.severity,
        deviation_percentage: alert.deviation_pct,
        deviation_amount: alert.deviation_amount,
        obra_id: alert.project_id.clone(),
        timestamp: Utc::now().to_rfc3339(),
        test: None,
    }
}

/// Materialize notifications for an alert across every active
/// configuration's enabled channels, inserted as one batch.
///
/// Returns the number of notifications created. Channels a configuration
/// disables produce nothing. A storage failure leaves no partial batch
/// behind and is logged with enough context to reconcile.
pub fn fan_out(
    db: &AlertDb,
    alert: &DbAlert,
    configs: &[DbAlertConfig],
) -> Result<usize, EngineError> {
    let title = render_title(alert);
    let body = render_body(alert);

    let mut batch = Vec::new();
    for config in configs {
        if config.notify_dashboard {
            batch.push(NewNotification {
                alert_id: alert.id.clone(),
                recipient_id: config.owner_id.clone(),
                tenant_id: config.tenant_id.clone(),
                channel: Channel::Dashboard,
                title: title.clone(),
                body: body.clone(),
                payload: NotificationPayload::Dashboard,
                max_attempts: DEFAULT_MAX_ATTEMPTS,
            });
        }
        if config.notify_email {
            batch.push(NewNotification {
                alert_id: alert.id.clone(),
                recipient_id: config.owner_id.clone(),
                tenant_id: config.tenant_id.clone(),
                channel: Channel::Email,
                title: title.clone(),
                body: body.clone(),
                payload: NotificationPayload::Email {
                    to: config.owner_id.clone(),
                },
                max_attempts: DEFAULT_MAX_ATTEMPTS,
            });
        }
        if config.notify_webhook {
            // Save-time validation guarantees a URL; a legacy row without
            // one cannot be delivered, so it produces no notification.
            let Some(url) = config.webhook_url.as_deref().filter(|u| !u.is_empty()) else {
                log::warn!(
                    "Fan-out: configuration {} has webhook enabled but no URL, skipping",
                    config.id
                );
                continue;
            };
            batch.push(NewNotification {
                alert_id: alert.id.clone(),
                recipient_id: config.owner_id.clone(),
                tenant_id: config.tenant_id.clone(),
                channel: Channel::Webhook,
                title: title.clone(),
                body: body.clone(),
                payload: NotificationPayload::Webhook {
                    url: url.to_string(),
                    body: webhook_body(alert),
                },
                max_attempts: DEFAULT_MAX_ATTEMPTS,
            });
        }
    }

    let created = db.insert_notifications(&batch).map_err(|e| {
        log::error!(
            "Fan-out failed for alert {} ({} channel notifications dropped): {}",
            alert.id,
            batch.len(),
            e
        );
        e
    })?;

    log::debug!("Fan-out created {} notifications for alert {}", created, alert.id);
    Ok(created)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::alerts::test_fixtures::sample_alert;
    use crate::db::configs::AlertConfigInput;
    use crate::db::test_utils::test_db;

    fn config_input(project_id: &str, owner: &str) -> AlertConfigInput {
        AlertConfigInput {
            project_id: project_id.to_string(),
            owner_id: owner.to_string(),
            tenant_id: "t-1".to_string(),
            threshold_low: 10.0,
            threshold_medium: 15.0,
            threshold_high: 25.0,
            threshold_critical: 40.0,
            notify_dashboard: true,
            notify_email: true,
            notify_webhook: false,
            webhook_url: None,
            per_category: true,
            per_stage: false,
            check_interval_hours: 24,
        }
    }

    #[test]
    fn two_enabled_channels_create_exactly_two() {
        let db = test_db();
        let project = db.insert_project("Tower A", "t-1").unwrap();
        let alert = db.create_alert(&sample_alert(&project, Some("steel"))).unwrap();
        let config = db.save_config(&config_input(&project, "u-1")).unwrap();

        let created = fan_out(&db, &alert, &[config]).unwrap();
        assert_eq!(created, 2);

        let rows = db.list_dispatchable(Some(&alert.id)).unwrap();
        assert_eq!(rows.len(), 2);
        let channels: Vec<Channel> = rows.iter().map(|n| n.channel).collect();
        assert!(channels.contains(&Channel::Dashboard));
        assert!(channels.contains(&Channel::Email));
    }

    #[test]
    fn disabled_channels_produce_no_rows() {
        let db = test_db();
        let project = db.insert_project("Tower A", "t-1").unwrap();
        let alert = db.create_alert(&sample_alert(&project, Some("steel"))).unwrap();
        let mut input = config_input(&project, "u-1");
        input.notify_dashboard = false;
        input.notify_email = false;
        let config = db.save_config(&input).unwrap();

        assert_eq!(fan_out(&db, &alert, &[config]).unwrap(), 0);
        assert!(db.list_dispatchable(Some(&alert.id)).unwrap().is_empty());
    }

    #[test]
    fn every_watching_config_fans_out() {
        let db = test_db();
        let project = db.insert_project("Tower A", "t-1").unwrap();
        let alert = db.create_alert(&sample_alert(&project, Some("steel"))).unwrap();
        let first = db.save_config(&config_input(&project, "u-1")).unwrap();
        let second = db.save_config(&config_input(&project, "u-2")).unwrap();

        let created = fan_out(&db, &alert, &[first, second]).unwrap();
        assert_eq!(created, 4);
    }

    #[test]
    fn webhook_payload_carries_url_and_figures() {
        let db = test_db();
        let project = db.insert_project("Tower A", "t-1").unwrap();
        let alert = db.create_alert(&sample_alert(&project, Some("steel"))).unwrap();
        let mut input = config_input(&project, "u-1");
        input.notify_dashboard = false;
        input.notify_email = false;
        input.notify_webhook = true;
        input.webhook_url = Some("https://hooks.example.com/obralert".to_string());
        let config = db.save_config(&input).unwrap();

        fan_out(&db, &alert, &[config]).unwrap();
        let row = &db.list_dispatchable(Some(&alert.id)).unwrap()[0];
        match row.decode_payload().unwrap() {
            NotificationPayload::Webhook { url, body } => {
                assert_eq!(url, "https://hooks.example.com/obralert");
                assert_eq!(body.obra_id, project);
                assert_eq!(body.deviation_percentage, 20.0);
                assert_eq!(body.deviation_amount, 2_000.0);
                assert!(body.test.is_none());
            }
            other => panic!("expected webhook payload, got {:?}", other),
        }
    }
}
