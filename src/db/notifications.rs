//! Notification store.
//!
//! Rows are created exclusively by fan-out and mutated exclusively by the
//! dispatcher (delivery outcome) or the dashboard read-receipt. Attempt
//! accounting is a single guarded UPDATE (`attempts < max_attempts`), so
//! concurrent dispatch passes cannot lose increments or push a row past
//! its bound.

use chrono::Utc;
use rusqlite::params;
use uuid::Uuid;

use crate::error::EngineError;

use super::{
    AlertDb, Channel, DbError, DbNotification, HistoryAction, NotificationPayload,
    NotificationStatus,
};

/// Input for materializing one notification.
#[derive(Debug, Clone)]
pub struct NewNotification {
    pub alert_id: String,
    pub recipient_id: String,
    pub tenant_id: String,
    pub channel: Channel,
    pub title: String,
    pub body: String,
    pub payload: NotificationPayload,
    pub max_attempts: i64,
}

/// Default delivery attempt bound.
pub const DEFAULT_MAX_ATTEMPTS: i64 = 3;

const NOTIFICATION_COLUMNS: &str = "id, alert_id, recipient_id, tenant_id, channel, status,
    title, body, payload, attempts, max_attempts, last_error, sent_at, read_at, created_at";

fn map_notification_row(row: &rusqlite::Row) -> rusqlite::Result<DbNotification> {
    Ok(DbNotification {
        id: row.get(0)?,
        alert_id: row.get(1)?,
        recipient_id: row.get(2)?,
        tenant_id: row.get(3)?,
        channel: row.get(4)?,
        status: row.get(5)?,
        title: row.get(6)?,
        body: row.get(7)?,
        payload: row.get(8)?,
        attempts: row.get(9)?,
        max_attempts: row.get(10)?,
        last_error: row.get(11)?,
        sent_at: row.get(12)?,
        read_at: row.get(13)?,
        created_at: row.get(14)?,
    })
}

impl AlertDb {
    /// Insert a batch of notifications for one alert in a single
    /// transaction. All rows land PENDING or none land at all.
    pub fn insert_notifications(&self, batch: &[NewNotification]) -> Result<usize, DbError> {
        if batch.is_empty() {
            return Ok(0);
        }

        self.with_transaction(|db| {
            for new in batch {
                let payload = serde_json::to_string(&new.payload)?;
                db.conn_ref().execute(
                    "INSERT INTO notifications (id, alert_id, recipient_id, tenant_id, channel,
                        status, title, body, payload, attempts, max_attempts, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, 'PENDING', ?6, ?7, ?8, 0, ?9, ?10)",
                    params![
                        format!("nt-{}", Uuid::new_v4()),
                        new.alert_id,
                        new.recipient_id,
                        new.tenant_id,
                        new.channel,
                        new.title,
                        new.body,
                        payload,
                        new.max_attempts,
                        Utc::now().to_rfc3339(),
                    ],
                )?;
            }
            Ok::<_, DbError>(batch.len())
        })
    }

    /// Fetch a notification by id.
    pub fn get_notification(&self, id: &str) -> Result<DbNotification, EngineError> {
        let sql = format!("SELECT {} FROM notifications WHERE id = ?1", NOTIFICATION_COLUMNS);
        self.conn
            .query_row(&sql, params![id], map_notification_row)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => {
                    Err(EngineError::NotFound(format!("notification {} not found", id)))
                }
                other => Err(other.into()),
            })
    }

    /// Notifications eligible for a dispatch pass: PENDING, or ERROR with
    /// attempts still under the bound. Optionally filtered to one alert.
    pub fn list_dispatchable(
        &self,
        alert_id: Option<&str>,
    ) -> Result<Vec<DbNotification>, DbError> {
        let sql = format!(
            "SELECT {} FROM notifications
             WHERE status IN ('PENDING', 'ERROR')
               AND attempts < max_attempts
               AND (?1 IS NULL OR alert_id = ?1)
             ORDER BY created_at, id",
            NOTIFICATION_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![alert_id], map_notification_row)?;

        let mut notifications = Vec::new();
        for row in rows {
            notifications.push(row?);
        }
        Ok(notifications)
    }

    /// Mark a notification delivered. Returns false if the row was no longer
    /// in a deliverable state (already SENT by a concurrent pass).
    pub fn mark_notification_sent(&self, id: &str) -> Result<bool, DbError> {
        let changed = self.conn.execute(
            "UPDATE notifications
             SET status = 'SENT', sent_at = ?2, last_error = NULL
             WHERE id = ?1 AND status IN ('PENDING', 'ERROR')",
            params![id, Utc::now().to_rfc3339()],
        )?;
        Ok(changed > 0)
    }

    /// Record a failed delivery attempt: increment-and-check in one guarded
    /// UPDATE. Returns false when the row was already at its bound (or
    /// terminal), in which case nothing changes.
    pub fn record_failed_attempt(&self, id: &str, error: &str) -> Result<bool, DbError> {
        let changed = self.conn.execute(
            "UPDATE notifications
             SET attempts = attempts + 1, status = 'ERROR', last_error = ?2
             WHERE id = ?1 AND status IN ('PENDING', 'ERROR') AND attempts < max_attempts",
            params![id, error],
        )?;
        Ok(changed > 0)
    }

    /// Acknowledge a dashboard notification for one recipient, appending the
    /// VISUALIZED history entry in the same transaction.
    pub fn mark_read(&self, alert_id: &str, recipient_id: &str) -> Result<(), EngineError> {
        self.with_transaction(|db| {
            let changed = db
                .conn_ref()
                .execute(
                    "UPDATE notifications
                     SET status = 'READ', read_at = ?3
                     WHERE alert_id = ?1 AND recipient_id = ?2
                       AND channel = 'DASHBOARD' AND status = 'SENT'",
                    params![alert_id, recipient_id, Utc::now().to_rfc3339()],
                )
                .map_err(DbError::Sqlite)?;

            if changed == 0 {
                let already_read: bool = db
                    .conn_ref()
                    .prepare(
                        "SELECT 1 FROM notifications
                         WHERE alert_id = ?1 AND recipient_id = ?2
                           AND channel = 'DASHBOARD' AND status = 'READ'",
                    )
                    .and_then(|mut stmt| stmt.exists(params![alert_id, recipient_id]))
                    .map_err(DbError::Sqlite)?;
                if already_read {
                    return Err(EngineError::Conflict(format!(
                        "dashboard notification for alert {} already read by {}",
                        alert_id, recipient_id
                    )));
                }
                return Err(EngineError::NotFound(format!(
                    "no sent dashboard notification for alert {} and recipient {}",
                    alert_id, recipient_id
                )));
            }

            let alert = db.get_alert(alert_id)?;
            db.append_history(&alert, HistoryAction::Visualized, None)?;
            Ok(())
        })
    }

    /// SENT dashboard notifications a recipient has not read yet.
    pub fn list_unread_dashboard(
        &self,
        recipient_id: &str,
    ) -> Result<Vec<DbNotification>, DbError> {
        let sql = format!(
            "SELECT {} FROM notifications
             WHERE recipient_id = ?1 AND channel = 'DASHBOARD' AND status = 'SENT'
             ORDER BY created_at DESC",
            NOTIFICATION_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![recipient_id], map_notification_row)?;

        let mut notifications = Vec::new();
        for row in rows {
            notifications.push(row?);
        }
        Ok(notifications)
    }

    /// Notifications that exhausted their attempts. These stay ERROR
    /// permanently and need operator attention.
    pub fn list_exhausted(&self) -> Result<Vec<DbNotification>, DbError> {
        let sql = format!(
            "SELECT {} FROM notifications
             WHERE status = 'ERROR' AND attempts >= max_attempts
             ORDER BY created_at",
            NOTIFICATION_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([], map_notification_row)?;

        let mut notifications = Vec::new();
        for row in rows {
            notifications.push(row?);
        }
        Ok(notifications)
    }
}

impl DbNotification {
    /// Decode the typed channel payload.
    pub fn decode_payload(&self) -> Result<NotificationPayload, serde_json::Error> {
        serde_json::from_str(&self.payload)
    }

    /// Whether this row can still be picked up by a dispatch pass.
    pub fn is_dispatchable(&self) -> bool {
        matches!(
            self.status,
            NotificationStatus::Pending | NotificationStatus::Error
        ) && self.attempts < self.max_attempts
    }
}
