//! Alert store and lifecycle history.
//!
//! Owns the at-most-one-ACTIVE-alert-per-(project, category) invariant at
//! write time: a partial unique index backs the insert, so two concurrent
//! evaluators racing past the read-side check resolve at the store and the
//! loser sees a Conflict. Every lifecycle transition appends a history row
//! in the same transaction as the status change; history is never mutated.

use chrono::Utc;
use rusqlite::params;
use uuid::Uuid;

use crate::error::EngineError;

use super::{AlertDb, AlertStatus, DbAlert, DbError, DbHistoryEntry, HistoryAction, Severity};

/// Input for creating an alert.
#[derive(Debug, Clone)]
pub struct NewAlert {
    pub project_id: String,
    pub severity: Severity,
    pub deviation_pct: f64,
    pub budgeted: f64,
    pub realized: f64,
    pub deviation_amount: f64,
    pub category: Option<String>,
    pub stage: Option<String>,
    pub description: String,
    pub tenant_id: String,
}

const ALERT_COLUMNS: &str = "id, project_id, severity, deviation_pct, budgeted, realized,
    deviation_amount, category, stage, description, status, tenant_id, created_at";

fn map_alert_row(row: &rusqlite::Row) -> rusqlite::Result<DbAlert> {
    Ok(DbAlert {
        id: row.get(0)?,
        project_id: row.get(1)?,
        severity: row.get(2)?,
        deviation_pct: row.get(3)?,
        budgeted: row.get(4)?,
        realized: row.get(5)?,
        deviation_amount: row.get(6)?,
        category: row.get(7)?,
        stage: row.get(8)?,
        description: row.get(9)?,
        status: row.get(10)?,
        tenant_id: row.get(11)?,
        created_at: row.get(12)?,
    })
}

/// True when a SQLite error is a UNIQUE constraint violation.
fn is_unique_violation(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(e, msg) => {
            e.code == rusqlite::ErrorCode::ConstraintViolation
                && msg
                    .as_deref()
                    .map(|m| m.contains("UNIQUE"))
                    .unwrap_or(false)
        }
        _ => false,
    }
}

impl AlertDb {
    /// Create an alert and its CREATED history entry in one transaction.
    ///
    /// A second ACTIVE alert for the same (project, category) is rejected by
    /// the store's unique index and surfaces as `Conflict`.
    pub fn create_alert(&self, new: &NewAlert) -> Result<DbAlert, EngineError> {
        let id = format!("al-{}", Uuid::new_v4());
        let now = Utc::now().to_rfc3339();

        self.with_transaction(|db| {
            let inserted = db.conn_ref().execute(
                "INSERT INTO alerts (id, project_id, severity, deviation_pct, budgeted, realized,
                    deviation_amount, category, stage, description, status, tenant_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 'ACTIVE', ?11, ?12)",
                params![
                    id,
                    new.project_id,
                    new.severity,
                    new.deviation_pct,
                    new.budgeted,
                    new.realized,
                    new.deviation_amount,
                    new.category,
                    new.stage,
                    new.description,
                    new.tenant_id,
                    now,
                ],
            );

            if let Err(e) = inserted {
                if is_unique_violation(&e) {
                    return Err(EngineError::Conflict(format!(
                        "active alert already exists for project {} category {:?}",
                        new.project_id, new.category
                    )));
                }
                return Err(e.into());
            }

            db.insert_history_row(
                &id,
                HistoryAction::Created,
                new.severity,
                new.deviation_pct,
                new.budgeted,
                new.realized,
                None,
            )?;
            Ok(())
        })?;

        self.get_alert(&id)
    }

    /// Fetch an alert by id.
    pub fn get_alert(&self, id: &str) -> Result<DbAlert, EngineError> {
        let sql = format!("SELECT {} FROM alerts WHERE id = ?1", ALERT_COLUMNS);
        self.conn
            .query_row(&sql, params![id], map_alert_row)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => {
                    Err(EngineError::NotFound(format!("alert {} not found", id)))
                }
                other => Err(other.into()),
            })
    }

    /// ACTIVE alerts for a project, optionally narrowed to one category.
    pub fn list_active_alerts(
        &self,
        project_id: &str,
        category: Option<&str>,
    ) -> Result<Vec<DbAlert>, DbError> {
        let sql = format!(
            "SELECT {} FROM alerts
             WHERE project_id = ?1 AND status = 'ACTIVE'
               AND (?2 IS NULL OR category = ?2)
             ORDER BY created_at DESC",
            ALERT_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![project_id, category], map_alert_row)?;

        let mut alerts = Vec::new();
        for row in rows {
            alerts.push(row?);
        }
        Ok(alerts)
    }

    /// Read-side duplicate check used by the evaluator before creating.
    /// The unique index remains the authority under concurrent writers.
    pub fn has_active_alert(
        &self,
        project_id: &str,
        category: Option<&str>,
    ) -> Result<bool, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT 1 FROM alerts
             WHERE project_id = ?1 AND status = 'ACTIVE'
               AND COALESCE(category, '') = COALESCE(?2, '')
             LIMIT 1",
        )?;
        Ok(stmt.exists(params![project_id, category])?)
    }

    /// Transition an alert's lifecycle status, appending the matching history
    /// entry atomically.
    ///
    /// Legal transitions: ACTIVE → RESOLVED/IGNORED, RESOLVED/IGNORED →
    /// ACTIVE (reactivation). Anything else is a Conflict, including a
    /// reactivation that would collide with a newer ACTIVE alert for the
    /// same category.
    pub fn transition_alert(
        &self,
        id: &str,
        new_status: AlertStatus,
        notes: Option<&str>,
    ) -> Result<DbAlert, EngineError> {
        self.with_transaction(|db| {
            let alert = db.get_alert(id)?;

            let action = match (alert.status, new_status) {
                (AlertStatus::Active, AlertStatus::Resolved) => HistoryAction::Resolved,
                (AlertStatus::Active, AlertStatus::Ignored) => HistoryAction::Ignored,
                (AlertStatus::Resolved, AlertStatus::Active)
                | (AlertStatus::Ignored, AlertStatus::Active) => HistoryAction::Reactivated,
                (from, to) => {
                    return Err(EngineError::Conflict(format!(
                        "alert {} is {}, cannot transition to {}",
                        id, from, to
                    )));
                }
            };

            let updated = db.conn_ref().execute(
                "UPDATE alerts SET status = ?2 WHERE id = ?1",
                params![id, new_status],
            );
            if let Err(e) = updated {
                if is_unique_violation(&e) {
                    return Err(EngineError::Conflict(format!(
                        "another active alert exists for project {} category {:?}",
                        alert.project_id, alert.category
                    )));
                }
                return Err(e.into());
            }

            db.insert_history_row(
                id,
                action,
                alert.severity,
                alert.deviation_pct,
                alert.budgeted,
                alert.realized,
                notes,
            )?;
            Ok(())
        })?;

        self.get_alert(id)
    }

    /// Append a history row for an alert using its current figures.
    /// Used for read-receipt auditing; lifecycle transitions go through
    /// [`AlertDb::transition_alert`].
    pub(crate) fn append_history(
        &self,
        alert: &DbAlert,
        action: HistoryAction,
        notes: Option<&str>,
    ) -> Result<(), DbError> {
        self.insert_history_row(
            &alert.id,
            action,
            alert.severity,
            alert.deviation_pct,
            alert.budgeted,
            alert.realized,
            notes,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn insert_history_row(
        &self,
        alert_id: &str,
        action: HistoryAction,
        severity: Severity,
        deviation_pct: f64,
        budgeted: f64,
        realized: f64,
        notes: Option<&str>,
    ) -> Result<(), DbError> {
        self.conn.execute(
            "INSERT INTO alert_history (id, alert_id, action, severity, deviation_pct,
                budgeted, realized, notes, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                format!("ah-{}", Uuid::new_v4()),
                alert_id,
                action,
                severity,
                deviation_pct,
                budgeted,
                realized,
                notes,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Full history for an alert, oldest first.
    pub fn list_history(&self, alert_id: &str) -> Result<Vec<DbHistoryEntry>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, alert_id, action, severity, deviation_pct, budgeted, realized, notes, created_at
             FROM alert_history
             WHERE alert_id = ?1
             ORDER BY created_at, id",
        )?;
        let rows = stmt.query_map(params![alert_id], |row| {
            Ok(DbHistoryEntry {
                id: row.get(0)?,
                alert_id: row.get(1)?,
                action: row.get(2)?,
                severity: row.get(3)?,
                deviation_pct: row.get(4)?,
                budgeted: row.get(5)?,
                realized: row.get(6)?,
                notes: row.get(7)?,
                created_at: row.get(8)?,
            })
        })?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }
        Ok(entries)
    }
}
