//! Alert configuration store.
//!
//! One configuration per (project, owner). Validation runs at save time —
//! a configuration that cannot pass here never reaches the evaluator.

use chrono::Utc;
use rusqlite::params;
use uuid::Uuid;

use crate::error::EngineError;

use super::{AlertDb, DbAlertConfig, DbError, Severity};

/// Input for creating or replacing an alert configuration.
#[derive(Debug, Clone)]
pub struct AlertConfigInput {
    pub project_id: String,
    pub owner_id: String,
    pub tenant_id: String,
    pub threshold_low: f64,
    pub threshold_medium: f64,
    pub threshold_high: f64,
    pub threshold_critical: f64,
    pub notify_dashboard: bool,
    pub notify_email: bool,
    pub notify_webhook: bool,
    pub webhook_url: Option<String>,
    pub per_category: bool,
    pub per_stage: bool,
    pub check_interval_hours: i64,
}

impl AlertConfigInput {
    /// Reject threshold orderings and channel combinations that could never
    /// evaluate meaningfully. Runs before any row is written.
    fn validate(&self) -> Result<(), EngineError> {
        let thresholds = [
            self.threshold_low,
            self.threshold_medium,
            self.threshold_high,
            self.threshold_critical,
        ];
        if thresholds.iter().any(|t| !t.is_finite() || *t <= 0.0) {
            return Err(EngineError::ConfigurationInvalid(
                "thresholds must be positive percentages".to_string(),
            ));
        }
        if !(self.threshold_low < self.threshold_medium
            && self.threshold_medium < self.threshold_high
            && self.threshold_high < self.threshold_critical)
        {
            return Err(EngineError::ConfigurationInvalid(format!(
                "thresholds must be strictly increasing (low < medium < high < critical), got {:?}",
                thresholds
            )));
        }

        if self.notify_webhook {
            let raw = self.webhook_url.as_deref().unwrap_or("").trim();
            if raw.is_empty() {
                return Err(EngineError::ConfigurationInvalid(
                    "webhook channel enabled but no webhook URL set".to_string(),
                ));
            }
            let parsed = url::Url::parse(raw).map_err(|e| {
                EngineError::ConfigurationInvalid(format!("webhook URL is not valid: {}", e))
            })?;
            if parsed.scheme() != "http" && parsed.scheme() != "https" {
                return Err(EngineError::ConfigurationInvalid(format!(
                    "webhook URL must be http(s), got {}",
                    parsed.scheme()
                )));
            }
        }

        Ok(())
    }
}

impl DbAlertConfig {
    /// The configured threshold for a severity tier.
    pub fn threshold_for(&self, severity: Severity) -> f64 {
        match severity {
            Severity::Low => self.threshold_low,
            Severity::Medium => self.threshold_medium,
            Severity::High => self.threshold_high,
            Severity::Critical => self.threshold_critical,
        }
    }
}

fn map_config_row(row: &rusqlite::Row) -> rusqlite::Result<DbAlertConfig> {
    Ok(DbAlertConfig {
        id: row.get(0)?,
        project_id: row.get(1)?,
        owner_id: row.get(2)?,
        tenant_id: row.get(3)?,
        threshold_low: row.get(4)?,
        threshold_medium: row.get(5)?,
        threshold_high: row.get(6)?,
        threshold_critical: row.get(7)?,
        notify_dashboard: row.get(8)?,
        notify_email: row.get(9)?,
        notify_webhook: row.get(10)?,
        webhook_url: row.get(11)?,
        per_category: row.get(12)?,
        per_stage: row.get(13)?,
        check_interval_hours: row.get(14)?,
        active: row.get(15)?,
        created_at: row.get(16)?,
        updated_at: row.get(17)?,
    })
}

const CONFIG_COLUMNS: &str = "id, project_id, owner_id, tenant_id, threshold_low, threshold_medium,
    threshold_high, threshold_critical, notify_dashboard, notify_email, notify_webhook,
    webhook_url, per_category, per_stage, check_interval_hours, active, created_at, updated_at";

impl AlertDb {
    /// Validate and persist a configuration. Replaces any previous
    /// configuration by the same owner for the same project.
    pub fn save_config(&self, input: &AlertConfigInput) -> Result<DbAlertConfig, EngineError> {
        input.validate()?;

        if self.project_tenant(&input.project_id)?.is_none() {
            return Err(EngineError::NotFound(format!(
                "project {} does not exist",
                input.project_id
            )));
        }

        let now = Utc::now().to_rfc3339();
        let id = format!("cfg-{}", Uuid::new_v4());

        self.with_transaction(|db| {
            // One configuration per (project, owner): the new row supersedes.
            db.conn_ref()
                .execute(
                    "UPDATE alert_configs SET active = 0, updated_at = ?3
                     WHERE project_id = ?1 AND owner_id = ?2 AND active = 1",
                    params![input.project_id, input.owner_id, now],
                )
                .map_err(DbError::Sqlite)?;

            db.conn_ref()
                .execute(
                    "INSERT INTO alert_configs (id, project_id, owner_id, tenant_id,
                        threshold_low, threshold_medium, threshold_high, threshold_critical,
                        notify_dashboard, notify_email, notify_webhook, webhook_url,
                        per_category, per_stage, check_interval_hours, active, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, 1, ?16, ?16)",
                    params![
                        id,
                        input.project_id,
                        input.owner_id,
                        input.tenant_id,
                        input.threshold_low,
                        input.threshold_medium,
                        input.threshold_high,
                        input.threshold_critical,
                        input.notify_dashboard,
                        input.notify_email,
                        input.notify_webhook,
                        input.webhook_url,
                        input.per_category,
                        input.per_stage,
                        input.check_interval_hours,
                        now,
                    ],
                )
                .map_err(DbError::Sqlite)?;
            Ok::<_, EngineError>(())
        })?;

        self.get_config(&id)
    }

    /// Fetch a configuration by id.
    pub fn get_config(&self, id: &str) -> Result<DbAlertConfig, EngineError> {
        let sql = format!("SELECT {} FROM alert_configs WHERE id = ?1", CONFIG_COLUMNS);
        self.conn
            .query_row(&sql, params![id], map_config_row)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => {
                    Err(EngineError::NotFound(format!("configuration {} not found", id)))
                }
                other => Err(other.into()),
            })
    }

    /// Active configurations for a project, oldest first.
    pub fn list_active_configs(&self, project_id: &str) -> Result<Vec<DbAlertConfig>, DbError> {
        let sql = format!(
            "SELECT {} FROM alert_configs WHERE project_id = ?1 AND active = 1 ORDER BY created_at",
            CONFIG_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![project_id], map_config_row)?;

        let mut configs = Vec::new();
        for row in rows {
            configs.push(row?);
        }
        Ok(configs)
    }

    /// Deactivate a configuration. Evaluation and fan-out stop consulting it.
    pub fn deactivate_config(&self, id: &str) -> Result<(), EngineError> {
        let changed = self.conn.execute(
            "UPDATE alert_configs SET active = 0, updated_at = ?2 WHERE id = ?1 AND active = 1",
            params![id, Utc::now().to_rfc3339()],
        )?;
        if changed == 0 {
            return Err(EngineError::NotFound(format!(
                "active configuration {} not found",
                id
            )));
        }
        Ok(())
    }
}
