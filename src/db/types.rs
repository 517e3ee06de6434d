//! Shared type definitions for the database layer.
//!
//! Severity tiers, alert/notification statuses, and channels are closed
//! enums stored as TEXT. The original data used free strings for these
//! tags; enums keep the evaluator and dispatcher matches exhaustive.

use std::fmt;
use std::str::FromStr;

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSqlOutput, ValueRef};
use rusqlite::ToSql;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors specific to database operations.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Home directory not found")]
    HomeDirNotFound,

    #[error("Failed to create database directory: {0}")]
    CreateDir(std::io::Error),

    #[error("Schema migration failed: {0}")]
    Migration(String),

    #[error("Payload encoding failed: {0}")]
    Payload(#[from] serde_json::Error),
}

macro_rules! text_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(format!(concat!("unknown ", stringify!($name), ": {}"), other)),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl ToSql for $name {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(self.as_str().into())
            }
        }

        impl FromSql for $name {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                value
                    .as_str()?
                    .parse()
                    .map_err(|e: String| FromSqlError::Other(e.into()))
            }
        }
    };
}

/// Severity tier assigned by comparing a deviation against configured
/// thresholds. Ordering follows tier rank, so `Critical > Low`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

text_enum!(Severity {
    Low => "LOW",
    Medium => "MEDIUM",
    High => "HIGH",
    Critical => "CRITICAL",
});

/// Lifecycle state of an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AlertStatus {
    Active,
    Resolved,
    Ignored,
}

text_enum!(AlertStatus {
    Active => "ACTIVE",
    Resolved => "RESOLVED",
    Ignored => "IGNORED",
});

/// Append-only audit action recorded in `alert_history`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HistoryAction {
    Created,
    Visualized,
    Resolved,
    Ignored,
    Reactivated,
}

text_enum!(HistoryAction {
    Created => "CREATED",
    Visualized => "VISUALIZED",
    Resolved => "RESOLVED",
    Ignored => "IGNORED",
    Reactivated => "REACTIVATED",
});

/// Notification delivery mechanism.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Channel {
    Dashboard,
    Email,
    Webhook,
}

text_enum!(Channel {
    Dashboard => "DASHBOARD",
    Email => "EMAIL",
    Webhook => "WEBHOOK",
});

/// Delivery state of a notification.
///
/// PENDING → SENT | ERROR; ERROR rows below the attempt bound are
/// re-selected by the dispatcher; SENT → READ is dashboard-only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum NotificationStatus {
    Pending,
    Sent,
    Error,
    Read,
}

text_enum!(NotificationStatus {
    Pending => "PENDING",
    Sent => "SENT",
    Error => "ERROR",
    Read => "READ",
});

/// A row from the `alert_configs` table: one watcher's thresholds and
/// channel toggles for a project.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DbAlertConfig {
    pub id: String,
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
    /// How often the host's sweep should re-evaluate this project, in hours.
    /// Stored for the host scheduler; the engine itself is invoked per request.
    pub check_interval_hours: i64,
    pub active: bool,
    pub created_at: String,
    pub updated_at: String,
}

/// A row from the `alerts` table: one detected deviation instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DbAlert {
    pub id: String,
    pub project_id: String,
    pub severity: Severity,
    pub deviation_pct: f64,
    pub budgeted: f64,
    pub realized: f64,
    /// realized − budgeted, positive when over budget.
    pub deviation_amount: f64,
    pub category: Option<String>,
    pub stage: Option<String>,
    pub description: String,
    pub status: AlertStatus,
    pub tenant_id: String,
    pub created_at: String,
}

/// A row from the append-only `alert_history` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DbHistoryEntry {
    pub id: String,
    pub alert_id: String,
    pub action: HistoryAction,
    pub severity: Severity,
    pub deviation_pct: f64,
    pub budgeted: f64,
    pub realized: f64,
    pub notes: Option<String>,
    pub created_at: String,
}

/// A row from the `notifications` table: one (alert, channel) delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DbNotification {
    pub id: String,
    pub alert_id: String,
    pub recipient_id: String,
    pub tenant_id: String,
    pub channel: Channel,
    pub status: NotificationStatus,
    pub title: String,
    pub body: String,
    /// Channel-specific payload, serialized [`NotificationPayload`] JSON.
    pub payload: String,
    pub attempts: i64,
    pub max_attempts: i64,
    pub last_error: Option<String>,
    pub sent_at: Option<String>,
    pub read_at: Option<String>,
    pub created_at: String,
}

/// Typed per-channel payload stored in `notifications.payload`.
///
/// The dispatcher matches on this exhaustively; adding a channel is a
/// compile-time-checked change.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "channel", rename_all = "snake_case")]
pub enum NotificationPayload {
    Dashboard,
    Email {
        /// Recipient identifier handed to the mail collaborator, which owns
        /// address resolution.
        to: String,
    },
    Webhook {
        url: String,
        body: WebhookBody,
    },
}

/// Fixed JSON shape POSTed to webhook endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookBody {
    pub alert_type: Severity,
    pub deviation_percentage: f64,
    pub deviation_amount: f64,
    pub obra_id: String,
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test: Option<bool>,
}
