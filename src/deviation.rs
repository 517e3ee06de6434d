//! Cost deviation aggregation.
//!
//! Compares budgeted and realized cost per category for one project.
//! Categories whose budget sums to zero carry no meaningful percentage and
//! are excluded at the query level.

use rusqlite::params;
use serde::Serialize;

use crate::db::AlertDb;
use crate::error::EngineError;

/// Budgeted vs realized figures for one slice of a project's costs.
/// `category` is None for the project-level rollup.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CostDeviation {
    pub category: Option<String>,
    pub budgeted: f64,
    pub realized: f64,
}

impl CostDeviation {
    /// Absolute deviation as a percentage of budget.
    pub fn deviation_pct(&self) -> f64 {
        (self.realized - self.budgeted).abs() / self.budgeted * 100.0
    }

    /// Signed deviation amount, positive when over budget.
    pub fn deviation_amount(&self) -> f64 {
        self.realized - self.budgeted
    }
}

/// Aggregate budgeted and realized cost per category for a project.
///
/// Read-only. Fails with NotFound if the project does not exist.
pub fn project_deviations(
    db: &AlertDb,
    project_id: &str,
) -> Result<Vec<CostDeviation>, EngineError> {
    if db.project_tenant(project_id)?.is_none() {
        return Err(EngineError::NotFound(format!(
            "project {} not found",
            project_id
        )));
    }

    let mut stmt = db.conn_ref().prepare(
        "SELECT b.category, SUM(b.amount) AS budgeted, COALESCE(e.realized, 0) AS realized
         FROM budget_items b
         LEFT JOIN (
             SELECT category, SUM(amount) AS realized
             FROM expenses
             WHERE project_id = ?1
             GROUP BY category
         ) e ON e.category = b.category
         WHERE b.project_id = ?1
         GROUP BY b.category
         HAVING SUM(b.amount) > 0
         ORDER BY b.category",
    )?;

    let rows = stmt.query_map(params![project_id], |row| {
        Ok(CostDeviation {
            category: Some(row.get(0)?),
            budgeted: row.get(1)?,
            realized: row.get(2)?,
        })
    })?;

    let mut deviations = Vec::new();
    for row in rows {
        deviations.push(row?);
    }
    Ok(deviations)
}

/// Project-level rollup across all categories. Returns None when the
/// project has no budgeted amount at all.
pub fn project_rollup(db: &AlertDb, project_id: &str) -> Result<Option<CostDeviation>, EngineError> {
    let per_category = project_deviations(db, project_id)?;
    if per_category.is_empty() {
        return Ok(None);
    }

    let budgeted: f64 = per_category.iter().map(|d| d.budgeted).sum();
    let realized: f64 = per_category.iter().map(|d| d.realized).sum();
    Ok(Some(CostDeviation {
        category: None,
        budgeted,
        realized,
    }))
}
