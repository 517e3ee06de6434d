//! Threshold evaluation pass.
//!
//! Compares a project's cost deviations against its active configurations,
//! creates alerts for categories that cross a threshold, and fans each new
//! alert out to notification channels. Invoked per request — a scheduled
//! sweep, an explicit user action, or a data-mutation side effect.

use serde::Serialize;

use crate::db::alerts::NewAlert;
use crate::db::{AlertDb, DbAlertConfig, Severity};
use crate::deviation::{self, CostDeviation};
use crate::error::EngineError;
use crate::fanout;

/// Deviations below this floor are never alerted, regardless of configured
/// thresholds.
pub const MIN_DEVIATION_PCT: f64 = 5.0;

/// Outcome of one evaluation pass. Partial success is normal: alerts
/// committed before a storage failure stay committed and are counted.
#[derive(Debug, Clone, Copy, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationSummary {
    pub alerts_created: usize,
    pub categories_analyzed: usize,
}

/// Assign the first tier, highest first, whose threshold the deviation
/// meets or exceeds.
fn classify(pct: f64, config: &DbAlertConfig) -> Option<Severity> {
    [
        Severity::Critical,
        Severity::High,
        Severity::Medium,
        Severity::Low,
    ]
    .into_iter()
    .find(|&sev| pct >= config.threshold_for(sev))
}

/// The highest tier any active configuration assigns to this deviation.
fn classify_across(pct: f64, configs: &[DbAlertConfig]) -> Option<Severity> {
    configs.iter().filter_map(|c| classify(pct, c)).max()
}

fn describe(deviation: &CostDeviation, pct: f64) -> String {
    let direction = if deviation.deviation_amount() >= 0.0 {
        "over"
    } else {
        "under"
    };
    match deviation.category.as_deref() {
        Some(category) => format!(
            "Category {} is {:.1}% {} budget ({:.2} budgeted, {:.2} realized)",
            category, pct, direction, deviation.budgeted, deviation.realized
        ),
        None => format!(
            "Project is {:.1}% {} budget ({:.2} budgeted, {:.2} realized)",
            pct, direction, deviation.budgeted, deviation.realized
        ),
    }
}

/// Run one evaluation pass for a project.
///
/// For each category with a non-zero budget, computes the deviation
/// percentage, skips the noise floor, assigns a severity, and creates an
/// alert plus its CREATED history atomically — unless an ACTIVE alert for
/// that (project, category) already exists, in which case creation is
/// suppressed. Fan-out runs synchronously per created alert.
///
/// A storage failure stops the remaining categories; alerts committed up to
/// that point are kept and reported through the returned counts.
pub fn evaluate(db: &AlertDb, project_id: &str) -> Result<EvaluationSummary, EngineError> {
    let tenant_id = db
        .project_tenant(project_id)?
        .ok_or_else(|| EngineError::NotFound(format!("project {} not found", project_id)))?;

    let configs = db.list_active_configs(project_id)?;
    if configs.is_empty() {
        log::debug!("Evaluate: no active configuration for project {}", project_id);
        return Ok(EvaluationSummary::default());
    }

    // Per-category unless every watcher asked for the project-level rollup.
    let deviations = if configs.iter().all(|c| !c.per_category) {
        deviation::project_rollup(db, project_id)?
            .into_iter()
            .collect()
    } else {
        deviation::project_deviations(db, project_id)?
    };

    let mut summary = EvaluationSummary {
        alerts_created: 0,
        categories_analyzed: deviations.len(),
    };

    for dev in &deviations {
        let pct = dev.deviation_pct();
        if pct < MIN_DEVIATION_PCT {
            continue;
        }

        let Some(severity) = classify_across(pct, &configs) else {
            continue;
        };

        match db.has_active_alert(project_id, dev.category.as_deref()) {
            Ok(true) => continue,
            Ok(false) => {}
            Err(e) => {
                log::error!(
                    "Evaluate: duplicate check failed for project {} category {:?}: {}",
                    project_id,
                    dev.category,
                    e
                );
                break;
            }
        }

        let new = NewAlert {
            project_id: project_id.to_string(),
            severity,
            deviation_pct: pct,
            budgeted: dev.budgeted,
            realized: dev.realized,
            deviation_amount: dev.deviation_amount(),
            category: dev.category.clone(),
            stage: None,
            description: describe(dev, pct),
            tenant_id: tenant_id.clone(),
        };

        let alert = match db.create_alert(&new) {
            Ok(alert) => alert,
            // Lost the insert race to a concurrent evaluator: already alerted.
            Err(e) if e.is_conflict() => {
                log::debug!(
                    "Evaluate: concurrent alert for project {} category {:?}",
                    project_id,
                    dev.category
                );
                continue;
            }
            Err(e) => {
                log::error!(
                    "Evaluate: aborting after create failure for project {} category {:?}: {}",
                    project_id,
                    dev.category,
                    e
                );
                break;
            }
        };
        summary.alerts_created += 1;

        if let Err(e) = fanout::fan_out(db, &alert, &configs) {
            log::error!(
                "Evaluate: aborting after fan-out failure for alert {}: {}",
                alert.id,
                e
            );
            break;
        }
    }

    log::info!(
        "Evaluate: project {} — {} alerts from {} categories",
        project_id,
        summary.alerts_created,
        summary.categories_analyzed
    );
    Ok(summary)
}
