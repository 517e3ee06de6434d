//! Cost base: projects, budget lines, and expenses.
//!
//! The host product owns the real CRUD for these tables; the engine reads
//! them to derive deviations. The insert helpers here mirror the host's
//! shape so the engine can be seeded and tested end-to-end.

use chrono::Utc;
use rusqlite::params;
use uuid::Uuid;

use super::{AlertDb, DbError};

impl AlertDb {
    /// Insert a project. Returns the generated id.
    pub fn insert_project(&self, name: &str, tenant_id: &str) -> Result<String, DbError> {
        let id = format!("ob-{}", Uuid::new_v4());
        self.conn.execute(
            "INSERT INTO projects (id, name, tenant_id, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![id, name, tenant_id, Utc::now().to_rfc3339()],
        )?;
        Ok(id)
    }

    /// Insert a budget line for a project category.
    pub fn insert_budget_item(
        &self,
        project_id: &str,
        category: &str,
        amount: f64,
    ) -> Result<String, DbError> {
        let id = format!("bi-{}", Uuid::new_v4());
        self.conn.execute(
            "INSERT INTO budget_items (id, project_id, category, amount, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![id, project_id, category, amount, Utc::now().to_rfc3339()],
        )?;
        Ok(id)
    }

    /// Insert a realized expense for a project category.
    pub fn insert_expense(
        &self,
        project_id: &str,
        category: &str,
        amount: f64,
    ) -> Result<String, DbError> {
        let id = format!("ex-{}", Uuid::new_v4());
        self.conn.execute(
            "INSERT INTO expenses (id, project_id, category, amount, spent_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![id, project_id, category, amount, Utc::now().to_rfc3339()],
        )?;
        Ok(id)
    }

    /// Check that a project exists. Returns its tenant id.
    pub fn project_tenant(&self, project_id: &str) -> Result<Option<String>, DbError> {
        let tenant = self
            .conn
            .query_row(
                "SELECT tenant_id FROM projects WHERE id = ?1",
                params![project_id],
                |row| row.get(0),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;
        Ok(tenant)
    }
}

#[cfg(test)]
mod tests {
    use crate::db::test_utils::test_db;

    #[test]
    fn project_tenant_distinguishes_missing() {
        let db = test_db();
        let id = db.insert_project("Residencial Aurora", "t1").unwrap();
        assert_eq!(db.project_tenant(&id).unwrap().as_deref(), Some("t1"));
        assert!(db.project_tenant("ob-missing").unwrap().is_none());
    }
}
