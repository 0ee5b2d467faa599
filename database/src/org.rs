use async_trait::async_trait;
use cadre_core::{error::Result, repository::OrgDirectory};
use sqlx::{Row, SqlitePool};

use crate::common::sqlx_error_to_task_error;

/// Read-only SQLite view of the `org_hierarchy` closure table.
///
/// The table stores one row per (agent, ancestor) pair with the distance
/// between them; direct reporting lines have `depth = 1`. The engine never
/// writes it.
#[derive(Debug, Clone)]
pub struct SqliteOrgDirectory {
    pool: SqlitePool,
}

impl SqliteOrgDirectory {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OrgDirectory for SqliteOrgDirectory {
    async fn manager_of(&self, agent_id: &str) -> Result<Option<String>> {
        let row = sqlx::query(
            "SELECT ancestor_id FROM org_hierarchy WHERE agent_id = ? AND depth = 1",
        )
        .bind(agent_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(sqlx_error_to_task_error)?;

        Ok(row.map(|r| r.get("ancestor_id")))
    }

    async fn subordinates_of(&self, agent_id: &str) -> Result<Vec<String>> {
        let rows = sqlx::query(
            "SELECT agent_id FROM org_hierarchy \
             WHERE ancestor_id = ? AND depth = 1 ORDER BY agent_id ASC",
        )
        .bind(agent_id)
        .fetch_all(&self.pool)
        .await
        .map_err(sqlx_error_to_task_error)?;

        Ok(rows.iter().map(|r| r.get("agent_id")).collect())
    }
}
