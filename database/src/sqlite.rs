use std::collections::BTreeSet;

use async_trait::async_trait;
use cadre_core::{
    error::{Result, TaskError},
    models::{NewTask, Task, TaskStatus, TransitionExtras},
    repository::TaskStore,
};
use chrono::{DateTime, Utc};
use sqlx::{migrate::MigrateDatabase, Row, Sqlite, SqlitePool};

use crate::common::{
    blocked_by_to_json, priority_to_string, row_to_task, sqlx_error_to_task_error,
    status_to_string,
};

const TASK_COLUMNS: &str = "id, agent_id, title, priority, status, created_at, started_at, \
     completed_at, parent_task_id, depth, delegated_to, delegated_at, percent_complete, \
     subtasks_completed, subtasks_total, blocked_by, blocked_since, task_path, version, \
     last_updated, last_executed, execution_count";

/// Open a connection pool against a SQLite database URL.
///
/// Accepts `:memory:`, bare file paths and `sqlite://` URLs. File-backed
/// databases are created on demand and run in WAL mode; in-memory
/// databases are capped at a single connection so every caller sees the
/// same data.
pub async fn connect(database_url: &str) -> Result<SqlitePool> {
    let db_url = if database_url.starts_with(":memory:") || database_url.starts_with("sqlite://") {
        database_url.to_string()
    } else {
        format!("sqlite://{database_url}")
    };

    let in_memory = db_url.contains(":memory:");

    if !in_memory && !Sqlite::database_exists(&db_url).await.unwrap_or(false) {
        match Sqlite::create_database(&db_url).await {
            Ok(_) => tracing::info!(url = %db_url, "database created"),
            Err(error) => {
                tracing::error!(error = %error, "error creating database");
                return Err(TaskError::Database(format!(
                    "failed to create database: {error}"
                )));
            }
        }
    }

    let connect_options = if in_memory {
        sqlx::sqlite::SqliteConnectOptions::new()
            .filename(&db_url)
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Memory)
            .busy_timeout(std::time::Duration::from_secs(5))
            .foreign_keys(true)
    } else {
        sqlx::sqlite::SqliteConnectOptions::new()
            .filename(db_url.replace("sqlite://", ""))
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .busy_timeout(std::time::Duration::from_secs(5))
            .foreign_keys(true)
    };

    let mut pool_options = sqlx::sqlite::SqlitePoolOptions::new();
    if in_memory {
        // Each in-memory connection would otherwise get its own database
        pool_options = pool_options.max_connections(1);
    }

    pool_options
        .connect_with(connect_options)
        .await
        .map_err(sqlx_error_to_task_error)
}

/// Apply all pending migrations.
pub async fn migrate(pool: &SqlitePool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| TaskError::Database(format!("migration failed: {e}")))?;

    tracing::info!("database migrations completed");
    Ok(())
}

/// SQLite implementation of the [`TaskStore`] trait.
///
/// Every method is one transaction. Mutations guard the final UPDATE with
/// `AND version = ?` so a stale caller observes `VersionMismatch` instead
/// of silently overwriting a newer row.
#[derive(Debug, Clone)]
pub struct SqliteTaskStore {
    pool: SqlitePool,
}

impl SqliteTaskStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open a store directly from a database URL (see [`connect`]).
    pub async fn open(database_url: &str) -> Result<Self> {
        let pool = connect(database_url).await?;
        migrate(&pool).await?;
        Ok(Self::new(pool))
    }

    /// Access the underlying pool, primarily for tests and for wiring the
    /// message and org stores onto the same database.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Work out why a guarded UPDATE matched no row.
    async fn conflict_error(&self, id: &str, expected_version: i64) -> TaskError {
        match self.get(id).await {
            Ok(Some(task)) => TaskError::version_mismatch(id, expected_version, task.version),
            Ok(None) => TaskError::task_not_found(id),
            Err(err) => err,
        }
    }
}

#[async_trait]
impl TaskStore for SqliteTaskStore {
    async fn create(&self, task: NewTask) -> Result<Task> {
        if task.id.trim().is_empty() {
            return Err(TaskError::InvariantViolated("task id cannot be empty".into()));
        }
        if task.agent_id.trim().is_empty() {
            return Err(TaskError::InvariantViolated(
                "agent_id cannot be empty".into(),
            ));
        }
        if task.title.trim().is_empty() {
            return Err(TaskError::InvariantViolated("title cannot be empty".into()));
        }

        let mut tx = self.pool.begin().await.map_err(sqlx_error_to_task_error)?;
        let now = Utc::now();

        let (depth, task_path) = match &task.parent_task_id {
            Some(parent_id) => {
                let parent_row = sqlx::query(
                    "SELECT depth, task_path FROM tasks WHERE id = ?",
                )
                .bind(parent_id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(sqlx_error_to_task_error)?;

                let Some(parent_row) = parent_row else {
                    return Err(TaskError::parent_not_found(parent_id));
                };
                let parent_depth: i32 = parent_row.get("depth");
                let parent_path: String = parent_row.get("task_path");

                // The child count and the derived percentage move with the
                // insert, in the same transaction.
                sqlx::query(
                    "UPDATE tasks \
                     SET subtasks_total = subtasks_total + 1, \
                         percent_complete = CAST(ROUND(100.0 * subtasks_completed / (subtasks_total + 1)) AS INTEGER), \
                         version = version + 1, \
                         last_updated = ? \
                     WHERE id = ?",
                )
                .bind(now)
                .bind(parent_id)
                .execute(&mut *tx)
                .await
                .map_err(sqlx_error_to_task_error)?;

                (
                    parent_depth + 1,
                    format!("{parent_path} > {}", task.title),
                )
            }
            None => (0, task.title.clone()),
        };

        let row = sqlx::query(&format!(
            "INSERT INTO tasks (id, agent_id, title, priority, status, created_at, \
             parent_task_id, depth, task_path, version, last_updated) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 1, ?) \
             RETURNING {TASK_COLUMNS}"
        ))
        .bind(&task.id)
        .bind(&task.agent_id)
        .bind(&task.title)
        .bind(priority_to_string(task.priority))
        .bind(status_to_string(TaskStatus::Pending))
        .bind(now)
        .bind(&task.parent_task_id)
        .bind(depth)
        .bind(&task_path)
        .bind(now)
        .fetch_one(&mut *tx)
        .await
        .map_err(sqlx_error_to_task_error)?;

        tx.commit().await.map_err(sqlx_error_to_task_error)?;
        row_to_task(&row)
    }

    async fn get(&self, id: &str) -> Result<Option<Task>> {
        let row = sqlx::query(&format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(sqlx_error_to_task_error)?;

        row.as_ref().map(row_to_task).transpose()
    }

    async fn transition(
        &self,
        id: &str,
        expected_version: i64,
        target: TaskStatus,
        extras: TransitionExtras,
    ) -> Result<Task> {
        let mut tx = self.pool.begin().await.map_err(sqlx_error_to_task_error)?;

        let row = sqlx::query(&format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?"))
            .bind(id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(sqlx_error_to_task_error)?;
        let Some(row) = row else {
            return Err(TaskError::task_not_found(id));
        };
        let task = row_to_task(&row)?;

        if task.version != expected_version {
            return Err(TaskError::version_mismatch(
                id,
                expected_version,
                task.version,
            ));
        }
        if !task.status.can_transition_to(target) {
            return Err(TaskError::invalid_transition(task.status, target));
        }

        let now = Utc::now();
        let started_at = if target == TaskStatus::InProgress && task.started_at.is_none() {
            Some(now)
        } else {
            task.started_at
        };
        let completed_at = if target == TaskStatus::Completed {
            Some(now)
        } else {
            task.completed_at
        };
        let (blocked_by, blocked_since) = if target == TaskStatus::Blocked {
            let waiting_on = extras.blocked_by.unwrap_or_default();
            if waiting_on.is_empty() {
                return Err(TaskError::InvariantViolated(
                    "a transition into blocked requires a non-empty blocked_by set".into(),
                ));
            }
            (waiting_on, Some(now))
        } else if task.status == TaskStatus::Blocked {
            // Leaving blocked clears the wait-for set
            (BTreeSet::new(), None)
        } else {
            (task.blocked_by.clone(), task.blocked_since)
        };

        let updated = sqlx::query(&format!(
            "UPDATE tasks SET status = ?, started_at = ?, completed_at = ?, blocked_by = ?, \
             blocked_since = ?, version = version + 1, last_updated = ? \
             WHERE id = ? AND version = ? \
             RETURNING {TASK_COLUMNS}"
        ))
        .bind(status_to_string(target))
        .bind(started_at)
        .bind(completed_at)
        .bind(blocked_by_to_json(&blocked_by)?)
        .bind(blocked_since)
        .bind(now)
        .bind(id)
        .bind(expected_version)
        .fetch_optional(&mut *tx)
        .await
        .map_err(sqlx_error_to_task_error)?;

        let Some(updated) = updated else {
            return Err(TaskError::version_mismatch(
                id,
                expected_version,
                task.version,
            ));
        };

        tx.commit().await.map_err(sqlx_error_to_task_error)?;
        row_to_task(&updated)
    }

    async fn delegate(&self, id: &str, expected_version: i64, delegate_to: &str) -> Result<Task> {
        if delegate_to.trim().is_empty() {
            return Err(TaskError::InvariantViolated(
                "delegate_to cannot be empty".into(),
            ));
        }

        let now = Utc::now();
        let updated = sqlx::query(&format!(
            "UPDATE tasks SET delegated_to = ?, delegated_at = ?, version = version + 1, \
             last_updated = ? \
             WHERE id = ? AND version = ? \
             RETURNING {TASK_COLUMNS}"
        ))
        .bind(delegate_to)
        .bind(now)
        .bind(now)
        .bind(id)
        .bind(expected_version)
        .fetch_optional(&self.pool)
        .await
        .map_err(sqlx_error_to_task_error)?;

        match updated {
            Some(row) => row_to_task(&row),
            None => Err(self.conflict_error(id, expected_version).await),
        }
    }

    async fn set_blocked_by(
        &self,
        id: &str,
        expected_version: i64,
        blocked_by: BTreeSet<String>,
    ) -> Result<Task> {
        let mut tx = self.pool.begin().await.map_err(sqlx_error_to_task_error)?;

        let row = sqlx::query("SELECT status, version FROM tasks WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(sqlx_error_to_task_error)?;
        let Some(row) = row else {
            return Err(TaskError::task_not_found(id));
        };
        let status: String = row.get("status");
        let version: i64 = row.get("version");
        if version != expected_version {
            return Err(TaskError::version_mismatch(id, expected_version, version));
        }
        if !blocked_by.is_empty() && status != status_to_string(TaskStatus::Blocked) {
            return Err(TaskError::InvariantViolated(format!(
                "task '{id}' is {status}; only a blocked task can wait on others"
            )));
        }

        let updated = sqlx::query(&format!(
            "UPDATE tasks SET blocked_by = ?, version = version + 1, last_updated = ? \
             WHERE id = ? AND version = ? \
             RETURNING {TASK_COLUMNS}"
        ))
        .bind(blocked_by_to_json(&blocked_by)?)
        .bind(Utc::now())
        .bind(id)
        .bind(expected_version)
        .fetch_optional(&mut *tx)
        .await
        .map_err(sqlx_error_to_task_error)?;

        let Some(updated) = updated else {
            return Err(TaskError::version_mismatch(id, expected_version, version));
        };

        tx.commit().await.map_err(sqlx_error_to_task_error)?;
        row_to_task(&updated)
    }

    async fn update_progress(
        &self,
        id: &str,
        expected_version: i64,
        subtasks_completed: i32,
        percent_complete: i32,
    ) -> Result<Task> {
        if !(0..=100).contains(&percent_complete) {
            return Err(TaskError::InvariantViolated(format!(
                "percent_complete {percent_complete} is outside [0, 100]"
            )));
        }

        let mut tx = self.pool.begin().await.map_err(sqlx_error_to_task_error)?;

        let row = sqlx::query("SELECT subtasks_total, version FROM tasks WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(sqlx_error_to_task_error)?;
        let Some(row) = row else {
            return Err(TaskError::task_not_found(id));
        };
        let subtasks_total: i32 = row.get("subtasks_total");
        let version: i64 = row.get("version");
        if version != expected_version {
            return Err(TaskError::version_mismatch(id, expected_version, version));
        }
        if subtasks_completed > subtasks_total {
            return Err(TaskError::InvariantViolated(format!(
                "subtasks_completed {subtasks_completed} exceeds subtasks_total {subtasks_total}"
            )));
        }

        let updated = sqlx::query(&format!(
            "UPDATE tasks SET subtasks_completed = ?, percent_complete = ?, \
             version = version + 1, last_updated = ? \
             WHERE id = ? AND version = ? \
             RETURNING {TASK_COLUMNS}"
        ))
        .bind(subtasks_completed)
        .bind(percent_complete)
        .bind(Utc::now())
        .bind(id)
        .bind(expected_version)
        .fetch_optional(&mut *tx)
        .await
        .map_err(sqlx_error_to_task_error)?;

        let Some(updated) = updated else {
            return Err(TaskError::version_mismatch(id, expected_version, version));
        };

        tx.commit().await.map_err(sqlx_error_to_task_error)?;
        row_to_task(&updated)
    }

    async fn record_execution(&self, id: &str, expected_version: i64) -> Result<Task> {
        let now = Utc::now();
        let updated = sqlx::query(&format!(
            "UPDATE tasks SET last_executed = ?, execution_count = execution_count + 1, \
             version = version + 1, last_updated = ? \
             WHERE id = ? AND version = ? \
             RETURNING {TASK_COLUMNS}"
        ))
        .bind(now)
        .bind(now)
        .bind(id)
        .bind(expected_version)
        .fetch_optional(&self.pool)
        .await
        .map_err(sqlx_error_to_task_error)?;

        match updated {
            Some(row) => row_to_task(&row),
            None => Err(self.conflict_error(id, expected_version).await),
        }
    }

    async fn list_completed(&self, older_than: Option<DateTime<Utc>>) -> Result<Vec<Task>> {
        let rows = match older_than {
            Some(cutoff) => {
                sqlx::query(&format!(
                    "SELECT {TASK_COLUMNS} FROM tasks \
                     WHERE status = 'completed' AND completed_at < ? \
                     ORDER BY completed_at ASC"
                ))
                .bind(cutoff)
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query(&format!(
                    "SELECT {TASK_COLUMNS} FROM tasks \
                     WHERE status = 'completed' \
                     ORDER BY completed_at ASC"
                ))
                .fetch_all(&self.pool)
                .await
            }
        }
        .map_err(sqlx_error_to_task_error)?;

        rows.iter().map(row_to_task).collect()
    }

    async fn list_archived(&self, older_than: DateTime<Utc>) -> Result<Vec<Task>> {
        let rows = sqlx::query(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks \
             WHERE status = 'archived' AND completed_at < ? \
             ORDER BY completed_at ASC"
        ))
        .bind(older_than)
        .fetch_all(&self.pool)
        .await
        .map_err(sqlx_error_to_task_error)?;

        rows.iter().map(row_to_task).collect()
    }

    async fn list_blocked(&self) -> Result<Vec<Task>> {
        let rows = sqlx::query(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE status = 'blocked' ORDER BY blocked_since ASC"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(sqlx_error_to_task_error)?;

        rows.iter().map(row_to_task).collect()
    }

    async fn list_children(&self, parent_id: &str) -> Result<Vec<Task>> {
        let rows = sqlx::query(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE parent_task_id = ? ORDER BY created_at ASC"
        ))
        .bind(parent_id)
        .fetch_all(&self.pool)
        .await
        .map_err(sqlx_error_to_task_error)?;

        rows.iter().map(row_to_task).collect()
    }

    async fn count_completed_children(&self, parent_id: &str) -> Result<i32> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM tasks \
             WHERE parent_task_id = ? AND status IN ('completed', 'archived')",
        )
        .bind(parent_id)
        .fetch_one(&self.pool)
        .await
        .map_err(sqlx_error_to_task_error)?;

        Ok(row.get::<i64, _>("n") as i32)
    }
}
