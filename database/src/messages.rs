use async_trait::async_trait;
use cadre_core::{
    error::{Result, TaskError},
    models::{Message, NewMessage},
    repository::MessageStore,
};
use chrono::Utc;
use sqlx::{Row, SqlitePool};

use crate::common::{message_priority_to_string, row_to_message, sqlx_error_to_task_error};

const MESSAGE_COLUMNS: &str = "id, from_agent, to_agent, timestamp, priority, channel, read, \
     action_required, subject, thread_id, body_path";

/// SQLite implementation of the [`MessageStore`] trait.
///
/// Rows are append-only; the only mutation is the idempotent `read` flip.
#[derive(Debug, Clone)]
pub struct SqliteMessageStore {
    pool: SqlitePool,
}

impl SqliteMessageStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MessageStore for SqliteMessageStore {
    async fn insert(&self, message: NewMessage) -> Result<Message> {
        let row = sqlx::query(&format!(
            "INSERT INTO messages (id, from_agent, to_agent, timestamp, priority, channel, \
             read, action_required, subject, thread_id, body_path) \
             VALUES (?, ?, ?, ?, ?, ?, 0, ?, ?, ?, ?) \
             RETURNING {MESSAGE_COLUMNS}"
        ))
        .bind(&message.id)
        .bind(&message.from_agent)
        .bind(&message.to_agent)
        .bind(Utc::now())
        .bind(message_priority_to_string(message.priority))
        .bind(&message.channel)
        .bind(message.action_required)
        .bind(&message.subject)
        .bind(&message.thread_id)
        .bind(&message.body_path)
        .fetch_one(&self.pool)
        .await
        .map_err(sqlx_error_to_task_error)?;

        row_to_message(&row)
    }

    async fn get(&self, id: &str) -> Result<Option<Message>> {
        let row = sqlx::query(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(sqlx_error_to_task_error)?;

        row.as_ref().map(row_to_message).transpose()
    }

    async fn mark_read(&self, id: &str) -> Result<Message> {
        // Unconditional flip keeps the operation idempotent
        let row = sqlx::query(&format!(
            "UPDATE messages SET read = 1 WHERE id = ? RETURNING {MESSAGE_COLUMNS}"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(sqlx_error_to_task_error)?;

        match row {
            Some(row) => row_to_message(&row),
            None => Err(TaskError::TaskNotFound(format!(
                "message with id '{id}' does not exist"
            ))),
        }
    }

    async fn list_for(&self, agent_id: &str, unread_only: bool) -> Result<Vec<Message>> {
        let rows = if unread_only {
            sqlx::query(&format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages \
                 WHERE to_agent = ? AND read = 0 ORDER BY timestamp DESC"
            ))
            .bind(agent_id)
            .fetch_all(&self.pool)
            .await
        } else {
            sqlx::query(&format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages \
                 WHERE to_agent = ? ORDER BY timestamp DESC"
            ))
            .bind(agent_id)
            .fetch_all(&self.pool)
            .await
        }
        .map_err(sqlx_error_to_task_error)?;

        rows.iter().map(row_to_message).collect()
    }

    async fn list_thread(&self, thread_id: &str) -> Result<Vec<Message>> {
        let rows = sqlx::query(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages \
             WHERE thread_id = ? ORDER BY timestamp ASC, id ASC"
        ))
        .bind(thread_id)
        .fetch_all(&self.pool)
        .await
        .map_err(sqlx_error_to_task_error)?;

        rows.iter().map(row_to_message).collect()
    }

    async fn unread_count(&self, agent_id: &str) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM messages WHERE to_agent = ? AND read = 0")
            .bind(agent_id)
            .fetch_one(&self.pool)
            .await
            .map_err(sqlx_error_to_task_error)?;

        Ok(row.get("n"))
    }
}
