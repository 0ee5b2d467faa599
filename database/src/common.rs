use std::collections::BTreeSet;

use cadre_core::{
    error::{Result, TaskError},
    models::{Message, MessagePriority, Priority, Task, TaskStatus},
};
use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row};

/// Convert TaskStatus to its stored string form
pub fn status_to_string(status: TaskStatus) -> &'static str {
    match status {
        TaskStatus::Pending => "pending",
        TaskStatus::InProgress => "in_progress",
        TaskStatus::Blocked => "blocked",
        TaskStatus::Completed => "completed",
        TaskStatus::Archived => "archived",
    }
}

/// Convert a stored string back to TaskStatus
pub fn string_to_status(s: &str) -> Result<TaskStatus> {
    match s {
        "pending" => Ok(TaskStatus::Pending),
        "in_progress" => Ok(TaskStatus::InProgress),
        "blocked" => Ok(TaskStatus::Blocked),
        "completed" => Ok(TaskStatus::Completed),
        "archived" => Ok(TaskStatus::Archived),
        _ => Err(TaskError::Database(format!(
            "invalid task status in database: {s}"
        ))),
    }
}

/// Convert Priority to its stored string form
pub fn priority_to_string(priority: Priority) -> &'static str {
    match priority {
        Priority::Urgent => "urgent",
        Priority::High => "high",
        Priority::Medium => "medium",
        Priority::Low => "low",
    }
}

/// Convert a stored string back to Priority
pub fn string_to_priority(s: &str) -> Result<Priority> {
    match s {
        "urgent" => Ok(Priority::Urgent),
        "high" => Ok(Priority::High),
        "medium" => Ok(Priority::Medium),
        "low" => Ok(Priority::Low),
        _ => Err(TaskError::Database(format!(
            "invalid task priority in database: {s}"
        ))),
    }
}

/// Convert MessagePriority to its stored string form
pub fn message_priority_to_string(priority: MessagePriority) -> &'static str {
    match priority {
        MessagePriority::Urgent => "urgent",
        MessagePriority::High => "high",
        MessagePriority::Normal => "normal",
        MessagePriority::Low => "low",
    }
}

/// Convert a stored string back to MessagePriority
pub fn string_to_message_priority(s: &str) -> Result<MessagePriority> {
    match s {
        "urgent" => Ok(MessagePriority::Urgent),
        "high" => Ok(MessagePriority::High),
        "normal" => Ok(MessagePriority::Normal),
        "low" => Ok(MessagePriority::Low),
        _ => Err(TaskError::Database(format!(
            "invalid message priority in database: {s}"
        ))),
    }
}

/// Serialize the wait-for set into its JSON column form (sorted array).
pub fn blocked_by_to_json(blocked_by: &BTreeSet<String>) -> Result<String> {
    serde_json::to_string(blocked_by)
        .map_err(|e| TaskError::Database(format!("failed to serialize blocked_by: {e}")))
}

/// Parse the JSON wait-for column back into a set.
pub fn blocked_by_from_json(raw: &str) -> Result<BTreeSet<String>> {
    serde_json::from_str(raw)
        .map_err(|e| TaskError::Database(format!("invalid blocked_by in database: {e}")))
}

/// Convert a SQLite row to the Task model
pub fn row_to_task(row: &SqliteRow) -> Result<Task> {
    let status_str: String = row.get("status");
    let status = string_to_status(&status_str)?;
    let priority_str: String = row.get("priority");
    let priority = string_to_priority(&priority_str)?;
    let blocked_by_raw: String = row.get("blocked_by");
    let blocked_by = blocked_by_from_json(&blocked_by_raw)?;

    let created_at: DateTime<Utc> = row.get("created_at");
    let last_updated: DateTime<Utc> = row.get("last_updated");

    Ok(Task {
        id: row.get("id"),
        agent_id: row.get("agent_id"),
        title: row.get("title"),
        priority,
        status,
        created_at,
        started_at: row.get("started_at"),
        completed_at: row.get("completed_at"),
        parent_task_id: row.get("parent_task_id"),
        depth: row.get("depth"),
        delegated_to: row.get("delegated_to"),
        delegated_at: row.get("delegated_at"),
        percent_complete: row.get("percent_complete"),
        subtasks_completed: row.get("subtasks_completed"),
        subtasks_total: row.get("subtasks_total"),
        blocked_by,
        blocked_since: row.get("blocked_since"),
        task_path: row.get("task_path"),
        version: row.get("version"),
        last_updated,
        last_executed: row.get("last_executed"),
        execution_count: row.get("execution_count"),
    })
}

/// Convert a SQLite row to the Message model
pub fn row_to_message(row: &SqliteRow) -> Result<Message> {
    let priority_str: String = row.get("priority");
    let priority = string_to_message_priority(&priority_str)?;
    let timestamp: DateTime<Utc> = row.get("timestamp");

    Ok(Message {
        id: row.get("id"),
        from_agent: row.get("from_agent"),
        to_agent: row.get("to_agent"),
        timestamp,
        priority,
        channel: row.get("channel"),
        read: row.get("read"),
        action_required: row.get("action_required"),
        subject: row.get("subject"),
        thread_id: row.get("thread_id"),
        body_path: row.get("body_path"),
    })
}

/// Convert a SQLx error to the engine error surface
pub fn sqlx_error_to_task_error(err: sqlx::Error) -> TaskError {
    match &err {
        sqlx::Error::Database(db_err) => {
            TaskError::Database(format!("database constraint error: {}", db_err.message()))
        }
        sqlx::Error::PoolTimedOut => TaskError::Database("connection pool timeout".to_string()),
        sqlx::Error::Io(io_err) => TaskError::Database(format!("database I/O error: {io_err}")),
        _ => TaskError::Database(format!("database operation failed: {err}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_conversions() {
        let statuses = [
            TaskStatus::Pending,
            TaskStatus::InProgress,
            TaskStatus::Blocked,
            TaskStatus::Completed,
            TaskStatus::Archived,
        ];
        for status in statuses {
            assert_eq!(string_to_status(status_to_string(status)).unwrap(), status);
        }
        assert!(string_to_status("Created").is_err());
        assert!(string_to_status("archive/2024-01").is_err());
    }

    #[test]
    fn test_priority_conversions() {
        for priority in [
            Priority::Urgent,
            Priority::High,
            Priority::Medium,
            Priority::Low,
        ] {
            assert_eq!(
                string_to_priority(priority_to_string(priority)).unwrap(),
                priority
            );
        }
        assert!(string_to_priority("critical").is_err());

        for priority in [
            MessagePriority::Urgent,
            MessagePriority::High,
            MessagePriority::Normal,
            MessagePriority::Low,
        ] {
            assert_eq!(
                string_to_message_priority(message_priority_to_string(priority)).unwrap(),
                priority
            );
        }
        assert!(string_to_message_priority("medium").is_err());
    }

    #[test]
    fn test_blocked_by_json_is_sorted() {
        let mut set = BTreeSet::new();
        set.insert("T9".to_string());
        set.insert("T1".to_string());
        set.insert("T5".to_string());
        let json = blocked_by_to_json(&set).unwrap();
        assert_eq!(json, r#"["T1","T5","T9"]"#);
        assert_eq!(blocked_by_from_json(&json).unwrap(), set);
    }

    #[test]
    fn test_blocked_by_rejects_garbage() {
        assert!(blocked_by_from_json("not json").is_err());
        assert!(blocked_by_from_json("{}").is_err());
        assert_eq!(blocked_by_from_json("[]").unwrap(), BTreeSet::new());
    }
}
