//! Message bus: typed notifications delivered to agent inboxes.
//!
//! A send writes the rendered Markdown body into the recipient's
//! `inbox/unread/` directory, then indexes the message in the store.
//! Inbox files carry unique names, so concurrent senders never conflict.
//! Every outcome lands in the audit log.

use std::sync::Arc;

use cadre_core::{
    cycle::NormalizedCycle,
    error::Result,
    models::{Message, MessagePriority, NewMessage, Task},
    paths::PathResolver,
    repository::MessageStore,
};
use uuid::Uuid;

use crate::{fsio, telemetry};

/// Channel tag stamped on every internally generated notification.
pub const INTERNAL_CHANNEL: &str = "internal";

/// A notification ready to deliver.
#[derive(Debug, Clone)]
pub struct Notification {
    pub from_agent: String,
    pub to_agent: String,
    pub priority: MessagePriority,
    pub action_required: bool,
    pub subject: String,
    pub thread_id: String,
    pub body: String,
}

/// Writes notification bodies and indexes them in the message store.
pub struct MessageBus {
    resolver: PathResolver,
    messages: Arc<dyn MessageStore>,
}

impl MessageBus {
    pub fn new(resolver: PathResolver, messages: Arc<dyn MessageStore>) -> Self {
        Self { resolver, messages }
    }

    /// Deliver a notification: body file first, then the index row.
    ///
    /// Not idempotent; every call mints a fresh message id. Callers that
    /// need duplicate suppression do it upstream (the deadlock sweep
    /// dedups via cycle normalization).
    pub async fn send(&self, notification: Notification) -> Result<Message> {
        let msg_id = Uuid::new_v4().to_string();
        let body_path = self.resolver.inbox_unread(&notification.to_agent, &msg_id);

        if let Err(err) =
            fsio::write_atomic(&body_path, notification.body.as_bytes()).await
        {
            telemetry::audit(
                &notification.from_agent,
                "send_message",
                &notification.to_agent,
                "error",
                &format!("body write failed: {err}"),
            );
            return Err(err);
        }

        let result = self
            .messages
            .insert(NewMessage {
                id: msg_id,
                from_agent: notification.from_agent.clone(),
                to_agent: notification.to_agent.clone(),
                priority: notification.priority,
                channel: INTERNAL_CHANNEL.to_string(),
                action_required: notification.action_required,
                subject: notification.subject.clone(),
                thread_id: notification.thread_id.clone(),
                body_path: body_path.to_string_lossy().into_owned(),
            })
            .await;

        match &result {
            Ok(message) => telemetry::audit(
                &notification.from_agent,
                "send_message",
                &notification.to_agent,
                "ok",
                &format!("{} [{}]", message.subject, message.thread_id),
            ),
            Err(err) => telemetry::audit(
                &notification.from_agent,
                "send_message",
                &notification.to_agent,
                "error",
                &format!("index insert failed: {err}"),
            ),
        }
        result
    }

    /// Flip a message to read and shelve its body from `unread/` to
    /// `read/`. Safe to call repeatedly.
    pub async fn mark_read(&self, msg_id: &str) -> Result<Message> {
        let message = self.messages.mark_read(msg_id).await?;

        let unread = self.resolver.inbox_unread(&message.to_agent, &message.id);
        let read = self.resolver.inbox_read(&message.to_agent, &message.id);
        if tokio::fs::metadata(&unread).await.is_ok() {
            if let Some(parent) = read.parent() {
                let _ = tokio::fs::create_dir_all(parent).await;
            }
            if let Err(err) = tokio::fs::rename(&unread, &read).await {
                tracing::warn!(msg_id, error = %err, "failed to shelve read message body");
            }
        }
        Ok(message)
    }
}

/// Render the standard notification body for a task event.
pub fn render_task_notification(
    headline: &str,
    sender_display: &str,
    task: &Task,
    instructions: &str,
) -> String {
    let parent = task.parent_task_id.as_deref().unwrap_or("none");
    let timestamps = match (&task.started_at, &task.completed_at) {
        (Some(started), Some(completed)) => format!(
            "started {}, completed {}",
            started.to_rfc3339(),
            completed.to_rfc3339()
        ),
        (Some(started), None) => format!("started {}", started.to_rfc3339()),
        _ => format!("created {}", task.created_at.to_rfc3339()),
    };

    format!(
        "# {headline}\n\n\
         - Task: {title}\n\
         - From: {sender_display}\n\
         - Priority: {priority}\n\
         - Status: {status}\n\
         - Timestamps: {timestamps}\n\
         - Task ID: {id}\n\
         - Parent: {parent}\n\n\
         ## What You Need to Do\n\n\
         {instructions}\n\n\
         Task path: {task_path}\n",
        title = task.title,
        priority = task.priority,
        status = task.status,
        id = task.id,
        task_path = task.task_path,
    )
}

/// Render the body of a deadlock notification: the normalized cycle plus
/// a suggested way out.
pub fn render_deadlock_notification(
    recipient_display: &str,
    cycle: &NormalizedCycle,
    recipient_tasks: &[&Task],
) -> String {
    let owned = if recipient_tasks.is_empty() {
        "- (none of your tasks are in the cycle)".to_string()
    } else {
        recipient_tasks
            .iter()
            .map(|t| format!("- {} ({})", t.title, t.id))
            .collect::<Vec<_>>()
            .join("\n")
    };

    format!(
        "# Deadlock detected\n\n\
         - To: {recipient_display}\n\
         - Priority: urgent\n\
         - Cycle: {cycle}\n\n\
         ## What You Need to Do\n\n\
         The tasks below are waiting on each other in a cycle; none of them \
         can make progress until one dependency is released.\n\n\
         Your tasks in this cycle:\n{owned}\n\n\
         Suggested remediation: pick one of your blocked tasks and either \
         drop a dependency from its wait-for set, split the dependency into \
         a smaller task that can complete independently, or escalate to the \
         owning manager to re-sequence the work.\n",
    )
}

/// Build a delegation notice for the delegatee's inbox.
pub fn delegation_notification(sender_display: &str, task: &Task, delegatee: &str) -> Notification {
    Notification {
        from_agent: task.agent_id.clone(),
        to_agent: delegatee.to_string(),
        priority: MessagePriority::from(task.priority),
        action_required: true,
        subject: format!("Task delegated: {}", task.title),
        thread_id: format!("task-{}", task.id),
        body: render_task_notification(
            &format!("Task delegated: {}", task.title),
            sender_display,
            task,
            "This task has been delegated to you. Review the plan in the \
             task workspace and start execution when ready.",
        ),
    }
}

/// Build a completion notice for an ancestor's inbox.
pub fn completion_notification(
    sender_display: &str,
    completed: &Task,
    recipient: &str,
) -> Notification {
    Notification {
        from_agent: completed.agent_id.clone(),
        to_agent: recipient.to_string(),
        priority: MessagePriority::from(completed.priority),
        action_required: false,
        subject: format!("Task completed: {}", completed.title),
        thread_id: format!("task-{}", completed.id),
        body: render_task_notification(
            &format!("Task completed: {}", completed.title),
            sender_display,
            completed,
            "A subtask in your hierarchy finished; its progress has been \
             rolled up into your task. No action is required.",
        ),
    }
}
