//! Mock implementations of the store traits
//!
//! Provides thread-safe in-memory stores with:
//! - Per-method error injection for failure testing
//! - Call tracking for verification
//! - The same transition and invariant semantics as the real store

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use cadre_core::{
    error::{Result, TaskError},
    models::{
        rollup_percent, Message, NewMessage, NewTask, Task, TaskStatus, TransitionExtras,
    },
    repository::{MessageStore, TaskStore},
};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

/// In-memory mock of [`TaskStore`] for coordinator and monitor tests.
pub struct MockTaskStore {
    tasks: Arc<Mutex<HashMap<String, Task>>>,
    error_injection: Arc<Mutex<HashMap<String, VecDeque<TaskError>>>>,
    call_history: Arc<Mutex<Vec<String>>>,
}

impl Default for MockTaskStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTaskStore {
    /// Create a new empty mock store
    pub fn new() -> Self {
        Self {
            tasks: Arc::new(Mutex::new(HashMap::new())),
            error_injection: Arc::new(Mutex::new(HashMap::new())),
            call_history: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Create a mock store with pre-populated tasks
    pub fn with_tasks(tasks: Vec<Task>) -> Self {
        let store = Self::new();
        {
            let mut map = store.tasks.lock();
            for task in tasks {
                map.insert(task.id.clone(), task);
            }
        }
        store
    }

    /// Queue errors to be returned by the next calls of one method
    pub fn inject_errors(&self, method: &str, errors: Vec<TaskError>) {
        self.error_injection
            .lock()
            .entry(method.to_string())
            .or_default()
            .extend(errors);
    }

    /// Queue a single error for the next call of one method
    pub fn inject_error(&self, method: &str, error: TaskError) {
        self.inject_errors(method, vec![error]);
    }

    /// Get history of called methods
    pub fn call_history(&self) -> Vec<String> {
        self.call_history.lock().clone()
    }

    /// Assert a method was called at least once
    pub fn assert_called(&self, method: &str) {
        let history = self.call_history.lock();
        assert!(
            history.iter().any(|call| call.starts_with(method)),
            "method '{}' was not called; history: {:?}",
            method,
            *history
        );
    }

    /// Direct snapshot access for assertions
    pub fn snapshot(&self) -> Vec<Task> {
        self.tasks.lock().values().cloned().collect()
    }

    fn check(&self, method: &str, detail: &str) -> Result<()> {
        self.call_history.lock().push(format!("{method}({detail})"));
        if let Some(queue) = self.error_injection.lock().get_mut(method) {
            if let Some(err) = queue.pop_front() {
                return Err(err);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl TaskStore for MockTaskStore {
    async fn create(&self, task: NewTask) -> Result<Task> {
        self.check("create", &task.id)?;

        let mut tasks = self.tasks.lock();
        let now = Utc::now();

        let (depth, task_path) = match &task.parent_task_id {
            Some(parent_id) => {
                let Some(parent) = tasks.get(parent_id).cloned() else {
                    return Err(TaskError::parent_not_found(parent_id));
                };
                let updated_total = parent.subtasks_total + 1;
                let parent_entry = tasks.get_mut(parent_id).expect("parent present");
                parent_entry.subtasks_total = updated_total;
                parent_entry.percent_complete =
                    rollup_percent(parent_entry.subtasks_completed, updated_total);
                parent_entry.version += 1;
                parent_entry.last_updated = now;
                (
                    parent.depth + 1,
                    format!("{} > {}", parent.task_path, task.title),
                )
            }
            None => (0, task.title.clone()),
        };

        let created = Task {
            id: task.id.clone(),
            agent_id: task.agent_id,
            title: task.title,
            priority: task.priority,
            status: TaskStatus::Pending,
            created_at: now,
            started_at: None,
            completed_at: None,
            parent_task_id: task.parent_task_id,
            depth,
            delegated_to: None,
            delegated_at: None,
            percent_complete: 0,
            subtasks_completed: 0,
            subtasks_total: 0,
            blocked_by: BTreeSet::new(),
            blocked_since: None,
            task_path,
            version: 1,
            last_updated: now,
            last_executed: None,
            execution_count: 0,
        };
        tasks.insert(task.id, created.clone());
        Ok(created)
    }

    async fn get(&self, id: &str) -> Result<Option<Task>> {
        self.check("get", id)?;
        Ok(self.tasks.lock().get(id).cloned())
    }

    async fn transition(
        &self,
        id: &str,
        expected_version: i64,
        target: TaskStatus,
        extras: TransitionExtras,
    ) -> Result<Task> {
        self.check("transition", id)?;

        let mut tasks = self.tasks.lock();
        let Some(task) = tasks.get_mut(id) else {
            return Err(TaskError::task_not_found(id));
        };

        if task.version != expected_version {
            return Err(TaskError::version_mismatch(id, expected_version, task.version));
        }
        if !task.status.can_transition_to(target) {
            return Err(TaskError::invalid_transition(task.status, target));
        }

        let now = Utc::now();
        if target == TaskStatus::InProgress && task.started_at.is_none() {
            task.started_at = Some(now);
        }
        if target == TaskStatus::Completed {
            task.completed_at = Some(now);
        }
        if target == TaskStatus::Blocked {
            let waiting_on = extras.blocked_by.unwrap_or_default();
            if waiting_on.is_empty() {
                return Err(TaskError::InvariantViolated(
                    "a transition into blocked requires a non-empty blocked_by set".into(),
                ));
            }
            task.blocked_by = waiting_on;
            task.blocked_since = Some(now);
        } else if task.status == TaskStatus::Blocked {
            task.blocked_by.clear();
            task.blocked_since = None;
        }

        task.status = target;
        task.version += 1;
        task.last_updated = now;
        Ok(task.clone())
    }

    async fn delegate(&self, id: &str, expected_version: i64, delegate_to: &str) -> Result<Task> {
        self.check("delegate", id)?;

        let mut tasks = self.tasks.lock();
        let Some(task) = tasks.get_mut(id) else {
            return Err(TaskError::task_not_found(id));
        };
        if task.version != expected_version {
            return Err(TaskError::version_mismatch(id, expected_version, task.version));
        }

        let now = Utc::now();
        task.delegated_to = Some(delegate_to.to_string());
        task.delegated_at = Some(now);
        task.version += 1;
        task.last_updated = now;
        Ok(task.clone())
    }

    async fn set_blocked_by(
        &self,
        id: &str,
        expected_version: i64,
        blocked_by: BTreeSet<String>,
    ) -> Result<Task> {
        self.check("set_blocked_by", id)?;

        let mut tasks = self.tasks.lock();
        let Some(task) = tasks.get_mut(id) else {
            return Err(TaskError::task_not_found(id));
        };
        if task.version != expected_version {
            return Err(TaskError::version_mismatch(id, expected_version, task.version));
        }
        if !blocked_by.is_empty() && task.status != TaskStatus::Blocked {
            return Err(TaskError::InvariantViolated(format!(
                "task '{id}' is {}; only a blocked task can wait on others",
                task.status
            )));
        }

        task.blocked_by = blocked_by;
        task.version += 1;
        task.last_updated = Utc::now();
        Ok(task.clone())
    }

    async fn update_progress(
        &self,
        id: &str,
        expected_version: i64,
        subtasks_completed: i32,
        percent_complete: i32,
    ) -> Result<Task> {
        self.check("update_progress", id)?;

        let mut tasks = self.tasks.lock();
        let Some(task) = tasks.get_mut(id) else {
            return Err(TaskError::task_not_found(id));
        };
        if task.version != expected_version {
            return Err(TaskError::version_mismatch(id, expected_version, task.version));
        }
        if !(0..=100).contains(&percent_complete) {
            return Err(TaskError::InvariantViolated(format!(
                "percent_complete {percent_complete} is outside [0, 100]"
            )));
        }
        if subtasks_completed > task.subtasks_total {
            return Err(TaskError::InvariantViolated(format!(
                "subtasks_completed {subtasks_completed} exceeds subtasks_total {}",
                task.subtasks_total
            )));
        }

        task.subtasks_completed = subtasks_completed;
        task.percent_complete = percent_complete;
        task.version += 1;
        task.last_updated = Utc::now();
        Ok(task.clone())
    }

    async fn record_execution(&self, id: &str, expected_version: i64) -> Result<Task> {
        self.check("record_execution", id)?;

        let mut tasks = self.tasks.lock();
        let Some(task) = tasks.get_mut(id) else {
            return Err(TaskError::task_not_found(id));
        };
        if task.version != expected_version {
            return Err(TaskError::version_mismatch(id, expected_version, task.version));
        }

        let now = Utc::now();
        task.last_executed = Some(now);
        task.execution_count += 1;
        task.version += 1;
        task.last_updated = now;
        Ok(task.clone())
    }

    async fn list_completed(&self, older_than: Option<DateTime<Utc>>) -> Result<Vec<Task>> {
        self.check("list_completed", "")?;
        let mut out: Vec<Task> = self
            .tasks
            .lock()
            .values()
            .filter(|t| t.status == TaskStatus::Completed)
            .filter(|t| match (older_than, t.completed_at) {
                (Some(cutoff), Some(completed_at)) => completed_at < cutoff,
                (Some(_), None) => false,
                (None, _) => true,
            })
            .cloned()
            .collect();
        out.sort_by_key(|t| t.completed_at);
        Ok(out)
    }

    async fn list_archived(&self, older_than: DateTime<Utc>) -> Result<Vec<Task>> {
        self.check("list_archived", "")?;
        let mut out: Vec<Task> = self
            .tasks
            .lock()
            .values()
            .filter(|t| t.status == TaskStatus::Archived)
            .filter(|t| t.completed_at.map(|at| at < older_than).unwrap_or(false))
            .cloned()
            .collect();
        out.sort_by_key(|t| t.completed_at);
        Ok(out)
    }

    async fn list_blocked(&self) -> Result<Vec<Task>> {
        self.check("list_blocked", "")?;
        let mut out: Vec<Task> = self
            .tasks
            .lock()
            .values()
            .filter(|t| t.status == TaskStatus::Blocked)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(out)
    }

    async fn list_children(&self, parent_id: &str) -> Result<Vec<Task>> {
        self.check("list_children", parent_id)?;
        let mut out: Vec<Task> = self
            .tasks
            .lock()
            .values()
            .filter(|t| t.parent_task_id.as_deref() == Some(parent_id))
            .cloned()
            .collect();
        out.sort_by_key(|t| t.created_at);
        Ok(out)
    }

    async fn count_completed_children(&self, parent_id: &str) -> Result<i32> {
        self.check("count_completed_children", parent_id)?;
        Ok(self
            .tasks
            .lock()
            .values()
            .filter(|t| t.parent_task_id.as_deref() == Some(parent_id))
            .filter(|t| matches!(t.status, TaskStatus::Completed | TaskStatus::Archived))
            .count() as i32)
    }
}

/// In-memory mock of [`MessageStore`].
pub struct MockMessageStore {
    messages: Arc<Mutex<Vec<Message>>>,
    error_injection: Arc<Mutex<Option<TaskError>>>,
}

impl Default for MockMessageStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MockMessageStore {
    pub fn new() -> Self {
        Self {
            messages: Arc::new(Mutex::new(Vec::new())),
            error_injection: Arc::new(Mutex::new(None)),
        }
    }

    /// Inject an error for the next operation
    pub fn inject_error(&self, error: TaskError) {
        *self.error_injection.lock() = Some(error);
    }

    /// All messages in insertion order
    pub fn sent(&self) -> Vec<Message> {
        self.messages.lock().clone()
    }

    fn check_error_injection(&self) -> Result<()> {
        if let Some(error) = self.error_injection.lock().take() {
            return Err(error);
        }
        Ok(())
    }
}

#[async_trait]
impl MessageStore for MockMessageStore {
    async fn insert(&self, message: NewMessage) -> Result<Message> {
        self.check_error_injection()?;
        let stored = Message {
            id: message.id,
            from_agent: message.from_agent,
            to_agent: message.to_agent,
            timestamp: Utc::now(),
            priority: message.priority,
            channel: message.channel,
            read: false,
            action_required: message.action_required,
            subject: message.subject,
            thread_id: message.thread_id,
            body_path: message.body_path,
        };
        self.messages.lock().push(stored.clone());
        Ok(stored)
    }

    async fn get(&self, id: &str) -> Result<Option<Message>> {
        self.check_error_injection()?;
        Ok(self.messages.lock().iter().find(|m| m.id == id).cloned())
    }

    async fn mark_read(&self, id: &str) -> Result<Message> {
        self.check_error_injection()?;
        let mut messages = self.messages.lock();
        match messages.iter_mut().find(|m| m.id == id) {
            Some(message) => {
                message.read = true;
                Ok(message.clone())
            }
            None => Err(TaskError::TaskNotFound(format!(
                "message with id '{id}' does not exist"
            ))),
        }
    }

    async fn list_for(&self, agent_id: &str, unread_only: bool) -> Result<Vec<Message>> {
        self.check_error_injection()?;
        Ok(self
            .messages
            .lock()
            .iter()
            .filter(|m| m.to_agent == agent_id)
            .filter(|m| !unread_only || !m.read)
            .cloned()
            .collect())
    }

    async fn list_thread(&self, thread_id: &str) -> Result<Vec<Message>> {
        self.check_error_injection()?;
        Ok(self
            .messages
            .lock()
            .iter()
            .filter(|m| m.thread_id == thread_id)
            .cloned()
            .collect())
    }

    async fn unread_count(&self, agent_id: &str) -> Result<i64> {
        self.check_error_injection()?;
        Ok(self
            .messages
            .lock()
            .iter()
            .filter(|m| m.to_agent == agent_id && !m.read)
            .count() as i64)
    }
}
