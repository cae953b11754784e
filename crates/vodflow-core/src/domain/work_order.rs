//! Work order record: one source asset and the tasks that process it.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

use super::task::{Task, TaskStatus, TaskType};

/// Identifier of a work order.
///
/// Used as the store key and as the correlation id handed to remote job
/// services, so it must stay stable for the order's lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkOrderId(String);

impl WorkOrderId {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkOrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for WorkOrderId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkOrderStatus {
    Open,
    Closed,
}

impl fmt::Display for WorkOrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkOrderStatus::Open => f.write_str("OPEN"),
            WorkOrderStatus::Closed => f.write_str("CLOSED"),
        }
    }
}

/// Work order record.
///
/// Design:
/// - Tasks are unique by type within an order and keep declaration order.
/// - `updated_at` advances on every status or payload change.
/// - `revision` is the store's concurrency token; it increases by one per
///   successful write and is never set by callers directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkOrder {
    pub id: WorkOrderId,
    pub source: Url,
    pub status: WorkOrderStatus,
    pub tasks: Vec<Task>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub revision: u64,
}

impl WorkOrder {
    /// Build an `OPEN` order from a template. Every task starts `PENDING`
    /// with `depends_on` copied verbatim.
    pub fn new(id: WorkOrderId, source: Url, template: &[Task], now: DateTime<Utc>) -> Self {
        let tasks = template
            .iter()
            .map(|t| Task::pending(t.task_type.clone(), t.depends_on.clone()))
            .collect();
        Self {
            id,
            source,
            status: WorkOrderStatus::Open,
            tasks,
            created_at: now,
            updated_at: now,
            revision: 0,
        }
    }

    pub fn task(&self, task_type: &TaskType) -> Option<&Task> {
        self.tasks.iter().find(|t| &t.task_type == task_type)
    }

    pub fn task_mut(&mut self, task_type: &TaskType) -> Option<&mut Task> {
        self.tasks.iter_mut().find(|t| &t.task_type == task_type)
    }

    pub fn is_open(&self) -> bool {
        self.status == WorkOrderStatus::Open
    }

    /// Every task has reached `COMPLETED`. The condition for closing.
    pub fn all_tasks_completed(&self) -> bool {
        self.tasks.iter().all(|t| t.status == TaskStatus::Completed)
    }

    /// An open order with a failed task can never close on its own.
    pub fn is_stuck(&self) -> bool {
        self.is_open() && self.tasks.iter().any(|t| t.status == TaskStatus::Failed)
    }

    /// All of `task`'s dependencies are `COMPLETED` in this order.
    ///
    /// A dependency naming a type that is absent from the order is never met.
    pub fn dependencies_met(&self, task: &Task) -> bool {
        self.unmet_dependencies(task).is_empty()
    }

    /// `task`'s dependencies that are not yet `COMPLETED`, in declaration order.
    pub fn unmet_dependencies(&self, task: &Task) -> Vec<TaskType> {
        task.depends_on
            .iter()
            .filter(|dep| {
                !self
                    .task(dep)
                    .is_some_and(|t| t.status == TaskStatus::Completed)
            })
            .cloned()
            .collect()
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
    }
}
