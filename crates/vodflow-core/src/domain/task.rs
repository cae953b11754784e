use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

/// Identifier of a pipeline step (e.g. `ABR_TRANSCODE`, `VOD_PACKAGE`).
///
/// The set is open-ended: whatever the workflow definition declares.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskType(String);

impl TaskType {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for TaskType {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Task state.
///
/// State transitions:
/// - Pending -> InProgress (all dependencies completed, executor started the job)
/// - InProgress -> Completed
/// - InProgress -> Failed
///
/// Completed and Failed are terminal. There is no automatic retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    /// Is `next` a legal successor of `self`?
    ///
    /// Rewriting the current status is allowed (a poll that sees the job
    /// still running, a duplicate callback); it may replace the payload.
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        self == next
            || matches!(
                (self, next),
                (Pending, InProgress) | (InProgress, Completed) | (InProgress, Failed)
            )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Pending => "PENDING",
            TaskStatus::InProgress => "IN_PROGRESS",
            TaskStatus::Completed => "COMPLETED",
            TaskStatus::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

/// One pipeline step inside a work order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    #[serde(rename = "type")]
    pub task_type: TaskType,

    #[serde(rename = "dependsOn", default)]
    pub depends_on: Vec<TaskType>,

    pub status: TaskStatus,

    /// Executor-defined job handle or result. A present `null` stays `Some(Null)`.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "present_payload"
    )]
    pub payload: Option<serde_json::Value>,
}

impl Task {
    /// A fresh `PENDING` task with no payload.
    pub fn pending(task_type: TaskType, depends_on: Vec<TaskType>) -> Self {
        Self {
            task_type,
            depends_on,
            status: TaskStatus::Pending,
            payload: None,
        }
    }
}

fn present_payload<'de, D>(deserializer: D) -> Result<Option<serde_json::Value>, D::Error>
where
    D: Deserializer<'de>,
{
    serde_json::Value::deserialize(deserializer).map(Some)
}
