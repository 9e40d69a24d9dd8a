//! Batch fleet task DTOs.
//!
//! Tasks are in-memory, process-lifetime records of one fan-out operation.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Complete,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Complete | TaskStatus::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskResultStatus {
    Complete,
    Failed,
}

/// Outcome of one device within a batch task.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskResult {
    pub device_id: String,
    pub status: TaskResultStatus,
    pub message: String,
}

/// Point-in-time view of a batch task.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSnapshot {
    pub task_id: String,
    pub status: TaskStatus,
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub results: Vec<TaskResult>,
}

/// Immediate response to a batch submission.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchAccepted {
    pub task_id: String,
    pub total: usize,
    pub device_ids: Vec<String>,
}

/// Query for the task-status endpoints.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStatusQuery {
    pub task_id: String,
}
