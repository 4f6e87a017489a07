use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};
use uuid::Uuid;
use crate::runtime::blueprint::SocketRef;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    Created,
    Enabled,
    Completed,
    Cancelled,
}

/// Durable human work item created by a Workflow node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowTask {
    pub id: Uuid,
    /// Context suspended on this task.
    pub context_id: Uuid,
    /// Entry socket of the Workflow node that created it.
    pub socket: Option<SocketRef>,
    pub process: String,
    pub node: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub role: Option<String>,
    pub user: Option<String>,
    pub priority: i64,
    pub permissions: Vec<String>,
    pub creator: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub status: TaskStatus,
}

impl WorkflowTask {
    pub fn is_open(&self) -> bool {
        matches!(self.status, TaskStatus::Created | TaskStatus::Enabled)
    }
}
