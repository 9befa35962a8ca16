//! Domain types shared by the scheduler and worker: tasks, nodes, and the
//! transient metrics pair the placement engine scores nodes against.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a [`Task`].
///
/// Transitions: `PENDING -> SCHEDULED` (placement engine), `SCHEDULED ->
/// RUNNING` (worker, on delivery), `RUNNING -> COMPLETED | FAILED` (worker,
/// on executor return). There is no path back to an earlier state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Pending,
    Scheduled,
    Running,
    Completed,
    Failed,
}

/// Membership state of a [`Node`] as last advertised in its own heartbeat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeStatus {
    Active,
    Inactive,
    Draining,
}

/// A unit of work to be scheduled onto a fog node.
///
/// Invariants: a task in `Pending` has `assigned_node_id == None`; once set,
/// `assigned_node_id` is never cleared or changed — a redelivery reuses the
/// existing binding. `updated_at` is monotonically non-decreasing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub name: String,
    pub image: String,
    pub command: Vec<String>,
    /// 0 (low) to 9 (critical); higher is more urgent.
    pub priority: u8,
    /// Fractional CPU cores required, >= 0.
    pub required_cpu: f64,
    /// MB of memory required, >= 0.
    pub required_memory: f64,
    pub status: TaskStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assigned_node_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        image: impl Into<String>,
        command: Vec<String>,
        priority: u8,
        required_cpu: f64,
        required_memory: f64,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            name: name.into(),
            image: image.into(),
            command,
            priority,
            required_cpu,
            required_memory,
            status: TaskStatus::Pending,
            assigned_node_id: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A fog worker's declared capacity and observed usage.
///
/// `used_cpu`/`used_memory` are transient: set from [`crate::ports::MetricsSource`]
/// at placement time, never persisted by the registry itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    pub hostname: String,
    pub total_cpu: f64,
    pub total_memory: f64,
    #[serde(default)]
    pub used_cpu: f64,
    #[serde(default)]
    pub used_memory: f64,
    pub status: NodeStatus,
    pub last_heartbeat: DateTime<Utc>,
}

impl Node {
    pub fn available_cpu(&self) -> f64 {
        self.total_cpu - self.used_cpu
    }

    pub fn available_memory(&self) -> f64 {
        self.total_memory - self.used_memory
    }
}

/// A fresh `(cpu_usage_percent, memory_usage_mb)` reading for one node.
/// Never persisted; produced on demand by a `MetricsSource`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NodeMetrics {
    pub cpu_usage_percent: f64,
    pub memory_usage_mb: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_task_starts_pending_with_no_assignment() {
        let t = Task::new("t1", "probe", "alpine", vec!["echo".into()], 5, 0.5, 512.0);
        assert_eq!(t.status, TaskStatus::Pending);
        assert!(t.assigned_node_id.is_none());
        assert_eq!(t.created_at, t.updated_at);
    }

    #[test]
    fn node_available_resources_subtract_usage() {
        let node = Node {
            id: "n1".into(),
            hostname: "h1".into(),
            total_cpu: 4.0,
            total_memory: 8192.0,
            used_cpu: 1.5,
            used_memory: 2048.0,
            status: NodeStatus::Active,
            last_heartbeat: Utc::now(),
        };
        assert_eq!(node.available_cpu(), 2.5);
        assert_eq!(node.available_memory(), 6144.0);
    }
}
