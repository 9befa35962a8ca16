//! Port traits the placement engine and worker runtime depend on. Nothing
//! in this module knows about Postgres, Redis, RabbitMQ, or Prometheus —
//! those live behind the implementations in [`crate::adapters`]. Core code
//! (`scheduler::placement`, `worker::runtime`) must only ever name the
//! traits here, never a concrete adapter type.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;

use crate::model::{Node, NodeMetrics, Task, TaskStatus};

/// Persistent storage for tasks: the system of record for task status.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Insert a new task. Returns `Ok(false)` without error if a task with
    /// the same id already exists (idempotent producer retries).
    async fn save(&self, task: &Task) -> anyhow::Result<bool>;

    async fn get(&self, id: &str) -> anyhow::Result<Option<Task>>;

    /// Unconditional write of `status` and `assigned_node_id` — no
    /// compare-and-swap. Safety relies on the single-writer-per-transition
    /// discipline described in the placement engine and worker runtime.
    async fn update_status(
        &self,
        id: &str,
        status: TaskStatus,
        assigned_node_id: &str,
    ) -> anyhow::Result<()>;

    /// Tasks in `Pending`, ordered by priority descending, ties broken by
    /// insertion order.
    async fn list_pending(&self) -> anyhow::Result<Vec<Task>>;
}

/// Ephemeral, TTL-backed node membership.
#[async_trait]
pub trait NodeRegistry: Send + Sync {
    /// Write (or refresh) `node`'s record with the given TTL.
    async fn register(&self, node: &Node, ttl: Duration) -> anyhow::Result<()>;

    /// Every node whose heartbeat has not expired. A node whose key expires
    /// between enumeration and read is silently omitted, not an error.
    async fn list_active(&self) -> anyhow::Result<Vec<Node>>;
}

/// Read access to worker-reported resource usage.
#[async_trait]
pub trait MetricsSource: Send + Sync {
    /// Usage for a single node, bounded by `timeout`. Implementations fall
    /// back to a conservative estimate and log a warning rather than
    /// propagate an error, so a flaky metrics backend never blocks
    /// placement outright.
    async fn node_metrics(&self, node_id: &str, timeout: Duration) -> NodeMetrics;

    /// Usage for every node known to the backend, fetched in one round
    /// trip where possible. Nodes absent from the result should be looked
    /// up individually by the caller via [`MetricsSource::node_metrics`].
    async fn all_nodes_metrics(&self, timeout: Duration) -> HashMap<String, NodeMetrics>;
}

/// A single unit of work delivered off the bus, pending acknowledgement.
#[async_trait]
pub trait Delivery: Send + Sync {
    fn payload(&self) -> &[u8];
    async fn ack(self: Box<Self>) -> anyhow::Result<()>;
    async fn reject(self: Box<Self>, requeue: bool) -> anyhow::Result<()>;
}

/// The priority-routed message bus binding the placement engine to workers.
#[async_trait]
pub trait TaskBus: Send + Sync {
    /// Publish `task`, routed by its priority (see the routing-key mapping
    /// in `adapters::amqp_bus`). Returns only once the broker has
    /// confirmed the publish.
    async fn publish(&self, task: &Task) -> anyhow::Result<()>;

    /// Receive the next delivery from the bound queue(s), blocking until
    /// one arrives or the bus is closed.
    async fn next_delivery(&self) -> anyhow::Result<Option<Box<dyn Delivery>>>;
}
