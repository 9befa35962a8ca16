//! The placement engine: one sequential scan-score-dispatch cycle per
//! tick, bound to a cancellation signal so shutdown never interrupts a
//! cycle half-way through.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use scheduler_core::model::{Node, NodeMetrics, Task, TaskStatus};
use scheduler_core::ports::{MetricsSource, NodeRegistry, TaskBus, TaskStore};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// CPU carries slightly more weight than memory: a workload where CPU is
/// the likelier bottleneck. Tunable.
const CPU_WEIGHT: f64 = 0.6;
const MEMORY_WEIGHT: f64 = 0.4;

/// Per-query timeout against the metrics backend.
const METRICS_TIMEOUT: Duration = Duration::from_secs(5);

pub struct PlacementEngine {
    store: Arc<dyn TaskStore>,
    registry: Arc<dyn NodeRegistry>,
    metrics: Arc<dyn MetricsSource>,
    bus: Arc<dyn TaskBus>,
}

impl PlacementEngine {
    pub fn new(
        store: Arc<dyn TaskStore>,
        registry: Arc<dyn NodeRegistry>,
        metrics: Arc<dyn MetricsSource>,
        bus: Arc<dyn TaskBus>,
    ) -> Self {
        Self {
            store,
            registry,
            metrics,
            bus,
        }
    }

    /// Runs one tick every `interval` until `shutdown` fires. A cycle that
    /// overruns the interval coalesces the missed ticks into one (no
    /// backlog, no overlapping cycles) via `MissedTickBehavior::Delay`.
    pub async fn run(&self, interval: Duration, mut shutdown: tokio::sync::broadcast::Receiver<()>) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.run_cycle().await {
                        warn!("placement cycle failed: {e}");
                    }
                }
                _ = shutdown.recv() => {
                    info!("placement engine stopping");
                    return;
                }
            }
        }
    }

    pub async fn run_cycle(&self) -> anyhow::Result<()> {
        let pending = self.store.list_pending().await?;
        if pending.is_empty() {
            return Ok(());
        }
        debug!(count = pending.len(), "found pending tasks");

        let nodes = self.registry.list_active().await?;
        if nodes.is_empty() {
            warn!("no active nodes available to schedule tasks");
            return Ok(());
        }

        let batch_metrics = self.metrics.all_nodes_metrics(METRICS_TIMEOUT).await;

        for task in &pending {
            match self.select_best_node(task, &nodes, &batch_metrics).await {
                Some(node) => self.dispatch(task, &node).await,
                None => {
                    debug!(task_id = %task.id, "no feasible node this cycle");
                }
            }
        }

        Ok(())
    }

    async fn dispatch(&self, task: &Task, node: &Node) {
        match self
            .store
            .update_status(&task.id, TaskStatus::Scheduled, &node.id)
            .await
        {
            Ok(()) => {}
            Err(e) => {
                warn!(task_id = %task.id, "failed to update task status: {e}");
                return;
            }
        }

        let mut scheduled = task.clone();
        scheduled.status = TaskStatus::Scheduled;
        scheduled.assigned_node_id = Some(node.id.clone());

        if let Err(e) = self.bus.publish(&scheduled).await {
            // The task is now orphaned: SCHEDULED with a binding, but no
            // message on the bus. list_pending no longer returns it. This
            // is a known gap (no reaper) rather than a bug — see design
            // notes.
            warn!(task_id = %task.id, node_id = %node.id, "publish failed after status update: {e}");
            return;
        }

        info!(
            task_id = %task.id,
            node_id = %node.id,
            node_cpu_free = node.available_cpu(),
            event = "scheduled",
            "scheduled task onto node"
        );
    }

    /// Scores every feasible node against `task` and returns the highest.
    /// Ties are broken by first encountered (stable) — the pack's original
    /// `sort.Slice` has the same tie behaviour since Go's `sort.Slice` is
    /// not guaranteed stable for equal keys, but scanning in registry order
    /// and keeping strictly-greater is.
    async fn select_best_node(
        &self,
        task: &Task,
        nodes: &[Node],
        batch_metrics: &HashMap<String, NodeMetrics>,
    ) -> Option<Node> {
        let mut best: Option<(Node, f64)> = None;

        for node in nodes {
            let metrics = match batch_metrics.get(&node.id) {
                Some(m) => *m,
                None => self.metrics.node_metrics(&node.id, METRICS_TIMEOUT).await,
            };

            let mut candidate = node.clone();
            candidate.used_cpu = metrics.cpu_usage_percent / 100.0 * candidate.total_cpu;
            candidate.used_memory = metrics.memory_usage_mb;

            if candidate.available_cpu() < task.required_cpu
                || candidate.available_memory() < task.required_memory
            {
                continue;
            }

            let cpu_score = if task.required_cpu > 0.0 {
                candidate.available_cpu() / task.required_cpu
            } else {
                candidate.available_cpu()
            };
            let mem_score = if task.required_memory > 0.0 {
                candidate.available_memory() / task.required_memory
            } else {
                candidate.available_memory() / 100.0
            };
            let score = CPU_WEIGHT * cpu_score + MEMORY_WEIGHT * mem_score;

            debug!(node_id = %candidate.id, cpu_score, mem_score, score, "evaluated node");

            match &best {
                Some((_, best_score)) if score <= *best_score => {}
                _ => best = Some((candidate, score)),
            }
        }

        best.map(|(node, _)| node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use scheduler_core::model::NodeStatus;
    use std::sync::Mutex as StdMutex;
    use tokio::sync::Mutex;

    struct FakeStore {
        tasks: Mutex<Vec<Task>>,
    }

    #[async_trait]
    impl TaskStore for FakeStore {
        async fn save(&self, task: &Task) -> anyhow::Result<bool> {
            self.tasks.lock().await.push(task.clone());
            Ok(true)
        }
        async fn get(&self, id: &str) -> anyhow::Result<Option<Task>> {
            Ok(self.tasks.lock().await.iter().find(|t| t.id == id).cloned())
        }
        async fn update_status(
            &self,
            id: &str,
            status: TaskStatus,
            node_id: &str,
        ) -> anyhow::Result<()> {
            let mut tasks = self.tasks.lock().await;
            if let Some(t) = tasks.iter_mut().find(|t| t.id == id) {
                t.status = status;
                t.assigned_node_id = Some(node_id.to_string());
            }
            Ok(())
        }
        async fn list_pending(&self) -> anyhow::Result<Vec<Task>> {
            Ok(self
                .tasks
                .lock()
                .await
                .iter()
                .filter(|t| t.status == TaskStatus::Pending)
                .cloned()
                .collect())
        }
    }

    struct FakeRegistry {
        nodes: Vec<Node>,
    }

    #[async_trait]
    impl NodeRegistry for FakeRegistry {
        async fn register(&self, _node: &Node, _ttl: Duration) -> anyhow::Result<()> {
            Ok(())
        }
        async fn list_active(&self) -> anyhow::Result<Vec<Node>> {
            Ok(self.nodes.clone())
        }
    }

    struct FakeMetrics {
        by_node: HashMap<String, NodeMetrics>,
    }

    #[async_trait]
    impl MetricsSource for FakeMetrics {
        async fn node_metrics(&self, node_id: &str, _timeout: Duration) -> NodeMetrics {
            self.by_node
                .get(node_id)
                .copied()
                .unwrap_or(NodeMetrics {
                    cpu_usage_percent: 0.0,
                    memory_usage_mb: 0.0,
                })
        }
        async fn all_nodes_metrics(&self, _timeout: Duration) -> HashMap<String, NodeMetrics> {
            self.by_node.clone()
        }
    }

    struct FakeBus {
        published: StdMutex<Vec<Task>>,
    }

    #[async_trait]
    impl TaskBus for FakeBus {
        async fn publish(&self, task: &Task) -> anyhow::Result<()> {
            self.published.lock().unwrap().push(task.clone());
            Ok(())
        }
        async fn next_delivery(
            &self,
        ) -> anyhow::Result<Option<Box<dyn scheduler_core::ports::Delivery>>> {
            Ok(None)
        }
    }

    fn node(id: &str, total_cpu: f64, total_memory: f64) -> Node {
        Node {
            id: id.to_string(),
            hostname: id.to_string(),
            total_cpu,
            total_memory,
            used_cpu: 0.0,
            used_memory: 0.0,
            status: NodeStatus::Active,
            last_heartbeat: Utc::now(),
        }
    }

    #[tokio::test]
    async fn single_feasible_node_gets_scheduled_and_published() {
        let task = Task::new("t1", "probe", "alpine", vec![], 5, 0.5, 512.0);
        let store = FakeStore {
            tasks: Mutex::new(vec![task.clone()]),
        };
        let registry = FakeRegistry {
            nodes: vec![node("n1", 2.0, 4096.0)],
        };
        let mut by_node = HashMap::new();
        by_node.insert(
            "n1".to_string(),
            NodeMetrics {
                cpu_usage_percent: 25.0,
                memory_usage_mb: 1024.0,
            },
        );
        let metrics = FakeMetrics { by_node };
        let bus = FakeBus {
            published: StdMutex::new(vec![]),
        };

        let engine = PlacementEngine::new(
            Arc::new(store),
            Arc::new(registry),
            Arc::new(metrics),
            Arc::new(bus),
        );
        engine.run_cycle().await.unwrap();

        let stored = engine.store.get("t1").await.unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::Scheduled);
        assert_eq!(stored.assigned_node_id.as_deref(), Some("n1"));
    }

    #[tokio::test]
    async fn infeasible_task_stays_pending() {
        let task = Task::new("t2", "heavy", "alpine", vec![], 5, 10.0, 512.0);
        let store = FakeStore {
            tasks: Mutex::new(vec![task.clone()]),
        };
        let registry = FakeRegistry {
            nodes: vec![node("n1", 2.0, 4096.0)],
        };
        let metrics = FakeMetrics {
            by_node: HashMap::new(),
        };
        let bus = FakeBus {
            published: StdMutex::new(vec![]),
        };

        let engine = PlacementEngine::new(
            Arc::new(store),
            Arc::new(registry),
            Arc::new(metrics),
            Arc::new(bus),
        );
        engine.run_cycle().await.unwrap();

        let stored = engine.store.get("t2").await.unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::Pending);
    }

    #[tokio::test]
    async fn headroom_proportional_choice_prefers_relative_not_absolute() {
        let task = Task::new("t3", "probe", "alpine", vec![], 5, 0.5, 128.0);
        // A: cpu=4, used=3 -> avail=1; B: cpu=2, used=0 -> avail=2.
        // cpu_score: A = 1/0.5 = 2, B = 2/0.5 = 4. B should win.
        let node_a = node("a", 4.0, 4096.0);
        let node_b = node("b", 2.0, 4096.0);
        let store = FakeStore {
            tasks: Mutex::new(vec![task.clone()]),
        };
        let registry = FakeRegistry {
            nodes: vec![node_a, node_b],
        };
        let mut by_node = HashMap::new();
        by_node.insert(
            "a".to_string(),
            NodeMetrics {
                cpu_usage_percent: 75.0, // 3/4 = 75%
                memory_usage_mb: 0.0,
            },
        );
        by_node.insert(
            "b".to_string(),
            NodeMetrics {
                cpu_usage_percent: 0.0,
                memory_usage_mb: 0.0,
            },
        );
        let metrics = FakeMetrics { by_node };
        let bus = FakeBus {
            published: StdMutex::new(vec![]),
        };

        let engine = PlacementEngine::new(
            Arc::new(store),
            Arc::new(registry),
            Arc::new(metrics),
            Arc::new(bus),
        );
        engine.run_cycle().await.unwrap();

        let stored = engine.store.get("t3").await.unwrap().unwrap();
        assert_eq!(stored.assigned_node_id.as_deref(), Some("b"));
    }
}
