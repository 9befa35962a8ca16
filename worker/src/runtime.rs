//! The worker runtime: heartbeat loop, metrics gauges, and the
//! priority-aware consumer that drives a task through RUNNING to
//! COMPLETED/FAILED with manual ack.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use scheduler_core::errors::CoreError;
use scheduler_core::model::{Node, NodeStatus, Task, TaskStatus};
use scheduler_core::ports::{NodeRegistry, TaskBus, TaskStore};
use tracing::{error, info, warn};

use crate::executor::TaskExecutor;
use crate::metrics_exporter::GaugeRegistry;

pub struct WorkerRuntime {
    node_id: String,
    hostname: String,
    total_cpu: f64,
    total_memory: f64,
    heartbeat_interval: Duration,
    heartbeat_ttl: Duration,
    store: Arc<dyn TaskStore>,
    registry: Arc<dyn NodeRegistry>,
    bus: Arc<dyn TaskBus>,
    executor: Arc<dyn TaskExecutor>,
    gauges: Arc<GaugeRegistry>,
}

impl WorkerRuntime {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        node_id: String,
        hostname: String,
        total_cpu: f64,
        total_memory: f64,
        heartbeat_interval: Duration,
        heartbeat_ttl: Duration,
        store: Arc<dyn TaskStore>,
        registry: Arc<dyn NodeRegistry>,
        bus: Arc<dyn TaskBus>,
        executor: Arc<dyn TaskExecutor>,
        gauges: Arc<GaugeRegistry>,
    ) -> Self {
        Self {
            node_id,
            hostname,
            total_cpu,
            total_memory,
            heartbeat_interval,
            heartbeat_ttl,
            store,
            registry,
            bus,
            executor,
            gauges,
        }
    }

    /// Runs the heartbeat loop and the consumer loop concurrently until
    /// `shutdown` fires.
    pub async fn run(&self, mut shutdown: tokio::sync::broadcast::Receiver<()>) {
        let heartbeat = self.heartbeat_loop(shutdown.resubscribe());
        let consume = self.consume_loop(shutdown.resubscribe());

        tokio::select! {
            _ = heartbeat => {}
            _ = consume => {}
            _ = shutdown.recv() => {
                info!("worker runtime stopping");
            }
        }
    }

    async fn heartbeat_loop(&self, mut shutdown: tokio::sync::broadcast::Receiver<()>) {
        let mut ticker = tokio::time::interval(self.heartbeat_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    // Declared capacity only — observed usage is the
                    // MetricsSource's job, not the heartbeat's (§4.6).
                    let node = Node {
                        id: self.node_id.clone(),
                        hostname: self.hostname.clone(),
                        total_cpu: self.total_cpu,
                        total_memory: self.total_memory,
                        used_cpu: 0.0,
                        used_memory: 0.0,
                        status: NodeStatus::Active,
                        last_heartbeat: Utc::now(),
                    };
                    if let Err(e) = self.registry.register(&node, self.heartbeat_ttl).await {
                        warn!("heartbeat failed: {e}");
                    } else {
                        info!(node_id = %self.node_id, event = "heartbeat", "heartbeat sent");
                    }

                    let (cpu_percent, memory_bytes) = self.sample_usage();
                    self.gauges.set_usage(cpu_percent, memory_bytes);
                }
                _ = shutdown.recv() => return,
            }
        }
    }

    async fn consume_loop(&self, mut shutdown: tokio::sync::broadcast::Receiver<()>) {
        loop {
            tokio::select! {
                delivery = self.bus.next_delivery() => {
                    match delivery {
                        Ok(Some(delivery)) => self.handle_delivery(delivery).await,
                        Ok(None) => {
                            warn!("bus closed, stopping consumer");
                            return;
                        }
                        Err(e) => {
                            error!("error receiving delivery: {e}");
                        }
                    }
                }
                _ = shutdown.recv() => return,
            }
        }
    }

    async fn handle_delivery(&self, delivery: Box<dyn scheduler_core::ports::Delivery>) {
        let task: Task = match serde_json::from_slice(delivery.payload()) {
            Ok(t) => t,
            Err(e) => {
                let e = CoreError::Decode(e.to_string());
                warn!("{e}");
                if let Err(e) = delivery.reject(false).await {
                    error!("failed to reject poison message: {e}");
                }
                return;
            }
        };

        info!(task_id = %task.id, event = "received", "received task");

        if let Err(e) = self
            .store
            .update_status(&task.id, TaskStatus::Running, &self.node_id)
            .await
        {
            error!(task_id = %task.id, "failed to update status to RUNNING: {e}");
        }
        info!(task_id = %task.id, event = "running", "task running");

        let outcome = self.executor.run(&task).await;

        let final_status = match &outcome {
            Ok(()) => TaskStatus::Completed,
            Err(_) => TaskStatus::Failed,
        };
        if let Err(e) = self
            .store
            .update_status(&task.id, final_status, &self.node_id)
            .await
        {
            error!(task_id = %task.id, "failed to update terminal status: {e}");
        }

        match outcome {
            Ok(()) => {
                info!(task_id = %task.id, event = "completed", "task completed");
                if let Err(e) = delivery.ack().await {
                    error!(task_id = %task.id, "failed to ack delivery: {e}");
                }
            }
            Err(e) => {
                warn!(task_id = %task.id, event = "failed", "task failed: {e}");
                if let Err(e) = delivery.reject(true).await {
                    error!(task_id = %task.id, "failed to requeue delivery: {e}");
                }
            }
        }
    }

    pub fn gauges(&self) -> Arc<GaugeRegistry> {
        self.gauges.clone()
    }

    /// Current CPU usage percent and memory usage in bytes. Real resource
    /// sampling is host-specific and out of scope here, same as the
    /// executor's `run(task)` effect — this jitters around the declared
    /// capacity so the exported gauges carry plausible, non-constant
    /// values for the `MetricsSource` to scrape.
    fn sample_usage(&self) -> (f64, f64) {
        let mut rng = rand::rng();
        let cpu_percent = rng.random_range(5.0..60.0);
        let memory_bytes = rng.random_range(0.1..0.6) * self.total_memory * 1024.0 * 1024.0;
        (cpu_percent, memory_bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use scheduler_core::ports::Delivery;
    use std::sync::Mutex as StdMutex;
    use tokio::sync::mpsc;

    struct FakeStore {
        calls: StdMutex<Vec<(String, TaskStatus, String)>>,
    }

    #[async_trait]
    impl TaskStore for FakeStore {
        async fn save(&self, _task: &Task) -> anyhow::Result<bool> {
            Ok(true)
        }
        async fn get(&self, _id: &str) -> anyhow::Result<Option<Task>> {
            Ok(None)
        }
        async fn update_status(
            &self,
            id: &str,
            status: TaskStatus,
            node_id: &str,
        ) -> anyhow::Result<()> {
            self.calls
                .lock()
                .unwrap()
                .push((id.to_string(), status, node_id.to_string()));
            Ok(())
        }
        async fn list_pending(&self) -> anyhow::Result<Vec<Task>> {
            Ok(vec![])
        }
    }

    struct FakeRegistry;

    #[async_trait]
    impl NodeRegistry for FakeRegistry {
        async fn register(&self, _node: &Node, _ttl: Duration) -> anyhow::Result<()> {
            Ok(())
        }
        async fn list_active(&self) -> anyhow::Result<Vec<Node>> {
            Ok(vec![])
        }
    }

    struct FakeDelivery {
        payload: Vec<u8>,
        outcome: mpsc::UnboundedSender<(bool, bool)>, // (acked, requeued)
    }

    #[async_trait]
    impl Delivery for FakeDelivery {
        fn payload(&self) -> &[u8] {
            &self.payload
        }
        async fn ack(self: Box<Self>) -> anyhow::Result<()> {
            let _ = self.outcome.send((true, false));
            Ok(())
        }
        async fn reject(self: Box<Self>, requeue: bool) -> anyhow::Result<()> {
            let _ = self.outcome.send((false, requeue));
            Ok(())
        }
    }

    struct NoopBus;

    #[async_trait]
    impl TaskBus for NoopBus {
        async fn publish(&self, _task: &Task) -> anyhow::Result<()> {
            Ok(())
        }
        async fn next_delivery(&self) -> anyhow::Result<Option<Box<dyn Delivery>>> {
            Ok(None)
        }
    }

    struct FailingExecutor;

    #[async_trait]
    impl TaskExecutor for FailingExecutor {
        async fn run(&self, _task: &Task) -> anyhow::Result<()> {
            anyhow::bail!("transient executor fault")
        }
    }

    struct OkExecutor;

    #[async_trait]
    impl TaskExecutor for OkExecutor {
        async fn run(&self, _task: &Task) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn runtime_with(
        store: Arc<dyn TaskStore>,
        executor: Arc<dyn TaskExecutor>,
    ) -> WorkerRuntime {
        WorkerRuntime::new(
            "w1".into(),
            "w1".into(),
            2.0,
            4096.0,
            Duration::from_secs(10),
            Duration::from_secs(30),
            store,
            Arc::new(FakeRegistry),
            Arc::new(NoopBus),
            executor,
            Arc::new(GaugeRegistry::new("w1").unwrap()),
        )
    }

    #[tokio::test]
    async fn poison_payload_is_rejected_without_requeue_and_no_store_write() {
        let store = Arc::new(FakeStore {
            calls: StdMutex::new(vec![]),
        });
        let runtime = runtime_with(store.clone(), Arc::new(OkExecutor));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let delivery: Box<dyn Delivery> = Box::new(FakeDelivery {
            payload: b"not json".to_vec(),
            outcome: tx,
        });

        runtime.handle_delivery(delivery).await;

        let (acked, requeued) = rx.recv().await.unwrap();
        assert!(!acked);
        assert!(!requeued);
        assert!(store.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn successful_execution_runs_then_completes_then_acks() {
        let store = Arc::new(FakeStore {
            calls: StdMutex::new(vec![]),
        });
        let runtime = runtime_with(store.clone(), Arc::new(OkExecutor));
        let task = Task::new("t1", "probe", "alpine", vec![], 5, 0.1, 64.0);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let delivery: Box<dyn Delivery> = Box::new(FakeDelivery {
            payload: serde_json::to_vec(&task).unwrap(),
            outcome: tx,
        });

        runtime.handle_delivery(delivery).await;

        let (acked, _) = rx.recv().await.unwrap();
        assert!(acked);
        let calls = store.calls.lock().unwrap();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0], ("t1".to_string(), TaskStatus::Running, "w1".to_string()));
        assert_eq!(calls[1], ("t1".to_string(), TaskStatus::Completed, "w1".to_string()));
    }

    #[tokio::test]
    async fn failing_execution_leaves_task_failed_and_requeues() {
        let store = Arc::new(FakeStore {
            calls: StdMutex::new(vec![]),
        });
        let runtime = runtime_with(store.clone(), Arc::new(FailingExecutor));
        let task = Task::new("t2", "probe", "alpine", vec![], 5, 0.1, 64.0);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let delivery: Box<dyn Delivery> = Box::new(FakeDelivery {
            payload: serde_json::to_vec(&task).unwrap(),
            outcome: tx,
        });

        runtime.handle_delivery(delivery).await;

        let (acked, requeued) = rx.recv().await.unwrap();
        assert!(!acked);
        assert!(requeued);
        let calls = store.calls.lock().unwrap();
        assert_eq!(calls[1].1, TaskStatus::Failed);
    }
}
