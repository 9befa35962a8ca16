//! Task execution. Container execution is out of scope — the executor is
//! an opaque `run(task)` effect; the reference implementation sleeps for a
//! fixed duration and succeeds.

use async_trait::async_trait;
use scheduler_core::model::Task;
use tokio::time::Duration;

#[async_trait]
pub trait TaskExecutor: Send + Sync {
    async fn run(&self, task: &Task) -> anyhow::Result<()>;
}

pub struct StubExecutor {
    duration: Duration,
}

impl StubExecutor {
    pub fn new(duration: Duration) -> Self {
        Self { duration }
    }
}

impl Default for StubExecutor {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

#[async_trait]
impl TaskExecutor for StubExecutor {
    async fn run(&self, _task: &Task) -> anyhow::Result<()> {
        tokio::time::sleep(self.duration).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use scheduler_core::model::TaskStatus;

    #[tokio::test]
    async fn stub_executor_succeeds_after_sleeping() {
        let executor = StubExecutor::new(Duration::from_millis(1));
        let task = Task {
            id: "t1".into(),
            name: "probe".into(),
            image: "alpine".into(),
            command: vec![],
            priority: 5,
            required_cpu: 0.1,
            required_memory: 64.0,
            status: TaskStatus::Running,
            assigned_node_id: Some("w1".into()),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert!(executor.run(&task).await.is_ok());
    }
}
