//! Time as an explicit dependency rather than an ambient call to
//! `Utc::now()`, so TTL expiry and tick-coalescing behaviour can be
//! asserted deterministically in tests instead of slept through.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock tests can advance by hand. Starts at the instant it was built
/// unless [`FixedClock::at`] is used.
#[derive(Clone)]
pub struct FixedClock {
    inner: Arc<Mutex<DateTime<Utc>>>,
}

impl FixedClock {
    pub fn at(instant: DateTime<Utc>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(instant)),
        }
    }

    pub fn advance(&self, delta: chrono::Duration) {
        let mut guard = self.inner.lock().expect("clock mutex poisoned");
        *guard += delta;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.inner.lock().expect("clock mutex poisoned")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Node, NodeStatus};
    use crate::ports::NodeRegistry;
    use std::collections::HashMap;

    #[test]
    fn fixed_clock_advances_by_requested_delta() {
        let start = "2026-01-01T00:00:00Z".parse::<DateTime<Utc>>().unwrap();
        let clock = FixedClock::at(start);
        clock.advance(chrono::Duration::seconds(30));
        assert_eq!(clock.now(), start + chrono::Duration::seconds(30));
    }

    /// In-memory `NodeRegistry` double driven by an injected `Clock`
    /// instead of wall-clock time, so TTL expiry can be asserted without
    /// sleeping.
    struct FakeRegistry<C: Clock> {
        clock: C,
        entries: Mutex<HashMap<String, (Node, DateTime<Utc>, std::time::Duration)>>,
    }

    impl<C: Clock> FakeRegistry<C> {
        fn new(clock: C) -> Self {
            Self {
                clock,
                entries: Mutex::new(HashMap::new()),
            }
        }
    }

    #[async_trait::async_trait]
    impl<C: Clock> NodeRegistry for FakeRegistry<C> {
        async fn register(&self, node: &Node, ttl: std::time::Duration) -> anyhow::Result<()> {
            self.entries
                .lock()
                .unwrap()
                .insert(node.id.clone(), (node.clone(), self.clock.now(), ttl));
            Ok(())
        }

        async fn list_active(&self) -> anyhow::Result<Vec<Node>> {
            let now = self.clock.now();
            let entries = self.entries.lock().unwrap();
            Ok(entries
                .values()
                .filter(|(_, written_at, ttl)| {
                    let ttl = chrono::Duration::from_std(*ttl).unwrap_or(chrono::Duration::zero());
                    now - *written_at < ttl
                })
                .map(|(node, _, _)| node.clone())
                .collect())
        }
    }

    fn test_node(id: &str) -> Node {
        Node {
            id: id.to_string(),
            hostname: id.to_string(),
            total_cpu: 2.0,
            total_memory: 4096.0,
            used_cpu: 0.0,
            used_memory: 0.0,
            status: NodeStatus::Active,
            last_heartbeat: Utc::now(),
        }
    }

    #[tokio::test]
    async fn node_absent_from_list_active_no_later_than_ttl_after_last_write() {
        let start = "2026-01-01T00:00:00Z".parse::<DateTime<Utc>>().unwrap();
        let clock = FixedClock::at(start);
        let registry = FakeRegistry::new(clock.clone());
        let ttl = std::time::Duration::from_secs(30);

        registry.register(&test_node("w1"), ttl).await.unwrap();
        assert_eq!(registry.list_active().await.unwrap().len(), 1);

        clock.advance(chrono::Duration::seconds(29));
        assert_eq!(registry.list_active().await.unwrap().len(), 1);

        clock.advance(chrono::Duration::seconds(2));
        assert!(registry.list_active().await.unwrap().is_empty());
    }
}
