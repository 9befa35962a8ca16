//! `MetricsSource` over a Prometheus-compatible HTTP API via
//! `prometheus-http-query`.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use prometheus_http_query::Client;
use tracing::warn;

use crate::errors::CoreError;
use crate::model::NodeMetrics;
use crate::ports::MetricsSource;

/// Returned when a query fails, times out, or yields no samples — keeps
/// placement from stalling on a flaky metrics backend.
const FALLBACK_CPU_PERCENT: f64 = 5.0;
const FALLBACK_MEMORY_MB: f64 = 1024.0;

pub struct PrometheusMetricsSource {
    client: Client,
}

impl PrometheusMetricsSource {
    pub fn new(base_url: &str) -> anyhow::Result<Self> {
        let client = Client::try_from(base_url)
            .map_err(|e| CoreError::Metrics(e.to_string()))?;
        Ok(Self { client })
    }

    fn fallback(node_id: &str, reason: &str) -> NodeMetrics {
        warn!(node_id, reason, "falling back to conservative metrics estimate");
        NodeMetrics {
            cpu_usage_percent: FALLBACK_CPU_PERCENT,
            memory_usage_mb: FALLBACK_MEMORY_MB,
        }
    }

    async fn instant_scalar(&self, query: &str, timeout: Duration) -> anyhow::Result<f64> {
        let response = tokio::time::timeout(timeout, self.client.query(query).get())
            .await
            .map_err(|_| CoreError::Metrics(format!("query timed out: {query}")))?
            .map_err(|e| CoreError::Metrics(format!("query {query} failed: {e}")))?;
        let vector = response
            .data()
            .clone()
            .into_vector()
            .map_err(|_| CoreError::Metrics(format!("unexpected result type for query: {query}")))?;
        let sample = vector
            .first()
            .ok_or_else(|| CoreError::Metrics(format!("empty result vector for query: {query}")))?;
        Ok(sample.sample().value())
    }
}

#[async_trait]
impl MetricsSource for PrometheusMetricsSource {
    async fn node_metrics(&self, node_id: &str, timeout: Duration) -> NodeMetrics {
        let cpu_query = format!("worker_cpu_usage_percent{{instance=\"{node_id}\"}}");
        let mem_query = format!("worker_memory_usage_bytes{{instance=\"{node_id}\"}}");

        let cpu = match self.instant_scalar(&cpu_query, timeout).await {
            Ok(v) => v,
            Err(e) => return Self::fallback(node_id, &e.to_string()),
        };
        let mem_bytes = match self.instant_scalar(&mem_query, timeout).await {
            Ok(v) => v,
            Err(e) => return Self::fallback(node_id, &e.to_string()),
        };

        NodeMetrics {
            cpu_usage_percent: cpu,
            memory_usage_mb: mem_bytes / 1024.0 / 1024.0,
        }
    }

    async fn all_nodes_metrics(&self, timeout: Duration) -> HashMap<String, NodeMetrics> {
        let mut by_node: HashMap<String, (Option<f64>, Option<f64>)> = HashMap::new();

        let cpu_result = tokio::time::timeout(timeout, self.client.query("worker_cpu_usage_percent").get()).await;
        if let Ok(Ok(response)) = cpu_result {
            if let Ok(vector) = response.data().clone().into_vector() {
                for sample in vector {
                    if let Some(instance) = sample.metric().get("instance") {
                        by_node.entry(instance.clone()).or_default().0 = Some(sample.sample().value());
                    }
                }
            }
        }

        let mem_result = tokio::time::timeout(timeout, self.client.query("worker_memory_usage_bytes").get()).await;
        if let Ok(Ok(response)) = mem_result {
            if let Ok(vector) = response.data().clone().into_vector() {
                for sample in vector {
                    if let Some(instance) = sample.metric().get("instance") {
                        by_node.entry(instance.clone()).or_default().1 = Some(sample.sample().value());
                    }
                }
            }
        }

        by_node
            .into_iter()
            .filter_map(|(node_id, (cpu, mem))| match (cpu, mem) {
                (Some(cpu), Some(mem_bytes)) => Some((
                    node_id,
                    NodeMetrics {
                        cpu_usage_percent: cpu,
                        memory_usage_mb: mem_bytes / 1024.0 / 1024.0,
                    },
                )),
                _ => None,
            })
            .collect()
    }
}
