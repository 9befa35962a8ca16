//! Serves the scrape endpoint the scheduler's `MetricsSource` reads from.
//! Exports exactly the two gauge families the contract names, each tagged
//! with this worker's node id as the `instance` label.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use prometheus::{Encoder, GaugeVec, Opts, Registry, TextEncoder};
use tracing::info;

pub struct GaugeRegistry {
    registry: Registry,
    cpu_gauge: GaugeVec,
    memory_gauge: GaugeVec,
    node_id: String,
}

impl GaugeRegistry {
    pub fn new(node_id: &str) -> anyhow::Result<Self> {
        let registry = Registry::new();

        let cpu_gauge = GaugeVec::new(
            Opts::new("worker_cpu_usage_percent", "Current CPU usage percentage"),
            &["instance"],
        )?;
        let memory_gauge = GaugeVec::new(
            Opts::new("worker_memory_usage_bytes", "Current memory usage in bytes"),
            &["instance"],
        )?;

        registry.register(Box::new(cpu_gauge.clone()))?;
        registry.register(Box::new(memory_gauge.clone()))?;

        Ok(Self {
            registry,
            cpu_gauge,
            memory_gauge,
            node_id: node_id.to_string(),
        })
    }

    pub fn set_usage(&self, cpu_usage_percent: f64, memory_usage_bytes: f64) {
        self.cpu_gauge
            .with_label_values(&[&self.node_id])
            .set(cpu_usage_percent);
        self.memory_gauge
            .with_label_values(&[&self.node_id])
            .set(memory_usage_bytes);
    }

    fn encode(&self) -> anyhow::Result<Vec<u8>> {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&metric_families, &mut buffer)?;
        Ok(buffer)
    }
}

async fn metrics_handler(State(gauges): State<Arc<GaugeRegistry>>) -> impl IntoResponse {
    match gauges.encode() {
        Ok(body) => (
            axum::http::StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4")],
            body,
        ),
        Err(e) => (
            axum::http::StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain; version=0.0.4")],
            e.to_string().into_bytes(),
        ),
    }
}

pub async fn serve(gauges: Arc<GaugeRegistry>, port: u16) -> anyhow::Result<()> {
    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(gauges);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(port, "metrics exporter listening");
    axum::serve(listener, app).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encoded_output_contains_both_gauge_families() {
        let gauges = GaugeRegistry::new("w1").unwrap();
        gauges.set_usage(12.5, 2048.0);
        let body = String::from_utf8(gauges.encode().unwrap()).unwrap();
        assert!(body.contains("worker_cpu_usage_percent"));
        assert!(body.contains("worker_memory_usage_bytes"));
        assert!(body.contains("instance=\"w1\""));
    }
}
