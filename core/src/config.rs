//! Configuration structs and the override-and-persist loading pattern:
//! defaults baked into the struct via `#[serde(default = "...")]`, a TOML
//! file layered on top, then individual environment variables layered on
//! top of that — the same precedence the monitoring agent/server used,
//! generalised to the scheduler/worker split and the new `store`/
//! `registry`/`bus`/`metrics`/`sched`/`heartbeat`/`log` key namespaces.

use std::env;

use serde::{Deserialize, Serialize};

use crate::defaults::*;
use crate::errors::CoreError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_host")]
    pub host: String,
    #[serde(default = "default_store_port")]
    pub port: u16,
    #[serde(default = "default_store_user")]
    pub user: String,
    #[serde(default = "default_store_password")]
    pub password: String,
    #[serde(default = "default_store_name")]
    pub name: String,
}

impl StoreConfig {
    pub fn connection_url(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.user, self.password, self.host, self.port, self.name
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    #[serde(default = "default_registry_addr")]
    pub addr: String,
    #[serde(default)]
    pub password: String,
}

impl RegistryConfig {
    pub fn connection_url(&self) -> String {
        if self.password.is_empty() {
            format!("redis://{}", self.addr)
        } else {
            format!("redis://:{}@{}", self.password, self.addr)
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    #[serde(default = "default_bus_user")]
    pub user: String,
    #[serde(default = "default_bus_password")]
    pub password: String,
    #[serde(default = "default_bus_host")]
    pub host: String,
    #[serde(default = "default_bus_port")]
    pub port: u16,
    #[serde(default = "default_bus_vhost")]
    pub vhost: String,
}

impl BusConfig {
    pub fn connection_url(&self) -> String {
        format!(
            "amqp://{}:{}@{}:{}/{}",
            self.user, self.password, self.host, self.port, self.vhost
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_encoding")]
    pub encoding: String,
}

/// Loaded by the scheduler binary. `node.id`/`heartbeat.*` are not
/// recognised here — they're worker-only keys.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub bus: BusConfig,
    #[serde(default = "default_metrics_url")]
    pub metrics_url: String,
    #[serde(default = "default_sched_interval_secs")]
    pub sched_interval_secs: u64,
    #[serde(default)]
    pub log: LogConfig,
}

/// Loaded by the worker binary. `metrics.url`/`sched.interval` are not
/// recognised here — they're scheduler-only keys.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Left blank to let the worker synthesise its own identity — see
    /// [`WorkerConfig::load`].
    #[serde(default)]
    pub node_id: String,
    #[serde(default = "default_total_cpu")]
    pub total_cpu: f64,
    #[serde(default = "default_total_memory")]
    pub total_memory: f64,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub bus: BusConfig,
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,
    #[serde(default = "default_heartbeat_ttl_secs")]
    pub heartbeat_ttl_secs: u64,
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
    #[serde(default)]
    pub log: LogConfig,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            host: default_store_host(),
            port: default_store_port(),
            user: default_store_user(),
            password: default_store_password(),
            name: default_store_name(),
        }
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            addr: default_registry_addr(),
            password: String::new(),
        }
    }
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            user: default_bus_user(),
            password: default_bus_password(),
            host: default_bus_host(),
            port: default_bus_port(),
            vhost: default_bus_vhost(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            encoding: default_log_encoding(),
        }
    }
}

impl SchedulerConfig {
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| CoreError::Config(format!("reading {}: {e}", path.display())))?;
        let mut cfg: SchedulerConfig = toml::from_str(&raw)
            .map_err(|e| CoreError::Config(format!("parsing {}: {e}", path.display())))?;
        cfg.apply_env_overrides();
        Ok(cfg)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = env::var("STORE_HOST") {
            self.store.host = v;
        }
        if let Ok(v) = env::var("STORE_PORT") {
            if let Ok(p) = v.parse() {
                self.store.port = p;
            }
        }
        if let Ok(v) = env::var("STORE_USER") {
            self.store.user = v;
        }
        if let Ok(v) = env::var("STORE_PASSWORD") {
            self.store.password = v;
        }
        if let Ok(v) = env::var("STORE_NAME") {
            self.store.name = v;
        }
        if let Ok(v) = env::var("REGISTRY_ADDR") {
            self.registry.addr = v;
        }
        if let Ok(v) = env::var("REGISTRY_PASSWORD") {
            self.registry.password = v;
        }
        if let Ok(v) = env::var("BUS_USER") {
            self.bus.user = v;
        }
        if let Ok(v) = env::var("BUS_PASSWORD") {
            self.bus.password = v;
        }
        if let Ok(v) = env::var("BUS_HOST") {
            self.bus.host = v;
        }
        if let Ok(v) = env::var("BUS_PORT") {
            if let Ok(p) = v.parse() {
                self.bus.port = p;
            }
        }
        if let Ok(v) = env::var("BUS_VHOST") {
            self.bus.vhost = v;
        }
        if let Ok(v) = env::var("METRICS_URL") {
            self.metrics_url = v;
        }
        if let Ok(v) = env::var("SCHED_INTERVAL") {
            if let Ok(secs) = v.parse() {
                self.sched_interval_secs = secs;
            }
        }
        if let Ok(v) = env::var("LOG_LEVEL") {
            self.log.level = v;
        }
        if let Ok(v) = env::var("LOG_ENCODING") {
            self.log.encoding = v;
        }
    }
}

impl WorkerConfig {
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| CoreError::Config(format!("reading {}: {e}", path.display())))?;
        let mut cfg: WorkerConfig = toml::from_str(&raw)
            .map_err(|e| CoreError::Config(format!("parsing {}: {e}", path.display())))?;
        cfg.apply_env_overrides();
        if cfg.node_id.trim().is_empty() {
            cfg.node_id = synthesize_node_id();
        }
        Ok(cfg)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = env::var("NODE_ID") {
            self.node_id = v;
        }
        if let Ok(v) = env::var("STORE_HOST") {
            self.store.host = v;
        }
        if let Ok(v) = env::var("STORE_PORT") {
            if let Ok(p) = v.parse() {
                self.store.port = p;
            }
        }
        if let Ok(v) = env::var("STORE_USER") {
            self.store.user = v;
        }
        if let Ok(v) = env::var("STORE_PASSWORD") {
            self.store.password = v;
        }
        if let Ok(v) = env::var("STORE_NAME") {
            self.store.name = v;
        }
        if let Ok(v) = env::var("REGISTRY_ADDR") {
            self.registry.addr = v;
        }
        if let Ok(v) = env::var("REGISTRY_PASSWORD") {
            self.registry.password = v;
        }
        if let Ok(v) = env::var("BUS_USER") {
            self.bus.user = v;
        }
        if let Ok(v) = env::var("BUS_PASSWORD") {
            self.bus.password = v;
        }
        if let Ok(v) = env::var("BUS_HOST") {
            self.bus.host = v;
        }
        if let Ok(v) = env::var("BUS_PORT") {
            if let Ok(p) = v.parse() {
                self.bus.port = p;
            }
        }
        if let Ok(v) = env::var("BUS_VHOST") {
            self.bus.vhost = v;
        }
        if let Ok(v) = env::var("HEARTBEAT_INTERVAL") {
            if let Ok(secs) = v.parse() {
                self.heartbeat_interval_secs = secs;
            }
        }
        if let Ok(v) = env::var("HEARTBEAT_TTL") {
            if let Ok(secs) = v.parse() {
                self.heartbeat_ttl_secs = secs;
            }
        }
        if let Ok(v) = env::var("METRICS_PORT") {
            if let Ok(p) = v.parse() {
                self.metrics_port = p;
            }
        }
        if let Ok(v) = env::var("LOG_LEVEL") {
            self.log.level = v;
        }
        if let Ok(v) = env::var("LOG_ENCODING") {
            self.log.encoding = v;
        }
    }
}

/// A worker with no configured or environment-supplied identity names
/// itself: `fog-node-<unix timestamp>`. Not guaranteed globally unique
/// across a restart within the same second, but collisions are harmless —
/// the registry key is last-writer-wins (§3) and a synthesised id is only
/// ever used when the operator didn't supply a stable one.
fn synthesize_node_id() -> String {
    let unix_secs = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();
    format!("fog-node-{unix_secs}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scheduler_config_parses_minimal_toml_with_defaults() {
        let cfg: SchedulerConfig = toml::from_str("").unwrap();
        assert_eq!(cfg.sched_interval_secs, default_sched_interval_secs());
        assert_eq!(cfg.store.port, default_store_port());
    }

    #[test]
    fn worker_config_synthesizes_node_id_when_unconfigured() {
        let toml_str = "node_id = \"\"\n";
        let tmp = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(tmp.path(), toml_str).unwrap();
        let cfg = WorkerConfig::load(tmp.path()).unwrap();
        assert!(cfg.node_id.starts_with("fog-node-"));
    }

    #[test]
    fn worker_config_synthesizes_node_id_when_field_absent() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(tmp.path(), "").unwrap();
        let cfg = WorkerConfig::load(tmp.path()).unwrap();
        assert!(cfg.node_id.starts_with("fog-node-"));
    }

    #[test]
    fn worker_config_loads_declared_capacity() {
        let toml_str = "node_id = \"w1\"\ntotal_cpu = 4.0\ntotal_memory = 8192.0\n";
        let tmp = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(tmp.path(), toml_str).unwrap();
        let cfg = WorkerConfig::load(tmp.path()).unwrap();
        assert_eq!(cfg.node_id, "w1");
        assert_eq!(cfg.total_cpu, 4.0);
    }
}
