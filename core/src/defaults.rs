//! Default values for configuration parameters.
//!
//! This module centralizes all default value functions used by the
//! configuration structures. These functions are used by serde when
//! deserializing configuration files that don't specify certain optional
//! fields.

// Store (Postgres) defaults

pub fn default_store_host() -> String {
    "localhost".to_string()
}

pub fn default_store_port() -> u16 {
    5432
}

pub fn default_store_user() -> String {
    "scheduler".to_string()
}

pub fn default_store_password() -> String {
    String::new()
}

pub fn default_store_name() -> String {
    "scheduler".to_string()
}

// Registry (Redis) defaults

pub fn default_registry_addr() -> String {
    "localhost:6379".to_string()
}

// Bus (AMQP) defaults

pub fn default_bus_user() -> String {
    "guest".to_string()
}

pub fn default_bus_password() -> String {
    "guest".to_string()
}

pub fn default_bus_host() -> String {
    "localhost".to_string()
}

pub fn default_bus_port() -> u16 {
    5672
}

pub fn default_bus_vhost() -> String {
    "/".to_string()
}

// Metrics backend defaults

pub fn default_metrics_url() -> String {
    "http://localhost:9090".to_string()
}

pub fn default_metrics_port() -> u16 {
    2112
}

// Scheduler timing defaults

/// `T_SCHED`: placement engine tick interval.
pub fn default_sched_interval_secs() -> u64 {
    10
}

// Worker timing defaults

/// `T_HB`: heartbeat publish interval.
pub fn default_heartbeat_interval_secs() -> u64 {
    10
}

/// `H_TTL`: how long a heartbeat remains valid in the registry.
pub fn default_heartbeat_ttl_secs() -> u64 {
    30
}

/// Declared capacity a worker advertises when not overridden.
pub fn default_total_cpu() -> f64 {
    2.0
}

pub fn default_total_memory() -> f64 {
    4096.0
}

// Logger defaults

pub fn default_log_level() -> String {
    "info".to_string()
}

pub fn default_log_encoding() -> String {
    "json".to_string()
}
