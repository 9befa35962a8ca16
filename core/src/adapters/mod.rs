//! Concrete implementations of the port traits in [`crate::ports`]. Each
//! module here owns exactly one external dependency; nothing outside
//! `adapters` should import `sqlx`, `redis`, `lapin`, or
//! `prometheus_http_query` directly.

pub mod amqp_bus;
pub mod postgres_store;
pub mod prometheus_metrics;
pub mod redis_registry;

pub use amqp_bus::AmqpTaskBus;
pub use postgres_store::PgTaskStore;
pub use prometheus_metrics::PrometheusMetricsSource;
pub use redis_registry::RedisNodeRegistry;
