//! Domain model, port traits, and adapters shared by the scheduler and
//! worker binaries: everything needed to construct a `TaskStore`,
//! `NodeRegistry`, `MetricsSource`, or `TaskBus` and drive the placement
//! and worker-runtime logic against them.

pub mod adapters;
pub mod clock;
pub mod config;
pub mod defaults;
pub mod errors;
pub mod model;
pub mod ports;
pub mod supervisor;

pub use clock::{Clock, SystemClock};
pub use config::{SchedulerConfig, WorkerConfig};
pub use errors::CoreError;
pub use model::{Node, NodeMetrics, NodeStatus, Task, TaskStatus};
pub use ports::{Delivery, MetricsSource, NodeRegistry, TaskBus, TaskStore};

/// Result type alias used throughout the core crate and its adapters.
pub type Result<T> = anyhow::Result<T>;
