//! Error taxonomy for the adapter layer. Call sites in `scheduler`/`worker`
//! consume these through `anyhow::Result` and add context the way the
//! binaries' `main.rs` already does for fatal startup failures.

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("store error: {0}")]
    Store(String),

    #[error("registry error: {0}")]
    Registry(String),

    #[error("bus error: {0}")]
    Bus(String),

    #[error("metrics error: {0}")]
    Metrics(String),

    #[error("failed to decode message payload: {0}")]
    Decode(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl From<sqlx::Error> for CoreError {
    fn from(e: sqlx::Error) -> Self {
        CoreError::Store(e.to_string())
    }
}

impl From<redis::RedisError> for CoreError {
    fn from(e: redis::RedisError) -> Self {
        CoreError::Registry(e.to_string())
    }
}

impl From<lapin::Error> for CoreError {
    fn from(e: lapin::Error) -> Self {
        CoreError::Bus(e.to_string())
    }
}
