//! Startup retry and shutdown-signal helpers shared by the scheduler and
//! worker `main.rs`. Both binaries dial the same kinds of dependencies
//! (store, registry, bus) on boot and tear down on the same signal set, so
//! the logic lives here once rather than being copied twice the way the
//! monitoring agent/server each inlined their own signal handling.

use std::future::Future;
use std::time::Duration;

use tracing::{error, info, warn};

/// Linear backoff: attempt 1 waits `step`, attempt 2 waits `2*step`, etc.,
/// up to `max_attempts`. Returns the first `Ok`, or the last error once the
/// budget is exhausted.
pub async fn retry_with_backoff<T, E, F, Fut>(
    what: &str,
    max_attempts: u32,
    step: Duration,
    mut f: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 1;
    loop {
        match f().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt >= max_attempts => {
                error!(target: "supervisor", attempts = attempt, "{what}: giving up: {e}");
                return Err(e);
            }
            Err(e) => {
                warn!(target: "supervisor", attempt, "{what}: {e}, retrying in {:?}", step * attempt);
                tokio::time::sleep(step * attempt).await;
                attempt += 1;
            }
        }
    }
}

/// Resolves once SIGTERM or SIGINT arrives (Unix), or Ctrl+C (any platform,
/// and the Unix fallback if signal registration itself fails).
pub async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let sigterm = signal(SignalKind::terminate());
        let sigint = signal(SignalKind::interrupt());

        match (sigterm, sigint) {
            (Ok(mut sigterm), Ok(mut sigint)) => {
                tokio::select! {
                    _ = sigterm.recv() => info!("received SIGTERM"),
                    _ = sigint.recv() => info!("received SIGINT"),
                }
            }
            (Err(e), _) | (_, Err(e)) => {
                error!("failed to register signal handlers: {e}");
                error!("falling back to Ctrl+C only");
                if let Err(e) = tokio::signal::ctrl_c().await {
                    error!("failed to wait for Ctrl+C: {e}");
                } else {
                    info!("received Ctrl+C");
                }
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to receive Ctrl+C signal: {e}");
        } else {
            info!("received Ctrl+C");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn retry_with_backoff_succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let result: Result<&str, &str> = retry_with_backoff(
            "connect",
            5,
            Duration::from_millis(1),
            || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err("not yet")
                    } else {
                        Ok("connected")
                    }
                }
            },
        )
        .await;
        assert_eq!(result, Ok("connected"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retry_with_backoff_gives_up_after_budget() {
        let result: Result<(), &str> =
            retry_with_backoff("connect", 2, Duration::from_millis(1), || async {
                Err("down")
            })
            .await;
        assert_eq!(result, Err("down"));
    }
}
