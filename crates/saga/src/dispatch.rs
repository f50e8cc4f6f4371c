//! Publish dispatch with a deadline and a cancellation path.

use std::future::Future;
use std::time::Duration;

use event_bus::EventBusError;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Why a publish did not complete.
#[derive(Debug, Error)]
pub enum PublishFailure {
    /// The broker or its circuit breaker rejected the event.
    #[error(transparent)]
    Bus(#[from] EventBusError),

    /// No answer from the broker before the deadline.
    #[error("publish timed out after {0:?}")]
    Timeout(Duration),

    /// The caller went away while the publish was in flight.
    #[error("publish cancelled")]
    Cancelled,

    /// The publish task panicked or was aborted.
    #[error("publish task failed: {0}")]
    Aborted(String),
}

/// Runs `publish` on its own task and waits for it.
///
/// The task is aborted when `timeout` elapses or `cancel` fires; either way
/// the publish counts as failed.
pub async fn dispatch<F>(
    publish: F,
    timeout: Duration,
    cancel: CancellationToken,
) -> Result<(), PublishFailure>
where
    F: Future<Output = event_bus::Result<()>> + Send + 'static,
{
    let handle = tokio::spawn(publish);
    let abort = handle.abort_handle();

    tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            abort.abort();
            Err(PublishFailure::Cancelled)
        }
        joined = tokio::time::timeout(timeout, handle) => match joined {
            Err(_) => {
                abort.abort();
                Err(PublishFailure::Timeout(timeout))
            }
            Ok(Err(join_err)) => Err(PublishFailure::Aborted(join_err.to_string())),
            Ok(Ok(result)) => result.map_err(PublishFailure::from),
        },
    }
}
