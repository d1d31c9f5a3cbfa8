//! Bridge from async callers to the synchronous repositories.

use tracing::error;

use pulse_core::error::{PulseError, Result};

/// Run a storage operation on tokio's blocking thread pool.
///
/// Repository calls take the connection lock and perform disk I/O, so async
/// code should route them through here instead of calling them inline.
pub async fn run_blocking<F, T>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(result) => result,
        Err(e) => {
            error!(error = %e, "Blocking storage task failed");
            Err(PulseError::Task(e.to_string()))
        }
    }
}
