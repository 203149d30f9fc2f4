//! Optional per-call deadlines.

use std::future::Future;
use std::time::Duration;

use strata_core::StrataError;

/// Await `fut`, failing with [`StrataError::Timeout`] if it takes longer
/// than `deadline`. `None` waits indefinitely.
///
/// # Errors
///
/// Returns [`StrataError::Timeout`] naming `operation`, or whatever error
/// the future itself produced.
pub async fn with_deadline<T, F>(
    operation: &str,
    deadline: Option<Duration>,
    fut: F,
) -> Result<T, StrataError>
where
    F: Future<Output = Result<T, StrataError>>,
{
    match deadline {
        None => fut.await,
        Some(after) => tokio::time::timeout(after, fut)
            .await
            .map_err(|_| StrataError::Timeout {
                operation: operation.to_string(),
                after,
            })?,
    }
}
