use std::future::Future;
use tokio_util::sync::CancellationToken;

use crate::error::TransferResult;

/// Drive `fut` until it finishes or `cancel` fires, whichever comes first.
///
/// Cancellation wins ties, and `fut` is dropped (releasing any in-flight
/// request) before the abort error is returned.
pub(crate) async fn until_cancelled<T, F>(
    cancel: &CancellationToken,
    aborted: impl FnOnce() -> crate::TransferError,
    fut: F,
) -> TransferResult<T>
where
    F: Future<Output = TransferResult<T>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(aborted()),
        result = fut => result,
    }
}
