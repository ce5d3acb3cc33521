/// Time budgets for upstream calls
///
/// Each operation has a timeout budget declared in the catalog. The upstream
/// call is raced against both that budget and the request's cancellation
/// token; whichever finishes first decides the outcome.
///
/// # Default Timeouts
///
/// - Most operations: 30 seconds
/// - Signature verification: 60 seconds
/// - Minimum budget: 1 second
/// - Maximum budget: 120 seconds
///
/// # Example
///
/// ```no_run
/// use docgate_pipeline::adapters::OperationError;
/// use docgate_pipeline::timeout::{run_with_budget, DEFAULT_TIMEOUT};
/// use tokio_util::sync::CancellationToken;
///
/// # async fn example() {
/// let cancel = CancellationToken::new();
/// let result: Result<u32, OperationError> =
///     run_with_budget(async { Ok(42) }, DEFAULT_TIMEOUT, &cancel).await;
/// assert_eq!(result, Ok(42));
/// # }
/// ```

use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::adapters::OperationError;

/// Default budget (30 seconds)
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Budget for signature verification (60 seconds)
pub const SIGNATURE_TIMEOUT: Duration = Duration::from_secs(60);

/// Minimum allowed budget (1 second)
pub const MIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Maximum allowed budget (120 seconds)
pub const MAX_TIMEOUT: Duration = Duration::from_secs(120);

/// Clamps a budget to the allowed range
pub fn clamp_timeout(timeout: Duration) -> Duration {
    timeout.clamp(MIN_TIMEOUT, MAX_TIMEOUT)
}

/// Runs `call` under a time budget and a cancellation token
///
/// Cancellation wins ties, so a request that is already cancelled never
/// starts its upstream call.
///
/// # Errors
///
/// - `OperationError::Cancelled` if the token fires first
/// - `OperationError::Timeout` if the budget runs out first
/// - whatever `call` itself returns otherwise
pub async fn run_with_budget<T, F>(call: F, budget: Duration, cancel: &CancellationToken) -> Result<T, OperationError>
where
    F: Future<Output = Result<T, OperationError>>,
{
    let budget = clamp_timeout(budget);

    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(OperationError::Cancelled),
        result = tokio::time::timeout(budget, call) => match result {
            Ok(inner) => inner,
            Err(_) => Err(OperationError::Timeout(budget)),
        },
    }
}
