//! Per-attempt deadline enforcement merged with external cancellation.
//!
//! One transport attempt races against two abort sources: the attempt
//! timeout and the caller's cancellation token. Whichever fires first
//! classifies the abort; the timer future is dropped on every exit path, so
//! no scheduled work outlives the attempt.

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::error::{ExtractError, ExtractResult};

/// Run `call` bounded by `limit` and by the optional external token.
///
/// Timer expiry surfaces [`ExtractError::Timeout`]; the external token
/// surfaces [`ExtractError::Cancelled`]; any failure of `call` itself passes
/// through unchanged.
pub async fn run_with_deadline<T, F>(
    limit: Duration,
    cancel: Option<&CancellationToken>,
    call: F,
) -> ExtractResult<T>
where
    F: Future<Output = ExtractResult<T>>,
{
    let never = CancellationToken::new();
    let token = cancel.unwrap_or(&never);
    let timer = sleep(limit);
    tokio::pin!(timer);

    tokio::select! {
        biased;
        result = call => result,
        () = token.cancelled() => Err(ExtractError::Cancelled),
        () = &mut timer => Err(ExtractError::Timeout { limit }),
    }
}
