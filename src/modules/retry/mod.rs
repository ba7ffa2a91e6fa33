//! Retry state machine over one logical extraction.
//!
//! One attempt per loop turn, terminal on success, on a non-retryable
//! failure, or once retries are exhausted. Retryability is a closed typed
//! classification decided here from the failure kind, never from message
//! text.

use std::future::Future;
use std::time::Duration;

use bytes::Bytes;
use http::StatusCode;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::error::{ExtractError, ExtractResult};
use crate::modules::events::{EventBus, EventEnvelope, EventType};

/// Exponential backoff policy for rate-limited and transient failures.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the initial attempt; `max_retries + 1` attempts total.
    pub max_retries: u32,
    pub backoff_factor: u32,
    pub initial_delay: Duration,
    /// Whether an elapsed attempt deadline is re-attempted. Off by default:
    /// timeouts announce themselves on the event stream but surface to the
    /// caller, who owns the trade-off of paying the deadline again.
    pub retry_on_timeout: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_factor: 2,
            initial_delay: Duration::from_millis(1000),
            retry_on_timeout: false,
        }
    }
}

impl RetryPolicy {
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_backoff_factor(mut self, backoff_factor: u32) -> Self {
        self.backoff_factor = backoff_factor;
        self
    }

    pub fn with_initial_delay(mut self, initial_delay: Duration) -> Self {
        self.initial_delay = initial_delay;
        self
    }

    pub fn with_retry_on_timeout(mut self, retry_on_timeout: bool) -> Self {
        self.retry_on_timeout = retry_on_timeout;
        self
    }

    /// Delay before retry `attempt` (0-indexed):
    /// `initial_delay * backoff_factor^attempt`.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        self.initial_delay
            .saturating_mul(self.backoff_factor.saturating_pow(attempt))
    }

    fn is_retryable(&self, error: &ExtractError) -> bool {
        match error {
            ExtractError::Network(_) => true,
            ExtractError::Timeout { .. } => self.retry_on_timeout,
            _ => false,
        }
    }
}

/// Raw result of one transport attempt, before status mapping.
#[derive(Debug, Clone)]
pub(crate) struct AttemptOutcome {
    pub status: StatusCode,
    pub body: Bytes,
}

/// Drives attempts until a terminal outcome, emitting the retry lifecycle
/// events along the way.
pub(crate) struct RetryController<'a> {
    policy: &'a RetryPolicy,
    events: &'a EventBus,
    cancel: Option<&'a CancellationToken>,
}

impl<'a> RetryController<'a> {
    pub fn new(
        policy: &'a RetryPolicy,
        events: &'a EventBus,
        cancel: Option<&'a CancellationToken>,
    ) -> Self {
        Self {
            policy,
            events,
            cancel,
        }
    }

    /// Run `attempt_fn` until it produces a terminal outcome.
    ///
    /// A 429 response with retries left is backed off and re-attempted; a
    /// final 429 is handed back unchanged for terminal mapping. Retryable
    /// failures are backed off likewise; everything else propagates.
    pub async fn run<F, Fut>(&self, mut attempt_fn: F) -> ExtractResult<AttemptOutcome>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = ExtractResult<AttemptOutcome>>,
    {
        let mut attempt = 0u32;
        loop {
            if let Some(token) = self.cancel
                && token.is_cancelled()
            {
                return Err(ExtractError::Cancelled);
            }

            match attempt_fn(attempt).await {
                Ok(outcome)
                    if outcome.status == StatusCode::TOO_MANY_REQUESTS
                        && attempt < self.policy.max_retries =>
                {
                    self.events
                        .emit(
                            EventEnvelope::new(EventType::RateLimit).with_retries(attempt),
                        )
                        .await?;
                    self.schedule_retry(attempt).await?;
                    attempt += 1;
                }
                Ok(outcome) => return Ok(outcome),
                Err(error) => {
                    if matches!(error, ExtractError::Timeout { .. }) {
                        self.events
                            .emit(
                                EventEnvelope::new(EventType::Timeout)
                                    .with_error(error.to_string())
                                    .with_retries(attempt),
                            )
                            .await?;
                    }

                    if !self.policy.is_retryable(&error) || attempt >= self.policy.max_retries {
                        return Err(error);
                    }

                    self.events
                        .emit(
                            EventEnvelope::new(EventType::RequestError)
                                .with_error(error.to_string())
                                .with_retries(attempt),
                        )
                        .await?;
                    self.schedule_retry(attempt).await?;
                    attempt += 1;
                }
            }
        }
    }

    /// Emit `request:retry` and wait out the backoff, racing the caller's
    /// token so a cancelled request never re-attempts.
    async fn schedule_retry(&self, attempt: u32) -> ExtractResult<()> {
        self.events
            .emit(EventEnvelope::new(EventType::RequestRetry).with_retries(attempt + 1))
            .await?;

        let delay = self.policy.backoff_delay(attempt);
        log::info!("retry {} in {delay:?}", attempt + 1);

        match self.cancel {
            Some(token) => {
                tokio::select! {
                    () = token.cancelled() => Err(ExtractError::Cancelled),
                    () = sleep(delay) => Ok(()),
                }
            }
            None => {
                sleep(delay).await;
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy() -> RetryPolicy {
        RetryPolicy::default().with_initial_delay(Duration::from_millis(1))
    }

    fn outcome(status: StatusCode) -> AttemptOutcome {
        AttemptOutcome {
            status,
            body: Bytes::new(),
        }
    }

    #[test]
    fn backoff_grows_exponentially() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff_delay(0), Duration::from_millis(1000));
        assert_eq!(policy.backoff_delay(1), Duration::from_millis(2000));
        assert_eq!(policy.backoff_delay(2), Duration::from_millis(4000));
    }

    #[test]
    fn retryability_is_typed_not_textual() {
        let policy = RetryPolicy::default();
        assert!(policy.is_retryable(&ExtractError::Network("reset".into())));
        assert!(!policy.is_retryable(&ExtractError::Timeout {
            limit: Duration::from_secs(1),
        }));
        assert!(!policy.is_retryable(&ExtractError::Cancelled));
        assert!(!policy.is_retryable(&ExtractError::BadRequest {
            message: "timeout".into(),
        }));

        let opted_in = policy.with_retry_on_timeout(true);
        assert!(opted_in.is_retryable(&ExtractError::Timeout {
            limit: Duration::from_secs(1),
        }));
    }

    #[tokio::test]
    async fn rate_limited_attempts_are_retried_until_success() {
        let policy = fast_policy();
        let events = EventBus::new();
        let controller = RetryController::new(&policy, &events, None);
        let calls = AtomicU32::new(0);

        let result = controller
            .run(|_attempt| {
                let call = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    Ok(if call < 2 {
                        outcome(StatusCode::TOO_MANY_REQUESTS)
                    } else {
                        outcome(StatusCode::OK)
                    })
                }
            })
            .await
            .unwrap();

        assert_eq!(result.status, StatusCode::OK);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn final_rate_limited_response_is_handed_back() {
        let policy = fast_policy();
        let events = EventBus::new();
        let controller = RetryController::new(&policy, &events, None);
        let calls = AtomicU32::new(0);

        let result = controller
            .run(|_attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(outcome(StatusCode::TOO_MANY_REQUESTS)) }
            })
            .await
            .unwrap();

        assert_eq!(result.status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(calls.load(Ordering::SeqCst), policy.max_retries + 1);
    }

    #[tokio::test]
    async fn non_retryable_status_returns_immediately() {
        let policy = fast_policy();
        let events = EventBus::new();
        let controller = RetryController::new(&policy, &events, None);
        let calls = AtomicU32::new(0);

        let result = controller
            .run(|_attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(outcome(StatusCode::BAD_REQUEST)) }
            })
            .await
            .unwrap();

        assert_eq!(result.status, StatusCode::BAD_REQUEST);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn network_failures_are_retried_and_exhaustion_propagates() {
        let policy = fast_policy();
        let events = EventBus::new();
        let controller = RetryController::new(&policy, &events, None);
        let calls = AtomicU32::new(0);

        let error = controller
            .run(|_attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<AttemptOutcome, _>(ExtractError::Network("reset".into())) }
            })
            .await
            .unwrap_err();

        assert!(matches!(error, ExtractError::Network(_)));
        assert_eq!(calls.load(Ordering::SeqCst), policy.max_retries + 1);
    }

    #[tokio::test]
    async fn timeout_emits_its_event_but_is_not_retried_by_default() {
        let policy = fast_policy();
        let events = EventBus::new();

        struct Counter(Arc<AtomicU32>);

        #[async_trait::async_trait]
        impl crate::modules::events::EventHandler for Counter {
            async fn handle(
                &self,
                _event: &crate::modules::events::EventEnvelope,
            ) -> crate::modules::events::HandlerResult {
                self.0.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }

        let timeouts = Arc::new(AtomicU32::new(0));
        events.subscribe(EventType::Timeout, Arc::new(Counter(timeouts.clone())));

        let controller = RetryController::new(&policy, &events, None);
        let calls = AtomicU32::new(0);

        let error = controller
            .run(|_attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    Err::<AttemptOutcome, _>(ExtractError::Timeout {
                        limit: Duration::from_secs(1),
                    })
                }
            })
            .await
            .unwrap_err();

        assert!(matches!(error, ExtractError::Timeout { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(timeouts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancelled_token_stops_further_attempts() {
        let policy = fast_policy();
        let events = EventBus::new();
        let token = CancellationToken::new();
        let controller = RetryController::new(&policy, &events, Some(&token));
        let calls = AtomicU32::new(0);

        let error = controller
            .run(|_attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                token.cancel();
                async { Ok(outcome(StatusCode::TOO_MANY_REQUESTS)) }
            })
            .await
            .unwrap_err();

        assert!(matches!(error, ExtractError::Cancelled));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
