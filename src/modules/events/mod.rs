//! Lifecycle event system for the extraction pipeline.
//!
//! Handlers are registered per event type. Default delivery awaits every
//! handler in registration order before the emitting operation proceeds;
//! types marked `detached` are delivered fire-and-forget on spawned tasks.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Value, json};
use thiserror::Error;

/// Event types understood by the pipeline, plus caller-defined extensions.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventType {
    ExtractStart,
    ExtractComplete,
    ExtractError,
    RequestRetry,
    RequestError,
    RateLimit,
    Timeout,
    HandlerError,
    Custom(String),
}

impl EventType {
    /// The fixed well-known set emitted by the pipeline itself.
    pub const WELL_KNOWN: [EventType; 8] = [
        EventType::ExtractStart,
        EventType::ExtractComplete,
        EventType::ExtractError,
        EventType::RequestRetry,
        EventType::RequestError,
        EventType::RateLimit,
        EventType::Timeout,
        EventType::HandlerError,
    ];

    pub fn as_str(&self) -> &str {
        match self {
            EventType::ExtractStart => "extract:start",
            EventType::ExtractComplete => "extract:complete",
            EventType::ExtractError => "extract:error",
            EventType::RequestRetry => "request:retry",
            EventType::RequestError => "request:error",
            EventType::RateLimit => "rateLimit",
            EventType::Timeout => "timeout",
            EventType::HandlerError => "handler:error",
            EventType::Custom(name) => name,
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for EventType {
    fn from(raw: &str) -> Self {
        match raw {
            "extract:start" => EventType::ExtractStart,
            "extract:complete" => EventType::ExtractComplete,
            "extract:error" => EventType::ExtractError,
            "request:retry" => EventType::RequestRetry,
            "request:error" => EventType::RequestError,
            "rateLimit" => EventType::RateLimit,
            "timeout" => EventType::Timeout,
            "handler:error" => EventType::HandlerError,
            other => EventType::Custom(other.to_string()),
        }
    }
}

/// Structured notification delivered to subscribers.
///
/// Created fresh per emission and never mutated afterwards; the timestamp
/// reflects emission time, not occurrence time of the underlying condition.
#[derive(Debug, Clone)]
pub struct EventEnvelope {
    pub event_type: EventType,
    pub timestamp: DateTime<Utc>,
    pub payload: Option<Value>,
    pub error: Option<String>,
    pub retries: Option<u32>,
}

impl EventEnvelope {
    pub fn new(event_type: EventType) -> Self {
        Self {
            event_type,
            timestamp: Utc::now(),
            payload: None,
            error: None,
            retries: None,
        }
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = Some(retries);
        self
    }
}

/// Outcome of one handler invocation.
pub type HandlerResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// Trait implemented by event handlers.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &EventEnvelope) -> HandlerResult;
}

/// Failure of an awaited handler whose event type has isolation disabled.
#[derive(Debug, Clone, Error)]
#[error("handler for '{event}' failed: {message}")]
pub struct HandlerError {
    pub event: String,
    pub message: String,
}

/// Per-type delivery options.
#[derive(Debug, Clone, Copy)]
pub struct DeliveryOptions {
    /// Fire-and-forget delivery on a spawned task; failures are swallowed.
    pub detached: bool,
    /// Isolate awaited handler failures by republishing them as
    /// `handler:error` instead of propagating out of the emission.
    pub catch_errors: bool,
}

impl Default for DeliveryOptions {
    fn default() -> Self {
        Self {
            detached: false,
            catch_errors: true,
        }
    }
}

impl DeliveryOptions {
    pub fn detached() -> Self {
        Self {
            detached: true,
            ..Self::default()
        }
    }

    pub fn propagating() -> Self {
        Self {
            detached: false,
            catch_errors: false,
        }
    }
}

#[derive(Default)]
struct Registry {
    handlers: HashMap<EventType, Vec<Arc<dyn EventHandler>>>,
    options: HashMap<EventType, DeliveryOptions>,
}

/// In-process publish/subscribe registry keyed by event type.
///
/// The registry lock is never held across an await: emission snapshots the
/// handler list first, so subscriptions changed mid-emission take effect on
/// the next emission.
#[derive(Default)]
pub struct EventBus {
    registry: RwLock<Registry>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, event_type: EventType, handler: Arc<dyn EventHandler>) {
        let mut registry = self.registry.write().expect("event registry poisoned");
        registry.handlers.entry(event_type).or_default().push(handler);
    }

    /// Subscribe and set the delivery options for the whole event type.
    pub fn subscribe_with_options(
        &self,
        event_type: EventType,
        handler: Arc<dyn EventHandler>,
        options: DeliveryOptions,
    ) {
        let mut registry = self.registry.write().expect("event registry poisoned");
        registry.options.insert(event_type.clone(), options);
        registry.handlers.entry(event_type).or_default().push(handler);
    }

    /// Remove a previously registered handler. Unknown handlers are a no-op.
    pub fn unsubscribe(&self, event_type: &EventType, handler: &Arc<dyn EventHandler>) {
        let mut registry = self.registry.write().expect("event registry poisoned");
        if let Some(handlers) = registry.handlers.get_mut(event_type) {
            handlers.retain(|registered| !Arc::ptr_eq(registered, handler));
        }
    }

    /// Drop all handlers for one event type, or for every type.
    pub fn clear(&self, event_type: Option<&EventType>) {
        let mut registry = self.registry.write().expect("event registry poisoned");
        match event_type {
            Some(event_type) => {
                registry.handlers.remove(event_type);
                registry.options.remove(event_type);
            }
            None => {
                registry.handlers.clear();
                registry.options.clear();
            }
        }
    }

    fn snapshot(&self, event_type: &EventType) -> (Vec<Arc<dyn EventHandler>>, DeliveryOptions) {
        let registry = self.registry.read().expect("event registry poisoned");
        let handlers = registry
            .handlers
            .get(event_type)
            .cloned()
            .unwrap_or_default();
        let options = registry
            .options
            .get(event_type)
            .copied()
            .unwrap_or_default();
        (handlers, options)
    }

    /// Deliver an envelope to every handler registered for its type.
    ///
    /// Returns `Err` only when the type's isolation is disabled and an
    /// awaited handler failed; that failure then propagates out of whatever
    /// core operation triggered the emission.
    pub async fn emit(&self, envelope: EventEnvelope) -> Result<(), HandlerError> {
        let (handlers, options) = self.snapshot(&envelope.event_type);
        if handlers.is_empty() {
            return Ok(());
        }

        if options.detached {
            for handler in handlers {
                let event = envelope.clone();
                tokio::spawn(async move {
                    if let Err(error) = handler.handle(&event).await {
                        log::warn!(
                            "detached handler for '{}' failed: {error}",
                            event.event_type
                        );
                    }
                });
            }
            return Ok(());
        }

        for handler in handlers {
            if let Err(error) = handler.handle(&envelope).await {
                if !options.catch_errors {
                    return Err(HandlerError {
                        event: envelope.event_type.to_string(),
                        message: error.to_string(),
                    });
                }
                log::warn!(
                    "handler for '{}' failed (isolated): {error}",
                    envelope.event_type
                );
                self.publish_handler_error(&envelope.event_type, error.to_string())
                    .await;
            }
        }
        Ok(())
    }

    /// Republish an isolated handler failure as a `handler:error` event.
    ///
    /// Failures of `handler:error` observers themselves are only logged,
    /// which keeps isolation loop-free.
    async fn publish_handler_error(&self, origin: &EventType, message: String) {
        if *origin == EventType::HandlerError {
            log::warn!("handler:error observer failed: {message}");
            return;
        }

        let envelope = EventEnvelope::new(EventType::HandlerError)
            .with_error(message)
            .with_payload(json!({ "event": origin.to_string() }));
        let (handlers, options) = self.snapshot(&EventType::HandlerError);

        if options.detached {
            for handler in handlers {
                let event = envelope.clone();
                tokio::spawn(async move {
                    if let Err(error) = handler.handle(&event).await {
                        log::warn!("handler:error observer failed: {error}");
                    }
                });
            }
            return;
        }

        for handler in handlers {
            if let Err(error) = handler.handle(&envelope).await {
                log::warn!("handler:error observer failed: {error}");
            }
        }
    }
}

/// Logs the well-known events using the `log` crate.
#[derive(Debug)]
pub struct LoggingHandler;

#[async_trait]
impl EventHandler for LoggingHandler {
    async fn handle(&self, event: &EventEnvelope) -> HandlerResult {
        match &event.event_type {
            EventType::ExtractStart => log::debug!("extraction started"),
            EventType::ExtractComplete => log::debug!("extraction complete"),
            EventType::ExtractError => log::warn!(
                "extraction failed: {}",
                event.error.as_deref().unwrap_or("unknown error")
            ),
            EventType::RequestRetry => {
                log::info!("retry {} scheduled", event.retries.unwrap_or(0));
            }
            EventType::RequestError => log::warn!(
                "attempt failed: {}",
                event.error.as_deref().unwrap_or("unknown error")
            ),
            EventType::RateLimit => {
                log::info!("rate limited after {} retries", event.retries.unwrap_or(0));
            }
            EventType::Timeout => log::warn!(
                "attempt timed out: {}",
                event.error.as_deref().unwrap_or("deadline exceeded")
            ),
            EventType::HandlerError => log::warn!(
                "handler failed: {}",
                event.error.as_deref().unwrap_or("unknown error")
            ),
            EventType::Custom(name) => log::debug!("event '{name}'"),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    struct RecordingHandler {
        label: &'static str,
        seen: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl EventHandler for RecordingHandler {
        async fn handle(&self, event: &EventEnvelope) -> HandlerResult {
            self.seen
                .lock()
                .unwrap()
                .push(format!("{}:{}", self.label, event.event_type));
            Ok(())
        }
    }

    struct FailingHandler;

    #[async_trait]
    impl EventHandler for FailingHandler {
        async fn handle(&self, _event: &EventEnvelope) -> HandlerResult {
            Err("boom".into())
        }
    }

    fn recording(
        label: &'static str,
        seen: &Arc<Mutex<Vec<String>>>,
    ) -> Arc<dyn EventHandler> {
        Arc::new(RecordingHandler {
            label,
            seen: seen.clone(),
        })
    }

    #[tokio::test]
    async fn awaited_handlers_run_in_registration_order() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        bus.subscribe(EventType::ExtractStart, recording("first", &seen));
        bus.subscribe(EventType::ExtractStart, recording("second", &seen));

        bus.emit(EventEnvelope::new(EventType::ExtractStart))
            .await
            .unwrap();

        assert_eq!(
            *seen.lock().unwrap(),
            vec!["first:extract:start", "second:extract:start"]
        );
    }

    #[tokio::test]
    async fn unsubscribe_and_clear_are_no_fail_operations() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let handler = recording("only", &seen);
        bus.subscribe(EventType::ExtractComplete, handler.clone());

        bus.unsubscribe(&EventType::ExtractComplete, &handler);
        // Second removal and clearing an empty type are both no-ops.
        bus.unsubscribe(&EventType::ExtractComplete, &handler);
        bus.clear(Some(&EventType::ExtractError));

        bus.emit(EventEnvelope::new(EventType::ExtractComplete))
            .await
            .unwrap();
        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn isolated_failure_is_republished_as_handler_error() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        bus.subscribe(EventType::ExtractStart, Arc::new(FailingHandler));
        bus.subscribe(EventType::HandlerError, recording("observer", &seen));

        bus.emit(EventEnvelope::new(EventType::ExtractStart))
            .await
            .unwrap();

        assert_eq!(*seen.lock().unwrap(), vec!["observer:handler:error"]);
    }

    #[tokio::test]
    async fn disabled_isolation_propagates_the_failure() {
        let bus = EventBus::new();
        bus.subscribe_with_options(
            EventType::ExtractStart,
            Arc::new(FailingHandler),
            DeliveryOptions::propagating(),
        );

        let error = bus
            .emit(EventEnvelope::new(EventType::ExtractStart))
            .await
            .unwrap_err();
        assert_eq!(error.event, "extract:start");
        assert_eq!(error.message, "boom");
    }

    #[tokio::test]
    async fn detached_delivery_does_not_block_the_emitter() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        bus.subscribe_with_options(
            EventType::Custom("audit".into()),
            recording("detached", &seen),
            DeliveryOptions::detached(),
        );

        bus.emit(EventEnvelope::new(EventType::from("audit")))
            .await
            .unwrap();

        // The spawned task has not necessarily run yet; give it a beat.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(*seen.lock().unwrap(), vec!["detached:audit"]);
    }

    #[test]
    fn wire_names_round_trip() {
        for event_type in EventType::WELL_KNOWN {
            assert_eq!(EventType::from(event_type.as_str()), event_type);
        }
        assert_eq!(
            EventType::from("my:event"),
            EventType::Custom("my:event".into())
        );
    }
}
