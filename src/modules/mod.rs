//! Resilience building blocks
//!
//! The leaf components the orchestrator drives: request spacing, deadline
//! enforcement, retry control, and the lifecycle event bus.

pub mod deadline;
pub mod events;
pub mod rate_limit;
pub mod retry;

// Re-export commonly used types
pub use deadline::run_with_deadline;
pub use events::{
    DeliveryOptions, EventBus, EventEnvelope, EventHandler, EventType, HandlerError,
    HandlerResult, LoggingHandler,
};
pub use rate_limit::{MIN_REQUEST_INTERVAL, RateLimiter};
pub use retry::RetryPolicy;
