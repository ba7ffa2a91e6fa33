//! # webextract-rs
//!
//! Async client for structured web data extraction services: describe the
//! attributes you want from a page and the remote service returns them as
//! records.
//!
//! The client turns that single logical call into a resilient network
//! operation. Outbound attempts are spaced through a shared gate, bounded by
//! a cancellable per-attempt deadline, retried with exponential backoff on
//! rate limiting and transient failures, and narrated through a structured
//! lifecycle-event stream so callers can observe progress without polling.
//!
//! ## Example
//!
//! ```no_run
//! use webextract_rs::{ExtractionRequest, WebExtractor};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let extractor = WebExtractor::new(std::env::var("WEBEXTRACT_API_KEY")?)?;
//!     let records = extractor
//!         .extract(
//!             ExtractionRequest::new("https://example.com/pricing")
//!                 .attribute("plan", "name of the subscription plan")
//!                 .attribute("price", "monthly price of the plan"),
//!         )
//!         .await?;
//!     println!("extracted {} records", records.len());
//!     Ok(())
//! }
//! ```

mod extractor;

pub mod error;
pub mod modules;
pub mod types;

mod validation;

pub use crate::error::{ExtractError, ExtractResult};

pub use crate::extractor::{
    DEFAULT_BASE_URL,
    WebExtractor,
    WebExtractorBuilder,
    WebExtractorConfig,
};

pub use crate::modules::{
    DeliveryOptions,
    EventBus,
    EventEnvelope,
    EventHandler,
    EventType,
    HandlerError,
    HandlerResult,
    LoggingHandler,
    RateLimiter,
    RetryPolicy,
};

pub use crate::types::{
    Attribute,
    Cookie,
    ExtractResponse,
    ExtractionRequest,
    NormalizedRequestBody,
    Record,
    SameSite,
};

// Cancellation tokens are part of the request surface; re-exported so callers
// do not need a direct tokio-util dependency.
pub use tokio_util::sync::CancellationToken;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
