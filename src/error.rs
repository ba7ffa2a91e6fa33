//! Error taxonomy surfaced by the extraction client.
//!
//! Validation failures are local to the call that raised them. Transport and
//! HTTP failures are retried per policy and then surfaced wrapped in
//! [`ExtractError::Failed`], with the exception of [`ExtractError::Timeout`]
//! which is surfaced unchanged so callers can react to it directly.

use std::time::Duration;

use thiserror::Error;

use crate::modules::events::HandlerError;

/// Result alias used across the client.
pub type ExtractResult<T> = Result<T, ExtractError>;

/// High-level error surfaced by the extraction client.
#[derive(Debug, Error)]
pub enum ExtractError {
	#[error("invalid configuration: {0}")]
	InvalidConfiguration(String),
	#[error("invalid input: {0}")]
	InvalidInput(String),
	#[error("unauthorized: {message}")]
	Unauthorized { message: String },
	#[error("rate limit exceeded: {message}")]
	RateLimitExceeded { message: String },
	#[error("bad request: {message}")]
	BadRequest { message: String },
	#[error("server error (status {status}): {message}")]
	Server { status: u16, message: String },
	#[error("no data: {message}")]
	NoData { message: String },
	#[error("attempt deadline of {limit:?} exceeded")]
	Timeout { limit: Duration },
	#[error("extraction cancelled by caller")]
	Cancelled,
	#[error("network error: {0}")]
	Network(String),
	#[error(transparent)]
	Handler(#[from] HandlerError),
	#[error("failed to extract data: {source}")]
	Failed {
		#[source]
		source: Box<ExtractError>,
	},
}

impl ExtractError {
	/// The underlying failure, seen through the terminal wrapper.
	pub fn root_cause(&self) -> &ExtractError {
		match self {
			ExtractError::Failed { source } => source.root_cause(),
			other => other,
		}
	}

	/// True when the failure is a deadline expiry, wrapped or not.
	pub fn is_timeout(&self) -> bool {
		matches!(self.root_cause(), ExtractError::Timeout { .. })
	}

	/// True when the failure is a rate limit rejection, wrapped or not.
	pub fn is_rate_limited(&self) -> bool {
		matches!(self.root_cause(), ExtractError::RateLimitExceeded { .. })
	}

	/// True when the failure was an external cancellation, wrapped or not.
	pub fn is_cancelled(&self) -> bool {
		matches!(self.root_cause(), ExtractError::Cancelled)
	}
}
