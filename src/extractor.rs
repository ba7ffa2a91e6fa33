//! High level extraction orchestration.
//!
//! Wires together the rate limiter, the per-attempt deadline, the retry
//! controller, and the event bus to expose one resilient operation:
//! extract structured data from a page through the remote service.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde_json::Value;
use url::Url;

use crate::error::{ExtractError, ExtractResult};
use crate::modules::deadline;
use crate::modules::events::{
	DeliveryOptions, EventBus, EventEnvelope, EventHandler, EventType, LoggingHandler,
};
use crate::modules::rate_limit::RateLimiter;
use crate::modules::retry::{AttemptOutcome, RetryController, RetryPolicy};
use crate::types::{ErrorBody, ExtractResponse, ExtractionRequest, NormalizedRequestBody, Record};
use crate::validation::{self, ProxyCountryValidator};

/// Default service endpoint.
pub const DEFAULT_BASE_URL: &str = "https://api.webextract.dev/v1";

/// Header carrying the credential on every attempt.
const API_KEY_HEADER: &str = "X-API-KEY";

const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(30);

const NO_DATA_MESSAGE: &str = "the service returned an empty result set for the requested attributes";

/// Client configuration used by the builder. Immutable once built.
#[derive(Debug, Clone)]
pub struct WebExtractorConfig {
	pub api_key: String,
	pub base_url: String,
	pub default_proxy_country: Option<String>,
	/// Deadline applied to each attempt, not to the logical extraction.
	pub attempt_timeout: Duration,
	pub retry_policy: RetryPolicy,
	pub default_logging: bool,
}

impl Default for WebExtractorConfig {
	fn default() -> Self {
		Self {
			api_key: String::new(),
			base_url: DEFAULT_BASE_URL.to_string(),
			default_proxy_country: None,
			attempt_timeout: DEFAULT_ATTEMPT_TIMEOUT,
			retry_policy: RetryPolicy::default(),
			default_logging: true,
		}
	}
}

/// Fluent builder for [`WebExtractor`].
pub struct WebExtractorBuilder {
	config: WebExtractorConfig,
}

impl WebExtractorBuilder {
	pub fn new(api_key: impl Into<String>) -> Self {
		Self {
			config: WebExtractorConfig {
				api_key: api_key.into(),
				..WebExtractorConfig::default()
			},
		}
	}

	pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
		self.config.base_url = base_url.into();
		self
	}

	pub fn with_proxy_country(mut self, country: impl Into<String>) -> Self {
		self.config.default_proxy_country = Some(country.into());
		self
	}

	pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
		self.config.attempt_timeout = timeout;
		self
	}

	pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
		self.config.retry_policy = policy;
		self
	}

	pub fn disable_default_logging(mut self) -> Self {
		self.config.default_logging = false;
		self
	}

	pub fn build(self) -> ExtractResult<WebExtractor> {
		WebExtractor::with_config(self.config)
	}
}

/// Client for the structured extraction service.
///
/// One instance supports any number of concurrent [`extract`] calls; they
/// share the request-spacing gate and the event registry, nothing else.
///
/// [`extract`]: WebExtractor::extract
pub struct WebExtractor {
	config: WebExtractorConfig,
	http: reqwest::Client,
	extract_endpoint: Url,
	rate_limiter: RateLimiter,
	events: EventBus,
	proxy_countries: ProxyCountryValidator,
}

impl std::fmt::Debug for WebExtractor {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("WebExtractor")
			.field("config", &self.config)
			.field("extract_endpoint", &self.extract_endpoint)
			.finish_non_exhaustive()
	}
}

impl WebExtractor {
	/// Construct a client with default configuration.
	pub fn new(api_key: impl Into<String>) -> ExtractResult<Self> {
		WebExtractorBuilder::new(api_key).build()
	}

	/// Obtain a builder to customise the client instance.
	pub fn builder(api_key: impl Into<String>) -> WebExtractorBuilder {
		WebExtractorBuilder::new(api_key)
	}

	fn with_config(config: WebExtractorConfig) -> ExtractResult<Self> {
		validation::validate_api_key(&config.api_key)?;

		let base_url = Url::parse(&config.base_url).map_err(|error| {
			ExtractError::InvalidConfiguration(format!(
				"invalid base URL '{}': {error}",
				config.base_url
			))
		})?;

		let http = reqwest::Client::builder().build().map_err(|error| {
			ExtractError::InvalidConfiguration(format!("failed to build HTTP client: {error}"))
		})?;

		let events = EventBus::new();
		if config.default_logging {
			let logger: Arc<dyn EventHandler> = Arc::new(LoggingHandler);
			for event_type in EventType::WELL_KNOWN {
				events.subscribe(event_type, logger.clone());
			}
		}

		let extract_endpoint = validation::endpoint(&base_url, "extract");
		let proxy_countries = ProxyCountryValidator::new(http.clone(), &base_url);

		Ok(Self {
			config,
			http,
			extract_endpoint,
			rate_limiter: RateLimiter::new(),
			events,
			proxy_countries,
		})
	}

	/// Register a handler for an event type.
	pub fn on(&self, event_type: EventType, handler: Arc<dyn EventHandler>) {
		self.events.subscribe(event_type, handler);
	}

	/// Register a handler and set the event type's delivery options.
	pub fn on_with_options(
		&self,
		event_type: EventType,
		handler: Arc<dyn EventHandler>,
		options: DeliveryOptions,
	) {
		self.events.subscribe_with_options(event_type, handler, options);
	}

	/// Remove a previously registered handler; unknown handlers are a no-op.
	pub fn off(&self, event_type: &EventType, handler: &Arc<dyn EventHandler>) {
		self.events.unsubscribe(event_type, handler);
	}

	/// Drop all handlers for one event type, or for every type.
	pub fn clear(&self, event_type: Option<&EventType>) {
		self.events.clear(event_type);
	}

	/// Extract structured data from the requested page.
	///
	/// Emits `extract:start` before anything else, including input
	/// validation. A malformed target URL surfaces as
	/// [`ExtractError::InvalidInput`] without an `extract:error` emission;
	/// every later failure is announced as `extract:error` and re-raised —
	/// timeouts unchanged, everything else wrapped in
	/// [`ExtractError::Failed`].
	pub async fn extract(&self, request: ExtractionRequest) -> ExtractResult<Vec<Record>> {
		let started = EventEnvelope::new(EventType::ExtractStart)
			.with_payload(serde_json::to_value(&request).unwrap_or(Value::Null));
		self.events.emit(started).await?;

		let target = validation::validate_target_url(&request.url)?;
		log::debug!("extracting {target}");

		match self.run_extraction(&request).await {
			Ok(data) => Ok(data),
			Err(error) => {
				self.events
					.emit(
						EventEnvelope::new(EventType::ExtractError)
							.with_error(error.to_string()),
					)
					.await?;
				match error {
					ExtractError::Timeout { .. } => Err(error),
					other => Err(ExtractError::Failed {
						source: Box::new(other),
					}),
				}
			}
		}
	}

	/// Alias for [`extract`](WebExtractor::extract), provided for
	/// cross-ecosystem naming familiarity. Identical contract.
	pub async fn run(&self, request: ExtractionRequest) -> ExtractResult<Vec<Record>> {
		self.extract(request).await
	}

	/// Alias for [`extract`](WebExtractor::extract), provided for
	/// cross-ecosystem naming familiarity. Identical contract.
	pub async fn arun(&self, request: ExtractionRequest) -> ExtractResult<Vec<Record>> {
		self.extract(request).await
	}

	async fn run_extraction(&self, request: &ExtractionRequest) -> ExtractResult<Vec<Record>> {
		// The body is built once and reused verbatim by every retry of this
		// logical extraction.
		let body = self.normalize(request).await?;
		let body = serde_json::to_value(&body).map_err(|error| {
			ExtractError::InvalidInput(format!("unserializable request body: {error}"))
		})?;

		let cancel = request.cancellation.as_ref();
		let controller = RetryController::new(&self.config.retry_policy, &self.events, cancel);
		let outcome = controller
			.run(|attempt| self.send_attempt(&body, cancel, attempt))
			.await?;

		let status = outcome.status;
		if !status.is_success() {
			return Err(map_status_failure(status, &outcome.body));
		}

		let payload: Value = serde_json::from_slice(&outcome.body).map_err(|error| {
			ExtractError::Server {
				status: status.as_u16(),
				message: format!("invalid response payload: {error}"),
			}
		})?;
		let response: ExtractResponse =
			serde_json::from_value(payload.clone()).map_err(|error| ExtractError::Server {
				status: status.as_u16(),
				message: format!("invalid response payload: {error}"),
			})?;

		if response.data.is_empty() {
			return Err(ExtractError::NoData {
				message: response
					.message
					.unwrap_or_else(|| NO_DATA_MESSAGE.to_string()),
			});
		}

		self.events
			.emit(EventEnvelope::new(EventType::ExtractComplete).with_payload(payload))
			.await?;
		Ok(response.data)
	}

	async fn normalize(&self, request: &ExtractionRequest) -> ExtractResult<NormalizedRequestBody> {
		let proxy_country = match request
			.proxy_country
			.as_deref()
			.or(self.config.default_proxy_country.as_deref())
		{
			Some(country) => {
				self.proxy_countries.validate(country).await?;
				Some(country.to_string())
			}
			None => None,
		};

		Ok(NormalizedRequestBody {
			url: request.url.clone(),
			attributes: request.attributes.clone(),
			proxy_country,
			cookies: request.cookies.clone(),
			mode: request.precision.then_some("precision"),
		})
	}

	/// One attempt: rate-limit wait, then the deadline-bounded transport
	/// call.
	async fn send_attempt(
		&self,
		body: &Value,
		cancel: Option<&tokio_util::sync::CancellationToken>,
		attempt: u32,
	) -> ExtractResult<AttemptOutcome> {
		self.rate_limiter.acquire().await;
		log::debug!("POST {} (attempt {})", self.extract_endpoint, attempt + 1);

		let call = async {
			let response = self
				.http
				.post(self.extract_endpoint.clone())
				.header(API_KEY_HEADER, self.config.api_key.as_str())
				.json(body)
				.send()
				.await
				.map_err(map_transport_error)?;

			let status = response.status();
			let bytes = response.bytes().await.map_err(map_transport_error)?;
			Ok(AttemptOutcome {
				status,
				body: bytes,
			})
		};

		deadline::run_with_deadline(self.config.attempt_timeout, cancel, call).await
	}
}

fn map_status_failure(status: http::StatusCode, body: &Bytes) -> ExtractError {
	let message = parse_error_message(body);
	match status {
		http::StatusCode::UNAUTHORIZED => ExtractError::Unauthorized {
			message: message.unwrap_or_else(|| "invalid API key".to_string()),
		},
		http::StatusCode::TOO_MANY_REQUESTS => ExtractError::RateLimitExceeded {
			message: message
				.unwrap_or_else(|| "rate limit exceeded and retries exhausted".to_string()),
		},
		http::StatusCode::BAD_REQUEST => ExtractError::BadRequest {
			message: message.unwrap_or_else(|| "malformed extraction request".to_string()),
		},
		other => ExtractError::Server {
			status: other.as_u16(),
			message: message
				.unwrap_or_else(|| "unexpected response from extraction service".to_string()),
		},
	}
}

fn map_transport_error(error: reqwest::Error) -> ExtractError {
	if error.is_connect() {
		ExtractError::Network(format!("connection failed: {error}"))
	} else {
		ExtractError::Network(error.to_string())
	}
}

fn parse_error_message(body: &Bytes) -> Option<String> {
	serde_json::from_slice::<ErrorBody>(body)
		.ok()
		.and_then(|parsed| parsed.message)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn short_api_key_is_rejected_at_construction() {
		let error = WebExtractor::new("too-short").unwrap_err();
		assert!(matches!(error, ExtractError::InvalidConfiguration(_)));
	}

	#[test]
	fn builder_produces_a_client_for_a_valid_key() {
		let extractor = WebExtractor::builder("k".repeat(40))
			.with_base_url("https://api.example.com/v1")
			.with_proxy_country("de")
			.with_attempt_timeout(Duration::from_secs(5))
			.with_retry_policy(RetryPolicy::default().with_max_retries(1))
			.build()
			.unwrap();
		assert_eq!(extractor.config.retry_policy.max_retries, 1);
		assert_eq!(
			extractor.extract_endpoint.as_str(),
			"https://api.example.com/v1/extract"
		);
	}

	#[test]
	fn invalid_base_url_is_a_configuration_error() {
		let error = WebExtractor::builder("k".repeat(40))
			.with_base_url("not a url")
			.build()
			.unwrap_err();
		assert!(matches!(error, ExtractError::InvalidConfiguration(_)));
	}
}
