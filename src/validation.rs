//! Input-schema collaborators: credential shape, target URLs, and the
//! proxy-country enumeration served by the remote service.

use std::collections::HashSet;

use tokio::sync::OnceCell;
use url::Url;

use crate::error::{ExtractError, ExtractResult};

pub(crate) const MIN_API_KEY_LEN: usize = 32;

/// Proxy-country token that asks the service to pick an egress point.
const RANDOM_PROXY_COUNTRY: &str = "random";

pub(crate) fn validate_api_key(api_key: &str) -> ExtractResult<()> {
    if api_key.is_empty() {
        return Err(ExtractError::InvalidConfiguration(
            "API key must not be empty".into(),
        ));
    }
    if api_key.len() < MIN_API_KEY_LEN {
        return Err(ExtractError::InvalidConfiguration(format!(
            "API key must be at least {MIN_API_KEY_LEN} characters"
        )));
    }
    Ok(())
}

pub(crate) fn validate_target_url(raw: &str) -> ExtractResult<Url> {
    let url = Url::parse(raw)
        .map_err(|error| ExtractError::InvalidInput(format!("invalid URL '{raw}': {error}")))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        scheme => Err(ExtractError::InvalidInput(format!(
            "invalid URL '{raw}': unsupported scheme '{scheme}'"
        ))),
    }
}

/// Append a path segment to the configured base endpoint.
pub(crate) fn endpoint(base: &Url, segment: &str) -> Url {
    let mut url = base.clone();
    let mut path = url.path().trim_end_matches('/').to_string();
    path.push('/');
    path.push_str(segment);
    url.set_path(&path);
    url
}

/// Validates proxy-country tokens against the enumeration served at
/// `{base}/proxy-countries`, fetched once per client.
///
/// When the enumeration cannot be fetched or parsed, validation degrades to
/// accepting any non-empty token so the client stays usable while that
/// endpoint is down.
pub(crate) struct ProxyCountryValidator {
    client: reqwest::Client,
    endpoint: Url,
    countries: OnceCell<Option<HashSet<String>>>,
}

impl ProxyCountryValidator {
    pub fn new(client: reqwest::Client, base: &Url) -> Self {
        Self {
            client,
            endpoint: endpoint(base, "proxy-countries"),
            countries: OnceCell::new(),
        }
    }

    pub async fn validate(&self, country: &str) -> ExtractResult<()> {
        if country.is_empty() {
            return Err(ExtractError::InvalidInput(
                "proxy country must not be empty".into(),
            ));
        }
        if country.eq_ignore_ascii_case(RANDOM_PROXY_COUNTRY) {
            return Ok(());
        }

        match self.countries().await {
            Some(known) if !known.contains(&country.to_ascii_lowercase()) => {
                Err(ExtractError::InvalidInput(format!(
                    "unknown proxy country '{country}'"
                )))
            }
            _ => Ok(()),
        }
    }

    async fn countries(&self) -> &Option<HashSet<String>> {
        self.countries
            .get_or_init(|| async {
                match self.fetch().await {
                    Some(known) => Some(known),
                    None => {
                        log::warn!(
                            "proxy-country enumeration unavailable; accepting any non-empty token"
                        );
                        None
                    }
                }
            })
            .await
    }

    async fn fetch(&self) -> Option<HashSet<String>> {
        let response = self
            .client
            .get(self.endpoint.clone())
            .send()
            .await
            .ok()?
            .error_for_status()
            .ok()?;
        let value: serde_json::Value = response.json().await.ok()?;

        let tokens = match value {
            serde_json::Value::Array(items) => items,
            serde_json::Value::Object(map) => map.get("countries")?.as_array()?.clone(),
            _ => return None,
        };
        Some(
            tokens
                .iter()
                .filter_map(|token| token.as_str())
                .map(|token| token.to_ascii_lowercase())
                .collect(),
        )
    }
}
