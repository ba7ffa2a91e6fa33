//! Request and response data model for the extraction wire contract.
//!
//! [`ExtractionRequest`] is the caller-facing shape; [`NormalizedRequestBody`]
//! is its wire projection, built once per logical extraction and reused
//! verbatim across every retry of that extraction.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

/// A single string-keyed record returned by the extraction service.
pub type Record = serde_json::Map<String, serde_json::Value>;

/// One attribute to extract from the target page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    pub name: String,
    pub description: String,
}

impl Attribute {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
        }
    }
}

/// Cookie `SameSite` policy accepted by the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SameSite {
    None,
    Lax,
    Strict,
}

impl SameSite {
    pub fn as_str(self) -> &'static str {
        match self {
            SameSite::None => "None",
            SameSite::Lax => "Lax",
            SameSite::Strict => "Strict",
        }
    }
}

impl fmt::Display for SameSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for SameSite {
    type Error = String;

    fn try_from(raw: &str) -> Result<Self, Self::Error> {
        match raw {
            "None" => Ok(SameSite::None),
            "Lax" => Ok(SameSite::Lax),
            "Strict" => Ok(SameSite::Strict),
            other => Err(format!(
                "invalid sameSite value '{other}' (expected None, Lax or Strict)"
            )),
        }
    }
}

/// Cookie forwarded to the service for the page fetch.
///
/// `sameSite` is the only attribute with a closed value set; everything else
/// (name, value, domain, path, ...) rides along as free-form string pairs.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Cookie {
    #[serde(rename = "sameSite")]
    pub same_site: SameSite,
    #[serde(flatten)]
    pub attributes: BTreeMap<String, String>,
}

impl Cookie {
    pub fn new(same_site: SameSite) -> Self {
        Self {
            same_site,
            attributes: BTreeMap::new(),
        }
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }
}

/// One logical extraction request.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExtractionRequest {
    pub url: String,
    pub attributes: Vec<Attribute>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy_country: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cookies: Option<Vec<Cookie>>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub precision: bool,
    #[serde(skip)]
    pub cancellation: Option<CancellationToken>,
}

impl ExtractionRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    pub fn attribute(
        mut self,
        name: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        self.attributes.push(Attribute::new(name, description));
        self
    }

    pub fn attributes<I>(mut self, attributes: I) -> Self
    where
        I: IntoIterator<Item = Attribute>,
    {
        self.attributes.extend(attributes);
        self
    }

    /// Accepts the name -> description mapping form, preserving insertion
    /// order. Duplicate names are kept as given.
    pub fn attributes_from_pairs<I, K, V>(mut self, pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.attributes
            .extend(pairs.into_iter().map(|(name, description)| {
                Attribute::new(name, description)
            }));
        self
    }

    pub fn proxy_country(mut self, country: impl Into<String>) -> Self {
        self.proxy_country = Some(country.into());
        self
    }

    pub fn cookie(mut self, cookie: Cookie) -> Self {
        self.cookies.get_or_insert_with(Vec::new).push(cookie);
        self
    }

    pub fn precision(mut self, precision: bool) -> Self {
        self.precision = precision;
        self
    }

    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }
}

/// Wire projection of an [`ExtractionRequest`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalizedRequestBody {
    pub url: String,
    pub attributes: Vec<Attribute>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy_country: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cookies: Option<Vec<Cookie>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<&'static str>,
}

/// Success payload returned by the service.
#[derive(Debug, Clone, Deserialize)]
pub struct ExtractResponse {
    #[serde(default)]
    pub data: Vec<Record>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Error payload returned by the service on non-success statuses.
#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct ErrorBody {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    #[allow(dead_code)]
    pub code: Option<String>,
}
