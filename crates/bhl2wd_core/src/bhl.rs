//! Biodiversity Heritage Library API v3 adapter.

use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use tracing::debug;

use crate::config::AppConfig;
use crate::identifier::TitleId;
use crate::net::HttpClient;

pub const UNKNOWN_TITLE: &str = "Unknown Title";

/// Bibliographic record for one BHL title, as returned by `GetTitleMetadata`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TitleMetadata {
    #[serde(rename = "FullTitle", default = "unknown_title")]
    pub full_title: String,
    #[serde(rename = "TitleID", default, deserialize_with = "id_string")]
    pub title_id: String,
    #[serde(rename = "Identifiers", default, deserialize_with = "null_as_empty")]
    pub identifiers: Vec<ExternalIdentifier>,
    #[serde(rename = "Authors", default, deserialize_with = "null_as_empty")]
    pub authors: Vec<Author>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ExternalIdentifier {
    #[serde(rename = "IdentifierName")]
    pub name: String,
    #[serde(rename = "IdentifierValue")]
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Author {
    #[serde(rename = "AuthorID", default, deserialize_with = "id_string")]
    pub author_id: String,
    #[serde(rename = "Name", default)]
    pub name: String,
}

#[derive(Debug, Deserialize)]
struct ApiEnvelope {
    #[serde(rename = "Status", default)]
    status: String,
    #[serde(rename = "ErrorMessage", default)]
    error_message: Option<String>,
    #[serde(rename = "Result", default)]
    result: Option<Vec<TitleMetadata>>,
}

/// Source of title metadata.
///
/// `Ok(None)` means the service answered but has no such title; transport
/// and decoding failures are errors.
pub trait TitleSource {
    fn fetch_title(&self, title_id: &TitleId) -> Result<Option<TitleMetadata>>;
}

pub struct BhlClient {
    http: HttpClient,
    api_url: String,
    api_key: String,
}

impl BhlClient {
    pub fn new(config: &AppConfig) -> Result<Self> {
        Ok(Self {
            http: HttpClient::new(&config.http)?,
            api_url: config.bhl_api_url.clone(),
            api_key: config.bhl_api_key.clone(),
        })
    }
}

impl TitleSource for BhlClient {
    fn fetch_title(&self, title_id: &TitleId) -> Result<Option<TitleMetadata>> {
        let body = self
            .http
            .get_text(
                &self.api_url,
                &[
                    ("op", "GetTitleMetadata".to_string()),
                    ("id", title_id.to_string()),
                    ("format", "json".to_string()),
                    ("items", "true".to_string()),
                    ("apikey", self.api_key.clone()),
                ],
                "application/json",
            )
            .with_context(|| format!("BHL GetTitleMetadata failed for title {title_id}"))?;
        parse_title_response(&body, title_id)
    }
}

/// Decode a `GetTitleMetadata` response body.
///
/// A `Status` other than `ok` or an empty `Result` list is a missing title.
pub fn parse_title_response(body: &str, title_id: &TitleId) -> Result<Option<TitleMetadata>> {
    let envelope: ApiEnvelope =
        serde_json::from_str(body).context("failed to decode BHL API JSON response")?;
    if !envelope.status.eq_ignore_ascii_case("ok") {
        debug!(
            title_id = %title_id,
            status = %envelope.status,
            error = envelope.error_message.as_deref().unwrap_or(""),
            "BHL reported no record"
        );
        return Ok(None);
    }
    let Some(mut metadata) = envelope.result.unwrap_or_default().into_iter().next() else {
        return Ok(None);
    };
    if metadata.title_id.is_empty() {
        metadata.title_id = title_id.to_string();
    }
    Ok(Some(metadata))
}

fn unknown_title() -> String {
    UNKNOWN_TITLE.to_string()
}

/// BHL serializes numeric IDs as JSON numbers; older payloads use strings.
fn id_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Number(number) => Ok(number.to_string()),
        Value::String(text) => Ok(text.trim().to_string()),
        Value::Null => Ok(String::new()),
        other => Err(serde::de::Error::custom(format!(
            "expected numeric or string id, got {other}"
        ))),
    }
}

fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}
