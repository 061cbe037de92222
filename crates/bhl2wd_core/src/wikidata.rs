//! Read-only Wikidata access through the SPARQL query service.

use std::collections::HashMap;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::AppConfig;
use crate::identifier::TitleId;
use crate::net::HttpClient;

/// BHL Title ID.
pub const PROP_BHL_TITLE_ID: &str = "P4327";
/// BHL creator ID.
pub const PROP_BHL_CREATOR_ID: &str = "P4081";

pub const ENTITY_PAGE_URL: &str = "https://www.wikidata.org/wiki/";
const LABEL_LANGUAGES: &str = "[AUTO_LANGUAGE],mul,en";
const SPARQL_ACCEPT: &str = "application/sparql-results+json";

/// An item that already carries the BHL title ID being imported.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExistingItem {
    pub qid: String,
    pub label: String,
}

impl ExistingItem {
    pub fn url(&self) -> String {
        format!("{ENTITY_PAGE_URL}{}", self.qid)
    }
}

pub trait ExistingItemLookup {
    fn find_existing(&self, title_id: &TitleId) -> Result<Option<ExistingItem>>;
}

/// Resolves an external identifier stored under `property` to a QID.
pub trait EntityLookup {
    fn lookup_entity(&self, property: &str, value: &str) -> Result<Option<String>>;
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SparqlValue {
    pub value: String,
}

pub type Binding = HashMap<String, SparqlValue>;

#[derive(Debug, Deserialize)]
struct SparqlResponse {
    results: SparqlResults,
}

#[derive(Debug, Deserialize)]
struct SparqlResults {
    #[serde(default)]
    bindings: Vec<Binding>,
}

pub struct SparqlClient {
    http: HttpClient,
    endpoint: String,
}

impl SparqlClient {
    pub fn new(config: &AppConfig) -> Result<Self> {
        Ok(Self {
            http: HttpClient::new(&config.http)?,
            endpoint: config.sparql_url.clone(),
        })
    }

    pub fn select(&self, query: &str) -> Result<Vec<Binding>> {
        let body = self
            .http
            .get_text(
                &self.endpoint,
                &[("query", query.to_string())],
                SPARQL_ACCEPT,
            )
            .context("SPARQL query failed")?;
        parse_bindings(&body)
    }
}

impl ExistingItemLookup for SparqlClient {
    fn find_existing(&self, title_id: &TitleId) -> Result<Option<ExistingItem>> {
        let bindings = self.select(&existing_item_query(title_id))?;
        if bindings.len() > 1 {
            info!(
                title_id = %title_id,
                matches = bindings.len(),
                "several Wikidata items share this BHL title ID; reporting the first"
            );
        }
        Ok(existing_item_from_bindings(&bindings))
    }
}

impl EntityLookup for SparqlClient {
    fn lookup_entity(&self, property: &str, value: &str) -> Result<Option<String>> {
        let query = entity_lookup_query(property, value)?;
        let bindings = self.select(&query)?;
        let qid = bindings
            .first()
            .and_then(|binding| binding.get("item"))
            .and_then(|item| qid_from_entity_uri(&item.value));
        debug!(property, value, qid = qid.as_deref().unwrap_or(""), "entity lookup");
        Ok(qid)
    }
}

pub fn existing_item_query(title_id: &TitleId) -> String {
    format!(
        "SELECT ?item ?itemLabel WHERE {{\n  ?item wdt:{PROP_BHL_TITLE_ID} {} .\n  SERVICE wikibase:label {{ bd:serviceParam wikibase:language \"{LABEL_LANGUAGES}\". }}\n}}",
        sparql_string(title_id.as_str())
    )
}

pub fn entity_lookup_query(property: &str, value: &str) -> Result<String> {
    if !is_property_code(property) {
        bail!("invalid Wikidata property code: {property}");
    }
    Ok(format!(
        "SELECT ?item WHERE {{\n  ?item wdt:{property} {} .\n}}\nLIMIT 1",
        sparql_string(value)
    ))
}

pub fn parse_bindings(body: &str) -> Result<Vec<Binding>> {
    let response: SparqlResponse =
        serde_json::from_str(body).context("failed to decode SPARQL JSON response")?;
    Ok(response.results.bindings)
}

/// First binding as an [`ExistingItem`]; a missing label becomes empty.
pub fn existing_item_from_bindings(bindings: &[Binding]) -> Option<ExistingItem> {
    let first = bindings.first()?;
    let qid = qid_from_entity_uri(&first.get("item")?.value)?;
    let label = first
        .get("itemLabel")
        .map(|label| label.value.clone())
        .unwrap_or_default();
    Some(ExistingItem { qid, label })
}

/// `http://www.wikidata.org/entity/Q42` -> `Q42`.
pub fn qid_from_entity_uri(uri: &str) -> Option<String> {
    uri.trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|segment| !segment.is_empty())
        .map(ToString::to_string)
}

fn sparql_string(value: &str) -> String {
    let mut output = String::with_capacity(value.len() + 2);
    output.push('"');
    for ch in value.chars() {
        match ch {
            '\\' => output.push_str("\\\\"),
            '"' => output.push_str("\\\""),
            '\n' => output.push_str("\\n"),
            '\r' => output.push_str("\\r"),
            _ => output.push(ch),
        }
    }
    output.push('"');
    output
}

fn is_property_code(value: &str) -> bool {
    value
        .strip_prefix('P')
        .is_some_and(|digits| !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()))
}
