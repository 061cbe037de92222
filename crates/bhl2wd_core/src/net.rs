use std::time::Duration;

use anyhow::{Context, Result, bail};
use reqwest::Url;
use reqwest::blocking::Client;
use tracing::debug;

use crate::config::HttpSettings;

/// Blocking HTTP client shared by the BHL and Wikidata adapters.
///
/// One request per call, no retries. The timeout from [`HttpSettings`] bounds
/// every round trip.
pub struct HttpClient {
    client: Client,
    user_agent: String,
}

impl HttpClient {
    pub fn new(settings: &HttpSettings) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(settings.timeout_ms))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            client,
            user_agent: settings.user_agent.clone(),
        })
    }

    /// GET `url` with query `params` and return the body of a 2xx response.
    pub fn get_text(&self, url: &str, params: &[(&str, String)], accept: &str) -> Result<String> {
        let base_url = Url::parse(url).with_context(|| format!("invalid endpoint URL: {url}"))?;
        let endpoint = display_endpoint(&base_url);

        let response = self
            .client
            .get(base_url)
            .header("User-Agent", self.user_agent.clone())
            .header("Accept", accept)
            .query(params)
            .send()
            .with_context(|| format!("failed to reach {endpoint}"))?;

        let status = response.status();
        debug!(%endpoint, status = status.as_u16(), "external response");
        if !status.is_success() {
            bail!("HTTP {} from {}", status.as_u16(), endpoint);
        }
        response
            .text()
            .with_context(|| format!("failed to read response body from {endpoint}"))
    }
}

/// Endpoint without query string, safe to log next to secrets-bearing requests.
fn display_endpoint(url: &Url) -> String {
    let mut url = url.clone();
    url.set_query(None);
    url.to_string()
}
