use std::env;
use std::fmt;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

pub const DEFAULT_BHL_API_URL: &str = "https://www.biodiversitylibrary.org/api3";
pub const DEFAULT_SPARQL_URL: &str = "https://query.wikidata.org/sparql";
pub const DEFAULT_USER_AGENT: &str = concat!("bhl2wd/", env!("CARGO_PKG_VERSION"));
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_ADDR: &str = "127.0.0.1:5000";
pub const DEFAULT_CONFIG_FILENAME: &str = "bhl2wd.toml";

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct FileConfig {
    #[serde(default)]
    pub bhl: BhlSection,
    #[serde(default)]
    pub wikidata: WikidataSection,
    #[serde(default)]
    pub http: HttpSection,
    #[serde(default)]
    pub server: ServerSection,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct BhlSection {
    pub api_key: Option<String>,
    pub api_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct WikidataSection {
    pub sparql_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct HttpSection {
    pub user_agent: Option<String>,
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct ServerSection {
    pub addr: Option<String>,
}

/// Load and parse a FileConfig from a TOML file. Returns default if file doesn't exist.
pub fn load_file_config(config_path: &Path) -> Result<FileConfig> {
    if !config_path.exists() {
        return Ok(FileConfig::default());
    }
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    let parsed: FileConfig = toml::from_str(&content)
        .with_context(|| format!("failed to parse {}", config_path.display()))?;
    Ok(parsed)
}

/// Settings every outbound call shares.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpSettings {
    pub user_agent: String,
    pub timeout_ms: u64,
}

/// Resolved runtime configuration, passed explicitly to clients and the server.
#[derive(Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub bhl_api_key: String,
    pub bhl_api_url: String,
    pub sparql_url: String,
    pub http: HttpSettings,
    pub bind_addr: String,
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppConfig")
            .field("bhl_api_key", &"<redacted>")
            .field("bhl_api_url", &self.bhl_api_url)
            .field("sparql_url", &self.sparql_url)
            .field("http", &self.http)
            .field("bind_addr", &self.bind_addr)
            .finish()
    }
}

impl AppConfig {
    /// Resolve from the process environment: env > file > default.
    pub fn from_env(file: &FileConfig) -> Result<Self> {
        Self::resolve_with_lookup(file, |key| env::var(key).ok())
    }

    pub fn resolve_with_lookup<F>(file: &FileConfig, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let bhl_api_key = match non_empty("BHL_API_KEY").or_else(|| {
            file.bhl
                .api_key
                .as_deref()
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(ToString::to_string)
        }) {
            Some(key) => key,
            None => bail!(
                "BHL_API_KEY is required (set it in the environment, a .env file, or [bhl].api_key)"
            ),
        };

        let bhl_api_url = non_empty("BHL_API_URL")
            .or_else(|| file.bhl.api_url.clone())
            .unwrap_or_else(|| DEFAULT_BHL_API_URL.to_string());
        let sparql_url = non_empty("WIKIDATA_SPARQL_URL")
            .or_else(|| file.wikidata.sparql_url.clone())
            .unwrap_or_else(|| DEFAULT_SPARQL_URL.to_string());
        let user_agent = non_empty("BHL2WD_USER_AGENT")
            .or_else(|| file.http.user_agent.clone())
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string());
        let timeout_ms = non_empty("BHL2WD_HTTP_TIMEOUT_MS")
            .and_then(|value| value.parse::<u64>().ok())
            .or(file.http.timeout_ms)
            .unwrap_or(DEFAULT_TIMEOUT_MS);
        let bind_addr = non_empty("BHL2WD_ADDR")
            .or_else(|| file.server.addr.clone())
            .unwrap_or_else(|| DEFAULT_ADDR.to_string());

        Ok(Self {
            bhl_api_key,
            bhl_api_url,
            sparql_url,
            http: HttpSettings {
                user_agent,
                timeout_ms,
            },
            bind_addr,
        })
    }

    pub fn diagnostics(&self) -> String {
        format!(
            "bhl_api_url={}\nbhl_api_key={}\nsparql_url={}\nuser_agent={}\ntimeout_ms={}\nbind_addr={}",
            self.bhl_api_url,
            mask_secret(&self.bhl_api_key),
            self.sparql_url,
            self.http.user_agent,
            self.http.timeout_ms,
            self.bind_addr
        )
    }
}

fn mask_secret(value: &str) -> String {
    let length = value.chars().count();
    if length <= 8 {
        return "****".to_string();
    }
    format!("****{}", value.chars().skip(length - 4).collect::<String>())
}

#[cfg(test)]
impl AppConfig {
    /// Both services under one local base URL, short timeout.
    pub(crate) fn for_base_url(base_url: &str) -> Self {
        Self {
            bhl_api_key: "KEY".to_string(),
            bhl_api_url: format!("{base_url}/api3"),
            sparql_url: format!("{base_url}/sparql"),
            http: HttpSettings {
                user_agent: "bhl2wd-test".to_string(),
                timeout_ms: 2_000,
            },
            bind_addr: "127.0.0.1:0".to_string(),
        }
    }
}
