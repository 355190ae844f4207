use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub firecrawl: FirecrawlConfig,
    pub schema: SchemaConfig,
    pub log_format: LogFormat,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub bind_addr: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FirecrawlConfig {
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub base_url: String,
    pub request_timeout_secs: u64,
    pub poll_interval_ms: u64,
    pub poll_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaConfig {
    /// 0 means no limit
    pub max_fields: usize,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                bind_addr: "0.0.0.0:3000".to_string(),
            },
            firecrawl: FirecrawlConfig {
                api_key: None,
                base_url: extract::client::DEFAULT_BASE_URL.to_string(),
                request_timeout_secs: 60,
                poll_interval_ms: 1000,
                poll_timeout_secs: 120,
            },
            schema: SchemaConfig { max_fields: 5 },
            log_format: LogFormat::Text,
        }
    }
}

impl AppConfig {
    /// Load `.env` if present, then read the process environment
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let log_format = match get("LOG_FORMAT").as_deref() {
            None | Some("text") => LogFormat::Text,
            Some("json") => LogFormat::Json,
            Some(other) => anyhow::bail!("LOG_FORMAT must be 'text' or 'json', got '{}'", other),
        };

        Ok(Self {
            server: ServerConfig {
                bind_addr: get("BIND_ADDR").unwrap_or(defaults.server.bind_addr),
            },
            firecrawl: FirecrawlConfig {
                api_key: get("FIRECRAWL_API_KEY"),
                base_url: get("FIRECRAWL_API_URL").unwrap_or(defaults.firecrawl.base_url),
                request_timeout_secs: parse_or(
                    get("FIRECRAWL_TIMEOUT_SECS"),
                    "FIRECRAWL_TIMEOUT_SECS",
                    defaults.firecrawl.request_timeout_secs,
                )?,
                poll_interval_ms: parse_or(
                    get("FIRECRAWL_POLL_INTERVAL_MS"),
                    "FIRECRAWL_POLL_INTERVAL_MS",
                    defaults.firecrawl.poll_interval_ms,
                )?,
                poll_timeout_secs: parse_or(
                    get("FIRECRAWL_POLL_TIMEOUT_SECS"),
                    "FIRECRAWL_POLL_TIMEOUT_SECS",
                    defaults.firecrawl.poll_timeout_secs,
                )?,
            },
            schema: SchemaConfig {
                max_fields: parse_or(
                    get("MAX_SCHEMA_FIELDS"),
                    "MAX_SCHEMA_FIELDS",
                    defaults.schema.max_fields,
                )?,
            },
            log_format,
        })
    }

    pub fn build_client(&self) -> Result<extract::FirecrawlClient> {
        let fc = &self.firecrawl;
        let client = extract::FirecrawlClient::new(fc.api_key.clone())
            .context("Failed to create Firecrawl client")?
            .with_base_url(fc.base_url.clone())
            .with_request_timeout(Duration::from_secs(fc.request_timeout_secs))
            .context("Failed to create Firecrawl client")?
            .with_poll_interval(Duration::from_millis(fc.poll_interval_ms))
            .with_poll_timeout(Duration::from_secs(fc.poll_timeout_secs));
        Ok(client)
    }

    pub fn new_schema(&self) -> extract::SchemaBuilder {
        match self.schema.max_fields {
            0 => extract::SchemaBuilder::new(),
            limit => extract::SchemaBuilder::with_limit(limit),
        }
    }
}

fn parse_or<T>(value: Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match value {
        Some(raw) => raw
            .parse()
            .with_context(|| format!("{} must be a valid number, got '{}'", key, raw)),
        None => Ok(default),
    }
}
