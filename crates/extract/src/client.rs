use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::{Duration, Instant};
use url::Url;

use crate::error::ExtractionError;
use crate::schema::SchemaContract;

pub const DEFAULT_BASE_URL: &str = "https://api.firecrawl.dev";

/// Sends one extraction request and hands back the service's payload.
///
/// Implementations make a single logical call per invocation and do not
/// retry. The payload is returned uninterpreted.
#[async_trait]
pub trait ExtractionClient: Send + Sync {
    async fn extract(
        &self,
        url: &str,
        prompt: &str,
        schema: Option<&SchemaContract>,
    ) -> Result<Value, ExtractionError>;
}

/// Check the caller's input before anything goes on the wire.
pub fn validate_request(url: &str, prompt: &str) -> Result<Url, ExtractionError> {
    let invalid = |reason: &str| ExtractionError::InvalidUrl {
        url: url.to_string(),
        reason: reason.to_string(),
    };

    let parsed = Url::parse(url.trim()).map_err(|e| invalid(&e.to_string()))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(invalid("scheme must be http or https"));
    }
    if parsed.host_str().is_none_or(str::is_empty) {
        return Err(invalid("missing host"));
    }
    if prompt.trim().is_empty() {
        return Err(ExtractionError::EmptyPrompt);
    }
    Ok(parsed)
}

#[derive(Clone)]
pub struct FirecrawlClient {
    base_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
    request_timeout: Duration,
    poll_interval: Duration,
    poll_timeout: Duration,
}

#[derive(Serialize)]
struct ExtractRequest<'a> {
    urls: Vec<&'a str>,
    prompt: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    schema: Option<Value>,
}

#[derive(Deserialize)]
struct ExtractResponse {
    #[serde(default = "default_success")]
    success: bool,
    id: Option<String>,
    status: Option<String>,
    data: Option<Value>,
    error: Option<String>,
}

fn default_success() -> bool {
    true
}

impl FirecrawlClient {
    pub fn new(api_key: Option<String>) -> Result<Self, ExtractionError> {
        let request_timeout = Duration::from_secs(60);
        Ok(Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            client: build_http_client(request_timeout)?,
            request_timeout,
            poll_interval: Duration::from_secs(1),
            poll_timeout: Duration::from_secs(120),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Per-request HTTP timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Result<Self, ExtractionError> {
        self.client = build_http_client(timeout)?;
        self.request_timeout = timeout;
        Ok(self)
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Deadline for an asynchronous extraction job to finish.
    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    fn api_key(&self) -> Result<&str, ExtractionError> {
        self.api_key
            .as_deref()
            .ok_or_else(|| ExtractionError::Auth("FIRECRAWL_API_KEY is not configured".to_string()))
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<ExtractResponse, ExtractionError> {
        let response = request
            .bearer_auth(self.api_key()?)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        let body = response.text().await.map_err(|e| self.transport_error(e))?;

        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(ExtractionError::Auth(
                error_message(&body).unwrap_or_else(|| status.to_string()),
            ));
        }
        if !status.is_success() {
            return Err(ExtractionError::Upstream {
                status: Some(status.as_u16()),
                message: error_message(&body).unwrap_or(body),
            });
        }

        let parsed: ExtractResponse = serde_json::from_str(&body)
            .map_err(|e| ExtractionError::MalformedResponse(e.to_string()))?;

        if !parsed.success {
            return Err(ExtractionError::Upstream {
                status: Some(status.as_u16()),
                message: parsed
                    .error
                    .unwrap_or_else(|| "request was not successful".to_string()),
            });
        }
        Ok(parsed)
    }

    fn transport_error(&self, e: reqwest::Error) -> ExtractionError {
        if e.is_timeout() {
            ExtractionError::Timeout {
                after: self.request_timeout,
            }
        } else {
            ExtractionError::Transport(e.to_string())
        }
    }

    async fn poll_job(&self, job_id: &str) -> Result<Value, ExtractionError> {
        let url = format!("{}/v1/extract/{}", self.base_url, job_id);
        let started = Instant::now();

        loop {
            if started.elapsed() >= self.poll_timeout {
                return Err(ExtractionError::Timeout {
                    after: self.poll_timeout,
                });
            }
            tokio::time::sleep(self.poll_interval).await;

            let status = self.send(self.client.get(&url)).await?;
            match status.status.as_deref() {
                Some("completed") => {
                    return status.data.ok_or_else(|| {
                        ExtractionError::MalformedResponse(
                            "completed job returned no data".to_string(),
                        )
                    });
                }
                Some(state @ ("failed" | "cancelled")) => {
                    return Err(ExtractionError::Upstream {
                        status: None,
                        message: status
                            .error
                            .unwrap_or_else(|| format!("extraction job {state}")),
                    });
                }
                other => {
                    tracing::debug!(job_id, status = ?other, "Extraction job still running");
                }
            }
        }
    }
}

#[async_trait]
impl ExtractionClient for FirecrawlClient {
    async fn extract(
        &self,
        url: &str,
        prompt: &str,
        schema: Option<&SchemaContract>,
    ) -> Result<Value, ExtractionError> {
        let target = validate_request(url, prompt)?;
        self.api_key()?;

        tracing::info!(url = %target, schema_fields = schema.map_or(0, |s| s.fields().len()), "Starting extraction");

        let body = ExtractRequest {
            urls: vec![target.as_str()],
            prompt: prompt.trim(),
            schema: schema.map(SchemaContract::to_json_schema),
        };
        let endpoint = format!("{}/v1/extract", self.base_url);
        let response = self.send(self.client.post(&endpoint).json(&body)).await?;

        let data = match (response.data, response.id) {
            (Some(data), _) => data,
            (None, Some(job_id)) => {
                tracing::info!(job_id = %job_id, "Extraction queued, polling for results");
                self.poll_job(&job_id).await?
            }
            (None, None) => {
                return Err(ExtractionError::MalformedResponse(
                    "response carried neither data nor a job id".to_string(),
                ));
            }
        };

        tracing::info!(url = %target, "Extraction completed");
        Ok(data)
    }
}

fn build_http_client(timeout: Duration) -> Result<reqwest::Client, ExtractionError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| ExtractionError::Transport(e.to_string()))
}

/// Pull `error` (or `message`) out of an error body, if it is JSON.
fn error_message(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    value
        .get("error")
        .or_else(|| value.get("message"))
        .and_then(Value::as_str)
        .map(str::to_string)
}
