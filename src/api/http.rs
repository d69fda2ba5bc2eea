//! HTTP adapter for the pipeline job API.

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use super::error::{ApiError, ErrorContext};
use super::types::*;
use super::JobApi;

/// Maximum allowed response body length (4MB). Response lists carry full
/// LLM answer texts, so the ceiling is higher than a status fetch needs.
const MAX_RESPONSE_LEN: usize = 4 * 1_024 * 1_024;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Stateless HTTP client for the job executor's API.
#[derive(Debug, Clone)]
pub struct HttpJobApi {
    client: reqwest::Client,
    base_url: String,
}

impl HttpJobApi {
    /// Create against a base URL with no auth token.
    pub fn new(base_url: impl Into<String>) -> Result<Self, ApiError> {
        Self::with_config(base_url, None, DEFAULT_TIMEOUT)
    }

    /// Create from environment variables.
    pub fn from_env() -> Result<Self, ApiError> {
        let base_url = std::env::var("CITESCOPE_API_BASE_URL")
            .map_err(|_| ApiError::config("CITESCOPE_API_BASE_URL not set"))?;

        let token = std::env::var("CITESCOPE_API_TOKEN").ok();

        let timeout = std::env::var("CITESCOPE_API_TIMEOUT_SECONDS")
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_TIMEOUT);

        Self::with_config(base_url, token, timeout)
    }

    /// Create with custom configuration.
    pub fn with_config(
        base_url: impl Into<String>,
        token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, ApiError> {
        let base_url = base_url.into();

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        if let Some(token) = token {
            let auth_value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|_| ApiError::config("Invalid API token format"))?;
            headers.insert(AUTHORIZATION, auth_value);
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .gzip(true)
            .build()
            .map_err(|e| ApiError::config(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }

    /// Extract request ID from response headers.
    fn extract_request_id(headers: &HeaderMap) -> Option<String> {
        headers
            .get("x-request-id")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string())
    }

    async fn execute<T: DeserializeOwned>(
        &self,
        builder: reqwest::RequestBuilder,
    ) -> Result<T, ApiError> {
        let body = self.execute_raw(builder).await?;
        serde_json::from_str(&body.text).map_err(|e| {
            ApiError::malformed(
                format!("Invalid JSON: {e}"),
                body.context,
            )
        })
    }

    /// Issue the request, enforce the size ceiling, and map non-2xx
    /// responses into ApiError. Returns the raw body for the caller to parse.
    async fn execute_raw(
        &self,
        builder: reqwest::RequestBuilder,
    ) -> Result<RawBody, ApiError> {
        let mut response = builder.send().await?;

        let status = response.status();
        let request_id = Self::extract_request_id(response.headers());

        // Stream response to enforce size limit
        let mut bytes = Vec::new();
        while let Some(chunk) = response.chunk().await? {
            let new_len = bytes.len() + chunk.len();
            if new_len > MAX_RESPONSE_LEN {
                return Err(ApiError::server(
                    format!("Response too large: {new_len} bytes"),
                    false,
                ));
            }
            bytes.extend_from_slice(&chunk);
        }

        let text = String::from_utf8_lossy(&bytes).to_string();

        let ctx = ErrorContext::new().with_status(status.as_u16());
        let ctx = if let Some(id) = &request_id {
            ctx.with_request_id(id)
        } else {
            ctx
        };

        if !status.is_success() {
            // Try to parse the server's error envelope
            let (message, ctx) = match serde_json::from_str::<ErrorEnvelope>(&text) {
                Ok(envelope) => {
                    let detail = envelope.error;
                    let message = detail.message.unwrap_or_else(|| format!("HTTP {status}"));
                    let ctx = if let Some(code) = detail.code {
                        ctx.with_code(&code)
                    } else {
                        ctx
                    };
                    (message, ctx)
                }
                Err(_) => (format!("HTTP {}", status.as_u16()), ctx),
            };

            return Err(match status.as_u16() {
                404 => ApiError::not_found(message, ctx),
                400 | 422 => ApiError::InvalidRequest {
                    message,
                    context: Some(ctx),
                },
                code => ApiError::server_with_context(message, code >= 500, ctx),
            });
        }

        Ok(RawBody { text, context: ctx })
    }
}

struct RawBody {
    text: String,
    context: ErrorContext,
}

/// Server error envelope: `{ "error": { "message": ..., "code": ... } }`.
#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    message: Option<String>,
    code: Option<String>,
}

#[async_trait::async_trait]
impl JobApi for HttpJobApi {
    async fn start_job(&self, req: &StartJobRequest) -> Result<StartJobResponse, ApiError> {
        if req.llm_providers.is_empty() {
            return Err(ApiError::invalid_request(
                "llmProviders must not be empty",
            ));
        }
        if req.category_count == 0 || req.queries_per_category == 0 {
            return Err(ApiError::invalid_request(
                "categoryCount and queriesPerCategory must be positive",
            ));
        }

        self.execute(self.client.post(self.url("pipeline/start")).json(req))
            .await
    }

    async fn job_status(&self, job_id: &JobId) -> Result<PipelineJob, ApiError> {
        self.execute(
            self.client
                .get(self.url(&format!("pipeline/jobs/{job_id}/status"))),
        )
        .await
    }

    async fn cancel_job(&self, job_id: &JobId) -> Result<(), ApiError> {
        // The ack body carries nothing authoritative; the post-cancel status
        // fetch is where the outcome is observed.
        self.execute_raw(
            self.client
                .post(self.url(&format!("pipeline/jobs/{job_id}/cancel"))),
        )
        .await?;
        Ok(())
    }

    async fn list_jobs(&self, page: PageRequest) -> Result<JobPage, ApiError> {
        self.execute(
            self.client
                .get(self.url("pipeline/jobs"))
                .query(&[("limit", page.limit), ("offset", page.offset)]),
        )
        .await
    }

    async fn job_categories(&self, job_id: &JobId) -> Result<Vec<Category>, ApiError> {
        let envelope: CategoryListResponse = self
            .execute(
                self.client
                    .get(self.url(&format!("pipeline/jobs/{job_id}/categories"))),
            )
            .await?;
        Ok(envelope.categories)
    }

    async fn job_queries(
        &self,
        job_id: &JobId,
        category_id: Option<&CategoryId>,
    ) -> Result<Vec<ExpandedQuery>, ApiError> {
        let mut builder = self
            .client
            .get(self.url(&format!("pipeline/jobs/{job_id}/queries")));
        if let Some(category_id) = category_id {
            builder = builder.query(&[("categoryId", category_id.as_str())]);
        }
        let envelope: QueryListResponse = self.execute(builder).await?;
        Ok(envelope.queries)
    }

    async fn query_responses(&self, query_id: &QueryId) -> Result<Vec<RawLLMResponse>, ApiError> {
        let envelope: ResponseListResponse = self
            .execute(
                self.client
                    .get(self.url(&format!("pipeline/queries/{query_id}/responses"))),
            )
            .await?;
        Ok(envelope.responses)
    }
}
