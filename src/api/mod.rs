//! Client surface for the pipeline job API.

pub mod error;
pub mod http;
pub mod record;
pub mod types;

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::time::sleep;

use record::{ApiCallRecord, CallSink as CallSinkTrait};

pub use error::{ApiError, ErrorContext};
pub use http::HttpJobApi;
pub use record::{CallOutcome, CallSink, NoopCallSink, TracingCallSink};
pub use types::*;

/// The seven operations the job executor exposes.
///
/// Implemented by [`HttpJobApi`] in production and by in-process doubles in
/// tests; [`JobClient`] wraps any implementation with retries.
#[async_trait::async_trait]
pub trait JobApi: Send + Sync {
    async fn start_job(&self, req: &StartJobRequest) -> Result<StartJobResponse, ApiError>;
    async fn job_status(&self, job_id: &JobId) -> Result<PipelineJob, ApiError>;
    async fn cancel_job(&self, job_id: &JobId) -> Result<(), ApiError>;
    async fn list_jobs(&self, page: PageRequest) -> Result<JobPage, ApiError>;
    async fn job_categories(&self, job_id: &JobId) -> Result<Vec<Category>, ApiError>;
    async fn job_queries(
        &self,
        job_id: &JobId,
        category_id: Option<&CategoryId>,
    ) -> Result<Vec<ExpandedQuery>, ApiError>;
    async fn query_responses(&self, query_id: &QueryId) -> Result<Vec<RawLLMResponse>, ApiError>;
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub max_retries: u32,
    pub retry_base_delay: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            retry_base_delay: Duration::from_secs(1),
        }
    }
}

/// Retrying decorator over a [`JobApi`].
///
/// Retries only errors classified retryable, with exponential backoff, and
/// reports every attempt to the [`CallSink`]. The poller does not need this
/// wrapper (it tolerates individual fetch failures on its own), but one-shot
/// callers (start, expansion, listing) usually want it.
pub struct JobClient<S: CallSinkTrait> {
    api: Arc<dyn JobApi>,
    call_sink: Arc<S>,
    config: ClientConfig,
}

impl<S: CallSinkTrait> JobClient<S> {
    pub fn new(api: Arc<dyn JobApi>, call_sink: Arc<S>) -> Self {
        Self {
            api,
            call_sink,
            config: ClientConfig::default(),
        }
    }

    pub fn with_config(api: Arc<dyn JobApi>, call_sink: Arc<S>, config: ClientConfig) -> Self {
        Self {
            api,
            call_sink,
            config,
        }
    }

    async fn with_retries<T, F, Fut>(
        &self,
        operation: &'static str,
        job_id: Option<&JobId>,
        mut call: F,
    ) -> Result<T, ApiError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        let mut last_error: Option<ApiError> = None;

        for attempt in 0..=self.config.max_retries {
            let start = Instant::now();
            let result = call().await;
            let latency_ms = start.elapsed().as_millis() as i32;

            match result {
                Ok(value) => {
                    self.record(operation, job_id, latency_ms, None).await;
                    return Ok(value);
                }
                Err(err) => {
                    self.record(operation, job_id, latency_ms, Some(err.code()))
                        .await;

                    if !err.is_retryable() || attempt == self.config.max_retries {
                        return Err(err);
                    }

                    let delay = backoff_delay(self.config.retry_base_delay, attempt);
                    last_error = Some(err);
                    sleep(delay).await;
                }
            }
        }

        Err(last_error.unwrap_or_else(|| ApiError::server("unknown error", false)))
    }

    async fn record(
        &self,
        operation: &'static str,
        job_id: Option<&JobId>,
        latency_ms: i32,
        error_code: Option<&'static str>,
    ) {
        let mut record = ApiCallRecord::new(operation).latency(latency_ms);
        if let Some(job_id) = job_id {
            record = record.job(job_id);
        }
        if let Some(code) = error_code {
            record = record.error(code);
        }
        self.call_sink.record(record).await;
    }
}

#[async_trait::async_trait]
impl<S: CallSinkTrait> JobApi for JobClient<S> {
    async fn start_job(&self, req: &StartJobRequest) -> Result<StartJobResponse, ApiError> {
        self.with_retries("start_job", None, || self.api.start_job(req))
            .await
    }

    async fn job_status(&self, job_id: &JobId) -> Result<PipelineJob, ApiError> {
        self.with_retries("job_status", Some(job_id), || self.api.job_status(job_id))
            .await
    }

    async fn cancel_job(&self, job_id: &JobId) -> Result<(), ApiError> {
        self.with_retries("cancel_job", Some(job_id), || self.api.cancel_job(job_id))
            .await
    }

    async fn list_jobs(&self, page: PageRequest) -> Result<JobPage, ApiError> {
        self.with_retries("list_jobs", None, || self.api.list_jobs(page))
            .await
    }

    async fn job_categories(&self, job_id: &JobId) -> Result<Vec<Category>, ApiError> {
        self.with_retries("job_categories", Some(job_id), || {
            self.api.job_categories(job_id)
        })
        .await
    }

    async fn job_queries(
        &self,
        job_id: &JobId,
        category_id: Option<&CategoryId>,
    ) -> Result<Vec<ExpandedQuery>, ApiError> {
        self.with_retries("job_queries", Some(job_id), || {
            self.api.job_queries(job_id, category_id)
        })
        .await
    }

    async fn query_responses(&self, query_id: &QueryId) -> Result<Vec<RawLLMResponse>, ApiError> {
        self.with_retries("query_responses", None, || {
            self.api.query_responses(query_id)
        })
        .await
    }
}

fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let multiplier = 2u64.pow(attempt.min(5));
    base * multiplier as u32
}
