//! Per-call accounting via the CallSink trait.
//!
//! The client reports every job-API call through a CallSink. This decouples
//! the client from any specific destination:
//! - The dashboard backend ships records to its metrics pipeline
//! - CLI tools use TracingCallSink or NoopCallSink
//! - Tests use NoopCallSink or a recording double

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::types::JobId;

/// Outcome of a job-API call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallOutcome {
    Success,
    Error,
}

impl CallOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallOutcome::Success => "success",
            CallOutcome::Error => "error",
        }
    }
}

/// Record of one job-API call.
#[derive(Debug, Clone)]
pub struct ApiCallRecord {
    /// Client-generated id for this call attempt, for correlation in
    /// downstream logs.
    pub call_id: Uuid,
    /// Operation name: "start_job", "job_status", "cancel_job", etc.
    pub operation: &'static str,
    /// Job the call was about, when the operation is job-scoped.
    pub job_id: Option<JobId>,
    /// Latency in milliseconds.
    pub latency_ms: i32,
    /// Call outcome.
    pub outcome: CallOutcome,
    /// Error code if the outcome is Error.
    pub error_code: Option<&'static str>,
    /// When the call was made.
    pub timestamp: DateTime<Utc>,
}

impl ApiCallRecord {
    pub fn new(operation: &'static str) -> Self {
        Self {
            call_id: Uuid::new_v4(),
            operation,
            job_id: None,
            latency_ms: 0,
            outcome: CallOutcome::Success,
            error_code: None,
            timestamp: Utc::now(),
        }
    }

    pub fn job(mut self, job_id: &JobId) -> Self {
        self.job_id = Some(job_id.clone());
        self
    }

    pub fn latency(mut self, ms: i32) -> Self {
        self.latency_ms = ms;
        self
    }

    pub fn error(mut self, code: &'static str) -> Self {
        self.outcome = CallOutcome::Error;
        self.error_code = Some(code);
        self
    }
}

/// Trait for recording job-API call outcomes.
///
/// Recording is fire-and-forget: sink failures are swallowed, never
/// propagated into the call path.
#[async_trait]
pub trait CallSink: Send + Sync {
    async fn record(&self, record: ApiCallRecord);
}

/// No-op sink that discards all records. Useful for tests and simple tools.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopCallSink;

#[async_trait]
impl CallSink for NoopCallSink {
    async fn record(&self, _record: ApiCallRecord) {
        // Discard
    }
}

/// Sink that emits each record as a tracing event.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingCallSink;

#[async_trait]
impl CallSink for TracingCallSink {
    async fn record(&self, record: ApiCallRecord) {
        match record.outcome {
            CallOutcome::Success => tracing::debug!(
                operation = record.operation,
                job_id = record.job_id.as_ref().map(|id| id.as_str()),
                latency_ms = record.latency_ms,
                "api call"
            ),
            CallOutcome::Error => tracing::warn!(
                operation = record.operation,
                job_id = record.job_id.as_ref().map(|id| id.as_str()),
                latency_ms = record.latency_ms,
                error_code = record.error_code,
                "api call failed"
            ),
        }
    }
}
