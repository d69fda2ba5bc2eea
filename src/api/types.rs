//! Core types for the pipeline job API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// IDENTIFIERS
// =============================================================================

/// Opaque handle to a pipeline job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque handle to a query category.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CategoryId(pub String);

impl CategoryId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CategoryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque handle to an expanded query.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueryId(pub String);

impl QueryId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for QueryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// JOB STATUS
// =============================================================================

/// Stage of a pipeline job as reported by the job executor.
///
/// Transitions are driven entirely by the executor; this side only observes.
/// A poll may legally skip intermediate stages (e.g. `Pending` directly to
/// `Completed`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    GeneratingCategories,
    ExpandingQueries,
    ExecutingQueries,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// Whether this is a terminal status (no further transition occurs).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// Whether the job is still being worked on by the executor.
    pub fn is_running(&self) -> bool {
        !self.is_terminal()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::GeneratingCategories => "generating_categories",
            JobStatus::ExpandingQueries => "expanding_queries",
            JobStatus::ExecutingQueries => "executing_queries",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// JOB RECORD
// =============================================================================

/// One run of the multi-stage analysis pipeline.
///
/// The record is replaced wholesale on every successful status fetch, never
/// patched from client-side guesses, and becomes immutable once `status` is
/// terminal.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineJob {
    pub id: JobId,
    pub status: JobStatus,
    /// Providers selected when the job was started. Non-empty.
    pub llm_providers: Vec<String>,
    pub total_queries: u32,
    pub completed_queries: u32,
    pub failed_queries: u32,
    /// 0-100, non-decreasing while the job is non-terminal.
    pub progress_percentage: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// Set only once the job reaches a terminal status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Present only when `status` is `Failed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl PipelineJob {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Queries the executor has finished with, successfully or not.
    pub fn queries_settled(&self) -> u32 {
        self.completed_queries + self.failed_queries
    }

    /// Invariant check: settled queries never exceed the declared total.
    pub fn counts_consistent(&self) -> bool {
        self.queries_settled() <= self.total_queries
    }

    /// Fraction of settled queries that failed (0.0 when nothing settled).
    ///
    /// Partial failure is data, not an error: a completed job with a non-zero
    /// ratio is a normal outcome. Escalation thresholds are left to callers.
    pub fn failure_ratio(&self) -> f64 {
        let settled = self.queries_settled();
        if settled == 0 {
            0.0
        } else {
            f64::from(self.failed_queries) / f64::from(settled)
        }
    }
}

// =============================================================================
// RESULT TREE
// =============================================================================

/// A named grouping of queries sharing a persona/intent, generated by a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Category {
    pub id: CategoryId,
    pub job_id: JobId,
    pub name: String,
    pub persona_type: String,
    /// Declared count; may exceed the queries materialized so far.
    pub query_count: u32,
}

/// Execution state of one expanded query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryStatus {
    Pending,
    Executing,
    Completed,
    Failed,
    #[serde(other)]
    Unknown,
}

/// One concrete question text produced under a category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpandedQuery {
    pub id: QueryId,
    pub category_id: CategoryId,
    pub text: String,
    pub status: QueryStatus,
    pub response_count: u32,
}

/// One provider's answer to one expanded query.
///
/// `error_message` marks a provider-level failure for this one query/provider
/// pair. It is surfaced as data and does not affect sibling responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawLLMResponse {
    pub id: String,
    pub query_id: QueryId,
    pub provider: String,
    pub model: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens_used: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl RawLLMResponse {
    /// Whether this response records a provider failure rather than content.
    pub fn is_provider_failure(&self) -> bool {
        self.error_message.is_some()
    }
}

// =============================================================================
// WIRE ENVELOPES
// =============================================================================

/// Request to start a new pipeline job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartJobRequest {
    pub company_profile_id: String,
    pub category_count: u32,
    pub queries_per_category: u32,
    pub llm_providers: Vec<String>,
}

impl StartJobRequest {
    pub fn new(
        company_profile_id: impl Into<String>,
        category_count: u32,
        queries_per_category: u32,
        llm_providers: Vec<String>,
    ) -> Self {
        Self {
            company_profile_id: company_profile_id.into(),
            category_count,
            queries_per_category,
            llm_providers,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartJobResponse {
    pub job_id: JobId,
}

/// Pagination window for the job history listing.
#[derive(Debug, Clone, Copy)]
pub struct PageRequest {
    pub limit: u32,
    pub offset: u32,
}

impl PageRequest {
    pub fn new(limit: u32, offset: u32) -> Self {
        Self { limit, offset }
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            limit: 20,
            offset: 0,
        }
    }
}

/// One page of the job history listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobPage {
    pub jobs: Vec<PipelineJob>,
    pub total: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryListResponse {
    pub categories: Vec<Category>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryListResponse {
    pub queries: Vec<ExpandedQuery>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseListResponse {
    pub responses: Vec<RawLLMResponse>,
}
