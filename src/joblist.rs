//! Pure, read-only derivations over job history listings.
//!
//! Nothing here does I/O or mutates its inputs: the same list and filter
//! always produce the same view.

use chrono::{DateTime, Utc};

use crate::api::{JobStatus, PipelineJob};

/// Status bucket for browsing job history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StatusFilter {
    #[default]
    All,
    Completed,
    Failed,
    /// Everything non-terminal: pending, generating_categories,
    /// expanding_queries, executing_queries.
    Running,
}

impl StatusFilter {
    pub fn matches(&self, status: JobStatus) -> bool {
        match self {
            StatusFilter::All => true,
            StatusFilter::Completed => status == JobStatus::Completed,
            StatusFilter::Failed => status == JobStatus::Failed,
            StatusFilter::Running => status.is_running(),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StatusFilter::All => "all",
            StatusFilter::Completed => "completed",
            StatusFilter::Failed => "failed",
            StatusFilter::Running => "running",
        }
    }
}

impl std::str::FromStr for StatusFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "all" => Ok(StatusFilter::All),
            "completed" => Ok(StatusFilter::Completed),
            "failed" => Ok(StatusFilter::Failed),
            "running" => Ok(StatusFilter::Running),
            other => Err(format!("unknown status filter: {other}")),
        }
    }
}

/// Filter a job list by status bucket, preserving the input order.
pub fn filter_jobs(jobs: &[PipelineJob], filter: StatusFilter) -> Vec<&PipelineJob> {
    jobs.iter().filter(|job| filter.matches(job.status)).collect()
}

/// Wall-clock seconds a job has been (or was) running:
/// `(completed_at ?? now) - started_at`. Undefined when the job never
/// started.
pub fn elapsed_seconds(job: &PipelineJob, now: DateTime<Utc>) -> Option<i64> {
    let started = job.started_at?;
    let end = job.completed_at.unwrap_or(now);
    Some((end - started).num_seconds().max(0))
}

/// Display rule for elapsed time, minute granularity above one minute.
/// An undefined elapsed renders as zero.
pub fn format_elapsed(elapsed: Option<i64>) -> String {
    let seconds = elapsed.unwrap_or(0).max(0);
    if seconds >= 3600 {
        format!("{}시간 {}분", seconds / 3600, (seconds % 3600) / 60)
    } else if seconds >= 60 {
        format!("{}분", seconds / 60)
    } else {
        format!("{seconds}초")
    }
}
