#![forbid(unsafe_code)]

//! # citescope
//!
//! Pipeline job orchestration and hierarchical result retrieval for
//! brand-citation analytics.
//!
//! A pipeline job runs on an external executor in three stages (category
//! generation → query expansion → multi-provider query execution). This
//! crate tracks one such job from the outside: it polls the job's status to
//! a terminal state, relays cancellation requests, and serves the job's
//! category → query → per-provider response tree through a lazy, per-node
//! cache. Everything is framework-independent state with explicit
//! subscription seams, so the live "run and watch" view, the history
//! browser, and the job-detail drill-down all sit on the same engine.

pub mod api;
pub mod joblist;
pub mod poller;
pub mod results;
pub mod session;

pub use api::{
    ApiError, CallSink, HttpJobApi, JobApi, JobClient, JobId, JobStatus, NoopCallSink,
    PipelineJob, StartJobRequest, TracingCallSink,
};
pub use joblist::{elapsed_seconds, filter_jobs, format_elapsed, StatusFilter};
pub use poller::{
    JobObserver, PollHandle, PollerConfig, PollingController, DEFAULT_POLL_INTERVAL,
};
pub use results::{NodeRef, NodeState, ResultCache, ResultObserver, RetryError};
pub use session::JobView;
