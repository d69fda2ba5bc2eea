//! One open job view: a polling attachment plus its result cache.
//!
//! The view is the ownership boundary the rest of the crate reasons about:
//! the job snapshot and the result tree belong to exactly one open view, and
//! closing the view detaches the poller and discards the cache whole.

use std::sync::Arc;

use crate::api::{ApiError, JobId, PipelineJob, StartJobRequest};
use crate::poller::{JobObserver, PollHandle, PollingController};
use crate::results::{ResultCache, ResultObserver};

pub struct JobView {
    handle: PollHandle,
    results: Arc<ResultCache>,
}

impl JobView {
    /// Open a view over an existing job: attach status polling and create an
    /// empty result cache for lazy expansion.
    pub fn open(
        poller: &PollingController,
        job_id: JobId,
        observer: Arc<dyn JobObserver>,
    ) -> Self {
        let results = Arc::new(ResultCache::new(poller.api(), job_id.clone()));
        let handle = poller.attach(job_id, observer);
        Self { handle, results }
    }

    /// Like [`JobView::open`], with a subscriber for result-tree changes.
    pub fn open_with_result_observer(
        poller: &PollingController,
        job_id: JobId,
        observer: Arc<dyn JobObserver>,
        result_observer: Arc<dyn ResultObserver>,
    ) -> Self {
        let results = Arc::new(
            ResultCache::new(poller.api(), job_id.clone()).with_observer(result_observer),
        );
        let handle = poller.attach(job_id, observer);
        Self { handle, results }
    }

    /// Start a new job and open a view over it in one step.
    pub async fn start(
        poller: &PollingController,
        req: &StartJobRequest,
        observer: Arc<dyn JobObserver>,
    ) -> Result<Self, ApiError> {
        let started = poller.api().start_job(req).await?;
        Ok(Self::open(poller, started.job_id, observer))
    }

    pub fn job_id(&self) -> &JobId {
        self.handle.job_id()
    }

    pub fn results(&self) -> &Arc<ResultCache> {
        &self.results
    }

    /// Most recent server-confirmed job record.
    pub fn latest(&self) -> Option<PipelineJob> {
        self.handle.latest()
    }

    /// Whether the view is still polling (false after detach or terminal).
    pub fn is_watching(&self) -> bool {
        self.handle.is_attached()
    }

    /// Ask the executor to cancel the job; the follow-up status fetch is the
    /// authority on what actually happened.
    pub async fn request_cancel(&self) -> Result<(), ApiError> {
        self.handle.request_cancel().await
    }

    /// Close the view. Polling detaches and the cached result tree goes with
    /// the view; already-fetched data is never shared across views.
    pub fn close(self) {
        self.handle.detach();
    }
}
