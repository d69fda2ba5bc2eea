use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;

use citescope::api::{
    ApiError, Category, CategoryId, ExpandedQuery, JobApi, JobId, JobPage, PageRequest,
    PipelineJob, QueryId, RawLLMResponse, StartJobRequest, StartJobResponse,
};
use citescope::{JobObserver, JobStatus, PollerConfig, PollingController};

fn job(status: JobStatus) -> PipelineJob {
    PipelineJob {
        id: JobId::new("job-1"),
        status,
        llm_providers: vec!["openai".into()],
        total_queries: 10,
        completed_queries: if status.is_terminal() { 9 } else { 4 },
        failed_queries: if status.is_terminal() { 1 } else { 0 },
        progress_percentage: if status.is_terminal() { 100 } else { 40 },
        started_at: None,
        completed_at: None,
        error_message: None,
    }
}

/// One scripted status fetch: wait `delay`, then yield the result.
struct Step {
    delay: Duration,
    result: Result<JobStatus, ()>,
}

impl Step {
    fn ok(status: JobStatus) -> Self {
        Self {
            delay: Duration::ZERO,
            result: Ok(status),
        }
    }

    fn ok_after(status: JobStatus, delay: Duration) -> Self {
        Self {
            delay,
            result: Ok(status),
        }
    }

    fn fail() -> Self {
        Self {
            delay: Duration::ZERO,
            result: Err(()),
        }
    }
}

/// JobApi double that replays a scripted sequence of status fetches.
struct ScriptedApi {
    steps: Mutex<VecDeque<Step>>,
    status_fetches: AtomicUsize,
    cancels: AtomicUsize,
}

impl ScriptedApi {
    fn new(steps: Vec<Step>) -> Arc<Self> {
        Arc::new(Self {
            steps: Mutex::new(steps.into()),
            status_fetches: AtomicUsize::new(0),
            cancels: AtomicUsize::new(0),
        })
    }

    fn fetches(&self) -> usize {
        self.status_fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl JobApi for ScriptedApi {
    async fn start_job(&self, _req: &StartJobRequest) -> Result<StartJobResponse, ApiError> {
        Err(ApiError::server("not scripted", false))
    }

    async fn job_status(&self, _job_id: &JobId) -> Result<PipelineJob, ApiError> {
        self.status_fetches.fetch_add(1, Ordering::SeqCst);
        let step = self
            .steps
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Step::ok(JobStatus::Completed));
        tokio::time::sleep(step.delay).await;
        match step.result {
            Ok(status) => Ok(job(status)),
            Err(()) => Err(ApiError::server("transient blip", true)),
        }
    }

    async fn cancel_job(&self, _job_id: &JobId) -> Result<(), ApiError> {
        self.cancels.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn list_jobs(&self, _page: PageRequest) -> Result<JobPage, ApiError> {
        Err(ApiError::server("not scripted", false))
    }

    async fn job_categories(&self, _job_id: &JobId) -> Result<Vec<Category>, ApiError> {
        Err(ApiError::server("not scripted", false))
    }

    async fn job_queries(
        &self,
        _job_id: &JobId,
        _category_id: Option<&CategoryId>,
    ) -> Result<Vec<ExpandedQuery>, ApiError> {
        Err(ApiError::server("not scripted", false))
    }

    async fn query_responses(&self, _query_id: &QueryId) -> Result<Vec<RawLLMResponse>, ApiError> {
        Err(ApiError::server("not scripted", false))
    }
}

#[derive(Default)]
struct RecordingObserver {
    updates: Mutex<Vec<JobStatus>>,
    terminals: Mutex<Vec<JobStatus>>,
    poll_errors: AtomicUsize,
    done: Notify,
}

impl RecordingObserver {
    fn updates(&self) -> Vec<JobStatus> {
        self.updates.lock().unwrap().clone()
    }

    fn terminals(&self) -> Vec<JobStatus> {
        self.terminals.lock().unwrap().clone()
    }
}

#[async_trait]
impl JobObserver for RecordingObserver {
    async fn on_update(&self, job: &PipelineJob) {
        self.updates.lock().unwrap().push(job.status);
    }

    async fn on_terminal(&self, job: &PipelineJob) {
        self.terminals.lock().unwrap().push(job.status);
        self.done.notify_one();
    }

    async fn on_poll_error(&self, _error: &ApiError) {
        self.poll_errors.fetch_add(1, Ordering::SeqCst);
    }
}

fn fast_poller(api: Arc<ScriptedApi>) -> PollingController {
    PollingController::with_config(
        api,
        PollerConfig {
            interval: Duration::from_millis(10),
        },
    )
}

#[tokio::test]
async fn polls_through_every_stage_and_stops_at_terminal() {
    let api = ScriptedApi::new(vec![
        Step::ok(JobStatus::Pending),
        Step::ok(JobStatus::GeneratingCategories),
        Step::ok(JobStatus::ExpandingQueries),
        Step::ok(JobStatus::ExecutingQueries),
        Step::ok(JobStatus::Completed),
    ]);
    let observer = Arc::new(RecordingObserver::default());

    let handle = fast_poller(Arc::clone(&api)).attach(JobId::new("job-1"), observer.clone());

    observer.done.notified().await;
    // Give a stopped loop room to misbehave before asserting it didn't.
    tokio::time::sleep(Duration::from_millis(80)).await;

    assert_eq!(api.fetches(), 5, "no fetch may follow the terminal poll");
    assert_eq!(
        observer.updates(),
        vec![
            JobStatus::Pending,
            JobStatus::GeneratingCategories,
            JobStatus::ExpandingQueries,
            JobStatus::ExecutingQueries,
            JobStatus::Completed,
        ]
    );
    assert_eq!(observer.terminals(), vec![JobStatus::Completed]);
    assert!(!handle.is_attached());
    assert_eq!(handle.latest().unwrap().status, JobStatus::Completed);
}

#[tokio::test]
async fn first_fetch_is_immediate() {
    let api = ScriptedApi::new(vec![Step::ok(JobStatus::Pending)]);
    let observer = Arc::new(RecordingObserver::default());

    // An hour-long interval: only the immediate first fetch can happen.
    let poller = PollingController::with_config(
        Arc::clone(&api) as Arc<dyn JobApi>,
        PollerConfig {
            interval: Duration::from_secs(3600),
        },
    );
    let _handle = poller.attach(JobId::new("job-1"), observer.clone());

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(api.fetches(), 1);
    assert_eq!(observer.updates(), vec![JobStatus::Pending]);
}

#[tokio::test]
async fn skipping_intermediate_stages_is_legal() {
    let api = ScriptedApi::new(vec![
        Step::ok(JobStatus::Pending),
        Step::ok(JobStatus::Completed),
    ]);
    let observer = Arc::new(RecordingObserver::default());

    let _handle = fast_poller(Arc::clone(&api)).attach(JobId::new("job-1"), observer.clone());

    observer.done.notified().await;
    assert_eq!(observer.terminals(), vec![JobStatus::Completed]);
}

#[tokio::test]
async fn transient_fetch_failure_keeps_polling() {
    let api = ScriptedApi::new(vec![
        Step::ok(JobStatus::ExecutingQueries),
        Step::fail(),
        Step::fail(),
        Step::ok(JobStatus::Completed),
    ]);
    let observer = Arc::new(RecordingObserver::default());

    let _handle = fast_poller(Arc::clone(&api)).attach(JobId::new("job-1"), observer.clone());

    observer.done.notified().await;

    assert_eq!(observer.poll_errors.load(Ordering::SeqCst), 2);
    assert_eq!(
        observer.updates(),
        vec![JobStatus::ExecutingQueries, JobStatus::Completed]
    );
    assert_eq!(observer.terminals(), vec![JobStatus::Completed]);
}

#[tokio::test]
async fn detach_stops_polling_and_discards_inflight_result() {
    let api = ScriptedApi::new(vec![Step::ok_after(
        JobStatus::ExecutingQueries,
        Duration::from_millis(80),
    )]);
    let observer = Arc::new(RecordingObserver::default());

    let handle = fast_poller(Arc::clone(&api)).attach(JobId::new("job-1"), observer.clone());

    // Let the first fetch get in flight, then tear down.
    tokio::time::sleep(Duration::from_millis(20)).await;
    handle.detach();
    handle.detach(); // idempotent

    tokio::time::sleep(Duration::from_millis(150)).await;

    assert_eq!(api.fetches(), 1);
    assert!(observer.updates().is_empty(), "late result must be discarded");
    assert!(handle.latest().is_none());
    assert!(!handle.is_attached());
}

#[tokio::test]
async fn detach_is_safe_after_auto_stop() {
    let api = ScriptedApi::new(vec![Step::ok(JobStatus::Completed)]);
    let observer = Arc::new(RecordingObserver::default());

    let handle = fast_poller(Arc::clone(&api)).attach(JobId::new("job-1"), observer.clone());
    observer.done.notified().await;

    handle.detach();
    handle.detach();
    assert!(!handle.is_attached());
}

#[tokio::test]
async fn cancel_race_resolves_to_completed() {
    // The executor finished before the cancellation was observed: the
    // follow-up fetch reports completed, and that is the final status.
    let api = ScriptedApi::new(vec![
        Step::ok(JobStatus::ExecutingQueries),
        Step::ok(JobStatus::Completed),
    ]);
    let observer = Arc::new(RecordingObserver::default());

    let poller = PollingController::with_config(
        Arc::clone(&api) as Arc<dyn JobApi>,
        PollerConfig {
            interval: Duration::from_secs(3600),
        },
    );
    let handle = poller.attach(JobId::new("job-1"), observer.clone());

    tokio::time::sleep(Duration::from_millis(50)).await;
    handle.request_cancel().await.unwrap();

    assert_eq!(api.cancels.load(Ordering::SeqCst), 1);
    assert_eq!(handle.latest().unwrap().status, JobStatus::Completed);
    assert_eq!(observer.terminals(), vec![JobStatus::Completed]);
    assert!(!handle.is_attached());
}

#[tokio::test]
async fn terminal_status_is_absorbing() {
    // The loop's first fetch is slow and stale; a cancel follow-up lands a
    // terminal status while it is still in flight. The stale non-terminal
    // result must not displace the stored terminal record.
    let api = ScriptedApi::new(vec![
        Step::ok_after(JobStatus::ExecutingQueries, Duration::from_millis(120)),
        Step::ok(JobStatus::Cancelled),
    ]);
    let observer = Arc::new(RecordingObserver::default());

    let poller = PollingController::with_config(
        Arc::clone(&api) as Arc<dyn JobApi>,
        PollerConfig {
            interval: Duration::from_secs(3600),
        },
    );
    let handle = poller.attach(JobId::new("job-1"), observer.clone());

    // First fetch is in flight; the follow-up fetch completes first.
    tokio::time::sleep(Duration::from_millis(20)).await;
    handle.request_cancel().await.unwrap();
    assert_eq!(handle.latest().unwrap().status, JobStatus::Cancelled);

    // Wait out the stale fetch.
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(handle.latest().unwrap().status, JobStatus::Cancelled);
    assert_eq!(observer.updates(), vec![JobStatus::Cancelled]);
    assert_eq!(observer.terminals(), vec![JobStatus::Cancelled]);
}

#[tokio::test]
async fn cancel_after_stop_skips_the_followup_fetch() {
    let api = ScriptedApi::new(vec![Step::ok(JobStatus::Completed)]);
    let observer = Arc::new(RecordingObserver::default());

    let handle = fast_poller(Arc::clone(&api)).attach(JobId::new("job-1"), observer.clone());
    observer.done.notified().await;

    let fetches_before = api.fetches();
    handle.request_cancel().await.unwrap();

    // The cancel request itself still goes out; no status fetch follows a
    // stopped attachment.
    assert_eq!(api.cancels.load(Ordering::SeqCst), 1);
    assert_eq!(api.fetches(), fetches_before);
}
