//! Status polling for a single pipeline job.
//!
//! One attachment owns one polling loop: fetch the job record on a fixed
//! interval, hand every fresh record to the observer, stop at the first
//! terminal status. The poller only observes the executor's state machine;
//! it never infers or forces a transition locally.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

use crate::api::{ApiError, JobApi, JobId, PipelineJob};

/// Reference polling interval while a job is non-terminal.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(2000);

#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// Fixed delay between status fetches. No backoff.
    pub interval: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

/// Subscriber to one job's polled status.
#[async_trait]
pub trait JobObserver: Send + Sync {
    /// Fires once per successful fetch with the full job record.
    async fn on_update(&self, job: &PipelineJob);

    /// Fires exactly once, the first time a fetch returns a terminal status.
    /// No further fetches are issued for the attachment afterwards.
    async fn on_terminal(&self, job: &PipelineJob);

    /// A single fetch failed. Polling continues; a network blip must not
    /// lose track of a still-running job.
    async fn on_poll_error(&self, _error: &ApiError) {}
}

/// Starts polling attachments against a job API.
pub struct PollingController {
    api: Arc<dyn JobApi>,
    config: PollerConfig,
}

impl PollingController {
    pub fn new(api: Arc<dyn JobApi>) -> Self {
        Self {
            api,
            config: PollerConfig::default(),
        }
    }

    pub fn with_config(api: Arc<dyn JobApi>, config: PollerConfig) -> Self {
        Self { api, config }
    }

    pub fn api(&self) -> Arc<dyn JobApi> {
        Arc::clone(&self.api)
    }

    /// Begin polling `job_id`. The first fetch happens immediately, not
    /// after one interval delay.
    pub fn attach(&self, job_id: JobId, observer: Arc<dyn JobObserver>) -> PollHandle {
        let attachment = Arc::new(Attachment {
            api: Arc::clone(&self.api),
            job_id,
            observer,
            stopped: AtomicBool::new(false),
            terminal_seen: AtomicBool::new(false),
            latest: Mutex::new(None),
        });

        let task = tokio::spawn(poll_loop(Arc::clone(&attachment), self.config.interval));

        PollHandle { attachment, task }
    }
}

/// Handle to one polling attachment. Dropping the handle detaches.
pub struct PollHandle {
    attachment: Arc<Attachment>,
    task: JoinHandle<()>,
}

impl PollHandle {
    pub fn job_id(&self) -> &JobId {
        &self.attachment.job_id
    }

    /// Whether the attachment is still polling. False once detached or once
    /// a terminal status stopped the loop.
    pub fn is_attached(&self) -> bool {
        self.attachment.is_attached()
    }

    /// Most recent server-confirmed job record, if any fetch has succeeded.
    pub fn latest(&self) -> Option<PipelineJob> {
        self.attachment
            .latest
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Stop polling immediately. Idempotent; safe after auto-stop. Any
    /// in-flight fetch result is discarded rather than dispatched.
    pub fn detach(&self) {
        self.attachment.stopped.store(true, Ordering::Release);
        self.task.abort();
    }

    /// Ask the executor to cancel the job, then perform one follow-up status
    /// fetch so the local record reflects the executor's authoritative
    /// post-cancel status.
    ///
    /// Cancellation is a request, not a guarantee: the job may still finish
    /// `completed` if the executor got there first. The next polled status
    /// is ground truth, not the act of calling cancel.
    pub async fn request_cancel(&self) -> Result<(), ApiError> {
        self.attachment.api.cancel_job(&self.attachment.job_id).await?;
        if self.attachment.is_attached() {
            self.attachment.poll_once().await;
        }
        Ok(())
    }
}

impl Drop for PollHandle {
    fn drop(&mut self) {
        self.detach();
    }
}

struct Attachment {
    api: Arc<dyn JobApi>,
    job_id: JobId,
    observer: Arc<dyn JobObserver>,
    /// Set on detach and on terminal auto-stop. Checked before every fetch
    /// and again before every dispatch.
    stopped: AtomicBool,
    terminal_seen: AtomicBool,
    latest: Mutex<Option<PipelineJob>>,
}

impl Attachment {
    fn is_attached(&self) -> bool {
        !self.stopped.load(Ordering::Acquire)
    }

    /// One fetch plus dispatch. Returns true when polling should stop.
    async fn poll_once(&self) -> bool {
        let result = self.api.job_status(&self.job_id).await;

        // A result that lands after detachment is discarded, not applied.
        if !self.is_attached() {
            return true;
        }

        match result {
            Ok(job) => self.apply(job).await,
            Err(err) => {
                tracing::warn!(
                    job_id = %self.job_id,
                    error = %err,
                    "status poll failed; continuing"
                );
                self.observer.on_poll_error(&err).await;
                false
            }
        }
    }

    /// Store and dispatch a freshly fetched record. Returns true once the
    /// attachment has reached its terminal stop.
    async fn apply(&self, job: PipelineJob) -> bool {
        let accepted = {
            let mut latest = self
                .latest
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            // Terminal is a one-way trapdoor: a late result carrying an
            // earlier status never replaces a stored terminal record.
            if latest.as_ref().is_some_and(PipelineJob::is_terminal) {
                None
            } else {
                *latest = Some(job.clone());
                Some(job)
            }
        };

        let Some(job) = accepted else {
            self.stopped.store(true, Ordering::Release);
            return true;
        };

        self.observer.on_update(&job).await;

        if job.is_terminal() {
            self.stopped.store(true, Ordering::Release);
            if !self.terminal_seen.swap(true, Ordering::AcqRel) {
                self.observer.on_terminal(&job).await;
            }
            return true;
        }

        false
    }
}

async fn poll_loop(attachment: Arc<Attachment>, period: Duration) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        // The first tick completes immediately, so callers see state without
        // an artificial stall.
        ticker.tick().await;
        if !attachment.is_attached() {
            break;
        }
        if attachment.poll_once().await {
            break;
        }
    }
}
