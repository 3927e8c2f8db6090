//! Background execution of scrape jobs.
//!
//! The runner owns no job state. It reads and writes through [`JobStore`],
//! so the terminal guard there decides every race with `cancel`.

use std::sync::{Arc, Mutex, PoisonError};

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::job::{Job, JobStatus, JobUpdate};
use super::store::JobStore;
use crate::cancel::CancelToken;
use crate::config::Settings;
use crate::error::{Result, ScrapeError};
use crate::pipeline::pool::panic_message;
use crate::pipeline::{JobHooks, Pipeline, PipelineOptions};

/// What a job was asked to do. Stored on the job as its audit snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRequest {
    pub urls: Vec<String>,
    #[serde(default)]
    pub take_screenshot: bool,
    #[serde(default = "default_preserve_order")]
    pub preserve_order: bool,
}

fn default_preserve_order() -> bool {
    true
}

impl JobRequest {
    pub fn new(urls: Vec<String>) -> Self {
        Self {
            urls,
            take_screenshot: false,
            preserve_order: true,
        }
    }

    pub fn with_screenshots(mut self, take_screenshot: bool) -> Self {
        self.take_screenshot = take_screenshot;
        self
    }
}

// ============================================================================
// Progress Hooks
// ============================================================================

/// Writes pipeline progress onto a job record.
pub struct StoreProgressHooks {
    store: Arc<JobStore>,
    job_id: String,
}

impl StoreProgressHooks {
    pub fn new(store: Arc<JobStore>, job_id: impl Into<String>) -> Self {
        Self {
            store,
            job_id: job_id.into(),
        }
    }
}

impl JobHooks for StoreProgressHooks {
    fn on_progress(&self, done: usize, total: usize) {
        if total == 0 {
            return;
        }
        let progress = (done as f64 / total as f64).clamp(0.0, 1.0);
        if let Err(e) = self
            .store
            .update(&self.job_id, JobUpdate::new().with_progress(progress))
        {
            warn!(job_id = %self.job_id, error = %e, "Progress update rejected");
        }
    }

    fn on_error(&self, url: &str, error: &ScrapeError) {
        debug!(job_id = %self.job_id, url = %url, error = %error, "Item failed");
    }
}

// ============================================================================
// Runner
// ============================================================================

#[derive(Clone)]
enum Backend {
    Ready(Arc<Pipeline>),
    /// Jobs fail immediately with this message
    Unavailable(String),
}

/// Spawns one tokio task per submitted job.
pub struct JobRunner {
    store: Arc<JobStore>,
    backend: Backend,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl JobRunner {
    pub fn new(store: Arc<JobStore>, pipeline: Pipeline) -> Self {
        Self {
            store,
            backend: Backend::Ready(Arc::new(pipeline)),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Build the default pipeline for `settings`.
    ///
    /// Missing model credentials do not fail construction; every job
    /// submitted to such a runner fails with the credentials message instead.
    pub fn from_settings(store: Arc<JobStore>, settings: Settings) -> Result<Self> {
        let backend = match Pipeline::from_settings(settings) {
            Ok(pipeline) => Backend::Ready(Arc::new(pipeline)),
            Err(ScrapeError::MissingCredentials(message)) => Backend::Unavailable(message),
            Err(e) => return Err(e),
        };
        Ok(Self {
            store,
            backend,
            tasks: Mutex::new(Vec::new()),
        })
    }

    pub fn store(&self) -> &Arc<JobStore> {
        &self.store
    }

    /// Create a QUEUED job and start it in the background.
    pub fn submit(&self, request: JobRequest, owner: impl Into<String>) -> Result<Job> {
        let snapshot = serde_json::to_value(&request)?;
        let job = self.store.create(&snapshot, owner);

        let store = self.store.clone();
        let backend = self.backend.clone();
        let job_id = job.id.to_string();
        let handle = tokio::spawn(async move {
            run_job(store, backend, job_id, request).await;
        });
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handle);

        Ok(job)
    }

    /// Wait for every job submitted so far.
    pub async fn wait_all(&self) {
        let handles: Vec<JoinHandle<()>> = std::mem::take(
            &mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner),
        );
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "Job task failed");
            }
        }
    }

    /// Run an existing job to completion on the current task.
    pub async fn run_job(&self, job_id: &str, request: JobRequest) {
        run_job(self.store.clone(), self.backend.clone(), job_id.to_string(), request).await;
    }
}

async fn run_job(store: Arc<JobStore>, backend: Backend, job_id: String, request: JobRequest) {
    let pipeline = match backend {
        Backend::Ready(pipeline) => pipeline,
        Backend::Unavailable(message) => {
            warn!(job_id = %job_id, "Job cannot run: {}", message);
            finish(&store, &job_id, JobUpdate::new().with_status(JobStatus::Failed).with_error(message));
            return;
        }
    };

    match store.update(&job_id, JobUpdate::new().with_status(JobStatus::Running)) {
        Ok(Some(job)) if job.status == JobStatus::Running => {}
        Ok(Some(job)) => {
            info!(job_id = %job_id, status = %job.status, "Job already finished; not starting");
            return;
        }
        Ok(None) => {
            warn!(job_id = %job_id, "Job vanished before start");
            return;
        }
        Err(e) => {
            error!(job_id = %job_id, error = %e, "Failed to mark job running");
            return;
        }
    }
    info!(job_id = %job_id, urls = request.urls.len(), "Job started");

    let cancel_store = store.clone();
    let cancel_id = job_id.clone();
    let cancel = CancelToken::none().with_predicate(move || cancel_store.is_canceled(&cancel_id));

    let options = PipelineOptions::new()
        .with_cancel(cancel)
        .with_hooks(Arc::new(StoreProgressHooks::new(store.clone(), job_id.clone())))
        .with_screenshots(request.take_screenshot)
        .with_preserve_order(request.preserve_order);

    let outcome = std::panic::AssertUnwindSafe(pipeline.run(&request.urls, options))
        .catch_unwind()
        .await;

    let (items, stats) = match outcome {
        Ok(output) => output,
        Err(panic) => {
            let message = panic_message(&*panic);
            error!(job_id = %job_id, error = %message, "Job failed");
            finish(&store, &job_id, JobUpdate::new().with_status(JobStatus::Failed).with_error(message));
            return;
        }
    };

    if stats.was_canceled {
        info!(job_id = %job_id, "Job canceled; leaving record as is");
        return;
    }

    let result = match serde_json::to_value(&items) {
        Ok(items) => json!({ "items": items, "stats": stats }),
        Err(e) => {
            finish(
                &store,
                &job_id,
                JobUpdate::new().with_status(JobStatus::Failed).with_error(e.to_string()),
            );
            return;
        }
    };

    finish(
        &store,
        &job_id,
        JobUpdate::new()
            .with_status(JobStatus::Succeeded)
            .with_progress(1.0)
            .with_result(result),
    );
    info!(
        job_id = %job_id,
        success = stats.num_success,
        failed = stats.num_failed,
        duration_sec = stats.duration_sec,
        "Job finished"
    );
}

/// Apply a final update. The store's terminal guard makes a lost race a no-op.
fn finish(store: &JobStore, job_id: &str, update: JobUpdate) {
    match store.update(job_id, update) {
        Ok(Some(job)) => debug!(job_id = %job_id, status = %job.status, "Job finalized"),
        Ok(None) => warn!(job_id = %job_id, "Job vanished before finalizing"),
        Err(e) => error!(job_id = %job_id, error = %e, "Final job update rejected"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::openai::MISSING_CREDENTIALS;
    use crate::parsers::HtmlParser;
    use crate::testing::{MockExtractor, MockFetcher};
    use crate::types::request::AgentMode;

    fn runner(store: Arc<JobStore>) -> JobRunner {
        let pipeline = Pipeline::new(
            Settings::default(),
            Arc::new(MockFetcher::new().with_page("https://a.test", "<p>Alpha page</p>")),
            Arc::new(HtmlParser::new()),
            Arc::new(MockExtractor::new()),
        );
        JobRunner::new(store, pipeline)
    }

    #[tokio::test]
    async fn test_job_succeeds_with_result() {
        let store = Arc::new(JobStore::new());
        let runner = runner(store.clone());

        let job = runner
            .submit(JobRequest::new(vec!["https://a.test".into()]), "user-1")
            .unwrap();
        assert_eq!(job.status, JobStatus::Queued);
        runner.wait_all().await;

        let job = store.get(&job.id.to_string()).unwrap();
        assert_eq!(job.status, JobStatus::Succeeded);
        assert_eq!(job.progress, 1.0);
        let result = job.result.unwrap();
        assert_eq!(result["items"][0]["url"], "https://a.test");
        assert_eq!(result["stats"]["num_success"], 1);
    }

    #[tokio::test]
    async fn test_canceled_job_is_not_restarted() {
        let store = Arc::new(JobStore::new());
        let runner = runner(store.clone());
        let request = JobRequest::new(vec!["https://a.test".into()]);
        let job = store.create(&serde_json::to_value(&request).unwrap(), "u");
        let id = job.id.to_string();

        assert!(store.cancel(&id, "u"));
        runner.run_job(&id, request).await;

        let job = store.get(&id).unwrap();
        assert_eq!(job.status, JobStatus::Canceled);
        assert!(job.result.is_none());
    }

    #[tokio::test]
    async fn test_missing_credentials_fail_the_job() {
        let store = Arc::new(JobStore::new());
        let settings = Settings::default().with_agent_mode(AgentMode::LlmFixed);
        let runner = JobRunner::from_settings(store.clone(), settings).unwrap();

        let job = runner
            .submit(JobRequest::new(vec!["https://a.test".into()]), "u")
            .unwrap();
        runner.wait_all().await;

        let job = store.get(&job.id.to_string()).unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.as_deref(), Some(MISSING_CREDENTIALS));
    }
}
