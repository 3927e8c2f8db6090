//! In-memory job registry.
//!
//! One mutex guards the whole map. Every read hands back a clone, so a
//! caller can never reach into stored state.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde_json::Value;
use tracing::{debug, info};
use uuid::Uuid;

use super::job::{Job, JobStatus, JobUpdate};
use crate::error::JobStoreResult;

pub const DEFAULT_JOB_LIST_LIMIT: usize = 50;
pub const MAX_JOB_LIST_LIMIT: usize = 100;

/// Filters and paging for [`JobStore::list`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobListQuery {
    pub status: Option<JobStatus>,
    pub owner: Option<String>,
    pub limit: usize,
    /// Id of the last job on the previous page
    pub cursor: Option<String>,
}

impl Default for JobListQuery {
    fn default() -> Self {
        Self {
            status: None,
            owner: None,
            limit: DEFAULT_JOB_LIST_LIMIT,
            cursor: None,
        }
    }
}

impl JobListQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_status(mut self, status: JobStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_cursor(mut self, cursor: impl Into<String>) -> Self {
        self.cursor = Some(cursor.into());
        self
    }
}

/// One page of jobs.
#[derive(Debug, Clone, PartialEq)]
pub struct JobPage {
    pub items: Vec<Job>,
    /// Present only when more matching jobs follow this page
    pub next_cursor: Option<String>,
}

impl JobPage {
    fn empty() -> Self {
        Self {
            items: Vec::new(),
            next_cursor: None,
        }
    }
}

#[derive(Default)]
struct Inner {
    jobs: HashMap<Uuid, Job>,
    last_created: Option<DateTime<Utc>>,
}

impl Inner {
    /// Strictly increasing creation time, so creation order survives clock ties.
    fn next_created_at(&mut self) -> DateTime<Utc> {
        let mut now = Utc::now();
        if let Some(last) = self.last_created {
            if now <= last {
                now = last + ChronoDuration::microseconds(1);
            }
        }
        self.last_created = Some(now);
        now
    }
}

/// Process-local job registry.
#[derive(Default)]
pub struct JobStore {
    inner: Mutex<Inner>,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create a QUEUED job holding a copy of `request`.
    pub fn create(&self, request: &Value, owner: impl Into<String>) -> Job {
        let mut inner = self.lock();
        let now = inner.next_created_at();
        let job = Job::new(Uuid::now_v7(), request.clone(), owner.into(), now);
        inner.jobs.insert(job.id, job.clone());
        info!(job_id = %job.id, owner = %job.owner, "Job created");
        job
    }

    /// Snapshot of a job. Unknown or malformed ids give `None`.
    pub fn get(&self, id: &str) -> Option<Job> {
        let id = parse_id(id)?;
        self.lock().jobs.get(&id).cloned()
    }

    /// Apply a patch.
    ///
    /// Contract checks run first and fail loudly. A terminal job is then
    /// returned untouched, `updated_at` included. Unknown ids give `Ok(None)`.
    pub fn update(&self, id: &str, update: JobUpdate) -> JobStoreResult<Option<Job>> {
        let patch = update.resolve()?;
        let Some(id) = parse_id(id) else {
            return Ok(None);
        };

        let mut inner = self.lock();
        let Some(job) = inner.jobs.get_mut(&id) else {
            return Ok(None);
        };

        if job.is_terminal() {
            debug!(job_id = %id, status = %job.status, "Ignoring update to terminal job");
            return Ok(Some(job.clone()));
        }

        if let Some(status) = patch.status {
            job.status = status;
        }
        if let Some(progress) = patch.progress {
            job.progress = progress;
        }
        if let Some(error) = patch.error {
            job.error = Some(error);
        }
        if let Some(result) = patch.result {
            job.result = Some(result);
        }
        job.updated_at = patch.updated_at.unwrap_or_else(Utc::now);

        Ok(Some(job.clone()))
    }

    /// List jobs ordered by `(created_at, id)`, resuming after `cursor`.
    pub fn list(&self, query: &JobListQuery) -> JobPage {
        let limit = query.limit.min(MAX_JOB_LIST_LIMIT);
        if limit == 0 {
            return JobPage::empty();
        }

        let mut jobs: Vec<Job> = self.lock().jobs.values().cloned().collect();
        jobs.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));

        let start = query
            .cursor
            .as_deref()
            .and_then(parse_id)
            .and_then(|cursor| jobs.iter().position(|job| job.id == cursor))
            .map(|pos| pos + 1)
            .unwrap_or(0);

        let mut matching = jobs.into_iter().skip(start).filter(|job| {
            query.status.map_or(true, |s| job.status == s)
                && query.owner.as_deref().map_or(true, |o| job.owner == o)
        });

        let items: Vec<Job> = matching.by_ref().take(limit).collect();
        let next_cursor = match (items.last(), matching.next()) {
            (Some(last), Some(_)) => Some(last.id.to_string()),
            _ => None,
        };

        JobPage { items, next_cursor }
    }

    /// Move a QUEUED or RUNNING job to CANCELED. Returns false otherwise.
    pub fn cancel(&self, id: &str, actor: &str) -> bool {
        let Some(id) = parse_id(id) else {
            return false;
        };

        let mut inner = self.lock();
        let Some(job) = inner.jobs.get_mut(&id) else {
            return false;
        };
        if !job.status.is_cancelable() {
            return false;
        }

        job.status = JobStatus::Canceled;
        job.canceled_by = Some(actor.to_string());
        job.error = Some(format!("Job {} canceled by user {}", id, actor));
        job.updated_at = Utc::now();
        info!(job_id = %id, actor = %actor, "Job canceled");
        true
    }

    /// Whether the job exists and is CANCELED.
    pub fn is_canceled(&self, id: &str) -> bool {
        self.get(id)
            .is_some_and(|job| job.status == JobStatus::Canceled)
    }

    pub fn len(&self) -> usize {
        self.lock().jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn parse_id(id: &str) -> Option<Uuid> {
    Uuid::parse_str(id.trim()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_create_and_get_snapshot() {
        let store = JobStore::new();
        let job = store.create(&json!({"urls": ["https://example.com"]}), "user-1");

        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.progress, 0.0);
        assert_eq!(job.created_at, job.updated_at);
        assert_eq!(job.request()["urls"][0], "https://example.com");

        let mut snapshot = store.get(&job.id.to_string()).unwrap();
        snapshot.progress = 0.9;
        assert_eq!(store.get(&job.id.to_string()).unwrap().progress, 0.0);
    }

    #[test]
    fn test_get_malformed_id_is_none() {
        let store = JobStore::new();
        assert!(store.get("not-a-uuid").is_none());
        assert!(store.get(&Uuid::new_v4().to_string()).is_none());
    }

    #[test]
    fn test_update_applies_fields() {
        let store = JobStore::new();
        let id = store.create(&json!({}), "u").id.to_string();

        let job = store
            .update(&id, JobUpdate::new().with_status("RUNNING").with_progress(0.5))
            .unwrap()
            .unwrap();

        assert_eq!(job.status, JobStatus::Running);
        assert_eq!(job.progress, 0.5);
        assert!(job.updated_at >= job.created_at);
    }

    #[test]
    fn test_update_contract_errors_raise_even_for_unknown_ids() {
        let store = JobStore::new();
        assert!(store
            .update("missing", JobUpdate::new().with_progress(-0.1))
            .is_err());
        assert_eq!(store.update("missing", JobUpdate::new()).unwrap(), None);
    }

    #[test]
    fn test_created_at_strictly_increases() {
        let store = JobStore::new();
        let a = store.create(&json!({}), "u");
        let b = store.create(&json!({}), "u");
        assert!(b.created_at > a.created_at);
    }

    #[test]
    fn test_list_limit_is_clamped() {
        let store = JobStore::new();
        for _ in 0..(MAX_JOB_LIST_LIMIT + 5) {
            store.create(&json!({}), "u");
        }
        let page = store.list(&JobListQuery::new().with_limit(1000));
        assert_eq!(page.items.len(), MAX_JOB_LIST_LIMIT);
        assert!(page.next_cursor.is_some());
    }

    #[test]
    fn test_cancel_records_actor() {
        let store = JobStore::new();
        let id = store.create(&json!({}), "u").id.to_string();

        assert!(store.cancel(&id, "admin"));
        let job = store.get(&id).unwrap();
        assert_eq!(job.canceled_by.as_deref(), Some("admin"));
        assert_eq!(
            job.error.as_deref(),
            Some(format!("Job {} canceled by user admin", id).as_str())
        );
        assert!(store.is_canceled(&id));
    }
}
