//! Job record and the typed update patch.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, FixedOffset, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{JobStoreError, JobStoreResult};

// ============================================================================
// Status
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    #[default]
    Queued,
    Running,
    Succeeded,
    Failed,
    Canceled,
}

impl JobStatus {
    /// Terminal states accept no further mutation.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded | JobStatus::Failed | JobStatus::Canceled
        )
    }

    /// Whether `cancel` may move this job to CANCELED.
    pub fn is_cancelable(&self) -> bool {
        matches!(self, JobStatus::Queued | JobStatus::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
            JobStatus::Canceled => "canceled",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = JobStoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "queued" => Ok(JobStatus::Queued),
            "running" => Ok(JobStatus::Running),
            "succeeded" => Ok(JobStatus::Succeeded),
            "failed" => Ok(JobStatus::Failed),
            "canceled" => Ok(JobStatus::Canceled),
            _ => Err(JobStoreError::InvalidStatus(s.to_string())),
        }
    }
}

// ============================================================================
// Job Model
// ============================================================================

/// One scrape job. Callers only ever hold snapshots; the store owns the record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Fraction complete, always within [0.0, 1.0]
    pub progress: f64,
    pub error: Option<String>,
    pub result: Option<Value>,
    /// Opaque subject id of the submitting user
    pub owner: String,
    pub canceled_by: Option<String>,
    /// Snapshot of the original request, kept for audit
    #[serde(skip)]
    pub(crate) request: Value,
}

impl Job {
    pub(crate) fn new(id: Uuid, request: Value, owner: String, now: DateTime<Utc>) -> Self {
        Self {
            id,
            status: JobStatus::Queued,
            created_at: now,
            updated_at: now,
            progress: 0.0,
            error: None,
            result: None,
            owner,
            canceled_by: None,
            request,
        }
    }

    /// The request this job was created from.
    pub fn request(&self) -> &Value {
        &self.request
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

// ============================================================================
// Update Patch
// ============================================================================

/// A status given either as the enum or as text from an outer layer.
#[derive(Debug, Clone, PartialEq)]
pub enum StatusInput {
    Status(JobStatus),
    Text(String),
}

impl StatusInput {
    /// Coerce to [`JobStatus`], failing on unknown text.
    pub fn resolve(&self) -> JobStoreResult<JobStatus> {
        match self {
            StatusInput::Status(status) => Ok(*status),
            StatusInput::Text(text) => text.parse(),
        }
    }
}

impl From<JobStatus> for StatusInput {
    fn from(status: JobStatus) -> Self {
        StatusInput::Status(status)
    }
}

impl From<&str> for StatusInput {
    fn from(text: &str) -> Self {
        StatusInput::Text(text.to_string())
    }
}

impl From<String> for StatusInput {
    fn from(text: String) -> Self {
        StatusInput::Text(text)
    }
}

/// An explicit `updated_at`. Only timezone-aware values are accepted.
#[derive(Debug, Clone, PartialEq)]
pub enum TimestampInput {
    Aware(DateTime<FixedOffset>),
    Naive(NaiveDateTime),
}

impl TimestampInput {
    pub fn resolve(&self) -> JobStoreResult<DateTime<Utc>> {
        match self {
            TimestampInput::Aware(ts) => Ok(ts.with_timezone(&Utc)),
            TimestampInput::Naive(_) => Err(JobStoreError::NaiveTimestamp),
        }
    }
}

impl From<DateTime<Utc>> for TimestampInput {
    fn from(ts: DateTime<Utc>) -> Self {
        TimestampInput::Aware(ts.fixed_offset())
    }
}

impl From<DateTime<FixedOffset>> for TimestampInput {
    fn from(ts: DateTime<FixedOffset>) -> Self {
        TimestampInput::Aware(ts)
    }
}

impl From<NaiveDateTime> for TimestampInput {
    fn from(ts: NaiveDateTime) -> Self {
        TimestampInput::Naive(ts)
    }
}

/// Fields to change on a job. Unset fields are left alone.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobUpdate {
    pub status: Option<StatusInput>,
    pub progress: Option<f64>,
    pub error: Option<String>,
    pub result: Option<Value>,
    pub updated_at: Option<TimestampInput>,
}

impl JobUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_status(mut self, status: impl Into<StatusInput>) -> Self {
        self.status = Some(status.into());
        self
    }

    pub fn with_progress(mut self, progress: f64) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn with_result(mut self, result: Value) -> Self {
        self.result = Some(result);
        self
    }

    pub fn with_updated_at(mut self, ts: impl Into<TimestampInput>) -> Self {
        self.updated_at = Some(ts.into());
        self
    }
}

/// A patch whose inputs have passed the contract checks.
pub(crate) struct ResolvedUpdate {
    pub status: Option<JobStatus>,
    pub progress: Option<f64>,
    pub error: Option<String>,
    pub result: Option<Value>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl JobUpdate {
    /// Run every contract check. Errors here indicate a caller bug.
    pub(crate) fn resolve(self) -> JobStoreResult<ResolvedUpdate> {
        let status = self.status.as_ref().map(StatusInput::resolve).transpose()?;
        let progress = self.progress.map(validate_progress).transpose()?;
        let updated_at = self
            .updated_at
            .as_ref()
            .map(TimestampInput::resolve)
            .transpose()?;
        Ok(ResolvedUpdate {
            status,
            progress,
            error: self.error,
            result: self.result,
            updated_at,
        })
    }
}

fn validate_progress(progress: f64) -> JobStoreResult<f64> {
    if (0.0..=1.0).contains(&progress) {
        Ok(progress)
    } else {
        Err(JobStoreError::ProgressOutOfRange(progress))
    }
}
