//! Job lifecycle: records, the in-memory store, and the background runner.
//!
//! States flow QUEUED → RUNNING → {SUCCEEDED, FAILED, CANCELED}. The three
//! right-hand states are terminal: once reached, the store refuses every
//! further mutation.

pub mod job;
pub mod runner;
pub mod store;

pub use job::{Job, JobStatus, JobUpdate, StatusInput, TimestampInput};
pub use runner::{JobRequest, JobRunner, StoreProgressHooks};
pub use store::{JobListQuery, JobPage, JobStore, DEFAULT_JOB_LIST_LIMIT, MAX_JOB_LIST_LIMIT};
