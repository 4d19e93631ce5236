//! Job status and log store contracts.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use tokio::io::AsyncRead;

use crate::{AnnotationFilter, JobStatus, Result};

/// Byte stream handed to and returned from a [`LogStore`].
/// Dropping it closes it.
pub type LogReader = Pin<Box<dyn AsyncRead + Send>>;

/// A page of jobs plus the size of the whole filtered set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobPage {
    pub jobs: Vec<JobStatus>,
    pub total: usize,
}

/// Access to past and present jobs.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Store a job. A job with the same name is replaced in full.
    async fn store(&self, job: JobStatus) -> Result<()>;

    /// Retrieve a job by name, or `NotFound`.
    async fn get(&self, name: &str) -> Result<JobStatus>;

    /// Find jobs whose annotations match every filter, ordered by name.
    ///
    /// `start` is an offset into the filtered set, `limit == 0` means no
    /// limit. `total` is always the size of the filtered set.
    async fn find(&self, filters: &[AnnotationFilter], start: usize, limit: usize)
    -> Result<JobPage>;
}

/// Write-once log storage keyed by job name.
#[async_trait]
pub trait LogStore: Send + Sync {
    /// Place a log under `id`. Does not return until `src` reaches EOF.
    ///
    /// Returns `AlreadyExists` if a log is already stored or being stored
    /// under `id`.
    async fn place(&self, id: &str, src: LogReader) -> Result<()>;

    /// Read a finished log. Logs still being written are `NotFound`.
    async fn read(&self, id: &str) -> Result<LogReader>;
}
