//! In-memory job and log stores.

use std::collections::{BTreeMap, HashMap};
use std::io::Cursor;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use kiln_core::store::{JobPage, JobStore, LogReader, LogStore};
use kiln_core::{AnnotationFilter, Error, JobStatus, Result};
use tokio::io::AsyncReadExt;
use tokio::sync::RwLock;

use crate::page_of;

/// Job store kept in memory, ordered by name.
#[derive(Debug, Default)]
pub struct MemoryJobStore {
    jobs: RwLock<BTreeMap<String, JobStatus>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn store(&self, job: JobStatus) -> Result<()> {
        self.jobs.write().await.insert(job.name.clone(), job);
        Ok(())
    }

    async fn get(&self, name: &str) -> Result<JobStatus> {
        self.jobs
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("job {}", name)))
    }

    async fn find(
        &self,
        filters: &[AnnotationFilter],
        start: usize,
        limit: usize,
    ) -> Result<JobPage> {
        let jobs = self.jobs.read().await;
        Ok(page_of(jobs.values(), filters, start, limit))
    }
}

#[derive(Debug)]
enum LogEntry {
    Writing,
    Complete(Vec<u8>),
}

/// Log store kept in memory.
#[derive(Debug, Default)]
pub struct MemoryLogStore {
    logs: LogMap,
}

impl MemoryLogStore {
    pub fn new() -> Self {
        Self::default()
    }
}

type LogMap = Mutex<HashMap<String, LogEntry>>;

fn lock(logs: &LogMap) -> std::sync::MutexGuard<'_, HashMap<String, LogEntry>> {
    logs.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A log being written. Dropped before [`complete`](Self::complete), it
/// frees the id again, whether `place` failed or was cancelled.
struct PendingLog<'a> {
    logs: &'a LogMap,
    id: &'a str,
    done: bool,
}

impl PendingLog<'_> {
    fn complete(mut self, content: Vec<u8>) {
        lock(self.logs).insert(self.id.to_string(), LogEntry::Complete(content));
        self.done = true;
    }
}

impl Drop for PendingLog<'_> {
    fn drop(&mut self) {
        if !self.done {
            let mut logs = lock(self.logs);
            if matches!(logs.get(self.id), Some(LogEntry::Writing)) {
                logs.remove(self.id);
            }
        }
    }
}

#[async_trait]
impl LogStore for MemoryLogStore {
    async fn place(&self, id: &str, mut src: LogReader) -> Result<()> {
        let pending = {
            let mut logs = lock(&self.logs);
            if logs.contains_key(id) {
                return Err(Error::AlreadyExists(format!("log {}", id)));
            }
            logs.insert(id.to_string(), LogEntry::Writing);
            PendingLog {
                logs: &self.logs,
                id,
                done: false,
            }
        };

        let mut content = Vec::new();
        src.read_to_end(&mut content).await?;
        pending.complete(content);
        Ok(())
    }

    async fn read(&self, id: &str) -> Result<LogReader> {
        match lock(&self.logs).get(id) {
            Some(LogEntry::Complete(content)) => Ok(Box::pin(Cursor::new(content.clone()))),
            _ => Err(Error::NotFound(format!("log {}", id))),
        }
    }
}
