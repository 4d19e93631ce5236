//! Executor trait: the boundary to the execution subsystem.
//!
//! Executors run compiled job specifications and report status changes back
//! through the [`StatusPublisher`](crate::events::StatusPublisher) they were
//! constructed with.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{Annotations, JobSpec, Result};

/// Options passed alongside a job specification.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StartOptions {
    /// Annotations attached to the job for later filtering.
    pub annotations: Annotations,
}

impl StartOptions {
    pub fn with_annotations(annotations: Annotations) -> Self {
        Self { annotations }
    }
}

/// Trait for job executors.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Name of this executor.
    fn name(&self) -> &'static str;

    /// Start a job and return the name the executor assigned to it.
    async fn start(&self, spec: JobSpec, options: StartOptions) -> Result<String>;
}
