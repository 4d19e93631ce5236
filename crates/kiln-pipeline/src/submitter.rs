//! Hands compiled job specifications to the executor.

use std::sync::Arc;

use kiln_core::executor::{Executor, StartOptions};
use kiln_core::{Annotations, JobSpec, TriggerContext};
use tracing::info;

use crate::PipelineError;

pub const OWNER_ANNOTATION: &str = "owner";
pub const REPO_ANNOTATION: &str = "repo";
pub const REVISION_ANNOTATION: &str = "rev";

pub struct Submitter {
    executor: Arc<dyn Executor>,
}

impl Submitter {
    pub fn new(executor: Arc<dyn Executor>) -> Self {
        Self { executor }
    }

    /// Annotations every job started for `ctx` carries.
    pub fn annotations(ctx: &TriggerContext) -> Annotations {
        Annotations::from([
            (OWNER_ANNOTATION.to_string(), ctx.owner.clone()),
            (REPO_ANNOTATION.to_string(), ctx.repo.clone()),
            (REVISION_ANNOTATION.to_string(), ctx.revision.clone()),
        ])
    }

    /// Start the job and return the name the executor assigned.
    pub async fn submit(&self, spec: JobSpec, ctx: &TriggerContext) -> Result<String, PipelineError> {
        let options = StartOptions::with_annotations(Self::annotations(ctx));
        let name = self
            .executor
            .start(spec, options)
            .await
            .map_err(PipelineError::Submission)?;

        info!(
            job = %name,
            executor = self.executor.name(),
            owner = %ctx.owner,
            repo = %ctx.repo,
            rev = %ctx.revision,
            "Started job"
        );
        Ok(name)
    }
}
