//! The trigger pipeline: resolve, compile, submit.

use std::sync::Arc;

use kiln_config::TriggerPolicy;
use kiln_core::executor::Executor;
use kiln_core::files::FileProvider;
use kiln_core::{TriggerContext, TriggerKind};
use tracing::info;

use crate::{Compiler, PipelineError, Resolver, Submitter};

/// Turns one trigger into at most one started job.
pub struct Pipeline {
    resolver: Resolver,
    compiler: Compiler,
    submitter: Submitter,
}

impl Pipeline {
    pub fn new(executor: Arc<dyn Executor>, policy: Arc<dyn TriggerPolicy>) -> Self {
        Self {
            resolver: Resolver::new(policy),
            compiler: Compiler::new(),
            submitter: Submitter::new(executor),
        }
    }

    pub fn with_compiler(mut self, compiler: Compiler) -> Self {
        self.compiler = compiler;
        self
    }

    /// Run the pipeline for a trigger.
    ///
    /// Returns the started job's name, or `None` if the repository's trigger
    /// policy declined. Every failure carries the trigger context.
    pub async fn run_job(
        &self,
        ctx: &TriggerContext,
        trigger: TriggerKind,
        files: &dyn FileProvider,
    ) -> Result<Option<String>, PipelineError> {
        self.run(ctx, trigger, files)
            .await
            .map_err(|e| PipelineError::Trigger {
                trigger,
                context: ctx.clone(),
                source: Box::new(e),
            })
    }

    async fn run(
        &self,
        ctx: &TriggerContext,
        trigger: TriggerKind,
        files: &dyn FileProvider,
    ) -> Result<Option<String>, PipelineError> {
        let Some(resolved) = self.resolver.resolve(files, trigger, ctx).await? else {
            info!(context = %ctx, trigger = %trigger, "Trigger conditions not met, skipping");
            return Ok(None);
        };

        info!(
            context = %ctx,
            trigger = %trigger,
            template = %resolved.template_path,
            "Compiling job"
        );
        let spec = self.compiler.compile(&resolved.template, ctx).await?;

        let name = self.submitter.submit(spec, ctx).await?;
        Ok(Some(name))
    }
}
