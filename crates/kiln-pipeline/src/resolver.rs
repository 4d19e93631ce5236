//! Fetches the build configuration and the job template for a trigger.

use std::sync::Arc;

use kiln_config::{BuildConfig, CONFIG_PATH, TriggerPolicy};
use kiln_core::files::FileProvider;
use kiln_core::{TriggerContext, TriggerKind};
use tracing::debug;

use crate::PipelineError;

/// Configuration and template selected for a trigger.
#[derive(Debug, Clone)]
pub struct Resolved {
    pub config: BuildConfig,
    pub template_path: String,
    pub template: String,
}

pub struct Resolver {
    policy: Arc<dyn TriggerPolicy>,
}

impl Resolver {
    pub fn new(policy: Arc<dyn TriggerPolicy>) -> Self {
        Self { policy }
    }

    /// Load `.kiln.yaml`. Not cached; every trigger reads it fresh.
    pub async fn load_config(&self, files: &dyn FileProvider) -> Result<BuildConfig, PipelineError> {
        let raw = files.fetch(CONFIG_PATH).await.map_err(|e| {
            if e.is_not_found() {
                PipelineError::MissingConfig(CONFIG_PATH.to_string())
            } else {
                PipelineError::Fetch {
                    path: CONFIG_PATH.to_string(),
                    source: e,
                }
            }
        })?;
        Ok(BuildConfig::from_yaml(&raw)?)
    }

    /// Load configuration and, if the policy says to build, the template.
    ///
    /// Returns `None` when the trigger should not produce a job.
    pub async fn resolve(
        &self,
        files: &dyn FileProvider,
        kind: TriggerKind,
        ctx: &TriggerContext,
    ) -> Result<Option<Resolved>, PipelineError> {
        let config = self.load_config(files).await?;

        if !self.policy.should_run(&config, kind, ctx) {
            debug!(context = %ctx, trigger = %kind, "Trigger policy declined");
            return Ok(None);
        }

        let template_path = self
            .policy
            .template_path(&config, kind, ctx)
            .ok_or(PipelineError::NoTemplate(kind))?;

        let raw = files.fetch(&template_path).await.map_err(|e| {
            if e.is_not_found() {
                PipelineError::MissingTemplate(template_path.clone())
            } else {
                PipelineError::Fetch {
                    path: template_path.clone(),
                    source: e,
                }
            }
        })?;
        let template = String::from_utf8(raw.to_vec())
            .map_err(|_| PipelineError::TemplateEncoding(template_path.clone()))?;

        Ok(Some(Resolved {
            config,
            template_path,
            template,
        }))
    }
}
