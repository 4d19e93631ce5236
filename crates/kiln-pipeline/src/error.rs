//! Pipeline errors.

use kiln_config::ConfigError;
use kiln_core::{TriggerContext, TriggerKind};
use thiserror::Error;

use crate::CompileError;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("build config {0} not found")]
    MissingConfig(String),

    #[error("malformed build config: {0}")]
    Config(#[from] ConfigError),

    #[error("no job template configured for {0} trigger")]
    NoTemplate(TriggerKind),

    #[error("job template {0} not found")]
    MissingTemplate(String),

    #[error("job template {0} is not valid UTF-8")]
    TemplateEncoding(String),

    #[error("cannot fetch {path}: {source}")]
    Fetch {
        path: String,
        #[source]
        source: kiln_core::Error,
    },

    #[error("compile failed: {0}")]
    Compile(#[from] CompileError),

    #[error("submission failed: {0}")]
    Submission(#[source] kiln_core::Error),

    #[error("unhandled event: {0}")]
    UnhandledEvent(String),

    #[error("cannot handle {trigger} to {context}: {source}")]
    Trigger {
        trigger: TriggerKind,
        context: TriggerContext,
        #[source]
        source: Box<PipelineError>,
    },
}

impl PipelineError {
    /// The underlying failure, with trigger context wrappers removed.
    pub fn root(&self) -> &PipelineError {
        match self {
            PipelineError::Trigger { source, .. } => source.root(),
            other => other,
        }
    }

    /// Trigger context the failure happened in, if any.
    pub fn context(&self) -> Option<&TriggerContext> {
        match self {
            PipelineError::Trigger { context, .. } => Some(context),
            _ => None,
        }
    }
}
