//! Routes repository events into the pipeline.

use std::sync::Arc;

use kiln_core::events::ErrorSink;
use kiln_core::files::ContentSource;
use kiln_core::{TriggerContext, TriggerKind};
use tracing::debug;

use crate::{Pipeline, PipelineError};

/// An already-authenticated, already-parsed repository event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepositoryEvent {
    /// An event of a known trigger kind.
    Trigger {
        kind: TriggerKind,
        context: TriggerContext,
    },
    /// An event type nothing handles, e.g. `fork`.
    Unsupported(String),
}

impl RepositoryEvent {
    pub fn push(context: TriggerContext) -> Self {
        RepositoryEvent::Trigger {
            kind: TriggerKind::Push,
            context,
        }
    }
}

pub struct Dispatcher {
    pipeline: Arc<Pipeline>,
    content: Arc<dyn ContentSource>,
    errors: Arc<dyn ErrorSink>,
}

impl Dispatcher {
    pub fn new(
        pipeline: Arc<Pipeline>,
        content: Arc<dyn ContentSource>,
        errors: Arc<dyn ErrorSink>,
    ) -> Self {
        Self {
            pipeline,
            content,
            errors,
        }
    }

    /// Process one event to completion.
    ///
    /// Failures are reported to the error sink and returned.
    pub async fn dispatch(&self, event: RepositoryEvent) -> Result<Option<String>, PipelineError> {
        let result = match event {
            RepositoryEvent::Trigger {
                kind: TriggerKind::Push,
                context,
            } => {
                let files = self.content.at_revision(&context);
                self.pipeline
                    .run_job(&context, TriggerKind::Push, files.as_ref())
                    .await
            }
            RepositoryEvent::Trigger { kind, context } => {
                // Only pushes start jobs so far.
                debug!(trigger = %kind, context = %context, "Ignoring trigger");
                Ok(None)
            }
            RepositoryEvent::Unsupported(kind) => Err(PipelineError::UnhandledEvent(kind)),
        };

        if let Err(err) = &result {
            self.errors.report(err);
        }
        result
    }
}
