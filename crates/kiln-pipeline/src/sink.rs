//! Error sinks.

use kiln_core::events::ErrorSink;
use tracing::error;

/// Logs reported failures with `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl ErrorSink for TracingSink {
    fn report(&self, err: &(dyn std::error::Error + 'static)) {
        let mut causes = Vec::new();
        let mut source = err.source();
        while let Some(cause) = source {
            causes.push(cause.to_string());
            source = cause.source();
        }
        error!(error = %err, ?causes, "service error");
    }
}
