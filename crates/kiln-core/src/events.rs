//! Status publishing and error reporting seams.
//!
//! Both are injected at construction time and never replaced afterwards.

use async_trait::async_trait;

use crate::JobStatus;

/// Receives status updates from the execution subsystem.
#[async_trait]
pub trait StatusPublisher: Send + Sync {
    /// Deliver an update to current subscribers. Returns once delivered.
    async fn publish(&self, status: JobStatus);
}

/// Receives failures that have no synchronous caller to return to.
pub trait ErrorSink: Send + Sync {
    fn report(&self, err: &(dyn std::error::Error + 'static));
}
