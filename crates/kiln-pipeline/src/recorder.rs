//! Persists status updates into the job store.

use std::sync::Arc;

use kiln_core::JobStatus;
use kiln_core::events::ErrorSink;
use kiln_core::store::JobStore;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::StatusBroker;

/// Subscriber that writes every status update it receives to a [`JobStore`].
///
/// An update is acknowledged to the broker when it is received, not when it
/// is stored. Updates in flight when the process dies are lost.
pub struct StatusRecorder {
    jobs: Arc<dyn JobStore>,
    errors: Arc<dyn ErrorSink>,
}

impl StatusRecorder {
    pub fn new(jobs: Arc<dyn JobStore>, errors: Arc<dyn ErrorSink>) -> Self {
        Self { jobs, errors }
    }

    /// Subscribe to every job on `broker` and record in the background.
    pub fn spawn(self, broker: &StatusBroker) -> JoinHandle<()> {
        let updates = broker.subscribe_all();
        tokio::spawn(self.run(updates))
    }

    /// Record updates until the channel closes.
    pub async fn run(self, mut updates: mpsc::Receiver<JobStatus>) {
        while let Some(status) = updates.recv().await {
            let name = status.name.clone();
            let phase = status.phase;
            match self.jobs.store(status).await {
                Ok(()) => debug!(job = %name, %phase, "Recorded job status"),
                Err(err) => self.errors.report(&err),
            }
        }
        info!("Status feed closed, recorder stopping");
    }
}
