//! Publish/subscribe fan-out of job status updates.
//!
//! Updates are published under `job.<name>`. Subscribers either follow a
//! single job or every job. Each subscriber has a channel of capacity one,
//! so `publish` waits until every current subscriber has taken the
//! previous update; a slow subscriber slows the publisher down.

use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use kiln_core::JobStatus;
use kiln_core::events::StatusPublisher;
use tokio::sync::mpsc;
use tracing::trace;

const SUBSCRIBER_CAPACITY: usize = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Topic {
    All,
    Job(String),
}

impl Topic {
    fn matches(&self, status: &JobStatus) -> bool {
        match self {
            Topic::All => true,
            Topic::Job(name) => *name == status.name,
        }
    }
}

struct Subscriber {
    topic: Topic,
    tx: mpsc::Sender<JobStatus>,
}

#[derive(Default)]
pub struct StatusBroker {
    subscribers: Mutex<Vec<Subscriber>>,
}

impl StatusBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn add(&self, topic: Topic) -> mpsc::Receiver<JobStatus> {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_CAPACITY);
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Subscriber { topic, tx });
        rx
    }

    /// Receive every update for every job.
    pub fn subscribe_all(&self) -> mpsc::Receiver<JobStatus> {
        self.add(Topic::All)
    }

    /// Follow one job. The stream ends after the first terminal update.
    pub fn subscribe(&self, name: &str) -> BoxStream<'static, JobStatus> {
        let rx = self.add(Topic::Job(name.to_string()));
        futures::stream::unfold(Some(rx), |rx| async move {
            let mut rx = rx?;
            let status = rx.recv().await?;
            // Dropping the receiver after a terminal update unsubscribes.
            let rx = (!status.phase.is_terminal()).then_some(rx);
            Some((status, rx))
        })
        .boxed()
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        let mut subscribers = self.subscribers.lock().unwrap_or_else(PoisonError::into_inner);
        subscribers.retain(|s| !s.tx.is_closed());
        subscribers.len()
    }
}

#[async_trait]
impl StatusPublisher for StatusBroker {
    async fn publish(&self, status: JobStatus) {
        let targets: Vec<mpsc::Sender<JobStatus>> = {
            let mut subscribers = self.subscribers.lock().unwrap_or_else(PoisonError::into_inner);
            subscribers.retain(|s| !s.tx.is_closed());
            subscribers
                .iter()
                .filter(|s| s.topic.matches(&status))
                .map(|s| s.tx.clone())
                .collect()
        };

        for tx in &targets {
            // A subscriber that went away in the meantime is fine.
            let _ = tx.send(status.clone()).await;
        }
        trace!(topic = %status.topic(), subscribers = targets.len(), "Published status");
    }
}
