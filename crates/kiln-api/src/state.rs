//! Application state.

use kiln_core::store::{JobStore, LogStore};
use kiln_pipeline::{Dispatcher, StatusBroker};
use std::sync::Arc;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub jobs: Arc<dyn JobStore>,
    pub logs: Arc<dyn LogStore>,
    pub broker: Arc<StatusBroker>,
    pub dispatcher: Arc<Dispatcher>,
    /// Secret GitHub signs webhook payloads with. Unset disables verification.
    pub webhook_secret: Option<Arc<str>>,
}

impl AppState {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        logs: Arc<dyn LogStore>,
        broker: Arc<StatusBroker>,
        dispatcher: Arc<Dispatcher>,
    ) -> Self {
        Self {
            jobs,
            logs,
            broker,
            dispatcher,
            webhook_secret: None,
        }
    }

    pub fn with_webhook_secret(mut self, secret: impl Into<Arc<str>>) -> Self {
        self.webhook_secret = Some(secret.into());
        self
    }
}
