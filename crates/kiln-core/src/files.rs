//! Access to files in a repository at a given revision.

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;

use crate::{Result, TriggerContext};

/// Provides the contents of files at one revision of one repository.
///
/// Returns [`Error::NotFound`](crate::Error::NotFound) for missing files.
#[async_trait]
pub trait FileProvider: Send + Sync {
    async fn fetch(&self, path: &str) -> Result<Bytes>;
}

/// Hands out file providers scoped to a trigger's repository and revision.
pub trait ContentSource: Send + Sync {
    fn at_revision(&self, ctx: &TriggerContext) -> Arc<dyn FileProvider>;
}
