//! File providers backed by memory and by a local checkout.

use async_trait::async_trait;
use bytes::Bytes;
use kiln_core::files::{ContentSource, FileProvider};
use kiln_core::{Error, Result, TriggerContext};
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

/// Fixed set of files, served for every revision.
#[derive(Debug, Clone, Default)]
pub struct StaticFiles {
    files: HashMap<String, Bytes>,
}

impl StaticFiles {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(mut self, path: impl Into<String>, content: impl Into<Bytes>) -> Self {
        self.files.insert(path.into(), content.into());
        self
    }
}

#[async_trait]
impl FileProvider for StaticFiles {
    async fn fetch(&self, path: &str) -> Result<Bytes> {
        self.files
            .get(path)
            .cloned()
            .ok_or_else(|| Error::NotFound(path.to_string()))
    }
}

impl ContentSource for StaticFiles {
    fn at_revision(&self, _ctx: &TriggerContext) -> Arc<dyn FileProvider> {
        Arc::new(self.clone())
    }
}

/// Files of a local checkout.
#[derive(Debug, Clone)]
pub struct DirFiles {
    root: PathBuf,
}

impl DirFiles {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolve a repository path below the root. Absolute paths and `..`
    /// are rejected.
    fn resolve(&self, path: &str) -> Result<PathBuf> {
        let relative = Path::new(path);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes {
            return Err(Error::InvalidInput(format!("path outside repository: {}", path)));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl FileProvider for DirFiles {
    async fn fetch(&self, path: &str) -> Result<Bytes> {
        let full = self.resolve(path)?;
        match tokio::fs::read(&full).await {
            Ok(content) => Ok(Bytes::from(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::NotFound(path.to_string()))
            }
            Err(e) => Err(Error::Io(e)),
        }
    }
}
