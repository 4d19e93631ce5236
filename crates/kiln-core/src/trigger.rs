//! Trigger kinds and the context a pipeline run is triggered with.

use derive_more::Display;
use serde::{Deserialize, Serialize};

/// Category of source-control event that can trigger a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerKind {
    Push,
    Comment,
    Create,
}

impl std::fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TriggerKind::Push => write!(f, "push"),
            TriggerKind::Comment => write!(f, "comment"),
            TriggerKind::Create => write!(f, "create"),
        }
    }
}

impl std::str::FromStr for TriggerKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "push" => Ok(TriggerKind::Push),
            "comment" => Ok(TriggerKind::Comment),
            "create" => Ok(TriggerKind::Create),
            _ => Err(format!("Unknown trigger kind: {}", s)),
        }
    }
}

/// Identifies the repository and revision that caused a pipeline run.
///
/// Serializes with `Owner`, `Repo` and `Revision` keys, which is the shape
/// job templates see.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "PascalCase")]
#[display("{owner}/{repo}@{revision}")]
pub struct TriggerContext {
    pub owner: String,
    pub repo: String,
    pub revision: String,
}

impl TriggerContext {
    pub fn new(
        owner: impl Into<String>,
        repo: impl Into<String>,
        revision: impl Into<String>,
    ) -> Self {
        Self {
            owner: owner.into(),
            repo: repo.into(),
            revision: revision.into(),
        }
    }

    /// Branch name if the revision is a branch ref.
    pub fn branch(&self) -> Option<&str> {
        self.revision.strip_prefix("refs/heads/")
    }

    /// Tag name if the revision is a tag ref.
    pub fn tag(&self) -> Option<&str> {
        self.revision.strip_prefix("refs/tags/")
    }
}
