//! Job specification, status records and annotation filters.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Structured container execution description produced by compilation.
pub type JobSpec = k8s_openapi::api::core::v1::PodSpec;

/// Key/value metadata attached to a job for later filtered lookup.
pub type Annotations = BTreeMap<String, String>;

/// Lifecycle phase of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobPhase {
    #[default]
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl JobPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobPhase::Succeeded | JobPhase::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobPhase::Pending => "pending",
            JobPhase::Running => "running",
            JobPhase::Succeeded => "succeeded",
            JobPhase::Failed => "failed",
            JobPhase::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for JobPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobPhase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(JobPhase::Pending),
            "running" => Ok(JobPhase::Running),
            "succeeded" => Ok(JobPhase::Succeeded),
            "failed" => Ok(JobPhase::Failed),
            "unknown" => Ok(JobPhase::Unknown),
            _ => Err(format!("Unknown job phase: {}", s)),
        }
    }
}

/// Execution metadata reported by the executor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobMetadata {
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub exit_code: Option<i32>,
    pub message: Option<String>,
}

/// Persisted status of a job. The name is the unique key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStatus {
    pub name: String,
    #[serde(default)]
    pub annotations: Annotations,
    pub phase: JobPhase,
    #[serde(default)]
    pub metadata: JobMetadata,
}

impl JobStatus {
    pub fn new(name: impl Into<String>, phase: JobPhase) -> Self {
        Self {
            name: name.into(),
            annotations: Annotations::new(),
            phase,
            metadata: JobMetadata::default(),
        }
    }

    pub fn with_annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations.insert(key.into(), value.into());
        self
    }

    /// Topic status updates for this job are published under.
    pub fn topic(&self) -> String {
        format!("job.{}", self.name)
    }
}

/// How an annotation value is matched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "rule", content = "value", rename_all = "lowercase")]
pub enum MatchRule {
    Equals(String),
    Prefix(String),
    Exists,
}

/// A predicate over a job's annotations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnotationFilter {
    pub key: String,
    #[serde(flatten)]
    pub rule: MatchRule,
}

impl AnnotationFilter {
    pub fn equals(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            rule: MatchRule::Equals(value.into()),
        }
    }

    pub fn prefix(key: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            rule: MatchRule::Prefix(prefix.into()),
        }
    }

    pub fn exists(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            rule: MatchRule::Exists,
        }
    }

    pub fn matches(&self, annotations: &Annotations) -> bool {
        let Some(value) = annotations.get(&self.key) else {
            return false;
        };
        match &self.rule {
            MatchRule::Equals(expected) => value == expected,
            MatchRule::Prefix(prefix) => value.starts_with(prefix.as_str()),
            MatchRule::Exists => true,
        }
    }

    /// True when every filter matches. An empty filter set matches everything.
    pub fn all_match(filters: &[AnnotationFilter], annotations: &Annotations) -> bool {
        filters.iter().all(|f| f.matches(annotations))
    }
}

impl std::fmt::Display for AnnotationFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.rule {
            MatchRule::Equals(value) => write!(f, "{}={}", self.key, value),
            MatchRule::Prefix(prefix) => write!(f, "{}^={}", self.key, prefix),
            MatchRule::Exists => write!(f, "{}", self.key),
        }
    }
}

/// Parses `key=value`, `key^=prefix` or a bare `key`.
impl std::str::FromStr for AnnotationFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let filter = if let Some((key, prefix)) = s.split_once("^=") {
            AnnotationFilter::prefix(key, prefix)
        } else if let Some((key, value)) = s.split_once('=') {
            AnnotationFilter::equals(key, value)
        } else {
            AnnotationFilter::exists(s)
        };

        if filter.key.is_empty() {
            return Err(format!("Invalid annotation filter: {}", s));
        }
        Ok(filter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn annotations() -> Annotations {
        JobStatus::new("job-1", JobPhase::Running)
            .with_annotation("owner", "acme")
            .with_annotation("rev", "refs/heads/main")
            .annotations
    }

    #[test]
    fn test_filter_rules() {
        let a = annotations();
        assert!(AnnotationFilter::equals("owner", "acme").matches(&a));
        assert!(!AnnotationFilter::equals("owner", "other").matches(&a));
        assert!(AnnotationFilter::prefix("rev", "refs/heads/").matches(&a));
        assert!(!AnnotationFilter::prefix("rev", "refs/tags/").matches(&a));
        assert!(AnnotationFilter::exists("owner").matches(&a));
        assert!(!AnnotationFilter::exists("repo").matches(&a));
    }

    #[test]
    fn test_empty_filter_set_matches_everything() {
        assert!(AnnotationFilter::all_match(&[], &Annotations::new()));
    }

    #[test]
    fn test_parse_filters() {
        assert_eq!(
            "owner=acme".parse::<AnnotationFilter>(),
            Ok(AnnotationFilter::equals("owner", "acme"))
        );
        assert_eq!(
            "rev^=refs/heads/".parse::<AnnotationFilter>(),
            Ok(AnnotationFilter::prefix("rev", "refs/heads/"))
        );
        assert_eq!(
            "repo".parse::<AnnotationFilter>(),
            Ok(AnnotationFilter::exists("repo"))
        );
        assert!("=acme".parse::<AnnotationFilter>().is_err());
    }

    #[test]
    fn test_terminal_phases() {
        assert!(JobPhase::Succeeded.is_terminal());
        assert!(JobPhase::Failed.is_terminal());
        assert!(!JobPhase::Running.is_terminal());
        assert!(!JobPhase::Unknown.is_terminal());
    }

    #[test]
    fn test_topic() {
        assert_eq!(JobStatus::new("kiln-x1", JobPhase::Pending).topic(), "job.kiln-x1");
    }
}
