//! Repository build configuration for Kiln.
//!
//! This crate handles:
//! - Parsing `.kiln.yaml` build configuration
//! - Trigger policies deciding whether and what to build
//! - The job template environment and its helper functions

pub mod error;
pub mod repo;
pub mod template;
pub mod trigger;

pub use error::{ConfigError, ConfigResult};
pub use repo::{BuildConfig, CONFIG_PATH, TriggerRule};
pub use trigger::{AlwaysRun, ConfigRules, TriggerPolicy};
