//! Core domain types and traits for the Kiln build trigger service.
//!
//! This crate contains:
//! - Trigger context and trigger kinds
//! - Job status records and annotation filters
//! - Executor trait (the execution subsystem boundary)
//! - Job and log store contracts
//! - File access and status/error reporting seams

pub mod error;
pub mod events;
pub mod executor;
pub mod files;
pub mod job;
pub mod store;
pub mod trigger;

pub use error::{Error, Result};
pub use job::{AnnotationFilter, Annotations, JobMetadata, JobPhase, JobSpec, JobStatus, MatchRule};
pub use trigger::{TriggerContext, TriggerKind};
