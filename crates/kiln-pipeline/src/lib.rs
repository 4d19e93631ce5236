//! Trigger-to-job-spec pipeline for Kiln.
//!
//! Turns a repository event into a compiled job specification and submits
//! it for execution:
//! - Resolver: fetch `.kiln.yaml` and the selected job template
//! - Compiler: render the template and decode the job spec concurrently
//! - Submitter: start the job with `owner`/`repo`/`rev` annotations
//! - Broker and recorder: fan status updates out and persist them
//! - Dispatcher: route repository events into the pipeline

pub mod broker;
pub mod compiler;
pub mod dispatcher;
pub mod error;
pub mod files;
pub mod recorder;
pub mod resolver;
pub mod service;
pub mod sink;
pub mod submitter;

pub use broker::StatusBroker;
pub use compiler::{CompileError, Compiler};
pub use dispatcher::{Dispatcher, RepositoryEvent};
pub use error::PipelineError;
pub use files::{DirFiles, StaticFiles};
pub use recorder::StatusRecorder;
pub use resolver::{Resolved, Resolver};
pub use service::Pipeline;
pub use sink::TracingSink;
pub use submitter::Submitter;
