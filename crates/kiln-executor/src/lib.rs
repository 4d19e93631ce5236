//! Job execution backends for Kiln.
//!
//! Currently supports:
//! - Kubernetes pods

pub mod kubernetes;

pub use kubernetes::{KubernetesExecutor, status_from_pod};
