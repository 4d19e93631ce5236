//! API server for Kiln.
//!
//! Provides the GitHub webhook endpoint, the job query API, status streaming
//! and log download.

pub mod error;
pub mod routes;
pub mod services;
pub mod state;

pub use state::AppState;
