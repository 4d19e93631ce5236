//! Services used by the API server.

pub mod github;

pub use github::{GitHubContent, GitHubError};
