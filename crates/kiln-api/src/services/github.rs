//! GitHub contents API client used to fetch files at a pushed revision.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use kiln_core::files::{ContentSource, FileProvider};
use kiln_core::TriggerContext;
use reqwest::StatusCode;
use tracing::debug;

pub const DEFAULT_API_URL: &str = "https://api.github.com";

/// GitHub API errors.
#[derive(Debug, thiserror::Error)]
pub enum GitHubError {
    #[error("Request failed: {0}")]
    Request(String),

    #[error("API error: {0}")]
    Api(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

impl From<GitHubError> for kiln_core::Error {
    fn from(err: GitHubError) -> Self {
        match err {
            GitHubError::NotFound(msg) => kiln_core::Error::NotFound(msg),
            other => kiln_core::Error::Internal(other.to_string()),
        }
    }
}

/// Repository contents served by the GitHub API.
#[derive(Clone)]
pub struct GitHubContent {
    client: reqwest::Client,
    api_url: Arc<str>,
    token: Option<Arc<str>>,
}

impl GitHubContent {
    pub fn new(api_url: impl Into<String>, token: Option<String>) -> Self {
        let api_url = api_url.into();
        Self {
            client: reqwest::Client::new(),
            api_url: api_url.trim_end_matches('/').into(),
            token: token.map(Into::into),
        }
    }
}

impl ContentSource for GitHubContent {
    fn at_revision(&self, ctx: &TriggerContext) -> Arc<dyn FileProvider> {
        Arc::new(GitHubFiles {
            content: self.clone(),
            context: ctx.clone(),
        })
    }
}

/// Files of one repository at one revision.
pub struct GitHubFiles {
    content: GitHubContent,
    context: TriggerContext,
}

impl GitHubFiles {
    async fn download(&self, path: &str) -> Result<Bytes, GitHubError> {
        let url = contents_url(&self.content.api_url, &self.context, path);
        debug!(url = %url, "Fetching file from GitHub");

        let mut request = self
            .content
            .client
            .get(&url)
            .header("User-Agent", "Kiln-CI")
            .header("Accept", "application/vnd.github.raw+json");
        if let Some(token) = &self.content.token {
            request = request.header("Authorization", format!("Bearer {}", token));
        }

        let response = request
            .send()
            .await
            .map_err(|e| GitHubError::Request(e.to_string()))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(GitHubError::NotFound(format!("{} in {}", path, self.context)));
        }
        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(GitHubError::Api(format!(
                "Failed to fetch {} ({}): {}",
                path, status, text
            )));
        }

        response
            .bytes()
            .await
            .map_err(|e| GitHubError::Request(e.to_string()))
    }
}

#[async_trait]
impl FileProvider for GitHubFiles {
    async fn fetch(&self, path: &str) -> kiln_core::Result<Bytes> {
        Ok(self.download(path).await?)
    }
}

/// URL of a file in the contents API, pinned to the context's revision.
fn contents_url(api_url: &str, ctx: &TriggerContext, path: &str) -> String {
    let path = path
        .trim_start_matches('/')
        .split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/");
    format!(
        "{}/repos/{}/{}/contents/{}?ref={}",
        api_url,
        urlencoding::encode(&ctx.owner),
        urlencoding::encode(&ctx.repo),
        path,
        urlencoding::encode(&ctx.revision)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contents_url() {
        let ctx = TriggerContext::new("acme", "widgets", "refs/heads/main");
        assert_eq!(
            contents_url(DEFAULT_API_URL, &ctx, ".kiln.yaml"),
            "https://api.github.com/repos/acme/widgets/contents/.kiln.yaml?ref=refs%2Fheads%2Fmain"
        );
        assert_eq!(
            contents_url("http://ghe.local/api/v3", &ctx, "/ci/build job.tpl"),
            "http://ghe.local/api/v3/repos/acme/widgets/contents/ci/build%20job.tpl?ref=refs%2Fheads%2Fmain"
        );
    }

    #[test]
    fn test_trailing_slash_is_trimmed() {
        let content = GitHubContent::new("https://api.github.com/", None);
        assert_eq!(&*content.api_url, DEFAULT_API_URL);
    }

    #[test]
    fn test_not_found_maps_to_core_not_found() {
        let err: kiln_core::Error = GitHubError::NotFound(".kiln.yaml".into()).into();
        assert!(err.is_not_found());
        let err: kiln_core::Error = GitHubError::Api("rate limited".into()).into();
        assert!(!err.is_not_found());
    }
}
