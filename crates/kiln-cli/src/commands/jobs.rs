//! Job commands against the API server.

use anyhow::{Context, Result, bail};
use futures::StreamExt;
use kiln_core::store::JobPage;
use kiln_core::{AnnotationFilter, JobStatus};
use tokio::io::AsyncWriteExt;
use tracing::debug;

fn jobs_url(api_url: &str) -> String {
    format!("{}/api/v1/jobs", api_url.trim_end_matches('/'))
}

fn job_url(api_url: &str, name: &str, suffix: &str) -> String {
    format!("{}/{}{}", jobs_url(api_url), urlencoding::encode(name), suffix)
}

async fn send(request: reqwest::RequestBuilder) -> Result<reqwest::Response> {
    let response = request
        .send()
        .await
        .context("Failed to reach the API server")?;
    if !response.status().is_success() {
        let url = response.url().clone();
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        bail!("{} returned {}: {}", url, status, text);
    }
    debug!(url = %response.url(), status = %response.status(), "API request succeeded");
    Ok(response)
}

pub async fn list(
    api_url: &str,
    filters: &[AnnotationFilter],
    start: usize,
    limit: usize,
) -> Result<()> {
    let mut query: Vec<(&str, String)> = filters.iter().map(|f| ("filter", f.to_string())).collect();
    query.push(("start", start.to_string()));
    query.push(("limit", limit.to_string()));

    let request = reqwest::Client::new().get(jobs_url(api_url)).query(&query);
    let response = send(request).await?;

    let page: JobPage = response.json().await.context("Invalid job list")?;
    for job in &page.jobs {
        println!("{}", format_row(job));
    }
    println!(
        "showing {} of {} jobs (start {})",
        page.jobs.len(),
        page.total,
        start
    );
    Ok(())
}

fn format_row(job: &JobStatus) -> String {
    let annotation = |key: &str| job.annotations.get(key).map(String::as_str).unwrap_or("-");
    format!(
        "{:<24} {:<10} {}/{}@{}",
        job.name,
        job.phase.as_str(),
        annotation("owner"),
        annotation("repo"),
        annotation("rev")
    )
}

pub async fn show(api_url: &str, name: &str) -> Result<()> {
    let job: JobStatus = send(reqwest::Client::new().get(job_url(api_url, name, "")))
        .await?
        .json()
        .await
        .context("Invalid job")?;
    println!("{}", serde_json::to_string_pretty(&job)?);
    Ok(())
}

pub async fn logs(api_url: &str, name: &str) -> Result<()> {
    let response = send(reqwest::Client::new().get(job_url(api_url, name, "/logs"))).await?;
    let mut body = response.bytes_stream();
    let mut stdout = tokio::io::stdout();
    while let Some(chunk) = body.next().await {
        stdout.write_all(&chunk.context("Log stream interrupted")?).await?;
    }
    stdout.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_core::JobPhase;

    #[test]
    fn test_urls() {
        assert_eq!(jobs_url("http://localhost:3000/"), "http://localhost:3000/api/v1/jobs");
        assert_eq!(
            job_url("http://localhost:3000", "kiln-abc", "/logs"),
            "http://localhost:3000/api/v1/jobs/kiln-abc/logs"
        );
    }

    #[test]
    fn test_format_row() {
        let job = JobStatus::new("kiln-abc", JobPhase::Running)
            .with_annotation("owner", "acme")
            .with_annotation("repo", "widgets")
            .with_annotation("rev", "refs/heads/main");
        let row = format_row(&job);
        assert!(row.starts_with("kiln-abc "));
        assert!(row.contains("running"));
        assert!(row.ends_with("acme/widgets@refs/heads/main"));

        let bare = format_row(&JobStatus::new("kiln-x", JobPhase::Pending));
        assert!(bare.ends_with("-/-@-"));
    }
}
