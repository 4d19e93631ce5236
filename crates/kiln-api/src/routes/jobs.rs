//! Job query, status streaming and log endpoints.

use std::convert::Infallible;

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::header;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use futures::stream::{self, Stream, StreamExt};
use kiln_core::store::JobPage;
use kiln_core::{AnnotationFilter, JobStatus};
use tokio_util::io::ReaderStream;
use tracing::debug;

use crate::AppState;
use crate::error::ApiError;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_jobs))
        .route("/{name}", get(get_job))
        .route("/{name}/listen", get(listen))
        .route("/{name}/logs", get(get_logs))
}

/// Query of `GET /api/v1/jobs`: repeated `filter` parameters
/// (`key=value`, `key^=prefix` or `key`), `start` and `limit`.
#[derive(Debug, Default, PartialEq)]
struct ListJobsQuery {
    filters: Vec<AnnotationFilter>,
    start: usize,
    limit: usize,
}

impl ListJobsQuery {
    fn parse(pairs: Vec<(String, String)>) -> Result<Self, ApiError> {
        let mut query = ListJobsQuery::default();
        for (key, value) in pairs {
            match key.as_str() {
                "filter" => query
                    .filters
                    .push(value.parse().map_err(ApiError::BadRequest)?),
                "start" => query.start = parse_number("start", &value)?,
                "limit" => query.limit = parse_number("limit", &value)?,
                other => {
                    return Err(ApiError::BadRequest(format!(
                        "unknown query parameter: {}",
                        other
                    )));
                }
            }
        }
        Ok(query)
    }
}

fn parse_number(name: &str, value: &str) -> Result<usize, ApiError> {
    value
        .parse()
        .map_err(|_| ApiError::BadRequest(format!("invalid {}: {}", name, value)))
}

async fn list_jobs(
    State(state): State<AppState>,
    Query(pairs): Query<Vec<(String, String)>>,
) -> Result<Json<JobPage>, ApiError> {
    let query = ListJobsQuery::parse(pairs)?;
    let page = state
        .jobs
        .find(&query.filters, query.start, query.limit)
        .await?;
    Ok(Json(page))
}

async fn get_job(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<JobStatus>, ApiError> {
    Ok(Json(state.jobs.get(&name).await?))
}

/// Stream a job's status as server-sent `status` events.
///
/// The stored status is sent first. The stream ends after a terminal
/// phase.
async fn listen(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    // Subscribe before reading the store so no update falls in between.
    let updates = state.broker.subscribe(&name);
    let current = match state.jobs.get(&name).await {
        Ok(status) => Some(status),
        Err(e) if e.is_not_found() => None,
        Err(e) => return Err(e.into()),
    };
    debug!(job = %name, known = current.is_some(), "Client listening");

    let finished = current.as_ref().is_some_and(|s| s.phase.is_terminal());
    let updates = if finished {
        stream::empty().boxed()
    } else {
        updates
    };

    let events = stream::iter(current)
        .chain(updates)
        .map(|status| Ok(status_event(&status)));
    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

fn status_event(status: &JobStatus) -> Event {
    Event::default()
        .event("status")
        .data(serde_json::to_string(status).unwrap_or_default())
}

async fn get_logs(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Response, ApiError> {
    let reader = state.logs.read(&name).await?;
    let body = Body::from_stream(ReaderStream::new(reader));
    Ok(([(header::CONTENT_TYPE, "text/plain; charset=utf-8")], body).into_response())
}
