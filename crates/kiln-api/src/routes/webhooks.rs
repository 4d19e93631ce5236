//! Webhook endpoint for GitHub.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::routing::post;
use axum::{Json, Router};
use hmac::{Hmac, Mac};
use kiln_core::{TriggerContext, TriggerKind};
use kiln_pipeline::RepositoryEvent;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::{info, warn};

use crate::AppState;
use crate::error::ApiError;

pub fn router() -> Router<AppState> {
    Router::new().route("/github", post(github_webhook))
}

#[derive(Debug, Serialize)]
struct WebhookResponse {
    job: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RepositoryPayload {
    repository: Repository,
    #[serde(rename = "ref")]
    git_ref: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Repository {
    name: String,
    owner: Owner,
}

#[derive(Debug, Deserialize)]
struct Owner {
    name: Option<String>,
    login: Option<String>,
}

/// Handle GitHub webhook events.
async fn github_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookResponse>, ApiError> {
    let event_type = headers
        .get("X-GitHub-Event")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown");

    if let Some(secret) = &state.webhook_secret {
        let signature = headers
            .get("X-Hub-Signature-256")
            .and_then(|v| v.to_str().ok());
        if !verify_github_signature(secret, &body, signature) {
            warn!(event = %event_type, "Invalid webhook signature");
            return Err(ApiError::Unauthorized("invalid signature".to_string()));
        }
    }

    info!(event = %event_type, "Received GitHub webhook");

    if event_type == "ping" {
        info!("Ping event received - webhook is configured correctly");
        return Ok(Json(WebhookResponse { job: None }));
    }

    let event = parse_event(event_type, &body)?;
    let job = state.dispatcher.dispatch(event).await?;
    Ok(Json(WebhookResponse { job }))
}

/// Turn a GitHub event into a repository event.
fn parse_event(event_type: &str, body: &[u8]) -> Result<RepositoryEvent, ApiError> {
    let kind = match event_type {
        "push" => TriggerKind::Push,
        "commit_comment" => TriggerKind::Comment,
        "create" => TriggerKind::Create,
        other => return Ok(RepositoryEvent::Unsupported(other.to_string())),
    };

    let payload: RepositoryPayload = serde_json::from_slice(body)
        .map_err(|e| ApiError::BadRequest(format!("Invalid {} payload: {}", event_type, e)))?;

    let owner = payload
        .repository
        .owner
        .name
        .or(payload.repository.owner.login)
        .ok_or_else(|| ApiError::BadRequest("repository owner missing".to_string()))?;
    let revision = match (kind, payload.git_ref) {
        (_, Some(git_ref)) => git_ref,
        (TriggerKind::Comment, None) => String::new(),
        (_, None) => return Err(ApiError::BadRequest("ref missing".to_string())),
    };

    Ok(RepositoryEvent::Trigger {
        kind,
        context: TriggerContext::new(owner, payload.repository.name, revision),
    })
}

/// Verify GitHub webhook signature.
fn verify_github_signature(secret: &str, body: &[u8], signature: Option<&str>) -> bool {
    let Some(signature) = signature else {
        return false;
    };

    // Signature format: "sha256=<hex>"
    let Some(sig_hex) = signature.strip_prefix("sha256=") else {
        return false;
    };

    let Ok(sig_bytes) = hex::decode(sig_hex) else {
        return false;
    };

    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);

    mac.verify_slice(&sig_bytes).is_ok()
}
