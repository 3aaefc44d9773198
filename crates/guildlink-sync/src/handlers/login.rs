//! Discord login redirect and callback.

use axum::{
    extract::{Query, State},
    response::{IntoResponse, Redirect, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::SyncError;
use crate::router::SyncState;

#[derive(Debug, Deserialize)]
pub struct LoginQuery {
    pub redirect_after: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LoginResponse {
    pub account_id: Uuid,
    pub created: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect_after: Option<String>,
}

/// Only relative paths starting with `/` (rejects `//`, `://`, `\`).
fn sanitize_redirect_after(redirect: &str) -> Option<&str> {
    let trimmed = redirect.trim();
    if !trimmed.starts_with('/')
        || trimmed.starts_with("//")
        || trimmed.starts_with("/\\")
        || trimmed.contains("://")
    {
        return None;
    }
    Some(trimmed)
}

/// Start the login flow by redirecting to Discord.
pub async fn login(
    State(state): State<SyncState>,
    Query(query): Query<LoginQuery>,
) -> Result<Response, SyncError> {
    let redirect_after = query
        .redirect_after
        .as_deref()
        .and_then(sanitize_redirect_after)
        .map(ToString::to_string);

    let state_token = state.login_state.issue(redirect_after)?;
    let url = state
        .dispatcher
        .engine()
        .identity_resolver()
        .authorization_url(&state.redirect_uri, &state_token);

    Ok(Redirect::to(&url).into_response())
}

/// Handle the Discord callback: link the account and apply permissions.
pub async fn callback(
    State(state): State<SyncState>,
    Query(query): Query<CallbackQuery>,
) -> Result<Json<LoginResponse>, SyncError> {
    if let Some(error) = &query.error {
        warn!(
            error = %error,
            description = ?query.error_description,
            "Discord returned an error"
        );
        return Err(SyncError::InvalidCallback {
            reason: format!("provider error: {error}"),
        });
    }

    let state_token = query.state.as_deref().ok_or(SyncError::InvalidState {
        reason: "missing state".to_string(),
    })?;
    let claims = state.login_state.verify(state_token)?;

    let code = query.code.as_deref().ok_or(SyncError::InvalidCallback {
        reason: "Missing authorization code".to_string(),
    })?;

    let outcome = tokio::time::timeout(
        state.request_timeout,
        state.dispatcher.login(code, &state.redirect_uri),
    )
    .await
    .map_err(|_| SyncError::Timeout {
        seconds: state.request_timeout.as_secs(),
    })??;

    info!(
        account_id = %outcome.account_id,
        created = outcome.created,
        "Discord login completed"
    );

    Ok(Json(LoginResponse {
        account_id: outcome.account_id,
        created: outcome.created,
        redirect_after: claims.redirect_after,
    }))
}
