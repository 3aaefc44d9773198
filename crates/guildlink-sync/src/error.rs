//! Sync error types.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

/// Errors raised while linking identities and reconciling account state.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Authorization code exchange failed: {reason}")]
    AuthExchange { reason: String },

    #[error("Membership lookup failed: {reason}")]
    MembershipLookup { reason: String },

    #[error("Not a member of the configured community")]
    NotAMember,

    #[error("No role other than the default role is held")]
    NoEligibleRole,

    #[error("Failed to create account '{name}': {reason}")]
    AccountCreation { name: String, reason: String },

    #[error("Failed to update account {account_id}: {reason}")]
    AccountUpdate { account_id: Uuid, reason: String },

    #[error("Directory {operation} failed: {reason}")]
    Directory { operation: String, reason: String },

    #[error("Account {account_id} is already linked to another identity")]
    AccountAlreadyLinked { account_id: Uuid },

    #[error("Identity link store error: {reason}")]
    LinkStore { reason: String },

    #[error("Invalid login callback: {reason}")]
    InvalidCallback { reason: String },

    #[error("Invalid state parameter: {reason}")]
    InvalidState { reason: String },

    #[error("Missing or invalid credentials")]
    Unauthorized,

    #[error("Reconciliation timed out after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("Dispatcher is shut down")]
    DispatcherClosed,

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("JWT error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),
}

/// Error body returned by the HTTP handlers.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    pub retryable: bool,
}

impl SyncError {
    /// Stable error code for API responses.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            SyncError::AuthExchange { .. } => "auth_exchange_failed",
            SyncError::MembershipLookup { .. } => "membership_lookup_failed",
            SyncError::NotAMember => "not_a_member",
            SyncError::NoEligibleRole => "no_eligible_role",
            SyncError::AccountCreation { .. } => "account_creation_failed",
            SyncError::AccountUpdate { .. } => "account_update_failed",
            SyncError::Directory { .. } => "directory_error",
            SyncError::AccountAlreadyLinked { .. } => "account_already_linked",
            SyncError::LinkStore { .. } => "link_store_error",
            SyncError::InvalidCallback { .. } => "invalid_callback",
            SyncError::InvalidState { .. } => "invalid_state",
            SyncError::Unauthorized => "unauthorized",
            SyncError::Timeout { .. } => "timeout",
            SyncError::DispatcherClosed => "unavailable",
            SyncError::Http(_) => "http_error",
            SyncError::Json(_) => "json_error",
            SyncError::Jwt(_) => "jwt_error",
        }
    }

    /// HTTP status code for this error.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            SyncError::AuthExchange { .. } => StatusCode::BAD_GATEWAY,
            SyncError::MembershipLookup { .. } => StatusCode::SERVICE_UNAVAILABLE,
            SyncError::NotAMember | SyncError::NoEligibleRole => StatusCode::FORBIDDEN,
            SyncError::AccountCreation { .. } | SyncError::AccountUpdate { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            SyncError::Directory { .. } => StatusCode::BAD_GATEWAY,
            SyncError::AccountAlreadyLinked { .. } => StatusCode::CONFLICT,
            SyncError::LinkStore { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            SyncError::InvalidCallback { .. } | SyncError::InvalidState { .. } => {
                StatusCode::BAD_REQUEST
            }
            SyncError::Unauthorized => StatusCode::UNAUTHORIZED,
            SyncError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            SyncError::DispatcherClosed => StatusCode::SERVICE_UNAVAILABLE,
            SyncError::Http(_) => StatusCode::BAD_GATEWAY,
            SyncError::Json(_) | SyncError::Jwt(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether the caller may retry the same request later.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::MembershipLookup { .. }
                | SyncError::Timeout { .. }
                | SyncError::AuthExchange { .. }
                | SyncError::DispatcherClosed
                | SyncError::Http(_)
        )
    }

    /// Expected rejections that are not system faults.
    #[must_use]
    pub fn is_rejection(&self) -> bool {
        matches!(self, SyncError::NotAMember | SyncError::NoEligibleRole)
    }
}

impl IntoResponse for SyncError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = match &self {
            SyncError::NotAMember => {
                tracing::info!("Login rejected: not a community member");
                "You must be a member of the community to access the media server.".to_string()
            }
            SyncError::NoEligibleRole => {
                tracing::info!("Login rejected: no eligible role");
                "You must hold a role other than the default role to access the media server."
                    .to_string()
            }
            SyncError::AuthExchange { reason } => {
                tracing::warn!(reason = %reason, "Authorization exchange failed");
                "Login with Discord failed, please try again.".to_string()
            }
            SyncError::MembershipLookup { reason } => {
                tracing::warn!(reason = %reason, "Membership lookup failed");
                "Could not verify community membership, please try again later.".to_string()
            }
            SyncError::Timeout { .. } => "The request timed out, please try again.".to_string(),
            SyncError::InvalidState { reason } => {
                tracing::warn!(reason = %reason, "Invalid OAuth state");
                "Invalid or expired state parameter".to_string()
            }
            SyncError::InvalidCallback { reason } => {
                tracing::warn!(reason = %reason, "Invalid login callback");
                "Invalid login callback".to_string()
            }
            SyncError::Unauthorized => self.to_string(),
            SyncError::AccountAlreadyLinked { .. } => self.to_string(),
            other => {
                tracing::error!(error = %other, "Sync request failed");
                "Something went wrong".to_string()
            }
        };
        let body = ErrorResponse {
            error: self.error_code().to_string(),
            message,
            retryable: self.is_retryable(),
        };

        (status, axum::Json(body)).into_response()
    }
}

/// Result alias for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;
