//! Router configuration.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    routing::{get, post},
    Router,
};
use tokio::sync::mpsc;

use crate::handlers;
use crate::models::GuildEvent;
use crate::providers::GuildConnection;
use crate::services::{EventDispatcher, LoginStateSigner};

/// Shared state for the HTTP handlers.
#[derive(Clone)]
pub struct SyncState {
    pub dispatcher: EventDispatcher,
    pub login_state: LoginStateSigner,
    pub connection: Arc<GuildConnection>,
    /// Feeds the dispatcher's event source.
    pub events: mpsc::Sender<GuildEvent>,
    /// Callback URL registered with Discord.
    pub redirect_uri: String,
    pub request_timeout: Duration,
    pub event_relay_token: Option<String>,
}

/// Build the service router.
pub fn sync_router(state: SyncState) -> Router {
    Router::new()
        .route("/auth/discord/login", get(handlers::login))
        .route("/auth/discord/callback", get(handlers::callback))
        .route("/events/membership", post(handlers::relay_event))
        .route("/health", get(handlers::health))
        .with_state(state)
}
