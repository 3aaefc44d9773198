//! Guild event relay endpoint.

use axum::{
    extract::State,
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    Json,
};
use tracing::debug;

use crate::error::SyncError;
use crate::models::GuildEvent;
use crate::router::SyncState;

/// Accept a guild event from the gateway relay and queue it.
pub async fn relay_event(
    State(state): State<SyncState>,
    headers: HeaderMap,
    Json(event): Json<GuildEvent>,
) -> Result<StatusCode, SyncError> {
    if let Some(expected) = &state.event_relay_token {
        let presented = headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "));
        if presented != Some(expected.as_str()) {
            return Err(SyncError::Unauthorized);
        }
    }

    debug!(
        external_id = %event.identity().external_id,
        kind = event.kind(),
        "Received guild event"
    );
    state
        .events
        .send(event)
        .await
        .map_err(|_| SyncError::DispatcherClosed)?;

    Ok(StatusCode::ACCEPTED)
}
