//! Discord `OAuth2` Integration Tests
//!
//! Tests for the Discord login flow including:
//! - Token exchange
//! - Profile retrieval and identity mapping
//! - Error scenarios

use serde_json::json;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use guildlink_sync::providers::{DiscordOAuthProvider, IdentityResolver};
use guildlink_sync::SyncError;

use super::mock_server::{
    setup_token_endpoint_error, setup_token_endpoint_success, setup_user_profile, TEST_AUTH_CODE,
    TEST_REDIRECT_URI,
};

fn provider(server: &MockServer) -> DiscordOAuthProvider {
    DiscordOAuthProvider::new("1234".to_string(), "secret".to_string(), server.uri())
}

#[tokio::test]
async fn test_discord_resolve_identity() {
    let server = MockServer::start().await;
    setup_token_endpoint_success(&server).await;
    setup_user_profile(
        &server,
        json!({
            "id": "80351110224678912",
            "username": "nelly",
            "global_name": "Nelly",
            "avatar": "8342729096ea3675442027381ff50dfe",
            "email": "nelly@discord.com",
            "verified": true
        }),
    )
    .await;

    let identity = provider(&server)
        .resolve_identity(TEST_AUTH_CODE, TEST_REDIRECT_URI)
        .await
        .unwrap();

    assert_eq!(identity.external_id, "80351110224678912");
    assert_eq!(identity.display_name, "Nelly");
    assert_eq!(identity.email.as_deref(), Some("nelly@discord.com"));
    assert!(identity.avatar_ref.unwrap().ends_with(".png"));
}

#[tokio::test]
async fn test_discord_token_request_is_form_encoded() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth2/token"))
        .and(body_string_contains("grant_type=authorization_code"))
        .and(body_string_contains(format!("code={TEST_AUTH_CODE}").as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "test-access-token",
            "token_type": "Bearer"
        })))
        .expect(1)
        .mount(&server)
        .await;
    setup_user_profile(&server, json!({"id": "1", "username": "bob"})).await;

    let identity = provider(&server)
        .resolve_identity(TEST_AUTH_CODE, TEST_REDIRECT_URI)
        .await
        .unwrap();

    assert_eq!(identity.display_name, "bob");
    assert!(identity.email.is_none());
}

#[tokio::test]
async fn test_discord_invalid_code() {
    let server = MockServer::start().await;
    setup_token_endpoint_error(&server, 400).await;

    let err = provider(&server)
        .resolve_identity("expired", TEST_REDIRECT_URI)
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::AuthExchange { .. }));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_discord_malformed_profile() {
    let server = MockServer::start().await;
    setup_token_endpoint_success(&server).await;
    setup_user_profile(&server, json!({"username": "no-id"})).await;

    let err = provider(&server)
        .resolve_identity(TEST_AUTH_CODE, TEST_REDIRECT_URI)
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::AuthExchange { .. }));
}

#[tokio::test]
async fn test_discord_profile_unauthorized() {
    let server = MockServer::start().await;
    setup_token_endpoint_success(&server).await;
    Mock::given(method("GET"))
        .and(path("/users/@me"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let err = provider(&server)
        .resolve_identity(TEST_AUTH_CODE, TEST_REDIRECT_URI)
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::AuthExchange { .. }));
}
