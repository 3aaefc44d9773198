//! Guild connection and membership provider tests.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use guildlink_sync::providers::{
    ConnectionStatus, GuildConnection, GuildMembershipProvider, GuildSettings, MembershipProvider,
};
use guildlink_sync::SyncError;

use super::mock_server::{
    setup_bot_endpoints, setup_guild_member, setup_guild_member_missing, setup_guild_roles,
    TEST_BOT_TOKEN, TEST_GUILD_ID,
};

fn settings(server: &MockServer) -> GuildSettings {
    GuildSettings {
        bot_token: TEST_BOT_TOKEN.to_string(),
        guild_id: TEST_GUILD_ID.to_string(),
        api_base: server.uri(),
    }
}

async fn connected(server: &MockServer) -> Arc<GuildConnection> {
    setup_bot_endpoints(server).await;
    let connection = Arc::new(GuildConnection::new(settings(server)));
    connection.connect().await.unwrap();
    connection
}

#[tokio::test]
async fn test_guild_connect_records_guilds() {
    let server = MockServer::start().await;
    let connection = connected(&server).await;

    match connection.status() {
        ConnectionStatus::Connected { bot_user, guilds } => {
            assert_eq!(bot_user, "guildlink-bot");
            assert_eq!(guilds, vec![TEST_GUILD_ID.to_string()]);
        }
        other => panic!("unexpected status {other:?}"),
    }
}

#[tokio::test]
async fn test_guild_connect_rejected_token() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/users/@me"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let connection = GuildConnection::new(settings(&server));
    assert!(connection.connect().await.is_err());
    assert_eq!(connection.status(), ConnectionStatus::Disconnected);
}

#[tokio::test]
async fn test_guild_snapshot_maps_role_names() {
    let server = MockServer::start().await;
    let connection = connected(&server).await;
    setup_guild_roles(&server).await;
    setup_guild_member(&server, "42", &[TEST_GUILD_ID, "r-kids", "r-member", "r-gone"]).await;

    let provider = GuildMembershipProvider::new(connection);
    let snapshot = provider.snapshot("42").await.unwrap();

    assert!(snapshot.is_member);
    assert_eq!(
        snapshot.role_names,
        BTreeSet::from(["Kids".to_string(), "Member".to_string()])
    );
}

#[tokio::test]
async fn test_guild_snapshot_not_a_member() {
    let server = MockServer::start().await;
    let connection = connected(&server).await;
    setup_guild_member_missing(&server, "42").await;

    let snapshot = GuildMembershipProvider::new(connection)
        .snapshot("42")
        .await
        .unwrap();

    assert!(!snapshot.is_member);
    assert!(snapshot.role_names.is_empty());
}

#[tokio::test]
async fn test_guild_outage_is_lookup_error_not_non_member() {
    let server = MockServer::start().await;
    let connection = connected(&server).await;
    Mock::given(method("GET"))
        .and(path(format!("/guilds/{TEST_GUILD_ID}/members/42")))
        .respond_with(ResponseTemplate::new(502))
        .mount(&server)
        .await;

    let err = GuildMembershipProvider::new(connection)
        .snapshot("42")
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::MembershipLookup { .. }));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_guild_grant_default_roles_skips_unknown_and_failed() {
    let server = MockServer::start().await;
    let connection = connected(&server).await;
    setup_guild_roles(&server).await;
    Mock::given(method("PUT"))
        .and(path(format!("/guilds/{TEST_GUILD_ID}/members/42/roles/r-member")))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path(format!("/guilds/{TEST_GUILD_ID}/members/42/roles/r-kids")))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    let granted = GuildMembershipProvider::new(connection)
        .grant_default_roles(
            "42",
            &["r-member".to_string(), "r-kids".to_string(), "r-missing".to_string()],
        )
        .await
        .unwrap();

    assert_eq!(granted, BTreeSet::from(["Member".to_string()]));
}

#[tokio::test]
async fn test_guild_reconnect_with_new_settings() {
    let first = MockServer::start().await;
    let second = MockServer::start().await;
    let connection = connected(&first).await;
    setup_bot_endpoints(&second).await;

    connection.reconnect(Some(settings(&second))).await.unwrap();

    assert!(connection.is_connected());
    assert_eq!(connection.guild_id(), TEST_GUILD_ID);
}

#[tokio::test]
async fn test_guild_lookups_fail_after_shutdown() {
    let server = MockServer::start().await;
    let connection = connected(&server).await;
    connection.shutdown();

    let err = GuildMembershipProvider::new(connection)
        .snapshot("42")
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::MembershipLookup { .. }));
}

#[tokio::test]
async fn test_guild_unknown_guild_is_lookup_error() {
    let server = MockServer::start().await;
    let connection = connected(&server).await;
    Mock::given(method("GET"))
        .and(path(format!("/guilds/{TEST_GUILD_ID}/members/42")))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "message": "Unknown Guild",
            "code": 10004
        })))
        .mount(&server)
        .await;

    let err = GuildMembershipProvider::new(connection)
        .snapshot("42")
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::MembershipLookup { .. }));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_guild_rejected_token_drops_connection() {
    let server = MockServer::start().await;
    let connection = connected(&server).await;
    Mock::given(method("GET"))
        .and(path(format!("/guilds/{TEST_GUILD_ID}/members/42")))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let err = GuildMembershipProvider::new(Arc::clone(&connection))
        .snapshot("42")
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::MembershipLookup { .. }));
    assert_eq!(connection.status(), ConnectionStatus::Disconnected);
}

#[tokio::test]
async fn test_guild_unreachable_api_drops_connection() {
    let server = MockServer::start().await;
    let connection = connected(&server).await;
    drop(server);

    let err = GuildMembershipProvider::new(Arc::clone(&connection))
        .snapshot("42")
        .await
        .unwrap_err();

    assert!(err.is_retryable());
    assert_eq!(connection.status(), ConnectionStatus::Disconnected);
}
