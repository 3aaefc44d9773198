//! Jellyfin directory client tests.

use std::collections::BTreeSet;

use serde_json::json;
use uuid::Uuid;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use guildlink_sync::directory::{AccountDirectory, JellyfinDirectory};
use guildlink_sync::models::TargetPermissionState;
use guildlink_sync::SyncError;

use super::mock_server::{jellyfin_user, TEST_API_KEY};

const USER_ID: &str = "4e1b1d1a-e9e8-4b3a-9a4c-2e3b8b0b1c2d";

fn directory(server: &MockServer) -> JellyfinDirectory {
    JellyfinDirectory::new(server.uri(), TEST_API_KEY)
}

fn user_id() -> Uuid {
    Uuid::parse_str(USER_ID).unwrap()
}

#[tokio::test]
async fn test_jellyfin_find_by_name_ignores_case() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/Users"))
        .and(header("X-Emby-Token", TEST_API_KEY))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            jellyfin_user("00000000-0000-0000-0000-000000000001", "bob"),
            jellyfin_user(USER_ID, "Alice"),
        ])))
        .mount(&server)
        .await;

    let account = directory(&server).find_by_name("alice").await.unwrap().unwrap();
    assert_eq!(account.id, user_id());
    assert_eq!(account.name, "Alice");
}

#[tokio::test]
async fn test_jellyfin_find_by_id_missing() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("/Users/{USER_ID}")))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    assert!(directory(&server).find_by_id(user_id()).await.unwrap().is_none());
}

#[tokio::test]
async fn test_jellyfin_create_user() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/Users/New"))
        .and(header("X-Emby-Token", TEST_API_KEY))
        .and(body_partial_json(json!({"Name": "alice"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(jellyfin_user(USER_ID, "alice")))
        .expect(1)
        .mount(&server)
        .await;

    let account = directory(&server).create("alice", "secret").await.unwrap();
    assert_eq!(account.id, user_id());
}

#[tokio::test]
async fn test_jellyfin_create_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/Users/New"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let err = directory(&server).create("alice", "secret").await.unwrap_err();
    assert!(matches!(err, SyncError::AccountCreation { ref name, .. } if name == "alice"));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn test_jellyfin_rename_echoes_user_document() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("/Users/{USER_ID}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(jellyfin_user(USER_ID, "alice")))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(format!("/Users/{USER_ID}")))
        .and(body_partial_json(json!({"Name": "Alice W", "ServerId": "server-1"})))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    directory(&server).rename(user_id(), "Alice W").await.unwrap();
}

#[tokio::test]
async fn test_jellyfin_policy_write_keeps_unmanaged_fields() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("/Users/{USER_ID}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(jellyfin_user(USER_ID, "alice")))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(format!("/Users/{USER_ID}/Policy")))
        .and(body_partial_json(json!({
            "EnableAllFolders": false,
            "EnabledFolders": ["lib-1"],
            "PasswordResetProviderId": "DefaultReset",
            "EnableRemoteAccess": true
        })))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let directory = directory(&server);
    let account = directory.find_by_id(user_id()).await.unwrap().unwrap();
    let mut policy = account.policy;
    policy.apply_target(&TargetPermissionState {
        visible_library_ids: BTreeSet::from(["lib-1".to_string()]),
        ..TargetPermissionState::default()
    });

    directory.update_policy(user_id(), &policy).await.unwrap();
}

#[tokio::test]
async fn test_jellyfin_policy_write_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(format!("/Users/{USER_ID}/Policy")))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let err = directory(&server)
        .update_policy(user_id(), &Default::default())
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::AccountUpdate { account_id, .. } if account_id == user_id()));
}

#[tokio::test]
async fn test_jellyfin_libraries() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/Library/VirtualFolders"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"Name": "Kids", "ItemId": "lib-1", "CollectionType": "movies"},
            {"Name": "Movies", "ItemId": "lib-2"}
        ])))
        .mount(&server)
        .await;

    let libraries = directory(&server).libraries().await.unwrap();
    assert_eq!(libraries.len(), 2);
    assert_eq!(libraries[0].name, "Kids");
    assert_eq!(libraries[0].id, "lib-1");
}
