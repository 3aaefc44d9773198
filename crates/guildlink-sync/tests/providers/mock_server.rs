//! Mock Discord and Jellyfin servers.

use serde_json::json;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const TEST_AUTH_CODE: &str = "test-auth-code";
pub const TEST_ACCESS_TOKEN: &str = "test-access-token";
pub const TEST_BOT_TOKEN: &str = "test-bot-token";
pub const TEST_API_KEY: &str = "test-api-key";
pub const TEST_GUILD_ID: &str = "1000";
pub const TEST_REDIRECT_URI: &str = "https://media.example.com/auth/discord/callback";

/// Setup mock token endpoint that returns success response
pub async fn setup_token_endpoint_success(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/oauth2/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": TEST_ACCESS_TOKEN,
            "token_type": "Bearer",
            "expires_in": 604800,
            "refresh_token": "refresh",
            "scope": "identify email"
        })))
        .mount(server)
        .await;
}

/// Setup mock token endpoint that returns error response
pub async fn setup_token_endpoint_error(server: &MockServer, status_code: u16) {
    Mock::given(method("POST"))
        .and(path("/oauth2/token"))
        .respond_with(ResponseTemplate::new(status_code).set_body_json(json!({
            "error": "invalid_grant",
            "error_description": "Invalid \"code\" in request."
        })))
        .mount(server)
        .await;
}

/// Setup `/users/@me` for the user's access token
pub async fn setup_user_profile(server: &MockServer, body: serde_json::Value) {
    Mock::given(method("GET"))
        .and(path("/users/@me"))
        .and(header("Authorization", format!("Bearer {TEST_ACCESS_TOKEN}").as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

/// Setup the bot identity and guild list used by `GuildConnection::connect`
pub async fn setup_bot_endpoints(server: &MockServer) {
    let bot_auth = format!("Bot {TEST_BOT_TOKEN}");
    Mock::given(method("GET"))
        .and(path("/users/@me"))
        .and(header("Authorization", bot_auth.as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "555",
            "username": "guildlink-bot",
            "bot": true
        })))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/users/@me/guilds"))
        .and(header("Authorization", bot_auth.as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"id": TEST_GUILD_ID, "name": "Movie Night"}
        ])))
        .mount(server)
        .await;
}

/// Setup the guild role list
pub async fn setup_guild_roles(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path(format!("/guilds/{TEST_GUILD_ID}/roles")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"id": TEST_GUILD_ID, "name": "@everyone"},
            {"id": "r-admin", "name": "Admin"},
            {"id": "r-kids", "name": "Kids"},
            {"id": "r-member", "name": "Member"}
        ])))
        .mount(server)
        .await;
}

/// Setup a guild member lookup
pub async fn setup_guild_member(server: &MockServer, user_id: &str, role_ids: &[&str]) {
    Mock::given(method("GET"))
        .and(path(format!("/guilds/{TEST_GUILD_ID}/members/{user_id}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "user": {"id": user_id, "username": "alice"},
            "roles": role_ids
        })))
        .mount(server)
        .await;
}

/// Setup a member lookup that reports the user is not in the guild
pub async fn setup_guild_member_missing(server: &MockServer, user_id: &str) {
    Mock::given(method("GET"))
        .and(path(format!("/guilds/{TEST_GUILD_ID}/members/{user_id}")))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "message": "Unknown Member",
            "code": 10007
        })))
        .mount(server)
        .await;
}

/// Jellyfin user document
pub fn jellyfin_user(id: &str, name: &str) -> serde_json::Value {
    json!({
        "Name": name,
        "ServerId": "server-1",
        "Id": id,
        "HasPassword": true,
        "Policy": {
            "IsAdministrator": false,
            "IsDisabled": false,
            "EnableContentDeletion": false,
            "EnableAllFolders": true,
            "EnabledFolders": [],
            "AuthenticationProviderId": "Default",
            "PasswordResetProviderId": "DefaultReset",
            "EnableRemoteAccess": true
        }
    })
}
