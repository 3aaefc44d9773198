//! Discord `OAuth2` identity resolver.

use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, warn};

use super::{async_trait, IdentityResolver};
use crate::error::{SyncError, SyncResult};
use crate::models::ExternalIdentity;

/// Discord authorize endpoint (browser facing, not under the API base).
const AUTHORIZATION_ENDPOINT: &str = "https://discord.com/oauth2/authorize";

/// Avatar CDN.
const AVATAR_CDN: &str = "https://cdn.discordapp.com/avatars";

/// Scopes requested at login.
const SCOPES: &str = "identify email";

/// Discord token response.
#[derive(Debug, Deserialize)]
#[allow(dead_code)]
struct DiscordTokenResponse {
    access_token: String,
    token_type: String,
    expires_in: Option<i64>,
    scope: Option<String>,
}

/// Discord `/users/@me` response.
#[derive(Debug, Deserialize)]
struct DiscordUser {
    id: String,
    username: String,
    global_name: Option<String>,
    avatar: Option<String>,
    email: Option<String>,
}

impl DiscordUser {
    fn into_identity(self) -> ExternalIdentity {
        let display_name = self
            .global_name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or(self.username);
        let avatar_ref = self
            .avatar
            .map(|hash| format!("{AVATAR_CDN}/{}/{hash}.png", self.id));

        ExternalIdentity {
            external_id: self.id,
            display_name,
            avatar_ref,
            email: self.email,
        }
    }
}

/// Discord `OAuth2` provider.
#[derive(Clone)]
pub struct DiscordOAuthProvider {
    client_id: String,
    client_secret: String,
    api_base: String,
    http_client: Client,
}

impl DiscordOAuthProvider {
    /// Create a new provider against `api_base` (normally `https://discord.com/api`).
    #[must_use]
    pub fn new(client_id: String, client_secret: String, api_base: impl Into<String>) -> Self {
        Self {
            client_id,
            client_secret,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            http_client: Client::new(),
        }
    }

    async fn exchange_code(&self, code: &str, redirect_uri: &str) -> SyncResult<String> {
        let params = [
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", redirect_uri),
        ];

        let response = self
            .http_client
            .post(format!("{}/oauth2/token", self.api_base))
            .header("Accept", "application/json")
            .form(&params)
            .send()
            .await
            .map_err(|e| exchange_error(format!("token request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = %status, error = %body, "Discord token exchange rejected");
            return Err(exchange_error(format!("token endpoint returned HTTP {status}")));
        }

        let token: DiscordTokenResponse = response
            .json()
            .await
            .map_err(|e| exchange_error(format!("malformed token response: {e}")))?;

        Ok(token.access_token)
    }

    async fn fetch_user(&self, access_token: &str) -> SyncResult<DiscordUser> {
        let response = self
            .http_client
            .get(format!("{}/users/@me", self.api_base))
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| exchange_error(format!("profile request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(exchange_error(format!(
                "profile endpoint returned HTTP {status}"
            )));
        }

        response
            .json()
            .await
            .map_err(|e| exchange_error(format!("malformed profile: {e}")))
    }
}

fn exchange_error(reason: String) -> SyncError {
    SyncError::AuthExchange { reason }
}

#[async_trait]
impl IdentityResolver for DiscordOAuthProvider {
    fn authorization_url(&self, redirect_uri: &str, state: &str) -> String {
        format!(
            "{}?response_type=code&client_id={}&scope={}&redirect_uri={}&state={}&prompt=consent",
            AUTHORIZATION_ENDPOINT,
            urlencoding::encode(&self.client_id),
            urlencoding::encode(SCOPES),
            urlencoding::encode(redirect_uri),
            urlencoding::encode(state),
        )
    }

    async fn resolve_identity(
        &self,
        code: &str,
        redirect_uri: &str,
    ) -> SyncResult<ExternalIdentity> {
        let access_token = self.exchange_code(code, redirect_uri).await?;
        let user = self.fetch_user(&access_token).await?;
        let identity = user.into_identity();

        debug!(
            external_id = %identity.external_id,
            display_name = %identity.display_name,
            "Resolved Discord identity"
        );

        Ok(identity)
    }
}
