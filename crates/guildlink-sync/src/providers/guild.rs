//! Guild connection and membership lookups through the Discord bot API.
//!
//! [`GuildConnection`] is an explicitly owned object with a lifecycle
//! (`connect`, `reconnect`, `shutdown`). It is shared by the membership
//! provider and the dispatcher instead of living in global state.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use parking_lot::RwLock;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use super::{async_trait, MembershipProvider};
use crate::config::DiscordConfig;
use crate::error::{SyncError, SyncResult};
use crate::models::MembershipSnapshot;

/// Bot credentials and target guild.
#[derive(Clone)]
pub struct GuildSettings {
    pub bot_token: String,
    /// Empty disables membership gating.
    pub guild_id: String,
    pub api_base: String,
}

impl GuildSettings {
    #[must_use]
    pub fn from_config(config: &DiscordConfig) -> Self {
        Self {
            bot_token: config.bot_token.clone(),
            guild_id: config.guild_id.clone(),
            api_base: config.api_base.trim_end_matches('/').to_string(),
        }
    }
}

/// Lifecycle state of the connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ConnectionStatus {
    Disconnected,
    Connected { bot_user: String, guilds: Vec<String> },
    Shutdown,
}

#[derive(Debug, Deserialize)]
struct BotUser {
    id: String,
    username: String,
}

#[derive(Debug, Deserialize)]
struct PartialGuild {
    id: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct GuildMember {
    #[serde(default)]
    roles: Vec<String>,
}

/// JSON error code Discord sends with a 404 for a user outside the guild.
/// Other 404 codes (unknown guild, missing access) are lookup failures.
const UNKNOWN_MEMBER: u64 = 10007;

#[derive(Debug, Deserialize)]
struct DiscordErrorBody {
    code: u64,
}

#[derive(Debug, Deserialize)]
struct GuildRole {
    id: String,
    name: String,
}

/// Owned connection to the Discord bot API.
pub struct GuildConnection {
    settings: RwLock<GuildSettings>,
    status: RwLock<ConnectionStatus>,
    http_client: Client,
}

impl GuildConnection {
    /// Create a disconnected connection. Call [`GuildConnection::connect`]
    /// before issuing lookups.
    #[must_use]
    pub fn new(settings: GuildSettings) -> Self {
        Self {
            settings: RwLock::new(settings),
            status: RwLock::new(ConnectionStatus::Disconnected),
            http_client: Client::new(),
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        self.status.read().clone()
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        matches!(*self.status.read(), ConnectionStatus::Connected { .. })
    }

    /// Configured guild id; empty when gating is disabled.
    #[must_use]
    pub fn guild_id(&self) -> String {
        self.settings.read().guild_id.clone()
    }

    /// Validate the bot token and record the guilds the bot can see.
    pub async fn connect(&self) -> SyncResult<()> {
        if *self.status.read() == ConnectionStatus::Shutdown {
            return Err(lookup_error("connection has been shut down".to_string()));
        }

        let bot: BotUser = self.get_json(self.build(Method::GET, "/users/@me")).await?;
        let guilds: Vec<PartialGuild> = self
            .get_json(self.build(Method::GET, "/users/@me/guilds"))
            .await?;

        for guild in &guilds {
            info!(guild_id = %guild.id, guild_name = %guild.name, "Bot is in guild");
        }

        let guild_id = self.guild_id();
        if !guild_id.is_empty() && !guilds.iter().any(|g| g.id == guild_id) {
            warn!(guild_id = %guild_id, "Bot is not a member of the configured guild");
        }

        info!(bot_id = %bot.id, bot_user = %bot.username, "Connected to Discord");
        *self.status.write() = ConnectionStatus::Connected {
            bot_user: bot.username,
            guilds: guilds.into_iter().map(|g| g.id).collect(),
        };
        Ok(())
    }

    /// Tear down and connect again, optionally with new settings.
    pub async fn reconnect(&self, settings: Option<GuildSettings>) -> SyncResult<()> {
        info!("Reconnecting to Discord");
        if let Some(settings) = settings {
            *self.settings.write() = settings;
        }
        *self.status.write() = ConnectionStatus::Disconnected;
        self.connect().await
    }

    /// Close the connection. Later lookups fail.
    pub fn shutdown(&self) {
        info!("Shutting down Discord connection");
        *self.status.write() = ConnectionStatus::Shutdown;
    }

    fn build(&self, method: Method, path: &str) -> RequestBuilder {
        let settings = self.settings.read();
        self.http_client
            .request(method, format!("{}{}", settings.api_base, path))
            .header("Authorization", format!("Bot {}", settings.bot_token))
    }

    /// Build an authorized request, failing unless connected.
    fn request(&self, method: Method, path: &str) -> SyncResult<RequestBuilder> {
        if !self.is_connected() {
            return Err(lookup_error(format!(
                "Discord connection is not established ({:?})",
                self.status()
            )));
        }
        Ok(self.build(method, path))
    }

    async fn guild_roles(&self, guild_id: &str) -> SyncResult<HashMap<String, String>> {
        let request = self.request(Method::GET, &format!("/guilds/{guild_id}/roles"))?;
        let roles: Vec<GuildRole> = self.get_json(request).await?;
        Ok(roles.into_iter().map(|r| (r.id, r.name)).collect())
    }

    async fn guild_member(&self, guild_id: &str, user_id: &str) -> SyncResult<Option<GuildMember>> {
        let request = self.request(Method::GET, &format!("/guilds/{guild_id}/members/{user_id}"))?;
        let response = self.send(request).await?;

        match response.status() {
            StatusCode::NOT_FOUND => {
                let code = response.json::<DiscordErrorBody>().await.ok().map(|b| b.code);
                if code == Some(UNKNOWN_MEMBER) {
                    return Ok(None);
                }
                Err(lookup_error(format!(
                    "Discord returned HTTP 404 for the member lookup (code {code:?})"
                )))
            }
            status if status.is_success() => response
                .json()
                .await
                .map(Some)
                .map_err(|e| lookup_error(format!("malformed member: {e}"))),
            status => Err(lookup_error(format!("Discord returned HTTP {status}"))),
        }
    }

    async fn add_member_role(&self, guild_id: &str, user_id: &str, role_id: &str) -> SyncResult<()> {
        let request = self.request(
            Method::PUT,
            &format!("/guilds/{guild_id}/members/{user_id}/roles/{role_id}"),
        )?;
        let response = self.send(request).await?;

        let status = response.status();
        if !status.is_success() {
            return Err(lookup_error(format!("Discord returned HTTP {status}")));
        }
        Ok(())
    }

    /// Send a request. An unreachable API or a rejected bot token drops the
    /// connection to `Disconnected` so the supervisor reconnects it.
    async fn send(&self, request: RequestBuilder) -> SyncResult<Response> {
        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                self.mark_disconnected("transport error");
                return Err(lookup_error(format!("request failed: {e}")));
            }
        };
        if response.status() == StatusCode::UNAUTHORIZED {
            self.mark_disconnected("bot token rejected");
            return Err(lookup_error("Discord rejected the bot token".to_string()));
        }
        Ok(response)
    }

    async fn get_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> SyncResult<T> {
        let response = self.send(request).await?;

        let status = response.status();
        if !status.is_success() {
            return Err(lookup_error(format!("Discord returned HTTP {status}")));
        }
        response
            .json()
            .await
            .map_err(|e| lookup_error(format!("malformed response: {e}")))
    }

    fn mark_disconnected(&self, reason: &str) {
        let mut status = self.status.write();
        if matches!(*status, ConnectionStatus::Connected { .. }) {
            warn!(reason = %reason, "Discord connection lost");
            *status = ConnectionStatus::Disconnected;
        }
    }
}

fn lookup_error(reason: String) -> SyncError {
    SyncError::MembershipLookup { reason }
}

/// Membership provider backed by a [`GuildConnection`].
#[derive(Clone)]
pub struct GuildMembershipProvider {
    connection: Arc<GuildConnection>,
}

impl GuildMembershipProvider {
    #[must_use]
    pub fn new(connection: Arc<GuildConnection>) -> Self {
        Self { connection }
    }
}

#[async_trait]
impl MembershipProvider for GuildMembershipProvider {
    fn gating_enabled(&self) -> bool {
        !self.connection.guild_id().is_empty()
    }

    async fn snapshot(&self, external_id: &str) -> SyncResult<MembershipSnapshot> {
        let guild_id = self.connection.guild_id();
        if guild_id.is_empty() {
            return Ok(MembershipSnapshot::member(Vec::<String>::new()));
        }

        let Some(member) = self.connection.guild_member(&guild_id, external_id).await? else {
            return Ok(MembershipSnapshot::not_member());
        };
        let roles = self.connection.guild_roles(&guild_id).await?;

        // @everyone shares the guild id
        let role_names: BTreeSet<String> = member
            .roles
            .iter()
            .filter(|id| **id != guild_id)
            .filter_map(|id| roles.get(id).cloned())
            .collect();

        Ok(MembershipSnapshot {
            is_member: true,
            role_names,
        })
    }

    async fn grant_default_roles(
        &self,
        external_id: &str,
        role_ids: &[String],
    ) -> SyncResult<BTreeSet<String>> {
        let guild_id = self.connection.guild_id();
        if guild_id.is_empty() || role_ids.is_empty() {
            return Ok(BTreeSet::new());
        }

        let roles = self.connection.guild_roles(&guild_id).await?;
        let mut granted = BTreeSet::new();

        for role_id in role_ids {
            let Some(name) = roles.get(role_id) else {
                warn!(role_id = %role_id, guild_id = %guild_id, "Default role not found in guild");
                continue;
            };
            match self
                .connection
                .add_member_role(&guild_id, external_id, role_id)
                .await
            {
                Ok(()) => {
                    granted.insert(name.clone());
                }
                Err(e) => {
                    error!(
                        external_id = %external_id,
                        role_id = %role_id,
                        error = %e,
                        "Failed to grant default role"
                    );
                }
            }
        }

        Ok(granted)
    }
}
