//! Service configuration loaded from environment variables.

use std::env::VarError;
use std::net::SocketAddr;
use std::time::Duration;

/// Default Discord REST base URL.
pub const DEFAULT_DISCORD_API_BASE: &str = "https://discord.com/api";

/// Default administrator role name.
pub const DEFAULT_ADMIN_ROLE: &str = "Admin";

/// Discord application and bot credentials.
#[derive(Clone)]
pub struct DiscordConfig {
    pub client_id: String,
    pub client_secret: String,
    pub bot_token: String,
    /// Guild to gate on. Empty disables membership gating.
    pub guild_id: String,
    pub api_base: String,
}

impl std::fmt::Debug for DiscordConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscordConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("bot_token", &"<redacted>")
            .field("guild_id", &self.guild_id)
            .field("api_base", &self.api_base)
            .finish()
    }
}

impl DiscordConfig {
    /// Whether logins and events are checked against guild membership.
    #[must_use]
    pub fn gating_enabled(&self) -> bool {
        !self.guild_id.trim().is_empty()
    }
}

/// Role policy inputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RolePolicyConfig {
    pub admin_role_name: String,
    /// Role ids granted to users when they join the guild.
    pub default_role_ids: Vec<String>,
}

impl Default for RolePolicyConfig {
    fn default() -> Self {
        Self {
            admin_role_name: DEFAULT_ADMIN_ROLE.to_string(),
            default_role_ids: Vec::new(),
        }
    }
}

/// Complete service configuration.
#[derive(Clone)]
pub struct SyncConfig {
    pub discord: DiscordConfig,
    pub roles: RolePolicyConfig,
    pub jellyfin_url: String,
    pub jellyfin_api_key: String,
    pub database_url: String,
    pub listen_addr: SocketAddr,
    pub public_base_url: String,
    pub state_secret: String,
    /// Bearer token required on relayed membership events, if set.
    pub event_relay_token: Option<String>,
    pub request_timeout: Duration,
    pub lane_idle_timeout: Duration,
}

impl std::fmt::Debug for SyncConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncConfig")
            .field("discord", &self.discord)
            .field("roles", &self.roles)
            .field("jellyfin_url", &self.jellyfin_url)
            .field("listen_addr", &self.listen_addr)
            .field("public_base_url", &self.public_base_url)
            .field("request_timeout", &self.request_timeout)
            .field("lane_idle_timeout", &self.lane_idle_timeout)
            .finish_non_exhaustive()
    }
}

impl SyncConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_reader(|key| std::env::var(key))
    }

    /// Load configuration from a custom variable reader.
    ///
    /// Tests supply variables through this without touching the process
    /// environment.
    pub fn from_reader<F>(reader: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Result<String, VarError>,
    {
        let required = |key: &str| reader(key).map_err(|_| ConfigError::MissingVar(key.into()));

        let discord = DiscordConfig {
            client_id: required("DISCORD_CLIENT_ID")?,
            client_secret: required("DISCORD_CLIENT_SECRET")?,
            bot_token: required("DISCORD_BOT_TOKEN")?,
            guild_id: reader("DISCORD_GUILD_ID")
                .map(|v| v.trim().to_string())
                .unwrap_or_default(),
            api_base: reader("DISCORD_API_BASE")
                .map(|v| v.trim_end_matches('/').to_string())
                .unwrap_or_else(|_| DEFAULT_DISCORD_API_BASE.to_string()),
        };

        let admin_role_name = reader("ADMIN_ROLE_NAME")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_ADMIN_ROLE.to_string());
        let default_role_ids = parse_role_list(&reader("DEFAULT_ROLE_IDS").unwrap_or_default());

        let listen_addr = reader("LISTEN_ADDR")
            .unwrap_or_else(|_| "0.0.0.0:8787".to_string())
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::InvalidValue("LISTEN_ADDR".into(), e.to_string()))?;

        let request_timeout_secs = parse_secs(&reader, "REQUEST_TIMEOUT_SECS", 30)?;
        let lane_idle_secs = parse_secs(&reader, "EVENT_LANE_IDLE_SECS", 60)?;

        Ok(Self {
            discord,
            roles: RolePolicyConfig {
                admin_role_name,
                default_role_ids,
            },
            jellyfin_url: required("JELLYFIN_URL")?
                .trim_end_matches('/')
                .to_string(),
            jellyfin_api_key: required("JELLYFIN_API_KEY")?,
            database_url: required("DATABASE_URL")?,
            listen_addr,
            public_base_url: required("PUBLIC_BASE_URL")?
                .trim_end_matches('/')
                .to_string(),
            state_secret: required("STATE_SECRET")?,
            event_relay_token: reader("EVENT_RELAY_TOKEN")
                .ok()
                .filter(|v| !v.trim().is_empty()),
            request_timeout: Duration::from_secs(request_timeout_secs),
            lane_idle_timeout: Duration::from_secs(lane_idle_secs),
        })
    }

    /// Callback URL registered with the Discord application.
    #[must_use]
    pub fn redirect_uri(&self) -> String {
        format!("{}/auth/discord/callback", self.public_base_url)
    }
}

fn parse_secs<F>(reader: &F, key: &str, default: u64) -> Result<u64, ConfigError>
where
    F: Fn(&str) -> Result<String, VarError>,
{
    match reader(key) {
        Ok(v) => v
            .trim()
            .parse::<u64>()
            .map_err(|e| ConfigError::InvalidValue(key.into(), e.to_string())),
        Err(_) => Ok(default),
    }
}

/// Split a comma-separated role list, trimming entries and dropping empty ones.
#[must_use]
pub fn parse_role_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .map(ToString::to_string)
        .collect()
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingVar(String),

    #[error("invalid value for {0}: {1}")]
    InvalidValue(String, String),
}
