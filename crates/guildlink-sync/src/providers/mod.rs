//! Discord-side collaborators.
//!
//! The reconciliation engine only sees the [`IdentityResolver`] and
//! [`MembershipProvider`] traits; the Discord REST implementations live in
//! the submodules.

pub mod discord;
pub mod guild;

use std::collections::BTreeSet;

pub use async_trait::async_trait;

use crate::error::SyncResult;
use crate::models::{ExternalIdentity, MembershipSnapshot};

/// Turns an OAuth authorization code into a verified identity.
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    /// Authorization URL the user is redirected to.
    ///
    /// # Arguments
    ///
    /// * `redirect_uri` - Callback URL, must match the one used for the exchange
    /// * `state` - CSRF protection state parameter
    fn authorization_url(&self, redirect_uri: &str, state: &str) -> String;

    /// Exchange the code and fetch the profile. Never retries.
    async fn resolve_identity(&self, code: &str, redirect_uri: &str)
        -> SyncResult<ExternalIdentity>;
}

/// Reads guild membership and grants join roles.
#[async_trait]
pub trait MembershipProvider: Send + Sync {
    /// False when no guild is configured; snapshots then always report a
    /// member without roles.
    fn gating_enabled(&self) -> bool;

    /// Current membership of `external_id`. Transport failures are errors,
    /// never "not a member".
    async fn snapshot(&self, external_id: &str) -> SyncResult<MembershipSnapshot>;

    /// Grant the given role ids to a member and return the names of the roles
    /// that were granted.
    async fn grant_default_roles(
        &self,
        external_id: &str,
        role_ids: &[String],
    ) -> SyncResult<BTreeSet<String>>;
}

pub use discord::DiscordOAuthProvider;
pub use guild::{ConnectionStatus, GuildConnection, GuildMembershipProvider, GuildSettings};
