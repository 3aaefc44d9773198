//! Data model shared by the resolver, policy, engine and dispatcher.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Verified snapshot of a Discord user.
///
/// `external_id` is the durable key. `display_name` may change or collide
/// with other users and is only used as a fallback when no link exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalIdentity {
    pub external_id: String,
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

impl ExternalIdentity {
    #[must_use]
    pub fn new(external_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            external_id: external_id.into(),
            display_name: display_name.into(),
            avatar_ref: None,
            email: None,
        }
    }
}

/// Point-in-time membership read for one identity.
///
/// The implicit `@everyone` role is never part of `role_names`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MembershipSnapshot {
    pub is_member: bool,
    #[serde(default)]
    pub role_names: BTreeSet<String>,
}

impl MembershipSnapshot {
    /// A member holding the given roles.
    pub fn member<I, S>(roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            is_member: true,
            role_names: roles.into_iter().map(Into::into).collect(),
        }
    }

    /// Not a member of the community.
    #[must_use]
    pub fn not_member() -> Self {
        Self {
            is_member: false,
            role_names: BTreeSet::new(),
        }
    }
}

/// Durable association between a Discord user and a media server account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityLink {
    pub local_account_id: Uuid,
    pub external_id: String,
    pub last_known: ExternalIdentity,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl IdentityLink {
    #[must_use]
    pub fn new(local_account_id: Uuid, identity: ExternalIdentity) -> Self {
        Self {
            local_account_id,
            external_id: identity.external_id.clone(),
            last_known: identity,
            updated_at: Utc::now(),
        }
    }
}

/// Permission and visibility state written to an eligible account.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct TargetPermissionState {
    pub is_administrator: bool,
    pub can_delete_content: bool,
    pub all_libraries_visible: bool,
    pub visible_library_ids: BTreeSet<String>,
    pub is_disabled: bool,
}

/// A library as listed by the media server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Library {
    pub name: String,
    pub id: String,
}

/// Library name to library id. Role names select libraries by name.
pub type LibraryRoleMap = BTreeMap<String, String>;

/// Build the role map from a library listing.
#[must_use]
pub fn library_role_map(libraries: &[Library]) -> LibraryRoleMap {
    libraries
        .iter()
        .map(|l| (l.name.clone(), l.id.clone()))
        .collect()
}

/// Result of an interactive login reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LoginOutcome {
    pub account_id: Uuid,
    pub created: bool,
}

/// Result of a membership-change reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MembershipOutcome {
    /// The account was brought in line with the event.
    Reconciled { account_id: Uuid },
    /// No local account corresponds to this identity; nothing was written.
    Untracked,
}

/// Guild notification relayed from the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GuildEvent {
    /// Roles or profile of a member changed.
    MemberUpdated {
        identity: ExternalIdentity,
        #[serde(default)]
        role_names: BTreeSet<String>,
    },
    /// A user joined the guild.
    MemberJoined {
        identity: ExternalIdentity,
        #[serde(default)]
        role_names: BTreeSet<String>,
    },
    /// A user left or was removed from the guild.
    MemberLeft { identity: ExternalIdentity },
}

impl GuildEvent {
    #[must_use]
    pub fn identity(&self) -> &ExternalIdentity {
        match self {
            GuildEvent::MemberUpdated { identity, .. }
            | GuildEvent::MemberJoined { identity, .. }
            | GuildEvent::MemberLeft { identity } => identity,
        }
    }

    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            GuildEvent::MemberUpdated { .. } => "member_updated",
            GuildEvent::MemberJoined { .. } => "member_joined",
            GuildEvent::MemberLeft { .. } => "member_left",
        }
    }
}
