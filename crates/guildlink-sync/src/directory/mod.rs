//! Media server account directory.
//!
//! The directory is the system of record for account permissions. The
//! engine reads accounts fresh on every run and writes the policy back in a
//! single call.

pub mod jellyfin;
pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::SyncResult;
use crate::models::{Library, TargetPermissionState};

pub use jellyfin::JellyfinDirectory;
pub use memory::InMemoryAccountDirectory;

/// Authentication provider recorded on accounts created by this service.
pub const EXTERNAL_AUTH_PROVIDER_ID: &str = "Guildlink.DiscordAuthProvider";

/// Account permission policy in the media server's wire shape.
///
/// Fields this service does not manage are carried in `extra` so a policy
/// write never drops them.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AccountPolicy {
    #[serde(default)]
    pub is_administrator: bool,
    #[serde(default)]
    pub is_disabled: bool,
    #[serde(default)]
    pub enable_content_deletion: bool,
    #[serde(default)]
    pub enable_all_folders: bool,
    #[serde(default)]
    pub enabled_folders: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authentication_provider_id: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl AccountPolicy {
    /// Write every field of an eligible target state.
    pub fn apply_target(&mut self, target: &TargetPermissionState) {
        self.is_administrator = target.is_administrator;
        self.enable_content_deletion = target.can_delete_content;
        self.enable_all_folders = target.all_libraries_visible;
        self.enabled_folders = target.visible_library_ids.iter().cloned().collect();
        self.is_disabled = target.is_disabled;
    }
}

/// A media server account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Account {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub policy: AccountPolicy,
}

/// User directory of the media server.
#[async_trait]
pub trait AccountDirectory: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> SyncResult<Option<Account>>;

    /// Look an account up by name, matched the way the media server matches
    /// login names (case-insensitive).
    async fn find_by_name(&self, name: &str) -> SyncResult<Option<Account>>;

    /// Create an account with the given password credential.
    async fn create(&self, name: &str, password: &str) -> SyncResult<Account>;

    async fn rename(&self, id: Uuid, name: &str) -> SyncResult<()>;

    /// Replace the whole policy of an account in one write.
    async fn update_policy(&self, id: Uuid, policy: &AccountPolicy) -> SyncResult<()>;

    /// Libraries currently defined on the server.
    async fn libraries(&self) -> SyncResult<Vec<Library>>;
}
