//! Maps an external identity to zero or one local account.

use std::sync::Arc;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::{rngs::OsRng, RngCore};
use tracing::{debug, info, warn};

use super::link_store::IdentityLinkStore;
use crate::directory::{Account, AccountDirectory, EXTERNAL_AUTH_PROVIDER_ID};
use crate::error::{SyncError, SyncResult};
use crate::models::ExternalIdentity;

/// Random bytes in the password of created accounts.
const PASSWORD_BYTES: usize = 64;

/// How an existing account was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvedVia {
    Link,
    /// Adopted by matching the external display name.
    DisplayName,
}

/// Lookup steps a resolution may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountLookup {
    /// Stored link only.
    Linked,
    /// Stored link, then an unlinked account with the same display name.
    LinkedOrName,
}

/// Result of looking an identity up without creating anything.
#[derive(Debug, Clone, PartialEq)]
pub enum AccountResolution {
    Found { account: Account, via: ResolvedVia },
    NotFound,
}

/// Account resolver.
#[derive(Clone)]
pub struct AccountResolver {
    directory: Arc<dyn AccountDirectory>,
    links: Arc<dyn IdentityLinkStore>,
}

impl AccountResolver {
    pub fn new(directory: Arc<dyn AccountDirectory>, links: Arc<dyn IdentityLinkStore>) -> Self {
        Self { directory, links }
    }

    /// Find the account through its stored link only. Mutates nothing.
    ///
    /// A link whose account no longer exists counts as no account.
    pub async fn find_linked(&self, identity: &ExternalIdentity) -> SyncResult<AccountResolution> {
        let Some(link) = self.links.find_by_external_id(&identity.external_id).await? else {
            return Ok(AccountResolution::NotFound);
        };
        match self.directory.find_by_id(link.local_account_id).await? {
            Some(account) => Ok(AccountResolution::Found {
                account,
                via: ResolvedVia::Link,
            }),
            None => {
                warn!(
                    external_id = %identity.external_id,
                    account_id = %link.local_account_id,
                    "Linked account no longer exists"
                );
                Ok(AccountResolution::NotFound)
            }
        }
    }

    /// Find the account with the steps `lookup` allows.
    pub async fn lookup(
        &self,
        identity: &ExternalIdentity,
        lookup: AccountLookup,
    ) -> SyncResult<AccountResolution> {
        match lookup {
            AccountLookup::Linked => self.find_linked(identity).await,
            AccountLookup::LinkedOrName => self.find(identity).await,
        }
    }

    /// Find the account by link, then by display name. Mutates nothing.
    ///
    /// An account found by name that is already linked to another identity
    /// is refused.
    pub async fn find(&self, identity: &ExternalIdentity) -> SyncResult<AccountResolution> {
        let linked = self.find_linked(identity).await?;
        if matches!(linked, AccountResolution::Found { .. }) {
            return Ok(linked);
        }

        let Some(account) = self.directory.find_by_name(&identity.display_name).await? else {
            return Ok(AccountResolution::NotFound);
        };

        if let Some(owner) = self.links.find_by_account_id(account.id).await? {
            if owner.external_id != identity.external_id {
                warn!(
                    external_id = %identity.external_id,
                    account_id = %account.id,
                    linked_to = %owner.external_id,
                    "Account with matching name is linked to another identity"
                );
                return Err(SyncError::AccountAlreadyLinked {
                    account_id: account.id,
                });
            }
        }

        debug!(
            external_id = %identity.external_id,
            account_id = %account.id,
            "Adopting account by display name"
        );
        Ok(AccountResolution::Found {
            account,
            via: ResolvedVia::DisplayName,
        })
    }

    /// Find the account, creating one when none exists.
    ///
    /// Returns the account and whether it was created.
    pub async fn find_or_create(&self, identity: &ExternalIdentity) -> SyncResult<(Account, bool)> {
        match self.find(identity).await? {
            AccountResolution::Found { account, .. } => Ok((account, false)),
            AccountResolution::NotFound => Ok((self.create(identity).await?, true)),
        }
    }

    async fn create(&self, identity: &ExternalIdentity) -> SyncResult<Account> {
        let mut account = self
            .directory
            .create(&identity.display_name, &generate_password())
            .await?;

        account.policy.authentication_provider_id = Some(EXTERNAL_AUTH_PROVIDER_ID.to_string());
        self.directory
            .update_policy(account.id, &account.policy)
            .await
            .map_err(|e| SyncError::AccountCreation {
                name: identity.display_name.clone(),
                reason: format!("could not mark account as externally managed: {e}"),
            })?;

        info!(
            external_id = %identity.external_id,
            account_id = %account.id,
            name = %account.name,
            "Created account"
        );
        Ok(account)
    }

    /// Rename the account to the external display name if they differ.
    pub async fn sync_display_name(
        &self,
        account: &mut Account,
        identity: &ExternalIdentity,
    ) -> SyncResult<()> {
        if account.name == identity.display_name {
            return Ok(());
        }

        self.directory
            .rename(account.id, &identity.display_name)
            .await?;
        info!(
            account_id = %account.id,
            old_name = %account.name,
            new_name = %identity.display_name,
            "Renamed account to match display name"
        );
        account.name.clone_from(&identity.display_name);
        Ok(())
    }
}

/// Password nobody knows. Accounts created here only sign in through Discord.
fn generate_password() -> String {
    let mut bytes = [0u8; PASSWORD_BYTES];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}
