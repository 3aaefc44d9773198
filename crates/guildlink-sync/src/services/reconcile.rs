//! Reconciliation engine.
//!
//! One pass per trigger:
//! `IDENTITY_KNOWN -> ACCOUNT_RESOLVED -> SNAPSHOT_TAKEN -> POLICY_COMPUTED -> APPLIED -> LINKED`.
//! Nothing is persisted between stages. Every run re-reads the directory and
//! the link store, so running the same trigger twice converges on the same
//! state.
//!
//! Runs for one external id hold a keyed lock from account resolution
//! through linking. Runs for different ids are independent.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, error, info, instrument};

use super::account_resolver::{AccountLookup, AccountResolution, AccountResolver};
use super::link_store::IdentityLinkStore;
use super::locks::KeyedLocks;
use super::policy::{PermissionPolicy, PolicyDecision};
use crate::directory::{Account, AccountDirectory};
use crate::error::SyncResult;
use crate::models::{
    library_role_map, ExternalIdentity, IdentityLink, LoginOutcome, MembershipOutcome,
    MembershipSnapshot,
};
use crate::providers::{IdentityResolver, MembershipProvider};

/// Stage a run was in when it failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    IdentityKnown,
    AccountResolved,
    SnapshotTaken,
    PolicyComputed,
    Applied,
    Linked,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::IdentityKnown => "identity_known",
            Stage::AccountResolved => "account_resolved",
            Stage::SnapshotTaken => "snapshot_taken",
            Stage::PolicyComputed => "policy_computed",
            Stage::Applied => "applied",
            Stage::Linked => "linked",
        };
        f.write_str(name)
    }
}

/// Engine that links identities and applies permission state.
#[derive(Clone)]
pub struct ReconciliationEngine {
    identities: Arc<dyn IdentityResolver>,
    membership: Arc<dyn MembershipProvider>,
    directory: Arc<dyn AccountDirectory>,
    links: Arc<dyn IdentityLinkStore>,
    resolver: AccountResolver,
    policy: PermissionPolicy,
    locks: KeyedLocks,
}

impl ReconciliationEngine {
    pub fn new(
        identities: Arc<dyn IdentityResolver>,
        membership: Arc<dyn MembershipProvider>,
        directory: Arc<dyn AccountDirectory>,
        links: Arc<dyn IdentityLinkStore>,
        policy: PermissionPolicy,
    ) -> Self {
        Self {
            resolver: AccountResolver::new(Arc::clone(&directory), Arc::clone(&links)),
            identities,
            membership,
            directory,
            links,
            policy,
            locks: KeyedLocks::new(),
        }
    }

    #[must_use]
    pub fn identity_resolver(&self) -> &Arc<dyn IdentityResolver> {
        &self.identities
    }

    #[must_use]
    pub fn membership(&self) -> &Arc<dyn MembershipProvider> {
        &self.membership
    }

    /// Interactive login: exchange the code, then reconcile.
    #[instrument(skip(self, code))]
    pub async fn reconcile_from_login(
        &self,
        code: &str,
        redirect_uri: &str,
    ) -> SyncResult<LoginOutcome> {
        let identity = self.resolve_identity(code, redirect_uri).await?;
        self.reconcile_login_identity(identity).await
    }

    /// Run the identity resolver. Never retried here.
    pub async fn resolve_identity(
        &self,
        code: &str,
        redirect_uri: &str,
    ) -> SyncResult<ExternalIdentity> {
        self.identities
            .resolve_identity(code, redirect_uri)
            .await
            .inspect_err(|e| debug!(stage = %Stage::IdentityKnown, error = %e, "Identity resolution failed"))
    }

    /// Reconcile an identity that has just logged in.
    ///
    /// The snapshot is read before the account is resolved so an ineligible
    /// login fails without touching the directory.
    #[instrument(skip_all, fields(external_id = %identity.external_id))]
    pub async fn reconcile_login_identity(
        &self,
        identity: ExternalIdentity,
    ) -> SyncResult<LoginOutcome> {
        let _guard = self.locks.lock(&identity.external_id).await;

        if !self.membership.gating_enabled() {
            let (account, created) = self.resolve_and_rename(&identity).await?;
            self.link(&account, &identity).await?;
            return Ok(LoginOutcome {
                account_id: account.id,
                created,
            });
        }

        let snapshot = self
            .membership
            .snapshot(&identity.external_id)
            .await
            .inspect_err(|e| log_failure(&identity, Stage::SnapshotTaken, e))?;

        if let Some(reason) = self.policy.precheck(&snapshot) {
            info!(reason = ?reason, "Login rejected");
            return Err(reason.into());
        }

        let decision = self.decide(&snapshot).await?;
        let (account, created) = self.resolve_and_rename(&identity).await?;
        self.apply(&identity, &account, &decision).await?;
        self.link(&account, &identity).await?;

        info!(account_id = %account.id, created, "Login reconciled");
        Ok(LoginOutcome {
            account_id: account.id,
            created,
        })
    }

    /// Reconcile an identity with a snapshot supplied by a membership event.
    ///
    /// Never creates accounts. An identity with no local account yields
    /// [`MembershipOutcome::Untracked`]. Adoption by display name is only
    /// tried when the snapshot grants access.
    pub async fn reconcile_from_membership_event(
        &self,
        identity: &ExternalIdentity,
        snapshot: &MembershipSnapshot,
    ) -> SyncResult<MembershipOutcome> {
        self.reconcile_membership_change(identity, snapshot, AccountLookup::LinkedOrName)
            .await
    }

    /// Like [`Self::reconcile_from_membership_event`], restricted to `lookup`.
    ///
    /// A snapshot that would disable the account always resolves by link
    /// only, so an unlinked account is never disabled and claimed because
    /// its name matches.
    #[instrument(skip_all, fields(external_id = %identity.external_id, is_member = snapshot.is_member))]
    pub async fn reconcile_membership_change(
        &self,
        identity: &ExternalIdentity,
        snapshot: &MembershipSnapshot,
        lookup: AccountLookup,
    ) -> SyncResult<MembershipOutcome> {
        let lookup = if self.policy.precheck(snapshot).is_some() {
            AccountLookup::Linked
        } else {
            lookup
        };

        let _guard = self.locks.lock(&identity.external_id).await;

        let mut account = match self
            .resolver
            .lookup(identity, lookup)
            .await
            .inspect_err(|e| log_failure(identity, Stage::AccountResolved, e))?
        {
            AccountResolution::Found { account, .. } => account,
            AccountResolution::NotFound => {
                debug!("No account for identity, ignoring event");
                return Ok(MembershipOutcome::Untracked);
            }
        };

        if snapshot.is_member {
            self.resolver
                .sync_display_name(&mut account, identity)
                .await
                .inspect_err(|e| log_failure(identity, Stage::AccountResolved, e))?;
        }

        if self.membership.gating_enabled() {
            let decision = self.decide(snapshot).await?;
            self.apply(identity, &account, &decision).await?;
        }
        self.link(&account, identity).await?;

        info!(account_id = %account.id, "Membership change reconciled");
        Ok(MembershipOutcome::Reconciled {
            account_id: account.id,
        })
    }

    async fn resolve_and_rename(&self, identity: &ExternalIdentity) -> SyncResult<(Account, bool)> {
        let (mut account, created) = self
            .resolver
            .find_or_create(identity)
            .await
            .inspect_err(|e| log_failure(identity, Stage::AccountResolved, e))?;
        self.resolver
            .sync_display_name(&mut account, identity)
            .await
            .inspect_err(|e| log_failure(identity, Stage::AccountResolved, e))?;
        Ok((account, created))
    }

    /// Evaluate the policy, listing libraries only when access is granted.
    async fn decide(&self, snapshot: &MembershipSnapshot) -> SyncResult<PolicyDecision> {
        if let Some(reason) = self.policy.precheck(snapshot) {
            return Ok(PolicyDecision::Ineligible(reason));
        }
        let libraries = self.directory.libraries().await.inspect_err(|e| {
            error!(stage = %Stage::PolicyComputed, error = %e, "Failed to list libraries");
        })?;
        Ok(self.policy.evaluate(snapshot, &library_role_map(&libraries)))
    }

    /// Write the decision to the account in one policy update.
    async fn apply(
        &self,
        identity: &ExternalIdentity,
        account: &Account,
        decision: &PolicyDecision,
    ) -> SyncResult<()> {
        let mut policy = account.policy.clone();
        match decision {
            PolicyDecision::Eligible(state) => policy.apply_target(state),
            PolicyDecision::Ineligible(_) => policy.is_disabled = true,
        }

        if policy == account.policy {
            debug!(account_id = %account.id, "Permission state already current");
            return Ok(());
        }

        self.directory
            .update_policy(account.id, &policy)
            .await
            .inspect_err(|e| {
                error!(
                    stage = %Stage::Applied,
                    external_id = %identity.external_id,
                    account_id = %account.id,
                    attempted = ?decision.target_state(),
                    error = %e,
                    "Failed to apply permission state"
                );
            })?;

        debug!(
            account_id = %account.id,
            is_disabled = policy.is_disabled,
            is_administrator = policy.is_administrator,
            "Applied permission state"
        );
        Ok(())
    }

    async fn link(&self, account: &Account, identity: &ExternalIdentity) -> SyncResult<()> {
        self.links
            .upsert(IdentityLink::new(account.id, identity.clone()))
            .await
            .inspect_err(|e| {
                error!(
                    stage = %Stage::Linked,
                    external_id = %identity.external_id,
                    account_id = %account.id,
                    error = %e,
                    "Failed to store identity link"
                );
            })
    }
}

fn log_failure(identity: &ExternalIdentity, stage: Stage, err: &crate::error::SyncError) {
    if err.is_retryable() {
        info!(external_id = %identity.external_id, stage = %stage, error = %err, "Reconciliation failed, retryable");
    } else {
        error!(external_id = %identity.external_id, stage = %stage, error = %err, "Reconciliation failed");
    }
}
