//! Role set to permission state mapping.
//!
//! Pure and total: every `(snapshot, library map)` pair maps to exactly one
//! [`PolicyDecision`], and the same inputs always give the same decision.

use std::collections::BTreeSet;

use crate::config::DEFAULT_ADMIN_ROLE;
use crate::error::SyncError;
use crate::models::{LibraryRoleMap, MembershipSnapshot, TargetPermissionState};

/// Why an identity gets no access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IneligibleReason {
    NotAMember,
    /// Member without any role beyond the implicit default one.
    NoEligibleRole,
}

impl From<IneligibleReason> for SyncError {
    fn from(reason: IneligibleReason) -> Self {
        match reason {
            IneligibleReason::NotAMember => SyncError::NotAMember,
            IneligibleReason::NoEligibleRole => SyncError::NoEligibleRole,
        }
    }
}

/// Outcome of evaluating the policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyDecision {
    /// Enable the account with exactly this state.
    Eligible(TargetPermissionState),
    /// Disable the account. No other field is asserted.
    Ineligible(IneligibleReason),
}

impl PolicyDecision {
    /// The target state this decision stands for.
    ///
    /// For an ineligible decision only `is_disabled` is meaningful.
    #[must_use]
    pub fn target_state(&self) -> TargetPermissionState {
        match self {
            PolicyDecision::Eligible(state) => state.clone(),
            PolicyDecision::Ineligible(_) => TargetPermissionState {
                is_disabled: true,
                ..TargetPermissionState::default()
            },
        }
    }

    #[must_use]
    pub fn is_eligible(&self) -> bool {
        matches!(self, PolicyDecision::Eligible(_))
    }
}

/// Permission policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionPolicy {
    admin_role_name: String,
}

impl Default for PermissionPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_ADMIN_ROLE)
    }
}

impl PermissionPolicy {
    #[must_use]
    pub fn new(admin_role_name: impl Into<String>) -> Self {
        Self {
            admin_role_name: admin_role_name.into(),
        }
    }

    #[must_use]
    pub fn admin_role_name(&self) -> &str {
        &self.admin_role_name
    }

    /// Eligibility check that needs no library listing.
    #[must_use]
    pub fn precheck(&self, snapshot: &MembershipSnapshot) -> Option<IneligibleReason> {
        if !snapshot.is_member {
            Some(IneligibleReason::NotAMember)
        } else if snapshot.role_names.is_empty() {
            Some(IneligibleReason::NoEligibleRole)
        } else {
            None
        }
    }

    /// Compute the decision for a snapshot.
    #[must_use]
    pub fn evaluate(
        &self,
        snapshot: &MembershipSnapshot,
        libraries: &LibraryRoleMap,
    ) -> PolicyDecision {
        if let Some(reason) = self.precheck(snapshot) {
            return PolicyDecision::Ineligible(reason);
        }

        if snapshot.role_names.contains(&self.admin_role_name) {
            return PolicyDecision::Eligible(TargetPermissionState {
                is_administrator: true,
                can_delete_content: true,
                all_libraries_visible: true,
                visible_library_ids: BTreeSet::new(),
                is_disabled: false,
            });
        }

        let visible_library_ids = libraries
            .iter()
            .filter(|(name, _)| snapshot.role_names.contains(*name))
            .map(|(_, id)| id.clone())
            .collect();

        PolicyDecision::Eligible(TargetPermissionState {
            is_administrator: false,
            can_delete_content: false,
            all_libraries_visible: false,
            visible_library_ids,
            is_disabled: false,
        })
    }
}
