//! Shared fakes for engine and dispatcher tests.

#![allow(dead_code)]

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use guildlink_sync::directory::{Account, AccountDirectory, InMemoryAccountDirectory};
use guildlink_sync::models::{ExternalIdentity, Library, MembershipSnapshot};
use guildlink_sync::providers::{async_trait, IdentityResolver, MembershipProvider};
use guildlink_sync::services::{
    IdentityLinkStore, InMemoryLinkStore, PermissionPolicy, ReconciliationEngine,
};
use guildlink_sync::{SyncError, SyncResult};

/// Identity resolver answering from a fixed code table.
#[derive(Default)]
pub struct StaticIdentityResolver {
    identities: Mutex<HashMap<String, ExternalIdentity>>,
}

impl StaticIdentityResolver {
    pub fn with(&self, code: &str, identity: ExternalIdentity) {
        self.identities.lock().insert(code.to_string(), identity);
    }
}

#[async_trait]
impl IdentityResolver for StaticIdentityResolver {
    fn authorization_url(&self, redirect_uri: &str, state: &str) -> String {
        format!("https://discord.test/authorize?redirect_uri={redirect_uri}&state={state}")
    }

    async fn resolve_identity(
        &self,
        code: &str,
        _redirect_uri: &str,
    ) -> SyncResult<ExternalIdentity> {
        self.identities
            .lock()
            .get(code)
            .cloned()
            .ok_or_else(|| SyncError::AuthExchange {
                reason: format!("unknown code {code}"),
            })
    }
}

/// Membership provider backed by a table of snapshots.
pub struct FakeMembership {
    gating: bool,
    snapshots: Mutex<HashMap<String, MembershipSnapshot>>,
    /// Role id to role name for default role grants.
    roles: HashMap<String, String>,
    granted: Mutex<Vec<(String, String)>>,
    fail_lookups: AtomicBool,
    fail_grants: AtomicBool,
    lookups: AtomicUsize,
    delay: Mutex<Option<Duration>>,
}

impl FakeMembership {
    pub fn new(gating: bool) -> Self {
        Self {
            gating,
            snapshots: Mutex::new(HashMap::new()),
            roles: HashMap::from([
                ("r-member".to_string(), "Member".to_string()),
                ("r-kids".to_string(), "Kids".to_string()),
            ]),
            granted: Mutex::new(Vec::new()),
            fail_lookups: AtomicBool::new(false),
            fail_grants: AtomicBool::new(false),
            lookups: AtomicUsize::new(0),
            delay: Mutex::new(None),
        }
    }

    pub fn set(&self, external_id: &str, snapshot: MembershipSnapshot) {
        self.snapshots.lock().insert(external_id.to_string(), snapshot);
    }

    pub fn fail_lookups(&self, fail: bool) {
        self.fail_lookups.store(fail, Ordering::SeqCst);
    }

    pub fn fail_grants(&self, fail: bool) {
        self.fail_grants.store(fail, Ordering::SeqCst);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = Some(delay);
    }

    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    pub fn granted(&self) -> Vec<(String, String)> {
        self.granted.lock().clone()
    }
}

#[async_trait]
impl MembershipProvider for FakeMembership {
    fn gating_enabled(&self) -> bool {
        self.gating
    }

    async fn snapshot(&self, external_id: &str) -> SyncResult<MembershipSnapshot> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if !self.gating {
            return Ok(MembershipSnapshot::member(Vec::<String>::new()));
        }
        if self.fail_lookups.load(Ordering::SeqCst) {
            return Err(SyncError::MembershipLookup {
                reason: "gateway unreachable".to_string(),
            });
        }
        Ok(self
            .snapshots
            .lock()
            .get(external_id)
            .cloned()
            .unwrap_or_else(MembershipSnapshot::not_member))
    }

    async fn grant_default_roles(
        &self,
        external_id: &str,
        role_ids: &[String],
    ) -> SyncResult<BTreeSet<String>> {
        if self.fail_grants.load(Ordering::SeqCst) {
            return Err(SyncError::MembershipLookup {
                reason: "missing permissions".to_string(),
            });
        }
        let mut names = BTreeSet::new();
        for role_id in role_ids {
            if let Some(name) = self.roles.get(role_id) {
                self.granted
                    .lock()
                    .push((external_id.to_string(), role_id.clone()));
                names.insert(name.clone());
            }
        }
        Ok(names)
    }
}

/// Engine wired to in-memory collaborators.
pub struct Harness {
    pub engine: ReconciliationEngine,
    pub identities: Arc<StaticIdentityResolver>,
    pub membership: Arc<FakeMembership>,
    pub directory: Arc<InMemoryAccountDirectory>,
    pub links: Arc<InMemoryLinkStore>,
}

impl Harness {
    pub fn new(gating: bool) -> Self {
        let identities = Arc::new(StaticIdentityResolver::default());
        let membership = Arc::new(FakeMembership::new(gating));
        let directory = Arc::new(InMemoryAccountDirectory::with_libraries(vec![
            Library {
                name: "Kids".to_string(),
                id: "lib-1".to_string(),
            },
            Library {
                name: "Movies".to_string(),
                id: "lib-2".to_string(),
            },
        ]));
        let links = Arc::new(InMemoryLinkStore::new());
        let engine = ReconciliationEngine::new(
            identities.clone(),
            membership.clone(),
            directory.clone(),
            links.clone(),
            PermissionPolicy::default(),
        );
        Self {
            engine,
            identities,
            membership,
            directory,
            links,
        }
    }

    pub async fn account(&self, id: uuid::Uuid) -> Account {
        self.directory
            .find_by_id(id)
            .await
            .unwrap()
            .expect("account exists")
    }

    pub async fn linked_account_id(&self, external_id: &str) -> Option<uuid::Uuid> {
        self.links
            .find_by_external_id(external_id)
            .await
            .unwrap()
            .map(|l| l.local_account_id)
    }
}

pub fn alice() -> ExternalIdentity {
    ExternalIdentity::new("42", "alice")
}

pub fn bob() -> ExternalIdentity {
    ExternalIdentity::new("43", "bob")
}
