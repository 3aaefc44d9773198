//! In-memory account directory for tests and local development.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{Account, AccountDirectory, AccountPolicy};
use crate::error::{SyncError, SyncResult};
use crate::models::Library;

/// In-memory directory.
///
/// Counts creations and policy writes, and can be told to fail writes so
/// tests can observe what the engine leaves behind.
#[derive(Debug, Default)]
pub struct InMemoryAccountDirectory {
    accounts: RwLock<HashMap<Uuid, Account>>,
    passwords: RwLock<HashMap<Uuid, String>>,
    libraries: RwLock<Vec<Library>>,
    creates: AtomicUsize,
    policy_writes: AtomicUsize,
    fail_writes: AtomicBool,
}

impl InMemoryAccountDirectory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Directory with the given libraries defined.
    #[must_use]
    pub fn with_libraries(libraries: Vec<Library>) -> Self {
        Self {
            libraries: RwLock::new(libraries),
            ..Self::default()
        }
    }

    /// Insert an account directly, bypassing creation.
    pub async fn insert(&self, account: Account) {
        self.accounts.write().await.insert(account.id, account);
    }

    /// Delete an account.
    pub async fn remove(&self, id: Uuid) -> Option<Account> {
        self.accounts.write().await.remove(&id)
    }

    pub async fn all(&self) -> Vec<Account> {
        self.accounts.read().await.values().cloned().collect()
    }

    pub async fn password(&self, id: Uuid) -> Option<String> {
        self.passwords.read().await.get(&id).cloned()
    }

    /// Number of successful `create` calls.
    pub fn create_count(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    /// Number of successful `update_policy` calls.
    pub fn policy_write_count(&self) -> usize {
        self.policy_writes.load(Ordering::SeqCst)
    }

    /// Make every subsequent write fail.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check_writable(&self, account_id: Uuid) -> SyncResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(SyncError::AccountUpdate {
                account_id,
                reason: "directory unavailable".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl AccountDirectory for InMemoryAccountDirectory {
    async fn find_by_id(&self, id: Uuid) -> SyncResult<Option<Account>> {
        Ok(self.accounts.read().await.get(&id).cloned())
    }

    async fn find_by_name(&self, name: &str) -> SyncResult<Option<Account>> {
        let wanted = name.to_lowercase();
        Ok(self
            .accounts
            .read()
            .await
            .values()
            .find(|a| a.name.to_lowercase() == wanted)
            .cloned())
    }

    async fn create(&self, name: &str, password: &str) -> SyncResult<Account> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(SyncError::AccountCreation {
                name: name.to_string(),
                reason: "directory unavailable".to_string(),
            });
        }

        let mut accounts = self.accounts.write().await;
        let wanted = name.to_lowercase();
        if accounts.values().any(|a| a.name.to_lowercase() == wanted) {
            return Err(SyncError::AccountCreation {
                name: name.to_string(),
                reason: "name already taken".to_string(),
            });
        }

        let account = Account {
            id: Uuid::new_v4(),
            name: name.to_string(),
            policy: AccountPolicy::default(),
        };
        accounts.insert(account.id, account.clone());
        self.passwords
            .write()
            .await
            .insert(account.id, password.to_string());
        self.creates.fetch_add(1, Ordering::SeqCst);
        Ok(account)
    }

    async fn rename(&self, id: Uuid, name: &str) -> SyncResult<()> {
        self.check_writable(id)?;
        let mut accounts = self.accounts.write().await;
        let account = accounts.get_mut(&id).ok_or_else(|| SyncError::AccountUpdate {
            account_id: id,
            reason: "account not found".to_string(),
        })?;
        account.name = name.to_string();
        Ok(())
    }

    async fn update_policy(&self, id: Uuid, policy: &AccountPolicy) -> SyncResult<()> {
        self.check_writable(id)?;
        let mut accounts = self.accounts.write().await;
        let account = accounts.get_mut(&id).ok_or_else(|| SyncError::AccountUpdate {
            account_id: id,
            reason: "account not found".to_string(),
        })?;
        account.policy = policy.clone();
        self.policy_writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn libraries(&self) -> SyncResult<Vec<Library>> {
        Ok(self.libraries.read().await.clone())
    }
}
