//! Identity link storage.
//!
//! Links are one-to-one in both directions: an external id maps to at most
//! one account and an account is claimed by at most one external id. Both
//! stores refuse an upsert that would break that.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{SyncError, SyncResult};
use crate::models::{ExternalIdentity, IdentityLink};

/// Unique constraint on the account side of the link.
const ACCOUNT_UNIQUE_CONSTRAINT: &str = "identity_links_local_account_id_key";

/// Persistent external id to account mapping.
#[async_trait]
pub trait IdentityLinkStore: Send + Sync {
    async fn find_by_external_id(&self, external_id: &str) -> SyncResult<Option<IdentityLink>>;

    async fn find_by_account_id(&self, account_id: Uuid) -> SyncResult<Option<IdentityLink>>;

    /// Insert or replace the link for `link.external_id`.
    ///
    /// Fails with [`SyncError::AccountAlreadyLinked`] when the account is
    /// linked to a different external id.
    async fn upsert(&self, link: IdentityLink) -> SyncResult<()>;
}

#[derive(Debug, Default)]
struct LinkIndex {
    by_external: HashMap<String, IdentityLink>,
    by_account: HashMap<Uuid, String>,
}

/// In-memory link store for testing
#[derive(Debug, Default, Clone)]
pub struct InMemoryLinkStore {
    index: Arc<RwLock<LinkIndex>>,
}

impl InMemoryLinkStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.index.read().await.by_external.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl IdentityLinkStore for InMemoryLinkStore {
    async fn find_by_external_id(&self, external_id: &str) -> SyncResult<Option<IdentityLink>> {
        Ok(self.index.read().await.by_external.get(external_id).cloned())
    }

    async fn find_by_account_id(&self, account_id: Uuid) -> SyncResult<Option<IdentityLink>> {
        let index = self.index.read().await;
        Ok(index
            .by_account
            .get(&account_id)
            .and_then(|external_id| index.by_external.get(external_id))
            .cloned())
    }

    async fn upsert(&self, link: IdentityLink) -> SyncResult<()> {
        let mut index = self.index.write().await;

        if let Some(owner) = index.by_account.get(&link.local_account_id) {
            if *owner != link.external_id {
                return Err(SyncError::AccountAlreadyLinked {
                    account_id: link.local_account_id,
                });
            }
        }

        if let Some(previous) = index.by_external.get(&link.external_id) {
            let previous_account = previous.local_account_id;
            index.by_account.remove(&previous_account);
        }
        index
            .by_account
            .insert(link.local_account_id, link.external_id.clone());
        index.by_external.insert(link.external_id.clone(), link);
        Ok(())
    }
}

/// PostgreSQL-backed link store
#[derive(Clone)]
pub struct PostgresLinkStore {
    pool: PgPool,
}

impl PostgresLinkStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_link(row: &sqlx::postgres::PgRow) -> IdentityLink {
        let external_id: String = row.get("external_id");
        let updated_at: DateTime<Utc> = row.get("updated_at");
        IdentityLink {
            local_account_id: row.get("local_account_id"),
            external_id: external_id.clone(),
            last_known: ExternalIdentity {
                external_id,
                display_name: row.get("display_name"),
                avatar_ref: row.get("avatar_ref"),
                email: row.get("email"),
            },
            updated_at,
        }
    }
}

fn store_error(e: &sqlx::Error) -> SyncError {
    SyncError::LinkStore {
        reason: e.to_string(),
    }
}

#[async_trait]
impl IdentityLinkStore for PostgresLinkStore {
    async fn find_by_external_id(&self, external_id: &str) -> SyncResult<Option<IdentityLink>> {
        let row = sqlx::query(
            r"
            SELECT external_id, local_account_id, display_name, avatar_ref, email, updated_at
            FROM identity_links
            WHERE external_id = $1
            ",
        )
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| store_error(&e))?;

        Ok(row.as_ref().map(Self::row_to_link))
    }

    async fn find_by_account_id(&self, account_id: Uuid) -> SyncResult<Option<IdentityLink>> {
        let row = sqlx::query(
            r"
            SELECT external_id, local_account_id, display_name, avatar_ref, email, updated_at
            FROM identity_links
            WHERE local_account_id = $1
            ",
        )
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| store_error(&e))?;

        Ok(row.as_ref().map(Self::row_to_link))
    }

    async fn upsert(&self, link: IdentityLink) -> SyncResult<()> {
        let result = sqlx::query(
            r"
            INSERT INTO identity_links
                (external_id, local_account_id, display_name, avatar_ref, email, updated_at)
            VALUES
                ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (external_id) DO UPDATE SET
                local_account_id = EXCLUDED.local_account_id,
                display_name = EXCLUDED.display_name,
                avatar_ref = EXCLUDED.avatar_ref,
                email = EXCLUDED.email,
                updated_at = EXCLUDED.updated_at
            ",
        )
        .bind(&link.external_id)
        .bind(link.local_account_id)
        .bind(&link.last_known.display_name)
        .bind(&link.last_known.avatar_ref)
        .bind(&link.last_known.email)
        .bind(link.updated_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => {
                tracing::debug!(
                    external_id = %link.external_id,
                    account_id = %link.local_account_id,
                    "Stored identity link"
                );
                Ok(())
            }
            Err(sqlx::Error::Database(db))
                if db.code().as_deref() == Some("23505")
                    && db.constraint() == Some(ACCOUNT_UNIQUE_CONSTRAINT) =>
            {
                Err(SyncError::AccountAlreadyLinked {
                    account_id: link.local_account_id,
                })
            }
            Err(e) => Err(store_error(&e)),
        }
    }
}

/// Run all pending link store migrations.
///
/// # Errors
///
/// Returns `SyncError::LinkStore` if any migration fails to apply.
pub async fn run_migrations(pool: &PgPool) -> SyncResult<()> {
    tracing::info!("Running database migrations...");

    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| SyncError::LinkStore {
            reason: format!("migration failed: {e}"),
        })?;

    tracing::info!("Migrations completed successfully");
    Ok(())
}
