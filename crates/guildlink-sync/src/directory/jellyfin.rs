//! Jellyfin REST implementation of [`AccountDirectory`].

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use super::{Account, AccountDirectory, AccountPolicy};
use crate::error::{SyncError, SyncResult};
use crate::models::Library;

/// Header carrying the API key.
const TOKEN_HEADER: &str = "X-Emby-Token";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct VirtualFolder {
    name: String,
    #[serde(default)]
    item_id: Option<String>,
}

/// Jellyfin user directory client.
#[derive(Clone)]
pub struct JellyfinDirectory {
    base_url: String,
    api_key: String,
    http_client: Client,
}

impl JellyfinDirectory {
    #[must_use]
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self::with_client(base_url, api_key, Client::new())
    }

    #[must_use]
    pub fn with_client(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        http_client: Client,
    ) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            http_client,
        }
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http_client
            .request(method, format!("{}{}", self.base_url, path))
            .header(TOKEN_HEADER, &self.api_key)
    }

    async fn send(&self, operation: &str, request: RequestBuilder) -> SyncResult<Response> {
        let response = request.send().await.map_err(|e| SyncError::Directory {
            operation: operation.to_string(),
            reason: format!("request failed: {e}"),
        })?;
        Ok(response)
    }

    /// Raw user document, kept whole so writes echo unmanaged fields back.
    async fn user_document(&self, id: Uuid) -> SyncResult<Option<Value>> {
        let response = self
            .send("lookup", self.request(Method::GET, &format!("/Users/{id}")))
            .await?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => Ok(Some(response.json().await?)),
            status => Err(SyncError::Directory {
                operation: "lookup".to_string(),
                reason: format!("Jellyfin returned HTTP {status}"),
            }),
        }
    }
}

fn update_error(account_id: Uuid, status: StatusCode) -> SyncError {
    SyncError::AccountUpdate {
        account_id,
        reason: format!("Jellyfin returned HTTP {status}"),
    }
}

#[async_trait]
impl AccountDirectory for JellyfinDirectory {
    async fn find_by_id(&self, id: Uuid) -> SyncResult<Option<Account>> {
        match self.user_document(id).await? {
            Some(doc) => Ok(Some(serde_json::from_value(doc)?)),
            None => Ok(None),
        }
    }

    async fn find_by_name(&self, name: &str) -> SyncResult<Option<Account>> {
        let response = self
            .send("list", self.request(Method::GET, "/Users"))
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(SyncError::Directory {
                operation: "list".to_string(),
                reason: format!("Jellyfin returned HTTP {status}"),
            });
        }

        let accounts: Vec<Account> = response.json().await?;
        Ok(accounts
            .into_iter()
            .find(|a| a.name.to_lowercase() == name.to_lowercase()))
    }

    async fn create(&self, name: &str, password: &str) -> SyncResult<Account> {
        let body = serde_json::json!({ "Name": name, "Password": password });
        let response = self
            .http_client
            .post(format!("{}/Users/New", self.base_url))
            .header(TOKEN_HEADER, &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| SyncError::AccountCreation {
                name: name.to_string(),
                reason: format!("request failed: {e}"),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(SyncError::AccountCreation {
                name: name.to_string(),
                reason: format!("Jellyfin returned HTTP {status}"),
            });
        }

        let account: Account = response.json().await.map_err(|e| SyncError::AccountCreation {
            name: name.to_string(),
            reason: format!("malformed user: {e}"),
        })?;
        debug!(account_id = %account.id, name = %account.name, "Created Jellyfin user");
        Ok(account)
    }

    async fn rename(&self, id: Uuid, name: &str) -> SyncResult<()> {
        let mut doc = self
            .user_document(id)
            .await?
            .ok_or_else(|| SyncError::AccountUpdate {
                account_id: id,
                reason: "account not found".to_string(),
            })?;
        doc["Name"] = Value::String(name.to_string());

        let response = self
            .send(
                "rename",
                self.request(Method::POST, &format!("/Users/{id}")).json(&doc),
            )
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(update_error(id, status));
        }
        Ok(())
    }

    async fn update_policy(&self, id: Uuid, policy: &AccountPolicy) -> SyncResult<()> {
        let response = self
            .send(
                "policy update",
                self.request(Method::POST, &format!("/Users/{id}/Policy"))
                    .json(policy),
            )
            .await
            .map_err(|e| SyncError::AccountUpdate {
                account_id: id,
                reason: e.to_string(),
            })?;
        let status = response.status();
        if !status.is_success() {
            return Err(update_error(id, status));
        }
        Ok(())
    }

    async fn libraries(&self) -> SyncResult<Vec<Library>> {
        let response = self
            .send(
                "library listing",
                self.request(Method::GET, "/Library/VirtualFolders"),
            )
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(SyncError::Directory {
                operation: "library listing".to_string(),
                reason: format!("Jellyfin returned HTTP {status}"),
            });
        }

        let folders: Vec<VirtualFolder> = response.json().await?;
        Ok(folders
            .into_iter()
            .filter_map(|f| {
                f.item_id.map(|id| Library {
                    name: f.name,
                    id,
                })
            })
            .collect())
    }
}
