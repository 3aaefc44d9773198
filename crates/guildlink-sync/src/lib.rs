//! Discord to Jellyfin account linking for guildlink.
//!
//! This crate links Discord identities to Jellyfin accounts and keeps each
//! account's permissions in line with the user's guild membership and roles.
//!
//! # Features
//!
//! - **Login with Discord**: `OAuth2` code exchange with signed JWT state
//! - **Account resolution**: by stored link, then by display name, then creation
//! - **Role policy**: admin role, per-library roles, disable on leave or no roles
//! - **Per-user ordering**: events and logins for one user never interleave
//! - **Durable links**: one Discord user per account, stored in Postgres
//!
//! # Example
//!
//! ```rust,ignore
//! use guildlink_sync::router::sync_router;
//!
//! let app = sync_router(state);
//! axum::serve(listener, app).await?;
//! ```

pub mod config;
pub mod directory;
pub mod error;
pub mod handlers;
pub mod models;
pub mod providers;
pub mod router;
pub mod services;

pub use config::{ConfigError, SyncConfig};
pub use error::{SyncError, SyncResult};
pub use router::{sync_router, SyncState};
pub use services::{EventDispatcher, ReconciliationEngine};
