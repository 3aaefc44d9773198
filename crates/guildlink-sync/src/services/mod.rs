//! Linking and reconciliation services.

pub mod account_resolver;
pub mod dispatch;
pub mod link_store;
pub mod locks;
pub mod login_state;
pub mod policy;
pub mod reconcile;

pub use account_resolver::{AccountLookup, AccountResolution, AccountResolver, ResolvedVia};
pub use dispatch::{ChannelEventSource, EventDispatcher, EventSource, DEFAULT_LANE_IDLE};
pub use link_store::{run_migrations, IdentityLinkStore, InMemoryLinkStore, PostgresLinkStore};
pub use locks::{KeyGuard, KeyedLocks};
pub use login_state::{LoginState, LoginStateSigner};
pub use policy::{IneligibleReason, PermissionPolicy, PolicyDecision};
pub use reconcile::{ReconciliationEngine, Stage};
