//! HTTP handlers.

pub mod events;
pub mod health;
pub mod login;

pub use events::relay_event;
pub use health::{health, HealthResponse};
pub use login::{callback, login, CallbackQuery, LoginQuery, LoginResponse};
