//! The `state` parameter of the Discord login round trip.
//!
//! A login state is an HS256 token signed with the server secret. It names
//! the page to return to and expires after a few minutes, so a callback can
//! only complete a login this server started.

use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{SyncError, SyncResult};

const DEFAULT_LIFETIME_MINUTES: i64 = 10;

/// What a login state carries across the provider redirect.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginState {
    /// Makes every issued state distinct.
    pub nonce: Uuid,
    pub redirect_after: Option<String>,
    pub exp: i64,
}

/// Issues login states and verifies the ones a callback brings back.
#[derive(Clone)]
pub struct LoginStateSigner {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    lifetime: Duration,
}

impl LoginStateSigner {
    #[must_use]
    pub fn new(secret: &str) -> Self {
        Self::with_lifetime(secret, Duration::minutes(DEFAULT_LIFETIME_MINUTES))
    }

    #[must_use]
    pub fn with_lifetime(secret: &str, lifetime: Duration) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp"]);

        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            validation,
            lifetime,
        }
    }

    pub fn issue(&self, redirect_after: Option<String>) -> SyncResult<String> {
        let state = LoginState {
            nonce: Uuid::new_v4(),
            redirect_after,
            exp: (Utc::now() + self.lifetime).timestamp(),
        };
        Ok(encode(&Header::new(Algorithm::HS256), &state, &self.encoding)?)
    }

    /// Check signature and expiry; any failure is `InvalidState`.
    pub fn verify(&self, token: &str) -> SyncResult<LoginState> {
        decode::<LoginState>(token, &self.decoding, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| SyncError::InvalidState {
                reason: e.to_string(),
            })
    }
}
