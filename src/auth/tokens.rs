//! Token pair returned by the B2C token endpoint

use serde::{Deserialize, Serialize};
use std::fmt;

/// Seconds shaved off every expiry before trusting it
pub const EXPIRY_SKEW_SECS: i64 = 10;

/// Token pair and its validity windows, as returned by the token endpoint.
///
/// All timestamps are Unix seconds.
#[derive(Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TokenSet {
    pub access_token: String,
    pub id_token: String,
    pub token_type: String,
    /// Issue time
    pub not_before: i64,
    pub expires_in: i64,
    /// Absolute expiry of the access token
    pub expires_on: i64,
    pub resource: String,
    pub client_info: String,
    pub scope: String,
    pub refresh_token: String,
    /// Refresh token lifetime, counted from `not_before`
    pub refresh_token_expires_in: i64,
}

/// What the token manager has to do before it can hand out a token
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenState {
    /// Access token usable as is
    Valid,
    /// Access token expired, refresh token still inside its window
    Refreshable,
    /// Full credential login required
    Cold,
}

impl TokenSet {
    /// Classify the token pair at `now` (Unix seconds)
    pub fn state_at(&self, now: i64) -> TokenState {
        if !self.access_token.is_empty() && now < self.expires_on - EXPIRY_SKEW_SECS {
            return TokenState::Valid;
        }

        let refresh_deadline = self.not_before + self.refresh_token_expires_in - EXPIRY_SKEW_SECS;
        if !self.refresh_token.is_empty() && now < refresh_deadline {
            TokenState::Refreshable
        } else {
            TokenState::Cold
        }
    }
}

// Keep tokens out of logs and panic messages
impl fmt::Debug for TokenSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenSet")
            .field("token_type", &self.token_type)
            .field("not_before", &self.not_before)
            .field("expires_on", &self.expires_on)
            .field("refresh_token_expires_in", &self.refresh_token_expires_in)
            .field("has_refresh_token", &!self.refresh_token.is_empty())
            .finish_non_exhaustive()
    }
}
