//! PKCE (S256) challenge and MSAL login state generation

use crate::error::Result;
use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use rand::Rng;
use rand::distr::Alphanumeric;
use serde::Serialize;
use sha2::{Digest, Sha256};
use uuid::Uuid;

const VERIFIER_PREFIX: &str = "clear_";
const VERIFIER_RANDOM_LEN: usize = 43;

/// Code verifier kept for the token exchange, and the challenge sent to the authorize page
#[derive(Debug, Clone)]
pub struct PkceChallenge {
    pub verifier: String,
    pub challenge: String,
}

impl PkceChallenge {
    /// Fresh random verifier and its S256 challenge
    pub fn generate() -> Self {
        let random: String = rand::rng()
            .sample_iter(&Alphanumeric)
            .take(VERIFIER_RANDOM_LEN)
            .map(char::from)
            .collect();
        Self::from_verifier(format!("{VERIFIER_PREFIX}{random}"))
    }

    pub fn from_verifier(verifier: String) -> Self {
        let digest = Sha256::digest(verifier.as_bytes());
        let challenge = URL_SAFE_NO_PAD.encode(digest);
        Self {
            verifier,
            challenge,
        }
    }
}

#[derive(Serialize)]
struct LoginState<'a> {
    id: String,
    meta: LoginStateMeta<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LoginStateMeta<'a> {
    interaction_type: &'a str,
}

/// Opaque `state` parameter the portal's MSAL client would send
pub fn login_state() -> Result<String> {
    let state = LoginState {
        id: Uuid::new_v4().to_string(),
        meta: LoginStateMeta {
            interaction_type: "redirect",
        },
    };
    let payload = serde_json::to_vec(&state)?;
    Ok(STANDARD.encode(payload))
}
