//! Token lifecycle for the resident portal
//!
//! [`TokenManager`] owns the only copy of the token pair. Each call to
//! [`TokenProvider::token`] either returns the cached access token, refreshes
//! it, or runs a full credential login, depending on [`TokenState`].
//! The pair is replaced only once a refresh or login has fully succeeded.

mod login;
pub mod pkce;
mod refresh;
pub mod settings;
pub mod tokens;

pub use settings::{B2cSettingsExtractor, PageSettings, PageSettingsExtractor};
pub use tokens::{EXPIRY_SKEW_SECS, TokenSet, TokenState};

use crate::config::{AuthConfig, CredentialsConfig};
use crate::error::{ErrorClass, OceaError, Result};
use crate::logging::{StructuredLogger, get_logger};
use chrono::Utc;
use login::LoginFlow;
use secrecy::SecretString;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Portal account credentials, fixed for the process lifetime
#[derive(Debug)]
pub struct Credentials {
    pub username: String,
    pub password: SecretString,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: SecretString::from(password.into()),
        }
    }
}

impl From<&CredentialsConfig> for Credentials {
    fn from(config: &CredentialsConfig) -> Self {
        Self::new(config.username.clone(), config.password.clone())
    }
}

/// Source of bearer tokens for the vendor API
#[async_trait::async_trait]
pub trait TokenProvider: Send + Sync {
    /// A currently valid access token
    async fn token(&self) -> Result<String>;

    /// Forget the access token after the API rejected it
    async fn invalidate(&self) {}
}

#[derive(Default)]
struct TokenSlot {
    tokens: Option<TokenSet>,
    /// The token endpoint refused the refresh token; go through login next time
    refresh_rejected: bool,
}

impl TokenSlot {
    fn state_at(&self, now: i64) -> TokenState {
        match &self.tokens {
            None => TokenState::Cold,
            Some(tokens) => match tokens.state_at(now) {
                TokenState::Refreshable if self.refresh_rejected => TokenState::Cold,
                state => state,
            },
        }
    }
}

/// B2C-backed token provider
pub struct TokenManager {
    config: AuthConfig,
    credentials: Credentials,
    extractor: Arc<dyn PageSettingsExtractor>,
    client: reqwest::Client,
    slot: Mutex<TokenSlot>,
    logger: StructuredLogger,
}

impl TokenManager {
    /// Create a manager using the stock B2C page extractor
    pub fn new(config: AuthConfig, credentials: Credentials) -> Result<Self> {
        let extractor = Arc::new(B2cSettingsExtractor::new()?);
        Self::with_extractor(config, credentials, extractor)
    }

    pub fn with_extractor(
        config: AuthConfig,
        credentials: Credentials,
        extractor: Arc<dyn PageSettingsExtractor>,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(config.timeout())
            .user_agent(config.user_agent.as_str())
            .build()?;
        Ok(Self {
            config,
            credentials,
            extractor,
            client,
            slot: Mutex::new(TokenSlot::default()),
            logger: get_logger("auth"),
        })
    }

    /// Start from an already known token pair
    #[must_use]
    pub fn with_tokens(self, tokens: TokenSet) -> Self {
        Self {
            slot: Mutex::new(TokenSlot {
                tokens: Some(tokens),
                refresh_rejected: false,
            }),
            ..self
        }
    }

    /// Current state of the held token pair
    pub async fn state(&self) -> TokenState {
        self.slot.lock().await.state_at(Utc::now().timestamp())
    }

    async fn login(&self) -> Result<TokenSet> {
        self.logger.debug("Starting credential login");
        let flow = LoginFlow::new(&self.config, &self.credentials, self.extractor.as_ref())?;
        let tokens = accept(flow.run().await?)?;
        self.logger.info("Got token from credentials");
        Ok(tokens)
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenSet> {
        let tokens = refresh::exchange_refresh_token(&self.client, &self.config, refresh_token)
            .await
            .and_then(accept)?;
        self.logger.info("Got token from refresh");
        Ok(tokens)
    }
}

fn accept(tokens: TokenSet) -> Result<TokenSet> {
    if tokens.access_token.is_empty() {
        return Err(OceaError::auth("token endpoint returned no access token"));
    }
    Ok(tokens)
}

#[async_trait::async_trait]
impl TokenProvider for TokenManager {
    async fn token(&self) -> Result<String> {
        // Held across the network calls: concurrent callers wait for one login
        let mut slot = self.slot.lock().await;

        match slot.state_at(Utc::now().timestamp()) {
            TokenState::Valid => {}
            TokenState::Refreshable => {
                let refresh_token = slot
                    .tokens
                    .as_ref()
                    .map(|t| t.refresh_token.clone())
                    .unwrap_or_default();
                match self.refresh(&refresh_token).await {
                    Ok(tokens) => slot.tokens = Some(tokens),
                    Err(e) => {
                        if e.class() == ErrorClass::Auth {
                            self.logger
                                .warn(&format!("Refresh rejected, next attempt will log in: {e}"));
                            slot.refresh_rejected = true;
                        }
                        return Err(e);
                    }
                }
            }
            TokenState::Cold => {
                let tokens = self.login().await?;
                slot.tokens = Some(tokens);
                slot.refresh_rejected = false;
            }
        }

        slot.tokens
            .as_ref()
            .map(|t| t.access_token.clone())
            .ok_or_else(|| OceaError::auth("no token available"))
    }

    async fn invalidate(&self) {
        let mut slot = self.slot.lock().await;
        if let Some(tokens) = slot.tokens.as_mut() {
            tokens.expires_on = 0;
            self.logger.debug("Access token invalidated");
        }
    }
}
