use super::tokens::TokenSet;
use crate::config::AuthConfig;
use crate::error::{OceaError, Result};
use reqwest::StatusCode;
use reqwest::header::{ACCEPT, ORIGIN, REFERER};
use uuid::Uuid;

/// Trade a refresh token for a new token pair
pub(crate) async fn exchange_refresh_token(
    client: &reqwest::Client,
    config: &AuthConfig,
    refresh_token: &str,
) -> Result<TokenSet> {
    if refresh_token.is_empty() {
        return Err(OceaError::NoRefreshToken);
    }

    let request_id = Uuid::new_v4().to_string();
    let resp = client
        .post(&config.token_url)
        .header(ORIGIN, &config.portal_home)
        .header(ACCEPT, "application/json")
        .header(REFERER, &config.portal_home)
        .form(&[
            ("client_id", config.client_id.as_str()),
            ("scope", config.scope.as_str()),
            ("grant_type", "refresh_token"),
            ("client_info", "1"),
            ("client-request-id", request_id.as_str()),
            ("refresh_token", refresh_token),
        ])
        .send()
        .await?;

    let status = resp.status();
    if status.is_server_error() {
        return Err(OceaError::http(status.as_u16(), "token refresh"));
    }
    if status != StatusCode::OK {
        return Err(OceaError::auth(format!(
            "refresh token exchange failed (HTTP {})",
            status.as_u16()
        )));
    }

    Ok(resp.json::<TokenSet>().await?)
}
