//! Browser-flow simulation of the B2C authorization-code + PKCE login
//!
//! The portal has no public OAuth client, so the exporter walks the same
//! pages a browser would:
//!
//! 1. GET the authorize page (sets the `x-ms-cpim-csrf` cookie, embeds SETTINGS)
//! 2. POST the credentials to `SelfAsserted`
//! 3. GET `confirmed`, which redirects to the portal with `#code=...`
//! 4. POST the code and PKCE verifier to the token endpoint
//!
//! Every login runs on its own client and cookie jar, dropped at the end.

use super::Credentials;
use super::pkce::{self, PkceChallenge};
use super::settings::{PageSettings, PageSettingsExtractor};
use super::tokens::TokenSet;
use crate::config::AuthConfig;
use crate::error::{OceaError, Result};
use reqwest::cookie::Jar;
use reqwest::header::{ACCEPT, LOCATION, ORIGIN, REFERER};
use reqwest::{Response, StatusCode};
use secrecy::ExposeSecret;
use serde::Deserialize;
use std::sync::Arc;
use url::Url;
use uuid::Uuid;

const CSRF_COOKIE: &str = "x-ms-cpim-csrf";

/// Authorize page state carried through the remaining steps
struct AuthorizePage {
    settings: PageSettings,
    csrf_cookie: Option<String>,
    url: Url,
}

/// `SelfAsserted` answers 200 even for bad credentials, with the verdict in the body
#[derive(Deserialize)]
struct SelfAssertedResponse {
    status: String,
    #[serde(default)]
    message: Option<String>,
}

pub(crate) struct LoginFlow<'a> {
    config: &'a AuthConfig,
    credentials: &'a Credentials,
    extractor: &'a dyn PageSettingsExtractor,
    client: reqwest::Client,
}

impl<'a> LoginFlow<'a> {
    pub(crate) fn new(
        config: &'a AuthConfig,
        credentials: &'a Credentials,
        extractor: &'a dyn PageSettingsExtractor,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .cookie_provider(Arc::new(Jar::default()))
            .redirect(reqwest::redirect::Policy::none())
            .timeout(config.timeout())
            .user_agent(config.user_agent.as_str())
            .build()?;
        Ok(Self {
            config,
            credentials,
            extractor,
            client,
        })
    }

    /// Run every step and return the token pair
    pub(crate) async fn run(self) -> Result<TokenSet> {
        let request_id = Uuid::new_v4().to_string();
        let pkce = PkceChallenge::generate();

        let page = self.authorize(&request_id, &pkce).await?;
        self.submit_credentials(&page).await?;
        let code = self.confirm(&page).await?;
        self.exchange_code(&code, &request_id, &pkce).await
    }

    async fn authorize(&self, request_id: &str, pkce: &PkceChallenge) -> Result<AuthorizePage> {
        let state = pkce::login_state()?;
        let nonce = Uuid::new_v4().to_string();

        let resp = self
            .client
            .get(&self.config.authorize_url)
            .query(&[
                ("client_id", self.config.client_id.as_str()),
                ("scope", self.config.scope.as_str()),
                ("redirect_uri", self.config.portal_home.as_str()),
                ("client-request-id", request_id),
                ("response_mode", "fragment"),
                ("response_type", "code"),
                ("x-client-SKU", "msal.js.browser"),
                ("x-client-VER", "2.28.1"),
                ("client_info", "1"),
                ("code_challenge", pkce.challenge.as_str()),
                ("code_challenge_method", "S256"),
                ("nonce", nonce.as_str()),
                ("state", state.as_str()),
            ])
            .send()
            .await?;

        expect_status(&resp, StatusCode::OK, "authorize page")?;

        let url = resp.url().clone();
        let csrf_cookie = resp
            .cookies()
            .find(|c| c.name().eq_ignore_ascii_case(CSRF_COOKIE))
            .map(|c| c.value().to_string());
        let body = resp.text().await?;
        let settings = self.extractor.extract(&body)?;

        Ok(AuthorizePage {
            settings,
            csrf_cookie,
            url,
        })
    }

    async fn submit_credentials(&self, page: &AuthorizePage) -> Result<()> {
        let csrf = page
            .csrf_cookie
            .as_deref()
            .filter(|v| !v.is_empty())
            .ok_or_else(|| OceaError::auth("csrf cookie not set by authorize page"))?;

        let resp = self
            .client
            .post(&self.config.self_asserted_url)
            .query(&[
                ("tx", page.settings.trans_id.as_str()),
                ("p", self.config.policy.as_str()),
            ])
            .header(ORIGIN, &self.config.login_origin)
            .header("X-CSRF-TOKEN", csrf)
            .header("X-Requested-With", "XMLHttpRequest")
            .header(ACCEPT, "application/json")
            .header(REFERER, page.url.as_str())
            .form(&[
                ("request_type", "RESPONSE"),
                ("email", self.credentials.username.as_str()),
                ("password", self.credentials.password.expose_secret()),
            ])
            .send()
            .await?;

        expect_status(&resp, StatusCode::OK, "credentials submission")?;

        let body = resp.text().await?;
        if let Ok(verdict) = serde_json::from_str::<SelfAssertedResponse>(&body)
            && verdict.status != "200"
        {
            return Err(OceaError::auth(format!(
                "credentials rejected: {}",
                verdict.message.unwrap_or(verdict.status)
            )));
        }
        Ok(())
    }

    async fn confirm(&self, page: &AuthorizePage) -> Result<String> {
        let diags = format!(
            r#"{{"pageViewId":"{}","pageId":"CombinedSigninAndSignup","trace":[]}}"#,
            page.settings.page_view_id
        );

        let mut url = Url::parse(&self.config.confirm_url)?;
        url.query_pairs_mut()
            .append_pair("p", &self.config.policy)
            .append_pair("rememberMe", "false")
            .append_pair("csrf_token", &page.settings.csrf)
            .append_pair("diags", &diags);
        // tx goes out unencoded; B2C rejects `StateProperties%3D...`
        let query = format!(
            "{}&tx={}",
            url.query().unwrap_or_default(),
            page.settings.trans_id
        );
        url.set_query(Some(&query));

        let resp = self
            .client
            .get(url)
            .header(ORIGIN, &self.config.login_origin)
            .header(ACCEPT, "text/html")
            .header(REFERER, page.url.as_str())
            .send()
            .await?;

        expect_status(&resp, StatusCode::FOUND, "login confirmation")?;

        let location = resp
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .ok_or(OceaError::AuthCodeMissing)?;
        let base = Url::parse(&self.config.portal_home)?;
        let redirect = base
            .join(location)
            .map_err(|_| OceaError::AuthCodeMissing)?;
        code_from_fragment(&redirect)
    }

    async fn exchange_code(
        &self,
        code: &str,
        request_id: &str,
        pkce: &PkceChallenge,
    ) -> Result<TokenSet> {
        let resp = self
            .client
            .post(&self.config.token_url)
            .header(ORIGIN, &self.config.portal_home)
            .header(ACCEPT, "application/json")
            .header(REFERER, &self.config.portal_home)
            .form(&[
                ("client_id", self.config.client_id.as_str()),
                ("redirect_uri", self.config.portal_home.as_str()),
                ("scope", self.config.scope.as_str()),
                ("code", code),
                ("code_verifier", pkce.verifier.as_str()),
                ("grant_type", "authorization_code"),
                ("client_info", "1"),
                ("client-request-id", request_id),
            ])
            .send()
            .await?;

        expect_status(&resp, StatusCode::OK, "code exchange")?;
        Ok(resp.json::<TokenSet>().await?)
    }
}

fn expect_status(resp: &Response, expected: StatusCode, step: &str) -> Result<()> {
    let status = resp.status();
    if status == expected {
        Ok(())
    } else {
        Err(OceaError::auth(format!(
            "{step} failed (HTTP {}, expected {})",
            status.as_u16(),
            expected.as_u16()
        )))
    }
}

/// Authorization code from a `#code=...&state=...` redirect
pub(crate) fn code_from_fragment(redirect: &Url) -> Result<String> {
    let fragment = redirect.fragment().ok_or(OceaError::AuthCodeMissing)?;
    let mut code = None;
    let mut error = None;
    for (key, value) in url::form_urlencoded::parse(fragment.as_bytes()) {
        match key.as_ref() {
            "code" if !value.is_empty() => code = Some(value.into_owned()),
            "error_description" => error = Some(value.into_owned()),
            "error" if error.is_none() => error = Some(value.into_owned()),
            _ => {}
        }
    }

    match (code, error) {
        (Some(code), _) => Ok(code),
        (None, Some(error)) => Err(OceaError::auth(format!("authorization denied: {error}"))),
        (None, None) => Err(OceaError::AuthCodeMissing),
    }
}
