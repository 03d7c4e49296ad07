use ocea_exporter::OceaError;
use ocea_exporter::auth::{Credentials, TokenManager, TokenProvider, TokenSet, TokenState};
use ocea_exporter::config::AuthConfig;
use ocea_exporter::error::ErrorClass;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn auth_config(server: &MockServer) -> AuthConfig {
    let base = server.uri();
    AuthConfig {
        portal_home: format!("{base}/portal/"),
        authorize_url: format!("{base}/oauth2/authorize"),
        token_url: format!("{base}/oauth2/token"),
        self_asserted_url: format!("{base}/SelfAsserted"),
        confirm_url: format!("{base}/confirmed"),
        login_origin: base,
        ..AuthConfig::default()
    }
}

/// Access token about to expire (inside the skew), refresh token still good
fn expiring_tokens() -> TokenSet {
    let now = chrono::Utc::now().timestamp();
    TokenSet {
        access_token: "at-old".to_string(),
        refresh_token: "rt-old".to_string(),
        not_before: now - 3000,
        expires_on: now + 5,
        refresh_token_expires_in: 86400,
        ..TokenSet::default()
    }
}

fn manager(server: &MockServer) -> TokenManager {
    TokenManager::new(auth_config(server), Credentials::new("user", "pw"))
        .unwrap()
        .with_tokens(expiring_tokens())
}

#[tokio::test]
async fn expiring_token_is_refreshed() {
    let server = MockServer::start().await;
    let now = chrono::Utc::now().timestamp();
    Mock::given(method("POST"))
        .and(path("/oauth2/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .and(body_string_contains("refresh_token=rt-old"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "at-new",
            "refresh_token": "rt-new",
            "not_before": now,
            "expires_on": now + 3600,
            "refresh_token_expires_in": 86400
        })))
        .expect(1)
        .mount(&server)
        .await;

    let manager = manager(&server);
    assert_eq!(manager.state().await, TokenState::Refreshable);
    assert_eq!(manager.token().await.unwrap(), "at-new");
    assert_eq!(manager.state().await, TokenState::Valid);
}

/// Authorize, SelfAsserted and confirm steps of a successful login
async fn mount_login_pages(server: &MockServer) {
    let page = r#"<script>var SETTINGS = {"csrf":"cGFnZQ==","transId":"StateProperties=eyJUSUQ","pageViewId":"0b1c2d3e-4f50"};</script>"#;
    Mock::given(method("GET"))
        .and(path("/oauth2/authorize"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("set-cookie", "x-ms-cpim-csrf=Y29va2ll; Path=/")
                .set_body_string(page),
        )
        .expect(1)
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path("/SelfAsserted"))
        .and(header("x-csrf-token", "Y29va2ll"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"status": "200"})))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/confirmed"))
        .respond_with(
            ResponseTemplate::new(302)
                .insert_header("location", format!("{}/portal/#code=login-code", server.uri()).as_str()),
        )
        .mount(server)
        .await;
}

#[tokio::test]
async fn rejected_refresh_falls_back_to_login() {
    let server = MockServer::start().await;
    let now = chrono::Utc::now().timestamp();
    Mock::given(method("POST"))
        .and(path("/oauth2/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .respond_with(ResponseTemplate::new(400).set_body_string(r#"{"error":"invalid_grant"}"#))
        .expect(1)
        .mount(&server)
        .await;
    mount_login_pages(&server).await;
    Mock::given(method("POST"))
        .and(path("/oauth2/token"))
        .and(body_string_contains("grant_type=authorization_code"))
        .and(body_string_contains("code=login-code"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "at-login",
            "refresh_token": "rt-login",
            "not_before": now,
            "expires_on": now + 3600,
            "refresh_token_expires_in": 86400
        })))
        .expect(1)
        .mount(&server)
        .await;

    let manager = manager(&server);
    let err = manager.token().await.unwrap_err();
    assert_eq!(err.class(), ErrorClass::Auth);
    assert_eq!(manager.state().await, TokenState::Cold);

    // The next call logs in instead of retrying the refresh token
    assert_eq!(manager.token().await.unwrap(), "at-login");
    assert_eq!(manager.state().await, TokenState::Valid);
}

#[tokio::test]
async fn server_error_keeps_refresh_token() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth2/token"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let manager = manager(&server);
    let err = manager.token().await.unwrap_err();
    assert!(matches!(err, OceaError::Http { status: 503, .. }));
    assert!(err.is_transient());
    assert_eq!(manager.state().await, TokenState::Refreshable);
}

#[tokio::test]
async fn empty_access_token_is_refused() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth2/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "",
            "refresh_token": "rt-new"
        })))
        .mount(&server)
        .await;

    let err = manager(&server).token().await.unwrap_err();
    assert!(matches!(err, OceaError::Auth { .. }));
}
