//! kidsnote login.
//!
//! A single JSON POST returns a session ID in the body; the session cookies
//! are then set on the shared jar by hand so later API calls carry them.

pub mod error;
pub mod session;

use serde::Serialize;
use serde_json::Value;

pub use self::error::AuthError;
pub use self::session::Session;
use crate::config::ApiConfig;

#[derive(Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
    remember_me: bool,
}

/// Log `session` in with the given credentials.
///
/// On success `current_user` is set for the user cookie domain and
/// `session_id` for the session cookie domain.
pub async fn login(
    session: &Session,
    api: &ApiConfig,
    username: &str,
    password: &str,
) -> Result<(), AuthError> {
    if username.is_empty() || password.is_empty() {
        return Err(AuthError::FailedLogin(
            "username or password is not set".to_string(),
        ));
    }

    tracing::debug!(url = %api.login_url, username, "Sending login request");

    let response = session
        .client()
        .post(&api.login_url)
        .json(&LoginRequest {
            username,
            password,
            remember_me: true,
        })
        .send()
        .await?;

    let status = response.status();
    let body = response.text().await?;

    if status.is_client_error() || status.is_server_error() {
        let err_code = serde_json::from_str::<Value>(&body)
            .ok()
            .and_then(|v| v.get("err_code").and_then(Value::as_str).map(str::to_string))
            .unwrap_or_else(|| format!("HTTP {}", status.as_u16()));
        tracing::error!(status = status.as_u16(), err_code = %err_code, "Login failed");
        return Err(AuthError::FailedLogin(err_code));
    }

    let value: Value = serde_json::from_str(&body)?;
    let session_id = value
        .get("session_id")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| AuthError::InvalidResponse("missing session_id".to_string()))?;

    session.set_cookie("current_user", username, &api.user_cookie_domain)?;
    session.set_cookie("session_id", session_id, &api.session_cookie_domain)?;

    tracing::info!("Successfully logged in");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn api_for(server: &MockServer) -> ApiConfig {
        let mut api = ApiConfig::with_base_url(&format!("{}/api", server.uri()));
        api.user_cookie_domain = "127.0.0.1".into();
        api.session_cookie_domain = "127.0.0.1".into();
        api
    }

    #[tokio::test]
    async fn test_login_sets_session_cookies() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/web/login"))
            .and(body_json(serde_json::json!({
                "username": "parent",
                "password": "secret",
                "remember_me": true
            })))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"session_id": "s3ss10n"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let session = Session::new(Duration::from_secs(5)).unwrap();
        let api = api_for(&server);
        login(&session, &api, "parent", "secret").await.unwrap();

        let header = session
            .cookie_header(&url::Url::parse(&api.info_url).unwrap())
            .unwrap();
        assert!(header.contains("current_user=parent"));
        assert!(header.contains("session_id=s3ss10n"));
    }

    #[tokio::test]
    async fn test_login_failure_reports_err_code() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/web/login"))
            .respond_with(
                ResponseTemplate::new(401)
                    .set_body_json(serde_json::json!({"err_code": "invalid_password"})),
            )
            .mount(&server)
            .await;

        let session = Session::new(Duration::from_secs(5)).unwrap();
        let err = login(&session, &api_for(&server), "parent", "wrong")
            .await
            .unwrap_err();
        match err {
            AuthError::FailedLogin(code) => assert_eq!(code, "invalid_password"),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_login_failure_without_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let session = Session::new(Duration::from_secs(5)).unwrap();
        let err = login(&session, &api_for(&server), "parent", "pw")
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Failed login: HTTP 503");
    }

    #[tokio::test]
    async fn test_missing_session_id_is_invalid_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .mount(&server)
            .await;

        let session = Session::new(Duration::from_secs(5)).unwrap();
        let err = login(&session, &api_for(&server), "parent", "pw")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn test_empty_credentials_rejected_without_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let session = Session::new(Duration::from_secs(5)).unwrap();
        let err = login(&session, &api_for(&server), "parent", "")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::FailedLogin(_)));
    }
}
