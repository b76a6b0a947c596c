use std::sync::Arc;
use std::time::Duration;

use reqwest::cookie::{CookieStore, Jar};
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use reqwest::Client;

use super::error::AuthError;

const DEFAULT_USER_AGENT: &str = concat!("kidsnoter-rs/", env!("CARGO_PKG_VERSION"));

/// Cookie-carrying HTTP session shared by the lister and the downloader.
///
/// Cloning is cheap: the `reqwest::Client` and the cookie jar are both
/// reference counted, so every clone sees cookies set by any other.
#[derive(Clone)]
pub struct Session {
    client: Client,
    cookie_jar: Arc<Jar>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("cookies", &"<redacted>")
            .finish_non_exhaustive()
    }
}

impl Session {
    pub fn new(timeout: Duration) -> Result<Self, AuthError> {
        let cookie_jar = Arc::new(Jar::default());

        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(DEFAULT_USER_AGENT));

        let client = Client::builder()
            .cookie_provider(Arc::clone(&cookie_jar))
            .default_headers(headers)
            .timeout(timeout)
            .build()?;

        Ok(Self { client, cookie_jar })
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Store `name=value` for `domain`. A leading dot makes the cookie apply
    /// to every subdomain; otherwise it is host-only.
    pub fn set_cookie(&self, name: &str, value: &str, domain: &str) -> Result<(), AuthError> {
        let url = cookie_url(domain)?;
        let cookie = if domain.starts_with('.') {
            format!("{name}={value}; Domain={domain}; Path=/")
        } else {
            format!("{name}={value}; Path=/")
        };
        self.cookie_jar.add_cookie_str(&cookie, &url);
        Ok(())
    }

    /// The `Cookie` header the session would send to `url`.
    pub fn cookie_header(&self, url: &url::Url) -> Option<String> {
        self.cookie_jar
            .cookies(url)
            .and_then(|v| v.to_str().ok().map(str::to_string))
    }
}

fn cookie_url(domain: &str) -> Result<url::Url, AuthError> {
    let host = domain.trim().trim_start_matches('.');
    if host.is_empty() {
        return Err(AuthError::InvalidCookieDomain(domain.to_string()));
    }
    url::Url::parse(&format!("https://{host}/"))
        .map_err(|e| AuthError::InvalidCookieDomain(format!("{domain}: {e}")))
}
