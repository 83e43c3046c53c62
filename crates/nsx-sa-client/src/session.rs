//! Authenticated session with one Manager node.
//!
//! Username/password credentials log in through the form endpoint and keep
//! the returned `JSESSIONID` cookie and `X-XSRF-TOKEN` header. Client
//! certificate credentials authenticate during the TLS handshake, so the
//! session is considered authenticated without a login round-trip.

use std::fmt;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use reqwest::header::{COOKIE, SET_COOKIE};

use crate::error::{ClientError, Result};

/// Login form endpoint.
pub const LOGIN_PATH: &str = "/api/session/create";

/// Anti-forgery header returned on login and echoed on every call.
pub const XSRF_HEADER: &str = "X-XSRF-TOKEN";

/// Session cookie name.
pub const SESSION_COOKIE: &str = "JSESSIONID";

/// Credential material used to authenticate with the Manager.
#[derive(Clone, Default)]
pub enum Credentials {
    /// No credentials; every call is sent anonymously.
    #[default]
    None,
    /// Form login with username and password.
    Basic {
        /// Login user.
        username: String,
        /// Login password.
        password: String,
    },
    /// Mutual TLS with a client certificate.
    ClientCertificate {
        /// PEM-encoded client certificate.
        cert_pem: String,
        /// PEM-encoded private key.
        key_pem: String,
    },
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::Basic { username, .. } => f
                .debug_struct("Basic")
                .field("username", username)
                .field("password", &"<redacted>")
                .finish(),
            Self::ClientCertificate { .. } => f.write_str("ClientCertificate"),
        }
    }
}

#[derive(Debug, Default)]
struct SessionState {
    authenticated: bool,
    cookie: Option<String>,
    xsrf_token: Option<String>,
    last_good: Option<DateTime<Utc>>,
}

/// Session state for one endpoint.
///
/// Either fully authenticated or not: a failed login resets every field.
#[derive(Debug)]
pub struct AuthSession {
    credentials: Credentials,
    state: RwLock<SessionState>,
}

impl AuthSession {
    /// Create an unauthenticated session.
    #[must_use]
    pub fn new(credentials: Credentials) -> Self {
        Self {
            credentials,
            state: RwLock::new(SessionState::default()),
        }
    }

    /// The credentials this session logs in with.
    #[must_use]
    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    /// Whether the session is currently authenticated.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.state.read().authenticated
    }

    /// The anti-forgery token, if logged in with a form login.
    #[must_use]
    pub fn xsrf_token(&self) -> Option<String> {
        self.state.read().xsrf_token.clone()
    }

    /// When the session last completed a successful call.
    #[must_use]
    pub fn last_good(&self) -> Option<DateTime<Utc>> {
        self.state.read().last_good
    }

    /// Whether the session has gone unused for longer than `max_age`.
    #[must_use]
    pub fn is_stale(&self, max_age: chrono::Duration) -> bool {
        let state = self.state.read();
        match state.last_good {
            Some(at) => Utc::now() - at > max_age,
            None => !state.authenticated,
        }
    }

    /// Record a successful call.
    pub fn mark_good(&self) {
        self.state.write().last_good = Some(Utc::now());
    }

    /// Drop all session state.
    pub fn invalidate(&self) {
        *self.state.write() = SessionState::default();
    }

    /// Authenticate against `base_url`.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::LoginFailed` if the credentials are rejected, or
    /// a connection/status error if the endpoint is unreachable. The session
    /// is left unauthenticated on any error.
    pub async fn login(&self, client: &reqwest::Client, base_url: &str) -> Result<()> {
        let (username, password) = match &self.credentials {
            Credentials::None | Credentials::ClientCertificate { .. } => {
                let mut state = self.state.write();
                state.authenticated = true;
                state.last_good = Some(Utc::now());
                return Ok(());
            }
            Credentials::Basic { username, password } => (username, password),
        };

        self.invalidate();

        let response = client
            .post(format!("{base_url}{LOGIN_PATH}"))
            .form(&[("j_username", username), ("j_password", password)])
            .send()
            .await?;

        let status = response.status();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(ClientError::LoginFailed(format!("{base_url}: HTTP {status}")));
        }
        if !status.is_success() {
            return Err(ClientError::Status {
                status: status.as_u16(),
                message: format!("login to {base_url} failed"),
            });
        }

        let xsrf_token = response
            .headers()
            .get(XSRF_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let cookie = response
            .headers()
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .find_map(parse_session_cookie);

        let Some(xsrf_token) = xsrf_token else {
            return Err(ClientError::LoginFailed(format!(
                "{base_url}: login response carried no {XSRF_HEADER}"
            )));
        };

        let mut state = self.state.write();
        state.authenticated = true;
        state.cookie = cookie;
        state.xsrf_token = Some(xsrf_token);
        state.last_good = Some(Utc::now());
        drop(state);

        tracing::debug!(endpoint = %base_url, "manager session established");
        Ok(())
    }

    /// Attach the session cookie and anti-forgery token to a request.
    #[must_use]
    pub fn apply(&self, mut builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let state = self.state.read();
        if let Some(cookie) = &state.cookie {
            builder = builder.header(COOKIE, cookie);
        }
        if let Some(token) = &state.xsrf_token {
            builder = builder.header(XSRF_HEADER, token);
        }
        builder
    }
}

/// Extract `JSESSIONID=<value>` from a `Set-Cookie` header value.
fn parse_session_cookie(header: &str) -> Option<String> {
    let pair = header.split(';').next()?.trim();
    let (name, value) = pair.split_once('=')?;
    (name == SESSION_COOKIE && !value.is_empty()).then(|| pair.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn basic() -> Credentials {
        Credentials::Basic {
            username: "admin".to_string(),
            password: "secret".to_string(),
        }
    }

    #[test]
    fn parses_session_cookie() {
        assert_eq!(
            parse_session_cookie("JSESSIONID=abc123; Path=/; Secure; HttpOnly"),
            Some("JSESSIONID=abc123".to_string())
        );
        assert_eq!(parse_session_cookie("other=1; Path=/"), None);
        assert_eq!(parse_session_cookie("JSESSIONID=; Path=/"), None);
    }

    #[test]
    fn debug_redacts_password() {
        let rendered = format!("{:?}", basic());
        assert!(rendered.contains("admin"));
        assert!(!rendered.contains("secret"));
    }

    #[tokio::test]
    async fn form_login_stores_cookie_and_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(LOGIN_PATH))
            .and(body_string_contains("j_username=admin"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header(XSRF_HEADER, "token-1")
                    .insert_header("set-cookie", "JSESSIONID=s1; Path=/"),
            )
            .expect(1)
            .mount(&server)
            .await;

        let session = AuthSession::new(basic());
        session
            .login(&reqwest::Client::new(), &server.uri())
            .await
            .unwrap();

        assert!(session.is_authenticated());
        assert_eq!(session.xsrf_token().as_deref(), Some("token-1"));
        assert!(!session.is_stale(chrono::Duration::minutes(5)));
    }

    #[tokio::test]
    async fn rejected_login_leaves_session_clear() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(LOGIN_PATH))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let session = AuthSession::new(basic());
        let err = session
            .login(&reqwest::Client::new(), &server.uri())
            .await
            .unwrap_err();

        assert!(matches!(err, ClientError::LoginFailed(_)));
        assert!(!session.is_authenticated());
        assert!(session.xsrf_token().is_none());
    }

    #[tokio::test]
    async fn certificate_credentials_skip_login() {
        let session = AuthSession::new(Credentials::ClientCertificate {
            cert_pem: String::new(),
            key_pem: String::new(),
        });
        // No server: any request would fail.
        session
            .login(&reqwest::Client::new(), "http://127.0.0.1:1")
            .await
            .unwrap();
        assert!(session.is_authenticated());
        assert!(session.xsrf_token().is_none());
    }
}
