//! One Manager node: its session, rate limiter, health and keep-alive loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::error::{ClientError, Result};
use crate::ratelimit::RateLimiter;
use crate::request::{ApiRequest, ApiResponse};
use crate::session::{AuthSession, Credentials};

/// Lightweight liveness probe.
pub const HEALTH_PATH: &str = "/api/v1/reverse-proxy/node/health";

/// Sessions unused for longer than this are re-established by keep-alive.
const SESSION_MAX_AGE_MINUTES: i64 = 25;

/// Longest error body kept in an error message.
const MAX_ERROR_BODY: usize = 512;

/// Health of one endpoint as seen by the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointStatus {
    /// Reachable and authenticated.
    Up,
    /// Unreachable or failing.
    Down,
}

/// A Manager node.
#[derive(Debug)]
pub struct Endpoint {
    base_url: String,
    host: String,
    client: reqwest::Client,
    session: AuthSession,
    limiter: RateLimiter,
    status: RwLock<EndpointStatus>,
    keep_alive_active: AtomicBool,
}

#[derive(Deserialize)]
struct ManagerErrorBody {
    error_message: Option<String>,
    error_code: Option<i64>,
}

impl Endpoint {
    /// Create an endpoint for `address`.
    ///
    /// The address may be a bare host, `host:port` or a full URL; bare
    /// addresses default to `https`.
    #[must_use]
    pub fn new(
        address: &str,
        client: reqwest::Client,
        credentials: Credentials,
        limiter: RateLimiter,
    ) -> Self {
        let base_url = if address.contains("://") {
            address.trim_end_matches('/').to_string()
        } else {
            format!("https://{}", address.trim_end_matches('/'))
        };
        let host = base_url
            .split_once("://")
            .map_or(base_url.as_str(), |(_, rest)| rest)
            .to_string();

        Self {
            base_url,
            host,
            client,
            session: AuthSession::new(credentials),
            limiter,
            status: RwLock::new(EndpointStatus::Up),
            keep_alive_active: AtomicBool::new(false),
        }
    }

    /// Base URL including scheme.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Host (and port) without scheme.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Current health status.
    #[must_use]
    pub fn status(&self) -> EndpointStatus {
        *self.status.read()
    }

    /// Whether the endpoint is currently up.
    #[must_use]
    pub fn is_up(&self) -> bool {
        self.status() == EndpointStatus::Up
    }

    /// The endpoint's session.
    #[must_use]
    pub fn session(&self) -> &AuthSession {
        &self.session
    }

    /// The endpoint's rate limiter.
    #[must_use]
    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub(crate) fn set_status(&self, status: EndpointStatus) {
        let previous = std::mem::replace(&mut *self.status.write(), status);
        if previous != status {
            tracing::info!(endpoint = %self.host, status = ?status, "endpoint status changed");
        }
    }

    /// Send one request to this endpoint.
    ///
    /// Logs in first if needed. A 401 forces one re-login and a single retry.
    ///
    /// # Errors
    ///
    /// Returns the transport, login or status error of the final attempt.
    pub async fn send(&self, request: &ApiRequest) -> Result<ApiResponse> {
        self.limiter.acquire().await;
        if !self.session.is_authenticated() {
            self.session.login(&self.client, &self.base_url).await?;
        }

        let result = match self.execute(request).await {
            Err(e) if e.status() == Some(401) => {
                tracing::debug!(endpoint = %self.host, "session rejected, logging in again");
                self.session.invalidate();
                self.session.login(&self.client, &self.base_url).await?;
                self.limiter.acquire().await;
                self.execute(request).await
            }
            other => other,
        };

        match &result {
            Ok(_) => {
                self.limiter.on_success();
                self.session.mark_good();
            }
            Err(e) if e.is_throttled() => self.limiter.on_throttled(),
            Err(_) => {}
        }
        result
    }

    async fn execute(&self, request: &ApiRequest) -> Result<ApiResponse> {
        let url = format!("{}{}", self.base_url, request.path);
        let mut builder = self.client.request(request.method.clone(), url);
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }
        builder = self.session.apply(builder);

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;

        if (200..300).contains(&status) {
            Ok(ApiResponse { status, body })
        } else {
            Err(ClientError::Status {
                status,
                message: error_message(&body),
            })
        }
    }

    /// Run one keep-alive iteration: refresh a stale session, probe health and
    /// update the status.
    pub async fn keep_alive_once(&self) -> EndpointStatus {
        let status = match self.probe().await {
            Ok(()) => EndpointStatus::Up,
            Err(e) => {
                tracing::warn!(endpoint = %self.host, error = %e, "keep-alive probe failed");
                EndpointStatus::Down
            }
        };
        self.set_status(status);
        status
    }

    async fn probe(&self) -> Result<()> {
        if self
            .session
            .is_stale(chrono::Duration::minutes(SESSION_MAX_AGE_MINUTES))
        {
            self.session.login(&self.client, &self.base_url).await?;
        }

        let request = ApiRequest::get(HEALTH_PATH);
        self.limiter.acquire().await;
        match self.execute(&request).await {
            Err(e) if e.is_auth() => {
                tracing::debug!(endpoint = %self.host, "probe rejected, logging in again");
                self.session.invalidate();
                self.session.login(&self.client, &self.base_url).await?;
                self.limiter.acquire().await;
                self.execute(&request).await?;
            }
            other => {
                other?;
            }
        }

        self.session.mark_good();
        Ok(())
    }

    /// Probe this endpoint every `interval` until `token` is cancelled.
    ///
    /// Only one loop runs per endpoint; a second call returns immediately.
    pub async fn run_keep_alive(self: Arc<Self>, interval: Duration, token: CancellationToken) {
        if self.keep_alive_active.swap(true, Ordering::AcqRel) {
            tracing::warn!(endpoint = %self.host, "keep-alive loop already running");
            return;
        }

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        tracing::debug!(endpoint = %self.host, "keep-alive loop started");
        loop {
            tokio::select! {
                () = token.cancelled() => break,
                _ = ticker.tick() => {
                    self.keep_alive_once().await;
                }
            }
        }

        self.keep_alive_active.store(false, Ordering::Release);
        tracing::debug!(endpoint = %self.host, "keep-alive loop stopped");
    }
}

fn error_message(body: &str) -> String {
    if let Ok(parsed) = serde_json::from_str::<ManagerErrorBody>(body) {
        if let Some(message) = parsed.error_message {
            return match parsed.error_code {
                Some(code) => format!("{message} (code {code})"),
                None => message,
            };
        }
    }
    let mut end = body.len().min(MAX_ERROR_BODY);
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    body[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{LOGIN_PATH, XSRF_HEADER};
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn endpoint(uri: &str, credentials: Credentials) -> Endpoint {
        Endpoint::new(
            uri,
            reqwest::Client::new(),
            credentials,
            RateLimiter::unlimited(),
        )
    }

    #[test]
    fn address_normalization() {
        let ep = endpoint("10.0.0.1:443", Credentials::None);
        assert_eq!(ep.base_url(), "https://10.0.0.1:443");
        assert_eq!(ep.host(), "10.0.0.1:443");

        let ep = endpoint("http://mgr.local/", Credentials::None);
        assert_eq!(ep.base_url(), "http://mgr.local");
        assert_eq!(ep.host(), "mgr.local");
    }

    #[test]
    fn extracts_manager_error_message() {
        let body = r#"{"httpStatus":"BAD_REQUEST","error_code":500012,"error_message":"Duplicate name"}"#;
        assert_eq!(error_message(body), "Duplicate name (code 500012)");
        assert_eq!(error_message("plain"), "plain");
    }

    #[tokio::test]
    async fn send_echoes_xsrf_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(LOGIN_PATH))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header(XSRF_HEADER, "tok")
                    .insert_header("set-cookie", "JSESSIONID=s1; Path=/"),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v1/node/version"))
            .and(header(XSRF_HEADER, "tok"))
            .and(header("cookie", "JSESSIONID=s1"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"node_version":"4.2.0"}"#))
            .expect(2)
            .mount(&server)
            .await;

        let ep = endpoint(
            &server.uri(),
            Credentials::Basic {
                username: "admin".to_string(),
                password: "pw".to_string(),
            },
        );

        let request = ApiRequest::get("/api/v1/node/version");
        ep.send(&request).await.unwrap();
        // Session is reused: login is expected exactly once.
        let resp = ep.send(&request).await.unwrap();
        assert_eq!(resp.status, 200);
    }

    #[tokio::test]
    async fn unauthorized_forces_one_relogin() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(LOGIN_PATH))
            .respond_with(ResponseTemplate::new(200).insert_header(XSRF_HEADER, "tok"))
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/thing"))
            .respond_with(ResponseTemplate::new(401))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/thing"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let ep = endpoint(
            &server.uri(),
            Credentials::Basic {
                username: "admin".to_string(),
                password: "pw".to_string(),
            },
        );
        ep.send(&ApiRequest::get("/thing")).await.unwrap();
    }

    #[tokio::test]
    async fn keep_alive_flips_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(HEALTH_PATH))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let ep = endpoint(&server.uri(), Credentials::None);
        ep.set_status(EndpointStatus::Down);
        assert_eq!(ep.keep_alive_once().await, EndpointStatus::Up);
        assert!(ep.is_up());

        let dead = endpoint("http://127.0.0.1:1", Credentials::None);
        assert_eq!(dead.keep_alive_once().await, EndpointStatus::Down);
    }

    #[tokio::test]
    async fn keep_alive_loop_stops_on_cancel() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(HEALTH_PATH))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let ep = Arc::new(endpoint(&server.uri(), Credentials::None));
        let token = CancellationToken::new();
        let handle = tokio::spawn(Arc::clone(&ep).run_keep_alive(
            Duration::from_millis(20),
            token.clone(),
        ));

        tokio::time::sleep(Duration::from_millis(50)).await;
        // A second loop for the same endpoint refuses to start.
        Arc::clone(&ep)
            .run_keep_alive(Duration::from_millis(20), token.clone())
            .await;

        token.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(!ep.keep_alive_active.load(Ordering::Acquire));
    }
}
