//! The Manager cluster as one logical call surface.
//!
//! Each logical call is attempted against one endpoint at a time. Retriable
//! failures mark that endpoint down and move on to the next one, up to
//! `max_retries` attempts in total. Everything else is returned at once, since
//! another endpoint cannot fix a bad request.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::Deserialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::ManagerConfig;
use crate::endpoint::{Endpoint, EndpointStatus};
use crate::error::{ClientError, Result};
use crate::ratelimit::RateLimiter;
use crate::request::{ApiRequest, ApiResponse};
use crate::session::Credentials;
use crate::version::{Feature, FeatureSet, ManagerVersion};

/// Manager version endpoint.
pub const VERSION_PATH: &str = "/api/v1/node/version";

/// Aggregate health of the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterHealth {
    /// Every endpoint is up.
    Green,
    /// Some endpoints are up.
    Orange,
    /// No endpoint is up.
    Red,
}

#[derive(Debug, Deserialize)]
struct NodeVersion {
    node_version: String,
}

#[derive(Debug, Default)]
struct VersionState {
    version: Option<ManagerVersion>,
    features: FeatureSet,
}

/// A pool of Manager endpoints.
#[derive(Debug)]
pub struct EndpointPool {
    endpoints: Vec<Arc<Endpoint>>,
    preferred: AtomicUsize,
    max_retries: usize,
    keep_alive_interval: Duration,
    version: RwLock<VersionState>,
}

/// Build the HTTP client shared by every endpoint of a pool.
///
/// # Errors
///
/// Returns `ClientError::Config` if the CA bundle or client identity cannot
/// be parsed.
pub fn build_http_client(config: &ManagerConfig) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder()
        .timeout(config.request_timeout())
        .connect_timeout(Duration::from_secs(5))
        .danger_accept_invalid_certs(config.insecure);

    if let Some(ca) = &config.ca_pem {
        let cert = reqwest::Certificate::from_pem(ca.as_bytes())
            .map_err(|e| ClientError::Config(format!("invalid CA bundle: {e}")))?;
        builder = builder.add_root_certificate(cert);
    }

    if let Credentials::ClientCertificate { cert_pem, key_pem } = &config.credentials {
        let identity = reqwest::Identity::from_pem(format!("{cert_pem}\n{key_pem}").as_bytes())
            .map_err(|e| ClientError::Config(format!("invalid client certificate: {e}")))?;
        builder = builder.identity(identity);
    }

    builder
        .build()
        .map_err(|e| ClientError::Config(format!("building HTTP client: {e}")))
}

impl EndpointPool {
    /// Create a pool from configuration.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::NoEndpoints` if no managers are configured, or
    /// `ClientError::Config` if the HTTP client cannot be built.
    pub fn new(config: &ManagerConfig) -> Result<Self> {
        if config.managers.is_empty() {
            return Err(ClientError::NoEndpoints);
        }

        let client = build_http_client(config)?;
        let endpoints = config
            .managers
            .iter()
            .map(|address| {
                Arc::new(Endpoint::new(
                    address,
                    client.clone(),
                    config.credentials.clone(),
                    RateLimiter::new(config.rate_limit, config.rate_mode),
                ))
            })
            .collect();

        Ok(Self::from_endpoints(
            endpoints,
            config.max_retries,
            config.keep_alive_interval(),
        ))
    }

    /// Create a pool over already constructed endpoints.
    #[must_use]
    pub fn from_endpoints(
        endpoints: Vec<Arc<Endpoint>>,
        max_retries: usize,
        keep_alive_interval: Duration,
    ) -> Self {
        Self {
            endpoints,
            preferred: AtomicUsize::new(0),
            max_retries: max_retries.max(1),
            keep_alive_interval,
            version: RwLock::new(VersionState::default()),
        }
    }

    /// The pool's endpoints in configured order.
    #[must_use]
    pub fn endpoints(&self) -> &[Arc<Endpoint>] {
        &self.endpoints
    }

    /// Hosts of every endpoint, for status reporting.
    #[must_use]
    pub fn hosts(&self) -> Vec<String> {
        self.endpoints.iter().map(|e| e.host().to_string()).collect()
    }

    /// Pick the endpoint for the next attempt: the preferred one if up,
    /// otherwise the next up endpoint after it, otherwise the preferred one.
    fn select(&self) -> usize {
        let n = self.endpoints.len();
        let start = self.preferred.load(Ordering::Acquire) % n;
        (0..n)
            .map(|offset| (start + offset) % n)
            .find(|&i| self.endpoints[i].is_up())
            .unwrap_or(start)
    }

    /// Send a logical call, failing over between endpoints.
    ///
    /// # Errors
    ///
    /// Non-retriable errors are returned as soon as they occur. When every
    /// attempt fails with a retriable error, returns
    /// `ClientError::AllEndpointsFailed` wrapping the last one.
    pub async fn invoke(&self, request: &ApiRequest) -> Result<ApiResponse> {
        if self.endpoints.is_empty() {
            return Err(ClientError::NoEndpoints);
        }

        let n = self.endpoints.len();
        let mut last = None;
        for attempt in 1..=self.max_retries {
            let index = self.select();
            let endpoint = &self.endpoints[index];

            match endpoint.send(request).await {
                Ok(response) => {
                    endpoint.set_status(EndpointStatus::Up);
                    self.preferred.store(index, Ordering::Release);
                    return Ok(response);
                }
                Err(e) if e.is_retriable() => {
                    tracing::warn!(
                        endpoint = %endpoint.host(),
                        method = %request.method,
                        path = %request.path,
                        attempt,
                        error = %e,
                        "manager call failed, failing over"
                    );
                    endpoint.set_status(EndpointStatus::Down);
                    self.preferred.store((index + 1) % n, Ordering::Release);
                    last = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(ClientError::AllEndpointsFailed {
            attempts: self.max_retries,
            last: Box::new(last.unwrap_or(ClientError::NoHealthyEndpoint)),
        })
    }

    /// Probe the Manager version and recompute the feature set.
    ///
    /// # Errors
    ///
    /// Returns the call error, or `ClientError::InvalidResponse` if the
    /// version cannot be parsed. The cached version is left unchanged.
    pub async fn refresh_version(&self) -> Result<ManagerVersion> {
        let response = self.invoke(&ApiRequest::get(VERSION_PATH)).await?;
        let version: ManagerVersion = response.json::<NodeVersion>()?.node_version.parse()?;

        let features = FeatureSet::from_version(version);
        *self.version.write() = VersionState {
            version: Some(version),
            features,
        };
        tracing::info!(version = %version, "manager version probed");
        Ok(version)
    }

    /// The cached Manager version, if probed.
    #[must_use]
    pub fn version(&self) -> Option<ManagerVersion> {
        self.version.read().version
    }

    /// Whether the Manager supports `feature`.
    ///
    /// Probes the version on first use.
    ///
    /// # Errors
    ///
    /// Returns the probe error when the version is not yet known and the
    /// Manager cannot be reached. Connectivity failures stay retriable.
    pub async fn check_version(&self, feature: Feature) -> Result<bool> {
        if self.version().is_none() {
            self.refresh_version().await?;
        }
        Ok(self.version.read().features.supports(feature))
    }

    /// Aggregate health of the pool.
    #[must_use]
    pub fn health(&self) -> ClusterHealth {
        let up = self.endpoints.iter().filter(|e| e.is_up()).count();
        if up == 0 {
            ClusterHealth::Red
        } else if up == self.endpoints.len() {
            ClusterHealth::Green
        } else {
            ClusterHealth::Orange
        }
    }

    /// Check that at least one endpoint is usable.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::NoHealthyEndpoint` when every endpoint is down.
    pub fn health_check(&self) -> Result<()> {
        match self.health() {
            ClusterHealth::Red => Err(ClientError::NoHealthyEndpoint),
            ClusterHealth::Green | ClusterHealth::Orange => Ok(()),
        }
    }

    /// Run one keep-alive iteration on every endpoint, then re-probe the
    /// version when any endpoint is up.
    pub async fn keep_alive_once(&self) -> ClusterHealth {
        futures::future::join_all(self.endpoints.iter().map(|e| e.keep_alive_once())).await;
        self.probe_version_if_up().await;
        self.health()
    }

    async fn probe_version_if_up(&self) {
        if self.health() == ClusterHealth::Red {
            return;
        }
        if let Err(e) = self.refresh_version().await {
            tracing::warn!(error = %e, "manager version probe failed");
        }
    }

    /// Spawn one keep-alive task per endpoint plus one version probe task.
    ///
    /// The tasks stop within one probe interval of `token` being cancelled.
    #[must_use]
    pub fn spawn_keep_alive(self: &Arc<Self>, token: &CancellationToken) -> Vec<JoinHandle<()>> {
        let mut handles: Vec<_> = self
            .endpoints
            .iter()
            .map(|endpoint| {
                tokio::spawn(
                    Arc::clone(endpoint).run_keep_alive(self.keep_alive_interval, token.child_token()),
                )
            })
            .collect();
        handles.push(tokio::spawn(
            Arc::clone(self).run_version_probe(token.child_token()),
        ));
        handles
    }

    async fn run_version_probe(self: Arc<Self>, token: CancellationToken) {
        let mut ticker = tokio::time::interval(self.keep_alive_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick completes at once; start-up has just probed.
        ticker.tick().await;

        loop {
            tokio::select! {
                () = token.cancelled() => break,
                _ = ticker.tick() => self.probe_version_if_up().await,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::HEALTH_PATH;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn pool(uris: &[&str], max_retries: usize) -> EndpointPool {
        let endpoints = uris
            .iter()
            .map(|uri| {
                Arc::new(Endpoint::new(
                    uri,
                    reqwest::Client::new(),
                    Credentials::None,
                    RateLimiter::unlimited(),
                ))
            })
            .collect();
        EndpointPool::from_endpoints(endpoints, max_retries, Duration::from_secs(30))
    }

    #[tokio::test]
    async fn fails_over_to_healthy_endpoint() {
        let good = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ping"))
            .respond_with(ResponseTemplate::new(200).set_body_string("pong"))
            .expect(1)
            .mount(&good)
            .await;

        let pool = pool(&["http://127.0.0.1:1", &good.uri()], 3);
        let resp = pool.invoke(&ApiRequest::get("/ping")).await.unwrap();

        assert_eq!(resp.body, "pong");
        assert_eq!(pool.endpoints()[0].status(), EndpointStatus::Down);
        assert_eq!(pool.endpoints()[1].status(), EndpointStatus::Up);
        assert_eq!(pool.health(), ClusterHealth::Orange);

        // The healthy endpoint is now preferred.
        assert_eq!(pool.select(), 1);
    }

    #[tokio::test]
    async fn server_errors_fail_over() {
        let bad = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .expect(1)
            .mount(&bad)
            .await;
        let good = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&good)
            .await;

        let pool = pool(&[&bad.uri(), &good.uri()], 3);
        pool.invoke(&ApiRequest::get("/x")).await.unwrap();
        assert!(!pool.endpoints()[0].is_up());
    }

    #[tokio::test]
    async fn bad_request_is_not_retried() {
        let first = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(400)
                    .set_body_string(r#"{"error_message":"bad payload","error_code":1}"#),
            )
            .expect(1)
            .mount(&first)
            .await;
        let second = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&second)
            .await;

        let pool = pool(&[&first.uri(), &second.uri()], 3);
        let err = pool.invoke(&ApiRequest::post("/x")).await.unwrap_err();

        assert_eq!(err.status(), Some(400));
        assert!(err.to_string().contains("bad payload"));
        assert!(pool.endpoints()[0].is_up());
    }

    #[tokio::test]
    async fn exhausted_retries_are_aggregated() {
        let pool = pool(&["http://127.0.0.1:1", "http://127.0.0.1:2"], 4);
        let err = pool.invoke(&ApiRequest::get("/x")).await.unwrap_err();

        match err {
            ClientError::AllEndpointsFailed { attempts, last } => {
                assert_eq!(attempts, 4);
                assert!(last.is_retriable());
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(pool.health(), ClusterHealth::Red);
        assert!(pool.health_check().is_err());
    }

    #[tokio::test]
    async fn version_gates_features() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(VERSION_PATH))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(r#"{"node_version":"4.1.2.0.0.12345","product_version":"x"}"#),
            )
            .expect(1)
            .mount(&server)
            .await;

        let pool = pool(&[&server.uri()], 1);
        assert!(pool.check_version(Feature::ServiceAccount).await.unwrap());
        assert!(pool.check_version(Feature::ServiceAccountRestore).await.unwrap());
        assert!(!pool.check_version(Feature::ServiceAccountCertRotation).await.unwrap());
        assert_eq!(pool.version(), Some(ManagerVersion::new(4, 1, 2)));
    }

    #[tokio::test]
    async fn unreachable_manager_is_a_retriable_error() {
        let pool = pool(&["http://127.0.0.1:1"], 1);
        let err = pool.check_version(Feature::ServiceAccount).await.unwrap_err();
        assert!(err.is_retriable());
        assert!(pool.version().is_none());
    }

    #[tokio::test]
    async fn keep_alive_refreshes_version() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(HEALTH_PATH))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(VERSION_PATH))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(r#"{"node_version":"4.1.3.0.0.1"}"#),
            )
            .expect(1)
            .mount(&server)
            .await;

        let pool = pool(&[&server.uri()], 1);
        assert_eq!(pool.keep_alive_once().await, ClusterHealth::Green);
        assert_eq!(pool.version(), Some(ManagerVersion::new(4, 1, 3)));
        assert!(pool.check_version(Feature::ServiceAccountCertRotation).await.unwrap());
    }

    #[tokio::test]
    async fn keep_alive_skips_version_when_all_down() {
        let pool = pool(&["http://127.0.0.1:1"], 1);
        assert_eq!(pool.keep_alive_once().await, ClusterHealth::Red);
        assert!(pool.version().is_none());
    }

    #[test]
    fn empty_config_is_rejected() {
        let err = EndpointPool::new(&ManagerConfig::default()).unwrap_err();
        assert!(matches!(err, ClientError::NoEndpoints));
    }
}
