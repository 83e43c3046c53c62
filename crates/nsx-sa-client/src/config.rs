//! Connectivity configuration.

use std::time::Duration;

use crate::error::{ClientError, Result};
use crate::ratelimit::RateMode;
use crate::session::Credentials;

/// Configuration for the Manager endpoint pool.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Manager addresses: `host`, `host:port` or a full `https://` URL.
    pub managers: Vec<String>,
    /// Credentials used to authenticate every endpoint session.
    pub credentials: Credentials,
    /// PEM bundle trusted for the Manager's server certificate.
    pub ca_pem: Option<String>,
    /// Skip server certificate verification.
    pub insecure: bool,
    /// Calls per second per endpoint. Zero disables limiting.
    pub rate_limit: f64,
    /// How the rate reacts to throttling.
    pub rate_mode: RateMode,
    /// Attempts per logical call across endpoints.
    pub max_retries: usize,
    /// Interval between keep-alive probes, in seconds.
    pub keep_alive_seconds: u64,
    /// Per-request timeout, in seconds.
    pub request_timeout_seconds: u64,
}

impl ManagerConfig {
    /// Default calls per second per endpoint.
    pub const DEFAULT_RATE_LIMIT: f64 = 40.0;

    /// Get the keep-alive interval as a `Duration`.
    #[must_use]
    pub fn keep_alive_interval(&self) -> Duration {
        Duration::from_secs(self.keep_alive_seconds)
    }

    /// Get the request timeout as a `Duration`.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    /// Load configuration from environment variables.
    ///
    /// Unset variables keep their defaults. A client certificate takes
    /// precedence over username/password.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Config` if a referenced certificate, key or CA
    /// file cannot be read, or a value cannot be parsed.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("NSX_MANAGERS") {
            config.managers = val
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }

        let cert_file = std::env::var("NSX_CLIENT_CERT_FILE").ok();
        let key_file = std::env::var("NSX_CLIENT_KEY_FILE").ok();
        if let (Some(cert_file), Some(key_file)) = (cert_file, key_file) {
            config.credentials = Credentials::ClientCertificate {
                cert_pem: read_file(&cert_file)?,
                key_pem: read_file(&key_file)?,
            };
        } else if let Ok(username) = std::env::var("NSX_USERNAME") {
            config.credentials = Credentials::Basic {
                username,
                password: std::env::var("NSX_PASSWORD").unwrap_or_default(),
            };
        }

        if let Ok(val) = std::env::var("NSX_CA_FILE") {
            config.ca_pem = Some(read_file(&val)?);
        }
        if let Ok(val) = std::env::var("NSX_INSECURE") {
            config.insecure = matches!(val.to_lowercase().as_str(), "1" | "true" | "yes");
        }
        if let Ok(val) = std::env::var("NSX_API_RATE_LIMIT") {
            config.rate_limit = parse_var("NSX_API_RATE_LIMIT", &val)?;
        }
        if let Ok(val) = std::env::var("NSX_API_RATE_MODE") {
            config.rate_mode = val.parse()?;
        }
        if let Ok(val) = std::env::var("NSX_MAX_RETRIES") {
            config.max_retries = parse_var("NSX_MAX_RETRIES", &val)?;
        }
        if let Ok(val) = std::env::var("NSX_KEEP_ALIVE_SECONDS") {
            config.keep_alive_seconds = parse_var("NSX_KEEP_ALIVE_SECONDS", &val)?;
        }
        if let Ok(val) = std::env::var("NSX_REQUEST_TIMEOUT_SECONDS") {
            config.request_timeout_seconds = parse_var("NSX_REQUEST_TIMEOUT_SECONDS", &val)?;
        }

        Ok(config)
    }
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            managers: Vec::new(),
            credentials: Credentials::None,
            ca_pem: None,
            insecure: false,
            rate_limit: Self::DEFAULT_RATE_LIMIT,
            rate_mode: RateMode::Fixed,
            max_retries: 3,
            keep_alive_seconds: 30,
            request_timeout_seconds: 30,
        }
    }
}

fn read_file(path: &str) -> Result<String> {
    std::fs::read_to_string(path).map_err(|e| ClientError::Config(format!("reading {path}: {e}")))
}

fn parse_var<T: std::str::FromStr>(name: &str, val: &str) -> Result<T> {
    val.trim()
        .parse()
        .map_err(|_| ClientError::Config(format!("invalid value for {name}: {val:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = ManagerConfig::default();
        assert!(config.managers.is_empty());
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.rate_mode, RateMode::Fixed);
        assert_eq!(config.keep_alive_interval(), Duration::from_secs(30));
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn parse_var_reports_name() {
        let err = parse_var::<usize>("NSX_MAX_RETRIES", "many").unwrap_err();
        assert!(err.to_string().contains("NSX_MAX_RETRIES"));
        assert_eq!(parse_var::<f64>("NSX_API_RATE_LIMIT", " 2.5 ").unwrap(), 2.5);
    }
}
