//! Configuration for the provisioning engine and its background loop.

use std::time::Duration;

use crate::error::{ControlError, Result};

/// Configuration for [`TrustProvisioningService`](crate::TrustProvisioningService).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisioningConfig {
    /// Name of this Kubernetes cluster; the Manager-side project and the
    /// prefix of every normalized name.
    pub cluster_name: String,
    /// Validity of generated client certificates.
    pub cert_valid_days: u32,
    /// Rotate when less than this many days of validity remain.
    pub cert_rotate_before_days: u32,
    /// CA bundle written into every secret's `ca.crt`.
    pub ca_bundle: Option<String>,
}

impl Default for ProvisioningConfig {
    fn default() -> Self {
        Self {
            cluster_name: "kubernetes".to_string(),
            cert_valid_days: 365,
            cert_rotate_before_days: 30,
            ca_bundle: None,
        }
    }
}

impl ProvisioningConfig {
    /// Load configuration from environment variables.
    ///
    /// Reads `CLUSTER_NAME`, `CERT_VALID_DAYS` and `CERT_ROTATE_BEFORE_DAYS`.
    /// The CA bundle is not read here; it comes from the Manager connection
    /// settings.
    ///
    /// # Errors
    ///
    /// Returns an error if a value does not parse or the rotation window
    /// is not shorter than the validity.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("CLUSTER_NAME") {
            config.cluster_name = val;
        }
        if let Ok(val) = std::env::var("CERT_VALID_DAYS") {
            config.cert_valid_days = parse_var("CERT_VALID_DAYS", &val)?;
        }
        if let Ok(val) = std::env::var("CERT_ROTATE_BEFORE_DAYS") {
            config.cert_rotate_before_days = parse_var("CERT_ROTATE_BEFORE_DAYS", &val)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Check the configuration is usable.
    ///
    /// # Errors
    ///
    /// Returns an error if the cluster name is empty or a freshly generated
    /// certificate would already be due for rotation.
    pub fn validate(&self) -> Result<()> {
        if self.cluster_name.is_empty() {
            return Err(ControlError::Config("CLUSTER_NAME must not be empty".into()));
        }
        if self.cert_rotate_before_days >= self.cert_valid_days {
            return Err(ControlError::Config(format!(
                "rotation window of {} days must be shorter than validity of {} days",
                self.cert_rotate_before_days, self.cert_valid_days
            )));
        }
        Ok(())
    }
}

/// Configuration for the garbage collector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GcConfig {
    /// Seconds between GC passes.
    pub interval_seconds: u64,
    /// Run certificate validation every this many GC passes.
    pub validation_multiplier: u32,
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            interval_seconds: 600,
            validation_multiplier: 6,
        }
    }
}

impl GcConfig {
    /// Load configuration from `GC_INTERVAL_SECONDS` and
    /// `GC_VALIDATION_MULTIPLIER`.
    ///
    /// # Errors
    ///
    /// Returns an error if a value does not parse or is zero.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("GC_INTERVAL_SECONDS") {
            config.interval_seconds = parse_var("GC_INTERVAL_SECONDS", &val)?;
        }
        if let Ok(val) = std::env::var("GC_VALIDATION_MULTIPLIER") {
            config.validation_multiplier = parse_var("GC_VALIDATION_MULTIPLIER", &val)?;
        }

        if config.interval_seconds == 0 || config.validation_multiplier == 0 {
            return Err(ControlError::Config(
                "GC interval and validation multiplier must be positive".into(),
            ));
        }
        Ok(config)
    }

    /// Interval between GC passes.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, val: &str) -> Result<T> {
    val.trim()
        .parse()
        .map_err(|_| ControlError::Config(format!("invalid value for {name}: {val:?}")))
}
