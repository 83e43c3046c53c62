//! Operator configuration, assembled from the per-crate configs.

use std::time::Duration;

use nsx_sa_client::ManagerConfig;
use nsx_sa_control::{GcConfig, ProvisioningConfig};

use crate::Result;

/// Requeue delay after a retriable reconcile error.
pub const RETRY_REQUEUE: Duration = Duration::from_secs(15);

/// Requeue delay after a permanent reconcile error.
pub const PERMANENT_REQUEUE: Duration = Duration::from_secs(300);

/// Everything the operator binary needs.
#[derive(Debug, Clone)]
pub struct OperatorConfig {
    /// NSX Manager connection.
    pub manager: ManagerConfig,
    /// Provisioning engine.
    pub provisioning: ProvisioningConfig,
    /// Garbage collector.
    pub gc: GcConfig,
}

impl OperatorConfig {
    /// Combine the parts. The Manager CA is what secrets carry as `ca.crt`.
    #[must_use]
    pub fn new(manager: ManagerConfig, mut provisioning: ProvisioningConfig, gc: GcConfig) -> Self {
        if provisioning.ca_bundle.is_none() {
            provisioning.ca_bundle.clone_from(&manager.ca_pem);
        }
        Self {
            manager,
            provisioning,
            gc,
        }
    }

    /// Load every part from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if any part fails to load.
    pub fn from_env() -> Result<Self> {
        Ok(Self::new(
            ManagerConfig::from_env()?,
            ProvisioningConfig::from_env()?,
            GcConfig::from_env()?,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manager_ca_becomes_secret_ca() {
        let manager = ManagerConfig {
            ca_pem: Some("CA".into()),
            ..ManagerConfig::default()
        };
        let config = OperatorConfig::new(manager, ProvisioningConfig::default(), GcConfig::default());
        assert_eq!(config.provisioning.ca_bundle.as_deref(), Some("CA"));
    }
}
