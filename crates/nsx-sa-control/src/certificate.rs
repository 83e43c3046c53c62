//! Certificate lifecycle of realized service accounts.
//!
//! [`CertificateLifecycleManager`] generates client certificates, decides
//! when they are due for rotation, rotates them and keeps the CA bundle in
//! every credential secret current.
//!
//! Rotation touches the Manager and Kubernetes without a transaction, so its
//! steps run in a fixed order:
//!
//! 1. generate a new key and certificate
//! 2. import the certificate into the Manager trust store
//! 3. rebind the principal identity to it and refresh the cluster control plane
//! 4. write the new key and certificate into the secret
//! 5. delete the old certificate
//!
//! A failure stops the sequence and leaves the extra Manager state in place.
//! The old certificate is never removed before the secret holds the new one.

use std::sync::Arc;

use nsx_sa_client::ManagerApi;
use nsx_sa_core::PrincipalIdentity;
use nsx_sa_store::{ClusterControlPlaneStore, PrincipalIdentityStore};
use tracing::{debug, info, warn};

use crate::kube_client::{CredentialSecret, KubeClient, SecretOwner};
use crate::pki::{self, CertificateBundle, CertificateInfo};
use crate::Result;

/// Generates, checks and rotates client certificates.
pub struct CertificateLifecycleManager {
    api: Arc<dyn ManagerApi>,
    kube: Arc<dyn KubeClient>,
    principal_identities: Arc<PrincipalIdentityStore>,
    control_planes: Arc<ClusterControlPlaneStore>,
    valid_days: u32,
    rotate_before_days: u32,
    ca_bundle: Option<String>,
}

impl CertificateLifecycleManager {
    /// Create a manager writing through `api` and `kube` and keeping the
    /// given stores current.
    #[must_use]
    pub fn new(
        api: Arc<dyn ManagerApi>,
        kube: Arc<dyn KubeClient>,
        principal_identities: Arc<PrincipalIdentityStore>,
        control_planes: Arc<ClusterControlPlaneStore>,
        valid_days: u32,
        rotate_before_days: u32,
        ca_bundle: Option<String>,
    ) -> Self {
        Self {
            api,
            kube,
            principal_identities,
            control_planes,
            valid_days,
            rotate_before_days,
            ca_bundle,
        }
    }

    /// The CA bundle written into secrets.
    #[must_use]
    pub fn ca_bundle(&self) -> Option<&str> {
        self.ca_bundle.as_deref()
    }

    /// Generate a client certificate for `subject`.
    ///
    /// # Errors
    ///
    /// Returns an error if generation fails.
    pub fn generate(&self, subject: &str) -> Result<CertificateBundle> {
        Ok(pki::generate(subject, self.valid_days)?)
    }

    /// Whether the PEM certificate is within the rotation window.
    ///
    /// # Errors
    ///
    /// Returns an error if the certificate cannot be parsed.
    pub fn rotation_due(&self, cert_pem: &str) -> Result<bool> {
        let info = CertificateInfo::from_pem(cert_pem)?;
        Ok(info.rotation_due(self.rotate_before_days))
    }

    /// Build the secret contents for a bundle.
    #[must_use]
    pub fn credential(
        &self,
        namespace: &str,
        name: &str,
        bundle: CertificateBundle,
    ) -> CredentialSecret {
        CredentialSecret {
            namespace: namespace.to_string(),
            name: name.to_string(),
            cert_pem: bundle.cert_pem,
            key_pem: bundle.key_pem,
            ca_pem: self.ca_bundle.clone(),
        }
    }

    /// Write the configured CA bundle into `secret` if it differs.
    ///
    /// Returns whether the secret was updated.
    ///
    /// # Errors
    ///
    /// Returns an error if the secret cannot be written.
    pub async fn sync_ca(&self, secret: &CredentialSecret, owner: &SecretOwner) -> Result<bool> {
        let Some(ca) = &self.ca_bundle else {
            return Ok(false);
        };
        if secret.ca_pem.as_ref() == Some(ca) {
            return Ok(false);
        }

        let mut updated = secret.clone();
        updated.ca_pem = Some(ca.clone());
        self.kube.apply_secret(&updated, owner).await?;
        info!(namespace = %secret.namespace, name = %secret.name, "Updated CA bundle in secret");
        Ok(true)
    }

    /// Replace the certificate of `principal_identity` and its secret.
    ///
    /// Returns the identifier of the new Manager certificate.
    ///
    /// # Errors
    ///
    /// Returns the first failing step's error. Steps already done stay done.
    pub async fn rotate(
        &self,
        principal_identity: &PrincipalIdentity,
        secret: &CredentialSecret,
        owner: &SecretOwner,
    ) -> Result<String> {
        let name = &principal_identity.name;
        info!(name = %name, "Rotating client certificate");

        let bundle = self.generate(name)?;

        let imported = self.api.import_certificate(name, &bundle.cert_pem).await?;
        debug!(name = %name, certificate = %imported.id, "Imported certificate");

        let rebound = self
            .api
            .update_principal_identity_certificate(&principal_identity.id, &imported.id)
            .await?;
        let control_plane = match self.control_planes.get(name) {
            Some(mut ccp) => {
                ccp.certificate = Some(bundle.cert_pem.clone());
                Some(self.api.upsert_cluster_control_plane(&ccp).await?)
            }
            None => None,
        };

        self.principal_identities.apply(rebound)?;
        if let Some(ccp) = control_plane {
            self.control_planes.apply(ccp)?;
        }

        let mut updated = self.credential(&secret.namespace, &secret.name, bundle);
        if updated.ca_pem.is_none() {
            updated.ca_pem.clone_from(&secret.ca_pem);
        }
        self.kube.apply_secret(&updated, owner).await?;

        if let Some(old) = principal_identity
            .certificate_id
            .as_deref()
            .filter(|old| *old != imported.id)
        {
            match self.api.delete_certificate(old).await {
                Ok(()) => debug!(certificate = %old, "Deleted old certificate"),
                Err(e) if e.is_not_found() => {}
                Err(e) => warn!(
                    name = %name,
                    certificate = %old,
                    error = %e,
                    "Failed to delete old certificate"
                ),
            }
        }

        info!(name = %name, certificate = %imported.id, "Rotated client certificate");
        Ok(imported.id)
    }
}
