//! Trust provisioning service.
//!
//! [`TrustProvisioningService`] turns `NSXServiceAccount` CRs into a Manager
//! principal identity, a cluster control plane and a credential secret, and
//! removes them again. Local stores mirror the Manager objects owned by this
//! cluster; every Manager object carries the owning CR's UID as a tag and
//! nothing is ever deleted on behalf of a different UID.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use kube::ResourceExt;
use nsx_sa_client::{ClientError, Feature, ManagerApi};
use nsx_sa_core::model::default_role_bindings;
use nsx_sa_core::{
    cluster_uuid, ClusterControlPlane, OwnerTags, PrincipalIdentity, PrincipalIdentityRequest,
    ServiceAccountRef, Tagged,
};
use nsx_sa_store::{ClusterControlPlaneStore, PrincipalIdentityStore};
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::certificate::CertificateLifecycleManager;
use crate::crd::{Condition, NsxServiceAccount, NsxServiceAccountStatus, SecretRef};
use crate::error::{ControlError, Result};
use crate::kube_client::{KubeClient, SecretOwner};
use crate::lifecycle::{self, RealizationState};
use crate::proxy;
use crate::types::ProvisioningConfig;

/// Message recorded on a successful realization.
pub const REALIZED_MESSAGE: &str = "Success.";

/// Identity of one CR as the engine sees it.
#[derive(Debug, Clone)]
struct Target {
    sa: ServiceAccountRef,
    uid: String,
    normalized: String,
    generation: Option<i64>,
}

impl Target {
    fn owner(&self) -> SecretOwner {
        SecretOwner {
            name: self.sa.name.clone(),
            uid: self.uid.clone(),
        }
    }

    fn tags(&self) -> Vec<nsx_sa_core::Tag> {
        OwnerTags::new(
            self.sa.cluster.clone(),
            self.sa.namespace.clone(),
            self.sa.name.clone(),
            self.uid.clone(),
        )
        .to_tags()
    }
}

/// What a validation pass did for one CR.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ValidationOutcome {
    /// The secret's CA bundle was replaced.
    pub ca_updated: bool,
    /// The client certificate was rotated.
    pub rotated: bool,
    /// Rotation was due but disabled or unsupported.
    pub rotation_skipped: bool,
}

/// Provisions Manager trust for `NSXServiceAccount` CRs.
pub struct TrustProvisioningService {
    api: Arc<dyn ManagerApi>,
    kube: Arc<dyn KubeClient>,
    principal_identities: Arc<PrincipalIdentityStore>,
    control_planes: Arc<ClusterControlPlaneStore>,
    certificates: CertificateLifecycleManager,
    config: ProvisioningConfig,
    states: RwLock<HashMap<String, RealizationState>>,
}

impl TrustProvisioningService {
    /// Create a new service with empty stores.
    #[must_use]
    pub fn new(
        api: Arc<dyn ManagerApi>,
        kube: Arc<dyn KubeClient>,
        config: ProvisioningConfig,
    ) -> Self {
        let principal_identities = Arc::new(PrincipalIdentityStore::new());
        let control_planes = Arc::new(ClusterControlPlaneStore::new());
        let certificates = CertificateLifecycleManager::new(
            Arc::clone(&api),
            Arc::clone(&kube),
            Arc::clone(&principal_identities),
            Arc::clone(&control_planes),
            config.cert_valid_days,
            config.cert_rotate_before_days,
            config.ca_bundle.clone(),
        );

        Self {
            api,
            kube,
            principal_identities,
            control_planes,
            certificates,
            config,
            states: RwLock::new(HashMap::new()),
        }
    }

    /// Get a reference to the service config.
    #[must_use]
    pub const fn config(&self) -> &ProvisioningConfig {
        &self.config
    }

    /// The principal identities owned by this cluster.
    #[must_use]
    pub fn principal_identities(&self) -> &PrincipalIdentityStore {
        &self.principal_identities
    }

    /// The cluster control planes owned by this cluster.
    #[must_use]
    pub fn control_planes(&self) -> &ClusterControlPlaneStore {
        &self.control_planes
    }

    /// The Kubernetes client.
    #[must_use]
    pub fn kube(&self) -> &dyn KubeClient {
        self.kube.as_ref()
    }

    /// The tracked realization state of a CR, if it has been seen.
    #[must_use]
    pub fn state(&self, uid: &str) -> Option<RealizationState> {
        self.states.read().get(uid).copied()
    }

    /// Load Manager objects tagged with this cluster into the stores.
    ///
    /// Returns the number of principal identities and cluster control
    /// planes loaded.
    ///
    /// # Errors
    ///
    /// Returns an error if either list call fails.
    pub async fn initialize(&self) -> Result<(usize, usize)> {
        let cluster = self.config.cluster_name.as_str();

        let identities = self.api.list_principal_identities().await?;
        let control_planes = self.api.list_cluster_control_planes().await?;

        let mut loaded = (0, 0);
        for pi in identities.into_iter().filter(|p| p.cluster() == Some(cluster)) {
            self.principal_identities.apply(pi)?;
            loaded.0 += 1;
        }
        for ccp in control_planes
            .into_iter()
            .filter(|c| c.cluster() == Some(cluster))
        {
            self.control_planes.apply(ccp)?;
            loaded.1 += 1;
        }

        info!(
            cluster = %cluster,
            principal_identities = loaded.0,
            cluster_control_planes = loaded.1,
            "Loaded service account objects from NSX Manager"
        );
        Ok(loaded)
    }

    /// Bring a CR to its desired state.
    ///
    /// A realized CR whose Manager objects are missing from the stores is
    /// restored when the Manager supports it; everything else goes through
    /// [`create_or_update`](Self::create_or_update).
    ///
    /// # Errors
    ///
    /// Returns the error of the chosen path.
    pub async fn reconcile(&self, cr: &NsxServiceAccount) -> Result<NsxServiceAccountStatus> {
        let target = self.target(cr)?;
        if cr.is_realized()
            && !self.is_tracked(&target)
            && self.api.supports(Feature::ServiceAccountRestore).await?
        {
            return self.restore(cr).await;
        }
        self.create_or_update(cr).await
    }

    /// Realize a CR, or verify it is still realized.
    ///
    /// A realized CR whose stores, secret and VPC path agree is returned
    /// unchanged with no Manager writes. Otherwise the Manager objects and
    /// the secret are (re)created and the status is written. Failures are
    /// recorded in the status and returned.
    ///
    /// # Errors
    ///
    /// Returns an error if the Manager lacks service account support, the
    /// name is owned by another CR, or any write fails.
    pub async fn create_or_update(
        &self,
        cr: &NsxServiceAccount,
    ) -> Result<NsxServiceAccountStatus> {
        let target = self.target(cr)?;

        if cr.is_realized() && self.is_consistent(cr, &target).await? {
            debug!(name = %target.normalized, "Service account already realized");
            return Ok(cr.status.clone().unwrap_or_default());
        }

        self.realize_tracked(cr, &target).await
    }

    /// Repair a realized CR after the Manager lost some of its objects.
    ///
    /// A missing cluster control plane means a full realization. A missing
    /// principal identity is re-created with the certificate already in the
    /// secret, so workloads keep their credentials.
    ///
    /// # Errors
    ///
    /// Returns `FeatureNotSupported` if the Manager cannot restore,
    /// `OwnershipMismatch` if the Manager object belongs to another CR, or
    /// the error of a failed call.
    pub async fn restore(&self, cr: &NsxServiceAccount) -> Result<NsxServiceAccountStatus> {
        if !self.api.supports(Feature::ServiceAccountRestore).await? {
            return Err(ControlError::FeatureNotSupported(
                Feature::ServiceAccountRestore,
            ));
        }
        let target = self.target(cr)?;
        let name = target.normalized.as_str();

        let Some(ccp) = self.api.get_cluster_control_plane(name).await? else {
            info!(name = %name, "Cluster control plane missing on NSX Manager, realizing again");
            self.control_planes.delete(name);
            return self.realize_tracked(cr, &target).await;
        };
        check_owner(name, ccp.cr_uid(), &target.uid)?;
        self.control_planes.apply(ccp)?;

        let remote = self
            .api
            .list_principal_identities()
            .await?
            .into_iter()
            .find(|p| p.name == name);
        if let Some(pi) = remote {
            check_owner(name, pi.cr_uid(), &target.uid)?;
            self.principal_identities.apply(pi)?;
            return Ok(cr.status.clone().unwrap_or_default());
        }

        if let Some(stale) = self.principal_identities.get_by_name(name) {
            self.principal_identities.delete(&stale.id);
        }

        let secret = self
            .kube
            .get_secret(&target.sa.namespace, &target.sa.secret_name())
            .await?;
        let Some(secret) = secret else {
            info!(name = %name, "Principal identity and secret missing, realizing again");
            return self.realize_tracked(cr, &target).await;
        };

        let vpc_path = target.sa.vpc_path(&cr.vpc_name());
        let request = principal_identity_request(&target, &vpc_path, secret.cert_pem);
        let pi = self.api.create_principal_identity(&request).await?;
        info!(name = %name, id = %pi.id, "Re-created principal identity from secret");
        self.principal_identities.apply(pi)?;

        Ok(cr.status.clone().unwrap_or_default())
    }

    /// Remove the Manager objects of a CR.
    ///
    /// With a `uid`, objects tagged with another UID are left alone and an
    /// ownership error is returned before any Manager call. Objects that are
    /// already gone count as deleted.
    ///
    /// # Errors
    ///
    /// Returns `OwnershipMismatch` or the first failed Manager delete.
    pub async fn delete(&self, namespace: &str, name: &str, uid: Option<&str>) -> Result<()> {
        let sa = ServiceAccountRef::new(self.config.cluster_name.clone(), namespace, name);
        let normalized = sa.normalized_name();

        let pi = self.principal_identities.get_by_name(&normalized);
        let ccp = self.control_planes.get(&normalized);
        if let Some(uid) = uid {
            if let Some(pi) = &pi {
                check_owner(&normalized, pi.cr_uid(), uid)?;
            }
            if let Some(ccp) = &ccp {
                check_owner(&normalized, ccp.cr_uid(), uid)?;
            }
        }

        self.delete_objects(uid, ccp.into_iter().collect(), pi.into_iter().collect())
            .await
    }

    /// Remove every Manager object tagged with `uid`.
    ///
    /// # Errors
    ///
    /// Returns the first failed Manager delete.
    pub async fn delete_by_uid(&self, uid: &str) -> Result<()> {
        let control_planes = self.control_planes.by_uid(uid);
        let identities = self.principal_identities.by_uid(uid);
        self.delete_objects(Some(uid), control_planes, identities)
            .await
    }

    /// Reflect a failure into the CR's condition.
    ///
    /// A realized CR keeps its status; the failure is only logged.
    pub async fn record_failure(&self, cr: &NsxServiceAccount, err: &ControlError) {
        let namespace = cr.namespace().unwrap_or_default();
        let name = cr.name_any();

        if cr.is_realized() {
            warn!(
                namespace = %namespace,
                name = %name,
                error = %err,
                "Failure on realized service account, keeping status"
            );
            return;
        }

        let mut status = cr.status.clone().unwrap_or_default();
        status.set_condition(Condition::failed(
            err.reason(),
            err.to_string(),
            cr.metadata.generation,
        ));
        if let Err(e) = self.kube.patch_status(&namespace, &name, &status).await {
            warn!(
                namespace = %namespace,
                name = %name,
                error = %e,
                "Failed to record failure in status"
            );
        }
    }

    /// Check CA and certificate validity of a realized CR.
    ///
    /// The CA bundle is always synced. Unless `ca_only` is set, a
    /// certificate inside the rotation window is rotated when the CR enables
    /// rotation and the Manager supports it, and only logged otherwise.
    ///
    /// # Errors
    ///
    /// Returns an error if the secret cannot be read or written, or rotation
    /// fails.
    pub async fn validate(
        &self,
        cr: &NsxServiceAccount,
        ca_only: bool,
    ) -> Result<ValidationOutcome> {
        let target = self.target(cr)?;
        let mut outcome = ValidationOutcome::default();

        let secret = self
            .kube
            .get_secret(&target.sa.namespace, &target.sa.secret_name())
            .await?;
        let Some(secret) = secret else {
            warn!(name = %target.normalized, "Realized service account has no secret");
            return Ok(outcome);
        };

        let owner = target.owner();
        outcome.ca_updated = self.certificates.sync_ca(&secret, &owner).await?;
        if ca_only || !self.certificates.rotation_due(&secret.cert_pem)? {
            return Ok(outcome);
        }

        if !cr.spec.enable_cert_rotation
            || !self
                .api
                .supports(Feature::ServiceAccountCertRotation)
                .await?
        {
            warn!(
                name = %target.normalized,
                enabled = cr.spec.enable_cert_rotation,
                "Client certificate expires soon and will not be rotated"
            );
            outcome.rotation_skipped = true;
            return Ok(outcome);
        }

        let Some(pi) = self
            .principal_identities
            .get_by_name(&target.normalized)
            .filter(|p| p.cr_uid() == Some(target.uid.as_str()))
        else {
            warn!(name = %target.normalized, "No principal identity to rotate");
            return Ok(outcome);
        };

        self.certificates.rotate(&pi, &secret, &owner).await?;
        outcome.rotated = true;
        Ok(outcome)
    }

    /// UIDs of every CR with Manager objects in the stores.
    #[must_use]
    pub fn realized_uids(&self) -> HashSet<String> {
        let mut uids = self.principal_identities.cr_uids();
        uids.extend(self.control_planes.cr_uids());
        uids
    }

    /// Namespace and name of the CR owning objects tagged with `uid`.
    #[must_use]
    pub fn name_by_uid(&self, uid: &str) -> Option<(String, String)> {
        self.control_planes
            .by_uid(uid)
            .first()
            .and_then(owner_of)
            .or_else(|| {
                self.principal_identities
                    .by_uid(uid)
                    .first()
                    .and_then(owner_of)
            })
    }

    fn target(&self, cr: &NsxServiceAccount) -> Result<Target> {
        let namespace = cr
            .namespace()
            .ok_or(ControlError::MissingField("metadata.namespace"))?;
        let name = cr
            .metadata
            .name
            .clone()
            .ok_or(ControlError::MissingField("metadata.name"))?;
        let uid = cr.uid().ok_or(ControlError::MissingField("metadata.uid"))?;

        let sa = ServiceAccountRef::new(self.config.cluster_name.clone(), namespace, name);
        Ok(Target {
            normalized: sa.normalized_name(),
            sa,
            uid,
            generation: cr.metadata.generation,
        })
    }

    fn is_tracked(&self, target: &Target) -> bool {
        let owned = |uid: Option<&str>| uid == Some(target.uid.as_str());
        self.principal_identities
            .get_by_name(&target.normalized)
            .is_some_and(|p| owned(p.cr_uid()))
            && self
                .control_planes
                .get(&target.normalized)
                .is_some_and(|c| owned(c.cr_uid()))
    }

    async fn is_consistent(&self, cr: &NsxServiceAccount, target: &Target) -> Result<bool> {
        let desired_vpc = target.sa.vpc_path(&cr.vpc_name());
        let status_vpc = cr.status.as_ref().and_then(|s| s.vpc_path.as_deref());
        if status_vpc != Some(desired_vpc.as_str()) || !self.is_tracked(target) {
            return Ok(false);
        }

        let Some(ccp) = self.control_planes.get(&target.normalized) else {
            return Ok(false);
        };
        let secret = self
            .kube
            .get_secret(&target.sa.namespace, &target.sa.secret_name())
            .await?;
        Ok(secret.is_some_and(|s| ccp.certificate.as_deref() == Some(s.cert_pem.as_str())))
    }

    async fn realize_tracked(
        &self,
        cr: &NsxServiceAccount,
        target: &Target,
    ) -> Result<NsxServiceAccountStatus> {
        self.transition(&target.uid, RealizationState::of(cr), RealizationState::Realizing)?;

        match self.realize(cr, target).await {
            Ok(status) => {
                self.finish(&target.uid, RealizationState::Realized);
                info!(name = %target.normalized, "Service account realized");
                Ok(status)
            }
            Err(e) => {
                self.finish(&target.uid, RealizationState::Failed);
                warn!(name = %target.normalized, error = %e, "Service account realization failed");
                self.record_failure(cr, &e).await;
                Err(e)
            }
        }
    }

    async fn realize(
        &self,
        cr: &NsxServiceAccount,
        target: &Target,
    ) -> Result<NsxServiceAccountStatus> {
        if !self.api.supports(Feature::ServiceAccount).await? {
            return Err(ControlError::FeatureNotSupported(Feature::ServiceAccount));
        }

        let name = target.normalized.as_str();
        let vpc_path = target.sa.vpc_path(&cr.vpc_name());
        let existing = self.clear_stale(target).await?;

        let bundle = self.certificates.generate(name)?;

        let request = principal_identity_request(target, &vpc_path, bundle.cert_pem.clone());
        let pi = self.api.create_principal_identity(&request).await?;
        debug!(name = %name, id = %pi.id, "Created principal identity");
        self.principal_identities.apply(pi)?;

        let desired = ClusterControlPlane {
            id: name.to_string(),
            display_name: name.to_string(),
            node_id: existing
                .as_ref()
                .map_or_else(|| cluster_uuid(name).to_string(), |c| c.node_id.clone()),
            certificate: Some(bundle.cert_pem.clone()),
            vhc_path: vpc_path.clone(),
            revision: existing.and_then(|c| c.revision),
            tags: target.tags(),
        };
        let ccp = self.api.upsert_cluster_control_plane(&desired).await?;
        debug!(name = %name, node_id = %ccp.node_id, "Upserted cluster control plane");
        let cluster_id = ccp.node_id.clone();
        self.control_planes.apply(ccp)?;

        let secret_name = target.sa.secret_name();
        let secret = self
            .certificates
            .credential(&target.sa.namespace, &secret_name, bundle);
        self.kube.apply_secret(&secret, &target.owner()).await?;

        let mut status = cr.status.clone().unwrap_or_default();
        status.vpc_path = Some(vpc_path);
        status.nsx_managers = self.api.manager_hosts();
        self.refresh_proxy_endpoints(name, &mut status).await;
        status.cluster_id = Some(cluster_id);
        status.cluster_name = Some(target.sa.cluster.clone());
        status.secrets = vec![SecretRef {
            name: secret_name,
            namespace: target.sa.namespace.clone(),
        }];
        status.set_condition(Condition::realized(REALIZED_MESSAGE, target.generation));

        self.kube
            .patch_status(&target.sa.namespace, &target.sa.name, &status)
            .await?;
        Ok(status)
    }

    /// Update the proxy endpoints in `status` from the proxy services.
    ///
    /// A failed lookup or an empty result keeps the endpoints already in the
    /// status.
    async fn refresh_proxy_endpoints(&self, name: &str, status: &mut NsxServiceAccountStatus) {
        match self.kube.list_proxy_services().await {
            Ok(services) => {
                let discovered = proxy::discover(&services);
                if !discovered.is_empty() {
                    status.proxy_endpoints = Some(discovered);
                } else if status.proxy_endpoints.is_some() {
                    warn!(name = %name, "No proxy endpoints discovered, keeping previous ones");
                }
            }
            Err(e) => {
                warn!(name = %name, error = %e, "Proxy endpoint discovery failed, keeping previous ones");
            }
        }
    }

    /// Drop a partial realization left by an earlier attempt of the same CR.
    ///
    /// The principal identity is deleted so it can be created with a fresh
    /// certificate; the cluster control plane is returned so the upsert keeps
    /// its node ID and revision.
    async fn clear_stale(&self, target: &Target) -> Result<Option<ClusterControlPlane>> {
        let name = target.normalized.as_str();
        let pi = self.principal_identities.get_by_name(name);
        let ccp = self.control_planes.get(name);

        if let Some(pi) = &pi {
            check_owner(name, pi.cr_uid(), &target.uid)?;
        }
        if let Some(ccp) = &ccp {
            check_owner(name, ccp.cr_uid(), &target.uid)?;
        }

        if let Some(pi) = pi {
            info!(name = %name, id = %pi.id, "Removing stale principal identity");
            self.delete_principal_identity(&pi).await?;
        }
        Ok(ccp)
    }

    async fn delete_objects(
        &self,
        uid: Option<&str>,
        control_planes: Vec<ClusterControlPlane>,
        identities: Vec<PrincipalIdentity>,
    ) -> Result<()> {
        if let Some(uid) = uid {
            self.transition(uid, RealizationState::Unrealized, RealizationState::Deleting)?;
        }

        let result = self.delete_all(control_planes, identities).await;

        if let Some(uid) = uid {
            if result.is_ok() {
                self.states.write().remove(uid);
            } else {
                self.finish(uid, RealizationState::Failed);
            }
        }
        result
    }

    async fn delete_all(
        &self,
        control_planes: Vec<ClusterControlPlane>,
        identities: Vec<PrincipalIdentity>,
    ) -> Result<()> {
        for ccp in control_planes {
            ignore_not_found(self.api.delete_cluster_control_plane(&ccp.id).await)?;
            self.control_planes.delete(&ccp.id);
            info!(name = %ccp.id, "Deleted cluster control plane");
        }
        for pi in identities {
            self.delete_principal_identity(&pi).await?;
        }
        Ok(())
    }

    async fn delete_principal_identity(&self, pi: &PrincipalIdentity) -> Result<()> {
        ignore_not_found(self.api.delete_principal_identity(&pi.id).await)?;
        self.principal_identities.delete(&pi.id);
        info!(name = %pi.name, id = %pi.id, "Deleted principal identity");

        if let Some(cert_id) = &pi.certificate_id {
            if let Err(e) = ignore_not_found(self.api.delete_certificate(cert_id).await) {
                warn!(
                    name = %pi.name,
                    certificate = %cert_id,
                    error = %e,
                    "Failed to delete certificate"
                );
            }
        }
        Ok(())
    }

    /// Move a CR to `to`, seeding unknown CRs with `seed`.
    fn transition(&self, uid: &str, seed: RealizationState, to: RealizationState) -> Result<()> {
        let mut states = self.states.write();
        let from = states.get(uid).copied().unwrap_or(seed);
        let next = lifecycle::validate_transition(uid, from, to)?;
        states.insert(uid.to_string(), next);
        Ok(())
    }

    fn finish(&self, uid: &str, to: RealizationState) {
        if let Err(e) = self.transition(uid, RealizationState::Realizing, to) {
            warn!(uid = %uid, error = %e, "Unexpected realization state");
            self.states.write().insert(uid.to_string(), to);
        }
    }
}

fn principal_identity_request(
    target: &Target,
    vpc_path: &str,
    certificate_pem: String,
) -> PrincipalIdentityRequest {
    PrincipalIdentityRequest {
        name: target.normalized.clone(),
        node_id: target.normalized.clone(),
        is_protected: true,
        roles_for_paths: default_role_bindings(vpc_path),
        certificate_pem,
        tags: target.tags(),
    }
}

fn owner_of<T: Tagged>(tagged: &T) -> Option<(String, String)> {
    Some((
        tagged.namespace()?.to_string(),
        tagged.cr_name()?.to_string(),
    ))
}

fn check_owner(name: &str, found: Option<&str>, expected: &str) -> Result<()> {
    if found == Some(expected) {
        return Ok(());
    }
    Err(ControlError::OwnershipMismatch {
        name: name.to_string(),
        expected: expected.to_string(),
        found: found.unwrap_or_default().to_string(),
    })
}

fn ignore_not_found(result: nsx_sa_client::Result<()>) -> std::result::Result<(), ClientError> {
    match result {
        Err(e) if e.is_not_found() => Ok(()),
        other => other,
    }
}
