//! In-memory [`ManagerApi`] for tests.
//!
//! The mock keeps principal identities, cluster control planes and imported
//! certificates in maps, records every call into a [`Journal`] and can be told
//! to fail selected operations. Feature checks are not recorded but fail
//! like any other operation under the name `supports`.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use nsx_sa_core::{
    ClusterControlPlane, ImportedCertificate, PrincipalIdentity, PrincipalIdentityRequest,
};
use parking_lot::Mutex;

use crate::api::ManagerApi;
use crate::error::{ClientError, Result};
use crate::version::{Feature, FeatureSet};

/// Shared, ordered record of calls. Entries are `op` or `op:key`.
pub type Journal = Arc<Mutex<Vec<String>>>;

/// Operations that only read Manager state.
const READ_OPS: [&str; 3] = ["list_pi", "list_ccp", "get_ccp"];

#[derive(Debug, Clone)]
struct Failure {
    op: String,
    key: Option<String>,
    status: u16,
    once: bool,
}

#[derive(Debug, Default)]
struct MockState {
    principal_identities: BTreeMap<String, PrincipalIdentity>,
    cluster_control_planes: BTreeMap<String, ClusterControlPlane>,
    certificates: BTreeMap<String, ImportedCertificate>,
    failures: Vec<Failure>,
    next_id: u64,
}

impl MockState {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}-{}", self.next_id)
    }
}

/// A Manager held in memory.
#[derive(Debug)]
pub struct MockManagerApi {
    state: Mutex<MockState>,
    features: Mutex<FeatureSet>,
    journal: Journal,
}

impl Default for MockManagerApi {
    fn default() -> Self {
        Self::new()
    }
}

impl MockManagerApi {
    /// Create a mock supporting every feature.
    #[must_use]
    pub fn new() -> Self {
        Self::with_journal(Arc::default())
    }

    /// Create a mock recording into an existing journal.
    #[must_use]
    pub fn with_journal(journal: Journal) -> Self {
        Self {
            state: Mutex::new(MockState::default()),
            features: Mutex::new(FeatureSet::all()),
            journal,
        }
    }

    /// The journal calls are recorded into.
    #[must_use]
    pub fn journal(&self) -> Journal {
        Arc::clone(&self.journal)
    }

    /// Every recorded call, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        self.journal.lock().clone()
    }

    /// Recorded Manager calls that change Manager state.
    ///
    /// Entries prefixed `kube.` come from a Kubernetes mock sharing the
    /// journal and are skipped.
    #[must_use]
    pub fn mutations(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| {
                let op = c.split(':').next().unwrap_or_default();
                !READ_OPS.contains(&op) && !c.starts_with("kube.")
            })
            .collect()
    }

    /// Forget recorded calls.
    pub fn clear_calls(&self) {
        self.journal.lock().clear();
    }

    /// Replace the supported feature set.
    pub fn set_features(&self, features: FeatureSet) {
        *self.features.lock() = features;
    }

    /// Fail every call of `op` with `status` until cleared.
    pub fn fail(&self, op: &str, status: u16) {
        self.push_failure(op, None, status, false);
    }

    /// Fail the next call of `op` with `status`.
    pub fn fail_once(&self, op: &str, status: u16) {
        self.push_failure(op, None, status, true);
    }

    /// Fail every call of `op` on `key` with `status` until cleared.
    pub fn fail_for(&self, op: &str, key: &str, status: u16) {
        self.push_failure(op, Some(key.to_string()), status, false);
    }

    /// Remove all injected failures.
    pub fn clear_failures(&self) {
        self.state.lock().failures.clear();
    }

    fn push_failure(&self, op: &str, key: Option<String>, status: u16, once: bool) {
        self.state.lock().failures.push(Failure {
            op: op.to_string(),
            key,
            status,
            once,
        });
    }

    /// Seed a principal identity.
    pub fn insert_principal_identity(&self, pi: PrincipalIdentity) {
        self.state
            .lock()
            .principal_identities
            .insert(pi.id.clone(), pi);
    }

    /// Seed a cluster control plane.
    pub fn insert_cluster_control_plane(&self, ccp: ClusterControlPlane) {
        self.state
            .lock()
            .cluster_control_planes
            .insert(ccp.id.clone(), ccp);
    }

    /// Seed an imported certificate.
    pub fn insert_certificate(&self, cert: ImportedCertificate) {
        self.state.lock().certificates.insert(cert.id.clone(), cert);
    }

    /// Remove a cluster control plane without recording a call.
    pub fn remove_cluster_control_plane(&self, id: &str) -> Option<ClusterControlPlane> {
        self.state.lock().cluster_control_planes.remove(id)
    }

    /// Remove a principal identity without recording a call.
    pub fn remove_principal_identity(&self, id: &str) -> Option<PrincipalIdentity> {
        self.state.lock().principal_identities.remove(id)
    }

    /// Snapshot of principal identities.
    #[must_use]
    pub fn principal_identities(&self) -> Vec<PrincipalIdentity> {
        self.state
            .lock()
            .principal_identities
            .values()
            .cloned()
            .collect()
    }

    /// Snapshot of cluster control planes.
    #[must_use]
    pub fn cluster_control_planes(&self) -> Vec<ClusterControlPlane> {
        self.state
            .lock()
            .cluster_control_planes
            .values()
            .cloned()
            .collect()
    }

    /// Snapshot of imported certificates.
    #[must_use]
    pub fn certificates(&self) -> Vec<ImportedCertificate> {
        self.state.lock().certificates.values().cloned().collect()
    }

    /// Record a call and apply any injected failure.
    fn record(&self, op: &str, key: Option<&str>) -> Result<()> {
        let entry = match key {
            Some(k) => format!("{op}:{k}"),
            None => op.to_string(),
        };
        self.journal.lock().push(entry);
        self.check_failure(op, key)
    }

    /// Apply any injected failure without recording a call.
    fn check_failure(&self, op: &str, key: Option<&str>) -> Result<()> {
        let mut state = self.state.lock();
        let hit = state.failures.iter().position(|f| {
            f.op == op && f.key.as_deref().map_or(true, |k| Some(k) == key)
        });
        if let Some(index) = hit {
            let failure = state.failures[index].clone();
            if failure.once {
                state.failures.remove(index);
            }
            return Err(ClientError::Status {
                status: failure.status,
                message: format!("injected failure for {op}"),
            });
        }
        Ok(())
    }
}

fn not_found(kind: &str, id: &str) -> ClientError {
    ClientError::Status {
        status: 404,
        message: format!("{kind} {id} not found"),
    }
}

#[async_trait]
impl ManagerApi for MockManagerApi {
    async fn supports(&self, feature: Feature) -> Result<bool> {
        self.check_failure("supports", None)?;
        Ok(self.features.lock().supports(feature))
    }

    fn manager_hosts(&self) -> Vec<String> {
        vec!["mock-manager:443".to_string()]
    }

    async fn list_principal_identities(&self) -> Result<Vec<PrincipalIdentity>> {
        self.record("list_pi", None)?;
        Ok(self.principal_identities())
    }

    async fn create_principal_identity(
        &self,
        request: &PrincipalIdentityRequest,
    ) -> Result<PrincipalIdentity> {
        self.record("create_pi", Some(&request.name))?;
        let mut state = self.state.lock();
        if state
            .principal_identities
            .values()
            .any(|p| p.name == request.name)
        {
            return Err(ClientError::Status {
                status: 409,
                message: format!("principal identity {} already exists", request.name),
            });
        }

        let cert_id = state.next_id("cert");
        state.certificates.insert(
            cert_id.clone(),
            ImportedCertificate {
                id: cert_id.clone(),
                display_name: request.name.clone(),
                pem_encoded: request.certificate_pem.clone(),
            },
        );

        let pi = PrincipalIdentity {
            id: state.next_id("pi"),
            name: request.name.clone(),
            node_id: request.node_id.clone(),
            certificate_id: Some(cert_id),
            is_protected: request.is_protected,
            roles_for_paths: request.roles_for_paths.clone(),
            tags: request.tags.clone(),
        };
        state.principal_identities.insert(pi.id.clone(), pi.clone());
        Ok(pi)
    }

    async fn update_principal_identity_certificate(
        &self,
        principal_identity_id: &str,
        certificate_id: &str,
    ) -> Result<PrincipalIdentity> {
        self.record(
            "update_pi_cert",
            Some(&format!("{principal_identity_id}:{certificate_id}")),
        )?;
        let mut state = self.state.lock();
        if !state.certificates.contains_key(certificate_id) {
            return Err(not_found("certificate", certificate_id));
        }
        let pi = state
            .principal_identities
            .get_mut(principal_identity_id)
            .ok_or_else(|| not_found("principal identity", principal_identity_id))?;
        pi.certificate_id = Some(certificate_id.to_string());
        Ok(pi.clone())
    }

    async fn delete_principal_identity(&self, id: &str) -> Result<()> {
        self.record("delete_pi", Some(id))?;
        self.state
            .lock()
            .principal_identities
            .remove(id)
            .map(drop)
            .ok_or_else(|| not_found("principal identity", id))
    }

    async fn import_certificate(
        &self,
        display_name: &str,
        pem: &str,
    ) -> Result<ImportedCertificate> {
        self.record("import_cert", Some(display_name))?;
        let mut state = self.state.lock();
        let cert = ImportedCertificate {
            id: state.next_id("cert"),
            display_name: display_name.to_string(),
            pem_encoded: pem.to_string(),
        };
        state.certificates.insert(cert.id.clone(), cert.clone());
        Ok(cert)
    }

    async fn delete_certificate(&self, id: &str) -> Result<()> {
        self.record("delete_cert", Some(id))?;
        self.state
            .lock()
            .certificates
            .remove(id)
            .map(drop)
            .ok_or_else(|| not_found("certificate", id))
    }

    async fn list_cluster_control_planes(&self) -> Result<Vec<ClusterControlPlane>> {
        self.record("list_ccp", None)?;
        Ok(self.cluster_control_planes())
    }

    async fn get_cluster_control_plane(&self, id: &str) -> Result<Option<ClusterControlPlane>> {
        self.record("get_ccp", Some(id))?;
        Ok(self.state.lock().cluster_control_planes.get(id).cloned())
    }

    async fn upsert_cluster_control_plane(
        &self,
        ccp: &ClusterControlPlane,
    ) -> Result<ClusterControlPlane> {
        self.record("upsert_ccp", Some(&ccp.id))?;
        let mut state = self.state.lock();
        let mut stored = ccp.clone();
        let revision = state
            .cluster_control_planes
            .get(&ccp.id)
            .and_then(|existing| existing.revision)
            .map_or(0, |r| r + 1);
        if stored.node_id.is_empty() {
            stored.node_id = nsx_sa_core::cluster_uuid(&ccp.id).to_string();
        }
        stored.revision = Some(revision);
        state
            .cluster_control_planes
            .insert(stored.id.clone(), stored.clone());
        Ok(stored)
    }

    async fn delete_cluster_control_plane(&self, id: &str) -> Result<()> {
        self.record("delete_ccp", Some(id))?;
        self.state
            .lock()
            .cluster_control_planes
            .remove(id)
            .map(drop)
            .ok_or_else(|| not_found("cluster control plane", id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nsx_sa_core::OwnerTags;

    fn request(name: &str) -> PrincipalIdentityRequest {
        PrincipalIdentityRequest {
            name: name.to_string(),
            node_id: name.to_string(),
            is_protected: true,
            roles_for_paths: vec![],
            certificate_pem: "PEM".to_string(),
            tags: OwnerTags::new("cl", "ns1", "name1", "uid").to_tags(),
        }
    }

    #[tokio::test]
    async fn create_attaches_certificate_and_rejects_duplicates() {
        let mock = MockManagerApi::new();
        let pi = mock.create_principal_identity(&request("a")).await.unwrap();

        let cert_id = pi.certificate_id.clone().unwrap();
        assert!(mock.certificates().iter().any(|c| c.id == cert_id));

        let err = mock
            .create_principal_identity(&request("a"))
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(409));
    }

    #[tokio::test]
    async fn injected_failures() {
        let mock = MockManagerApi::new();
        mock.fail_once("list_pi", 503);
        assert!(mock.list_principal_identities().await.is_err());
        assert!(mock.list_principal_identities().await.is_ok());

        mock.fail_for("delete_ccp", "b", 500);
        assert_eq!(
            mock.delete_cluster_control_plane("b")
                .await
                .unwrap_err()
                .status(),
            Some(500)
        );
        assert!(mock
            .delete_cluster_control_plane("c")
            .await
            .unwrap_err()
            .is_not_found());
    }

    #[tokio::test]
    async fn mutations_exclude_reads() {
        let mock = MockManagerApi::new();
        mock.list_principal_identities().await.unwrap();
        mock.get_cluster_control_plane("x").await.unwrap();
        mock.import_certificate("x", "PEM").await.unwrap();

        assert_eq!(mock.calls().len(), 3);
        assert_eq!(mock.mutations(), vec!["import_cert:x".to_string()]);
    }
}
