//! Kubernetes boundary of the provisioning engine.
//!
//! The engine reads and writes four kinds of Kubernetes state: credential
//! secrets, `NSXServiceAccount` CRs, their status subresource and the
//! Manager proxy services. [`KubeClient`] abstracts these so the engine can
//! be tested without a cluster.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Secret, Service};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use k8s_openapi::ByteString;
use kube::api::{Api, ListParams, ObjectMeta, Patch, PatchParams};
use kube::{Client, Resource};
use tracing::debug;

use crate::crd::{NsxServiceAccount, NsxServiceAccountStatus};
use crate::proxy::PROXY_SERVICE_LABEL;
use crate::Result;

/// Secret key holding the client certificate.
pub const TLS_CERT_KEY: &str = "tls.crt";

/// Secret key holding the private key.
pub const TLS_KEY_KEY: &str = "tls.key";

/// Secret key holding the Manager CA bundle.
pub const CA_CERT_KEY: &str = "ca.crt";

/// Field manager used for server-side apply.
pub const FIELD_MANAGER: &str = "nsx-sa-operator";

/// Credential material for one CR, as stored in its secret.
#[derive(Clone, PartialEq, Eq)]
pub struct CredentialSecret {
    /// Namespace of the secret and its CR.
    pub namespace: String,
    /// Secret name.
    pub name: String,
    /// Client certificate, stored as `tls.crt`.
    pub cert_pem: String,
    /// Private key, stored as `tls.key`.
    pub key_pem: String,
    /// Manager CA bundle, stored as `ca.crt`.
    pub ca_pem: Option<String>,
}

impl std::fmt::Debug for CredentialSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialSecret")
            .field("namespace", &self.namespace)
            .field("name", &self.name)
            .field("has_ca", &self.ca_pem.is_some())
            .finish_non_exhaustive()
    }
}

/// The CR a secret belongs to; becomes the secret's controller reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretOwner {
    /// CR name.
    pub name: String,
    /// CR UID.
    pub uid: String,
}

impl CredentialSecret {
    fn from_secret(secret: &Secret) -> Option<Self> {
        let data = secret.data.as_ref()?;
        let read = |key: &str| {
            data.get(key)
                .and_then(|b| String::from_utf8(b.0.clone()).ok())
        };
        Some(Self {
            namespace: secret.metadata.namespace.clone().unwrap_or_default(),
            name: secret.metadata.name.clone().unwrap_or_default(),
            cert_pem: read(TLS_CERT_KEY)?,
            key_pem: read(TLS_KEY_KEY)?,
            ca_pem: read(CA_CERT_KEY),
        })
    }

    fn to_secret(&self, owner: &SecretOwner) -> Secret {
        let mut data = BTreeMap::new();
        data.insert(
            TLS_CERT_KEY.to_string(),
            ByteString(self.cert_pem.clone().into_bytes()),
        );
        data.insert(
            TLS_KEY_KEY.to_string(),
            ByteString(self.key_pem.clone().into_bytes()),
        );
        if let Some(ca) = &self.ca_pem {
            data.insert(CA_CERT_KEY.to_string(), ByteString(ca.clone().into_bytes()));
        }

        Secret {
            metadata: ObjectMeta {
                name: Some(self.name.clone()),
                namespace: Some(self.namespace.clone()),
                owner_references: Some(vec![OwnerReference {
                    api_version: NsxServiceAccount::api_version(&()).to_string(),
                    kind: NsxServiceAccount::kind(&()).to_string(),
                    name: owner.name.clone(),
                    uid: owner.uid.clone(),
                    controller: Some(true),
                    block_owner_deletion: Some(true),
                }]),
                ..ObjectMeta::default()
            },
            type_: Some("kubernetes.io/tls".to_string()),
            data: Some(data),
            ..Secret::default()
        }
    }
}

/// Kubernetes operations used by the engine.
#[async_trait]
pub trait KubeClient: Send + Sync {
    /// Read a credential secret. Returns `None` when it is absent or lacks
    /// the key and certificate.
    ///
    /// # Errors
    ///
    /// Returns an error if the API call fails.
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<CredentialSecret>>;

    /// Create or replace a credential secret owned by `owner`.
    ///
    /// # Errors
    ///
    /// Returns an error if the API call fails.
    async fn apply_secret(&self, secret: &CredentialSecret, owner: &SecretOwner) -> Result<()>;

    /// List every `NSXServiceAccount` in the cluster.
    ///
    /// # Errors
    ///
    /// Returns an error if the API call fails.
    async fn list_service_accounts(&self) -> Result<Vec<NsxServiceAccount>>;

    /// Replace the status of a CR.
    ///
    /// # Errors
    ///
    /// Returns an error if the API call fails.
    async fn patch_status(
        &self,
        namespace: &str,
        name: &str,
        status: &NsxServiceAccountStatus,
    ) -> Result<()>;

    /// List services labelled as the Manager proxy.
    ///
    /// # Errors
    ///
    /// Returns an error if the API call fails.
    async fn list_proxy_services(&self) -> Result<Vec<Service>>;
}

/// [`KubeClient`] backed by the Kubernetes API.
#[derive(Clone)]
pub struct KubeApiClient {
    client: Client,
}

impl KubeApiClient {
    /// Wrap a Kubernetes client.
    #[must_use]
    pub const fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl KubeClient for KubeApiClient {
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<CredentialSecret>> {
        let secrets: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        Ok(secrets
            .get_opt(name)
            .await?
            .as_ref()
            .and_then(CredentialSecret::from_secret))
    }

    async fn apply_secret(&self, secret: &CredentialSecret, owner: &SecretOwner) -> Result<()> {
        let secrets: Api<Secret> = Api::namespaced(self.client.clone(), &secret.namespace);
        let params = PatchParams::apply(FIELD_MANAGER).force();
        secrets
            .patch(&secret.name, &params, &Patch::Apply(&secret.to_secret(owner)))
            .await?;
        debug!(namespace = %secret.namespace, name = %secret.name, "Applied credential secret");
        Ok(())
    }

    async fn list_service_accounts(&self) -> Result<Vec<NsxServiceAccount>> {
        let crs: Api<NsxServiceAccount> = Api::all(self.client.clone());
        Ok(crs.list(&ListParams::default()).await?.items)
    }

    async fn patch_status(
        &self,
        namespace: &str,
        name: &str,
        status: &NsxServiceAccountStatus,
    ) -> Result<()> {
        let crs: Api<NsxServiceAccount> = Api::namespaced(self.client.clone(), namespace);
        let patch = serde_json::json!({ "status": status });
        crs.patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn list_proxy_services(&self) -> Result<Vec<Service>> {
        let services: Api<Service> = Api::all(self.client.clone());
        let params = ListParams::default().labels(PROXY_SERVICE_LABEL);
        Ok(services.list(&params).await?.items)
    }
}

/// In-memory Kubernetes for tests.
#[cfg(any(test, feature = "test-utils"))]
pub mod mock {
    use std::collections::{BTreeMap, HashSet};
    use std::sync::Arc;

    use kube::ResourceExt;
    use nsx_sa_client::Journal;
    use parking_lot::Mutex;

    use super::{
        async_trait, CredentialSecret, KubeClient, NsxServiceAccount, NsxServiceAccountStatus,
        Result, SecretOwner, Service,
    };

    #[derive(Default)]
    struct MockState {
        secrets: BTreeMap<String, (CredentialSecret, SecretOwner)>,
        service_accounts: BTreeMap<String, NsxServiceAccount>,
        statuses: BTreeMap<String, NsxServiceAccountStatus>,
        proxy_services: Vec<Service>,
        failing: HashSet<String>,
    }

    /// A Kubernetes API held in memory. Calls are recorded as `kube.{op}`
    /// entries so they can share a journal with the Manager mock.
    #[derive(Default)]
    pub struct MockKubeClient {
        state: Mutex<MockState>,
        journal: Journal,
    }

    fn key(namespace: &str, name: &str) -> String {
        format!("{namespace}/{name}")
    }

    impl MockKubeClient {
        /// Create an empty mock.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Create a mock recording into an existing journal.
        #[must_use]
        pub fn with_journal(journal: Journal) -> Self {
            Self {
                state: Mutex::default(),
                journal,
            }
        }

        /// Recorded calls, in order.
        #[must_use]
        pub fn calls(&self) -> Vec<String> {
            self.journal.lock().clone()
        }

        /// Add or replace a CR.
        pub fn insert_service_account(&self, cr: NsxServiceAccount) {
            let k = key(&cr.namespace().unwrap_or_default(), &cr.name_any());
            self.state.lock().service_accounts.insert(k, cr);
        }

        /// Remove a CR.
        pub fn remove_service_account(&self, namespace: &str, name: &str) {
            self.state
                .lock()
                .service_accounts
                .remove(&key(namespace, name));
        }

        /// Add or replace a secret.
        pub fn insert_secret(&self, secret: CredentialSecret, owner: SecretOwner) {
            let k = key(&secret.namespace, &secret.name);
            self.state.lock().secrets.insert(k, (secret, owner));
        }

        /// The stored secret.
        #[must_use]
        pub fn secret(&self, namespace: &str, name: &str) -> Option<CredentialSecret> {
            self.state
                .lock()
                .secrets
                .get(&key(namespace, name))
                .map(|(s, _)| s.clone())
        }

        /// The owner recorded for a secret.
        #[must_use]
        pub fn secret_owner(&self, namespace: &str, name: &str) -> Option<SecretOwner> {
            self.state
                .lock()
                .secrets
                .get(&key(namespace, name))
                .map(|(_, o)| o.clone())
        }

        /// The last status patched for a CR.
        #[must_use]
        pub fn status(&self, namespace: &str, name: &str) -> Option<NsxServiceAccountStatus> {
            self.state
                .lock()
                .statuses
                .get(&key(namespace, name))
                .cloned()
        }

        /// Replace the proxy services.
        pub fn set_proxy_services(&self, services: Vec<Service>) {
            self.state.lock().proxy_services = services;
        }

        /// Fail every call of `op` with a 500 until cleared.
        pub fn fail(&self, op: &str) {
            self.state.lock().failing.insert(op.to_string());
        }

        /// Remove injected failures.
        pub fn clear_failures(&self) {
            self.state.lock().failing.clear();
        }

        fn record(&self, op: &str, target: Option<String>) -> Result<()> {
            let entry = match target {
                Some(t) => format!("kube.{op}:{t}"),
                None => format!("kube.{op}"),
            };
            self.journal.lock().push(entry);

            if self.state.lock().failing.contains(op) {
                return Err(kube::Error::Api(kube::error::ErrorResponse {
                    status: "Failure".to_string(),
                    message: format!("injected failure for {op}"),
                    reason: "InternalError".to_string(),
                    code: 500,
                })
                .into());
            }
            Ok(())
        }
    }

    #[async_trait]
    impl KubeClient for MockKubeClient {
        async fn get_secret(
            &self,
            namespace: &str,
            name: &str,
        ) -> Result<Option<CredentialSecret>> {
            self.record("get_secret", Some(key(namespace, name)))?;
            Ok(self.secret(namespace, name))
        }

        async fn apply_secret(
            &self,
            secret: &CredentialSecret,
            owner: &SecretOwner,
        ) -> Result<()> {
            self.record("apply_secret", Some(key(&secret.namespace, &secret.name)))?;
            self.insert_secret(secret.clone(), owner.clone());
            Ok(())
        }

        async fn list_service_accounts(&self) -> Result<Vec<NsxServiceAccount>> {
            self.record("list_service_accounts", None)?;
            Ok(self
                .state
                .lock()
                .service_accounts
                .values()
                .cloned()
                .collect())
        }

        async fn patch_status(
            &self,
            namespace: &str,
            name: &str,
            status: &NsxServiceAccountStatus,
        ) -> Result<()> {
            let k = key(namespace, name);
            self.record("patch_status", Some(k.clone()))?;
            let mut state = self.state.lock();
            if let Some(cr) = state.service_accounts.get_mut(&k) {
                cr.status = Some(status.clone());
            }
            state.statuses.insert(k, status.clone());
            Ok(())
        }

        async fn list_proxy_services(&self) -> Result<Vec<Service>> {
            self.record("list_proxy_services", None)?;
            Ok(self.state.lock().proxy_services.clone())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mock::MockKubeClient;
    use super::*;

    fn credential() -> CredentialSecret {
        CredentialSecret {
            namespace: "ns1".into(),
            name: "name1-nsx-cert".into(),
            cert_pem: "CERT".into(),
            key_pem: "KEY".into(),
            ca_pem: Some("CA".into()),
        }
    }

    #[test]
    fn secret_round_trips_through_kubernetes_type() {
        let owner = SecretOwner {
            name: "name1".into(),
            uid: "uid-1".into(),
        };
        let secret = credential().to_secret(&owner);

        let refs = secret.metadata.owner_references.clone().unwrap();
        assert_eq!(refs[0].kind, "NSXServiceAccount");
        assert_eq!(refs[0].api_version, "nsx.vmware.com/v1alpha1");
        assert_eq!(refs[0].controller, Some(true));

        assert_eq!(CredentialSecret::from_secret(&secret), Some(credential()));
    }

    #[test]
    fn secret_without_key_is_ignored() {
        let mut secret = credential().to_secret(&SecretOwner {
            name: "n".into(),
            uid: "u".into(),
        });
        secret.data.as_mut().unwrap().remove(TLS_KEY_KEY);
        assert!(CredentialSecret::from_secret(&secret).is_none());
    }

    #[test]
    fn debug_hides_key_material() {
        assert!(!format!("{:?}", credential()).contains("KEY"));
    }

    #[tokio::test]
    async fn mock_records_with_prefix() {
        let kube = MockKubeClient::new();
        let owner = SecretOwner {
            name: "name1".into(),
            uid: "uid-1".into(),
        };
        kube.apply_secret(&credential(), &owner).await.unwrap();
        assert!(kube.get_secret("ns1", "name1-nsx-cert").await.unwrap().is_some());

        kube.fail("list_proxy_services");
        let err = kube.list_proxy_services().await.unwrap_err();
        assert!(err.is_retriable());

        let calls = kube.calls();
        assert_eq!(calls[0], "kube.apply_secret:ns1/name1-nsx-cert");
        assert!(calls.iter().all(|c| c.starts_with("kube.")));
    }
}
