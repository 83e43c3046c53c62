//! Typed Manager API used by the provisioning engine.
//!
//! [`ManagerApi`] abstracts the few Manager object operations the engine
//! needs, allowing mock implementations in tests. [`HttpManagerApi`] issues
//! them through an [`EndpointPool`].

use std::sync::Arc;

use async_trait::async_trait;
use nsx_sa_core::{
    ClusterControlPlane, ImportedCertificate, PrincipalIdentity, PrincipalIdentityRequest,
};
use serde::{Deserialize, Serialize};

use crate::error::{ClientError, Result};
use crate::pool::EndpointPool;
use crate::request::ApiRequest;
use crate::version::Feature;

/// Principal identity collection.
pub const PRINCIPAL_IDENTITIES_PATH: &str = "/api/v1/trust-management/principal-identities";

/// Certificate collection.
pub const CERTIFICATES_PATH: &str = "/api/v1/trust-management/certificates";

/// Cluster control plane collection.
pub const CLUSTER_CONTROL_PLANES_PATH: &str =
    "/policy/api/v1/infra/sites/default/enforcement-points/default/cluster-control-planes";

/// Operations on Manager-side service account objects.
#[async_trait]
pub trait ManagerApi: Send + Sync {
    /// Whether the Manager supports `feature`.
    ///
    /// An unknown version that cannot be probed is an error, not `false`.
    async fn supports(&self, feature: Feature) -> Result<bool>;

    /// Manager addresses, for status reporting.
    fn manager_hosts(&self) -> Vec<String>;

    /// List every principal identity.
    ///
    /// # Errors
    ///
    /// Returns an error if the call fails.
    async fn list_principal_identities(&self) -> Result<Vec<PrincipalIdentity>>;

    /// Create a principal identity together with its certificate.
    ///
    /// # Errors
    ///
    /// Returns an error if the call fails; a duplicate name is a 4xx status.
    async fn create_principal_identity(
        &self,
        request: &PrincipalIdentityRequest,
    ) -> Result<PrincipalIdentity>;

    /// Rebind a principal identity to another imported certificate.
    ///
    /// # Errors
    ///
    /// Returns an error if the call fails.
    async fn update_principal_identity_certificate(
        &self,
        principal_identity_id: &str,
        certificate_id: &str,
    ) -> Result<PrincipalIdentity>;

    /// Delete a principal identity.
    ///
    /// # Errors
    ///
    /// Returns an error if the call fails; an absent object is a 404 status.
    async fn delete_principal_identity(&self, id: &str) -> Result<()>;

    /// Import a PEM certificate into the trust store.
    ///
    /// # Errors
    ///
    /// Returns an error if the call fails.
    async fn import_certificate(&self, display_name: &str, pem: &str)
        -> Result<ImportedCertificate>;

    /// Delete an imported certificate.
    ///
    /// # Errors
    ///
    /// Returns an error if the call fails; an absent object is a 404 status.
    async fn delete_certificate(&self, id: &str) -> Result<()>;

    /// List every cluster control plane.
    ///
    /// # Errors
    ///
    /// Returns an error if the call fails.
    async fn list_cluster_control_planes(&self) -> Result<Vec<ClusterControlPlane>>;

    /// Get one cluster control plane, `None` if absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the call fails for another reason.
    async fn get_cluster_control_plane(&self, id: &str) -> Result<Option<ClusterControlPlane>>;

    /// Create or replace a cluster control plane.
    ///
    /// # Errors
    ///
    /// Returns an error if the call fails.
    async fn upsert_cluster_control_plane(
        &self,
        ccp: &ClusterControlPlane,
    ) -> Result<ClusterControlPlane>;

    /// Delete a cluster control plane and its dependents.
    ///
    /// # Errors
    ///
    /// Returns an error if the call fails; an absent object is a 404 status.
    async fn delete_cluster_control_plane(&self, id: &str) -> Result<()>;
}

/// A page of a Manager list response.
#[derive(Debug, Deserialize)]
struct ListResult<T> {
    #[serde(default = "Vec::new")]
    results: Vec<T>,
    #[serde(default)]
    cursor: Option<String>,
}

#[derive(Debug, Serialize)]
struct ImportRequest<'a> {
    display_name: &'a str,
    pem_encoded: &'a str,
}

#[derive(Debug, Serialize)]
struct UpdateCertificateRequest<'a> {
    principal_identity_id: &'a str,
    certificate_id: &'a str,
}

/// [`ManagerApi`] over an [`EndpointPool`].
#[derive(Debug, Clone)]
pub struct HttpManagerApi {
    pool: Arc<EndpointPool>,
}

impl HttpManagerApi {
    /// Create a new API client over `pool`.
    #[must_use]
    pub fn new(pool: Arc<EndpointPool>) -> Self {
        Self { pool }
    }

    /// The underlying pool.
    #[must_use]
    pub fn pool(&self) -> &Arc<EndpointPool> {
        &self.pool
    }

    /// Fetch every page of a list endpoint.
    async fn list_all<T>(&self, path: &str) -> Result<Vec<T>>
    where
        T: for<'de> Deserialize<'de>,
    {
        let mut items = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let mut request = ApiRequest::get(path);
            if let Some(c) = &cursor {
                request = request.query("cursor", c.clone());
            }
            let page: ListResult<T> = self.pool.invoke(&request).await?.json()?;
            items.extend(page.results);
            match page.cursor.filter(|c| !c.is_empty()) {
                Some(next) if Some(&next) != cursor.as_ref() => cursor = Some(next),
                _ => break,
            }
        }
        Ok(items)
    }
}

#[async_trait]
impl ManagerApi for HttpManagerApi {
    async fn supports(&self, feature: Feature) -> Result<bool> {
        self.pool.check_version(feature).await
    }

    fn manager_hosts(&self) -> Vec<String> {
        self.pool.hosts()
    }

    async fn list_principal_identities(&self) -> Result<Vec<PrincipalIdentity>> {
        self.list_all(PRINCIPAL_IDENTITIES_PATH).await
    }

    async fn create_principal_identity(
        &self,
        request: &PrincipalIdentityRequest,
    ) -> Result<PrincipalIdentity> {
        let path = format!("{PRINCIPAL_IDENTITIES_PATH}/with-certificate");
        let pi: PrincipalIdentity = self
            .pool
            .invoke(&ApiRequest::post(path).json(request)?)
            .await?
            .json()?;
        tracing::debug!(name = %pi.name, id = %pi.id, "created principal identity");
        Ok(pi)
    }

    async fn update_principal_identity_certificate(
        &self,
        principal_identity_id: &str,
        certificate_id: &str,
    ) -> Result<PrincipalIdentity> {
        let request = ApiRequest::post(PRINCIPAL_IDENTITIES_PATH)
            .query("action", "update_certificate")
            .json(&UpdateCertificateRequest {
                principal_identity_id,
                certificate_id,
            })?;
        self.pool.invoke(&request).await?.json()
    }

    async fn delete_principal_identity(&self, id: &str) -> Result<()> {
        let path = format!("{PRINCIPAL_IDENTITIES_PATH}/{id}");
        self.pool.invoke(&ApiRequest::delete(path)).await?;
        Ok(())
    }

    async fn import_certificate(
        &self,
        display_name: &str,
        pem: &str,
    ) -> Result<ImportedCertificate> {
        let request = ApiRequest::post(CERTIFICATES_PATH)
            .query("action", "import")
            .json(&ImportRequest {
                display_name,
                pem_encoded: pem,
            })?;
        let imported: ListResult<ImportedCertificate> =
            self.pool.invoke(&request).await?.json()?;
        imported.results.into_iter().next().ok_or_else(|| {
            ClientError::InvalidResponse("certificate import returned no results".to_string())
        })
    }

    async fn delete_certificate(&self, id: &str) -> Result<()> {
        let path = format!("{CERTIFICATES_PATH}/{id}");
        self.pool.invoke(&ApiRequest::delete(path)).await?;
        Ok(())
    }

    async fn list_cluster_control_planes(&self) -> Result<Vec<ClusterControlPlane>> {
        self.list_all(CLUSTER_CONTROL_PLANES_PATH).await
    }

    async fn get_cluster_control_plane(&self, id: &str) -> Result<Option<ClusterControlPlane>> {
        let path = format!("{CLUSTER_CONTROL_PLANES_PATH}/{id}");
        match self.pool.invoke(&ApiRequest::get(path)).await {
            Ok(response) => response.json().map(Some),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn upsert_cluster_control_plane(
        &self,
        ccp: &ClusterControlPlane,
    ) -> Result<ClusterControlPlane> {
        let path = format!("{CLUSTER_CONTROL_PLANES_PATH}/{}", ccp.id);
        self.pool
            .invoke(&ApiRequest::put(path).json(ccp)?)
            .await?
            .json()
    }

    async fn delete_cluster_control_plane(&self, id: &str) -> Result<()> {
        let path = format!("{CLUSTER_CONTROL_PLANES_PATH}/{id}");
        self.pool
            .invoke(&ApiRequest::delete(path).query("cascade", "true"))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::Endpoint;
    use crate::ratelimit::RateLimiter;
    use crate::session::Credentials;
    use std::time::Duration;
    use wiremock::matchers::{body_partial_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn api(uri: &str) -> HttpManagerApi {
        let endpoint = Arc::new(Endpoint::new(
            uri,
            reqwest::Client::new(),
            Credentials::None,
            RateLimiter::unlimited(),
        ));
        HttpManagerApi::new(Arc::new(EndpointPool::from_endpoints(
            vec![endpoint],
            1,
            Duration::from_secs(30),
        )))
    }

    #[tokio::test]
    async fn list_follows_cursor() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(PRINCIPAL_IDENTITIES_PATH))
            .and(query_param("cursor", "page2"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"results":[{"id":"pi-2","name":"b"}],"result_count":2}"#,
            ))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(PRINCIPAL_IDENTITIES_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"results":[{"id":"pi-1","name":"a"}],"cursor":"page2","result_count":2}"#,
            ))
            .mount(&server)
            .await;

        let pis = api(&server.uri()).list_principal_identities().await.unwrap();
        let ids: Vec<_> = pis.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["pi-1", "pi-2"]);
    }

    #[tokio::test]
    async fn missing_cluster_control_plane_is_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(format!("{CLUSTER_CONTROL_PLANES_PATH}/cl-ns1-name1")))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let ccp = api(&server.uri())
            .get_cluster_control_plane("cl-ns1-name1")
            .await
            .unwrap();
        assert!(ccp.is_none());
    }

    #[tokio::test]
    async fn import_and_rebind_use_action_queries() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(CERTIFICATES_PATH))
            .and(query_param("action", "import"))
            .and(body_partial_json(serde_json::json!({"display_name": "cl-ns1-name1"})))
            .respond_with(ResponseTemplate::new(201).set_body_string(
                r#"{"results":[{"id":"cert-9","display_name":"cl-ns1-name1","pem_encoded":"PEM"}]}"#,
            ))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(PRINCIPAL_IDENTITIES_PATH))
            .and(query_param("action", "update_certificate"))
            .and(body_partial_json(
                serde_json::json!({"principal_identity_id": "pi-1", "certificate_id": "cert-9"}),
            ))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"id":"pi-1","name":"cl-ns1-name1","certificate_id":"cert-9"}"#,
            ))
            .expect(1)
            .mount(&server)
            .await;

        let api = api(&server.uri());
        let cert = api.import_certificate("cl-ns1-name1", "PEM").await.unwrap();
        assert_eq!(cert.id, "cert-9");

        let pi = api
            .update_principal_identity_certificate("pi-1", &cert.id)
            .await
            .unwrap();
        assert_eq!(pi.certificate_id.as_deref(), Some("cert-9"));
    }

    #[tokio::test]
    async fn delete_cluster_control_plane_cascades() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path(format!("{CLUSTER_CONTROL_PLANES_PATH}/cl-ns1-name1")))
            .and(query_param("cascade", "true"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        api(&server.uri())
            .delete_cluster_control_plane("cl-ns1-name1")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn delete_of_absent_object_reports_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let err = api(&server.uri())
            .delete_principal_identity("pi-1")
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }
}
