//! Manager-side objects owned by the trust-provisioning engine.
//!
//! Only the fields this engine reads or writes are modelled; unknown fields
//! returned by the Manager are ignored on deserialization.

use serde::{Deserialize, Serialize};

use crate::tags::{Tag, Tagged};

/// Role granted to every principal identity on the root path.
pub const READ_ONLY_ROLE: &str = "read_only_role";

/// Path the read-only role is bound to.
pub const READ_ONLY_PATH: &str = "/";

/// Role granted on the VPC path of the owning CR.
pub const VPC_ADMIN_ROLE: &str = "vpc_admin";

/// A single role name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    /// The role identifier.
    pub role: String,
}

/// A set of roles bound to one object path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RolesForPath {
    /// Object path the roles apply to.
    pub path: String,
    /// Roles granted on the path.
    pub roles: Vec<Role>,
}

impl RolesForPath {
    /// Bind a single role to a path.
    #[must_use]
    pub fn single(path: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            roles: vec![Role { role: role.into() }],
        }
    }
}

/// The two role bindings every principal identity receives.
#[must_use]
pub fn default_role_bindings(vpc_path: &str) -> Vec<RolesForPath> {
    vec![
        RolesForPath::single(READ_ONLY_PATH, READ_ONLY_ROLE),
        RolesForPath::single(vpc_path, VPC_ADMIN_ROLE),
    ]
}

/// A Manager principal identity: the credential-bearer bound to a certificate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrincipalIdentity {
    /// Manager-assigned identifier.
    pub id: String,
    /// Normalized name.
    pub name: String,
    /// Node identifier (the normalized name).
    #[serde(default)]
    pub node_id: String,
    /// Identifier of the certificate this identity authenticates with.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate_id: Option<String>,
    /// Protected identities can only be modified by themselves.
    #[serde(default)]
    pub is_protected: bool,
    /// Authorization role bindings.
    #[serde(default)]
    pub roles_for_paths: Vec<RolesForPath>,
    /// Ownership tags.
    #[serde(default)]
    pub tags: Vec<Tag>,
}

impl Tagged for PrincipalIdentity {
    fn tags(&self) -> &[Tag] {
        &self.tags
    }
}

/// Request body for creating a principal identity together with its certificate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrincipalIdentityRequest {
    /// Normalized name.
    pub name: String,
    /// Node identifier (the normalized name).
    pub node_id: String,
    /// Protected identities can only be modified by themselves.
    pub is_protected: bool,
    /// Authorization role bindings.
    pub roles_for_paths: Vec<RolesForPath>,
    /// PEM-encoded certificate the identity will authenticate with.
    pub certificate_pem: String,
    /// Ownership tags.
    pub tags: Vec<Tag>,
}

/// A Manager cluster control plane registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterControlPlane {
    /// Identifier (the normalized name).
    pub id: String,
    /// Display name.
    #[serde(default)]
    pub display_name: String,
    /// Node identifier reported back by the Manager.
    #[serde(default)]
    pub node_id: String,
    /// PEM-encoded certificate the control plane authenticates with.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate: Option<String>,
    /// VPC path the registration is scoped to.
    #[serde(default)]
    pub vhc_path: String,
    /// Optimistic concurrency revision.
    #[serde(rename = "_revision", default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<i64>,
    /// Ownership tags.
    #[serde(default)]
    pub tags: Vec<Tag>,
}

impl Tagged for ClusterControlPlane {
    fn tags(&self) -> &[Tag] {
        &self.tags
    }
}

/// A certificate imported into the Manager trust store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportedCertificate {
    /// Manager-assigned identifier.
    pub id: String,
    /// Display name.
    #[serde(default)]
    pub display_name: String,
    /// PEM-encoded certificate.
    #[serde(default)]
    pub pem_encoded: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tags::OwnerTags;

    #[test]
    fn role_bindings_cover_root_and_vpc() {
        let bindings = default_role_bindings("/orgs/default/projects/cl/vpcs/vpc1");
        assert_eq!(bindings.len(), 2);
        assert_eq!(bindings[0].path, "/");
        assert_eq!(bindings[0].roles[0].role, READ_ONLY_ROLE);
        assert_eq!(bindings[1].path, "/orgs/default/projects/cl/vpcs/vpc1");
        assert_eq!(bindings[1].roles[0].role, VPC_ADMIN_ROLE);
    }

    #[test]
    fn cluster_control_plane_wire_shape() {
        let ccp = ClusterControlPlane {
            id: "cl-ns1-name1".to_string(),
            display_name: "cl-ns1-name1".to_string(),
            node_id: "node".to_string(),
            certificate: None,
            vhc_path: "/vpc".to_string(),
            revision: Some(3),
            tags: OwnerTags::new("cl", "ns1", "name1", "uid").to_tags(),
        };

        let json = serde_json::to_value(&ccp).unwrap();
        assert_eq!(json["_revision"], 3);
        assert!(json.get("certificate").is_none());
        assert_eq!(ccp.cr_uid(), Some("uid"));
    }

    #[test]
    fn principal_identity_ignores_unknown_fields() {
        let json = r#"{
            "id": "pi-1",
            "name": "cl-ns1-name1",
            "node_id": "cl-ns1-name1",
            "certificate_id": "cert-1",
            "is_protected": true,
            "resource_type": "PrincipalIdentity",
            "_create_user": "admin"
        }"#;

        let pi: PrincipalIdentity = serde_json::from_str(json).unwrap();
        assert_eq!(pi.certificate_id.as_deref(), Some("cert-1"));
        assert!(pi.tags.is_empty());
        assert!(pi.cr_uid().is_none());
    }
}
