//! Normalized Manager-side names and cluster identifiers.
//!
//! Every Manager object owned by an `NSXServiceAccount` is keyed by a name
//! derived from `{cluster}-{namespace}-{name}`. The Manager bounds identifier
//! length, so long names are truncated and suffixed with a hash of the full
//! input.

use std::fmt;

/// Maximum length of a Manager object identifier.
pub const MAX_ID_LENGTH: usize = 255;

/// Number of hex characters of the name hash appended to truncated names.
pub const HASH_LENGTH: usize = 8;

/// Suffix appended to the CR name to build the credential secret name.
pub const SECRET_SUFFIX: &str = "-nsx-cert";

/// Normalize a name to fit the Manager identifier length limit.
///
/// Names within the limit are returned unchanged. Longer names keep a prefix
/// and gain a `-{hash}` suffix computed over the *whole* input, so two inputs
/// that only differ after the truncation point still map to different names.
#[must_use]
pub fn normalize_name(name: &str) -> String {
    if name.len() <= MAX_ID_LENGTH {
        return name.to_string();
    }

    let hash = hex::encode(blake3::hash(name.as_bytes()).as_bytes());
    let mut end = MAX_ID_LENGTH - HASH_LENGTH - 1;
    while !name.is_char_boundary(end) {
        end -= 1;
    }

    format!("{}-{}", &name[..end], &hash[..HASH_LENGTH])
}

/// Derive a stable cluster UUID from a normalized name.
///
/// The same name always yields the same UUID, which lets a restored
/// registration keep its node identifier.
#[must_use]
pub fn cluster_uuid(normalized_name: &str) -> uuid::Uuid {
    uuid::Uuid::new_v5(&uuid::Uuid::NAMESPACE_DNS, normalized_name.as_bytes())
}

/// Identifies one `NSXServiceAccount` within one Kubernetes cluster.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ServiceAccountRef {
    /// Name of the Kubernetes cluster (the Manager-side project).
    pub cluster: String,
    /// Namespace of the CR.
    pub namespace: String,
    /// Name of the CR.
    pub name: String,
}

impl ServiceAccountRef {
    /// Create a new reference.
    #[must_use]
    pub fn new(
        cluster: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            cluster: cluster.into(),
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// The normalized Manager-side name shared by the principal identity and
    /// the cluster control plane.
    #[must_use]
    pub fn normalized_name(&self) -> String {
        normalize_name(&format!("{}-{}-{}", self.cluster, self.namespace, self.name))
    }

    /// The name of the Kubernetes secret holding the credential material.
    #[must_use]
    pub fn secret_name(&self) -> String {
        format!("{}{SECRET_SUFFIX}", self.name)
    }

    /// The VPC name used when the CR does not name one.
    #[must_use]
    pub fn default_vpc_name(&self) -> String {
        format!("{}-default-vpc", self.namespace)
    }

    /// The Manager path of a VPC in this cluster's project.
    #[must_use]
    pub fn vpc_path(&self, vpc_name: &str) -> String {
        format!("/orgs/default/projects/{}/vpcs/{vpc_name}", self.cluster)
    }
}

impl fmt::Debug for ServiceAccountRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ServiceAccountRef({}/{})", self.namespace, self.name)
    }
}

impl fmt::Display for ServiceAccountRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}
