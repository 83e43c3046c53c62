//! Ownership tags written onto Manager objects.
//!
//! Every principal identity and cluster control plane created by this engine
//! carries four tags recording the cluster, namespace, CR name and CR UID that
//! own it. The UID tag is the sole authority for ownership decisions.

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// Tag scope recording the Kubernetes cluster name.
pub const SCOPE_CLUSTER: &str = "nsx-op/cluster";
/// Tag scope recording the CR namespace.
pub const SCOPE_NAMESPACE: &str = "nsx-op/namespace";
/// Tag scope recording the CR name.
pub const SCOPE_CR_NAME: &str = "nsx-op/nsx_service_account_name";
/// Tag scope recording the CR UID.
pub const SCOPE_CR_UID: &str = "nsx-op/nsx_service_account_uid";

/// A Manager key/value tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tag {
    /// Tag scope (the key).
    #[serde(default)]
    pub scope: String,
    /// Tag value.
    #[serde(default)]
    pub tag: String,
}

impl Tag {
    /// Create a new tag.
    #[must_use]
    pub fn new(scope: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
            tag: tag.into(),
        }
    }
}

/// Find the value of the first tag with the given scope.
#[must_use]
pub fn find_tag<'a>(tags: &'a [Tag], scope: &str) -> Option<&'a str> {
    tags.iter()
        .find(|t| t.scope == scope)
        .map(|t| t.tag.as_str())
}

/// The four ownership tags as a typed value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnerTags {
    /// Kubernetes cluster name.
    pub cluster: String,
    /// CR namespace.
    pub namespace: String,
    /// CR name.
    pub cr_name: String,
    /// CR UID.
    pub cr_uid: String,
}

impl OwnerTags {
    /// Create a new set of ownership tags.
    #[must_use]
    pub fn new(
        cluster: impl Into<String>,
        namespace: impl Into<String>,
        cr_name: impl Into<String>,
        cr_uid: impl Into<String>,
    ) -> Self {
        Self {
            cluster: cluster.into(),
            namespace: namespace.into(),
            cr_name: cr_name.into(),
            cr_uid: cr_uid.into(),
        }
    }

    /// Render as a Manager tag list.
    #[must_use]
    pub fn to_tags(&self) -> Vec<Tag> {
        vec![
            Tag::new(SCOPE_CLUSTER, &self.cluster),
            Tag::new(SCOPE_NAMESPACE, &self.namespace),
            Tag::new(SCOPE_CR_NAME, &self.cr_name),
            Tag::new(SCOPE_CR_UID, &self.cr_uid),
        ]
    }

    /// Parse from a Manager tag list.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::MissingTag` naming the first absent scope.
    pub fn from_tags(tags: &[Tag]) -> Result<Self> {
        let get = |scope: &'static str| {
            find_tag(tags, scope)
                .map(str::to_string)
                .ok_or(CoreError::MissingTag(scope))
        };

        Ok(Self {
            cluster: get(SCOPE_CLUSTER)?,
            namespace: get(SCOPE_NAMESPACE)?,
            cr_name: get(SCOPE_CR_NAME)?,
            cr_uid: get(SCOPE_CR_UID)?,
        })
    }
}

/// Implemented by every Manager object that carries ownership tags.
pub trait Tagged {
    /// The object's tag list.
    fn tags(&self) -> &[Tag];

    /// The owning CR UID, if tagged.
    fn cr_uid(&self) -> Option<&str> {
        find_tag(self.tags(), SCOPE_CR_UID)
    }

    /// The owning cluster name, if tagged.
    fn cluster(&self) -> Option<&str> {
        find_tag(self.tags(), SCOPE_CLUSTER)
    }

    /// The owning CR namespace, if tagged.
    fn namespace(&self) -> Option<&str> {
        find_tag(self.tags(), SCOPE_NAMESPACE)
    }

    /// The owning CR name, if tagged.
    fn cr_name(&self) -> Option<&str> {
        find_tag(self.tags(), SCOPE_CR_NAME)
    }
}
