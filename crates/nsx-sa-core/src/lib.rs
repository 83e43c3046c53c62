//! Core types and naming rules for NSX service account trust provisioning.
//!
//! This crate provides the foundational types shared by every other crate in
//! the workspace:
//!
//! - **Model**: the Manager-side objects this engine owns (principal
//!   identities, cluster control planes, imported certificates)
//! - **Tags**: the ownership tags written onto every Manager object
//! - **Naming**: normalized, length-bounded Manager identifiers derived from
//!   cluster, namespace and CR name
//!
//! # Example
//!
//! ```
//! use nsx_sa_core::{OwnerTags, ServiceAccountRef};
//!
//! let sa = ServiceAccountRef::new("cluster1", "ns1", "name1");
//! assert_eq!(sa.normalized_name(), "cluster1-ns1-name1");
//! assert_eq!(sa.secret_name(), "name1-nsx-cert");
//!
//! let tags = OwnerTags::new("cluster1", "ns1", "name1", "uid-1").to_tags();
//! assert_eq!(tags.len(), 4);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod model;
pub mod naming;
pub mod tags;

pub use error::{CoreError, Result};
pub use model::{
    ClusterControlPlane, ImportedCertificate, PrincipalIdentity, PrincipalIdentityRequest, Role,
    RolesForPath,
};
pub use naming::{cluster_uuid, normalize_name, ServiceAccountRef};
pub use tags::{find_tag, OwnerTags, Tag, Tagged};
