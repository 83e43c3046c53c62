//! Indexed in-memory stores for NSX service account objects.
//!
//! The trust-provisioning engine mirrors every principal identity and cluster
//! control plane it owns on the Manager into one of two stores. Each store is
//! an [`IndexedStore`]: a primary map keyed by Manager identifier plus
//! secondary indexes over the ownership tags.
//!
//! - [`PrincipalIdentityStore`]: keyed by the Manager-assigned identity id
//! - [`ClusterControlPlaneStore`]: keyed by the normalized name
//!
//! # Example
//!
//! ```
//! use nsx_sa_core::{ClusterControlPlane, OwnerTags};
//! use nsx_sa_store::ClusterControlPlaneStore;
//!
//! let store = ClusterControlPlaneStore::new();
//! store.apply(ClusterControlPlane {
//!     id: "cl-ns1-name1".into(),
//!     display_name: "cl-ns1-name1".into(),
//!     node_id: String::new(),
//!     certificate: None,
//!     vhc_path: String::new(),
//!     revision: None,
//!     tags: OwnerTags::new("cl", "ns1", "name1", "uid-1").to_tags(),
//! }).unwrap();
//!
//! assert_eq!(store.by_uid("uid-1").len(), 1);
//! assert!(store.cr_uids().contains("uid-1"));
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod indexed;

pub use error::{Result, StoreError};
pub use indexed::{Index, IndexedStore, Stored};

use nsx_sa_core::{ClusterControlPlane, PrincipalIdentity};

/// Store of principal identities owned by this cluster.
pub type PrincipalIdentityStore = IndexedStore<PrincipalIdentity>;

/// Store of cluster control planes owned by this cluster.
pub type ClusterControlPlaneStore = IndexedStore<ClusterControlPlane>;

impl Stored for PrincipalIdentity {
    fn key(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl Stored for ClusterControlPlane {
    fn key(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nsx_sa_core::OwnerTags;

    fn pi(id: &str, ns: &str, name: &str, uid: &str) -> PrincipalIdentity {
        PrincipalIdentity {
            id: id.to_string(),
            name: format!("cl-{ns}-{name}"),
            node_id: format!("cl-{ns}-{name}"),
            certificate_id: Some(format!("cert-{id}")),
            is_protected: true,
            roles_for_paths: vec![],
            tags: OwnerTags::new("cl", ns, name, uid).to_tags(),
        }
    }

    #[test]
    fn apply_and_lookup_by_every_index() {
        let store = PrincipalIdentityStore::new();
        store.apply(pi("pi-1", "ns1", "name1", "uid-1")).unwrap();
        store.apply(pi("pi-2", "ns1", "name2", "uid-2")).unwrap();
        store.apply(pi("pi-3", "ns2", "name1", "uid-3")).unwrap();

        assert_eq!(store.len(), 3);
        assert_eq!(store.by_index(Index::Namespace, "ns1").len(), 2);
        assert_eq!(store.by_index(Index::Cluster, "cl").len(), 3);
        assert_eq!(store.by_cr("ns2", "name1")[0].id, "pi-3");
        assert_eq!(store.by_uid("uid-2")[0].id, "pi-2");
        assert_eq!(store.get_by_name("cl-ns1-name1").unwrap().id, "pi-1");
        assert_eq!(store.cr_uids().len(), 3);
    }

    #[test]
    fn replace_moves_index_entries() {
        let store = PrincipalIdentityStore::new();
        store.apply(pi("pi-1", "ns1", "name1", "uid-old")).unwrap();
        store.apply(pi("pi-1", "ns1", "name1", "uid-new")).unwrap();

        assert_eq!(store.len(), 1);
        assert!(store.by_uid("uid-old").is_empty());
        assert_eq!(store.by_uid("uid-new").len(), 1);
        assert!(!store.cr_uids().contains("uid-old"));
    }

    #[test]
    fn delete_clears_indexes() {
        let store = PrincipalIdentityStore::new();
        store.apply(pi("pi-1", "ns1", "name1", "uid-1")).unwrap();

        let removed = store.delete("pi-1").unwrap();
        assert_eq!(removed.id, "pi-1");
        assert!(store.is_empty());
        assert!(store.by_uid("uid-1").is_empty());
        assert!(store.get_by_name("cl-ns1-name1").is_none());
        assert!(store.index_values(Index::Namespace).is_empty());

        // Idempotent
        assert!(store.delete("pi-1").is_none());
    }

    #[test]
    fn update_reindexes_and_rejects_key_change() {
        let store = PrincipalIdentityStore::new();
        store.apply(pi("pi-1", "ns1", "name1", "uid-1")).unwrap();

        let updated = store
            .update("pi-1", |p| p.certificate_id = Some("cert-new".to_string()))
            .unwrap();
        assert_eq!(updated.certificate_id.as_deref(), Some("cert-new"));
        assert_eq!(
            store.get("pi-1").unwrap().certificate_id.as_deref(),
            Some("cert-new")
        );

        let err = store.update("pi-1", |p| p.id = "pi-9".to_string());
        assert!(matches!(err, Err(StoreError::InvalidObject(_))));
        assert!(store.get("pi-1").is_some());

        let err = store.update("missing", |_| {});
        assert!(matches!(err, Err(StoreError::NotFound(_))));
    }

    #[test]
    fn empty_key_is_rejected() {
        let store = PrincipalIdentityStore::new();
        let err = store.apply(pi("", "ns1", "name1", "uid-1"));
        assert!(matches!(err, Err(StoreError::InvalidObject(_))));
        assert!(store.is_empty());
    }

    #[test]
    fn untagged_objects_are_only_primary_indexed() {
        let store = ClusterControlPlaneStore::new();
        store
            .apply(ClusterControlPlane {
                id: "foreign".to_string(),
                display_name: String::new(),
                node_id: String::new(),
                certificate: None,
                vhc_path: String::new(),
                revision: None,
                tags: vec![],
            })
            .unwrap();

        assert!(store.get("foreign").is_some());
        assert!(store.get_by_name("foreign").is_some());
        assert!(store.cr_uids().is_empty());
    }

    #[test]
    fn clear_empties_everything() {
        let store = PrincipalIdentityStore::new();
        store.apply(pi("pi-1", "ns1", "name1", "uid-1")).unwrap();
        store.clear();
        assert!(store.is_empty());
        assert!(store.cr_uids().is_empty());
    }
}
