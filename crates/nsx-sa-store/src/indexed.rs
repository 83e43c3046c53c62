//! Generic indexed store.
//!
//! Objects live in a primary map keyed by their Manager identifier. Every
//! [`Index`] keeps a secondary map from index value to the set of primary
//! keys carrying that value. Both maps sit behind one lock and are updated in
//! the same critical section, so readers never observe them disagreeing.

use std::collections::{BTreeSet, HashMap, HashSet};

use nsx_sa_core::Tagged;
use parking_lot::RwLock;

use crate::error::{Result, StoreError};

/// Secondary indexes maintained for every stored object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Index {
    /// The owning cluster tag.
    Cluster,
    /// The owning CR namespace tag.
    Namespace,
    /// `{namespace}/{cr name}` built from the namespace and CR name tags.
    NamespacedName,
    /// The owning CR UID tag.
    CrUid,
    /// The object's normalized name.
    Name,
}

impl Index {
    const ALL: [Self; 5] = [
        Self::Cluster,
        Self::Namespace,
        Self::NamespacedName,
        Self::CrUid,
        Self::Name,
    ];
}

/// An object that can be kept in an [`IndexedStore`].
pub trait Stored: Tagged + Clone + Send + Sync {
    /// Primary key (the Manager identifier).
    fn key(&self) -> &str;

    /// Normalized name.
    fn name(&self) -> &str;

    /// Value of the given index for this object, if any.
    fn index_value(&self, index: Index) -> Option<String> {
        match index {
            Index::Cluster => self.cluster().map(str::to_string),
            Index::Namespace => self.namespace().map(str::to_string),
            Index::NamespacedName => match (self.namespace(), self.cr_name()) {
                (Some(ns), Some(name)) => Some(namespaced(ns, name)),
                _ => None,
            },
            Index::CrUid => self.cr_uid().map(str::to_string),
            Index::Name => Some(self.name().to_string()).filter(|n| !n.is_empty()),
        }
    }
}

pub(crate) fn namespaced(namespace: &str, name: &str) -> String {
    format!("{namespace}/{name}")
}

struct Inner<T> {
    objects: HashMap<String, T>,
    indexes: HashMap<Index, HashMap<String, BTreeSet<String>>>,
}

impl<T: Stored> Inner<T> {
    fn unindex(&mut self, key: &str, obj: &T) {
        for index in Index::ALL {
            let Some(value) = obj.index_value(index) else {
                continue;
            };
            if let Some(entries) = self.indexes.get_mut(&index) {
                if let Some(keys) = entries.get_mut(&value) {
                    keys.remove(key);
                    if keys.is_empty() {
                        entries.remove(&value);
                    }
                }
            }
        }
    }

    fn index(&mut self, key: &str, obj: &T) {
        for index in Index::ALL {
            if let Some(value) = obj.index_value(index) {
                self.indexes
                    .entry(index)
                    .or_default()
                    .entry(value)
                    .or_default()
                    .insert(key.to_string());
            }
        }
    }

    fn remove(&mut self, key: &str) -> Option<T> {
        let old = self.objects.remove(key)?;
        self.unindex(key, &old);
        Some(old)
    }

    fn insert(&mut self, obj: T) {
        let key = obj.key().to_string();
        self.remove(&key);
        self.index(&key, &obj);
        self.objects.insert(key, obj);
    }
}

/// A shared, read-heavy cache with secondary indexes.
///
/// All mutation goes through [`apply`](Self::apply), [`update`](Self::update)
/// and [`delete`](Self::delete). Reads return owned snapshots.
pub struct IndexedStore<T> {
    inner: RwLock<Inner<T>>,
}

impl<T: Stored> Default for IndexedStore<T> {
    fn default() -> Self {
        Self {
            inner: RwLock::new(Inner {
                objects: HashMap::new(),
                indexes: HashMap::new(),
            }),
        }
    }
}

impl<T: Stored> std::fmt::Debug for IndexedStore<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexedStore")
            .field("len", &self.len())
            .finish()
    }
}

impl<T: Stored> IndexedStore<T> {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an object, re-indexing it.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::InvalidObject` if the object has no primary key.
    pub fn apply(&self, obj: T) -> Result<()> {
        if obj.key().is_empty() {
            return Err(StoreError::InvalidObject(format!(
                "object {:?} has an empty key",
                obj.name()
            )));
        }
        tracing::trace!(key = %obj.key(), "store apply");
        self.inner.write().insert(obj);
        Ok(())
    }

    /// Mutate a stored object in place and re-index it.
    ///
    /// The closure must not change the primary key.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if no object has the key, or
    /// `StoreError::InvalidObject` if the closure changed the key.
    pub fn update<F>(&self, key: &str, f: F) -> Result<T>
    where
        F: FnOnce(&mut T),
    {
        let mut inner = self.inner.write();
        let mut obj = inner
            .objects
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?;
        f(&mut obj);
        if obj.key() != key {
            return Err(StoreError::InvalidObject(format!(
                "update changed key {key} to {}",
                obj.key()
            )));
        }
        inner.insert(obj.clone());
        Ok(obj)
    }

    /// Remove an object by primary key, returning it if it was present.
    pub fn delete(&self, key: &str) -> Option<T> {
        tracing::trace!(key = %key, "store delete");
        self.inner.write().remove(key)
    }

    /// Get an object by primary key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<T> {
        self.inner.read().objects.get(key).cloned()
    }

    /// All objects whose index value matches.
    #[must_use]
    pub fn by_index(&self, index: Index, value: &str) -> Vec<T> {
        let inner = self.inner.read();
        inner
            .indexes
            .get(&index)
            .and_then(|entries| entries.get(value))
            .map(|keys| {
                keys.iter()
                    .filter_map(|k| inner.objects.get(k).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// The first object with the given normalized name.
    #[must_use]
    pub fn get_by_name(&self, name: &str) -> Option<T> {
        self.by_index(Index::Name, name).into_iter().next()
    }

    /// Objects owned by the CR `{namespace}/{name}`.
    #[must_use]
    pub fn by_cr(&self, namespace: &str, name: &str) -> Vec<T> {
        self.by_index(Index::NamespacedName, &namespaced(namespace, name))
    }

    /// Objects owned by the CR with the given UID.
    #[must_use]
    pub fn by_uid(&self, uid: &str) -> Vec<T> {
        self.by_index(Index::CrUid, uid)
    }

    /// Distinct values present for an index.
    #[must_use]
    pub fn index_values(&self, index: Index) -> HashSet<String> {
        self.inner
            .read()
            .indexes
            .get(&index)
            .map(|entries| entries.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Every CR UID referenced by a stored object.
    #[must_use]
    pub fn cr_uids(&self) -> HashSet<String> {
        self.index_values(Index::CrUid)
    }

    /// Snapshot of all stored objects.
    #[must_use]
    pub fn list(&self) -> Vec<T> {
        self.inner.read().objects.values().cloned().collect()
    }

    /// Number of stored objects.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().objects.len()
    }

    /// Check whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.read().objects.is_empty()
    }

    /// Remove every object.
    pub fn clear(&self) {
        let mut inner = self.inner.write();
        inner.objects.clear();
        inner.indexes.clear();
    }
}
