use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashMap;

use crate::error::{ClientError, ClientResult};
use crate::k8s::{kind_of, KubeObject, ObjectKey};

/// A thread-safe local cache of the objects of a single kind.
///
/// Reads are served from memory and never block on the K8s API. Reads made before the
/// cache received its initial listing fail with `ClientError::NotSynced`.
pub struct Indexer<K> {
    kind: String,
    items: DashMap<ObjectKey, K>,
    synced: AtomicBool,
}

impl<K: KubeObject> Indexer<K> {
    /// Create a new empty instance.
    pub fn new() -> Self {
        Self {
            kind: kind_of::<K>(),
            items: DashMap::new(),
            synced: AtomicBool::new(false),
        }
    }

    /// The kind of the objects held by this cache.
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Check if this cache has received its initial listing.
    pub fn has_synced(&self) -> bool {
        self.synced.load(Ordering::Acquire)
    }

    fn ensure_synced(&self) -> ClientResult<()> {
        if self.has_synced() {
            Ok(())
        } else {
            Err(ClientError::NotSynced(self.kind.clone()))
        }
    }

    /// Get a copy of the target object.
    pub fn get(&self, namespace: &str, name: &str) -> ClientResult<K> {
        self.ensure_synced()?;
        self.items
            .get(&ObjectKey::new(namespace, name))
            .map(|entry| entry.value().clone())
            .ok_or_else(|| ClientError::NotFound {
                kind: self.kind.clone(),
                namespace: namespace.into(),
                name: name.into(),
            })
    }

    /// List copies of all objects of the given namespace, sorted by name.
    pub fn list(&self, namespace: &str) -> ClientResult<Vec<K>> {
        self.ensure_synced()?;
        let mut items: Vec<_> = self
            .items
            .iter()
            .filter(|entry| entry.key().namespace == namespace)
            .map(|entry| (entry.key().name.clone(), entry.value().clone()))
            .collect();
        items.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(items.into_iter().map(|(_, obj)| obj).collect())
    }

    /// List copies of all objects, sorted by namespace & name.
    pub fn list_all(&self) -> ClientResult<Vec<K>> {
        self.ensure_synced()?;
        let mut items: Vec<_> = self.items.iter().map(|entry| (entry.key().clone(), entry.value().clone())).collect();
        items.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(items.into_iter().map(|(_, obj)| obj).collect())
    }

    /// Insert or replace an object, returning the previous version if any.
    pub fn apply(&self, obj: K) -> Option<K> {
        let key = ObjectKey::from_object(&obj)?;
        self.items.insert(key, obj)
    }

    /// Remove an object, returning the cached version if any.
    pub fn delete(&self, obj: &K) -> Option<K> {
        let key = ObjectKey::from_object(obj)?;
        self.items.remove(&key).map(|(_, old)| old)
    }

    /// Replace the full content of this cache, marking it as synced.
    ///
    /// New objects are applied before stale ones are removed, so that concurrent readers never
    /// miss an object present both before and after the replacement. Returns the previous
    /// content of the cache.
    pub fn replace(&self, objs: Vec<K>) -> Vec<K> {
        let mut keep = HashSet::with_capacity(objs.len());
        let mut old = Vec::new();
        for obj in objs {
            if let Some(key) = ObjectKey::from_object(&obj) {
                keep.insert(key.clone());
                old.extend(self.items.insert(key, obj));
            }
        }
        let stale: Vec<_> = self
            .items
            .iter()
            .map(|entry| entry.key().clone())
            .filter(|key| !keep.contains(key))
            .collect();
        old.extend(stale.into_iter().filter_map(|key| self.items.remove(&key).map(|(_, obj)| obj)));
        self.synced.store(true, Ordering::Release);
        old
    }
}

impl<K: KubeObject> Default for Indexer<K> {
    fn default() -> Self {
        Self::new()
    }
}
