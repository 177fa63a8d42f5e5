//! In-Memory Resource Store
//!
//! Keeps resources in a map and counts every read and write, so provisioning
//! runs can be inspected without an API server.

use crate::domain::ports::{Resource, ResourceKind, ResourceStore};
use crate::error::{Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Key of a stored resource: kind, namespace (none when cluster scoped), name
type ResourceKey = (ResourceKind, Option<String>, String);

fn key(kind: ResourceKind, namespace: Option<&str>, name: &str) -> ResourceKey {
    let namespace = if kind.is_namespaced() {
        Some(namespace.unwrap_or("default").to_string())
    } else {
        None
    };
    (kind, namespace, name.to_string())
}

/// `ResourceStore` held entirely in memory
#[derive(Default)]
pub struct InMemoryResourceStore {
    resources: Mutex<BTreeMap<ResourceKey, Resource>>,
    /// Kinds whose creates fail, with the failure reason
    failing: Mutex<BTreeMap<ResourceKind, String>>,
    reads: AtomicUsize,
    writes: AtomicUsize,
}

impl InMemoryResourceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a resource without counting it as a write
    pub fn insert(&self, resource: Resource) {
        let key = key(resource.kind(), resource.namespace(), resource.name());
        self.resources.lock().insert(key, resource);
    }

    /// Delete a resource, returning it if it was present
    pub fn remove(
        &self,
        kind: ResourceKind,
        namespace: Option<&str>,
        name: &str,
    ) -> Option<Resource> {
        self.resources.lock().remove(&key(kind, namespace, name))
    }

    pub fn contains(&self, kind: ResourceKind, namespace: Option<&str>, name: &str) -> bool {
        self.resources.lock().contains_key(&key(kind, namespace, name))
    }

    /// Look up a resource without counting it as a read
    pub fn peek(
        &self,
        kind: ResourceKind,
        namespace: Option<&str>,
        name: &str,
    ) -> Option<Resource> {
        self.resources.lock().get(&key(kind, namespace, name)).cloned()
    }

    /// All resources of a kind
    pub fn list(&self, kind: ResourceKind) -> Vec<Resource> {
        self.resources
            .lock()
            .iter()
            .filter(|((k, _, _), _)| *k == kind)
            .map(|(_, resource)| resource.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.resources.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.lock().is_empty()
    }

    /// Make every create of `kind` fail with a store error
    pub fn fail_creates(&self, kind: ResourceKind, reason: impl Into<String>) {
        self.failing.lock().insert(kind, reason.into());
    }

    pub fn clear_failures(&self) {
        self.failing.lock().clear();
    }

    /// Number of `get` calls served
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::Relaxed)
    }

    /// Number of `create` calls attempted
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::Relaxed)
    }

    pub fn reset_counters(&self) {
        self.reads.store(0, Ordering::Relaxed);
        self.writes.store(0, Ordering::Relaxed);
    }
}

#[async_trait]
impl ResourceStore for InMemoryResourceStore {
    async fn get(
        &self,
        kind: ResourceKind,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Resource> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        self.resources
            .lock()
            .get(&key(kind, namespace, name))
            .cloned()
            .ok_or_else(|| Error::NotFound {
                kind: kind.to_string(),
                name: name.to_string(),
            })
    }

    async fn create(&self, resource: Resource) -> Result<()> {
        self.writes.fetch_add(1, Ordering::Relaxed);
        let kind = resource.kind();

        if let Some(reason) = self.failing.lock().get(&kind) {
            return Err(Error::ResourceStore {
                kind: kind.to_string(),
                name: resource.name().to_string(),
                reason: reason.clone(),
            });
        }

        let key = key(kind, resource.namespace(), resource.name());
        let mut resources = self.resources.lock();
        if resources.contains_key(&key) {
            return Err(Error::AlreadyExists {
                kind: kind.to_string(),
                name: resource.name().to_string(),
            });
        }
        resources.insert(key, resource);
        Ok(())
    }
}
