//! Existence Checker
//!
//! Read-by-name guard used before provisioning. Any read failure counts as
//! absence; the next create then reports the real problem, or succeeds.

use crate::domain::ports::{ResourceKind, ResourceStore};
use tracing::debug;

/// Answers "does this resource exist?" against a resource store
#[derive(Clone, Copy)]
pub struct ExistenceChecker<'a> {
    store: &'a dyn ResourceStore,
}

impl<'a> ExistenceChecker<'a> {
    pub fn new(store: &'a dyn ResourceStore) -> Self {
        Self { store }
    }

    /// Whether a resource of `kind` named `name` can be read
    pub async fn exists(&self, kind: ResourceKind, namespace: Option<&str>, name: &str) -> bool {
        match self.store.get(kind, namespace, name).await {
            Ok(_) => {
                debug!("{} {} exists", kind, name);
                true
            }
            Err(e) => {
                debug!("{} {} does not exist: {}", kind, name, e);
                false
            }
        }
    }

    /// Whether the storage class `name` exists
    pub async fn storage_class_exists(&self, name: &str) -> bool {
        self.exists(ResourceKind::StorageClass, None, name).await
    }
}
