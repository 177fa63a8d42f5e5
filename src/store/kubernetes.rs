//! Kubernetes Resource Store
//!
//! Reads and creates resources through the Kubernetes API server.

use crate::domain::ports::{Resource, ResourceKind, ResourceStore};
use crate::error::{Error, Result};
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Service};
use k8s_openapi::api::storage::v1::StorageClass;
use kube::api::{Api, PostParams};
use kube::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;
use tracing::debug;

/// Namespace used when a namespaced lookup does not name one
const DEFAULT_NAMESPACE: &str = "default";

/// `ResourceStore` backed by the Kubernetes API
#[derive(Clone)]
pub struct KubeResourceStore {
    client: Client,
}

impl KubeResourceStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ResourceStore for KubeResourceStore {
    async fn get(
        &self,
        kind: ResourceKind,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Resource> {
        let ns = namespace.unwrap_or(DEFAULT_NAMESPACE);
        let client = self.client.clone();
        debug!("Getting {} {}/{}", kind, ns, name);

        let resource = match kind {
            ResourceKind::PersistentVolumeClaim => Resource::PersistentVolumeClaim(
                fetch(Api::<PersistentVolumeClaim>::namespaced(client, ns), kind, name).await?,
            ),
            ResourceKind::Service => {
                Resource::Service(fetch(Api::<Service>::namespaced(client, ns), kind, name).await?)
            }
            ResourceKind::Deployment => Resource::Deployment(
                fetch(Api::<Deployment>::namespaced(client, ns), kind, name).await?,
            ),
            ResourceKind::StorageClass => {
                Resource::StorageClass(fetch(Api::<StorageClass>::all(client), kind, name).await?)
            }
        };
        Ok(resource)
    }

    async fn create(&self, resource: Resource) -> Result<()> {
        let ns = resource.namespace().unwrap_or(DEFAULT_NAMESPACE).to_string();
        let kind = resource.kind();
        let client = self.client.clone();
        debug!("Creating {} {}", kind, resource.name());

        match resource {
            Resource::PersistentVolumeClaim(pvc) => {
                post(Api::namespaced(client, &ns), kind, &pvc).await
            }
            Resource::Service(service) => post(Api::namespaced(client, &ns), kind, &service).await,
            Resource::Deployment(deployment) => {
                post(Api::namespaced(client, &ns), kind, &deployment).await
            }
            Resource::StorageClass(class) => post(Api::all(client), kind, &class).await,
        }
    }
}

async fn fetch<K>(api: Api<K>, kind: ResourceKind, name: &str) -> Result<K>
where
    K: Clone + DeserializeOwned + Debug,
{
    api.get(name).await.map_err(|e| classify(e, kind, name))
}

async fn post<K>(api: Api<K>, kind: ResourceKind, object: &K) -> Result<()>
where
    K: Clone + DeserializeOwned + Serialize + Debug + kube::Resource,
{
    let name = object.meta().name.clone().unwrap_or_default();
    api.create(&PostParams::default(), object)
        .await
        .map(|_| ())
        .map_err(|e| classify(e, kind, &name))
}

/// Map API status codes onto the store's error vocabulary
fn classify(error: kube::Error, kind: ResourceKind, name: &str) -> Error {
    match &error {
        kube::Error::Api(response) if response.code == 404 => Error::NotFound {
            kind: kind.to_string(),
            name: name.to_string(),
        },
        kube::Error::Api(response) if response.code == 409 => Error::AlreadyExists {
            kind: kind.to_string(),
            name: name.to_string(),
        },
        _ => Error::Kube(error),
    }
}
