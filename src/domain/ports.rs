//! Domain Ports - Core trait definitions for the PVC operator
//!
//! These traits define the boundaries between the provisioning logic and
//! external systems (the Kubernetes API, cloud metadata services and cloud
//! management APIs). Adapters implement these traits to provide concrete
//! functionality.

use crate::crd::ObjectStore;
use crate::error::{Error, Result};
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Service};
use k8s_openapi::api::storage::v1::StorageClass;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

// =============================================================================
// Claim Types
// =============================================================================

/// Access pattern requested by a storage claim
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccessMode {
    /// Single writer
    ReadWriteOnce,
    /// Many writers
    ReadWriteMany,
    /// Many readers
    ReadOnlyMany,
}

impl AccessMode {
    /// Parse the Kubernetes spelling; unknown modes yield `None`
    pub fn from_k8s(mode: &str) -> Option<Self> {
        match mode {
            "ReadWriteOnce" => Some(AccessMode::ReadWriteOnce),
            "ReadWriteMany" => Some(AccessMode::ReadWriteMany),
            "ReadOnlyMany" => Some(AccessMode::ReadOnlyMany),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AccessMode::ReadWriteOnce => "ReadWriteOnce",
            AccessMode::ReadWriteMany => "ReadWriteMany",
            AccessMode::ReadOnlyMany => "ReadOnlyMany",
        }
    }
}

impl std::fmt::Display for AccessMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle phase of a storage claim
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClaimPhase {
    Pending,
    Bound,
    Lost,
    Unknown,
}

impl From<Option<&str>> for ClaimPhase {
    fn from(phase: Option<&str>) -> Self {
        match phase {
            Some("Pending") => ClaimPhase::Pending,
            Some("Bound") => ClaimPhase::Bound,
            Some("Lost") => ClaimPhase::Lost,
            _ => ClaimPhase::Unknown,
        }
    }
}

/// Domain view of a PersistentVolumeClaim
#[derive(Debug, Clone, PartialEq)]
pub struct StorageClaim {
    pub name: String,
    pub namespace: String,
    /// Access modes in the order they appear on the claim
    pub access_modes: Vec<String>,
    /// Requested storage class; may be unset pending assignment
    pub storage_class_name: Option<String>,
    pub phase: ClaimPhase,
    /// Requested `storage` capacity
    pub capacity: Option<Quantity>,
}

impl StorageClaim {
    /// Build the domain view from a PersistentVolumeClaim
    pub fn from_pvc(pvc: &PersistentVolumeClaim) -> Self {
        let spec = pvc.spec.as_ref();
        Self {
            name: pvc.name_any(),
            namespace: pvc.namespace().unwrap_or_else(|| "default".to_string()),
            access_modes: spec
                .and_then(|s| s.access_modes.clone())
                .unwrap_or_default(),
            storage_class_name: spec.and_then(|s| s.storage_class_name.clone()),
            phase: ClaimPhase::from(pvc.status.as_ref().and_then(|s| s.phase.as_deref())),
            capacity: spec
                .and_then(|s| s.resources.as_ref())
                .and_then(|r| r.requests.as_ref())
                .and_then(|requests| requests.get("storage"))
                .cloned(),
        }
    }

    /// `namespace/name`, used in logs and errors
    pub fn qualified_name(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }

    /// The requested access pattern: the first access mode we recognise
    pub fn access_mode(&self) -> Result<AccessMode> {
        self.access_modes
            .iter()
            .find_map(|mode| AccessMode::from_k8s(mode))
            .ok_or_else(|| Error::MissingAccessMode {
                claim: self.qualified_name(),
            })
    }

    /// Storage class name, if set and non-empty
    pub fn class_name(&self) -> Option<&str> {
        self.storage_class_name
            .as_deref()
            .filter(|name| !name.is_empty())
    }

    /// Only pending claims with a storage class are provisioned
    pub fn needs_provisioning(&self) -> bool {
        self.phase == ClaimPhase::Pending && self.class_name().is_some()
    }

    /// Storage class names containing `nfs` are served by the shared NFS gateway
    pub fn wants_shared_gateway(&self) -> bool {
        self.class_name()
            .map(|name| name.contains("nfs"))
            .unwrap_or(false)
    }
}

/// Domain view of an ObjectStore resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketClaim {
    pub name: String,
    pub namespace: String,
    /// Desired bucket name, taken verbatim from `spec.name`
    pub bucket_name: String,
}

impl From<&ObjectStore> for BucketClaim {
    fn from(store: &ObjectStore) -> Self {
        Self {
            name: store.name_any(),
            namespace: store.namespace().unwrap_or_else(|| "default".to_string()),
            bucket_name: store.spec.name.clone(),
        }
    }
}

/// A notification delivered by the watch runtime
#[derive(Debug, Clone, PartialEq)]
pub enum ClaimEvent {
    StorageClaim(StorageClaim),
    BucketClaim(BucketClaim),
    /// Anything else; ignored
    Other,
}

impl ClaimEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            ClaimEvent::StorageClaim(_) => "PersistentVolumeClaim",
            ClaimEvent::BucketClaim(_) => "ObjectStore",
            ClaimEvent::Other => "Other",
        }
    }
}

impl From<&PersistentVolumeClaim> for ClaimEvent {
    fn from(pvc: &PersistentVolumeClaim) -> Self {
        ClaimEvent::StorageClaim(StorageClaim::from_pvc(pvc))
    }
}

impl From<&ObjectStore> for ClaimEvent {
    fn from(store: &ObjectStore) -> Self {
        ClaimEvent::BucketClaim(BucketClaim::from(store))
    }
}

// =============================================================================
// Cloud Backends
// =============================================================================

/// Cloud environments the operator can provision storage in
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CloudBackend {
    Azure,
    Aws,
    Google,
}

impl std::fmt::Display for CloudBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CloudBackend::Azure => write!(f, "azure"),
            CloudBackend::Aws => write!(f, "aws"),
            CloudBackend::Google => write!(f, "google"),
        }
    }
}

// =============================================================================
// Resource Store Port
// =============================================================================

/// Kinds of cluster resources the operator reads and writes
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ResourceKind {
    PersistentVolumeClaim,
    Service,
    Deployment,
    StorageClass,
}

impl ResourceKind {
    /// StorageClasses are cluster scoped
    pub fn is_namespaced(&self) -> bool {
        !matches!(self, ResourceKind::StorageClass)
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceKind::PersistentVolumeClaim => write!(f, "PersistentVolumeClaim"),
            ResourceKind::Service => write!(f, "Service"),
            ResourceKind::Deployment => write!(f, "Deployment"),
            ResourceKind::StorageClass => write!(f, "StorageClass"),
        }
    }
}

/// A typed cluster resource
#[derive(Debug, Clone, PartialEq)]
pub enum Resource {
    PersistentVolumeClaim(PersistentVolumeClaim),
    Service(Service),
    Deployment(Deployment),
    StorageClass(StorageClass),
}

impl Resource {
    pub fn kind(&self) -> ResourceKind {
        match self {
            Resource::PersistentVolumeClaim(_) => ResourceKind::PersistentVolumeClaim,
            Resource::Service(_) => ResourceKind::Service,
            Resource::Deployment(_) => ResourceKind::Deployment,
            Resource::StorageClass(_) => ResourceKind::StorageClass,
        }
    }

    pub fn metadata(&self) -> &ObjectMeta {
        match self {
            Resource::PersistentVolumeClaim(r) => &r.metadata,
            Resource::Service(r) => &r.metadata,
            Resource::Deployment(r) => &r.metadata,
            Resource::StorageClass(r) => &r.metadata,
        }
    }

    pub fn name(&self) -> &str {
        self.metadata().name.as_deref().unwrap_or_default()
    }

    /// Namespace, or `None` for cluster scoped kinds
    pub fn namespace(&self) -> Option<&str> {
        if self.kind().is_namespaced() {
            self.metadata().namespace.as_deref()
        } else {
            None
        }
    }
}

/// Port for reading and writing cluster resources
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Fetch a resource by name; a missing resource is `Error::NotFound`
    async fn get(&self, kind: ResourceKind, namespace: Option<&str>, name: &str)
        -> Result<Resource>;

    /// Create a resource; an existing one is `Error::AlreadyExists`
    async fn create(&self, resource: Resource) -> Result<()>;

    /// Create a resource, treating "already exists" as success.
    ///
    /// Returns whether a new resource was written.
    async fn create_if_absent(&self, resource: Resource) -> Result<bool> {
        let kind = resource.kind();
        let name = resource.name().to_string();
        match self.create(resource).await {
            Ok(()) => Ok(true),
            Err(e) if e.is_already_exists() => {
                debug!("{} {} already exists", kind, name);
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }
}

// =============================================================================
// HTTP Transport Port
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
}

/// An outgoing HTTP request to a metadata service or cloud API
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<serde_json::Value>,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Get,
            url: url.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn post(url: impl Into<String>, body: serde_json::Value) -> Self {
        Self {
            method: HttpMethod::Post,
            url: url.into(),
            headers: Vec::new(),
            body: Some(body),
        }
    }

    pub fn put(url: impl Into<String>, body: Option<serde_json::Value>) -> Self {
        Self {
            method: HttpMethod::Put,
            url: url.into(),
            headers: Vec::new(),
            body,
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn bearer(self, token: &str) -> Self {
        self.header("Authorization", format!("Bearer {}", token))
    }
}

/// Response status and body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_str(&self.body)?)
    }
}

/// Port for plain HTTP calls
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse>;
}

// =============================================================================
// Provisioning Strategy Port
// =============================================================================

/// Storage class to be created for a claim
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageClassDescriptor {
    pub name: String,
    pub provisioner: String,
    pub parameters: BTreeMap<String, String>,
}

impl StorageClassDescriptor {
    pub fn to_storage_class(&self) -> StorageClass {
        StorageClass {
            metadata: ObjectMeta {
                name: Some(self.name.clone()),
                ..Default::default()
            },
            provisioner: self.provisioner.clone(),
            parameters: if self.parameters.is_empty() {
                None
            } else {
                Some(self.parameters.clone())
            },
            ..Default::default()
        }
    }
}

/// Per-cloud provisioning behaviour
#[async_trait]
pub trait ProvisioningStrategy: Send + Sync {
    /// Which cloud this strategy targets
    fn backend(&self) -> CloudBackend;

    /// Fetch and cache backend-local facts (region, subscription, project)
    async fn load_metadata(&mut self) -> Result<()>;

    /// Provisioner for the access mode
    fn select_provisioner(&self, access_mode: AccessMode) -> Result<&'static str>;

    /// Storage class parameters for the access mode.
    ///
    /// May create backing cloud resources the parameters refer to.
    async fn select_parameters(&self, access_mode: AccessMode)
        -> Result<BTreeMap<String, String>>;

    /// Create the bucket requested by an ObjectStore
    async fn create_bucket(&self, claim: &BucketClaim) -> Result<()>;

    /// Build the storage class for the claim and write it.
    ///
    /// Nothing is written unless both provisioner and parameters resolve.
    async fn create_backend_class(
        &self,
        claim: &StorageClaim,
        store: &dyn ResourceStore,
    ) -> Result<StorageClassDescriptor> {
        let name = claim
            .class_name()
            .ok_or_else(|| {
                Error::Internal(format!("claim {} has no storage class", claim.qualified_name()))
            })?
            .to_string();
        let access_mode = claim.access_mode()?;

        let provisioner = self.select_provisioner(access_mode)?;
        debug!("Determining provisioner succeeded: {}", provisioner);
        let parameters = self.select_parameters(access_mode).await?;
        debug!("Determining parameters succeeded: {:?}", parameters);

        let descriptor = StorageClassDescriptor {
            name,
            provisioner: provisioner.to_string(),
            parameters,
        };
        store
            .create_if_absent(Resource::StorageClass(descriptor.to_storage_class()))
            .await?;
        Ok(descriptor)
    }
}

/// Shorthand for an unsupported access mode on a backend
pub fn unsupported(backend: CloudBackend, access_mode: AccessMode) -> Error {
    Error::UnsupportedAccessPattern {
        backend: backend.to_string(),
        access_mode: access_mode.to_string(),
    }
}

// =============================================================================
// Type Aliases for Arc'd Traits
// =============================================================================

pub type ResourceStoreRef = Arc<dyn ResourceStore>;
pub type HttpTransportRef = Arc<dyn HttpTransport>;

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use k8s_openapi::api::core::v1::{
        PersistentVolumeClaimSpec, PersistentVolumeClaimStatus, VolumeResourceRequirements,
    };

    fn pvc(class: Option<&str>, phase: Option<&str>, modes: &[&str]) -> PersistentVolumeClaim {
        PersistentVolumeClaim {
            metadata: ObjectMeta {
                name: Some("data".into()),
                namespace: Some("apps".into()),
                ..Default::default()
            },
            spec: Some(PersistentVolumeClaimSpec {
                access_modes: Some(modes.iter().map(|m| m.to_string()).collect()),
                storage_class_name: class.map(str::to_string),
                resources: Some(VolumeResourceRequirements {
                    requests: Some(BTreeMap::from([(
                        "storage".to_string(),
                        Quantity("5Gi".into()),
                    )])),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            status: Some(PersistentVolumeClaimStatus {
                phase: phase.map(str::to_string),
                ..Default::default()
            }),
        }
    }

    #[test]
    fn test_storage_claim_from_pvc() {
        let claim = StorageClaim::from_pvc(&pvc(Some("fast"), Some("Pending"), &["ReadWriteOnce"]));
        assert_eq!(claim.qualified_name(), "apps/data");
        assert_eq!(claim.phase, ClaimPhase::Pending);
        assert_eq!(claim.capacity, Some(Quantity("5Gi".into())));
        assert_eq!(claim.access_mode().unwrap(), AccessMode::ReadWriteOnce);
        assert!(claim.needs_provisioning());
        assert!(!claim.wants_shared_gateway());
    }

    #[test]
    fn test_claim_filtering() {
        let bound = StorageClaim::from_pvc(&pvc(Some("fast"), Some("Bound"), &["ReadWriteOnce"]));
        assert!(!bound.needs_provisioning());

        let empty_class =
            StorageClaim::from_pvc(&pvc(Some(""), Some("Pending"), &["ReadWriteOnce"]));
        assert!(!empty_class.needs_provisioning());

        let no_class = StorageClaim::from_pvc(&pvc(None, Some("Pending"), &["ReadWriteOnce"]));
        assert!(!no_class.needs_provisioning());

        let nfs =
            StorageClaim::from_pvc(&pvc(Some("shared-nfs"), Some("Pending"), &["ReadWriteMany"]));
        assert!(nfs.wants_shared_gateway());
    }

    #[test]
    fn test_access_mode_skips_unknown() {
        let claim = StorageClaim::from_pvc(&pvc(
            Some("fast"),
            Some("Pending"),
            &["ReadWriteOncePod", "ReadOnlyMany"],
        ));
        assert_eq!(claim.access_mode().unwrap(), AccessMode::ReadOnlyMany);

        let none = StorageClaim::from_pvc(&pvc(Some("fast"), Some("Pending"), &[]));
        assert_matches!(none.access_mode(), Err(Error::MissingAccessMode { .. }));
    }

    #[test]
    fn test_descriptor_omits_empty_parameters() {
        let descriptor = StorageClassDescriptor {
            name: "fast".into(),
            provisioner: "kubernetes.io/aws-ebs".into(),
            parameters: BTreeMap::new(),
        };
        let class = descriptor.to_storage_class();
        assert_eq!(class.metadata.name.as_deref(), Some("fast"));
        assert!(class.parameters.is_none());
    }
}
