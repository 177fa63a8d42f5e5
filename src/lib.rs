//! PVC Operator - Cloud-Aware Storage Provisioning
//!
//! A Kubernetes operator that provisions storage for pending
//! PersistentVolumeClaims and buckets for ObjectStore resources, in whichever
//! cloud (Azure, AWS or Google) the cluster runs in.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                       Claim Event Dispatcher                         │
//! │        (PersistentVolumeClaim / ObjectStore watch events)            │
//! ├──────────────────────┬──────────────────────┬───────────────────────┤
//! │   class `*nfs*`      │   other classes      │   ObjectStore         │
//! │          │           │          │           │          │            │
//! │  ┌───────┴────────┐  │  ┌───────┴────────┐  │  ┌───────┴─────────┐  │
//! │  │  NFS Gateway   │  │  │  Environment   │  │  │  Environment    │  │
//! │  │  PVC, Service, │  │  │  Prober        │  │  │  Prober         │  │
//! │  │  Deployment,   │  │  │       │        │  │  │       │         │  │
//! │  │  StorageClass  │  │  │  Provisioning  │  │  │  Bucket         │  │
//! │  └────────────────┘  │  │  Strategy      │  │  │  Provisioner    │  │
//! │                      │  └────────────────┘  │  └─────────────────┘  │
//! ├──────────────────────┴──────────────────────┴───────────────────────┤
//! │        Resource Store (Kubernetes API)   │   HTTP (cloud APIs)       │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`controlplane`]: prober, strategies, gateway, bucket provisioner, dispatcher
//! - [`controller`]: PVC and ObjectStore reconcilers with requeue on failure
//! - [`crd`]: the ObjectStore custom resource
//! - [`domain`]: ports, claim types and quantity arithmetic
//! - [`store`]: resource store implementations
//! - [`metrics`]: Prometheus dispatch metrics
//! - [`error`]: Error types and handling

pub mod controller;
pub mod controlplane;
pub mod crd;
pub mod domain;
pub mod error;
pub mod metrics;
pub mod store;

#[cfg(test)]
mod testing;

// Re-export commonly used types
pub use controlplane::{
    BackendConfig, BackendFactory, BucketProvisioner, ClaimDispatcher, EnvironmentProber,
    ExistenceChecker, GatewayConfig, GatewayProvisioner, OperatorConfig, ProberConfig,
    ReqwestTransport,
};

pub use crd::{ObjectStore, ObjectStoreSpec, ObjectStoreStatus};

pub use domain::ports::{
    AccessMode, BucketClaim, ClaimEvent, ClaimPhase, CloudBackend, HttpTransport,
    ProvisioningStrategy, ResourceStore, StorageClaim, StorageClassDescriptor,
};

pub use error::{Error, ErrorAction, Result};

pub use metrics::Metrics;

pub use store::{InMemoryResourceStore, KubeResourceStore};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
