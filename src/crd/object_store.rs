//! ObjectStore CRD
//!
//! Requests an object-storage bucket in whatever cloud the cluster runs in.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

// =============================================================================
// ObjectStore CRD
// =============================================================================

/// ObjectStore asks the operator to create a bucket with the given name.
///
/// Ownership and lifecycle of the bucket itself stay with the cloud backend.
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[cfg_attr(test, derive(Default))]
#[kube(
    group = "banzaicloud.com",
    version = "v1alpha1",
    kind = "ObjectStore",
    plural = "objectstores",
    shortname = "os",
    status = "ObjectStoreStatus",
    printcolumn = r#"{"name": "Bucket", "type": "string", "jsonPath": ".spec.name"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#,
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct ObjectStoreSpec {
    /// Bucket name, used verbatim
    pub name: String,
}

/// Status of an ObjectStore
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ObjectStoreStatus {}
