//! Shared-Access Gateway
//!
//! Serves access modes no cloud offers as a managed disk by running an NFS
//! provisioner inside the cluster. The gateway stack is four resources:
//!
//! 1. a helper claim `<class>-data` holding the exported data
//! 2. the `nfs-provisioner` Service
//! 3. the `nfs-provisioner` Deployment mounting the helper claim
//! 4. the StorageClass routing claims of `<class>` to the gateway
//!
//! The stack counts as present only when all four exist. Materializing
//! creates members in that order, skips the ones already there and stops at
//! the first real error without undoing earlier steps.

use crate::controlplane::existence::ExistenceChecker;
use crate::domain::ports::{Resource, ResourceKind, ResourceStore, StorageClaim};
use crate::domain::quantity::add_headroom;
use crate::error::{Error, Result};
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec, DeploymentStrategy};
use k8s_openapi::api::core::v1::{
    Capabilities, Container, ContainerPort, EnvVar, EnvVarSource, ObjectFieldSelector,
    PersistentVolumeClaim, PersistentVolumeClaimSpec, PersistentVolumeClaimVolumeSource,
    PodSpec, PodTemplateSpec, ResourceRequirements, SecurityContext, Service, ServicePort,
    ServiceSpec, Volume, VolumeMount, VolumeResourceRequirements,
};
use k8s_openapi::api::storage::v1::StorageClass;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta, OwnerReference};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Name of the gateway Service and Deployment
pub const GATEWAY_NAME: &str = "nfs-provisioner";

const APP_LABEL: &str = "nfs-provisioner";
const VOLUME_NAME: &str = "nfs-prov-volume";
const EXPORT_PATH: &str = "/export";

/// (name, port, protocol) exposed by the gateway
const GATEWAY_PORTS: [(&str, i32, &str); 4] = [
    ("nfs", 2049, "TCP"),
    ("mountd", 20048, "TCP"),
    ("rpcbind", 111, "TCP"),
    ("rpcbind-udp", 111, "UDP"),
];

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the shared-access gateway
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Namespace the gateway runs in
    pub namespace: String,
    /// NFS provisioner image
    pub image: String,
    /// Provisioner name the gateway registers and its StorageClass uses
    pub provisioner: String,
    /// Extra capacity added to the helper claim on top of the request
    pub headroom: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            namespace: "default".to_string(),
            image: "quay.io/kubernetes_incubator/nfs-provisioner:v1.0.9".to_string(),
            provisioner: "banzaicloud.com/nfs".to_string(),
            headroom: "2Gi".to_string(),
        }
    }
}

/// Name of the helper claim backing the gateway for `class_name`
pub fn helper_claim_name(class_name: &str) -> String {
    format!("{}-data", class_name)
}

// =============================================================================
// Gateway Provisioner
// =============================================================================

/// Creates and checks the gateway stack
#[derive(Debug, Clone)]
pub struct GatewayProvisioner {
    config: GatewayConfig,
    owner: Option<OwnerReference>,
}

impl GatewayProvisioner {
    pub fn new(config: GatewayConfig, owner: Option<OwnerReference>) -> Self {
        Self { config, owner }
    }

    /// Whether every member of the stack for `class_name` exists
    pub async fn exists(&self, store: &dyn ResourceStore, class_name: &str) -> bool {
        let checker = ExistenceChecker::new(store);
        let namespace = Some(self.config.namespace.as_str());

        checker
            .exists(
                ResourceKind::PersistentVolumeClaim,
                namespace,
                &helper_claim_name(class_name),
            )
            .await
            && checker
                .exists(ResourceKind::Deployment, namespace, GATEWAY_NAME)
                .await
            && checker
                .exists(ResourceKind::Service, namespace, GATEWAY_NAME)
                .await
            && checker.storage_class_exists(class_name).await
    }

    /// Create the missing members of the stack for `claim`.
    ///
    /// Returns how many members were newly written.
    pub async fn materialize(
        &self,
        store: &dyn ResourceStore,
        claim: &StorageClaim,
    ) -> Result<usize> {
        let class_name = claim.class_name().ok_or_else(|| {
            Error::Internal(format!("claim {} has no storage class", claim.qualified_name()))
        })?;
        info!(
            "Creating NFS gateway for class {} in {}",
            class_name, self.config.namespace
        );

        let capacity = add_headroom(claim.capacity.as_ref(), &self.config.headroom)?;
        let members = [
            Resource::PersistentVolumeClaim(self.helper_claim(class_name, capacity)),
            Resource::Service(self.service()),
            Resource::Deployment(self.deployment(class_name)),
            Resource::StorageClass(self.storage_class(class_name)),
        ];

        let mut created = 0;
        for member in members {
            let kind = member.kind();
            let name = member.name().to_string();
            if store.create_if_absent(member).await? {
                info!("{} {} created", kind, name);
                created += 1;
            } else {
                debug!("{} {} kept", kind, name);
            }
        }
        Ok(created)
    }

    fn metadata(&self, name: String, labels: bool) -> ObjectMeta {
        ObjectMeta {
            name: Some(name),
            namespace: Some(self.config.namespace.clone()),
            labels: labels.then(Self::labels),
            owner_references: self.owner.clone().map(|owner| vec![owner]),
            ..Default::default()
        }
    }

    fn labels() -> BTreeMap<String, String> {
        BTreeMap::from([("app".to_string(), APP_LABEL.to_string())])
    }

    pub fn helper_claim(&self, class_name: &str, capacity: Quantity) -> PersistentVolumeClaim {
        PersistentVolumeClaim {
            metadata: self.metadata(helper_claim_name(class_name), false),
            spec: Some(PersistentVolumeClaimSpec {
                access_modes: Some(vec!["ReadWriteOnce".to_string()]),
                resources: Some(VolumeResourceRequirements {
                    requests: Some(BTreeMap::from([("storage".to_string(), capacity)])),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    pub fn service(&self) -> Service {
        Service {
            metadata: self.metadata(GATEWAY_NAME.to_string(), true),
            spec: Some(ServiceSpec {
                selector: Some(Self::labels()),
                ports: Some(
                    GATEWAY_PORTS
                        .iter()
                        .map(|(name, port, protocol)| ServicePort {
                            name: Some(name.to_string()),
                            port: *port,
                            protocol: Some(protocol.to_string()),
                            target_port: Some(IntOrString::Int(*port)),
                            ..Default::default()
                        })
                        .collect(),
                ),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    pub fn deployment(&self, class_name: &str) -> Deployment {
        let field_env = |name: &str, path: &str| EnvVar {
            name: name.to_string(),
            value_from: Some(EnvVarSource {
                field_ref: Some(ObjectFieldSelector {
                    field_path: path.to_string(),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        };

        let container = Container {
            name: GATEWAY_NAME.to_string(),
            image: Some(self.config.image.clone()),
            ports: Some(
                GATEWAY_PORTS
                    .iter()
                    .map(|(name, port, protocol)| ContainerPort {
                        name: Some(name.to_string()),
                        container_port: *port,
                        protocol: Some(protocol.to_string()),
                        ..Default::default()
                    })
                    .collect(),
            ),
            security_context: Some(SecurityContext {
                capabilities: Some(Capabilities {
                    add: Some(vec!["DAC_READ_SEARCH".to_string(), "SYS_RESOURCE".to_string()]),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            args: Some(vec![format!("-provisioner={}", self.config.provisioner)]),
            env: Some(vec![
                field_env("POD_IP", "status.podIP"),
                EnvVar {
                    name: "SERVICE_NAME".to_string(),
                    value: Some(GATEWAY_NAME.to_string()),
                    ..Default::default()
                },
                field_env("POD_NAMESPACE", "metadata.namespace"),
            ]),
            image_pull_policy: Some("IfNotPresent".to_string()),
            volume_mounts: Some(vec![VolumeMount {
                name: VOLUME_NAME.to_string(),
                mount_path: EXPORT_PATH.to_string(),
                ..Default::default()
            }]),
            resources: Some(ResourceRequirements {
                requests: Some(BTreeMap::from([("cpu".to_string(), Quantity("1".to_string()))])),
                ..Default::default()
            }),
            ..Default::default()
        };

        Deployment {
            metadata: self.metadata(GATEWAY_NAME.to_string(), true),
            spec: Some(DeploymentSpec {
                replicas: Some(1),
                selector: LabelSelector {
                    match_labels: Some(Self::labels()),
                    ..Default::default()
                },
                strategy: Some(DeploymentStrategy {
                    type_: Some("Recreate".to_string()),
                    ..Default::default()
                }),
                template: PodTemplateSpec {
                    metadata: Some(ObjectMeta {
                        labels: Some(Self::labels()),
                        ..Default::default()
                    }),
                    spec: Some(PodSpec {
                        containers: vec![container],
                        volumes: Some(vec![Volume {
                            name: VOLUME_NAME.to_string(),
                            persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                                claim_name: helper_claim_name(class_name),
                                ..Default::default()
                            }),
                            ..Default::default()
                        }]),
                        ..Default::default()
                    }),
                },
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    pub fn storage_class(&self, class_name: &str) -> StorageClass {
        StorageClass {
            metadata: ObjectMeta {
                name: Some(class_name.to_string()),
                owner_references: self.owner.clone().map(|owner| vec![owner]),
                ..Default::default()
            },
            provisioner: self.config.provisioner.clone(),
            reclaim_policy: Some("Retain".to_string()),
            ..Default::default()
        }
    }
}
