//! Claim Event Dispatcher
//!
//! Routes each claim event to the provisioner that handles it:
//! - pending PersistentVolumeClaims whose class mentions `nfs` go to the
//!   shared-access gateway
//! - other pending PersistentVolumeClaims get a cloud storage class
//! - ObjectStores get a bucket
//!
//! Every step is safe to repeat, so a failed event is retried simply by
//! dispatching it again. The controllers in `crate::controller` do that.

use crate::controlplane::backends::{BackendConfig, BackendFactory};
use crate::controlplane::bucket::BucketProvisioner;
use crate::controlplane::existence::ExistenceChecker;
use crate::controlplane::gateway::{GatewayConfig, GatewayProvisioner};
use crate::controlplane::prober::{EnvironmentProber, ProberConfig};
use crate::domain::ports::{
    BucketClaim, ClaimEvent, HttpTransportRef, ResourceStoreRef, StorageClaim,
};
use crate::error::{Error, Result};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info, instrument};

// =============================================================================
// Operator Configuration
// =============================================================================

/// Configuration for the whole operator, loadable from YAML
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OperatorConfig {
    /// Cloud detection
    pub prober: ProberConfig,
    /// Shared-access gateway
    pub gateway: GatewayConfig,
    /// Per-cloud strategies
    pub backends: BackendConfig,
}

impl OperatorConfig {
    /// Load configuration from a YAML file; missing fields keep their defaults
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config: Self = serde_yaml::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.prober.probes.is_empty() {
            return Err(Error::Configuration("prober.probes must not be empty".into()));
        }
        if self.gateway.namespace.is_empty() {
            return Err(Error::Configuration("gateway.namespace must not be empty".into()));
        }
        if self.backends.timeout_secs == 0 {
            return Err(Error::Configuration("backends.timeout_secs must be positive".into()));
        }
        Ok(())
    }
}

// =============================================================================
// Claim Dispatcher
// =============================================================================

/// Handles claim events against a resource store
pub struct ClaimDispatcher {
    config: OperatorConfig,
    store: ResourceStoreRef,
    /// Used by the strategies for cloud management calls
    api_transport: HttpTransportRef,
    prober: EnvironmentProber,
    gateway: GatewayProvisioner,
    buckets: BucketProvisioner,
}

impl ClaimDispatcher {
    /// `detect_transport` serves the short metadata lookups of cloud
    /// detection, `api_transport` everything the strategies call. `owner`,
    /// when set, is attached to every gateway member.
    pub fn new(
        config: OperatorConfig,
        store: ResourceStoreRef,
        detect_transport: HttpTransportRef,
        api_transport: HttpTransportRef,
        owner: Option<OwnerReference>,
    ) -> Self {
        let prober = EnvironmentProber::new(&config.prober, detect_transport);
        let gateway = GatewayProvisioner::new(config.gateway.clone(), owner);
        Self {
            config,
            store,
            api_transport,
            prober,
            gateway,
            buckets: BucketProvisioner::new(),
        }
    }

    /// Handle one event to completion
    pub async fn dispatch(&self, event: &ClaimEvent) -> Result<()> {
        match event {
            ClaimEvent::StorageClaim(claim) => self.handle_storage_claim(claim).await,
            ClaimEvent::BucketClaim(claim) => self.handle_bucket_claim(claim).await,
            ClaimEvent::Other => Ok(()),
        }
    }

    #[instrument(skip_all, fields(claim = %claim.qualified_name()))]
    async fn handle_storage_claim(&self, claim: &StorageClaim) -> Result<()> {
        if !claim.needs_provisioning() {
            debug!("Claim is {:?}, nothing to provision", claim.phase);
            return Ok(());
        }
        let Some(class_name) = claim.class_name() else {
            return Ok(());
        };

        if claim.wants_shared_gateway() {
            if self.gateway.exists(self.store.as_ref(), class_name).await {
                debug!("NFS gateway for {} already present", class_name);
                return Ok(());
            }
            self.gateway.materialize(self.store.as_ref(), claim).await?;
            return Ok(());
        }

        if ExistenceChecker::new(self.store.as_ref())
            .storage_class_exists(class_name)
            .await
        {
            debug!("StorageClass {} already present", class_name);
            return Ok(());
        }

        let backend = self.prober.detect().await?;
        let mut strategy =
            BackendFactory::create(backend, &self.config.backends, self.api_transport.clone());
        strategy.load_metadata().await?;
        let descriptor = strategy
            .create_backend_class(claim, self.store.as_ref())
            .await?;
        info!(
            "StorageClass {} provisioned with {}",
            descriptor.name, descriptor.provisioner
        );
        Ok(())
    }

    #[instrument(
        skip_all,
        fields(object_store = %format!("{}/{}", claim.namespace, claim.name))
    )]
    async fn handle_bucket_claim(&self, claim: &BucketClaim) -> Result<()> {
        let backend = self.prober.detect().await?;
        let mut strategy =
            BackendFactory::create(backend, &self.config.backends, self.api_transport.clone());
        self.buckets.create_bucket(strategy.as_mut(), claim).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controlplane::prober::ProbeTarget;
    use crate::domain::ports::{ClaimPhase, CloudBackend, HttpMethod, Resource, ResourceKind};
    use crate::store::InMemoryResourceStore;
    use crate::testing::ScriptedTransport;
    use assert_matches::assert_matches;
    use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
    use std::io::Write;
    use std::sync::Arc;

    const AWS_PROBE: &str = "http://169.254.169.254/latest/meta-data/";
    const GOOGLE_PROBE: &str = "http://169.254.169.254/0.1/meta-data/";
    const GOOGLE_METADATA: &str = "http://metadata.google.internal/computeMetadata/v1";

    fn config() -> OperatorConfig {
        OperatorConfig {
            prober: ProberConfig {
                probes: vec![
                    ProbeTarget::new(CloudBackend::Aws, AWS_PROBE),
                    ProbeTarget::new(CloudBackend::Google, GOOGLE_PROBE),
                ],
                timeout_secs: 1,
            },
            ..Default::default()
        }
    }

    fn on_google() -> ScriptedTransport {
        ScriptedTransport::new()
            .on_get(AWS_PROBE, 404, "")
            .on_get(GOOGLE_PROBE, 200, "")
            .on_get(&format!("{GOOGLE_METADATA}/project/project-id"), 200, "my-project")
            .on_get(
                &format!("{GOOGLE_METADATA}/instance/service-accounts/default/token"),
                200,
                r#"{"access_token": "ya29"}"#,
            )
    }

    fn on_aws() -> ScriptedTransport {
        ScriptedTransport::new()
            .on_get(AWS_PROBE, 200, "ami-id")
            .on(HttpMethod::Put, "http://169.254.169.254/latest/api/token", 200, "tok")
            .on_get(
                "http://169.254.169.254/latest/dynamic/instance-identity/document",
                200,
                r#"{"region": "eu-west-1"}"#,
            )
    }

    fn setup(
        transport: ScriptedTransport,
    ) -> (ClaimDispatcher, Arc<InMemoryResourceStore>, Arc<ScriptedTransport>) {
        let store = Arc::new(InMemoryResourceStore::new());
        let transport = Arc::new(transport);
        let dispatcher = ClaimDispatcher::new(
            config(),
            store.clone(),
            transport.clone(),
            transport.clone(),
            None,
        );
        (dispatcher, store, transport)
    }

    fn storage_claim(class: &str, mode: &str) -> ClaimEvent {
        ClaimEvent::StorageClaim(StorageClaim {
            name: "data".into(),
            namespace: "apps".into(),
            access_modes: vec![mode.into()],
            storage_class_name: Some(class.into()),
            phase: ClaimPhase::Pending,
            capacity: Some(Quantity("1Gi".into())),
        })
    }

    #[tokio::test]
    async fn test_dispatch_twice_creates_one_class() {
        let (dispatcher, store, transport) = setup(on_google());
        let event = storage_claim("standard", "ReadWriteOnce");

        dispatcher.dispatch(&event).await.unwrap();
        assert_eq!(store.list(ResourceKind::StorageClass).len(), 1);
        assert_matches!(
            store.peek(ResourceKind::StorageClass, None, "standard"),
            Some(Resource::StorageClass(class)) => {
                assert_eq!(class.provisioner, "kubernetes.io/gce-pd");
            }
        );

        let probes = transport.requests().len();
        store.reset_counters();
        dispatcher.dispatch(&event).await.unwrap();
        assert_eq!(store.list(ResourceKind::StorageClass).len(), 1);
        assert_eq!(store.writes(), 0);
        // the class exists, so no probing happens
        assert_eq!(transport.requests().len(), probes);
    }

    #[tokio::test]
    async fn test_other_event_touches_nothing() {
        let (dispatcher, store, transport) = setup(on_google());
        dispatcher.dispatch(&ClaimEvent::Other).await.unwrap();
        assert_eq!(store.reads(), 0);
        assert_eq!(store.writes(), 0);
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn test_bound_claim_is_ignored() {
        let (dispatcher, store, transport) = setup(on_google());
        let event = ClaimEvent::StorageClaim(StorageClaim {
            phase: ClaimPhase::Bound,
            ..match storage_claim("standard", "ReadWriteOnce") {
                ClaimEvent::StorageClaim(claim) => claim,
                _ => unreachable!(),
            }
        });

        dispatcher.dispatch(&event).await.unwrap();
        assert_eq!(store.reads() + store.writes(), 0);
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn test_shared_nfs_scenario() {
        let (dispatcher, store, transport) = setup(on_aws());
        let event = storage_claim("shared-nfs", "ReadWriteMany");

        dispatcher.dispatch(&event).await.unwrap();
        assert!(dispatcher.gateway.exists(store.as_ref(), "shared-nfs").await);
        assert_matches!(
            store.peek(ResourceKind::StorageClass, None, "shared-nfs"),
            Some(Resource::StorageClass(class)) => {
                assert_eq!(class.provisioner, "banzaicloud.com/nfs");
            }
        );

        store.reset_counters();
        dispatcher.dispatch(&event).await.unwrap();
        assert_eq!(store.writes(), 0);
        // the gateway never needs to know the cloud
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn test_unsupported_mode_writes_nothing() {
        let (dispatcher, store, _) = setup(on_aws());
        let result = dispatcher
            .dispatch(&storage_claim("shared", "ReadWriteMany"))
            .await;

        assert_matches!(result, Err(Error::UnsupportedAccessPattern { .. }));
        assert!(!result.unwrap_err().is_retryable());
        assert_eq!(store.writes(), 0);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_no_backend_detected() {
        let (dispatcher, store, _) = setup(
            ScriptedTransport::new()
                .on_get(AWS_PROBE, 404, "")
                .unreachable(HttpMethod::Get, GOOGLE_PROBE),
        );
        let result = dispatcher
            .dispatch(&storage_claim("standard", "ReadWriteOnce"))
            .await;
        assert_matches!(result, Err(Error::NoBackendDetected));
        assert_eq!(store.writes(), 0);
    }

    #[tokio::test]
    async fn test_bucket_claim_creates_bucket() {
        let (dispatcher, _, transport) = setup(on_google().on(
            HttpMethod::Post,
            "https://storage.googleapis.com/storage/v1/b",
            200,
            "{}",
        ));
        let event = ClaimEvent::BucketClaim(BucketClaim {
            name: "store".into(),
            namespace: "apps".into(),
            bucket_name: "team-backups".into(),
        });

        dispatcher.dispatch(&event).await.unwrap();
        assert_eq!(
            transport.count(HttpMethod::Post, "https://storage.googleapis.com/storage/v1/b"),
            1
        );
    }

    #[tokio::test]
    async fn test_invalid_bucket_name_is_rejected() {
        let (dispatcher, _, transport) = setup(on_google());
        let event = ClaimEvent::BucketClaim(BucketClaim {
            name: "store".into(),
            namespace: "apps".into(),
            bucket_name: "Not_A_Bucket".into(),
        });

        assert_matches!(
            dispatcher.dispatch(&event).await,
            Err(Error::InvalidBucketName { .. })
        );
        assert_eq!(transport.count(HttpMethod::Post, "https://"), 0);
    }

    #[test]
    fn test_load_config_from_yaml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
prober:
  probes:
    - backend: google
      url: http://169.254.169.254/0.1/meta-data/
gateway:
  namespace: storage
backends:
  azure:
    storage_account: sharedfiles
"#
        )
        .unwrap();

        let config = OperatorConfig::load_from_file(file.path()).unwrap();
        assert_eq!(config.prober.probes.len(), 1);
        assert_eq!(config.prober.probes[0].backend, CloudBackend::Google);
        assert_eq!(config.prober.timeout_secs, 2);
        assert_eq!(config.gateway.namespace, "storage");
        assert_eq!(config.gateway.headroom, "2Gi");
        assert_eq!(config.backends.azure.storage_account, "sharedfiles");
        assert_eq!(config.backends.azure.sku_name, "Standard_LRS");
        assert_eq!(config.backends.timeout_secs, 30);
    }

    #[tokio::test]
    async fn test_strategies_use_api_transport() {
        let store = Arc::new(InMemoryResourceStore::new());
        let detect = Arc::new(
            ScriptedTransport::new()
                .on_get(AWS_PROBE, 404, "")
                .on_get(GOOGLE_PROBE, 200, ""),
        );
        let api = Arc::new(on_google());
        let dispatcher =
            ClaimDispatcher::new(config(), store.clone(), detect.clone(), api.clone(), None);

        dispatcher
            .dispatch(&storage_claim("standard", "ReadWriteOnce"))
            .await
            .unwrap();
        assert!(store.contains(ResourceKind::StorageClass, None, "standard"));
        // detection only touches the metadata endpoints
        assert_eq!(detect.requests().len(), 2);
        assert_eq!(api.count(HttpMethod::Get, AWS_PROBE), 0);
        assert_eq!(api.count(HttpMethod::Get, GOOGLE_PROBE), 0);
        assert!(api.count(HttpMethod::Get, GOOGLE_METADATA) >= 1);
    }

    #[test]
    fn test_unreadable_config_is_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = OperatorConfig::load_from_file(dir.path().join("missing.yaml"));
        assert_matches!(result, Err(Error::Configuration(ref msg)) if msg.contains("missing.yaml"));
        assert_eq!(result.unwrap_err().metric_label(), "configuration");
    }

    #[test]
    fn test_zero_api_timeout_is_rejected() {
        let mut config = config();
        config.backends.timeout_secs = 0;
        assert_matches!(config.validate(), Err(Error::Configuration(_)));
    }

    #[test]
    fn test_empty_probe_list_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "prober:\n  probes: []").unwrap();
        assert_matches!(
            OperatorConfig::load_from_file(file.path()),
            Err(Error::Configuration(_))
        );
    }
}
