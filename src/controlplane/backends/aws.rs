//! AWS Provisioning Strategy
//!
//! EBS-backed storage classes for single-writer claims and S3 buckets for
//! ObjectStores. Shared access modes are not available as managed disks.

use super::{call_failed, metadata_not_loaded};
use crate::domain::ports::{
    unsupported, AccessMode, BucketClaim, CloudBackend, HttpRequest, HttpTransportRef,
    ProvisioningStrategy,
};
use crate::error::{Error, Result};
use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::types::{BucketLocationConstraint, CreateBucketConfiguration};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info};

pub const AWS_EBS_PROVISIONER: &str = "kubernetes.io/aws-ebs";

/// Region S3 expects no location constraint for
const S3_DEFAULT_REGION: &str = "us-east-1";

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the AWS strategy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AwsConfig {
    /// Instance metadata service
    pub metadata_endpoint: String,
    /// Override for the S3 endpoint (path-style addressing is used when set)
    pub s3_endpoint: Option<String>,
}

impl Default for AwsConfig {
    fn default() -> Self {
        Self {
            metadata_endpoint: "http://169.254.169.254".to_string(),
            s3_endpoint: None,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InstanceIdentity {
    region: String,
}

// =============================================================================
// AWS Provider
// =============================================================================

/// Provisioning strategy for AWS
pub struct AwsProvider {
    config: AwsConfig,
    transport: HttpTransportRef,
    region: Option<String>,
}

impl AwsProvider {
    pub fn new(config: AwsConfig, transport: HttpTransportRef) -> Self {
        Self {
            config,
            transport,
            region: None,
        }
    }

    /// Region read by `load_metadata`
    pub fn region(&self) -> Option<&str> {
        self.region.as_deref()
    }

    /// IMDSv2 session token, if the metadata service hands one out
    async fn session_token(&self) -> Option<String> {
        let url = format!("{}/latest/api/token", self.config.metadata_endpoint);
        let request =
            HttpRequest::put(url, None).header("X-aws-ec2-metadata-token-ttl-seconds", "60");
        match self.transport.send(request).await {
            Ok(response) if response.is_success() => Some(response.body.trim().to_string()),
            Ok(response) => {
                debug!("IMDSv2 token request answered {}, using IMDSv1", response.status);
                None
            }
            Err(e) => {
                debug!("IMDSv2 token request failed, using IMDSv1: {}", e);
                None
            }
        }
    }

    async fn s3_client(&self, region: &str) -> aws_sdk_s3::Client {
        let sdk_config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(region.to_string()))
            .load()
            .await;
        let mut builder = aws_sdk_s3::config::Builder::from(&sdk_config);
        if let Some(endpoint) = &self.config.s3_endpoint {
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }
        aws_sdk_s3::Client::from_conf(builder.build())
    }
}

#[async_trait]
impl ProvisioningStrategy for AwsProvider {
    fn backend(&self) -> CloudBackend {
        CloudBackend::Aws
    }

    async fn load_metadata(&mut self) -> Result<()> {
        if self.region.is_some() {
            return Ok(());
        }
        info!("Getting Metadata from service");

        let mut request = HttpRequest::get(format!(
            "{}/latest/dynamic/instance-identity/document",
            self.config.metadata_endpoint
        ));
        if let Some(token) = self.session_token().await {
            request = request.header("X-aws-ec2-metadata-token", token);
        }

        let response = self.transport.send(request).await?;
        if !response.is_success() {
            return Err(call_failed(CloudBackend::Aws, "instance_identity", &response));
        }
        let identity: InstanceIdentity = response.json()?;
        debug!("Running in AWS region {}", identity.region);
        self.region = Some(identity.region);
        Ok(())
    }

    fn select_provisioner(&self, access_mode: AccessMode) -> Result<&'static str> {
        match access_mode {
            AccessMode::ReadWriteOnce => Ok(AWS_EBS_PROVISIONER),
            AccessMode::ReadWriteMany | AccessMode::ReadOnlyMany => {
                Err(unsupported(CloudBackend::Aws, access_mode))
            }
        }
    }

    async fn select_parameters(&self, access_mode: AccessMode) -> Result<BTreeMap<String, String>> {
        match access_mode {
            AccessMode::ReadWriteOnce => Ok(BTreeMap::new()),
            AccessMode::ReadWriteMany | AccessMode::ReadOnlyMany => {
                Err(unsupported(CloudBackend::Aws, access_mode))
            }
        }
    }

    async fn create_bucket(&self, claim: &BucketClaim) -> Result<()> {
        let region = self
            .region
            .as_deref()
            .ok_or_else(|| metadata_not_loaded(CloudBackend::Aws))?;
        info!("Creating S3 bucket {} in {}", claim.bucket_name, region);

        let client = self.s3_client(region).await;
        let mut request = client.create_bucket().bucket(&claim.bucket_name);
        if region != S3_DEFAULT_REGION {
            request = request.create_bucket_configuration(
                CreateBucketConfiguration::builder()
                    .location_constraint(BucketLocationConstraint::from(region))
                    .build(),
            );
        }

        match request.send().await {
            Ok(_) => {
                info!("S3 bucket {} created", claim.bucket_name);
                Ok(())
            }
            Err(err)
                if err
                    .as_service_error()
                    .map(|e| e.is_bucket_already_owned_by_you())
                    .unwrap_or(false) =>
            {
                info!("S3 bucket {} already exists", claim.bucket_name);
                Ok(())
            }
            Err(err) => Err(Error::BackendCall {
                backend: CloudBackend::Aws.to_string(),
                operation: "create_bucket".into(),
                reason: DisplayErrorContext(&err).to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::{ClaimPhase, HttpMethod, StorageClaim};
    use crate::store::InMemoryResourceStore;
    use crate::testing::ScriptedTransport;
    use assert_matches::assert_matches;
    use std::sync::Arc;

    const IMDS: &str = "http://169.254.169.254";

    fn claim(mode: &str) -> StorageClaim {
        StorageClaim {
            name: "data".into(),
            namespace: "default".into(),
            access_modes: vec![mode.into()],
            storage_class_name: Some("fast".into()),
            phase: ClaimPhase::Pending,
            capacity: None,
        }
    }

    fn provider(transport: ScriptedTransport) -> AwsProvider {
        AwsProvider::new(AwsConfig::default(), Arc::new(transport))
    }

    #[test]
    fn test_provisioner_table() {
        let aws = provider(ScriptedTransport::new());
        assert_eq!(
            aws.select_provisioner(AccessMode::ReadWriteOnce).unwrap(),
            "kubernetes.io/aws-ebs"
        );
        assert_matches!(
            aws.select_provisioner(AccessMode::ReadWriteMany),
            Err(Error::UnsupportedAccessPattern { .. })
        );
        assert_matches!(
            aws.select_provisioner(AccessMode::ReadOnlyMany),
            Err(Error::UnsupportedAccessPattern { .. })
        );
    }

    #[tokio::test]
    async fn test_load_metadata_reads_region() {
        let transport = Arc::new(
            ScriptedTransport::new()
                .on(HttpMethod::Put, &format!("{IMDS}/latest/api/token"), 200, "tok")
                .on_get(
                    &format!("{IMDS}/latest/dynamic/instance-identity/document"),
                    200,
                    r#"{"region": "eu-west-1", "instanceId": "i-123"}"#,
                ),
        );
        let mut aws = AwsProvider::new(AwsConfig::default(), transport.clone());
        aws.load_metadata().await.unwrap();
        assert_eq!(aws.region(), Some("eu-west-1"));

        let identity = transport
            .requests()
            .into_iter()
            .find(|r| r.method == HttpMethod::Get)
            .unwrap();
        assert!(identity
            .headers
            .contains(&("X-aws-ec2-metadata-token".to_string(), "tok".to_string())));

        // cached: no further calls
        aws.load_metadata().await.unwrap();
        assert_eq!(transport.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_single_writer_class_has_no_parameters() {
        let aws = provider(ScriptedTransport::new());
        let store = InMemoryResourceStore::new();

        let descriptor = aws
            .create_backend_class(&claim("ReadWriteOnce"), &store)
            .await
            .unwrap();
        assert_eq!(descriptor.provisioner, "kubernetes.io/aws-ebs");
        assert!(descriptor.parameters.is_empty());
        assert_eq!(store.writes(), 1);
    }

    #[tokio::test]
    async fn test_unsupported_mode_writes_nothing() {
        let aws = provider(ScriptedTransport::new());
        let store = InMemoryResourceStore::new();

        let result = aws.create_backend_class(&claim("ReadWriteMany"), &store).await;
        assert_matches!(result, Err(Error::UnsupportedAccessPattern { .. }));
        assert_eq!(store.writes(), 0);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_bucket_requires_metadata() {
        let aws = provider(ScriptedTransport::new());
        let bucket = BucketClaim {
            name: "store".into(),
            namespace: "default".into(),
            bucket_name: "backups".into(),
        };
        assert_matches!(aws.create_bucket(&bucket).await, Err(Error::Internal(_)));
    }
}
