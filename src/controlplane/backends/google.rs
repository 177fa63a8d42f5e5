//! Google Cloud Provisioning Strategy
//!
//! Persistent disks for single-writer and read-only claims, GCS buckets for
//! ObjectStores. Credentials come from the instance's default service account.

use super::{call_failed, metadata_not_loaded, AccessToken};
use crate::domain::ports::{
    unsupported, AccessMode, BucketClaim, CloudBackend, HttpRequest, HttpTransportRef,
    ProvisioningStrategy,
};
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use tracing::{debug, info};

pub const GCE_PD_PROVISIONER: &str = "kubernetes.io/gce-pd";

/// Configuration for the Google strategy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GoogleConfig {
    /// Compute metadata server
    pub metadata_endpoint: String,
    /// Cloud Storage JSON API endpoint
    pub storage_endpoint: String,
}

impl Default for GoogleConfig {
    fn default() -> Self {
        Self {
            metadata_endpoint: "http://metadata.google.internal".to_string(),
            storage_endpoint: "https://storage.googleapis.com".to_string(),
        }
    }
}

/// Provisioning strategy for Google Cloud
pub struct GoogleProvider {
    config: GoogleConfig,
    transport: HttpTransportRef,
    project_id: Option<String>,
}

impl GoogleProvider {
    pub fn new(config: GoogleConfig, transport: HttpTransportRef) -> Self {
        Self {
            config,
            transport,
            project_id: None,
        }
    }

    /// Project read by `load_metadata`
    pub fn project_id(&self) -> Option<&str> {
        self.project_id.as_deref()
    }

    fn metadata_request(&self, path: &str) -> HttpRequest {
        HttpRequest::get(format!(
            "{}/computeMetadata/v1/{}",
            self.config.metadata_endpoint, path
        ))
        .header("Metadata-Flavor", "Google")
    }

    async fn token(&self) -> Result<String> {
        let response = self
            .transport
            .send(self.metadata_request("instance/service-accounts/default/token"))
            .await?;
        if !response.is_success() {
            return Err(call_failed(CloudBackend::Google, "authenticate", &response));
        }
        Ok(response.json::<AccessToken>()?.access_token)
    }

    /// Succeeds when an existing bucket is readable with our credentials
    async fn confirm_bucket(&self, bucket: &str, token: &str) -> Result<()> {
        let request = HttpRequest::get(format!(
            "{}/storage/v1/b/{}",
            self.config.storage_endpoint,
            urlencoding::encode(bucket)
        ))
        .bearer(token);

        let response = self.transport.send(request).await?;
        if response.is_success() {
            info!("GCS bucket {} already exists", bucket);
            return Ok(());
        }
        Err(Error::BackendCall {
            backend: CloudBackend::Google.to_string(),
            operation: "create_bucket".to_string(),
            reason: format!(
                "bucket {} exists but is owned by another project (status {})",
                bucket, response.status
            ),
        })
    }
}

#[async_trait]
impl ProvisioningStrategy for GoogleProvider {
    fn backend(&self) -> CloudBackend {
        CloudBackend::Google
    }

    async fn load_metadata(&mut self) -> Result<()> {
        if self.project_id.is_some() {
            return Ok(());
        }
        info!("Getting Metadata from service");

        let response = self
            .transport
            .send(self.metadata_request("project/project-id"))
            .await?;
        if !response.is_success() {
            return Err(call_failed(CloudBackend::Google, "project_id", &response));
        }
        let project_id = response.body.trim().to_string();
        debug!("Running in Google project {}", project_id);
        self.project_id = Some(project_id);
        Ok(())
    }

    fn select_provisioner(&self, access_mode: AccessMode) -> Result<&'static str> {
        match access_mode {
            AccessMode::ReadWriteOnce | AccessMode::ReadOnlyMany => Ok(GCE_PD_PROVISIONER),
            AccessMode::ReadWriteMany => Err(unsupported(CloudBackend::Google, access_mode)),
        }
    }

    async fn select_parameters(&self, access_mode: AccessMode) -> Result<BTreeMap<String, String>> {
        match access_mode {
            AccessMode::ReadWriteOnce | AccessMode::ReadOnlyMany => Ok(BTreeMap::new()),
            AccessMode::ReadWriteMany => Err(unsupported(CloudBackend::Google, access_mode)),
        }
    }

    async fn create_bucket(&self, claim: &BucketClaim) -> Result<()> {
        let project = self
            .project_id
            .as_deref()
            .ok_or_else(|| metadata_not_loaded(CloudBackend::Google))?;
        info!("Creating GCS bucket {} in project {}", claim.bucket_name, project);

        let token = self.token().await?;
        let request = HttpRequest::post(
            format!(
                "{}/storage/v1/b?project={}",
                self.config.storage_endpoint,
                urlencoding::encode(project)
            ),
            json!({ "name": claim.bucket_name }),
        )
        .bearer(&token);

        let response = self.transport.send(request).await?;
        match response.status {
            200 | 201 => {
                info!("GCS bucket {} created", claim.bucket_name);
                Ok(())
            }
            // bucket names are global; a conflict only counts if the bucket is ours
            409 => self.confirm_bucket(&claim.bucket_name, &token).await,
            _ => Err(call_failed(CloudBackend::Google, "create_bucket", &response)),
        }
    }
}
