//! Cloud Provisioning Strategies
//!
//! Provides a `ProvisioningStrategy` for each supported cloud:
//! - Azure: managed disks and Azure Files
//! - AWS: EBS volumes and S3 buckets
//! - Google: persistent disks and GCS buckets

pub mod aws;
pub mod azure;
pub mod google;

pub use aws::*;
pub use azure::*;
pub use google::*;

use crate::domain::ports::{CloudBackend, HttpResponse, HttpTransportRef, ProvisioningStrategy};
use crate::error::Error;
use serde::{Deserialize, Serialize};

/// Factory for creating provisioning strategies
pub struct BackendFactory;

impl BackendFactory {
    /// Create the strategy for a detected backend
    pub fn create(
        backend: CloudBackend,
        config: &BackendConfig,
        transport: HttpTransportRef,
    ) -> Box<dyn ProvisioningStrategy> {
        match backend {
            CloudBackend::Azure => Box::new(AzureProvider::new(config.azure.clone(), transport)),
            CloudBackend::Aws => Box::new(AwsProvider::new(config.aws.clone(), transport)),
            CloudBackend::Google => Box::new(GoogleProvider::new(config.google.clone(), transport)),
        }
    }
}

/// Combined backend configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Per-request timeout for cloud management calls
    pub timeout_secs: u64,
    pub azure: AzureConfig,
    pub aws: AwsConfig,
    pub google: GoogleConfig,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            azure: AzureConfig::default(),
            aws: AwsConfig::default(),
            google: GoogleConfig::default(),
        }
    }
}

/// OAuth token as returned by the Azure and Google metadata services
#[derive(Debug, Deserialize)]
pub(crate) struct AccessToken {
    pub access_token: String,
}

/// Error for a backend call that answered with an unexpected status
pub(crate) fn call_failed(
    backend: CloudBackend,
    operation: &str,
    response: &HttpResponse,
) -> Error {
    Error::BackendCall {
        backend: backend.to_string(),
        operation: operation.to_string(),
        reason: format!("status {}: {}", response.status, response.body.trim()),
    }
}

/// Error for a call made before `load_metadata`
pub(crate) fn metadata_not_loaded(backend: CloudBackend) -> Error {
    Error::Internal(format!("{} metadata has not been loaded", backend))
}
