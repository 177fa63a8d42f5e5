//! Object-Store Bucket Provisioner
//!
//! Hands an ObjectStore's bucket over to the active strategy. Each backend
//! treats an existing bucket it owns as success.

use crate::domain::ports::{BucketClaim, ProvisioningStrategy};
use crate::error::{Error, Result};
use tracing::info;

/// Creates buckets through a provisioning strategy
#[derive(Debug, Default, Clone, Copy)]
pub struct BucketProvisioner;

impl BucketProvisioner {
    pub fn new() -> Self {
        Self
    }

    /// Validate the bucket name, load backend metadata and create the bucket
    pub async fn create_bucket(
        &self,
        strategy: &mut dyn ProvisioningStrategy,
        claim: &BucketClaim,
    ) -> Result<()> {
        if !is_valid_bucket_name(&claim.bucket_name) {
            return Err(Error::InvalidBucketName {
                name: claim.bucket_name.clone(),
            });
        }

        strategy.load_metadata().await?;
        info!(
            "Creating bucket {} for {}/{} on {}",
            claim.bucket_name,
            claim.namespace,
            claim.name,
            strategy.backend()
        );
        strategy.create_bucket(claim).await
    }
}

/// Validate bucket name.
///
/// S3 rules narrowed to what every backend accepts: Azure containers reject
/// periods, so only lowercase letters, digits and hyphens are allowed.
pub fn is_valid_bucket_name(name: &str) -> bool {
    // Must be 3-63 characters
    if name.len() < 3 || name.len() > 63 {
        return false;
    }

    let alphanumeric = |c: char| c.is_ascii_lowercase() || c.is_ascii_digit();

    // Must start and end with lowercase letter or number
    if !name.chars().next().map(alphanumeric).unwrap_or(false)
        || !name.chars().last().map(alphanumeric).unwrap_or(false)
    {
        return false;
    }

    // Can only contain lowercase letters, numbers, and hyphens
    name.chars().all(|c| alphanumeric(c) || c == '-')
}
