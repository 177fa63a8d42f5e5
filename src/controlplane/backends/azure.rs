//! Azure Provisioning Strategy
//!
//! Managed disks for single-writer claims and Azure Files for shared access.
//! Azure Files storage classes name a storage account, which is created on
//! demand through the Azure Resource Manager API before the class is written.
//! ObjectStores become blob containers in that same account.

use super::{call_failed, metadata_not_loaded, AccessToken};
use crate::domain::ports::{
    AccessMode, BucketClaim, CloudBackend, HttpRequest, HttpTransportRef, ProvisioningStrategy,
};
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info};

pub const AZURE_DISK_PROVISIONER: &str = "kubernetes.io/azure-disk";
pub const AZURE_FILE_PROVISIONER: &str = "kubernetes.io/azure-file";

const STORAGE_ACCOUNT: &str = "storageAccount";
const LOCATION: &str = "location";
const SKU_NAME: &str = "skuName";
const KIND: &str = "kind";

const STORAGE_API_VERSION: &str = "2017-10-01";
const BLOB_API_VERSION: &str = "2019-12-12";
const MANAGEMENT_RESOURCE: &str = "https://management.azure.com/";
const STORAGE_RESOURCE: &str = "https://storage.azure.com/";

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the Azure strategy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AzureConfig {
    /// Instance metadata service
    pub metadata_endpoint: String,
    /// Azure Resource Manager endpoint
    pub management_endpoint: String,
    /// DNS suffix of blob endpoints
    pub blob_endpoint_suffix: String,
    /// Storage account backing Azure Files classes and blob containers
    pub storage_account: String,
    /// SKU for storage classes and new storage accounts
    pub sku_name: String,
    /// How often to check a new storage account before giving up
    pub poll_attempts: u32,
    pub poll_interval_secs: u64,
}

impl Default for AzureConfig {
    fn default() -> Self {
        Self {
            metadata_endpoint: "http://169.254.169.254".to_string(),
            management_endpoint: "https://management.azure.com".to_string(),
            blob_endpoint_suffix: "blob.core.windows.net".to_string(),
            storage_account: "banzaicloudtest".to_string(),
            sku_name: "Standard_LRS".to_string(),
            poll_attempts: 30,
            poll_interval_secs: 10,
        }
    }
}

/// Facts about the VM the operator runs on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AzureMetadata {
    pub location: String,
    pub subscription_id: String,
    pub resource_group_name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NameAvailability {
    name_available: bool,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccountProperties {
    #[serde(default)]
    provisioning_state: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StorageAccount {
    #[serde(default)]
    properties: AccountProperties,
}

// =============================================================================
// Azure Provider
// =============================================================================

/// Provisioning strategy for Azure
pub struct AzureProvider {
    config: AzureConfig,
    transport: HttpTransportRef,
    metadata: Option<AzureMetadata>,
}

impl AzureProvider {
    pub fn new(config: AzureConfig, transport: HttpTransportRef) -> Self {
        Self {
            config,
            transport,
            metadata: None,
        }
    }

    /// Metadata read by `load_metadata`
    pub fn metadata(&self) -> Option<&AzureMetadata> {
        self.metadata.as_ref()
    }

    fn loaded(&self) -> Result<&AzureMetadata> {
        self.metadata
            .as_ref()
            .ok_or_else(|| metadata_not_loaded(CloudBackend::Azure))
    }

    async fn compute_metadata(&self, field: &str) -> Result<String> {
        let request = HttpRequest::get(format!(
            "{}/metadata/instance/compute/{}?api-version=2017-12-01&format=text",
            self.config.metadata_endpoint, field
        ))
        .header("Metadata", "true");

        let response = self.transport.send(request).await?;
        if !response.is_success() {
            return Err(call_failed(CloudBackend::Azure, field, &response));
        }
        Ok(response.body.trim().to_string())
    }

    /// Managed identity token for `resource`
    async fn token(&self, resource: &str) -> Result<String> {
        debug!("Authenticating against {}", resource);
        let request = HttpRequest::get(format!(
            "{}/metadata/identity/oauth2/token?api-version=2018-02-01&resource={}",
            self.config.metadata_endpoint,
            urlencoding::encode(resource)
        ))
        .header("Metadata", "true");

        let response = self.transport.send(request).await?;
        if !response.is_success() {
            return Err(call_failed(CloudBackend::Azure, "authenticate", &response));
        }
        Ok(response.json::<AccessToken>()?.access_token)
    }

    fn account_url(&self, metadata: &AzureMetadata, account: &str) -> String {
        format!(
            "{}/subscriptions/{}/resourceGroups/{}/providers/Microsoft.Storage/storageAccounts/{}\
             ?api-version={}",
            self.config.management_endpoint,
            metadata.subscription_id,
            metadata.resource_group_name,
            account,
            STORAGE_API_VERSION
        )
    }

    /// Make sure `account` exists in our resource group, creating it if needed.
    ///
    /// Blocks until the account is provisioned. Nothing created here is
    /// rolled back on failure.
    pub async fn ensure_storage_account(&self, account: &str) -> Result<()> {
        let metadata = self.loaded()?;
        let token = self.token(MANAGEMENT_RESOURCE).await?;
        let account_url = self.account_url(metadata, account);

        let existing = self
            .transport
            .send(HttpRequest::get(account_url.as_str()).bearer(&token))
            .await?;
        match existing.status {
            200 => {
                debug!("Storage account {} already exists", account);
                return Ok(());
            }
            404 => {}
            _ => return Err(call_failed(CloudBackend::Azure, "get_storage_account", &existing)),
        }

        let availability = self
            .transport
            .send(
                HttpRequest::post(
                    format!(
                        "{}/subscriptions/{}/providers/Microsoft.Storage/checkNameAvailability\
                         ?api-version={}",
                        self.config.management_endpoint,
                        metadata.subscription_id,
                        STORAGE_API_VERSION
                    ),
                    json!({
                        "name": account,
                        "type": "Microsoft.Storage/storageAccounts",
                    }),
                )
                .bearer(&token),
            )
            .await?;
        if !availability.is_success() {
            return Err(call_failed(
                CloudBackend::Azure,
                "check_name_availability",
                &availability,
            ));
        }
        let availability: NameAvailability = availability.json()?;
        if !availability.name_available {
            return Err(Error::BackendCall {
                backend: CloudBackend::Azure.to_string(),
                operation: "check_name_availability".into(),
                reason: format!(
                    "storage account name not available [{}]: {}",
                    account,
                    availability.message.unwrap_or_default()
                ),
            });
        }

        info!("Creating storage account {} in {}", account, metadata.location);
        let created = self
            .transport
            .send(
                HttpRequest::put(
                    account_url.as_str(),
                    Some(json!({
                        "sku": { "name": self.config.sku_name },
                        "kind": "Storage",
                        "location": metadata.location,
                        "properties": {},
                    })),
                )
                .bearer(&token),
            )
            .await?;
        if !created.is_success() {
            return Err(call_failed(CloudBackend::Azure, "create_storage_account", &created));
        }

        self.wait_for_account(&account_url, &token, account).await
    }

    async fn wait_for_account(&self, account_url: &str, token: &str, account: &str) -> Result<()> {
        let interval = Duration::from_secs(self.config.poll_interval_secs);
        for attempt in 0..self.config.poll_attempts {
            let response = self
                .transport
                .send(HttpRequest::get(account_url).bearer(token))
                .await?;
            if response.status == 200 {
                let state = response.json::<StorageAccount>()?.properties.provisioning_state;
                if state.as_deref() == Some("Succeeded") {
                    info!("StorageAccount {} created", account);
                    return Ok(());
                }
                debug!(
                    "Storage account {} is {:?} (attempt {})",
                    account, state, attempt
                );
            }
            tokio::time::sleep(interval).await;
        }

        Err(Error::BackendCall {
            backend: CloudBackend::Azure.to_string(),
            operation: "create_storage_account".into(),
            reason: format!(
                "account {} not provisioned after {} checks",
                account, self.config.poll_attempts
            ),
        })
    }
}

#[async_trait]
impl ProvisioningStrategy for AzureProvider {
    fn backend(&self) -> CloudBackend {
        CloudBackend::Azure
    }

    async fn load_metadata(&mut self) -> Result<()> {
        if self.metadata.is_some() {
            return Ok(());
        }
        info!("Getting Metadata from service");

        let location = self.compute_metadata("location").await?;
        let subscription_id = self.compute_metadata("subscriptionId").await?;
        let resource_group_name = self.compute_metadata("resourceGroupName").await?;

        self.metadata = Some(AzureMetadata {
            location,
            subscription_id,
            resource_group_name,
        });
        Ok(())
    }

    fn select_provisioner(&self, access_mode: AccessMode) -> Result<&'static str> {
        match access_mode {
            AccessMode::ReadWriteOnce => Ok(AZURE_DISK_PROVISIONER),
            AccessMode::ReadWriteMany | AccessMode::ReadOnlyMany => Ok(AZURE_FILE_PROVISIONER),
        }
    }

    async fn select_parameters(&self, access_mode: AccessMode) -> Result<BTreeMap<String, String>> {
        let mut parameters = BTreeMap::new();
        match access_mode {
            AccessMode::ReadWriteOnce => {
                parameters.insert(SKU_NAME.to_string(), self.config.sku_name.clone());
                parameters.insert(KIND.to_string(), "managed".to_string());
            }
            AccessMode::ReadWriteMany | AccessMode::ReadOnlyMany => {
                let metadata = self.loaded()?;
                parameters.insert(LOCATION.to_string(), metadata.location.clone());
                parameters.insert(STORAGE_ACCOUNT.to_string(), self.config.storage_account.clone());
                parameters.insert(SKU_NAME.to_string(), self.config.sku_name.clone());
                self.ensure_storage_account(&self.config.storage_account).await?;
            }
        }
        Ok(parameters)
    }

    async fn create_bucket(&self, claim: &BucketClaim) -> Result<()> {
        let account = &self.config.storage_account;
        self.ensure_storage_account(account).await?;

        info!("Creating blob container {} in {}", claim.bucket_name, account);
        let token = self.token(STORAGE_RESOURCE).await?;
        let url = format!(
            "https://{}.{}/{}?restype=container",
            account,
            self.config.blob_endpoint_suffix,
            urlencoding::encode(&claim.bucket_name)
        );
        let response = self
            .transport
            .send(
                HttpRequest::put(url.clone(), None)
                    .header("x-ms-version", BLOB_API_VERSION)
                    .bearer(&token),
            )
            .await?;

        match response.status {
            200 | 201 => {
                info!("Blob container {} created", claim.bucket_name);
                Ok(())
            }
            // also returned while a container of that name is being deleted
            409 => {
                let existing = self
                    .transport
                    .send(
                        HttpRequest::get(url)
                            .header("x-ms-version", BLOB_API_VERSION)
                            .bearer(&token),
                    )
                    .await?;
                if !existing.is_success() {
                    return Err(Error::BackendCall {
                        backend: CloudBackend::Azure.to_string(),
                        operation: "create_container".to_string(),
                        reason: format!(
                            "container {} conflicts but cannot be read (status {})",
                            claim.bucket_name, existing.status
                        ),
                    });
                }
                info!("Blob container {} already exists", claim.bucket_name);
                Ok(())
            }
            _ => Err(call_failed(CloudBackend::Azure, "create_container", &response)),
        }
    }
}
