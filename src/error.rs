//! Error types for the PVC Operator
//!
//! Provides structured error types for environment detection, provisioning
//! strategies, the resource store and the NFS gateway.

use std::time::Duration;
use thiserror::Error;

/// Unified error type for the operator
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    // =========================================================================
    // Environment Detection Errors
    // =========================================================================
    #[error("Could not determine cloud provider: no metadata endpoint answered")]
    NoBackendDetected,

    // =========================================================================
    // Provisioning Errors
    // =========================================================================
    #[error("Access mode {access_mode} is not supported by {backend}")]
    UnsupportedAccessPattern { backend: String, access_mode: String },

    #[error("AccessMode is missing from claim {claim}")]
    MissingAccessMode { claim: String },

    #[error("Invalid bucket name: {name}")]
    InvalidBucketName { name: String },

    #[error("Invalid quantity {value:?}: {reason}")]
    InvalidQuantity { value: String, reason: String },

    // =========================================================================
    // Resource Store Errors
    // =========================================================================
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("Resource not found: {kind}/{name}")]
    NotFound { kind: String, name: String },

    #[error("Resource already exists: {kind}/{name}")]
    AlreadyExists { kind: String, name: String },

    #[error("Resource store error: {kind}/{name}: {reason}")]
    ResourceStore {
        kind: String,
        name: String,
        reason: String,
    },

    // =========================================================================
    // Backend Errors
    // =========================================================================
    #[error("Backend call failed: {backend} - {operation}: {reason}")]
    BackendCall {
        backend: String,
        operation: String,
        reason: String,
    },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    // =========================================================================
    // Parse Errors
    // =========================================================================
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Action to take on error during reconciliation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorAction {
    /// Requeue with exponential backoff
    RequeueWithBackoff,
    /// Requeue after specific duration
    RequeueAfter(Duration),
    /// Don't requeue, wait for changes
    NoRequeue,
}

impl Error {
    /// Determine what action to take for this error
    pub fn action(&self) -> ErrorAction {
        match self {
            // Transient errors - retry with backoff
            Error::Kube(_)
            | Error::Http(_)
            | Error::ResourceStore { .. }
            | Error::BackendCall { .. } => ErrorAction::RequeueWithBackoff,

            // Nothing answered; the node may still be coming up
            Error::NoBackendDetected => ErrorAction::RequeueAfter(Duration::from_secs(60)),

            // The claim itself is wrong - retrying reproduces the error
            Error::UnsupportedAccessPattern { .. }
            | Error::MissingAccessMode { .. }
            | Error::InvalidBucketName { .. }
            | Error::InvalidQuantity { .. }
            | Error::Configuration(_) => ErrorAction::NoRequeue,

            // All other errors - retry with backoff
            _ => ErrorAction::RequeueWithBackoff,
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        !matches!(self.action(), ErrorAction::NoRequeue)
    }

    /// Whether this is the recoverable "already exists" outcome of a create
    pub fn is_already_exists(&self) -> bool {
        match self {
            Error::AlreadyExists { .. } => true,
            Error::Kube(kube::Error::Api(response)) => response.code == 409,
            _ => false,
        }
    }

    /// Whether this error reports a missing resource
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::NotFound { .. } => true,
            Error::Kube(kube::Error::Api(response)) => response.code == 404,
            _ => false,
        }
    }

    /// Short label used for the error dimension of metrics
    pub fn metric_label(&self) -> &'static str {
        match self {
            Error::Internal(_) => "internal",
            Error::Configuration(_) => "configuration",
            Error::NoBackendDetected => "no_backend_detected",
            Error::UnsupportedAccessPattern { .. } => "unsupported_access_pattern",
            Error::MissingAccessMode { .. } => "missing_access_mode",
            Error::InvalidBucketName { .. } => "invalid_bucket_name",
            Error::InvalidQuantity { .. } => "invalid_quantity",
            Error::Kube(_) | Error::NotFound { .. } | Error::ResourceStore { .. } => {
                "resource_store"
            }
            Error::AlreadyExists { .. } => "already_exists",
            Error::BackendCall { .. } | Error::Http(_) => "backend_call",
            Error::Json(_) | Error::Yaml(_) => "parse",
        }
    }
}

/// Result type alias for the operator
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_actions() {
        let err = Error::UnsupportedAccessPattern {
            backend: "aws".into(),
            access_mode: "ReadWriteMany".into(),
        };
        assert_eq!(err.action(), ErrorAction::NoRequeue);

        let err = Error::NoBackendDetected;
        assert_eq!(
            err.action(),
            ErrorAction::RequeueAfter(Duration::from_secs(60))
        );

        let err = Error::BackendCall {
            backend: "azure".into(),
            operation: "create_storage_account".into(),
            reason: "timeout".into(),
        };
        assert_eq!(err.action(), ErrorAction::RequeueWithBackoff);
    }

    #[test]
    fn test_error_retryable() {
        let transient = Error::ResourceStore {
            kind: "StorageClass".into(),
            name: "fast".into(),
            reason: "connection reset".into(),
        };
        assert!(transient.is_retryable());

        let config_err = Error::Configuration("invalid".into());
        assert!(!config_err.is_retryable());
    }

    #[test]
    fn test_already_exists_from_api_conflict() {
        let conflict = Error::Kube(kube::Error::Api(kube::error::ErrorResponse {
            status: "Failure".into(),
            message: "storageclasses.storage.k8s.io \"fast\" already exists".into(),
            reason: "AlreadyExists".into(),
            code: 409,
        }));
        assert!(conflict.is_already_exists());
        assert!(!conflict.is_not_found());

        let missing = Error::NotFound {
            kind: "Service".into(),
            name: "nfs-provisioner".into(),
        };
        assert!(missing.is_not_found());
        assert!(!missing.is_already_exists());
    }
}
