//! Environment Prober
//!
//! Works out which cloud the operator runs in by asking each known instance
//! metadata endpoint in turn. The first endpoint that answers with anything
//! other than 404/405 wins, so the order of the probe list is the priority.

use crate::domain::ports::{CloudBackend, HttpRequest, HttpTransportRef};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

// =============================================================================
// Configuration
// =============================================================================

/// One metadata endpoint to probe
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeTarget {
    pub backend: CloudBackend,
    pub url: String,
}

impl ProbeTarget {
    pub fn new(backend: CloudBackend, url: impl Into<String>) -> Self {
        Self {
            backend,
            url: url.into(),
        }
    }

    /// Header the backend's metadata service expects
    fn header(&self) -> (&'static str, &'static str) {
        match self.backend {
            CloudBackend::Google => ("Metadata-Flavor", "Google"),
            CloudBackend::Azure | CloudBackend::Aws => ("Metadata", "true"),
        }
    }
}

/// Configuration for environment detection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProberConfig {
    /// Endpoints in priority order
    pub probes: Vec<ProbeTarget>,
    /// Per-request timeout for metadata calls
    pub timeout_secs: u64,
}

impl Default for ProberConfig {
    fn default() -> Self {
        Self {
            probes: vec![
                ProbeTarget::new(
                    CloudBackend::Azure,
                    "http://169.254.169.254/metadata/instance?api-version=2017-12-01",
                ),
                ProbeTarget::new(CloudBackend::Aws, "http://169.254.169.254/latest/meta-data/"),
                ProbeTarget::new(CloudBackend::Google, "http://169.254.169.254/0.1/meta-data/"),
            ],
            timeout_secs: 2,
        }
    }
}

// =============================================================================
// Environment Prober
// =============================================================================

/// Detects the active cloud backend
pub struct EnvironmentProber {
    probes: Vec<ProbeTarget>,
    transport: HttpTransportRef,
}

impl EnvironmentProber {
    pub fn new(config: &ProberConfig, transport: HttpTransportRef) -> Self {
        Self {
            probes: config.probes.clone(),
            transport,
        }
    }

    /// Probe the endpoints in order and return the first backend that answers
    pub async fn detect(&self) -> Result<CloudBackend> {
        for probe in &self.probes {
            let (name, value) = probe.header();
            let request = HttpRequest::get(probe.url.as_str()).header(name, value);

            match self.transport.send(request).await {
                Ok(response) if response.status == 404 || response.status == 405 => {
                    debug!(
                        "Metadata endpoint for {} answered {}, skipping",
                        probe.backend, response.status
                    );
                }
                Ok(response) => {
                    info!(
                        "Detected cloud provider {} (status {})",
                        probe.backend, response.status
                    );
                    return Ok(probe.backend);
                }
                Err(e) => {
                    debug!("Metadata endpoint for {} unreachable: {}", probe.backend, e);
                }
            }
        }

        Err(Error::NoBackendDetected)
    }
}
