//! PVC Operator
//!
//! Watches PersistentVolumeClaims and ObjectStores and provisions the storage
//! classes, NFS gateways and buckets they need.

use clap::Parser;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::{Api, Client};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use pvc_operator::controller::{self, Context};
use pvc_operator::{
    ClaimDispatcher, Error, KubeResourceStore, Metrics, OperatorConfig, ReqwestTransport, Result,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// PVC Operator - cloud-aware storage provisioning for pending claims
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// YAML configuration file
    #[arg(long, env = "CONFIG")]
    config: Option<String>,

    /// Namespace to watch for claims
    #[arg(long, env = "WATCH_NAMESPACE", default_value = "default")]
    namespace: String,

    /// Health server bind address
    #[arg(long, env = "HEALTH_ADDR", default_value = "0.0.0.0:8081")]
    health_addr: String,

    /// Metrics server bind address
    #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:8080")]
    metrics_addr: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,

    /// Deployment running this operator; gateway resources are owned by it
    #[arg(long, env = "OPERATOR_NAME")]
    owner_deployment: Option<String>,

    /// Namespace of the operator's own Deployment
    #[arg(long, env = "POD_NAMESPACE")]
    pod_namespace: Option<String>,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    init_logging(&args);

    info!("Starting PVC Operator");
    info!("  Version: {}", pvc_operator::VERSION);
    info!("  Watch namespace: {}", args.namespace);

    let config = match &args.config {
        Some(path) => {
            info!("  Config: {}", path);
            OperatorConfig::load_from_file(path)?
        }
        None => OperatorConfig::default(),
    };
    config.validate()?;

    let client = Client::try_default().await?;
    let owner = resolve_owner(&client, &args).await;

    let metrics = Metrics::new()?.register(prometheus::default_registry())?;
    let detect_timeout = Duration::from_secs(config.prober.timeout_secs.max(1));
    let api_timeout = Duration::from_secs(config.backends.timeout_secs);
    let dispatcher = ClaimDispatcher::new(
        config,
        Arc::new(KubeResourceStore::new(client.clone())),
        Arc::new(ReqwestTransport::new(detect_timeout)?),
        Arc::new(ReqwestTransport::new(api_timeout)?),
        owner,
    );
    let ctx = Arc::new(Context::new(dispatcher, metrics));

    // Start health server
    let health_addr = args.health_addr.clone();
    tokio::spawn(async move {
        if let Err(e) = run_health_server(&health_addr).await {
            error!("Health server error: {}", e);
        }
    });

    // Start metrics server
    let metrics_addr = args.metrics_addr.clone();
    tokio::spawn(async move {
        if let Err(e) = run_metrics_server(&metrics_addr).await {
            error!("Metrics server error: {}", e);
        }
    });

    // Returns once both controllers have stopped on a shutdown signal
    controller::run(client, &args.namespace, ctx).await;

    info!("Operator shutdown complete");
    Ok(())
}

// =============================================================================
// Owner Reference
// =============================================================================

/// Owner reference to the operator's Deployment, if it can be found
async fn resolve_owner(client: &Client, args: &Args) -> Option<OwnerReference> {
    let (Some(name), Some(namespace)) = (&args.owner_deployment, &args.pod_namespace) else {
        info!("Owner deployment not configured, gateway resources will have no owner");
        return None;
    };

    match Api::<Deployment>::namespaced(client.clone(), namespace).get(name).await {
        Ok(deployment) => {
            let uid = deployment.metadata.uid?;
            info!("Gateway resources will be owned by Deployment {}/{}", namespace, name);
            Some(OwnerReference {
                api_version: "apps/v1".to_string(),
                kind: "Deployment".to_string(),
                name: name.clone(),
                uid,
                controller: Some(true),
                block_owner_deletion: Some(true),
            })
        }
        Err(e) => {
            warn!("Could not read Deployment {}/{}: {}", namespace, name, e);
            None
        }
    }
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "{},hyper=warn,kube=info,aws_config=warn,aws_smithy_runtime=warn",
            level
        ))
    });

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}

// =============================================================================
// Health Server
// =============================================================================

async fn run_health_server(addr: &str) -> Result<()> {
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{Body, Request, Response, Server, StatusCode};

    let make_svc = make_service_fn(|_conn| async {
        Ok::<_, std::convert::Infallible>(service_fn(|req: Request<Body>| async move {
            let response = match req.uri().path() {
                "/healthz" | "/livez" | "/readyz" => Response::new(Body::from("ok")),
                _ => {
                    let mut response = Response::new(Body::from("not found"));
                    *response.status_mut() = StatusCode::NOT_FOUND;
                    response
                }
            };
            Ok::<_, std::convert::Infallible>(response)
        }))
    });

    let addr: SocketAddr = addr.parse().map_err(|e| {
        Error::Configuration(format!("Invalid health server address: {}", e))
    })?;

    info!("Health server listening on {}", addr);
    Server::bind(&addr)
        .serve(make_svc)
        .await
        .map_err(|e| Error::Internal(format!("Health server error: {}", e)))?;

    Ok(())
}

// =============================================================================
// Metrics Server
// =============================================================================

async fn run_metrics_server(addr: &str) -> Result<()> {
    use hyper::header::CONTENT_TYPE;
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{Body, Request, Response, Server, StatusCode};
    use prometheus::{Encoder, TextEncoder};

    let make_svc = make_service_fn(|_conn| async {
        Ok::<_, std::convert::Infallible>(service_fn(|req: Request<Body>| async move {
            let response = match req.uri().path() {
                "/metrics" => {
                    let encoder = TextEncoder::new();
                    let mut buffer = Vec::new();
                    match encoder.encode(&prometheus::gather(), &mut buffer) {
                        Ok(()) => {
                            let mut response = Response::new(Body::from(buffer));
                            if let Ok(value) = encoder.format_type().parse() {
                                response.headers_mut().insert(CONTENT_TYPE, value);
                            }
                            response
                        }
                        Err(e) => {
                            let mut response = Response::new(Body::from(e.to_string()));
                            *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
                            response
                        }
                    }
                }
                _ => {
                    let mut response = Response::new(Body::from("not found"));
                    *response.status_mut() = StatusCode::NOT_FOUND;
                    response
                }
            };
            Ok::<_, std::convert::Infallible>(response)
        }))
    });

    let addr: SocketAddr = addr.parse().map_err(|e| {
        Error::Configuration(format!("Invalid metrics server address: {}", e))
    })?;

    info!("Metrics server listening on {}", addr);
    Server::bind(&addr)
        .serve(make_svc)
        .await
        .map_err(|e| Error::Internal(format!("Metrics server error: {}", e)))?;

    Ok(())
}
