//! Claim Controllers
//!
//! Runs the PersistentVolumeClaim and ObjectStore reconcilers on the kube
//! controller runtime. A failed dispatch is requeued according to
//! [`Error::action`], so transient cloud or API errors are retried without
//! waiting for the object to change.

use crate::controlplane::ClaimDispatcher;
use crate::crd::ObjectStore;
use crate::domain::ports::ClaimEvent;
use crate::error::{Error, ErrorAction, Result};
use crate::metrics::Metrics;
use futures::StreamExt;
use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use kube::runtime::controller::{Action, Controller};
use kube::runtime::watcher;
use kube::{Api, Client, ResourceExt};
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Delay before retrying an error that asks for backoff
pub const BACKOFF_REQUEUE: Duration = Duration::from_secs(30);

// =============================================================================
// Context
// =============================================================================

/// State shared by both reconcilers
pub struct Context {
    pub dispatcher: ClaimDispatcher,
    pub metrics: Metrics,
    /// Held for the whole of a dispatch so events are handled one at a time
    serial: Mutex<()>,
}

impl Context {
    pub fn new(dispatcher: ClaimDispatcher, metrics: Metrics) -> Self {
        Self {
            dispatcher,
            metrics,
            serial: Mutex::new(()),
        }
    }

    async fn handle(&self, event: ClaimEvent) -> Result<Action> {
        let _serial = self.serial.lock().await;
        let _measure = self.metrics.count_and_measure(&event);

        match self.dispatcher.dispatch(&event).await {
            Ok(()) => {
                debug!("{} event handled", event.kind());
                Ok(Action::await_change())
            }
            Err(e) => {
                self.metrics.dispatch_failure(&event, &e);
                Err(e)
            }
        }
    }
}

// =============================================================================
// Reconcilers
// =============================================================================

pub async fn reconcile_claim(pvc: Arc<PersistentVolumeClaim>, ctx: Arc<Context>) -> Result<Action> {
    ctx.handle(ClaimEvent::from(pvc.as_ref())).await
}

pub async fn reconcile_object_store(store: Arc<ObjectStore>, ctx: Arc<Context>) -> Result<Action> {
    ctx.handle(ClaimEvent::from(store.as_ref())).await
}

/// How the controller reschedules an object whose dispatch failed
pub fn requeue_action(error: &Error) -> Action {
    match error.action() {
        ErrorAction::RequeueWithBackoff => Action::requeue(BACKOFF_REQUEUE),
        ErrorAction::RequeueAfter(delay) => Action::requeue(delay),
        ErrorAction::NoRequeue => Action::await_change(),
    }
}

fn error_policy<K: ResourceExt>(obj: Arc<K>, error: &Error, _ctx: Arc<Context>) -> Action {
    let name = format!("{}/{}", obj.namespace().unwrap_or_default(), obj.name_any());
    if error.is_retryable() {
        warn!("reconcile of {} failed, will retry: {}", name, error);
    } else {
        error!("reconcile of {} failed: {}", name, error);
    }
    requeue_action(error)
}

// =============================================================================
// Controller Runtime
// =============================================================================

/// Run both controllers until they stop or a shutdown signal arrives
pub async fn run(client: Client, namespace: &str, ctx: Arc<Context>) {
    let claims = Controller::new(
        Api::<PersistentVolumeClaim>::namespaced(client.clone(), namespace),
        watcher::Config::default(),
    )
    .shutdown_on_signal()
    .run(reconcile_claim, error_policy, ctx.clone())
    .for_each(|result| async move { log_outcome(result) });

    let object_stores = Controller::new(
        Api::<ObjectStore>::namespaced(client, namespace),
        watcher::Config::default(),
    )
    .shutdown_on_signal()
    .run(reconcile_object_store, error_policy, ctx)
    .for_each(|result| async move { log_outcome(result) });

    info!("Watching PersistentVolumeClaims and ObjectStores in {}", namespace);
    futures::join!(claims, object_stores);
}

fn log_outcome<T: Debug, E: std::error::Error>(result: std::result::Result<T, E>) {
    match result {
        Ok(object) => debug!("reconciled {:?}", object),
        Err(e) => warn!("controller error: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controlplane::{OperatorConfig, ProbeTarget, ProberConfig};
    use crate::domain::ports::{CloudBackend, HttpMethod};
    use crate::store::InMemoryResourceStore;
    use crate::testing::ScriptedTransport;
    use k8s_openapi::api::core::v1::{PersistentVolumeClaimSpec, PersistentVolumeClaimStatus};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    const AWS_METADATA: &str = "http://169.254.169.254/latest/meta-data/";

    fn context(transport: ScriptedTransport) -> Arc<Context> {
        let config = OperatorConfig {
            prober: ProberConfig {
                probes: vec![ProbeTarget::new(CloudBackend::Aws, AWS_METADATA)],
                timeout_secs: 1,
            },
            ..Default::default()
        };
        let transport = Arc::new(transport);
        let dispatcher = ClaimDispatcher::new(
            config,
            Arc::new(InMemoryResourceStore::new()),
            transport.clone(),
            transport,
            None,
        );
        Arc::new(Context::new(dispatcher, Metrics::new().unwrap()))
    }

    fn pvc(phase: &str) -> Arc<PersistentVolumeClaim> {
        Arc::new(PersistentVolumeClaim {
            metadata: ObjectMeta {
                name: Some("data".into()),
                namespace: Some("apps".into()),
                ..Default::default()
            },
            spec: Some(PersistentVolumeClaimSpec {
                access_modes: Some(vec!["ReadWriteOnce".into()]),
                storage_class_name: Some("standard".into()),
                ..Default::default()
            }),
            status: Some(PersistentVolumeClaimStatus {
                phase: Some(phase.into()),
                ..Default::default()
            }),
        })
    }

    #[test]
    fn test_requeue_action_follows_error_action() {
        let transient = Error::BackendCall {
            backend: "aws".into(),
            operation: "create_bucket".into(),
            reason: "status 503".into(),
        };
        assert_eq!(requeue_action(&transient), Action::requeue(BACKOFF_REQUEUE));

        assert_eq!(
            requeue_action(&Error::NoBackendDetected),
            Action::requeue(Duration::from_secs(60))
        );

        let claim_error = Error::InvalidBucketName {
            name: "Bad_Name".into(),
        };
        assert_eq!(requeue_action(&claim_error), Action::await_change());
    }

    #[tokio::test]
    async fn test_bound_claim_awaits_change() {
        let ctx = context(ScriptedTransport::new());
        let action = reconcile_claim(pvc("Bound"), ctx.clone()).await.unwrap();
        assert_eq!(action, Action::await_change());
        assert_eq!(ctx.metrics.dispatches.get(), 1);
    }

    #[tokio::test]
    async fn test_undetected_cloud_is_requeued() {
        let ctx = context(ScriptedTransport::new().unreachable(HttpMethod::Get, AWS_METADATA));

        let error = reconcile_claim(pvc("Pending"), ctx.clone())
            .await
            .unwrap_err();
        assert!(matches!(error, Error::NoBackendDetected));
        assert_eq!(
            error_policy(pvc("Pending"), &error, ctx.clone()),
            Action::requeue(Duration::from_secs(60))
        );
        assert_eq!(
            ctx.metrics
                .failures
                .with_label_values(&["PersistentVolumeClaim", "no_backend_detected"])
                .get(),
            1
        );

        // a retry runs the whole dispatch again
        reconcile_claim(pvc("Pending"), ctx.clone())
            .await
            .unwrap_err();
        assert_eq!(ctx.metrics.dispatches.get(), 2);
    }
}
