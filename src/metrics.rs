//! Dispatch metrics
//!
//! Prometheus counters and a latency histogram for claim events, exposed by
//! the metrics server in `main.rs`.

use crate::domain::ports::ClaimEvent;
use crate::error::{Error, Result};
use prometheus::{histogram_opts, opts, HistogramVec, IntCounter, IntCounterVec, Registry};
use tokio::time::Instant;

#[derive(Clone)]
pub struct Metrics {
    pub dispatches: IntCounter,
    pub failures: IntCounterVec,
    pub dispatch_duration: HistogramVec,
}

fn metric_error(e: prometheus::Error) -> Error {
    Error::Internal(format!("metrics: {}", e))
}

impl Metrics {
    pub fn new() -> Result<Self> {
        let dispatch_duration = HistogramVec::new(
            histogram_opts!(
                "pvc_operator_dispatch_duration_seconds",
                "The duration of claim event handling in seconds",
            )
            .buckets(vec![0.01, 0.1, 0.25, 0.5, 1., 5., 15., 60., 300.]),
            &["kind"],
        )
        .map_err(metric_error)?;
        let failures = IntCounterVec::new(
            opts!("pvc_operator_dispatch_errors_total", "claim events that failed"),
            &["kind", "error"],
        )
        .map_err(metric_error)?;
        let dispatches = IntCounter::new("pvc_operator_dispatches_total", "claim events handled")
            .map_err(metric_error)?;

        Ok(Metrics {
            dispatches,
            failures,
            dispatch_duration,
        })
    }

    /// Register the metrics to start tracking them
    pub fn register(self, registry: &Registry) -> Result<Self> {
        registry
            .register(Box::new(self.dispatch_duration.clone()))
            .map_err(metric_error)?;
        registry
            .register(Box::new(self.failures.clone()))
            .map_err(metric_error)?;
        registry
            .register(Box::new(self.dispatches.clone()))
            .map_err(metric_error)?;
        Ok(self)
    }

    pub fn dispatch_failure(&self, event: &ClaimEvent, e: &Error) {
        self.failures
            .with_label_values(&[event.kind(), e.metric_label()])
            .inc()
    }

    pub fn count_and_measure(&self, event: &ClaimEvent) -> DispatchMeasurer {
        self.dispatches.inc();
        DispatchMeasurer {
            start: Instant::now(),
            metric: self.dispatch_duration.clone(),
            kind: event.kind(),
        }
    }
}

/// Records the time until it is dropped in the duration histogram
pub struct DispatchMeasurer {
    start: Instant,
    metric: HistogramVec,
    kind: &'static str,
}

impl Drop for DispatchMeasurer {
    fn drop(&mut self) {
        #[allow(clippy::cast_precision_loss)]
        let duration = self.start.elapsed().as_millis() as f64 / 1000.0;
        self.metric.with_label_values(&[self.kind]).observe(duration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatch_counters() {
        let registry = Registry::new();
        let metrics = Metrics::new().unwrap().register(&registry).unwrap();

        {
            let _measure = metrics.count_and_measure(&ClaimEvent::Other);
        }
        metrics.dispatch_failure(&ClaimEvent::Other, &Error::NoBackendDetected);

        assert_eq!(metrics.dispatches.get(), 1);
        assert_eq!(
            metrics
                .failures
                .with_label_values(&["Other", "no_backend_detected"])
                .get(),
            1
        );
        assert_eq!(
            metrics
                .dispatch_duration
                .with_label_values(&["Other"])
                .get_sample_count(),
            1
        );

        let names: Vec<String> = registry
            .gather()
            .iter()
            .map(|f| f.get_name().to_string())
            .collect();
        assert!(names.contains(&"pvc_operator_dispatches_total".to_string()));
    }

    #[test]
    fn test_register_twice_fails() {
        let registry = Registry::new();
        let metrics = Metrics::new().unwrap();
        metrics.clone().register(&registry).unwrap();
        assert!(metrics.register(&registry).is_err());
    }
}
