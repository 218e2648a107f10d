use crate::{Error, Minecraft};
use common::InstanceKey;
use kube::ResourceExt;
use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family, histogram::Histogram},
    registry::{Registry, Unit},
};
use std::sync::Arc;
use tokio::time::Instant;

#[derive(Clone)]
pub struct Metrics {
    pub reconcile: ReconcileMetrics,
    pub sync: SyncMetrics,
    pub registry: Arc<Registry>,
}

impl Default for Metrics {
    fn default() -> Self {
        let mut registry = Registry::with_prefix("mcing");
        let reconcile = ReconcileMetrics::default().register(registry.sub_registry_with_prefix("reconcile"));
        let sync = SyncMetrics::default().register(registry.sub_registry_with_prefix("sync"));
        Self {
            registry: Arc::new(registry),
            reconcile,
            sync,
        }
    }
}

impl Metrics {
    /// OpenMetrics text exposition of every registered metric
    pub fn encode(&self) -> String {
        let mut buffer = String::new();
        if let Err(e) = prometheus_client::encoding::text::encode(&mut buffer, &self.registry) {
            tracing::error!("failed to encode metrics: {e}");
        }
        buffer
    }
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ErrorLabels {
    pub instance: String,
    pub error: String,
}

#[derive(Clone)]
pub struct ReconcileMetrics {
    pub runs: Counter,
    pub failures: Family<ErrorLabels, Counter>,
    pub duration: Histogram,
}

impl Default for ReconcileMetrics {
    fn default() -> Self {
        Self {
            runs: Counter::default(),
            failures: Family::<ErrorLabels, Counter>::default(),
            duration: Histogram::new([0.01, 0.1, 0.25, 0.5, 1., 5., 15., 60.].into_iter()),
        }
    }
}

impl ReconcileMetrics {
    /// Register API metrics to start tracking them.
    pub fn register(self, r: &mut Registry) -> Self {
        r.register_with_unit(
            "duration",
            "reconcile duration",
            Unit::Seconds,
            self.duration.clone(),
        );
        r.register("failures", "reconciliation errors", self.failures.clone());
        r.register("runs", "reconciliations", self.runs.clone());
        self
    }

    pub fn reconcile_failure(&self, mc: &Minecraft, e: &Error) {
        self.failures
            .get_or_create(&ErrorLabels {
                instance: format!("{}/{}", mc.namespace().unwrap_or_default(), mc.name_any()),
                error: e.metric_label(),
            })
            .inc();
    }

    pub fn count_and_measure(&self) -> ReconcileMeasurer {
        self.runs.inc();
        ReconcileMeasurer {
            start: Instant::now(),
            metric: self.duration.clone(),
        }
    }
}

#[derive(Clone, Default)]
pub struct SyncMetrics {
    pub passes: Counter,
    pub failures: Family<ErrorLabels, Counter>,
}

impl SyncMetrics {
    pub fn register(self, r: &mut Registry) -> Self {
        r.register("passes", "live sync passes", self.passes.clone());
        r.register("failures", "live sync pass errors", self.failures.clone());
        self
    }

    pub fn sync_failure(&self, key: &InstanceKey, e: &Error) {
        self.failures
            .get_or_create(&ErrorLabels {
                instance: key.to_string(),
                error: e.metric_label(),
            })
            .inc();
    }
}

/// Smart function duration measurer
///
/// Relies on Drop to calculate duration and register the observation in the histogram
pub struct ReconcileMeasurer {
    start: Instant,
    metric: Histogram,
}

impl Drop for ReconcileMeasurer {
    fn drop(&mut self) {
        #[allow(clippy::cast_precision_loss)]
        let duration = self.start.elapsed().as_millis() as f64 / 1000.0;
        self.metric.observe(duration);
    }
}
