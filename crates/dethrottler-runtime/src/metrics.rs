use crate::error::{Result, RuntimeError};
use crate::threshold::Verdict;
use dethrottler_core::{LoadAverages, LoadPeriod};
use prometheus::{Encoder, GaugeVec, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry, TextEncoder};
use std::collections::HashMap;
use std::fmt;

/// Node taint mutation kinds, used as a metric label
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaintOperation {
    Apply,
    Remove,
}

impl TaintOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaintOperation::Apply => "apply",
            TaintOperation::Remove => "remove",
        }
    }
}

impl fmt::Display for TaintOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationOutcome {
    Success,
    Failure,
}

impl OperationOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationOutcome::Success => "success",
            OperationOutcome::Failure => "failure",
        }
    }
}

/// Receiver for the controller's observability events
///
/// Passed explicitly to the controller instead of living in a process-wide
/// registry. Outputs are read-only; nothing in the control loop reads them back.
pub trait MetricsSink: Send + Sync {
    /// Normalized load for each period
    fn observe_load(&self, normalized: &LoadAverages);

    /// Per-period threshold-exceeded flags
    fn observe_verdict(&self, verdict: &Verdict);

    /// Whether the controller believes the taint is applied
    fn set_tainted(&self, tainted: bool);

    /// Count one apply/remove attempt by outcome
    fn record_taint_operation(&self, operation: TaintOperation, outcome: OperationOutcome);
}

/// Sink that drops every event
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn observe_load(&self, _normalized: &LoadAverages) {}
    fn observe_verdict(&self, _verdict: &Verdict) {}
    fn set_tainted(&self, _tainted: bool) {}
    fn record_taint_operation(&self, _operation: TaintOperation, _outcome: OperationOutcome) {}
}

/// Prometheus-backed sink with its own registry.
///
/// Every series carries a constant `node` label. Exposed metrics:
/// - `dethrottler_load_average{period}` - Gauge
/// - `dethrottler_node_tainted` - Gauge (0/1)
/// - `dethrottler_taint_operations_total{operation, status}` - Counter
/// - `dethrottler_threshold_exceeded{period}` - Gauge (0/1)
#[derive(Clone)]
pub struct PrometheusMetrics {
    registry: Registry,
    load_average: GaugeVec,
    node_tainted: IntGauge,
    taint_operations: IntCounterVec,
    threshold_exceeded: IntGaugeVec,
}

impl PrometheusMetrics {
    pub fn new(node_name: &str) -> Result<Self> {
        let labels = HashMap::from([("node".to_string(), node_name.to_string())]);
        let registry = Registry::new_custom(Some("dethrottler".to_string()), Some(labels))
            .map_err(registration_error)?;

        let load_average = GaugeVec::new(
            Opts::new(
                "load_average",
                "Normalized load average (load / cpu cores) per period",
            ),
            &["period"],
        )
        .map_err(registration_error)?;

        let node_tainted = IntGauge::new(
            "node_tainted",
            "Whether the node is currently tainted (1 = tainted, 0 = not tainted)",
        )
        .map_err(registration_error)?;

        let taint_operations = IntCounterVec::new(
            Opts::new(
                "taint_operations_total",
                "Total number of taint apply/remove operations by outcome",
            ),
            &["operation", "status"],
        )
        .map_err(registration_error)?;

        let threshold_exceeded = IntGaugeVec::new(
            Opts::new(
                "threshold_exceeded",
                "Whether a period's threshold is exceeded (1 = exceeded, 0 = normal)",
            ),
            &["period"],
        )
        .map_err(registration_error)?;

        registry
            .register(Box::new(load_average.clone()))
            .map_err(registration_error)?;
        registry
            .register(Box::new(node_tainted.clone()))
            .map_err(registration_error)?;
        registry
            .register(Box::new(taint_operations.clone()))
            .map_err(registration_error)?;
        registry
            .register(Box::new(threshold_exceeded.clone()))
            .map_err(registration_error)?;

        Ok(Self {
            registry,
            load_average,
            node_tainted,
            taint_operations,
            threshold_exceeded,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Render all series in the Prometheus text exposition format
    pub fn render(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(|e| RuntimeError::internal_error(format!("failed to encode metrics: {}", e)))?;
        String::from_utf8(buffer)
            .map_err(|e| RuntimeError::internal_error(format!("metrics are not UTF-8: {}", e)))
    }
}

impl MetricsSink for PrometheusMetrics {
    fn observe_load(&self, normalized: &LoadAverages) {
        for period in LoadPeriod::ALL {
            self.load_average
                .with_label_values(&[period.label()])
                .set(normalized.get(period));
        }
    }

    fn observe_verdict(&self, verdict: &Verdict) {
        for period in LoadPeriod::ALL {
            self.threshold_exceeded
                .with_label_values(&[period.label()])
                .set(i64::from(verdict.is_exceeded(period)));
        }
    }

    fn set_tainted(&self, tainted: bool) {
        self.node_tainted.set(i64::from(tainted));
    }

    fn record_taint_operation(&self, operation: TaintOperation, outcome: OperationOutcome) {
        self.taint_operations
            .with_label_values(&[operation.as_str(), outcome.as_str()])
            .inc();
    }
}

fn registration_error(e: prometheus::Error) -> RuntimeError {
    RuntimeError::internal_error(format!("failed to register metrics: {}", e))
}
