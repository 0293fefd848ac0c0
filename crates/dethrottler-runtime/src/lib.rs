// Allow unused assignments for diagnostic fields - they're used by the thiserror/miette macros
#![allow(unused_assignments)]

pub mod api_client;
pub mod controller;
pub mod error;
pub mod load;
pub mod metrics;
pub mod metrics_server;
pub mod mock;
pub mod state_machine;
pub mod taint_store;
pub mod threshold;
pub mod traits;

// Re-export primary types
pub use error::{Result, RuntimeError};
pub use traits::{LoadSampler, TaintStore};

// Re-export load sampling and evaluation
pub use load::{detect_cpu_count, normalize, parse_loadavg, ProcLoadSampler};
pub use threshold::{evaluate, Verdict};

// Re-export taint store implementations
pub use api_client::ApiClient;
pub use mock::{MockCallCounts, MockTaintStore, StaticLoadSampler};
pub use taint_store::ApiTaintStore;

// Re-export controller types
pub use controller::{Controller, ControllerConfig};
pub use state_machine::{reconcile, ControllerState, TaintAction, TaintStateMachine};

// Re-export metrics
pub use metrics::{MetricsSink, NoopMetrics, OperationOutcome, PrometheusMetrics, TaintOperation};
pub use metrics_server::MetricsServer;
