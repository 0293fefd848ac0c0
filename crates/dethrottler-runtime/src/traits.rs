use crate::error::Result;
use async_trait::async_trait;
use dethrottler_core::{LoadAverages, TaintEffect};

/// Source of raw kernel load averages
///
/// Injected into the controller so tests can script load without touching
/// `/proc`. `ProcLoadSampler` is the real implementation.
pub trait LoadSampler: Send + Sync {
    /// Read the current 1/5/15-minute load averages
    fn sample(&self) -> Result<LoadAverages>;

    /// Number of logical CPUs usable by this process. Read once at startup.
    fn cpu_count(&self) -> u32;
}

/// Node taint operations against the cluster's node registry
///
/// The registry is shared with the scheduler and other controllers, so
/// implementations must read-modify-write against the latest node and fail
/// with a retryable error on concurrent modification instead of overwriting.
/// Taints are identified by `(key, effect)`; the value never takes part in
/// matching.
#[async_trait]
pub trait TaintStore: Send + Sync {
    /// Whether the node carries a taint with this key and effect
    async fn has_taint(&self, node_name: &str, key: &str, effect: TaintEffect) -> Result<bool>;

    /// Add the taint, or update its value in place. Applying the same
    /// key/value/effect twice leaves the node as if applied once.
    async fn apply_taint(
        &self,
        node_name: &str,
        key: &str,
        value: &str,
        effect: TaintEffect,
    ) -> Result<()>;

    /// Remove the taint. Removing an absent taint succeeds without a write.
    async fn remove_taint(&self, node_name: &str, key: &str, effect: TaintEffect) -> Result<()>;
}
