use crate::metrics::{MetricsSink, OperationOutcome, TaintOperation};
use crate::threshold::Verdict;
use crate::traits::TaintStore;
use dethrottler_core::{format_duration, TaintDescriptor};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// What the controller believes about the node's taint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ControllerState {
    pub tainted: bool,
    /// Last time the taint was applied, or extended while already tainted
    pub last_taint_time: Option<Instant>,
}

impl ControllerState {
    pub fn clean() -> Self {
        Self::default()
    }

    pub fn tainted_at(now: Instant) -> Self {
        Self {
            tainted: true,
            last_taint_time: Some(now),
        }
    }
}

/// Outcome of one state machine step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaintAction {
    /// Overloaded while clean; the taint was applied
    Applied,
    /// Overloaded while clean; the apply failed and state is unchanged
    ApplyFailed,
    /// Overloaded while tainted; the cooldown window restarted
    Extended,
    /// Load is normal but the cooldown has not elapsed yet
    CoolingDown { remaining: Duration },
    /// Cooldown elapsed; the taint was removed
    Removed,
    /// Cooldown elapsed; the remove failed and state is unchanged
    RemoveFailed,
    /// Clean and not overloaded
    Idle,
}

/// Read the node's current taint status once, before the first poll.
///
/// A taint already present counts as freshly applied so a restart never lifts
/// it immediately. When the status cannot be read the controller starts clean;
/// the next overloaded tick re-applies, which is idempotent.
pub async fn reconcile(
    store: &dyn TaintStore,
    node_name: &str,
    descriptor: &TaintDescriptor,
    now: Instant,
) -> ControllerState {
    match store
        .has_taint(node_name, &descriptor.key, descriptor.effect)
        .await
    {
        Ok(true) => {
            info!(
                node = %node_name,
                taint = %descriptor,
                "Node is already tainted, starting cooldown from now"
            );
            ControllerState::tainted_at(now)
        }
        Ok(false) => {
            info!(node = %node_name, "Node is not tainted");
            ControllerState::clean()
        }
        Err(e) => {
            error!(
                node = %node_name,
                error = %e,
                "Failed to read initial taint status, assuming node is not tainted"
            );
            ControllerState::clean()
        }
    }
}

/// Applies and lifts the high-load taint from threshold verdicts
///
/// Transitions, per tick:
///
/// | state   | overloaded | cooldown elapsed | action                        |
/// |---------|------------|------------------|-------------------------------|
/// | clean   | yes        | -                | apply; on success taint now   |
/// | tainted | yes        | -                | restart cooldown              |
/// | tainted | no         | yes              | remove; on success go clean   |
/// | tainted | no         | no               | hold                          |
/// | clean   | no         | -                | nothing                       |
///
/// A failed store call leaves the state untouched so the next tick retries.
/// The cooldown comparison is inclusive: exactly `cooldown` after the last
/// taint time already allows removal.
pub struct TaintStateMachine {
    node_name: String,
    descriptor: TaintDescriptor,
    cooldown: Duration,
    state: ControllerState,
    store: Arc<dyn TaintStore>,
    metrics: Arc<dyn MetricsSink>,
}

impl TaintStateMachine {
    pub fn new(
        node_name: impl Into<String>,
        descriptor: TaintDescriptor,
        cooldown: Duration,
        initial: ControllerState,
        store: Arc<dyn TaintStore>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            node_name: node_name.into(),
            descriptor,
            cooldown,
            state: initial,
            store,
            metrics,
        }
    }

    pub fn state(&self) -> &ControllerState {
        &self.state
    }

    /// Advance the state machine with one verdict
    pub async fn step(&mut self, verdict: &Verdict, now: Instant) -> TaintAction {
        let action = match (self.state.tainted, verdict.overloaded) {
            (false, true) => self.apply(now).await,
            (true, true) => {
                self.state.last_taint_time = Some(now);
                info!(
                    node = %self.node_name,
                    "Threshold exceeded but node is already tainted, extending cooldown"
                );
                TaintAction::Extended
            }
            (true, false) => {
                let elapsed = self
                    .state
                    .last_taint_time
                    .map(|t| now.saturating_duration_since(t));
                match elapsed {
                    Some(elapsed) if elapsed < self.cooldown => {
                        let remaining = self.cooldown - elapsed;
                        info!(
                            node = %self.node_name,
                            remaining = %format_duration(remaining),
                            "Load is normal, waiting for cooldown before removing taint"
                        );
                        TaintAction::CoolingDown { remaining }
                    }
                    _ => self.remove().await,
                }
            }
            (false, false) => {
                debug!(node = %self.node_name, "All load averages within thresholds");
                TaintAction::Idle
            }
        };

        self.metrics.set_tainted(self.state.tainted);
        action
    }

    /// Remove the taint once on shutdown if it is believed applied.
    ///
    /// Not tied to any cancellation signal; the call is bounded by `timeout`
    /// only. Returns [`TaintAction::Idle`] when there was nothing to remove.
    pub async fn release(&mut self, timeout: Duration) -> TaintAction {
        if !self.state.tainted {
            debug!(node = %self.node_name, "Node is not tainted, nothing to clean up");
            return TaintAction::Idle;
        }

        info!(
            node = %self.node_name,
            taint = %self.descriptor,
            "Removing taint before exit"
        );

        let result = tokio::time::timeout(
            timeout,
            self.store
                .remove_taint(&self.node_name, &self.descriptor.key, self.descriptor.effect),
        )
        .await;

        let action = match result {
            Ok(Ok(())) => {
                self.state.tainted = false;
                self.metrics
                    .record_taint_operation(TaintOperation::Remove, OperationOutcome::Success);
                info!(node = %self.node_name, "Taint removed during shutdown");
                TaintAction::Removed
            }
            Ok(Err(e)) => {
                self.metrics
                    .record_taint_operation(TaintOperation::Remove, OperationOutcome::Failure);
                error!(
                    node = %self.node_name,
                    error = %e,
                    "Failed to remove taint during shutdown"
                );
                TaintAction::RemoveFailed
            }
            Err(_) => {
                self.metrics
                    .record_taint_operation(TaintOperation::Remove, OperationOutcome::Failure);
                error!(
                    node = %self.node_name,
                    timeout = %format_duration(timeout),
                    "Timed out removing taint during shutdown"
                );
                TaintAction::RemoveFailed
            }
        };

        self.metrics.set_tainted(self.state.tainted);
        action
    }

    async fn apply(&mut self, now: Instant) -> TaintAction {
        info!(
            node = %self.node_name,
            taint = %self.descriptor,
            "Threshold exceeded, applying taint"
        );

        match self
            .store
            .apply_taint(
                &self.node_name,
                &self.descriptor.key,
                self.descriptor.value(),
                self.descriptor.effect,
            )
            .await
        {
            Ok(()) => {
                self.state = ControllerState::tainted_at(now);
                self.metrics
                    .record_taint_operation(TaintOperation::Apply, OperationOutcome::Success);
                info!(node = %self.node_name, "Taint {} applied", self.descriptor.key);
                TaintAction::Applied
            }
            Err(e) => {
                self.metrics
                    .record_taint_operation(TaintOperation::Apply, OperationOutcome::Failure);
                warn!(
                    node = %self.node_name,
                    error = %e,
                    retryable = e.is_retryable(),
                    "Failed to apply taint, will retry on the next poll"
                );
                TaintAction::ApplyFailed
            }
        }
    }

    async fn remove(&mut self) -> TaintAction {
        info!(
            node = %self.node_name,
            taint = %self.descriptor,
            "Cooldown elapsed and load is normal, removing taint"
        );

        match self
            .store
            .remove_taint(&self.node_name, &self.descriptor.key, self.descriptor.effect)
            .await
        {
            Ok(()) => {
                self.state.tainted = false;
                self.metrics
                    .record_taint_operation(TaintOperation::Remove, OperationOutcome::Success);
                info!(node = %self.node_name, "Taint {} removed", self.descriptor.key);
                TaintAction::Removed
            }
            Err(e) => {
                self.metrics
                    .record_taint_operation(TaintOperation::Remove, OperationOutcome::Failure);
                warn!(
                    node = %self.node_name,
                    error = %e,
                    retryable = e.is_retryable(),
                    "Failed to remove taint, will retry on the next poll"
                );
                TaintAction::RemoveFailed
            }
        }
    }
}
