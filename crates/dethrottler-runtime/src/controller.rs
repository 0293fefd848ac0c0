use crate::error::{Result, RuntimeError};
use crate::load::normalize;
use crate::metrics::MetricsSink;
use crate::state_machine::{reconcile, ControllerState, TaintAction, TaintStateMachine};
use crate::threshold::evaluate;
use crate::traits::{LoadSampler, TaintStore};
use dethrottler_core::{format_duration, DethrottlerConfig, TaintDescriptor, Thresholds};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Settings the poll loop needs, extracted from the file configuration
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub node_name: String,
    pub descriptor: TaintDescriptor,
    pub thresholds: Thresholds,
    /// Interval between load samples
    pub poll_interval: Duration,
    /// Minimum time between the last overloaded tick and taint removal
    pub cooldown_period: Duration,
    /// Upper bound on the shutdown taint removal
    pub shutdown_timeout: Duration,
}

impl From<&DethrottlerConfig> for ControllerConfig {
    fn from(config: &DethrottlerConfig) -> Self {
        Self {
            node_name: config.node_name.clone(),
            descriptor: config.taint_descriptor(),
            thresholds: config.thresholds,
            poll_interval: config.poll_interval,
            cooldown_period: config.cooldown_period,
            shutdown_timeout: config.shutdown_timeout,
        }
    }
}

/// Samples node load on a fixed interval and drives the taint state machine
pub struct Controller {
    config: ControllerConfig,
    sampler: Arc<dyn LoadSampler>,
    store: Arc<dyn TaintStore>,
    metrics: Arc<dyn MetricsSink>,
    cpu_count: u32,
}

impl Controller {
    pub fn new(
        config: ControllerConfig,
        sampler: Arc<dyn LoadSampler>,
        store: Arc<dyn TaintStore>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        let cpu_count = sampler.cpu_count();
        Self {
            config,
            sampler,
            store,
            metrics,
            cpu_count,
        }
    }

    /// Run the controller until the token is cancelled.
    ///
    /// Reconciles with the node once, polls until cancellation, then removes
    /// the taint if it is still believed applied. Returns the final state.
    pub async fn run(&self, token: CancellationToken) -> Result<ControllerState> {
        if self.config.node_name.trim().is_empty() {
            return Err(RuntimeError::MissingNodeName);
        }

        info!(
            "Starting dethrottler on node {} (cpus: {}, thresholds: {}, poll interval: {}, cooldown: {}, taint: {})",
            self.config.node_name,
            self.cpu_count,
            self.config.thresholds,
            format_duration(self.config.poll_interval),
            format_duration(self.config.cooldown_period),
            self.config.descriptor
        );

        let initial = reconcile(
            self.store.as_ref(),
            &self.config.node_name,
            &self.config.descriptor,
            Instant::now(),
        )
        .await;
        self.metrics.set_tainted(initial.tainted);
        let mut machine = self.state_machine(initial);

        let mut interval = tokio::time::interval(self.config.poll_interval);
        // A slow tick delays the next one instead of bursting to catch up
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // Consume the first immediate tick; the first sample is one interval in
        interval.tick().await;

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    info!("Dethrottler shutting down");
                    machine.release(self.config.shutdown_timeout).await;
                    return Ok(*machine.state());
                }
                _ = interval.tick() => {
                    self.tick(&mut machine, Instant::now()).await;
                }
            }
        }
    }

    /// Build a state machine wired to this controller's store and metrics
    pub fn state_machine(&self, initial: ControllerState) -> TaintStateMachine {
        TaintStateMachine::new(
            self.config.node_name.clone(),
            self.config.descriptor.clone(),
            self.config.cooldown_period,
            initial,
            self.store.clone(),
            self.metrics.clone(),
        )
    }

    /// One poll: sample, normalize, evaluate and step.
    ///
    /// A failed sample skips the tick without touching the state machine.
    pub async fn tick(
        &self,
        machine: &mut TaintStateMachine,
        now: Instant,
    ) -> Option<TaintAction> {
        let raw = match self.sampler.sample() {
            Ok(raw) => raw,
            Err(e) => {
                error!("Failed to read load averages, skipping tick: {}", e);
                return None;
            }
        };

        let normalized = normalize(&raw, self.cpu_count);
        debug!("Raw load: {}", raw);
        debug!("Normalized load: {}", normalized);
        self.metrics.observe_load(&normalized);

        let verdict = evaluate(&normalized, &self.config.thresholds);
        for period in &verdict.exceeded {
            info!(
                "{} ({:.2}) exceeded threshold ({:.2})",
                period,
                normalized.get(*period),
                self.config.thresholds.get(*period)
            );
        }
        self.metrics.observe_verdict(&verdict);

        Some(machine.step(&verdict, now).await)
    }
}
