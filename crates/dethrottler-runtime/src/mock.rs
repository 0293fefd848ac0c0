use crate::error::{Result, RuntimeError};
use crate::traits::{LoadSampler, TaintStore};
use async_trait::async_trait;
use dethrottler_core::{LoadAverages, TaintEffect};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tokio::sync::RwLock;
use tracing::debug;

/// Number of calls made against a [`MockTaintStore`], failed calls included
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MockCallCounts {
    pub has_taint: usize,
    pub apply_taint: usize,
    pub remove_taint: usize,
}

impl MockCallCounts {
    pub fn total(&self) -> usize {
        self.has_taint + self.apply_taint + self.remove_taint
    }
}

/// `(node, key, effect)` identity of a stored taint
type TaintId = (String, String, TaintEffect);

#[derive(Default)]
struct MockStoreState {
    taints: HashMap<TaintId, String>,
    calls: MockCallCounts,
    fail_has_taint: bool,
    fail_apply_taint: bool,
    fail_remove_taint: bool,
}

/// In-memory taint store for tests and dry runs
///
/// Keeps taints keyed by `(node, key, effect)` and counts every call so tests
/// can assert exactly which store operations a transition performed. Failures
/// can be injected per operation.
#[derive(Clone, Default)]
pub struct MockTaintStore {
    state: Arc<RwLock<MockStoreState>>,
}

impl MockTaintStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a taint as if another process had applied it
    pub async fn insert_taint(&self, node_name: &str, key: &str, value: &str, effect: TaintEffect) {
        self.state.write().await.taints.insert(
            (node_name.to_string(), key.to_string(), effect),
            value.to_string(),
        );
    }

    /// Value of the stored taint, if present
    pub async fn taint_value(&self, node_name: &str, key: &str, effect: TaintEffect) -> Option<String> {
        self.state
            .read()
            .await
            .taints
            .get(&(node_name.to_string(), key.to_string(), effect))
            .cloned()
    }

    pub async fn taint_count(&self) -> usize {
        self.state.read().await.taints.len()
    }

    pub async fn calls(&self) -> MockCallCounts {
        self.state.read().await.calls
    }

    pub async fn fail_has_taint(&self, fail: bool) {
        self.state.write().await.fail_has_taint = fail;
    }

    pub async fn fail_apply_taint(&self, fail: bool) {
        self.state.write().await.fail_apply_taint = fail;
    }

    pub async fn fail_remove_taint(&self, fail: bool) {
        self.state.write().await.fail_remove_taint = fail;
    }
}

#[async_trait]
impl TaintStore for MockTaintStore {
    async fn has_taint(&self, node_name: &str, key: &str, effect: TaintEffect) -> Result<bool> {
        let mut state = self.state.write().await;
        state.calls.has_taint += 1;
        if state.fail_has_taint {
            return Err(RuntimeError::api_request_failed("mock: injected has_taint failure"));
        }
        Ok(state
            .taints
            .contains_key(&(node_name.to_string(), key.to_string(), effect)))
    }

    async fn apply_taint(
        &self,
        node_name: &str,
        key: &str,
        value: &str,
        effect: TaintEffect,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        state.calls.apply_taint += 1;
        if state.fail_apply_taint {
            return Err(RuntimeError::conflict(
                node_name,
                "mock: injected apply_taint failure",
            ));
        }
        state.taints.insert(
            (node_name.to_string(), key.to_string(), effect),
            value.to_string(),
        );
        debug!("Mock: applied taint {}={}:{} to {}", key, value, effect, node_name);
        Ok(())
    }

    async fn remove_taint(&self, node_name: &str, key: &str, effect: TaintEffect) -> Result<()> {
        let mut state = self.state.write().await;
        state.calls.remove_taint += 1;
        if state.fail_remove_taint {
            return Err(RuntimeError::api_request_failed(
                "mock: injected remove_taint failure",
            ));
        }
        state
            .taints
            .remove(&(node_name.to_string(), key.to_string(), effect));
        debug!("Mock: removed taint {}:{} from {}", key, effect, node_name);
        Ok(())
    }
}

/// Scripted load sampler for tests and demos
///
/// Returns queued entries in order, then keeps repeating the last entry. A
/// queued failure fails with a parse error.
pub struct StaticLoadSampler {
    cpu_count: u32,
    queue: Mutex<VecDeque<Option<LoadAverages>>>,
    last: Mutex<Option<LoadAverages>>,
}

impl StaticLoadSampler {
    pub fn new(cpu_count: u32, load: LoadAverages) -> Self {
        Self {
            cpu_count,
            queue: Mutex::new(VecDeque::new()),
            last: Mutex::new(Some(load)),
        }
    }

    /// Queue a sample to be returned before the current one repeats
    pub fn push(&self, load: LoadAverages) {
        self.lock_queue().push_back(Some(load));
    }

    /// Queue one failed read
    pub fn push_failure(&self) {
        self.lock_queue().push_back(None);
    }

    fn lock_queue(&self) -> std::sync::MutexGuard<'_, VecDeque<Option<LoadAverages>>> {
        self.queue.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl LoadSampler for StaticLoadSampler {
    fn sample(&self) -> Result<LoadAverages> {
        let mut last = self.last.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(next) = self.lock_queue().pop_front() {
            *last = next;
        }
        last.ok_or_else(|| RuntimeError::load_parse_failed("mock: scripted sample failure"))
    }

    fn cpu_count(&self) -> u32 {
        self.cpu_count
    }
}
