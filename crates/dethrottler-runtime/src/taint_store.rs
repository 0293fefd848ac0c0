use crate::api_client::ApiClient;
use crate::error::{Result, RuntimeError};
use crate::traits::TaintStore;
use async_trait::async_trait;
use dethrottler_core::{taint_matches, TaintEffect};
use k8s_openapi::api::core::v1::Taint;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;

/// Taint store backed by the cluster API server.
///
/// Mutations read the node as raw JSON, edit its taint list, and send a JSON
/// Patch that first tests `metadata.resourceVersion` against the value read
/// and then sets `spec.taints`. Fields this crate does not model are never
/// sent back, so they cannot be dropped. If anyone else changed the node in
/// between, the patch is rejected and the call fails with
/// [`RuntimeError::Conflict`]; the caller retries on its next tick against a
/// fresh read.
pub struct ApiTaintStore {
    api_client: Arc<ApiClient>,
}

impl ApiTaintStore {
    pub fn new(api_client: Arc<ApiClient>) -> Self {
        Self { api_client }
    }

    async fn write_taints(&self, node_name: &str, node: &Value, taints: Vec<Value>) -> Result<()> {
        let Some(resource_version) = node
            .pointer("/metadata/resourceVersion")
            .and_then(Value::as_str)
        else {
            return Err(RuntimeError::api_request_failed(format!(
                "node {} has no resourceVersion; refusing an unconditional update",
                node_name
            )));
        };

        // `add` on an existing member replaces it
        let set_taints = if node.get("spec").is_some_and(Value::is_object) {
            json!({ "op": "add", "path": "/spec/taints", "value": taints })
        } else {
            json!({ "op": "add", "path": "/spec", "value": { "taints": taints } })
        };
        let patch = json!([
            { "op": "test", "path": "/metadata/resourceVersion", "value": resource_version },
            set_taints,
        ]);

        self.api_client.patch_node(node_name, &patch).await?;
        Ok(())
    }
}

fn raw_taints(node: &Value) -> Vec<Value> {
    node.pointer("/spec/taints")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

fn raw_taint_matches(taint: &Value, key: &str, effect: TaintEffect) -> bool {
    taint.get("key").and_then(Value::as_str) == Some(key)
        && taint.get("effect").and_then(Value::as_str) == Some(effect.as_str())
}

#[async_trait]
impl TaintStore for ApiTaintStore {
    async fn has_taint(&self, node_name: &str, key: &str, effect: TaintEffect) -> Result<bool> {
        let node = self.api_client.get_node(node_name).await?;
        Ok(node
            .spec
            .as_ref()
            .and_then(|s| s.taints.as_deref())
            .unwrap_or_default()
            .iter()
            .any(|t| taint_matches(t, key, effect)))
    }

    async fn apply_taint(
        &self,
        node_name: &str,
        key: &str,
        value: &str,
        effect: TaintEffect,
    ) -> Result<()> {
        let node = self.api_client.get_node_value(node_name).await?;
        let mut taints = raw_taints(&node);

        match taints
            .iter_mut()
            .find(|t| raw_taint_matches(t, key, effect))
            .and_then(Value::as_object_mut)
        {
            Some(existing) if existing.get("value").and_then(Value::as_str) == Some(value) => {
                debug!(
                    "Taint {}={}:{} already present on node {}",
                    key, value, effect, node_name
                );
                return Ok(());
            }
            Some(existing) => {
                existing.insert("value".to_string(), Value::String(value.to_string()));
            }
            None => {
                let taint = Taint {
                    key: key.to_string(),
                    value: Some(value.to_string()),
                    effect: effect.as_str().to_string(),
                    time_added: None,
                };
                let taint = serde_json::to_value(&taint).map_err(|e| {
                    RuntimeError::internal_error(format!("failed to encode taint: {}", e))
                })?;
                taints.push(taint);
            }
        }

        self.write_taints(node_name, &node, taints).await
    }

    async fn remove_taint(&self, node_name: &str, key: &str, effect: TaintEffect) -> Result<()> {
        let node = self.api_client.get_node_value(node_name).await?;
        let mut taints = raw_taints(&node);

        let before = taints.len();
        taints.retain(|t| !raw_taint_matches(t, key, effect));
        if taints.len() == before {
            debug!(
                "Taint {}:{} not present on node {}, nothing to remove",
                key, effect, node_name
            );
            return Ok(());
        }

        self.write_taints(node_name, &node, taints).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api_client::JSON_PATCH_CONTENT_TYPE;
    use axum::body::Bytes;
    use axum::extract::{Path, State};
    use axum::http::{header, HeaderMap, StatusCode};
    use axum::response::{IntoResponse, Response};
    use axum::routing::get;
    use axum::{Json, Router};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio::net::TcpListener;

    /// In-process stand-in for the node endpoints of an API server. PATCH
    /// accepts JSON Patch `test` and `add` operations and applies them
    /// atomically.
    #[derive(Clone, Default)]
    struct FakeApiServer {
        node: Arc<Mutex<Value>>,
        patches: Arc<AtomicUsize>,
        last_patch: Arc<Mutex<Value>>,
        /// Simulate another actor writing the node right before our PATCH lands
        concurrent_write_before_next_patch: Arc<AtomicBool>,
    }

    impl FakeApiServer {
        fn current(&self) -> Value {
            self.node.lock().unwrap().clone()
        }

        fn taints(&self) -> Vec<Value> {
            raw_taints(&self.current())
        }

        fn patches(&self) -> usize {
            self.patches.load(Ordering::SeqCst)
        }

        fn last_patch(&self) -> Value {
            self.last_patch.lock().unwrap().clone()
        }
    }

    fn bump_resource_version(node: &mut Value) {
        let n: u64 = node
            .pointer("/metadata/resourceVersion")
            .and_then(Value::as_str)
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        node["metadata"]["resourceVersion"] = json!((n + 1).to_string());
    }

    /// Apply one operation, or describe why it failed
    fn apply_op(doc: &mut Value, op: &Value) -> std::result::Result<(), String> {
        let path = op["path"].as_str().ok_or("missing path")?;
        match op["op"].as_str() {
            Some("test") => {
                if doc.pointer(path) == Some(&op["value"]) {
                    Ok(())
                } else {
                    Err(format!("testing value {} failed: test failed", path))
                }
            }
            Some("add") => {
                let (parent, member) = path.rsplit_once('/').ok_or("bad path")?;
                let target = doc
                    .pointer_mut(parent)
                    .and_then(Value::as_object_mut)
                    .ok_or_else(|| format!("doc is missing path: {}", parent))?;
                target.insert(member.to_string(), op["value"].clone());
                Ok(())
            }
            other => Err(format!("unsupported op {:?}", other)),
        }
    }

    async fn fake_get_node(
        State(api): State<FakeApiServer>,
        Path(name): Path<String>,
    ) -> Response {
        let node = api.current();
        if node.pointer("/metadata/name").and_then(Value::as_str) == Some(name.as_str()) {
            Json(node).into_response()
        } else {
            (StatusCode::NOT_FOUND, "node not found").into_response()
        }
    }

    async fn fake_patch_node(
        State(api): State<FakeApiServer>,
        Path(name): Path<String>,
        headers: HeaderMap,
        body: Bytes,
    ) -> Response {
        api.patches.fetch_add(1, Ordering::SeqCst);
        if headers.get(header::CONTENT_TYPE).and_then(|v| v.to_str().ok())
            != Some(JSON_PATCH_CONTENT_TYPE)
        {
            return (StatusCode::UNSUPPORTED_MEDIA_TYPE, "expected a JSON patch").into_response();
        }
        let Ok(patch) = serde_json::from_slice::<Value>(&body) else {
            return (StatusCode::BAD_REQUEST, "malformed patch").into_response();
        };
        *api.last_patch.lock().unwrap() = patch.clone();

        let mut guard = api.node.lock().unwrap();
        if guard.pointer("/metadata/name").and_then(Value::as_str) != Some(name.as_str()) {
            return (StatusCode::NOT_FOUND, "node not found").into_response();
        }

        if api
            .concurrent_write_before_next_patch
            .swap(false, Ordering::SeqCst)
        {
            bump_resource_version(&mut guard);
        }

        let mut updated = guard.clone();
        for op in patch.as_array().into_iter().flatten() {
            if let Err(message) = apply_op(&mut updated, op) {
                return (StatusCode::UNPROCESSABLE_ENTITY, message).into_response();
            }
        }
        bump_resource_version(&mut updated);
        *guard = updated.clone();
        Json(updated).into_response()
    }

    async fn spawn_fake_api(node: Value) -> (ApiTaintStore, FakeApiServer) {
        let api = FakeApiServer {
            node: Arc::new(Mutex::new(node)),
            ..Default::default()
        };
        let app = Router::new()
            .route(
                "/api/v1/nodes/{name}",
                get(fake_get_node).patch(fake_patch_node),
            )
            .with_state(api.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let client = Arc::new(ApiClient::new(&format!("http://{}", addr)));
        (ApiTaintStore::new(client), api)
    }

    fn taint(key: &str, value: &str, effect: &str) -> Value {
        json!({ "key": key, "value": value, "effect": effect })
    }

    fn make_node(name: &str, taints: Option<Vec<Value>>) -> Value {
        let mut node = json!({
            "apiVersion": "v1",
            "kind": "Node",
            "metadata": { "name": name, "resourceVersion": "1" },
            "spec": {},
        });
        if let Some(taints) = taints {
            node["spec"]["taints"] = Value::Array(taints);
        }
        node
    }

    const KEY: &str = "dethrottler/high-load";

    #[tokio::test]
    async fn test_has_taint_matches_key_and_effect() {
        let node = make_node(
            "node-a",
            Some(vec![taint(KEY, "whatever", "NoSchedule")]),
        );
        let (store, _api) = spawn_fake_api(node).await;

        assert!(store
            .has_taint("node-a", KEY, TaintEffect::NoSchedule)
            .await
            .unwrap());
        assert!(!store
            .has_taint("node-a", KEY, TaintEffect::NoExecute)
            .await
            .unwrap());
        assert!(!store
            .has_taint("node-a", "other/key", TaintEffect::NoSchedule)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_apply_appends_and_preserves_other_taints() {
        let node = make_node(
            "node-a",
            Some(vec![taint("node.kubernetes.io/unschedulable", "", "NoSchedule")]),
        );
        let (store, api) = spawn_fake_api(node).await;

        store
            .apply_taint("node-a", KEY, "high-load", TaintEffect::NoSchedule)
            .await
            .unwrap();

        let taints = api.taints();
        assert_eq!(taints.len(), 2);
        assert_eq!(taints[0]["key"], "node.kubernetes.io/unschedulable");
        assert_eq!(taints[1], taint(KEY, "high-load", "NoSchedule"));
        assert_eq!(api.current()["metadata"]["resourceVersion"], "2");
    }

    #[tokio::test]
    async fn test_apply_sends_guarded_json_patch() {
        let (store, api) = spawn_fake_api(make_node("node-a", None)).await;

        store
            .apply_taint("node-a", KEY, "high-load", TaintEffect::NoSchedule)
            .await
            .unwrap();

        assert_eq!(
            api.last_patch(),
            json!([
                { "op": "test", "path": "/metadata/resourceVersion", "value": "1" },
                {
                    "op": "add",
                    "path": "/spec/taints",
                    "value": [taint(KEY, "high-load", "NoSchedule")],
                },
            ])
        );
    }

    #[tokio::test]
    async fn test_unmodelled_fields_survive_apply_and_remove() {
        let node = json!({
            "apiVersion": "v1",
            "kind": "Node",
            "metadata": {
                "name": "node-a",
                "resourceVersion": "7",
                "labels": { "kubernetes.io/hostname": "node-a" },
                "futureMeta": { "x": 1 },
            },
            "spec": {
                "podCIDR": "10.244.1.0/24",
                "futureSpecField": { "a": 1 },
                "taints": [{
                    "key": "other/key",
                    "effect": "NoSchedule",
                    "futureTaintField": "keep",
                }],
            },
            "status": { "capacity": { "cpu": "4" } },
        });
        let (store, api) = spawn_fake_api(node).await;

        store
            .apply_taint("node-a", KEY, "high-load", TaintEffect::NoSchedule)
            .await
            .unwrap();
        store
            .remove_taint("node-a", KEY, TaintEffect::NoSchedule)
            .await
            .unwrap();

        let current = api.current();
        assert_eq!(api.patches(), 2);
        assert_eq!(current["metadata"]["futureMeta"], json!({ "x": 1 }));
        assert_eq!(
            current["metadata"]["labels"]["kubernetes.io/hostname"],
            "node-a"
        );
        assert_eq!(current["spec"]["futureSpecField"], json!({ "a": 1 }));
        assert_eq!(current["spec"]["podCIDR"], "10.244.1.0/24");
        assert_eq!(current["status"]["capacity"]["cpu"], "4");
        assert_eq!(
            current["spec"]["taints"],
            json!([{
                "key": "other/key",
                "effect": "NoSchedule",
                "futureTaintField": "keep",
            }])
        );
    }

    #[tokio::test]
    async fn test_apply_to_node_without_spec() {
        let mut node = make_node("node-a", None);
        node.as_object_mut().unwrap().remove("spec");
        let (store, api) = spawn_fake_api(node).await;

        store
            .apply_taint("node-a", KEY, "high-load", TaintEffect::PreferNoSchedule)
            .await
            .unwrap();

        assert_eq!(api.taints(), vec![taint(KEY, "high-load", "PreferNoSchedule")]);
    }

    #[tokio::test]
    async fn test_apply_is_idempotent() {
        let (store, api) = spawn_fake_api(make_node("node-a", None)).await;

        store
            .apply_taint("node-a", KEY, "high-load", TaintEffect::NoSchedule)
            .await
            .unwrap();
        store
            .apply_taint("node-a", KEY, "high-load", TaintEffect::NoSchedule)
            .await
            .unwrap();

        assert_eq!(api.taints().len(), 1);
        assert_eq!(api.patches(), 1, "second apply must not write");
    }

    #[tokio::test]
    async fn test_apply_updates_value_in_place() {
        let node = make_node("node-a", Some(vec![taint(KEY, "stale", "NoSchedule")]));
        let (store, api) = spawn_fake_api(node).await;

        store
            .apply_taint("node-a", KEY, "high-load", TaintEffect::NoSchedule)
            .await
            .unwrap();

        assert_eq!(api.taints(), vec![taint(KEY, "high-load", "NoSchedule")]);
    }

    #[tokio::test]
    async fn test_apply_same_key_other_effect_is_a_separate_taint() {
        let node = make_node("node-a", Some(vec![taint(KEY, "high-load", "NoExecute")]));
        let (store, api) = spawn_fake_api(node).await;

        store
            .apply_taint("node-a", KEY, "high-load", TaintEffect::NoSchedule)
            .await
            .unwrap();

        assert_eq!(api.taints().len(), 2);
    }

    #[tokio::test]
    async fn test_remove_keeps_other_taints() {
        let node = make_node(
            "node-a",
            Some(vec![
                taint("other/key", "x", "NoSchedule"),
                taint(KEY, "high-load", "NoSchedule"),
                taint(KEY, "high-load", "NoExecute"),
            ]),
        );
        let (store, api) = spawn_fake_api(node).await;

        store
            .remove_taint("node-a", KEY, TaintEffect::NoSchedule)
            .await
            .unwrap();

        assert_eq!(
            api.taints(),
            vec![
                taint("other/key", "x", "NoSchedule"),
                taint(KEY, "high-load", "NoExecute"),
            ]
        );
    }

    #[tokio::test]
    async fn test_remove_absent_taint_is_noop() {
        let node = make_node("node-a", Some(vec![taint("other/key", "x", "NoSchedule")]));
        let (store, api) = spawn_fake_api(node).await;

        store
            .remove_taint("node-a", KEY, TaintEffect::NoSchedule)
            .await
            .unwrap();
        store
            .remove_taint("node-a", KEY, TaintEffect::NoSchedule)
            .await
            .unwrap();

        assert_eq!(api.patches(), 0);
        assert_eq!(api.taints().len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_modification_surfaces_conflict() {
        let (store, api) = spawn_fake_api(make_node("node-a", None)).await;
        api.concurrent_write_before_next_patch
            .store(true, Ordering::SeqCst);

        let err = store
            .apply_taint("node-a", KEY, "high-load", TaintEffect::NoSchedule)
            .await
            .unwrap_err();

        assert!(matches!(err, RuntimeError::Conflict { .. }));
        assert!(err.is_retryable());
        assert!(api.taints().is_empty(), "stale write must not land");

        // A retry reads the new version and succeeds
        store
            .apply_taint("node-a", KEY, "high-load", TaintEffect::NoSchedule)
            .await
            .unwrap();
        assert_eq!(api.taints().len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_node() {
        let (store, _api) = spawn_fake_api(make_node("node-a", None)).await;

        let err = store
            .has_taint("node-b", KEY, TaintEffect::NoSchedule)
            .await
            .unwrap_err();
        assert!(matches!(err, RuntimeError::NodeNotFound { .. }));

        let err = store
            .apply_taint("node-b", KEY, "high-load", TaintEffect::NoSchedule)
            .await
            .unwrap_err();
        assert!(matches!(err, RuntimeError::NodeNotFound { .. }));
    }

    #[tokio::test]
    async fn test_refuses_write_without_resource_version() {
        let mut node = make_node("node-a", None);
        node["metadata"]
            .as_object_mut()
            .unwrap()
            .remove("resourceVersion");
        let (store, api) = spawn_fake_api(node).await;

        let err = store
            .apply_taint("node-a", KEY, "high-load", TaintEffect::NoSchedule)
            .await
            .unwrap_err();
        assert!(matches!(err, RuntimeError::ApiRequestFailed { .. }));
        assert_eq!(api.patches(), 0);
    }
}
