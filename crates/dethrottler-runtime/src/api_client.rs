use crate::error::{Result, RuntimeError};
use dethrottler_core::{ApiServerConfig, KubeconfigCredentials};
use k8s_openapi::api::core::v1::Node;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

const SERVICE_ACCOUNT_DIR: &str = "/var/run/secrets/kubernetes.io/serviceaccount";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Content type for RFC 6902 JSON Patch bodies
pub const JSON_PATCH_CONTENT_TYPE: &str = "application/json-patch+json";

/// Path the API server names when a JSON Patch `test` on the resource version fails
const RESOURCE_VERSION_POINTER: &str = "/metadata/resourceVersion";

/// How requests are authenticated
#[derive(Debug, Clone, PartialEq)]
enum BearerToken {
    /// Re-read on every request; projected service account tokens rotate
    File(PathBuf),
    Static(String),
}

#[derive(Debug, Clone, PartialEq)]
enum CaSource {
    File(PathBuf),
    Pem(Vec<u8>),
}

/// Where the API server lives and how to talk to it
#[derive(Debug, Clone, PartialEq)]
struct Endpoint {
    base_url: String,
    token: Option<BearerToken>,
    ca: Option<CaSource>,
    identity_pem: Option<Vec<u8>>,
    insecure: bool,
}

/// Lightweight HTTP client for the node endpoints of a Kubernetes API server
pub struct ApiClient {
    base_url: String,
    client: Client,
    token: Option<BearerToken>,
}

impl ApiClient {
    /// Plain client without authentication
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: Client::new(),
            token: None,
        }
    }

    /// Build a client from configuration.
    ///
    /// The API server is taken from `apiServer.url` when set, then from the
    /// in-cluster service environment, then from the current context of the
    /// kubeconfig at `kubeconfig_path`.
    pub fn from_config(config: &ApiServerConfig, kubeconfig_path: Option<&Path>) -> Result<Self> {
        Self::from_config_with_env(config, kubeconfig_path, |name| std::env::var(name).ok())
    }

    /// Like [`ApiClient::from_config`] but with an injectable environment lookup
    pub fn from_config_with_env(
        config: &ApiServerConfig,
        kubeconfig_path: Option<&Path>,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let endpoint = resolve_endpoint(config, kubeconfig_path, env)?;
        Self::from_endpoint(endpoint)
    }

    fn from_endpoint(endpoint: Endpoint) -> Result<Self> {
        let mut builder = Client::builder()
            .use_rustls_tls()
            .timeout(REQUEST_TIMEOUT);

        let ca_pem = match &endpoint.ca {
            Some(CaSource::File(ca_file)) => Some(std::fs::read(ca_file).map_err(|e| {
                RuntimeError::invalid_config(
                    format!("failed to read CA file {}: {}", ca_file.display(), e),
                    "Set apiServer.caFile to a readable PEM bundle",
                )
            })?),
            Some(CaSource::Pem(pem)) => Some(pem.clone()),
            None => None,
        };
        if let Some(pem) = ca_pem {
            let certs = reqwest::Certificate::from_pem_bundle(&pem).map_err(|e| {
                RuntimeError::invalid_config(
                    format!("invalid CA certificate: {}", e),
                    "The CA bundle must contain PEM-encoded certificates",
                )
            })?;
            for cert in certs {
                builder = builder.add_root_certificate(cert);
            }
        }

        if let Some(pem) = &endpoint.identity_pem {
            let identity = reqwest::Identity::from_pem(pem).map_err(|e| {
                RuntimeError::invalid_config(
                    format!("invalid client certificate or key: {}", e),
                    "The kubeconfig user needs a PEM client certificate and its private key",
                )
            })?;
            builder = builder.identity(identity);
        }

        if endpoint.insecure {
            builder = builder.danger_accept_invalid_certs(true);
        }

        let client = builder.build().map_err(|e| {
            RuntimeError::internal_error(format!("failed to build HTTP client: {}", e))
        })?;

        Ok(Self {
            base_url: endpoint.base_url,
            client,
            token: endpoint.token,
        })
    }

    /// GET /api/v1/nodes/{name}
    pub async fn get_node(&self, name: &str) -> Result<Node> {
        let resp = self.get(name).await?;
        resp.json::<Node>()
            .await
            .map_err(|e| RuntimeError::api_request_failed(format!("Failed to parse node: {}", e)))
    }

    /// GET /api/v1/nodes/{name}, keeping every field the server sent
    pub async fn get_node_value(&self, name: &str) -> Result<serde_json::Value> {
        let resp = self.get(name).await?;
        resp.json::<serde_json::Value>()
            .await
            .map_err(|e| RuntimeError::api_request_failed(format!("Failed to parse node: {}", e)))
    }

    /// PATCH /api/v1/nodes/{name} with a JSON Patch document.
    ///
    /// A failed `test` on `/metadata/resourceVersion` and a 409 both surface
    /// as [`RuntimeError::Conflict`].
    pub async fn patch_node(
        &self,
        name: &str,
        patch: &serde_json::Value,
    ) -> Result<serde_json::Value> {
        let url = self.node_url(name);
        debug!("PATCH {}", url);

        let body = serde_json::to_vec(patch).map_err(|e| {
            RuntimeError::internal_error(format!("failed to encode patch: {}", e))
        })?;
        let request = self
            .client
            .patch(&url)
            .header(CONTENT_TYPE, JSON_PATCH_CONTENT_TYPE)
            .body(body);

        let resp = self
            .authorize(request)
            .await?
            .send()
            .await
            .map_err(|e| RuntimeError::api_request_failed(format!("HTTP request failed: {}", e)))?;

        let resp = check_status(resp, name, "PATCH node").await?;

        resp.json::<serde_json::Value>()
            .await
            .map_err(|e| RuntimeError::api_request_failed(format!("Failed to parse node: {}", e)))
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn node_url(&self, name: &str) -> String {
        format!("{}/api/v1/nodes/{}", self.base_url, name)
    }

    async fn get(&self, name: &str) -> Result<Response> {
        let url = self.node_url(name);
        debug!("GET {}", url);

        let resp = self
            .authorize(self.client.get(&url))
            .await?
            .send()
            .await
            .map_err(|e| RuntimeError::api_request_failed(format!("HTTP request failed: {}", e)))?;

        check_status(resp, name, "GET node").await
    }

    async fn authorize(&self, request: RequestBuilder) -> Result<RequestBuilder> {
        match &self.token {
            None => Ok(request),
            Some(BearerToken::Static(token)) => Ok(request.bearer_auth(token)),
            Some(BearerToken::File(path)) => {
                let token = tokio::fs::read_to_string(path).await.map_err(|e| {
                    RuntimeError::api_request_failed(format!(
                        "failed to read token file {}: {}",
                        path.display(),
                        e
                    ))
                })?;
                Ok(request.bearer_auth(token.trim()))
            }
        }
    }
}

fn resolve_endpoint(
    config: &ApiServerConfig,
    kubeconfig_path: Option<&Path>,
    env: impl Fn(&str) -> Option<String>,
) -> Result<Endpoint> {
    let configured_token = config.token_file.clone().map(BearerToken::File);
    let configured_ca = config.ca_file.clone().map(CaSource::File);

    if let Some(url) = &config.url {
        return Ok(Endpoint {
            base_url: url.trim_end_matches('/').to_string(),
            token: configured_token,
            ca: configured_ca,
            identity_pem: None,
            insecure: config.insecure,
        });
    }

    let not_in_cluster = match in_cluster_url(env) {
        Ok(url) => {
            info!("Using in-cluster API server at {}", url);
            let sa_dir = Path::new(SERVICE_ACCOUNT_DIR);
            return Ok(Endpoint {
                base_url: url,
                token: configured_token
                    .or_else(|| Some(BearerToken::File(sa_dir.join("token")))),
                ca: configured_ca.or_else(|| Some(CaSource::File(sa_dir.join("ca.crt")))),
                identity_pem: None,
                insecure: config.insecure,
            });
        }
        Err(e) => e,
    };

    let Some(path) = kubeconfig_path else {
        return Err(not_in_cluster);
    };

    let creds = KubeconfigCredentials::load(path)?;
    info!(
        "Using API server {} from kubeconfig {}",
        creds.server,
        path.display()
    );
    let kubeconfig_token = match (creds.token_file, creds.token) {
        (Some(file), _) => Some(BearerToken::File(file)),
        (None, Some(token)) => Some(BearerToken::Static(token)),
        (None, None) => None,
    };
    Ok(Endpoint {
        base_url: creds.server.trim_end_matches('/').to_string(),
        token: configured_token.or(kubeconfig_token),
        ca: configured_ca.or(creds.ca_pem.map(CaSource::Pem)),
        identity_pem: creds.client_identity_pem,
        insecure: config.insecure || creds.insecure_skip_tls_verify,
    })
}

/// Map non-success responses onto runtime errors
async fn check_status(resp: Response, node_name: &str, what: &str) -> Result<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    let body = resp.text().await.unwrap_or_default();
    match status {
        StatusCode::NOT_FOUND => Err(RuntimeError::node_not_found(node_name)),
        StatusCode::CONFLICT => Err(RuntimeError::conflict(node_name, body)),
        StatusCode::UNPROCESSABLE_ENTITY if body.contains(RESOURCE_VERSION_POINTER) => {
            Err(RuntimeError::conflict(node_name, body))
        }
        _ => Err(RuntimeError::api_request_failed(format!(
            "{} failed with status {}: {}",
            what, status, body
        ))),
    }
}

/// Resolve the API server URL from the standard in-cluster service variables
pub fn in_cluster_url(env: impl Fn(&str) -> Option<String>) -> Result<String> {
    let host = env("KUBERNETES_SERVICE_HOST").filter(|h| !h.is_empty());
    let port = env("KUBERNETES_SERVICE_PORT").filter(|p| !p.is_empty());

    match (host, port) {
        (Some(host), Some(port)) => {
            // IPv6 service addresses need brackets in a URL
            if host.contains(':') {
                Ok(format!("https://[{}]:{}", host, port))
            } else {
                Ok(format!("https://{}:{}", host, port))
            }
        }
        _ => Err(RuntimeError::invalid_config(
            "apiServer.url is not set and KUBERNETES_SERVICE_HOST/KUBERNETES_SERVICE_PORT are not available",
            "Run inside a cluster, or set apiServer.url or kubeconfigPath in the config file",
        )),
    }
}
