use crate::error::{ConfigError, Result};
use k8s_openapi::ByteString;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Connection settings resolved from the current context of a kubeconfig
#[derive(Debug, Clone, PartialEq, Default)]
pub struct KubeconfigCredentials {
    pub server: String,
    /// PEM bundle of the cluster CA
    pub ca_pem: Option<Vec<u8>>,
    pub insecure_skip_tls_verify: bool,
    pub token: Option<String>,
    /// Token file, absolute. Takes precedence over `token`.
    pub token_file: Option<PathBuf>,
    /// Client certificate followed by its private key, PEM
    pub client_identity_pem: Option<Vec<u8>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct Kubeconfig {
    #[serde(default)]
    current_context: String,
    #[serde(default)]
    clusters: Vec<NamedCluster>,
    #[serde(default)]
    contexts: Vec<NamedContext>,
    #[serde(default)]
    users: Vec<NamedUser>,
}

#[derive(Debug, Deserialize)]
struct NamedCluster {
    name: String,
    cluster: Cluster,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct Cluster {
    #[serde(default)]
    server: String,
    certificate_authority: Option<PathBuf>,
    certificate_authority_data: Option<ByteString>,
    #[serde(default)]
    insecure_skip_tls_verify: bool,
}

#[derive(Debug, Deserialize)]
struct NamedContext {
    name: String,
    context: Context,
}

#[derive(Debug, Deserialize)]
struct Context {
    cluster: String,
    #[serde(default)]
    user: String,
}

#[derive(Debug, Deserialize)]
struct NamedUser {
    name: String,
    #[serde(default)]
    user: AuthInfo,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct AuthInfo {
    token: Option<String>,
    #[serde(rename = "tokenFile")]
    token_file: Option<PathBuf>,
    client_certificate: Option<PathBuf>,
    client_certificate_data: Option<ByteString>,
    client_key: Option<PathBuf>,
    client_key_data: Option<ByteString>,
    exec: Option<serde_yaml::Value>,
    auth_provider: Option<serde_yaml::Value>,
}

impl KubeconfigCredentials {
    /// Read a kubeconfig file and resolve its current context
    pub fn load(path: &Path) -> Result<Self> {
        let display = path.display().to_string();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::invalid_kubeconfig(&display, e.to_string()))?;
        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        Self::from_yaml_str(&content, &display, base_dir)
    }

    /// Resolve the current context of kubeconfig YAML.
    ///
    /// Relative file references are resolved against `base_dir`, the
    /// directory holding the kubeconfig. Inline `-data` fields win over
    /// their file counterparts.
    pub fn from_yaml_str(content: &str, origin: &str, base_dir: &Path) -> Result<Self> {
        let invalid = |message: String| ConfigError::invalid_kubeconfig(origin, message);

        let kubeconfig: Kubeconfig =
            serde_yaml::from_str(content).map_err(|e| invalid(e.to_string()))?;

        if kubeconfig.current_context.is_empty() {
            return Err(invalid("current-context is not set".to_string()));
        }
        let context = kubeconfig
            .contexts
            .iter()
            .find(|c| c.name == kubeconfig.current_context)
            .map(|c| &c.context)
            .ok_or_else(|| {
                invalid(format!("context '{}' not found", kubeconfig.current_context))
            })?;

        let cluster = kubeconfig
            .clusters
            .iter()
            .find(|c| c.name == context.cluster)
            .map(|c| &c.cluster)
            .ok_or_else(|| invalid(format!("cluster '{}' not found", context.cluster)))?;
        if cluster.server.is_empty() {
            return Err(invalid(format!(
                "cluster '{}' has no server",
                context.cluster
            )));
        }

        let default_user = AuthInfo::default();
        let user = if context.user.is_empty() {
            &default_user
        } else {
            kubeconfig
                .users
                .iter()
                .find(|u| u.name == context.user)
                .map(|u| &u.user)
                .ok_or_else(|| invalid(format!("user '{}' not found", context.user)))?
        };

        let read = |file: &Path| -> Result<Vec<u8>> {
            let file = base_dir.join(file);
            std::fs::read(&file)
                .map_err(|e| invalid(format!("failed to read {}: {}", file.display(), e)))
        };
        let inline_or_file =
            |data: &Option<ByteString>, file: &Option<PathBuf>| -> Result<Option<Vec<u8>>> {
                match (data, file) {
                    (Some(data), _) => Ok(Some(data.0.clone())),
                    (None, Some(file)) => read(file).map(Some),
                    (None, None) => Ok(None),
                }
            };

        let ca_pem = inline_or_file(
            &cluster.certificate_authority_data,
            &cluster.certificate_authority,
        )?;

        let cert = inline_or_file(&user.client_certificate_data, &user.client_certificate)?;
        let key = inline_or_file(&user.client_key_data, &user.client_key)?;
        let client_identity_pem = match (cert, key) {
            (Some(mut cert), Some(key)) => {
                cert.push(b'\n');
                cert.extend_from_slice(&key);
                Some(cert)
            }
            (None, None) => None,
            _ => {
                return Err(invalid(format!(
                    "user '{}' needs both a client certificate and a client key",
                    context.user
                )))
            }
        };

        let token = user.token.clone().filter(|t| !t.is_empty());
        let token_file = user.token_file.as_ref().map(|f| base_dir.join(f));

        if token.is_none()
            && token_file.is_none()
            && client_identity_pem.is_none()
            && (user.exec.is_some() || user.auth_provider.is_some())
        {
            return Err(invalid(format!(
                "user '{}' relies on an exec or auth-provider plugin, which is not supported; use a token or client certificate",
                context.user
            )));
        }

        Ok(Self {
            server: cluster.server.clone(),
            ca_pem,
            insecure_skip_tls_verify: cluster.insecure_skip_tls_verify,
            token,
            token_file,
            client_identity_pem,
        })
    }
}
