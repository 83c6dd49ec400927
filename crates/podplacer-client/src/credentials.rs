//! Cluster credential loading: kubeconfig files and in-cluster service accounts.

use crate::error::{ClientError, Result};
use base64::{engine::general_purpose, Engine as _};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Where the kubelet mounts the pod's service account
pub const IN_CLUSTER_SERVICE_ACCOUNT_DIR: &str = "/var/run/secrets/kubernetes.io/serviceaccount";

/// Everything needed to talk to one API server
#[derive(Clone, Default)]
pub struct Credentials {
    /// API server base URL (e.g., "https://10.0.0.1:6443")
    pub server: String,
    /// Bearer token sent on every request
    pub token: Option<String>,
    /// PEM bundle used to verify the server
    pub ca_pem: Option<Vec<u8>>,
    /// PEM client certificate followed by its private key
    pub identity_pem: Option<Vec<u8>>,
    pub insecure_skip_tls_verify: bool,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("server", &self.server)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("ca_pem", &self.ca_pem.is_some())
            .field("identity_pem", &self.identity_pem.is_some())
            .field("insecure_skip_tls_verify", &self.insecure_skip_tls_verify)
            .finish()
    }
}

impl Credentials {
    /// Load from a kubeconfig when a path is given, otherwise from the pod's service account
    pub fn load(kubeconfig: Option<&Path>) -> Result<Self> {
        match kubeconfig {
            Some(path) => Self::from_kubeconfig(path),
            None => Self::in_cluster(),
        }
    }

    /// Service account credentials mounted into a running pod
    pub fn in_cluster() -> Result<Self> {
        let host = std::env::var("KUBERNETES_SERVICE_HOST").map_err(|_| {
            ClientError::invalid_credentials(
                "KUBERNETES_SERVICE_HOST is not set",
                "Run inside a cluster, or pass --kubeconfig",
            )
        })?;
        let port = std::env::var("KUBERNETES_SERVICE_PORT").unwrap_or_else(|_| "443".to_string());

        Self::in_cluster_from(Path::new(IN_CLUSTER_SERVICE_ACCOUNT_DIR), &host, &port)
    }

    /// Service account credentials read from `dir`
    pub fn in_cluster_from(dir: &Path, host: &str, port: &str) -> Result<Self> {
        let token = read_file(&dir.join("token"))?;
        let token = String::from_utf8(token)
            .map_err(|e| {
                ClientError::invalid_credentials(
                    format!("Service account token is not UTF-8: {}", e),
                    "Check the mounted service account secret",
                )
            })?
            .trim()
            .to_string();
        let ca_pem = read_file(&dir.join("ca.crt"))?;

        let host = if host.contains(':') && !host.starts_with('[') {
            format!("[{}]", host)
        } else {
            host.to_string()
        };

        info!("Using in-cluster service account credentials");

        Ok(Self {
            server: format!("https://{}:{}", host, port),
            token: Some(token),
            ca_pem: Some(ca_pem),
            identity_pem: None,
            insecure_skip_tls_verify: false,
        })
    }

    /// Credentials for the current context of a kubeconfig file
    pub fn from_kubeconfig(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path).map_err(|e| {
            ClientError::invalid_credentials(
                format!("Failed to read kubeconfig '{}': {}", path.display(), e),
                "Check the --kubeconfig path",
            )
        })?;
        let config: Kubeconfig = serde_yaml::from_str(&data).map_err(|e| {
            ClientError::invalid_credentials(
                format!("Failed to parse kubeconfig '{}': {}", path.display(), e),
                "The file must be a valid kubeconfig YAML document",
            )
        })?;
        let base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();

        Self::from_parsed(config, &base_dir)
    }

    fn from_parsed(config: Kubeconfig, base_dir: &Path) -> Result<Self> {
        let context_name = config.current_context.as_deref().ok_or_else(|| {
            ClientError::invalid_credentials(
                "kubeconfig has no current-context",
                "Select one with `kubectl config use-context <name>`",
            )
        })?;
        let context = config
            .contexts
            .iter()
            .find(|c| c.name == context_name)
            .map(|c| &c.context)
            .ok_or_else(|| {
                ClientError::invalid_credentials(
                    format!("Context '{}' not found in kubeconfig", context_name),
                    "Check the contexts section of the kubeconfig",
                )
            })?;
        let cluster = config
            .clusters
            .iter()
            .find(|c| c.name == context.cluster)
            .map(|c| &c.cluster)
            .ok_or_else(|| {
                ClientError::invalid_credentials(
                    format!("Cluster '{}' not found in kubeconfig", context.cluster),
                    "Check the clusters section of the kubeconfig",
                )
            })?;
        let user = match &context.user {
            Some(name) => config
                .users
                .iter()
                .find(|u| &u.name == name)
                .map(|u| u.user.clone())
                .ok_or_else(|| {
                    ClientError::invalid_credentials(
                        format!("User '{}' not found in kubeconfig", name),
                        "Check the users section of the kubeconfig",
                    )
                })?,
            None => UserEntry::default(),
        };

        debug!(
            "Using kubeconfig context '{}' (cluster '{}')",
            context_name, context.cluster
        );

        let ca_pem = inline_or_file(
            cluster.certificate_authority_data.as_deref(),
            cluster.certificate_authority.as_deref(),
            base_dir,
        )?;

        let token = match (&user.token, &user.token_file) {
            (Some(token), _) => Some(token.clone()),
            (None, Some(file)) => {
                let raw = read_file(&resolve(base_dir, file))?;
                Some(String::from_utf8_lossy(&raw).trim().to_string())
            }
            (None, None) => None,
        };

        let cert = inline_or_file(
            user.client_certificate_data.as_deref(),
            user.client_certificate.as_deref(),
            base_dir,
        )?;
        let key = inline_or_file(
            user.client_key_data.as_deref(),
            user.client_key.as_deref(),
            base_dir,
        )?;
        let identity_pem = match (cert, key) {
            (Some(mut cert), Some(key)) => {
                cert.push(b'\n');
                cert.extend_from_slice(&key);
                Some(cert)
            }
            (None, None) => None,
            _ => {
                return Err(ClientError::invalid_credentials(
                    "kubeconfig user has a client certificate without a key (or the reverse)",
                    "Provide both client-certificate and client-key",
                ))
            }
        };

        Ok(Self {
            server: cluster.server.trim_end_matches('/').to_string(),
            token,
            ca_pem,
            identity_pem,
            insecure_skip_tls_verify: cluster.insecure_skip_tls_verify,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct Kubeconfig {
    current_context: Option<String>,
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
    cluster: ClusterEntry,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct ClusterEntry {
    server: String,
    certificate_authority: Option<String>,
    certificate_authority_data: Option<String>,
    #[serde(default)]
    insecure_skip_tls_verify: bool,
}

#[derive(Debug, Deserialize)]
struct NamedContext {
    name: String,
    context: ContextEntry,
}

#[derive(Debug, Deserialize)]
struct ContextEntry {
    cluster: String,
    user: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NamedUser {
    name: String,
    #[serde(default)]
    user: UserEntry,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct UserEntry {
    token: Option<String>,
    #[serde(rename = "tokenFile")]
    token_file: Option<String>,
    client_certificate: Option<String>,
    client_certificate_data: Option<String>,
    client_key: Option<String>,
    client_key_data: Option<String>,
}

fn resolve(base_dir: &Path, file: &str) -> PathBuf {
    let path = Path::new(file);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base_dir.join(path)
    }
}

fn read_file(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).map_err(|e| {
        ClientError::invalid_credentials(
            format!("Failed to read '{}': {}", path.display(), e),
            "Check that the credential file exists and is readable",
        )
    })
}

fn inline_or_file(data: Option<&str>, file: Option<&str>, base_dir: &Path) -> Result<Option<Vec<u8>>> {
    if let Some(data) = data {
        let decoded = general_purpose::STANDARD.decode(data.trim()).map_err(|e| {
            ClientError::invalid_credentials(
                format!("Invalid base64 in kubeconfig: {}", e),
                "The *-data fields must hold base64-encoded PEM",
            )
        })?;
        return Ok(Some(decoded));
    }
    match file {
        Some(file) => read_file(&resolve(base_dir, file)).map(Some),
        None => Ok(None),
    }
}
