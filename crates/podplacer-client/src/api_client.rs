use crate::credentials::Credentials;
use crate::error::{ClientError, Result};
use crate::traits::{ClusterApi, PodEventStream};
use crate::watch::pod_event_stream;
use async_trait::async_trait;
use futures_util::StreamExt;
use k8s_openapi::api::core::v1::{Binding, Node, ObjectReference, Pod};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use podplacer_core::{NodeInfo, PodInfo};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{Certificate, Client, Identity, Response};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, warn};

/// HTTP client for the cluster API server
pub struct ApiClient {
    base_url: String,
    client: Client,
}

impl ApiClient {
    /// Plain client without authentication (e.g., for a local proxy)
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: Client::new(),
        }
    }

    /// Client authenticated with the given credentials
    pub fn from_credentials(credentials: &Credentials) -> Result<Self> {
        let mut builder = Client::builder().connect_timeout(Duration::from_secs(10));

        if let Some(token) = &credentials.token {
            let mut value = HeaderValue::from_str(&format!("Bearer {}", token)).map_err(|e| {
                ClientError::invalid_credentials(
                    format!("Bearer token is not a valid header value: {}", e),
                    "Check the token for stray whitespace or control characters",
                )
            })?;
            value.set_sensitive(true);
            let mut headers = HeaderMap::new();
            headers.insert(AUTHORIZATION, value);
            builder = builder.default_headers(headers);
        }

        if let Some(ca_pem) = &credentials.ca_pem {
            let certs = Certificate::from_pem_bundle(ca_pem).map_err(|e| {
                ClientError::invalid_credentials(
                    format!("Invalid CA certificate: {}", e),
                    "certificate-authority must be a PEM bundle",
                )
            })?;
            if certs.is_empty() {
                return Err(ClientError::invalid_credentials(
                    "CA bundle contains no certificates",
                    "certificate-authority must be a PEM bundle",
                ));
            }
            for cert in certs {
                builder = builder.add_root_certificate(cert);
            }
        }

        if let Some(identity_pem) = &credentials.identity_pem {
            let identity = Identity::from_pem(identity_pem).map_err(|e| {
                ClientError::invalid_credentials(
                    format!("Invalid client certificate or key: {}", e),
                    "client-certificate and client-key must be PEM encoded",
                )
            })?;
            builder = builder.identity(identity);
        }

        if credentials.insecure_skip_tls_verify {
            warn!("TLS verification of the API server is disabled");
            builder = builder.danger_accept_invalid_certs(true);
        }

        let client = builder.build().map_err(|e| {
            ClientError::invalid_credentials(
                format!("Failed to build HTTP client: {}", e),
                "Check the TLS settings in the credentials",
            )
        })?;

        Ok(Self {
            base_url: credentials.server.trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn send(&self, method: &str, url: &str, request: reqwest::RequestBuilder) -> Result<Response> {
        debug!("{} {}", method, url);

        let resp = request
            .send()
            .await
            .map_err(|e| ClientError::connection_failed(url, e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(ClientError::unexpected_status(method, url, status, body));
        }

        Ok(resp)
    }

    /// GET a list endpoint and decode each item, skipping unusable ones
    async fn list<K, T>(&self, path: &str, kind: &str) -> Result<Vec<T>>
    where
        K: DeserializeOwned,
        T: for<'a> TryFrom<&'a K, Error = podplacer_core::CoreError>,
    {
        let url = format!("{}{}", self.base_url, path);
        let resp = self.send("GET", &url, self.client.get(&url)).await?;

        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| ClientError::decode_failed(format!("{} list", kind), e.to_string()))?;

        let items = match body.get("items").and_then(|v| v.as_array()) {
            Some(items) => items.clone(),
            None => {
                return Err(ClientError::decode_failed(
                    format!("{} list", kind),
                    "response has no items array",
                ))
            }
        };

        let mut out = Vec::with_capacity(items.len());
        for item in items {
            let raw: K = match serde_json::from_value(item) {
                Ok(r) => r,
                Err(e) => {
                    warn!("Failed to parse {} from list: {}", kind, e);
                    continue;
                }
            };
            match T::try_from(&raw) {
                Ok(v) => out.push(v),
                Err(e) => warn!("Skipping unusable {}: {}", kind, e),
            }
        }

        Ok(out)
    }
}

#[async_trait]
impl ClusterApi for ApiClient {
    /// GET /api/v1/nodes
    async fn list_nodes(&self) -> Result<Vec<NodeInfo>> {
        self.list::<Node, NodeInfo>("/api/v1/nodes", "node").await
    }

    /// GET /api/v1/pods
    async fn list_pods(&self) -> Result<Vec<PodInfo>> {
        self.list::<Pod, PodInfo>("/api/v1/pods", "pod").await
    }

    /// GET /api/v1/pods?watch=true&timeoutSeconds={timeout}
    async fn watch_pods(&self, timeout: Duration) -> Result<PodEventStream> {
        let url = format!(
            "{}/api/v1/pods?watch=true&timeoutSeconds={}",
            self.base_url,
            timeout.as_secs().max(1)
        );
        let resp = self.send("GET", &url, self.client.get(&url)).await?;

        Ok(pod_event_stream(resp.bytes_stream().boxed()))
    }

    /// POST /api/v1/namespaces/{namespace}/pods/{name}/binding
    async fn create_binding(&self, namespace: &str, pod_name: &str, node_name: &str) -> Result<()> {
        let url = format!(
            "{}/api/v1/namespaces/{}/pods/{}/binding",
            self.base_url, namespace, pod_name
        );
        let binding = Binding {
            metadata: ObjectMeta {
                name: Some(pod_name.to_string()),
                ..Default::default()
            },
            target: ObjectReference {
                api_version: Some("v1".to_string()),
                kind: Some("Node".to_string()),
                name: Some(node_name.to_string()),
                ..Default::default()
            },
        };

        self.send("POST", &url, self.client.post(&url).json(&binding))
            .await?;
        Ok(())
    }
}
