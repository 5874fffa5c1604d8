//! Minimal Kubernetes REST client: pod listing, pod logs and custom-object listing.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use super::config::ClusterConfig;
use crate::utils::http::{send_checked_json, send_checked_text};
use crate::{DashboardError, Result};

const SERVICE_ACCOUNT_DIR: &str = "/var/run/secrets/kubernetes.io/serviceaccount";
const MAX_LOG_BYTES: usize = 2 * 1024 * 1024;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodSummary {
    pub name: String,
    pub namespace: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub containers: Vec<String>,
}

impl PodSummary {
    pub fn is_running(&self) -> bool {
        self.phase.as_deref() == Some("Running")
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LogOptions {
    pub tail_lines: Option<u32>,
    pub since_seconds: Option<u64>,
    pub container: Option<String>,
}

/// A custom resource collection under an API group/version.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResourceRef {
    pub group: &'static str,
    pub version: &'static str,
    pub plural: &'static str,
}

impl ResourceRef {
    pub fn path(&self, namespace: Option<&str>) -> String {
        match namespace {
            Some(namespace) => format!(
                "/apis/{}/{}/namespaces/{}/{}",
                self.group, self.version, namespace, self.plural
            ),
            None => format!("/apis/{}/{}/{}", self.group, self.version, self.plural),
        }
    }
}

/// The slice of the Kubernetes API the dashboard consumes.
#[async_trait]
pub trait Cluster: Send + Sync {
    async fn list_pods(&self, namespace: &str, label_selector: &str) -> Result<Vec<PodSummary>>;

    async fn pod_logs(&self, namespace: &str, pod: &str, options: &LogOptions) -> Result<String>;

    /// `namespace = None` lists at cluster scope.
    async fn list_custom_objects(
        &self,
        resource: &ResourceRef,
        namespace: Option<&str>,
    ) -> Result<Vec<Value>>;
}

#[derive(Clone, Default, PartialEq, Eq)]
pub struct KubeCredentials {
    pub api_url: String,
    pub token: Option<String>,
    pub ca_pem: Option<Vec<u8>>,
    pub insecure_skip_tls_verify: bool,
}

impl std::fmt::Debug for KubeCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeCredentials")
            .field("api_url", &self.api_url)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("ca_pem", &self.ca_pem.as_ref().map(|pem| pem.len()))
            .field("insecure_skip_tls_verify", &self.insecure_skip_tls_verify)
            .finish()
    }
}

impl KubeCredentials {
    /// Explicit API URL first, then the in-cluster service account, then a kubeconfig.
    pub fn resolve(config: &ClusterConfig) -> Result<Self> {
        if let Some(api_url) = config.api_url.as_deref().filter(|url| !url.trim().is_empty()) {
            return Ok(Self {
                api_url: api_url.trim().to_string(),
                token: config.token.clone(),
                ca_pem: None,
                insecure_skip_tls_verify: config.insecure_skip_tls_verify,
            });
        }

        if let Some(mut credentials) = Self::in_cluster(Path::new(SERVICE_ACCOUNT_DIR))? {
            if config.token.is_some() {
                credentials.token = config.token.clone();
            }
            credentials.insecure_skip_tls_verify |= config.insecure_skip_tls_verify;
            return Ok(credentials);
        }

        let path = match config.kubeconfig.clone() {
            Some(path) => path,
            None => default_kubeconfig_path().ok_or_else(|| {
                DashboardError::Config(
                    "no kubernetes credentials: not in-cluster and no kubeconfig".to_string(),
                )
            })?,
        };
        let mut credentials = Self::from_kubeconfig(&path)?;
        if config.token.is_some() {
            credentials.token = config.token.clone();
        }
        credentials.insecure_skip_tls_verify |= config.insecure_skip_tls_verify;
        Ok(credentials)
    }

    pub fn in_cluster(service_account_dir: &Path) -> Result<Option<Self>> {
        let Ok(host) = std::env::var("KUBERNETES_SERVICE_HOST") else {
            return Ok(None);
        };
        let port = std::env::var("KUBERNETES_SERVICE_PORT").unwrap_or_else(|_| "443".to_string());
        let token_path = service_account_dir.join("token");
        if !token_path.exists() {
            return Ok(None);
        }
        let token = std::fs::read_to_string(&token_path)?.trim().to_string();
        let ca_path = service_account_dir.join("ca.crt");
        let ca_pem = if ca_path.exists() {
            Some(std::fs::read(ca_path)?)
        } else {
            None
        };
        let host = if host.contains(':') && !host.starts_with('[') {
            format!("[{host}]")
        } else {
            host
        };
        Ok(Some(Self {
            api_url: format!("https://{host}:{port}"),
            token: Some(token),
            ca_pem,
            insecure_skip_tls_verify: false,
        }))
    }

    pub fn from_kubeconfig(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_kubeconfig_str(&raw, path.parent())
    }

    pub fn from_kubeconfig_str(raw: &str, base_dir: Option<&Path>) -> Result<Self> {
        let kubeconfig: Kubeconfig = serde_yaml::from_str(raw)?;
        let context_name = kubeconfig
            .current_context
            .clone()
            .or_else(|| kubeconfig.contexts.first().map(|context| context.name.clone()))
            .ok_or_else(|| DashboardError::Config("kubeconfig has no contexts".to_string()))?;
        let context = kubeconfig
            .contexts
            .iter()
            .find(|context| context.name == context_name)
            .map(|context| &context.context)
            .ok_or_else(|| {
                DashboardError::Config(format!("kubeconfig context not found: {context_name}"))
            })?;
        let cluster = kubeconfig
            .clusters
            .iter()
            .find(|cluster| cluster.name == context.cluster)
            .map(|cluster| &cluster.cluster)
            .ok_or_else(|| {
                DashboardError::Config(format!("kubeconfig cluster not found: {}", context.cluster))
            })?;
        let user = context.user.as_deref().and_then(|name| {
            kubeconfig
                .users
                .iter()
                .find(|user| user.name == name)
                .map(|user| &user.user)
        });

        let ca_pem = match (&cluster.certificate_authority_data, &cluster.certificate_authority) {
            (Some(data), _) => Some(BASE64.decode(data.trim())?),
            (None, Some(file)) => Some(std::fs::read(resolve_relative(file, base_dir))?),
            (None, None) => None,
        };

        let token = match user {
            Some(user) => match (&user.token, &user.token_file) {
                (Some(token), _) => Some(token.trim().to_string()),
                (None, Some(file)) => Some(
                    std::fs::read_to_string(resolve_relative(file, base_dir))?
                        .trim()
                        .to_string(),
                ),
                (None, None) => {
                    if user.client_certificate_data.is_some() || user.exec.is_some() {
                        warn!(
                            context = %context_name,
                            "kubeconfig user uses client certificates or exec auth; only token auth is supported"
                        );
                    }
                    None
                }
            },
            None => None,
        };

        Ok(Self {
            api_url: cluster.server.trim().to_string(),
            token,
            ca_pem,
            insecure_skip_tls_verify: cluster.insecure_skip_tls_verify,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct Kubeconfig {
    #[serde(default)]
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
    cluster: KubeconfigCluster,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct KubeconfigCluster {
    server: String,
    #[serde(default)]
    certificate_authority_data: Option<String>,
    #[serde(default)]
    certificate_authority: Option<String>,
    #[serde(default)]
    insecure_skip_tls_verify: bool,
}

#[derive(Debug, Deserialize)]
struct NamedContext {
    name: String,
    context: KubeconfigContext,
}

#[derive(Debug, Deserialize)]
struct KubeconfigContext {
    cluster: String,
    #[serde(default)]
    user: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NamedUser {
    name: String,
    #[serde(default)]
    user: KubeconfigUser,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct KubeconfigUser {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    token_file: Option<String>,
    #[serde(default)]
    client_certificate_data: Option<String>,
    #[serde(default)]
    exec: Option<Value>,
}

fn default_kubeconfig_path() -> Option<PathBuf> {
    let home = std::env::var_os("HOME")?;
    let path = PathBuf::from(home).join(".kube").join("config");
    path.exists().then_some(path)
}

fn resolve_relative(file: &str, base_dir: Option<&Path>) -> PathBuf {
    let path = PathBuf::from(file);
    match base_dir {
        Some(base) if path.is_relative() => base.join(path),
        _ => path,
    }
}

#[derive(Debug, Deserialize)]
struct ObjectList<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct PodObject {
    #[serde(default)]
    metadata: PodMetadata,
    #[serde(default)]
    spec: Option<PodSpec>,
    #[serde(default)]
    status: Option<PodStatus>,
}

#[derive(Debug, Default, Deserialize)]
struct PodMetadata {
    #[serde(default)]
    name: String,
    #[serde(default)]
    namespace: Option<String>,
    #[serde(default)]
    labels: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct PodSpec {
    #[serde(default)]
    containers: Vec<ContainerName>,
}

#[derive(Debug, Deserialize)]
struct ContainerName {
    name: String,
}

#[derive(Debug, Deserialize)]
struct PodStatus {
    #[serde(default)]
    phase: Option<String>,
}

/// [`Cluster`] over the Kubernetes REST API with bearer-token auth.
#[derive(Clone)]
pub struct KubeClient {
    api_url: String,
    client: reqwest::Client,
    token: Option<String>,
}

impl std::fmt::Debug for KubeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeClient")
            .field("api_url", &self.api_url)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl KubeClient {
    pub fn new(credentials: KubeCredentials, timeout_seconds: u64) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_seconds.max(1)))
            .danger_accept_invalid_certs(credentials.insecure_skip_tls_verify);
        if let Some(pem) = credentials.ca_pem.as_deref() {
            for cert in reqwest::Certificate::from_pem_bundle(pem)? {
                builder = builder.add_root_certificate(cert);
            }
        }
        Ok(Self {
            api_url: credentials.api_url.trim_end_matches('/').to_string(),
            client: builder.build()?,
            token: credentials.token.filter(|token| !token.is_empty()),
        })
    }

    pub fn from_config(config: &ClusterConfig) -> Result<Self> {
        let credentials = KubeCredentials::resolve(config)?;
        debug!(api_url = %credentials.api_url, "resolved kubernetes credentials");
        Self::new(credentials, config.timeout_seconds)
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    /// Service account token, reused for in-cluster Prometheus/Thanos auth.
    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    fn get(&self, path: &str) -> reqwest::RequestBuilder {
        let mut req = self.client.get(format!("{}{}", self.api_url, path));
        if let Some(token) = self.token.as_deref() {
            req = req.bearer_auth(token);
        }
        req
    }
}

#[async_trait]
impl Cluster for KubeClient {
    async fn list_pods(&self, namespace: &str, label_selector: &str) -> Result<Vec<PodSummary>> {
        let mut req = self.get(&format!("/api/v1/namespaces/{namespace}/pods"));
        if !label_selector.trim().is_empty() {
            req = req.query(&[("labelSelector", label_selector.trim())]);
        }
        let list: ObjectList<PodObject> = send_checked_json(req).await?;
        Ok(list
            .items
            .into_iter()
            .map(|pod| PodSummary {
                name: pod.metadata.name,
                namespace: pod
                    .metadata
                    .namespace
                    .unwrap_or_else(|| namespace.to_string()),
                phase: pod.status.and_then(|status| status.phase),
                labels: pod.metadata.labels,
                containers: pod
                    .spec
                    .map(|spec| spec.containers.into_iter().map(|c| c.name).collect())
                    .unwrap_or_default(),
            })
            .collect())
    }

    async fn pod_logs(&self, namespace: &str, pod: &str, options: &LogOptions) -> Result<String> {
        let mut query: Vec<(&str, String)> = Vec::new();
        if let Some(tail_lines) = options.tail_lines {
            query.push(("tailLines", tail_lines.to_string()));
        }
        if let Some(since_seconds) = options.since_seconds {
            query.push(("sinceSeconds", since_seconds.to_string()));
        }
        if let Some(container) = options.container.as_deref() {
            query.push(("container", container.to_string()));
        }
        let req = self
            .get(&format!("/api/v1/namespaces/{namespace}/pods/{pod}/log"))
            .query(&query);
        send_checked_text(req, MAX_LOG_BYTES).await
    }

    async fn list_custom_objects(
        &self,
        resource: &ResourceRef,
        namespace: Option<&str>,
    ) -> Result<Vec<Value>> {
        let list: ObjectList<Value> = send_checked_json(self.get(&resource.path(namespace))).await?;
        Ok(list.items)
    }
}

/// Stand-in used when no credentials resolve: every call fails with the resolution error,
/// so each data source degrades on its own.
#[derive(Clone, Debug)]
pub struct UnavailableCluster {
    reason: String,
}

impl UnavailableCluster {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    fn error(&self) -> DashboardError {
        DashboardError::Config(format!("kubernetes unavailable: {}", self.reason))
    }
}

#[async_trait]
impl Cluster for UnavailableCluster {
    async fn list_pods(&self, _namespace: &str, _label_selector: &str) -> Result<Vec<PodSummary>> {
        Err(self.error())
    }

    async fn pod_logs(&self, _namespace: &str, _pod: &str, _options: &LogOptions) -> Result<String> {
        Err(self.error())
    }

    async fn list_custom_objects(
        &self,
        _resource: &ResourceRef,
        _namespace: Option<&str>,
    ) -> Result<Vec<Value>> {
        Err(self.error())
    }
}
