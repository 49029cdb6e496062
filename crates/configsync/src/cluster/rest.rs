//! Blocking REST client for a Kubernetes-style API server.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::Method;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use super::{
    bundle_from_config_map, object_name, object_namespace, Bundle, BundleReader, ClusterClient,
    ClusterError, PatchParams, Scope, TypeMeta,
};

const SERVICE_ACCOUNT_DIR: &str = "/var/run/secrets/kubernetes.io/serviceaccount";
const APPLY_PATCH_CONTENT_TYPE: &str = "application/apply-patch+yaml";

/// Connection settings for [`RestClient`].
#[derive(Debug)]
pub struct RestConfig {
    /// Base URL, e.g. `https://10.96.0.1:443`.
    pub server: String,
    pub token: Option<SecretString>,
    /// PEM bundle trusted in addition to the system roots.
    pub ca_pem: Option<Vec<u8>>,
    pub insecure_skip_tls_verify: bool,
}

impl RestConfig {
    pub fn new(server: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            token: None,
            ca_pem: None,
            insecure_skip_tls_verify: false,
        }
    }

    pub fn with_token(mut self, token: SecretString) -> Self {
        self.token = Some(token);
        self
    }

    /// Builds the configuration a pod uses to reach its own API server.
    pub fn in_cluster() -> Result<Self, ClusterError> {
        Self::in_cluster_from(Path::new(SERVICE_ACCOUNT_DIR))
    }

    fn in_cluster_from(account_dir: &Path) -> Result<Self, ClusterError> {
        let host = std::env::var("KUBERNETES_SERVICE_HOST")
            .map_err(|_| ClusterError::Config("KUBERNETES_SERVICE_HOST is not set".into()))?;
        let port = std::env::var("KUBERNETES_SERVICE_PORT")
            .map_err(|_| ClusterError::Config("KUBERNETES_SERVICE_PORT is not set".into()))?;

        let host = if host.contains(':') {
            format!("[{host}]")
        } else {
            host
        };

        let read = |file: &str| {
            let path = account_dir.join(file);
            std::fs::read(&path).map_err(|e| {
                ClusterError::Config(format!("failed to read {}: {e}", path.display()))
            })
        };

        let token = String::from_utf8_lossy(&read("token")?).trim().to_string();

        Ok(Self {
            server: format!("https://{host}:{port}"),
            token: Some(SecretString::from(token)),
            ca_pem: Some(read("ca.crt")?),
            insecure_skip_tls_verify: false,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
struct ApiResource {
    name: String,
    kind: String,
    namespaced: bool,
}

#[derive(Debug, Deserialize)]
struct ApiResourceList {
    #[serde(default)]
    resources: Vec<ApiResource>,
}

#[derive(Debug, Default, Deserialize)]
struct Status {
    #[serde(default)]
    reason: String,
    #[serde(default)]
    message: String,
}

/// [`ClusterClient`] and [`BundleReader`] over the API server's REST surface.
///
/// Requests carry no client-side timeout; callers bound a sync run
/// through cancellation instead.
pub struct RestClient {
    http: Client,
    server: String,
    token: Option<SecretString>,
    discovery: Mutex<HashMap<String, Vec<ApiResource>>>,
}

impl RestClient {
    pub fn new(config: RestConfig) -> Result<Self, ClusterError> {
        let mut builder = Client::builder().timeout(None::<Duration>);

        if let Some(pem) = &config.ca_pem {
            let cert = reqwest::Certificate::from_pem(pem)
                .map_err(|e| ClusterError::Config(format!("invalid CA bundle: {e}")))?;
            builder = builder.add_root_certificate(cert);
        }
        if config.insecure_skip_tls_verify {
            builder = builder.danger_accept_invalid_certs(true);
        }

        let http = builder
            .build()
            .map_err(|e| ClusterError::Config(e.to_string()))?;

        Ok(Self {
            http,
            server: config.server.trim_end_matches('/').to_string(),
            token: config.token,
            discovery: Mutex::new(HashMap::new()),
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let mut req = self
            .http
            .request(method, format!("{}{}", self.server, path))
            .header(ACCEPT, "application/json");
        if let Some(token) = &self.token {
            req = req.bearer_auth(token.expose_secret());
        }
        req
    }

    fn send(&self, req: RequestBuilder) -> Result<Response, ClusterError> {
        let response = req
            .send()
            .map_err(|e| ClusterError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().unwrap_or_default();
        let parsed: Status = serde_json::from_str(&body).unwrap_or_default();
        Err(ClusterError::Api {
            code: status.as_u16(),
            reason: if parsed.reason.is_empty() {
                status.canonical_reason().unwrap_or("Unknown").to_string()
            } else {
                parsed.reason
            },
            message: if parsed.message.is_empty() {
                body
            } else {
                parsed.message
            },
        })
    }

    fn resource(&self, type_meta: &TypeMeta) -> Result<ApiResource, ClusterError> {
        let cached = self
            .discovery
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&type_meta.api_version)
            .cloned();

        let resources = match cached {
            Some(resources) => resources,
            None => {
                debug!(api_version = %type_meta.api_version, "Discovering resources");
                let path = group_version_path(&type_meta.api_version);
                let list: ApiResourceList = match self.send(self.request(Method::GET, &path)) {
                    Ok(response) => response
                        .json()
                        .map_err(|e| ClusterError::Transport(e.to_string()))?,
                    Err(ClusterError::Api { code: 404, .. }) => {
                        return Err(ClusterError::UnknownKind(type_meta.clone()))
                    }
                    Err(e) => return Err(e),
                };
                // Subresources like `deployments/scale` share the parent kind.
                let resources: Vec<ApiResource> = list
                    .resources
                    .into_iter()
                    .filter(|r| !r.name.contains('/'))
                    .collect();
                self.discovery
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .insert(type_meta.api_version.clone(), resources.clone());
                resources
            }
        };

        resources
            .into_iter()
            .find(|r| r.kind == type_meta.kind)
            .ok_or_else(|| ClusterError::UnknownKind(type_meta.clone()))
    }
}

impl ClusterClient for RestClient {
    fn scope(&self, type_meta: &TypeMeta) -> Result<Scope, ClusterError> {
        let resource = self.resource(type_meta)?;
        Ok(if resource.namespaced {
            Scope::Namespaced
        } else {
            Scope::Cluster
        })
    }

    fn apply(&self, object: &Value, params: &PatchParams) -> Result<Value, ClusterError> {
        let type_meta = TypeMeta::from_object(object)?;
        let name = object_name(object)?;
        let resource = self.resource(&type_meta)?;

        let base = group_version_path(&type_meta.api_version);
        let path = if resource.namespaced {
            let namespace = object_namespace(object).unwrap_or("default");
            format!("{base}/namespaces/{namespace}/{}/{name}", resource.name)
        } else {
            format!("{base}/{}/{name}", resource.name)
        };

        let mut query = vec![("fieldManager", params.field_manager.as_str())];
        if params.force {
            query.push(("force", "true"));
        }
        if params.dry_run {
            query.push(("dryRun", "All"));
        }

        let body =
            serde_json::to_vec(object).map_err(|e| ClusterError::InvalidObject(e.to_string()))?;

        let response = self.send(
            self.request(Method::PATCH, &path)
                .query(&query)
                .header(CONTENT_TYPE, APPLY_PATCH_CONTENT_TYPE)
                .body(body),
        )?;

        response
            .json()
            .map_err(|e| ClusterError::Transport(e.to_string()))
    }
}

impl BundleReader for RestClient {
    fn read_bundle(&self, namespace: &str, name: &str) -> Result<Bundle, ClusterError> {
        let path = format!("/api/v1/namespaces/{namespace}/configmaps/{name}");
        let config_map: Value = match self.send(self.request(Method::GET, &path)) {
            Ok(response) => response
                .json()
                .map_err(|e| ClusterError::Transport(e.to_string()))?,
            Err(ClusterError::Api { code: 404, .. }) => {
                return Err(ClusterError::NotFound {
                    kind: "ConfigMap".to_string(),
                    name: format!("{namespace}/{name}"),
                })
            }
            Err(e) => return Err(e),
        };
        bundle_from_config_map(&config_map)
    }
}

fn group_version_path(api_version: &str) -> String {
    if api_version.contains('/') {
        format!("/apis/{api_version}")
    } else {
        format!("/api/{api_version}")
    }
}
