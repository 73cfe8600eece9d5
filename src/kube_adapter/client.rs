//! Thin HTTP client over the slice of the Kubernetes API this controller
//! needs: list/watch nodes, patch a node's schedulable flag and labels,
//! list pods bound to a node, and evict them. No `kube`-crate dependency;
//! the surface is small enough to talk to directly with `reqwest`, the
//! same way the teacher lineage's `cincinnati`/`fleet_lock` clients do.

use super::node_record::NodeRecord;
use anyhow::{Context, Result};
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Default in-cluster service-account token path.
const SA_TOKEN_PATH: &str = "/var/run/secrets/kubernetes.io/serviceaccount/token";
/// Default in-cluster service-account CA bundle path.
const SA_CA_PATH: &str = "/var/run/secrets/kubernetes.io/serviceaccount/ca.crt";

/// Errors talking to the cluster API. Wrapped into the core's
/// `OperatorError`/`PublishError` taxonomy at the adapter boundary (spec §7);
/// never surfaced to the core directly.
#[derive(Debug, Error)]
pub enum KubeError {
    /// The request itself failed (transport/TLS/timeout), never reached a
    /// response.
    #[error("request to '{path}' failed: {source}")]
    Request {
        /// The request path, for diagnostics.
        path: String,
        /// The underlying transport error.
        #[source]
        source: reqwest::Error,
    },
    /// The API server answered with a non-success status.
    #[error("'{path}' returned unexpected status {status}: {body}")]
    UnexpectedStatus {
        /// The request path, for diagnostics.
        path: String,
        /// The HTTP status returned.
        status: StatusCode,
        /// The response body, for diagnostics.
        body: String,
    },
}

/// How to reach and authenticate against the cluster API server.
#[derive(Clone, Debug)]
pub struct ClusterConfig {
    /// Base URL of the API server, e.g. `https://10.0.0.1:6443`.
    pub api_server: reqwest::Url,
    /// Bearer token used for every request.
    pub token: String,
    /// PEM-encoded CA bundle to validate the API server's certificate, if
    /// not already trusted by the system store.
    pub ca_cert_pem: Option<Vec<u8>>,
    /// Maximum number of re-fetch-and-reapply attempts on a 409 Conflict
    /// when patching a node's metadata.
    pub conflict_retries: u32,
}

impl ClusterConfig {
    /// Build configuration the way a pod running in-cluster finds its API
    /// server and credentials: the `KUBERNETES_SERVICE_HOST`/`_PORT` env
    /// vars the kubelet injects, plus the mounted service-account token and
    /// CA bundle.
    pub fn from_in_cluster_env() -> Result<Self> {
        let host = std::env::var("KUBERNETES_SERVICE_HOST")
            .context("KUBERNETES_SERVICE_HOST is not set; not running in-cluster?")?;
        let port = std::env::var("KUBERNETES_SERVICE_PORT").unwrap_or_else(|_| "443".to_string());
        let api_server = reqwest::Url::parse(&format!("https://{host}:{port}"))
            .context("failed to build in-cluster API server URL")?;
        let token = read_token(SA_TOKEN_PATH)?;
        let ca_cert_pem = std::fs::read(SA_CA_PATH).ok();

        Ok(ClusterConfig {
            api_server,
            token,
            ca_cert_pem,
            conflict_retries: 3,
        })
    }
}

fn read_token(path: impl AsRef<Path>) -> Result<String> {
    let raw = std::fs::read_to_string(path.as_ref())
        .with_context(|| format!("failed to read service-account token at '{}'", path.as_ref().display()))?;
    Ok(raw.trim().to_string())
}

/// Client for the cluster API server. Cheap to clone (wraps a
/// `reqwest::Client`, which is itself reference-counted internally).
#[derive(Clone, Debug)]
pub struct KubeClient {
    http: reqwest::Client,
    api_server: reqwest::Url,
    token: String,
    conflict_retries: u32,
}

impl KubeClient {
    /// Build a client from cluster connection settings.
    pub fn new(config: ClusterConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder().timeout(Duration::from_secs(30));
        if let Some(pem) = &config.ca_cert_pem {
            let cert = reqwest::Certificate::from_pem(pem).context("failed to parse CA bundle")?;
            builder = builder.add_root_certificate(cert);
        }
        let http = builder.build().context("failed to build HTTP client")?;
        Ok(KubeClient {
            http,
            api_server: config.api_server,
            token: config.token,
            conflict_retries: config.conflict_retries,
        })
    }

    fn url(&self, path: &str) -> Result<reqwest::Url, KubeError> {
        self.api_server.join(path).map_err(|e| KubeError::Request {
            path: path.to_string(),
            source: e.into(),
        })
    }

    fn request(&self, method: Method, path: &str) -> Result<reqwest::RequestBuilder, KubeError> {
        let url = self.url(path)?;
        Ok(self
            .http
            .request(method, url)
            .bearer_auth(&self.token)
            .header("accept", "application/json"))
    }

    async fn send_json<T: for<'de> Deserialize<'de>>(
        &self,
        req: reqwest::RequestBuilder,
        path: &str,
    ) -> Result<T, KubeError> {
        let resp = req.send().await.map_err(|e| KubeError::Request {
            path: path.to_string(),
            source: e,
        })?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(KubeError::UnexpectedStatus {
                path: path.to_string(),
                status,
                body,
            });
        }
        resp.json::<T>().await.map_err(|e| KubeError::Request {
            path: path.to_string(),
            source: e,
        })
    }

    /// List all nodes in the cluster.
    pub async fn list_nodes(&self) -> Result<Vec<NodeRecord>, KubeError> {
        #[derive(Deserialize)]
        struct NodeList {
            items: Vec<NodeRecord>,
        }
        let path = "/api/v1/nodes";
        let req = self.request(Method::GET, path)?;
        let list: NodeList = self.send_json(req, path).await?;
        Ok(list.items)
    }

    /// Patch a node's `spec.unschedulable` flag. Idempotent: setting the
    /// same value twice is a no-op as far as the caller can observe.
    pub async fn patch_unschedulable(&self, node_name: &str, unschedulable: bool) -> Result<(), KubeError> {
        let path = format!("/api/v1/nodes/{node_name}");
        let body = json!({ "spec": { "unschedulable": unschedulable } });
        let req = self
            .request(Method::PATCH, &path)?
            .header("content-type", "application/strategic-merge-patch+json")
            .json(&body);
        let resp = req.send().await.map_err(|e| KubeError::Request {
            path: path.clone(),
            source: e,
        })?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(KubeError::UnexpectedStatus { path, status, body });
        }
        Ok(())
    }

    /// Patch a single label on a node, retrying on 409 Conflict by
    /// reapplying the same merge patch (a conflict here means a concurrent
    /// writer touched the node, not that our patch's intent is stale).
    pub async fn patch_label(&self, node_name: &str, key: &str, value: &str) -> Result<(), KubeError> {
        let path = format!("/api/v1/nodes/{node_name}");
        let body = json!({ "metadata": { "labels": { key: value } } });
        let attempts = self.conflict_retries + 1;

        let mut last_err = None;
        for _ in 0..attempts {
            let req = self
                .request(Method::PATCH, &path)?
                .header("content-type", "application/strategic-merge-patch+json")
                .json(&body);
            let resp = req.send().await.map_err(|e| KubeError::Request {
                path: path.clone(),
                source: e,
            })?;
            let status = resp.status();
            if status.is_success() {
                return Ok(());
            }
            let body = resp.text().await.unwrap_or_default();
            let err = KubeError::UnexpectedStatus {
                path: path.clone(),
                status,
                body,
            };
            if status != StatusCode::CONFLICT {
                return Err(err);
            }
            last_err = Some(err);
        }
        Err(last_err.expect("loop runs at least once"))
    }

    /// List pods bound to `node_name` (`spec.nodeName` field selector).
    pub async fn list_pods_on_node(&self, node_name: &str) -> Result<Vec<PodRef>, KubeError> {
        #[derive(Deserialize)]
        struct PodList {
            items: Vec<PodRef>,
        }
        let path = format!("/api/v1/pods?fieldSelector=spec.nodeName%3D{node_name}");
        let req = self.request(Method::GET, &path)?;
        let list: PodList = self.send_json(req, &path).await?;
        Ok(list.items)
    }

    /// Evict a single pod via the eviction subresource. A `429` (blocked by
    /// a pod-disruption budget) is reported as a refusal, not an error.
    pub async fn evict_pod(&self, namespace: &str, name: &str) -> Result<EvictionOutcome, KubeError> {
        let path = format!("/api/v1/namespaces/{namespace}/pods/{name}/eviction");
        let body = json!({
            "apiVersion": "policy/v1",
            "kind": "Eviction",
            "metadata": { "name": name, "namespace": namespace },
        });
        let req = self.request(Method::POST, &path)?.json(&body);
        let resp = req.send().await.map_err(|e| KubeError::Request {
            path: path.clone(),
            source: e,
        })?;
        match resp.status() {
            s if s.is_success() => Ok(EvictionOutcome::Evicted),
            StatusCode::TOO_MANY_REQUESTS => Ok(EvictionOutcome::Refused),
            StatusCode::NOT_FOUND => Ok(EvictionOutcome::Evicted),
            status => {
                let body = resp.text().await.unwrap_or_default();
                Err(KubeError::UnexpectedStatus { path, status, body })
            }
        }
    }
}

/// Just enough of a pod to decide whether it's evictable and where to send
/// the eviction request.
#[derive(Clone, Debug, Deserialize)]
pub struct PodRef {
    /// The pod's name/namespace/owner identity.
    pub metadata: PodMetadata,
}

/// Identity fields of a pod, enough to decide eviction eligibility and
/// target.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodMetadata {
    /// The pod's name.
    pub name: String,
    /// The namespace the pod belongs to.
    pub namespace: String,
    /// Controllers that own this pod, if any.
    #[serde(default)]
    pub owner_references: Vec<OwnerReference>,
}

/// A controller reference on a pod, used to detect daemon-set ownership.
#[derive(Clone, Debug, Deserialize)]
pub struct OwnerReference {
    /// The owning object's kind, e.g. `"DaemonSet"`.
    pub kind: String,
}

impl PodRef {
    /// Daemon-set-owned pods are excluded from drain (spec §4.3): the
    /// daemon set controller will simply restart them on the same node.
    pub fn is_daemonset_owned(&self) -> bool {
        self.metadata
            .owner_references
            .iter()
            .any(|r| r.kind == "DaemonSet")
    }
}

/// Result of a single eviction attempt.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EvictionOutcome {
    /// The pod was evicted (or was already gone).
    Evicted,
    /// The pod refused eviction, e.g. blocked by a pod-disruption budget.
    Refused,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_client() -> KubeClient {
        KubeClient::new(ClusterConfig {
            api_server: reqwest::Url::parse(&mockito::server_url()).unwrap(),
            token: "test-token".to_string(),
            ca_cert_pem: None,
            conflict_retries: 2,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn list_nodes_parses_items() {
        let body = r#"{"items":[{"metadata":{"name":"n1","labels":{"wanted":"stabilize"}}}]}"#;
        let m = mockito::mock("GET", "/api/v1/nodes")
            .match_header("authorization", "Bearer test-token")
            .with_status(200)
            .with_body(body)
            .create();

        let client = test_client();
        let nodes = client.list_nodes().await.unwrap();
        m.assert();
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].metadata.name, "n1");
    }

    #[tokio::test]
    async fn patch_unschedulable_sends_merge_patch() {
        let m = mockito::mock("PATCH", "/api/v1/nodes/n1")
            .match_header("content-type", "application/strategic-merge-patch+json")
            .match_body(mockito::Matcher::PartialJsonString(
                r#"{"spec":{"unschedulable":true}}"#.to_string(),
            ))
            .with_status(200)
            .with_body("{}")
            .create();

        let client = test_client();
        client.patch_unschedulable("n1", true).await.unwrap();
        m.assert();
    }

    #[tokio::test]
    async fn patch_label_succeeds_on_first_try() {
        let m = mockito::mock("PATCH", "/api/v1/nodes/n1")
            .match_body(mockito::Matcher::PartialJsonString(
                r#"{"metadata":{"labels":{"wanted":"prepare_update"}}}"#.to_string(),
            ))
            .with_status(200)
            .with_body("{}")
            .create();

        let client = test_client();
        client.patch_label("n1", "wanted", "prepare_update").await.unwrap();
        m.assert();
    }

    #[tokio::test]
    async fn patch_label_gives_up_after_persistent_conflict() {
        let m = mockito::mock("PATCH", "/api/v1/nodes/n1")
            .with_status(409)
            .with_body("conflict")
            .expect_at_least(1)
            .create();

        // conflict_retries is 2 in `test_client`, so 3 total attempts.
        let client = test_client();
        let err = client
            .patch_label("n1", "wanted", "prepare_update")
            .await
            .unwrap_err();
        assert!(matches!(err, KubeError::UnexpectedStatus { .. }));
        m.assert();
    }

    #[tokio::test]
    async fn evict_pod_maps_429_to_refused() {
        let m = mockito::mock("POST", "/api/v1/namespaces/default/pods/p1/eviction")
            .with_status(429)
            .create();

        let client = test_client();
        let outcome = client.evict_pod("default", "p1").await.unwrap();
        m.assert();
        assert_eq!(outcome, EvictionOutcome::Refused);
    }

    #[test]
    fn daemonset_owned_pods_are_excluded() {
        let pod: PodRef = serde_json::from_str(
            r#"{"metadata":{"name":"p1","namespace":"kube-system","ownerReferences":[{"kind":"DaemonSet"}]}}"#,
        )
        .unwrap();
        assert!(pod.is_daemonset_owned());
    }
}
