//! HTTP client for the upstream inventory API, wrapped in the per-endpoint
//! circuit breaker and the SWR cache.
//!
//! Grounded on the predecessor gateway's `CloudClient`: a `reqwest::Client`
//! built once with a timeout and a fixed user agent, one call site per
//! operation, bearer-token auth, and non-2xx responses turned into a typed
//! error rather than silently swallowed.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::{Client, ClientBuilder};
use serde::{Deserialize, Serialize};
use tracing::debug;

use fleet_cache::SwrCache;
use fleet_common::circuit_breaker::with_circuit_breaker;
use fleet_common::{CircuitBreakerRegistry, Container, ContainerState, Endpoint, EndpointId, Error, Result};

/// Raw container shape as returned by the upstream inventory API, prior to
/// normalization into `fleet_common::Container`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawContainer {
    #[serde(rename = "Id")]
    pub id: String,
    #[serde(rename = "Names")]
    pub names: Vec<String>,
    #[serde(rename = "Image")]
    pub image: String,
    #[serde(rename = "State")]
    pub state: String,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    #[serde(default)]
    pub health_status: Option<String>,
}

fn normalize_state(raw: &str) -> ContainerState {
    match raw {
        "running" => ContainerState::Running,
        "exited" | "stopped" | "created" => ContainerState::Stopped,
        "paused" => ContainerState::Paused,
        "dead" => ContainerState::Dead,
        _ => ContainerState::Unknown,
    }
}

/// Client for the upstream inventory API (endpoints, containers, images,
/// container lifecycle operations, exec, archives, and edge jobs), guarded
/// per-endpoint by a circuit breaker and fronted by an SWR cache.
pub struct InventoryClient {
    http: Client,
    base_url: String,
    api_token: Option<String>,
    cache: Arc<SwrCache>,
    circuits: Arc<CircuitBreakerRegistry>,
    endpoints_ttl: Duration,
    containers_ttl: Duration,
}

impl InventoryClient {
    pub fn new(
        base_url: String,
        api_token: Option<String>,
        cache: Arc<SwrCache>,
        circuits: Arc<CircuitBreakerRegistry>,
        endpoints_ttl: Duration,
        containers_ttl: Duration,
    ) -> Result<Self> {
        let http = ClientBuilder::new()
            .timeout(Duration::from_secs(30))
            .user_agent("fleet-observability/0.1.0")
            .build()
            .map_err(|e| Error::Configuration(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            base_url,
            api_token,
            cache,
            circuits,
            endpoints_ttl,
            containers_ttl,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    fn authed(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_token {
            Some(token) => builder.header("X-API-Key", token.clone()),
            None => builder,
        }
    }

    /// Whether `endpoint_id`'s circuit is open (hard failure) or degraded
    /// (soft, latency-based). The monitoring cycle consults both before
    /// fanning out fetches.
    pub fn is_circuit_open(&self, endpoint_id: EndpointId) -> bool {
        self.circuits.is_open(endpoint_id)
    }

    pub fn is_endpoint_degraded(&self, endpoint_id: EndpointId) -> bool {
        self.circuits.is_degraded(endpoint_id)
    }

    /// Lists all managed endpoints, SWR-cached under the `endpoints` key.
    pub async fn get_endpoints(&self) -> Result<Arc<Vec<Endpoint>>> {
        let cache = self.cache.clone();
        let http = self.http.clone();
        let url = self.url("/api/endpoints");
        let token = self.api_token.clone();

        cache
            .cached_fetch_swr("endpoints", self.endpoints_ttl, move || async move {
                let mut builder = http.get(&url);
                if let Some(token) = token {
                    builder = builder.header("X-API-Key", token);
                }
                let response = builder
                    .send()
                    .await
                    .map_err(|e| Error::TransientUpstream(format!("GET /api/endpoints: {e}")))?;
                if !response.status().is_success() {
                    return Err(Error::TransientUpstream(format!(
                        "GET /api/endpoints returned {}",
                        response.status()
                    )));
                }
                response
                    .json::<Vec<Endpoint>>()
                    .await
                    .map_err(|e| Error::TransientUpstream(format!("decoding endpoints: {e}")))
            })
            .await
    }

    /// Fetches and normalizes containers for a single endpoint, tracking
    /// circuit state and call latency for the degraded-state heuristic.
    pub async fn get_containers(&self, endpoint_id: EndpointId, endpoint_name: &str) -> Result<Vec<Container>> {
        let circuits = self.circuits.clone();
        let http = self.http.clone();
        let url = self.url(&format!("/api/endpoints/{endpoint_id}/docker/containers/json?all=true"));
        let token = self.api_token.clone();
        let endpoint_name = endpoint_name.to_string();

        let key = format!("containers:{endpoint_id}");
        let ttl = self.containers_ttl;

        let raw: Arc<Vec<RawContainer>> = with_circuit_breaker(&circuits, endpoint_id, || async {
            let started = Instant::now();
            let cache = self.cache.clone();
            let result = cache
                .cached_fetch(&key, ttl, move || async move {
                    let mut builder = http.get(&url);
                    if let Some(token) = token {
                        builder = builder.header("X-API-Key", token);
                    }
                    let response = builder.send().await.map_err(|e| {
                        Error::TransientUpstream(format!("GET containers for endpoint {endpoint_id}: {e}"))
                    })?;
                    if !response.status().is_success() {
                        return Err(Error::TransientUpstream(format!(
                            "GET containers for endpoint {endpoint_id} returned {}",
                            response.status()
                        )));
                    }
                    response
                        .json::<Vec<RawContainer>>()
                        .await
                        .map_err(|e| Error::TransientUpstream(format!("decoding containers: {e}")))
                })
                .await;
            circuits.record_latency(endpoint_id, started.elapsed());
            result
        })
        .await?;

        Ok(raw
            .iter()
            .map(|c| Container {
                id: c.id.clone(),
                endpoint_id,
                endpoint_name: endpoint_name.clone(),
                name: c
                    .names
                    .first()
                    .map(|n| n.trim_start_matches('/').to_string())
                    .unwrap_or_else(|| c.id.clone()),
                image: c.image.clone(),
                state: normalize_state(&c.state),
                labels: c.labels.clone(),
                ports: Vec::new(),
                networks: Vec::new(),
                health_status: c.health_status.clone(),
            })
            .collect())
    }

    pub async fn start_container(&self, endpoint_id: EndpointId, container_id: &str) -> Result<()> {
        self.lifecycle_call(endpoint_id, container_id, "start").await
    }

    pub async fn stop_container(&self, endpoint_id: EndpointId, container_id: &str) -> Result<()> {
        self.lifecycle_call(endpoint_id, container_id, "stop").await
    }

    pub async fn restart_container(&self, endpoint_id: EndpointId, container_id: &str) -> Result<()> {
        self.lifecycle_call(endpoint_id, container_id, "restart").await
    }

    pub async fn remove_container(&self, endpoint_id: EndpointId, container_id: &str) -> Result<()> {
        let circuits = self.circuits.clone();
        let http = self.http.clone();
        let url = self.url(&format!(
            "/api/endpoints/{endpoint_id}/docker/containers/{container_id}?force=true"
        ));
        let token = self.api_token.clone();

        with_circuit_breaker(&circuits, endpoint_id, || async move {
            let mut builder = http.delete(&url);
            if let Some(token) = token {
                builder = builder.header("X-API-Key", token);
            }
            let response = builder
                .send()
                .await
                .map_err(|e| Error::TransientUpstream(format!("DELETE container {container_id}: {e}")))?;
            if !response.status().is_success() {
                return Err(Error::TransientUpstream(format!(
                    "DELETE container {container_id} returned {}",
                    response.status()
                )));
            }
            Ok(())
        })
        .await
    }

    async fn lifecycle_call(&self, endpoint_id: EndpointId, container_id: &str, action: &str) -> Result<()> {
        let circuits = self.circuits.clone();
        let http = self.http.clone();
        let url = self.url(&format!(
            "/api/endpoints/{endpoint_id}/docker/containers/{container_id}/{action}"
        ));
        let token = self.api_token.clone();
        let action = action.to_string();

        with_circuit_breaker(&circuits, endpoint_id, || async move {
            let mut builder = http.post(&url);
            if let Some(token) = token {
                builder = builder.header("X-API-Key", token);
            }
            let response = builder.send().await.map_err(|e| {
                Error::TransientUpstream(format!("{action} container {container_id}: {e}"))
            })?;
            if !response.status().is_success() {
                return Err(Error::TransientUpstream(format!(
                    "{action} container {container_id} returned {}",
                    response.status()
                )));
            }
            Ok(())
        })
        .await
    }

    pub async fn get_images(&self, endpoint_id: EndpointId) -> Result<serde_json::Value> {
        self.get_json(endpoint_id, &format!("/api/endpoints/{endpoint_id}/docker/images/json"))
            .await
    }

    pub async fn create_exec(&self, endpoint_id: EndpointId, container_id: &str, cmd: Vec<String>) -> Result<String> {
        let circuits = self.circuits.clone();
        let http = self.http.clone();
        let url = self.url(&format!("/api/endpoints/{endpoint_id}/docker/containers/{container_id}/exec"));
        let token = self.api_token.clone();

        #[derive(Serialize)]
        struct ExecCreateBody {
            #[serde(rename = "Cmd")]
            cmd: Vec<String>,
            #[serde(rename = "AttachStdout")]
            attach_stdout: bool,
        }
        #[derive(Deserialize)]
        struct ExecCreateResponse {
            #[serde(rename = "Id")]
            id: String,
        }

        with_circuit_breaker(&circuits, endpoint_id, || async move {
            let mut builder = http.post(&url).json(&ExecCreateBody {
                cmd,
                attach_stdout: true,
            });
            if let Some(token) = token {
                builder = builder.header("X-API-Key", token);
            }
            let response = builder
                .send()
                .await
                .map_err(|e| Error::TransientUpstream(format!("create exec: {e}")))?;
            if !response.status().is_success() {
                return Err(Error::TransientUpstream(format!("create exec returned {}", response.status())));
            }
            let body: ExecCreateResponse = response
                .json()
                .await
                .map_err(|e| Error::TransientUpstream(format!("decoding exec create response: {e}")))?;
            Ok(body.id)
        })
        .await
    }

    pub async fn start_exec(&self, endpoint_id: EndpointId, exec_id: &str) -> Result<()> {
        let circuits = self.circuits.clone();
        let http = self.http.clone();
        let url = self.url(&format!("/api/endpoints/{endpoint_id}/docker/exec/{exec_id}/start"));
        let token = self.api_token.clone();

        with_circuit_breaker(&circuits, endpoint_id, || async move {
            let mut builder = http.post(&url);
            if let Some(token) = token {
                builder = builder.header("X-API-Key", token);
            }
            let response = builder
                .send()
                .await
                .map_err(|e| Error::TransientUpstream(format!("start exec: {e}")))?;
            if !response.status().is_success() {
                return Err(Error::TransientUpstream(format!("start exec returned {}", response.status())));
            }
            Ok(())
        })
        .await
    }

    pub async fn inspect_exec(&self, endpoint_id: EndpointId, exec_id: &str) -> Result<serde_json::Value> {
        self.get_json(endpoint_id, &format!("/api/endpoints/{endpoint_id}/docker/exec/{exec_id}/json"))
            .await
    }

    pub async fn get_archive(&self, endpoint_id: EndpointId, container_id: &str, path: &str) -> Result<Vec<u8>> {
        let circuits = self.circuits.clone();
        let http = self.http.clone();
        let url = self.url(&format!(
            "/api/endpoints/{endpoint_id}/docker/containers/{container_id}/archive?path={path}"
        ));
        let token = self.api_token.clone();

        with_circuit_breaker(&circuits, endpoint_id, || async move {
            let mut builder = http.get(&url);
            if let Some(token) = token {
                builder = builder.header("X-API-Key", token);
            }
            let response = builder
                .send()
                .await
                .map_err(|e| Error::TransientUpstream(format!("get archive: {e}")))?;
            if !response.status().is_success() {
                return Err(Error::TransientUpstream(format!("get archive returned {}", response.status())));
            }
            response
                .bytes()
                .await
                .map(|b| b.to_vec())
                .map_err(|e| Error::TransientUpstream(format!("reading archive bytes: {e}")))
        })
        .await
    }

    /// Edge endpoints execute async jobs rather than direct docker calls;
    /// callers poll `get_edge_job_tasks` until the job completes.
    pub async fn create_edge_job(&self, endpoint_id: EndpointId, spec: serde_json::Value) -> Result<String> {
        let circuits = self.circuits.clone();
        let http = self.http.clone();
        let url = self.url(&format!("/api/endpoints/{endpoint_id}/edge/jobs"));
        let token = self.api_token.clone();

        #[derive(Deserialize)]
        struct EdgeJobResponse {
            id: String,
        }

        with_circuit_breaker(&circuits, endpoint_id, || async move {
            let mut builder = http.post(&url).json(&spec);
            if let Some(token) = token {
                builder = builder.header("X-API-Key", token);
            }
            let response = builder
                .send()
                .await
                .map_err(|e| Error::TransientUpstream(format!("create edge job: {e}")))?;
            if !response.status().is_success() {
                return Err(Error::TransientUpstream(format!(
                    "create edge job returned {}",
                    response.status()
                )));
            }
            let body: EdgeJobResponse = response
                .json()
                .await
                .map_err(|e| Error::TransientUpstream(format!("decoding edge job response: {e}")))?;
            Ok(body.id)
        })
        .await
    }

    pub async fn get_edge_job_tasks(&self, endpoint_id: EndpointId, job_id: &str) -> Result<serde_json::Value> {
        self.get_json(endpoint_id, &format!("/api/endpoints/{endpoint_id}/edge/jobs/{job_id}/tasks"))
            .await
    }

    pub async fn collect_edge_job_task_logs(
        &self,
        endpoint_id: EndpointId,
        job_id: &str,
        task_id: &str,
    ) -> Result<()> {
        let circuits = self.circuits.clone();
        let http = self.http.clone();
        let url = self.url(&format!(
            "/api/endpoints/{endpoint_id}/edge/jobs/{job_id}/tasks/{task_id}/logs"
        ));
        let token = self.api_token.clone();

        with_circuit_breaker(&circuits, endpoint_id, || async move {
            let mut builder = http.post(&url);
            if let Some(token) = token {
                builder = builder.header("X-API-Key", token);
            }
            let response = builder
                .send()
                .await
                .map_err(|e| Error::TransientUpstream(format!("collect edge job task logs: {e}")))?;
            if !response.status().is_success() {
                return Err(Error::TransientUpstream(format!(
                    "collect edge job task logs returned {}",
                    response.status()
                )));
            }
            Ok(())
        })
        .await
    }

    pub async fn get_edge_job_task_logs(
        &self,
        endpoint_id: EndpointId,
        job_id: &str,
        task_id: &str,
    ) -> Result<String> {
        let circuits = self.circuits.clone();
        let http = self.http.clone();
        let url = self.url(&format!(
            "/api/endpoints/{endpoint_id}/edge/jobs/{job_id}/tasks/{task_id}/logs/file"
        ));
        let token = self.api_token.clone();

        with_circuit_breaker(&circuits, endpoint_id, || async move {
            let mut builder = http.get(&url);
            if let Some(token) = token {
                builder = builder.header("X-API-Key", token);
            }
            let response = builder
                .send()
                .await
                .map_err(|e| Error::TransientUpstream(format!("get edge job task logs: {e}")))?;
            if !response.status().is_success() {
                return Err(Error::TransientUpstream(format!(
                    "get edge job task logs returned {}",
                    response.status()
                )));
            }
            response
                .text()
                .await
                .map_err(|e| Error::TransientUpstream(format!("reading task logs: {e}")))
        })
        .await
    }

    pub async fn delete_edge_job(&self, endpoint_id: EndpointId, job_id: &str) -> Result<()> {
        let circuits = self.circuits.clone();
        let http = self.http.clone();
        let url = self.url(&format!("/api/endpoints/{endpoint_id}/edge/jobs/{job_id}"));
        let token = self.api_token.clone();

        with_circuit_breaker(&circuits, endpoint_id, || async move {
            let mut builder = http.delete(&url);
            if let Some(token) = token {
                builder = builder.header("X-API-Key", token);
            }
            let response = builder
                .send()
                .await
                .map_err(|e| Error::TransientUpstream(format!("delete edge job: {e}")))?;
            if !response.status().is_success() {
                return Err(Error::TransientUpstream(format!(
                    "delete edge job returned {}",
                    response.status()
                )));
            }
            Ok(())
        })
        .await
    }

    async fn get_json(&self, endpoint_id: EndpointId, path: &str) -> Result<serde_json::Value> {
        let circuits = self.circuits.clone();
        let http = self.http.clone();
        let url = self.url(path);
        let token = self.api_token.clone();

        with_circuit_breaker(&circuits, endpoint_id, || async move {
            let mut builder = http.get(&url);
            if let Some(token) = token {
                builder = builder.header("X-API-Key", token);
            }
            let response = builder
                .send()
                .await
                .map_err(|e| Error::TransientUpstream(format!("GET {url}: {e}")))?;
            if !response.status().is_success() {
                return Err(Error::TransientUpstream(format!("GET {url} returned {}", response.status())));
            }
            response
                .json::<serde_json::Value>()
                .await
                .map_err(|e| Error::TransientUpstream(format!("decoding response from {url}: {e}")))
        })
        .await
    }

    pub async fn health_check(&self) -> bool {
        let url = self.url("/api/status");
        match self.authed(self.http.get(&url)).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!(error = %e, "inventory health check failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_known_docker_states() {
        assert_eq!(normalize_state("running"), ContainerState::Running);
        assert_eq!(normalize_state("exited"), ContainerState::Stopped);
        assert_eq!(normalize_state("paused"), ContainerState::Paused);
        assert_eq!(normalize_state("dead"), ContainerState::Dead);
        assert_eq!(normalize_state("garbage"), ContainerState::Unknown);
    }
}
