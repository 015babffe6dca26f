//! Thin adapter over the Nomad HTTP API.
//!
//! Game servers run as batch jobs under the `raw_exec` driver with one task
//! group, no restarts, bounded log rotation, and a single dynamic port.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use indexmap::IndexMap;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use super::{
    AllocationInfo, AllocationStub, JobOrchestrator, JobSpec, JobSummary, NodeInfo,
    OrchestratorError, OrchestratorResult,
};

const JOB_TYPE: &str = "batch";
const TASK_GROUP_NAME: &str = "game-server";
const TASK_NAME: &str = "server";
const TASK_DRIVER: &str = "raw_exec";
const DISK_MB: u32 = 10;
const LOG_MAX_FILES: u32 = 5;
const LOG_MAX_FILE_SIZE_MB: u32 = 10;

/// Orchestrator adapter speaking to a Nomad cluster.
#[derive(Clone)]
pub struct NomadOrchestrator {
    client: Client,
    base_url: Arc<str>,
}

impl NomadOrchestrator {
    /// Build an adapter for the Nomad API at `address` with a bounded
    /// per-request timeout.
    pub fn new(address: &str, timeout: Duration) -> OrchestratorResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|source| OrchestratorError::request("building http client", source))?;
        Ok(Self {
            client,
            base_url: Arc::from(address.trim_end_matches('/')),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }
}

fn ensure_success(operation: &str, status: StatusCode) -> OrchestratorResult<()> {
    if status.is_success() {
        Ok(())
    } else {
        Err(OrchestratorError::Status {
            operation: operation.to_string(),
            status: status.as_u16(),
        })
    }
}

impl JobOrchestrator for NomadOrchestrator {
    fn submit(&self, spec: JobSpec) -> BoxFuture<'static, OrchestratorResult<()>> {
        let adapter = self.clone();
        Box::pin(async move {
            let operation = format!("submit job {}", spec.job_id);
            let body = RegisterRequest {
                job: NomadJob::from_spec(&spec),
            };
            let response = adapter
                .client
                .put(adapter.url("/v1/jobs"))
                .json(&body)
                .send()
                .await
                .map_err(|source| OrchestratorError::request(operation.clone(), source))?;
            ensure_success(&operation, response.status())
        })
    }

    fn deregister(
        &self,
        job_id: String,
        purge: bool,
    ) -> BoxFuture<'static, OrchestratorResult<()>> {
        let adapter = self.clone();
        Box::pin(async move {
            let operation = format!("deregister job {job_id}");
            let response = adapter
                .client
                .delete(adapter.url(&format!("/v1/job/{job_id}")))
                .query(&[("purge", purge)])
                .send()
                .await
                .map_err(|source| OrchestratorError::request(operation.clone(), source))?;
            ensure_success(&operation, response.status())
        })
    }

    fn list_jobs(&self) -> BoxFuture<'static, OrchestratorResult<Vec<JobSummary>>> {
        let adapter = self.clone();
        Box::pin(async move {
            let operation = "list jobs";
            let response = adapter
                .client
                .get(adapter.url("/v1/jobs"))
                .send()
                .await
                .map_err(|source| OrchestratorError::request(operation, source))?;
            ensure_success(operation, response.status())?;
            let jobs: Vec<JobListItem> = response
                .json()
                .await
                .map_err(|source| OrchestratorError::request(operation, source))?;
            Ok(jobs
                .into_iter()
                .map(|job| JobSummary {
                    id: job.id,
                    name: job.name,
                })
                .collect())
        })
    }

    fn allocations(
        &self,
        job_id: String,
    ) -> BoxFuture<'static, OrchestratorResult<Vec<AllocationStub>>> {
        let adapter = self.clone();
        Box::pin(async move {
            let operation = format!("list allocations for job {job_id}");
            let response = adapter
                .client
                .get(adapter.url(&format!("/v1/job/{job_id}/allocations")))
                .send()
                .await
                .map_err(|source| OrchestratorError::request(operation.clone(), source))?;
            if response.status() == StatusCode::NOT_FOUND {
                return Ok(Vec::new());
            }
            ensure_success(&operation, response.status())?;
            let stubs: Vec<AllocationListItem> = response
                .json()
                .await
                .map_err(|source| OrchestratorError::request(operation.clone(), source))?;
            Ok(stubs
                .into_iter()
                .map(|stub| AllocationStub {
                    alloc_id: stub.id,
                    client_status: stub.client_status,
                })
                .collect())
        })
    }

    fn allocation_info(
        &self,
        alloc_id: String,
    ) -> BoxFuture<'static, OrchestratorResult<AllocationInfo>> {
        let adapter = self.clone();
        Box::pin(async move {
            let operation = format!("fetch allocation {alloc_id}");
            let response = adapter
                .client
                .get(adapter.url(&format!("/v1/allocation/{alloc_id}")))
                .send()
                .await
                .map_err(|source| OrchestratorError::request(operation.clone(), source))?;
            ensure_success(&operation, response.status())?;
            let allocation: Allocation = response
                .json()
                .await
                .map_err(|source| OrchestratorError::request(operation.clone(), source))?;
            Ok(allocation.into_info())
        })
    }

    fn node_info(&self, node_id: String) -> BoxFuture<'static, OrchestratorResult<NodeInfo>> {
        let adapter = self.clone();
        Box::pin(async move {
            let operation = format!("fetch node {node_id}");
            let response = adapter
                .client
                .get(adapter.url(&format!("/v1/node/{node_id}")))
                .send()
                .await
                .map_err(|source| OrchestratorError::request(operation.clone(), source))?;
            ensure_success(&operation, response.status())?;
            let node: Node = response
                .json()
                .await
                .map_err(|source| OrchestratorError::request(operation.clone(), source))?;
            Ok(NodeInfo {
                attributes: node.attributes,
                http_addr: node.http_addr,
            })
        })
    }
}

// --- wire types ---

#[derive(Serialize)]
struct RegisterRequest {
    #[serde(rename = "Job")]
    job: NomadJob,
}

#[derive(Serialize)]
struct NomadJob {
    #[serde(rename = "ID")]
    id: String,
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "Type")]
    job_type: String,
    #[serde(rename = "Datacenters")]
    datacenters: Vec<String>,
    #[serde(rename = "TaskGroups")]
    task_groups: Vec<NomadTaskGroup>,
}

impl NomadJob {
    fn from_spec(spec: &JobSpec) -> Self {
        Self {
            id: spec.job_id.clone(),
            name: spec.name.clone(),
            job_type: JOB_TYPE.to_string(),
            datacenters: spec.datacenters.clone(),
            task_groups: vec![NomadTaskGroup {
                name: TASK_GROUP_NAME.to_string(),
                count: 1,
                tasks: vec![NomadTask::from_spec(spec)],
            }],
        }
    }
}

#[derive(Serialize)]
struct NomadTaskGroup {
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "Count")]
    count: u32,
    #[serde(rename = "Tasks")]
    tasks: Vec<NomadTask>,
}

#[derive(Serialize)]
struct NomadTask {
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "Driver")]
    driver: String,
    #[serde(rename = "Config")]
    config: TaskConfig,
    #[serde(rename = "Resources")]
    resources: TaskResources,
    #[serde(rename = "RestartPolicy")]
    restart_policy: RestartPolicy,
    #[serde(rename = "LogConfig")]
    log_config: LogConfig,
}

impl NomadTask {
    fn from_spec(spec: &JobSpec) -> Self {
        Self {
            name: TASK_NAME.to_string(),
            driver: TASK_DRIVER.to_string(),
            config: TaskConfig {
                command: spec.command.clone(),
                args: spec.args.clone(),
            },
            resources: TaskResources {
                cpu: spec.cpu_mhz,
                memory_mb: spec.memory_mb,
                disk_mb: DISK_MB,
                networks: vec![NetworkRequest {
                    dynamic_ports: vec![PortRequest {
                        label: spec.dynamic_port_label.clone(),
                    }],
                }],
            },
            restart_policy: RestartPolicy {
                attempts: 0,
                mode: "fail".to_string(),
            },
            log_config: LogConfig {
                max_files: LOG_MAX_FILES,
                max_file_size_mb: LOG_MAX_FILE_SIZE_MB,
                disabled: false,
            },
        }
    }
}

#[derive(Serialize)]
struct TaskConfig {
    command: String,
    args: Vec<String>,
}

#[derive(Serialize)]
struct TaskResources {
    #[serde(rename = "CPU")]
    cpu: u32,
    #[serde(rename = "MemoryMB")]
    memory_mb: u32,
    #[serde(rename = "DiskMB")]
    disk_mb: u32,
    #[serde(rename = "Networks")]
    networks: Vec<NetworkRequest>,
}

#[derive(Serialize)]
struct NetworkRequest {
    #[serde(rename = "DynamicPorts")]
    dynamic_ports: Vec<PortRequest>,
}

#[derive(Serialize)]
struct PortRequest {
    #[serde(rename = "Label")]
    label: String,
}

#[derive(Serialize)]
struct RestartPolicy {
    #[serde(rename = "Attempts")]
    attempts: u32,
    #[serde(rename = "Mode")]
    mode: String,
}

#[derive(Serialize)]
struct LogConfig {
    #[serde(rename = "MaxFiles")]
    max_files: u32,
    #[serde(rename = "MaxFileSizeMB")]
    max_file_size_mb: u32,
    #[serde(rename = "Disabled")]
    disabled: bool,
}

#[derive(Deserialize)]
struct JobListItem {
    #[serde(rename = "ID", default)]
    id: String,
    #[serde(rename = "Name", default)]
    name: String,
}

#[derive(Deserialize)]
struct AllocationListItem {
    #[serde(rename = "ID", default)]
    id: String,
    #[serde(rename = "ClientStatus", default)]
    client_status: String,
}

#[derive(Deserialize)]
struct Allocation {
    #[serde(rename = "ID", default)]
    id: String,
    #[serde(rename = "NodeID", default)]
    node_id: String,
    #[serde(rename = "AllocatedResources", default)]
    allocated_resources: Option<AllocatedResources>,
}

impl Allocation {
    /// Collect labelled ports from every place Nomad may report them:
    /// shared port mappings, shared networks, then per-task networks.
    fn into_info(self) -> AllocationInfo {
        let mut ports = IndexMap::new();
        if let Some(resources) = &self.allocated_resources {
            for mapping in &resources.shared.ports {
                mapping.record(&mut ports);
            }
            for network in &resources.shared.networks {
                for mapping in &network.dynamic_ports {
                    mapping.record(&mut ports);
                }
            }
            for task in resources.tasks.values() {
                for network in &task.networks {
                    for mapping in &network.dynamic_ports {
                        mapping.record(&mut ports);
                    }
                }
            }
        }
        AllocationInfo {
            alloc_id: self.id,
            node_id: self.node_id,
            ports,
        }
    }
}

#[derive(Deserialize, Default)]
struct AllocatedResources {
    #[serde(rename = "Shared", default)]
    shared: SharedResources,
    #[serde(rename = "Tasks", default)]
    tasks: HashMap<String, TaskAllocation>,
}

#[derive(Deserialize, Default)]
struct SharedResources {
    #[serde(rename = "Ports", default)]
    ports: Vec<PortMapping>,
    #[serde(rename = "Networks", default)]
    networks: Vec<AllocatedNetwork>,
}

#[derive(Deserialize, Default)]
struct TaskAllocation {
    #[serde(rename = "Networks", default)]
    networks: Vec<AllocatedNetwork>,
}

#[derive(Deserialize, Default)]
struct AllocatedNetwork {
    #[serde(rename = "DynamicPorts", default)]
    dynamic_ports: Vec<PortMapping>,
}

#[derive(Deserialize)]
struct PortMapping {
    #[serde(rename = "Label", default)]
    label: String,
    #[serde(rename = "Value", default)]
    value: u16,
    #[serde(rename = "To", default)]
    to: u16,
}

impl PortMapping {
    fn record(&self, ports: &mut IndexMap<String, u16>) {
        if self.label.is_empty() {
            return;
        }
        let value = if self.value != 0 { self.value } else { self.to };
        if value != 0 {
            ports.insert(self.label.clone(), value);
        }
    }
}

#[derive(Deserialize)]
struct Node {
    #[serde(rename = "Attributes", default)]
    attributes: HashMap<String, String>,
    #[serde(rename = "HTTPAddr", default)]
    http_addr: String,
}
