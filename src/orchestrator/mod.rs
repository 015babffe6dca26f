//! Job orchestrator port: the abstraction over the workload scheduler that
//! runs dedicated game-server processes. The production adapter speaks the
//! Nomad HTTP API; tests substitute the deterministic stub.

pub mod nomad;
pub mod stub;

use std::collections::HashMap;
use std::error::Error;

use futures::future::BoxFuture;
use indexmap::IndexMap;
use thiserror::Error;

/// Allocation client status meaning the server process is up on a node.
pub const CLIENT_STATUS_RUNNING: &str = "running";

/// Dynamic port label requested for every game-server job.
pub const HTTP_PORT_LABEL: &str = "http";

/// Node attribute carrying the host's routable address.
pub const NODE_IP_ATTRIBUTE: &str = "unique.network.ip-address";

/// Result alias for orchestrator operations.
pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

/// Error raised by orchestrator adapters.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// The request never completed (connection, timeout, decode).
    #[error("orchestrator request failed: {message}")]
    Request {
        message: String,
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
    /// The orchestrator answered with a non-success status.
    #[error("orchestrator returned status {status} for {operation}")]
    Status { operation: String, status: u16 },
}

impl OrchestratorError {
    pub fn request(message: impl Into<String>, source: impl Error + Send + Sync + 'static) -> Self {
        OrchestratorError::Request {
            message: message.into(),
            source: Box::new(source),
        }
    }
}

/// Everything needed to register one game-server job.
#[derive(Debug, Clone, PartialEq)]
pub struct JobSpec {
    /// Deterministic job id, equal to the room id.
    pub job_id: String,
    /// Job name carrying the operator-visible prefix.
    pub name: String,
    pub cpu_mhz: u32,
    pub memory_mb: u32,
    pub command: String,
    pub args: Vec<String>,
    /// Label of the dynamic port the scheduler assigns.
    pub dynamic_port_label: String,
    pub datacenters: Vec<String>,
}

impl JobSpec {
    /// Argument placeholder the scheduler substitutes with the allocated
    /// dynamic port for `label`.
    pub fn port_placeholder(label: &str) -> String {
        format!("${{NOMAD_PORT_{label}}}")
    }
}

/// Job listing entry.
#[derive(Debug, Clone)]
pub struct JobSummary {
    pub id: String,
    pub name: String,
}

/// One allocation of a job as seen in the job's allocation list.
#[derive(Debug, Clone)]
pub struct AllocationStub {
    pub alloc_id: String,
    pub client_status: String,
}

impl AllocationStub {
    pub fn is_running(&self) -> bool {
        self.client_status == CLIENT_STATUS_RUNNING
    }
}

/// Placement details of a single allocation.
#[derive(Debug, Clone)]
pub struct AllocationInfo {
    pub alloc_id: String,
    pub node_id: String,
    /// Allocated ports by label, in deterministic iteration order.
    pub ports: IndexMap<String, u16>,
}

/// Details of the node hosting an allocation.
#[derive(Debug, Clone, Default)]
pub struct NodeInfo {
    pub attributes: HashMap<String, String>,
    pub http_addr: String,
}

impl NodeInfo {
    /// The node's host IP: the well-known attribute when present, otherwise
    /// the host part of the node's HTTP address.
    pub fn host_ip(&self) -> Option<String> {
        if let Some(ip) = self.attributes.get(NODE_IP_ATTRIBUTE) {
            if !ip.is_empty() {
                return Some(ip.clone());
            }
        }
        let host = match self.http_addr.rsplit_once(':') {
            Some((host, _port)) => host,
            None => self.http_addr.as_str(),
        };
        if host.is_empty() {
            None
        } else {
            Some(host.to_string())
        }
    }
}

/// Abstraction over the workload scheduler.
pub trait JobOrchestrator: Send + Sync {
    /// Register a job; a synchronous failure means the job never existed.
    fn submit(&self, spec: JobSpec) -> BoxFuture<'static, OrchestratorResult<()>>;

    /// Stop a job. `purge` removes it from the scheduler's state entirely;
    /// non-purge keeps it inspectable for operators.
    fn deregister(&self, job_id: String, purge: bool) -> BoxFuture<'static, OrchestratorResult<()>>;

    fn list_jobs(&self) -> BoxFuture<'static, OrchestratorResult<Vec<JobSummary>>>;

    /// Allocation list for a job; unknown jobs yield an empty list.
    fn allocations(
        &self,
        job_id: String,
    ) -> BoxFuture<'static, OrchestratorResult<Vec<AllocationStub>>>;

    fn allocation_info(
        &self,
        alloc_id: String,
    ) -> BoxFuture<'static, OrchestratorResult<AllocationInfo>>;

    fn node_info(&self, node_id: String) -> BoxFuture<'static, OrchestratorResult<NodeInfo>>;
}
