//! Deterministic in-memory orchestrator used by tests and local development.
//! Allocations only become `running` when a test scripts them, and every
//! submission/deregistration is recorded for assertions.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use dashmap::DashMap;
use futures::future::BoxFuture;
use indexmap::IndexMap;

use super::{
    AllocationInfo, AllocationStub, JobOrchestrator, JobSpec, JobSummary, NodeInfo,
    OrchestratorError, OrchestratorResult, CLIENT_STATUS_RUNNING, NODE_IP_ATTRIBUTE,
};

#[derive(Default)]
struct StubInner {
    jobs: DashMap<String, String>,
    allocations: DashMap<String, Vec<AllocationStub>>,
    allocation_infos: DashMap<String, AllocationInfo>,
    nodes: DashMap<String, NodeInfo>,
    submissions: Mutex<Vec<JobSpec>>,
    deregistrations: Mutex<Vec<(String, bool)>>,
    fail_submissions: AtomicBool,
}

/// Scriptable orchestrator double.
#[derive(Clone, Default)]
pub struct StubOrchestrator {
    inner: Arc<StubInner>,
}

impl StubOrchestrator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent submission fail synchronously.
    pub fn fail_submissions(&self, fail: bool) {
        self.inner.fail_submissions.store(fail, Ordering::SeqCst);
    }

    /// Register a job directly, bypassing `submit` (e.g. a stray job).
    pub fn inject_job(&self, job_id: &str, name: &str) {
        self.inner.jobs.insert(job_id.to_string(), name.to_string());
    }

    /// Script a running allocation for `job_id` on a node at `host_ip`.
    pub fn script_running(
        &self,
        job_id: &str,
        alloc_id: &str,
        host_ip: &str,
        ports: IndexMap<String, u16>,
    ) {
        let node_id = format!("node-{job_id}");
        let mut node = NodeInfo {
            http_addr: format!("{host_ip}:4646"),
            ..NodeInfo::default()
        };
        node.attributes
            .insert(NODE_IP_ATTRIBUTE.to_string(), host_ip.to_string());
        self.inner.nodes.insert(node_id.clone(), node);
        self.inner.allocation_infos.insert(
            alloc_id.to_string(),
            AllocationInfo {
                alloc_id: alloc_id.to_string(),
                node_id,
                ports,
            },
        );
        self.inner.allocations.insert(
            job_id.to_string(),
            vec![AllocationStub {
                alloc_id: alloc_id.to_string(),
                client_status: CLIENT_STATUS_RUNNING.to_string(),
            }],
        );
    }

    /// Drop every allocation of `job_id`, simulating a crashed server.
    pub fn clear_allocations(&self, job_id: &str) {
        self.inner.allocations.remove(job_id);
    }

    pub fn has_job(&self, job_id: &str) -> bool {
        self.inner.jobs.contains_key(job_id)
    }

    pub fn submissions(&self) -> Vec<JobSpec> {
        self.locked(&self.inner.submissions, |entries| entries.clone())
    }

    pub fn deregistrations(&self) -> Vec<(String, bool)> {
        self.locked(&self.inner.deregistrations, |entries| entries.clone())
    }

    fn locked<T, R>(&self, cell: &Mutex<T>, read: impl FnOnce(&T) -> R) -> R {
        let guard = cell.lock().unwrap_or_else(PoisonError::into_inner);
        read(&guard)
    }
}

impl JobOrchestrator for StubOrchestrator {
    fn submit(&self, spec: JobSpec) -> BoxFuture<'static, OrchestratorResult<()>> {
        let stub = self.clone();
        Box::pin(async move {
            if stub.inner.fail_submissions.load(Ordering::SeqCst) {
                return Err(OrchestratorError::Status {
                    operation: format!("submit job {}", spec.job_id),
                    status: 500,
                });
            }
            stub.inner
                .jobs
                .insert(spec.job_id.clone(), spec.name.clone());
            let mut submissions = stub
                .inner
                .submissions
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            submissions.push(spec);
            Ok(())
        })
    }

    fn deregister(
        &self,
        job_id: String,
        purge: bool,
    ) -> BoxFuture<'static, OrchestratorResult<()>> {
        let stub = self.clone();
        Box::pin(async move {
            stub.inner.jobs.remove(&job_id);
            stub.inner.allocations.remove(&job_id);
            let mut deregistrations = stub
                .inner
                .deregistrations
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            deregistrations.push((job_id, purge));
            Ok(())
        })
    }

    fn list_jobs(&self) -> BoxFuture<'static, OrchestratorResult<Vec<JobSummary>>> {
        let stub = self.clone();
        Box::pin(async move {
            Ok(stub
                .inner
                .jobs
                .iter()
                .map(|entry| JobSummary {
                    id: entry.key().clone(),
                    name: entry.value().clone(),
                })
                .collect())
        })
    }

    fn allocations(
        &self,
        job_id: String,
    ) -> BoxFuture<'static, OrchestratorResult<Vec<AllocationStub>>> {
        let stub = self.clone();
        Box::pin(async move {
            Ok(stub
                .inner
                .allocations
                .get(&job_id)
                .map(|entry| entry.value().clone())
                .unwrap_or_default())
        })
    }

    fn allocation_info(
        &self,
        alloc_id: String,
    ) -> BoxFuture<'static, OrchestratorResult<AllocationInfo>> {
        let stub = self.clone();
        Box::pin(async move {
            stub.inner
                .allocation_infos
                .get(&alloc_id)
                .map(|entry| entry.value().clone())
                .ok_or_else(|| OrchestratorError::Status {
                    operation: format!("fetch allocation {alloc_id}"),
                    status: 404,
                })
        })
    }

    fn node_info(&self, node_id: String) -> BoxFuture<'static, OrchestratorResult<NodeInfo>> {
        let stub = self.clone();
        Box::pin(async move {
            stub.inner
                .nodes
                .get(&node_id)
                .map(|entry| entry.value().clone())
                .ok_or_else(|| OrchestratorError::Status {
                    operation: format!("fetch node {node_id}"),
                    status: 404,
                })
        })
    }
}
