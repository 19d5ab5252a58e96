//! In-memory container runtime for tests.

use crate::error::RuntimeError;
use crate::services::helpers::docker_helper::ContainerRuntime;
use async_trait::async_trait;
use bollard::models::{ContainerInspectResponse, ContainerSummary};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

#[derive(Default)]
pub struct FakeRuntime {
    containers: Vec<ContainerSummary>,
    list_fails: bool,
    inspect_failures: HashSet<String>,
    stats: HashMap<String, Value>,
    stats_delay: Option<Duration>,
    pub stats_calls: AtomicUsize,
    pub open_streams: AtomicUsize,
}

impl FakeRuntime {
    pub fn failing_list() -> Self {
        Self {
            list_fails: true,
            ..Default::default()
        }
    }

    pub fn with_container(mut self, id: &str, name: &str, state: &str) -> Self {
        self.containers.push(ContainerSummary {
            id: Some(id.to_owned()),
            names: Some(vec![format!("/{name}")]),
            state: state.parse().ok(),
            ..Default::default()
        });
        self
    }

    pub fn with_stats(mut self, id: &str, stats: Value) -> Self {
        self.stats.insert(id.to_owned(), stats);
        self
    }

    pub fn with_failing_inspect(mut self, id: &str) -> Self {
        self.inspect_failures.insert(id.to_owned());
        self
    }

    pub fn with_stats_delay(mut self, delay: Duration) -> Self {
        self.stats_delay = Some(delay);
        self
    }
}

fn server_error(message: &str) -> RuntimeError {
    RuntimeError::Docker(bollard::errors::Error::DockerResponseServerError {
        status_code: 500,
        message: message.to_owned(),
    })
}

/// Counts a stats response as open until dropped.
struct OpenStream<'a>(&'a AtomicUsize);

impl<'a> OpenStream<'a> {
    fn open(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for OpenStream<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn list_containers(&self) -> Result<Vec<ContainerSummary>, RuntimeError> {
        if self.list_fails {
            return Err(server_error("daemon unavailable"));
        }
        Ok(self.containers.clone())
    }

    async fn inspect_container(&self, id: &str) -> Result<ContainerInspectResponse, RuntimeError> {
        if self.inspect_failures.contains(id) {
            return Err(server_error("no such container"));
        }
        Ok(ContainerInspectResponse {
            id: Some(id.to_owned()),
            ..Default::default()
        })
    }

    async fn container_stats(&self, id: &str) -> Result<Value, RuntimeError> {
        self.stats_calls.fetch_add(1, Ordering::SeqCst);
        let _stream = OpenStream::open(&self.open_streams);
        if let Some(delay) = self.stats_delay {
            tokio::time::sleep(delay).await;
        }
        self.stats.get(id).cloned().ok_or(RuntimeError::EmptyStream)
    }
}

/// Stats of the `nginx` container used across the collector tests.
pub fn nginx_stats() -> Value {
    json!({
        "cpu_stats": { "cpu_usage": { "total_usage": 138186000000u64 } },
        "memory_stats": {
            "usage": 4280320,
            "limit": 3521634304u64,
            "stats": { "inactive_file": 0 }
        },
        "networks": { "eth0": { "rx_bytes": 6062, "tx_bytes": 9047 } },
        "blkio_stats": {
            "io_service_bytes_recursive": [
                { "major": 8, "minor": 0, "op": "read", "value": 77824 },
                { "major": 8, "minor": 0, "op": "write", "value": 8192 }
            ]
        },
        "pids_stats": { "current": 5 }
    })
}
