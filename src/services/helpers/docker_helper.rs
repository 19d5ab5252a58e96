use crate::error::RuntimeError;
use async_trait::async_trait;
use bollard::models::{ContainerInspectResponse, ContainerStatsResponse, ContainerSummary};
use bollard::query_parameters::{
    InspectContainerOptions, ListContainersOptionsBuilder, StatsOptionsBuilder,
};
use bollard::Docker;
use futures_util::stream::StreamExt;
use serde_json::Value;
use std::fmt;

/// The queries the exporter needs from a container runtime.
///
/// Implemented for [`bollard::Docker`]; tests substitute an in-memory runtime.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Lists every container known to the runtime, stopped ones included.
    async fn list_containers(&self) -> Result<Vec<ContainerSummary>, RuntimeError>;

    /// Returns the full inspect document of a container.
    async fn inspect_container(&self, id: &str) -> Result<ContainerInspectResponse, RuntimeError>;

    /// Returns one point-in-time stats document for a running container.
    ///
    /// The document is returned undecoded, exactly as the Engine API reports it.
    async fn container_stats(&self, id: &str) -> Result<Value, RuntimeError>;
}

#[async_trait]
impl ContainerRuntime for Docker {
    async fn list_containers(&self) -> Result<Vec<ContainerSummary>, RuntimeError> {
        let options = ListContainersOptionsBuilder::new().all(true).build();

        Ok(Docker::list_containers(self, Some(options)).await?)
    }

    async fn inspect_container(&self, id: &str) -> Result<ContainerInspectResponse, RuntimeError> {
        Ok(Docker::inspect_container(self, id, None::<InspectContainerOptions>).await?)
    }

    async fn container_stats(&self, id: &str) -> Result<Value, RuntimeError> {
        let options = StatsOptionsBuilder::new().stream(false).one_shot(true).build();

        // The response body is released when `stream` drops, on every return path.
        let mut stream = Box::pin(self.stats(id, Some(options)));
        let stats = stream.next().await.ok_or(RuntimeError::EmptyStream)??;

        stats_to_value(&stats)
    }
}

/// Converts a typed stats response back into the Engine's JSON document.
///
/// The memory breakdown is kept as the flat map the runtime sent, whatever keys
/// it holds.
pub fn stats_to_value(stats: &ContainerStatsResponse) -> Result<Value, RuntimeError> {
    Ok(serde_json::to_value(stats)?)
}

/// Lifecycle state of a container as reported by the container list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerState {
    Created,
    Running,
    Paused,
    Restarting,
    Removing,
    Exited,
    Dead,
    Other(String),
}

impl ContainerState {
    pub fn is_running(&self) -> bool {
        *self == ContainerState::Running
    }

    pub fn as_str(&self) -> &str {
        match self {
            ContainerState::Created => "created",
            ContainerState::Running => "running",
            ContainerState::Paused => "paused",
            ContainerState::Restarting => "restarting",
            ContainerState::Removing => "removing",
            ContainerState::Exited => "exited",
            ContainerState::Dead => "dead",
            ContainerState::Other(state) => state,
        }
    }
}

impl ContainerState {
    pub fn from_summary(summary: &ContainerSummary) -> Self {
        summary
            .state
            .map(|state| ContainerState::from(state.to_string().as_str()))
            .unwrap_or_else(|| ContainerState::Other(String::new()))
    }
}

impl From<&str> for ContainerState {
    fn from(state: &str) -> Self {
        match state {
            "created" => ContainerState::Created,
            "running" => ContainerState::Running,
            "paused" => ContainerState::Paused,
            "restarting" => ContainerState::Restarting,
            "removing" => ContainerState::Removing,
            "exited" => ContainerState::Exited,
            "dead" => ContainerState::Dead,
            other => ContainerState::Other(other.to_owned()),
        }
    }
}

/// Who a container is: its runtime ID and the names it is known by.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerIdentity {
    pub id: String,
    pub names: Vec<String>,
}

impl ContainerIdentity {
    pub fn from_summary(summary: &ContainerSummary) -> Self {
        Self {
            id: summary.id.clone().unwrap_or_default(),
            names: summary.names.clone().unwrap_or_default(),
        }
    }

    /// The name used for the `name` label.
    ///
    /// The first name with its leading `/` removed, or the short ID when the
    /// runtime reports no names.
    pub fn display_name(&self) -> &str {
        self.names
            .first()
            .map(|name| name.trim_start_matches('/'))
            .unwrap_or_else(|| self.short_id())
    }

    pub fn short_id(&self) -> &str {
        self.id.get(..12).unwrap_or(&self.id)
    }
}

impl fmt::Display for ContainerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.display_name(), self.short_id())
    }
}
