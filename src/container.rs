//! Database container lifecycle seam.
//!
//! Some deployments run the database in a container that has to be up before
//! the first connection. The engine awaits [`ContainerSupervisor::ensure_running`]
//! once at startup; how the container is managed is up to the implementation.

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

/// Errors reported by a supervisor.
#[derive(Debug, Error)]
pub enum ContainerError {
    /// The container could not be brought up.
    #[error("container unavailable: {0}")]
    Unavailable(String),
}

/// Reported container state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerStatus {
    Running,
    Stopped,
    /// No container is managed.
    Unmanaged,
}

#[async_trait]
pub trait ContainerSupervisor: Send + Sync + 'static {
    /// Resolve once the database container accepts connections.
    async fn ensure_running(&self) -> Result<(), ContainerError>;

    async fn status(&self) -> ContainerStatus;
}

/// Supervisor for databases that are not containerised.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoContainers;

#[async_trait]
impl ContainerSupervisor for NoContainers {
    async fn ensure_running(&self) -> Result<(), ContainerError> {
        Ok(())
    }

    async fn status(&self) -> ContainerStatus {
        ContainerStatus::Unmanaged
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_no_containers_is_always_ready() {
        let supervisor = NoContainers;
        supervisor.ensure_running().await.unwrap();
        assert_eq!(supervisor.status().await, ContainerStatus::Unmanaged);
    }
}
