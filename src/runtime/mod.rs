use std::sync::Arc;

use async_trait::async_trait;

use crate::types::{ContainerDetails, ContainerSummary};

pub mod docker;
pub use docker::DockerRuntime;

/// Failure class of a runtime call. The tracker's retry logic only ever
/// looks at this, never at runtime-specific status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The runtime could not be reached or timed out.
    Transient,
    /// The referenced container (or listing cursor) does not exist.
    NotFound,
    /// The runtime rejected the request.
    Permanent,
}

#[derive(Debug, thiserror::Error)]
#[error("{kind:?} runtime error: {message}")]
pub struct RuntimeError {
    pub kind: ErrorKind,
    pub message: String,
}

impl RuntimeError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transient, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == ErrorKind::NotFound
    }
}

pub type Result<T> = std::result::Result<T, RuntimeError>;

#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Checks that the runtime is reachable.
    async fn ping(&self) -> Result<()>;

    /// Lists running and created containers. With `since` set, only
    /// containers created after that container are returned; an unknown
    /// `since` id is reported as [`ErrorKind::NotFound`].
    async fn list_containers(&self, since: Option<&str>) -> Result<Vec<ContainerSummary>>;

    /// Returns full metadata of a single container.
    async fn inspect_container(&self, id: &str) -> Result<ContainerDetails>;
}

#[async_trait]
impl<T: ContainerRuntime + ?Sized> ContainerRuntime for Arc<T> {
    async fn ping(&self) -> Result<()> {
        (**self).ping().await
    }

    async fn list_containers(&self, since: Option<&str>) -> Result<Vec<ContainerSummary>> {
        (**self).list_containers(since).await
    }

    async fn inspect_container(&self, id: &str) -> Result<ContainerDetails> {
        (**self).inspect_container(id).await
    }
}
