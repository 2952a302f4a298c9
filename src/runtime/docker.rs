use super::{ContainerRuntime, ErrorKind, Result, RuntimeError};
use crate::types::{ContainerDetails, ContainerState, ContainerSummary};
use async_trait::async_trait;
use bollard::container::ListContainersOptions;
use bollard::models::{ContainerInspectResponse, ContainerStateStatusEnum};
use bollard::Docker;
use chrono::{DateTime, Utc};
use log::{debug, info};
use std::collections::HashMap;

/// Request timeout, in seconds, for an explicitly configured socket.
const SOCKET_TIMEOUT_SECS: u64 = 120;

/// [`ContainerRuntime`] backed by the Docker Engine API.
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Connects to the Docker daemon, either through `socket_path` or with
    /// the local defaults (unix socket on Linux).
    pub fn connect(socket_path: Option<&str>) -> anyhow::Result<Self> {
        let docker = match socket_path {
            Some(path) => {
                info!("Connecting to Docker at {}", path);
                Docker::connect_with_unix(
                    path,
                    SOCKET_TIMEOUT_SECS,
                    bollard::API_DEFAULT_VERSION,
                )?
            }
            None => Docker::connect_with_local_defaults()?,
        };
        Ok(Self { docker })
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn ping(&self) -> Result<()> {
        self.docker.ping().await.map(|_| ()).map_err(classify)
    }

    async fn list_containers(&self, since: Option<&str>) -> Result<Vec<ContainerSummary>> {
        let mut filters = HashMap::new();
        if let Some(since) = since {
            filters.insert("since".to_string(), vec![since.to_string()]);
        }
        let opts = ListContainersOptions::<String> {
            all: true,
            filters,
            ..Default::default()
        };
        let containers = self
            .docker
            .list_containers(Some(opts))
            .await
            .map_err(classify)?;

        Ok(containers
            .into_iter()
            .filter_map(|c| {
                let id = c.id?;
                Some(ContainerSummary {
                    id,
                    created: c.created.unwrap_or_default(),
                    state: c
                        .state
                        .as_deref()
                        .map(ContainerState::from_status)
                        .unwrap_or(ContainerState::Unknown),
                })
            })
            .collect())
    }

    async fn inspect_container(&self, id: &str) -> Result<ContainerDetails> {
        let detail = self
            .docker
            .inspect_container(id, None)
            .await
            .map_err(classify)?;
        container_details(id, detail)
    }
}

fn container_details(id: &str, detail: ContainerInspectResponse) -> Result<ContainerDetails> {
    let created = detail
        .created
        .as_deref()
        .ok_or_else(|| {
            RuntimeError::new(
                ErrorKind::Permanent,
                format!("container {id} has no creation time"),
            )
        })
        .and_then(parse_created)?;

    let state = detail.state.unwrap_or_default();
    let status = match state.status {
        Some(ContainerStateStatusEnum::CREATED) => ContainerState::Created,
        Some(ContainerStateStatusEnum::RUNNING) => ContainerState::Running,
        Some(ContainerStateStatusEnum::PAUSED) => ContainerState::Paused,
        Some(ContainerStateStatusEnum::RESTARTING) => ContainerState::Restarting,
        Some(ContainerStateStatusEnum::REMOVING) => ContainerState::Removing,
        Some(ContainerStateStatusEnum::EXITED) => ContainerState::Exited,
        Some(ContainerStateStatusEnum::DEAD) => ContainerState::Dead,
        _ if state.running == Some(true) => ContainerState::Running,
        _ => ContainerState::Unknown,
    };

    Ok(ContainerDetails {
        id: detail.id.unwrap_or_else(|| id.to_string()),
        name: detail
            .name
            .map(|n| n.trim_start_matches('/').to_string())
            .unwrap_or_default(),
        pid: state.pid.unwrap_or_default(),
        created,
        state: status,
        env: detail.config.and_then(|c| c.env).unwrap_or_default(),
    })
}

fn parse_created(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| {
            RuntimeError::new(
                ErrorKind::Permanent,
                format!("invalid creation time `{raw}`: {e}"),
            )
        })
}

/// Maps a Docker client error onto the runtime error classes.
///
/// Older daemons answer an unknown `since` container with 500, newer ones
/// with 404, so both count as not-found.
fn classify(err: bollard::errors::Error) -> RuntimeError {
    match err {
        bollard::errors::Error::DockerResponseServerError {
            status_code,
            message,
        } => {
            debug!("Docker responded with status {}: {}", status_code, message);
            let kind = match status_code {
                404 | 500 => ErrorKind::NotFound,
                400..=499 => ErrorKind::Permanent,
                _ => ErrorKind::Transient,
            };
            RuntimeError::new(kind, format!("status {status_code}: {message}"))
        }
        other => RuntimeError::transient(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bollard::models::ContainerConfig;

    fn server_error(status_code: u16) -> bollard::errors::Error {
        bollard::errors::Error::DockerResponseServerError {
            status_code,
            message: "boom".to_string(),
        }
    }

    #[test]
    fn test_classify_status_codes() {
        assert_eq!(classify(server_error(404)).kind, ErrorKind::NotFound);
        assert_eq!(classify(server_error(500)).kind, ErrorKind::NotFound);
        assert_eq!(classify(server_error(400)).kind, ErrorKind::Permanent);
        assert_eq!(classify(server_error(409)).kind, ErrorKind::Permanent);
        assert_eq!(classify(server_error(503)).kind, ErrorKind::Transient);
    }

    #[test]
    fn test_classify_transport_errors_as_transient() {
        let err = classify(bollard::errors::Error::RequestTimeoutError);
        assert_eq!(err.kind, ErrorKind::Transient);
    }

    #[test]
    fn test_container_details_from_inspect_response() {
        let detail = ContainerInspectResponse {
            id: Some("abc".to_string()),
            name: Some("/web-1".to_string()),
            created: Some("2024-05-01T10:00:00.123456789Z".to_string()),
            state: Some(bollard::models::ContainerState {
                status: Some(ContainerStateStatusEnum::RUNNING),
                running: Some(true),
                pid: Some(4242),
                ..Default::default()
            }),
            config: Some(ContainerConfig {
                env: Some(vec!["PATH=/bin".to_string(), "MICROSERVICE_LABEL=web".to_string()]),
                ..Default::default()
            }),
            ..Default::default()
        };

        let details = container_details("abc", detail).unwrap();
        assert_eq!(details.id, "abc");
        assert_eq!(details.name, "web-1");
        assert_eq!(details.pid, 4242);
        assert_eq!(details.state, ContainerState::Running);
        assert_eq!(details.env.len(), 2);
        assert_eq!(details.created.timestamp(), 1714557600);
    }

    #[test]
    fn test_restarting_container_is_live() {
        let detail = ContainerInspectResponse {
            created: Some("2024-05-01T10:00:00Z".to_string()),
            state: Some(bollard::models::ContainerState {
                status: Some(ContainerStateStatusEnum::RESTARTING),
                running: Some(true),
                restarting: Some(true),
                ..Default::default()
            }),
            ..Default::default()
        };

        let details = container_details("abc", detail).unwrap();
        assert_eq!(details.state, ContainerState::Restarting);
        assert!(details.state.is_running());
    }

    #[test]
    fn test_container_details_requires_creation_time() {
        let err = container_details("abc", ContainerInspectResponse::default()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Permanent);
    }

    #[test]
    fn test_parse_created_rejects_garbage() {
        assert!(parse_created("yesterday").is_err());
    }
}
