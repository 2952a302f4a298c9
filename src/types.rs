//! Data structures shared by the tracker, the registry and the runtime
//! adapters.
//!
//! [`Microservice`] and [`MicroserviceEvent`] are what leaves this crate:
//! they are handed to the interface configurator over the notification
//! channel.  The container types describe what a runtime adapter reports
//! and are kept independent of any particular runtime client.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A running container carrying the microservice label.
///
/// Identified by `container_id`.  The `label` is unique among live
/// microservices but is reused when a microservice restarts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Microservice {
    pub label: String,
    pub container_id: String,
    pub pid: i64,
}

impl Microservice {
    pub fn new(label: impl Into<String>, container_id: impl Into<String>, pid: i64) -> Self {
        Self {
            label: label.into(),
            container_id: container_id.into(),
            pid,
        }
    }
}

/// Lifecycle transition carried by a [`MicroserviceEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    /// A microservice was discovered; pending interfaces can be moved into
    /// its namespace.
    New,
    /// A known microservice has gone away; its interfaces are obsolete.
    Terminated,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventKind::New => f.write_str("new-ms"),
            EventKind::Terminated => f.write_str("term-ms"),
        }
    }
}

/// A one-shot notification sent to the interface configurator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MicroserviceEvent {
    pub microservice: Microservice,
    pub kind: EventKind,
}

impl MicroserviceEvent {
    pub fn new_microservice(microservice: Microservice) -> Self {
        Self {
            microservice,
            kind: EventKind::New,
        }
    }

    pub fn terminated(microservice: Microservice) -> Self {
        Self {
            microservice,
            kind: EventKind::Terminated,
        }
    }
}

/// Run state of a container as reported by the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerState {
    Created,
    Running,
    Paused,
    Restarting,
    Removing,
    Exited,
    Dead,
    Unknown,
}

impl ContainerState {
    /// Parses the runtime's status string. Anything unrecognised maps to
    /// [`ContainerState::Unknown`].
    pub fn from_status(status: &str) -> Self {
        match status {
            "created" => ContainerState::Created,
            "running" => ContainerState::Running,
            "paused" => ContainerState::Paused,
            "restarting" => ContainerState::Restarting,
            "removing" => ContainerState::Removing,
            "exited" => ContainerState::Exited,
            "dead" => ContainerState::Dead,
            _ => ContainerState::Unknown,
        }
    }

    /// Whether the container's processes (and so its network namespace)
    /// are alive. Docker keeps `Running=true` for paused containers and for
    /// containers being restarted by their restart policy, so both count.
    pub fn is_running(self) -> bool {
        matches!(
            self,
            ContainerState::Running | ContainerState::Paused | ContainerState::Restarting
        )
    }
}

/// One entry of a container listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSummary {
    pub id: String,
    /// Creation time in seconds since the UNIX epoch.
    pub created: i64,
    pub state: ContainerState,
}

/// Full metadata of a single container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerDetails {
    pub id: String,
    pub name: String,
    pub pid: i64,
    pub created: DateTime<Utc>,
    pub state: ContainerState,
    /// Environment entries in `KEY=value` form, in the order the runtime
    /// returned them.
    pub env: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_container_state_from_status() {
        assert_eq!(ContainerState::from_status("running"), ContainerState::Running);
        assert_eq!(ContainerState::from_status("created"), ContainerState::Created);
        assert_eq!(ContainerState::from_status("exited"), ContainerState::Exited);
        assert_eq!(ContainerState::from_status(""), ContainerState::Unknown);
        assert_eq!(ContainerState::from_status("bogus"), ContainerState::Unknown);
    }

    #[test]
    fn test_paused_and_restarting_count_as_running() {
        assert!(ContainerState::Running.is_running());
        assert!(ContainerState::Paused.is_running());
        assert!(ContainerState::Restarting.is_running());
        assert!(!ContainerState::Created.is_running());
        assert!(!ContainerState::Exited.is_running());
        assert!(!ContainerState::Dead.is_running());
    }

    #[test]
    fn test_event_serialization() {
        let event = MicroserviceEvent::terminated(Microservice::new("web", "c1", 42));
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"], "terminated");
        assert_eq!(json["microservice"]["label"], "web");
        assert_eq!(json["microservice"]["container_id"], "c1");
        assert_eq!(json["microservice"]["pid"], 42);
    }

    #[test]
    fn test_event_kind_display() {
        assert_eq!(EventKind::New.to_string(), "new-ms");
        assert_eq!(EventKind::Terminated.to_string(), "term-ms");
    }
}
