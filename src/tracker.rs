//! Discovery loop keeping the registry in sync with the container runtime.
//!
//! Every tick the tracker pings the runtime, re-inspects the tracked
//! microservices, promotes containers seen in the `created` state on an
//! earlier tick, and finally lists containers created since the last tick.
//! Each registry change is announced on the notification channel from the
//! critical section that performed it.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::namespace::NamespaceContext;
use crate::registry::{Registry, Upsert};
use crate::runtime::ContainerRuntime;
use crate::types::{ContainerDetails, ContainerState, ContainerSummary, Microservice, MicroserviceEvent};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TrackerError {
    #[error("microservice tracking cancelled")]
    Cancelled,
    #[error("microservice notification channel closed")]
    ChannelClosed,
}

/// Connectivity state of the discovery loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerState {
    Disconnected,
    Polling,
    Stopped,
}

#[derive(Debug, Clone)]
pub struct TrackerSettings {
    pub poll_interval: Duration,
    pub retry_interval: Duration,
    pub label_env_var: String,
}

impl From<&Config> for TrackerSettings {
    fn from(config: &Config) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            retry_interval: config.retry_interval(),
            label_env_var: config.label_env_var.clone(),
        }
    }
}

/// Creates the bounded channel carrying [`MicroserviceEvent`]s to the
/// interface configurator.
pub fn notification_channel(
    capacity: usize,
) -> (mpsc::Sender<MicroserviceEvent>, mpsc::Receiver<MicroserviceEvent>) {
    mpsc::channel(capacity)
}

/// Listing position carried from one tick to the next.
#[derive(Debug, Default)]
struct DiscoveryCursor {
    /// Containers last seen in the `created` state.
    pending_created: BTreeSet<String>,
    /// Newest container listed so far; later listings start after it.
    since: Option<String>,
    /// Creation time (UNIX seconds) of the newest container inspected.
    last_inspected: i64,
}

/// Returns the microservice label declared in `env`.
///
/// Entries are scanned in the given order. An entry with an empty value is
/// skipped; the first non-empty value wins.
pub fn microservice_label<'a>(env: &'a [String], var: &str) -> Option<&'a str> {
    env.iter()
        .filter_map(|entry| entry.strip_prefix(var)?.strip_prefix('='))
        .find(|value| !value.is_empty())
}

pub struct Tracker<R> {
    runtime: R,
    settings: TrackerSettings,
    registry: Arc<Registry>,
    cursor: DiscoveryCursor,
    state: TrackerState,
    events: mpsc::Sender<MicroserviceEvent>,
    cancel: CancellationToken,
    ns_ctx: NamespaceContext,
}

impl<R: ContainerRuntime> Tracker<R> {
    pub fn new(
        runtime: R,
        settings: TrackerSettings,
        events: mpsc::Sender<MicroserviceEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            runtime,
            settings,
            registry: Arc::new(Registry::new()),
            cursor: DiscoveryCursor::default(),
            state: TrackerState::Disconnected,
            events,
            cancel,
            ns_ctx: NamespaceContext::new(),
        }
    }

    /// Shared handle on the registry, for snapshots of the known
    /// microservices.
    pub fn registry(&self) -> Arc<Registry> {
        Arc::clone(&self.registry)
    }

    pub fn state(&self) -> TrackerState {
        self.state
    }

    pub fn namespace_context(&self) -> &NamespaceContext {
        &self.ns_ctx
    }

    /// Runs the discovery loop until cancelled.
    ///
    /// The first tick fires immediately. Returns an error only when the
    /// notification channel has been closed by the consumer.
    pub async fn run(&mut self) -> Result<(), TrackerError> {
        let cancel = self.cancel.clone();
        let mut delay = Duration::ZERO;

        let result = loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break Ok(()),
                _ = tokio::time::sleep(delay) => {}
            }

            let tick = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(TrackerError::Cancelled),
                tick = self.tick() => tick,
            };
            match tick {
                Ok(next) => delay = next,
                Err(TrackerError::Cancelled) => break Ok(()),
                Err(err) => break Err(err),
            }
        };

        self.state = TrackerState::Stopped;
        debug!("Microservice tracking ended");
        result
    }

    /// Executes one tick and returns the delay until the next one.
    pub async fn tick(&mut self) -> Result<Duration, TrackerError> {
        if let Err(err) = self.runtime.ping().await {
            if self.state == TrackerState::Polling {
                error!("Container runtime ping check failed: {}", err);
            } else {
                debug!("Container runtime still unreachable: {}", err);
            }
            self.state = TrackerState::Disconnected;
            return Ok(self.settings.retry_interval);
        }

        if self.state != TrackerState::Polling {
            info!("Container runtime ping check OK");
            self.state = TrackerState::Polling;
        }

        self.sweep_terminated().await?;
        self.promote_created().await?;
        self.discover().await?;

        Ok(self.settings.poll_interval)
    }

    /// Removes every tracked microservice whose container is gone or no
    /// longer running.
    async fn sweep_terminated(&self) -> Result<(), TrackerError> {
        let mut registry = self.registry.lock().await;
        for id in registry.ids() {
            let terminated = match self.runtime.inspect_container(&id).await {
                Ok(details) => !details.state.is_running(),
                Err(err) => {
                    debug!("Inspect container {} failed: {}", id, err);
                    true
                }
            };
            if !terminated {
                continue;
            }
            if let Some(microservice) = registry.remove_by_id(&id) {
                debug!(
                    "Microservice has terminated: label={} pid={} id={}",
                    microservice.label, microservice.pid, microservice.container_id
                );
                self.notify(MicroserviceEvent::terminated(microservice)).await?;
            }
        }
        Ok(())
    }

    /// Re-inspects containers seen in the `created` state and runs detection
    /// on those that are now running.
    async fn promote_created(&mut self) -> Result<(), TrackerError> {
        let pending = std::mem::take(&mut self.cursor.pending_created);
        let mut still_created = BTreeSet::new();

        for id in pending {
            let inspected = self.runtime.inspect_container(&id).await;
            match inspected {
                Ok(details) if details.state.is_running() => self.detect(&details).await?,
                Ok(details) if details.state == ContainerState::Created => {
                    still_created.insert(id);
                }
                Ok(details) => {
                    debug!("Container {} left the created state as {:?}", id, details.state)
                }
                Err(err) => debug!("Inspect container {} failed: {}", id, err),
            }
        }

        self.cursor.pending_created.extend(still_created);
        Ok(())
    }

    /// Lists containers created since the previous tick.
    async fn discover(&mut self) -> Result<(), TrackerError> {
        let Some(containers) = self.list_containers().await else {
            return Ok(());
        };

        let mut newest = 0;
        let mut to_inspect = Vec::new();
        for container in containers {
            debug!(
                "Processing new container {} with state {:?}",
                container.id, container.state
            );
            if container.state == ContainerState::Running
                && container.created > self.cursor.last_inspected
            {
                to_inspect.push(container.id.clone());
            }
            if container.state == ContainerState::Created {
                self.cursor.pending_created.insert(container.id.clone());
            }
            if container.created > newest {
                newest = container.created;
                self.cursor.since = Some(container.id);
            }
        }
        if newest > self.cursor.last_inspected {
            self.cursor.last_inspected = newest;
        }

        for id in to_inspect {
            match self.runtime.inspect_container(&id).await {
                Ok(details) => self.detect(&details).await?,
                Err(err) => debug!("Inspect container {} failed: {}", id, err),
            }
        }
        Ok(())
    }

    /// Lists containers after the cursor. A cursor the runtime no longer
    /// knows is dropped and the listing repeated once without it.
    async fn list_containers(&mut self) -> Option<Vec<ContainerSummary>> {
        let since = self.cursor.since.clone();
        let result = match self.runtime.list_containers(since.as_deref()).await {
            Err(err) if err.is_not_found() && since.is_some() => {
                debug!("Clearing 'since' cursor {:?}: {}", since, err);
                self.cursor.since = None;
                self.runtime.list_containers(None).await
            }
            other => other,
        };

        match result {
            Ok(containers) => Some(containers),
            Err(err) => {
                error!("Error listing containers: {}", err);
                None
            }
        }
    }

    /// Registers the container as a microservice if it carries a label.
    async fn detect(&self, details: &ContainerDetails) -> Result<(), TrackerError> {
        let Some(label) = microservice_label(&details.env, &self.settings.label_env_var) else {
            return Ok(());
        };
        debug!(
            "Detected container as microservice: name={} id={} created={}",
            details.name, details.id, details.created
        );

        let mut registry = self.registry.lock().await;
        if registry.is_stale(label, details.created) {
            debug!(
                "Ignoring older container {} created at {} as microservice {}",
                details.id, details.created, label
            );
            return Ok(());
        }

        let microservice = Microservice::new(label, details.id.as_str(), details.pid);
        let replaced = match registry.upsert(microservice.clone(), details.created) {
            Upsert::Unchanged => return Ok(()),
            Upsert::Inserted { replaced } => replaced,
        };

        let restarted = replaced.iter().any(|old| old.label == label);
        for old in replaced {
            debug!(
                "Microservice has terminated: label={} pid={} id={}",
                old.label, old.pid, old.container_id
            );
            self.notify(MicroserviceEvent::terminated(old)).await?;
        }
        if restarted {
            warn!(
                "Microservice has been restarted: label={} new-pid={} new-id={}",
                label, microservice.pid, microservice.container_id
            );
        } else {
            debug!(
                "Discovered new microservice: label={} pid={} id={}",
                label, microservice.pid, microservice.container_id
            );
        }
        self.notify(MicroserviceEvent::new_microservice(microservice)).await
    }

    /// Hands an event to the consumer, waiting for capacity unless
    /// cancelled first.
    async fn notify(&self, event: MicroserviceEvent) -> Result<(), TrackerError> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(TrackerError::Cancelled),
            sent = self.events.send(event) => sent.map_err(|_| TrackerError::ChannelClosed),
        }
    }
}
