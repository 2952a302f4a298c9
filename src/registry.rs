//! Authoritative in-memory map of the currently known microservices.
//!
//! The maps are only reachable through a [`RegistryGuard`], so every read
//! and write happens while the registry lock is held.  The lock is an async
//! mutex: the tracker keeps it across runtime calls and channel sends so an
//! event is always delivered from the same critical section that committed
//! the matching mutation.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use log::warn;
use tokio::sync::{Mutex, MutexGuard};

use crate::types::Microservice;

#[derive(Debug, Default)]
struct Indices {
    by_label: HashMap<String, Microservice>,
    by_id: HashMap<String, Microservice>,
    /// Newest creation time ever seen per label. Survives termination.
    last_created: HashMap<String, DateTime<Utc>>,
}

/// Outcome of [`RegistryGuard::upsert`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Upsert {
    /// The container is already registered under this label.
    Unchanged,
    /// The microservice was inserted. `replaced` holds the entries that had
    /// to be terminated first, in removal order.
    Inserted { replaced: Vec<Microservice> },
}

#[derive(Debug, Default)]
pub struct Registry {
    inner: Mutex<Indices>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires the registry lock.
    pub async fn lock(&self) -> RegistryGuard<'_> {
        RegistryGuard {
            indices: self.inner.lock().await,
        }
    }

    /// Returns the live microservices ordered by label.
    pub async fn snapshot(&self) -> Vec<Microservice> {
        let guard = self.lock().await;
        let mut all: Vec<Microservice> = guard.indices.by_label.values().cloned().collect();
        all.sort_by(|a, b| a.label.cmp(&b.label));
        all
    }
}

/// Exclusive access to the registry for the duration of one critical section.
pub struct RegistryGuard<'a> {
    indices: MutexGuard<'a, Indices>,
}

impl RegistryGuard<'_> {
    /// Returns true if a container of this label created strictly later than
    /// `created` has already been recorded.
    pub fn is_stale(&self, label: &str, created: DateTime<Utc>) -> bool {
        self.indices
            .last_created
            .get(label)
            .is_some_and(|last| *last > created)
    }

    /// Registers `microservice`, created at `created`.
    ///
    /// A different container currently bound to the same label (or the same
    /// container bound to another label) is removed first and returned in
    /// [`Upsert::Inserted`] so the caller can emit its termination before
    /// announcing the new entry.
    pub fn upsert(&mut self, microservice: Microservice, created: DateTime<Utc>) -> Upsert {
        self.record_created(&microservice.label, created);

        let current = self
            .indices
            .by_label
            .get(&microservice.label)
            .map(|ms| ms.container_id.clone());
        if current.as_deref() == Some(microservice.container_id.as_str()) {
            return Upsert::Unchanged;
        }

        let mut replaced = Vec::new();
        if let Some(old_id) = current {
            replaced.extend(self.remove_by_id(&old_id));
        }
        if self.indices.by_id.contains_key(&microservice.container_id) {
            replaced.extend(self.remove_by_id(&microservice.container_id));
        }

        self.indices
            .by_id
            .insert(microservice.container_id.clone(), microservice.clone());
        self.indices
            .by_label
            .insert(microservice.label.clone(), microservice);

        Upsert::Inserted { replaced }
    }

    /// Removes the microservice running in `container_id` from both indices.
    ///
    /// Unknown ids are logged and ignored.
    pub fn remove_by_id(&mut self, container_id: &str) -> Option<Microservice> {
        let Some(microservice) = self.indices.by_id.remove(container_id) else {
            warn!("Detected removal of an unknown microservice: id={container_id}");
            return None;
        };
        self.indices.by_label.remove(&microservice.label);
        Some(microservice)
    }

    /// Container ids of all live microservices, sorted.
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.indices.by_id.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn get_by_label(&self, label: &str) -> Option<&Microservice> {
        self.indices.by_label.get(label)
    }

    pub fn get_by_id(&self, container_id: &str) -> Option<&Microservice> {
        self.indices.by_id.get(container_id)
    }

    pub fn len(&self) -> usize {
        self.indices.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.by_id.is_empty()
    }

    fn record_created(&mut self, label: &str, created: DateTime<Utc>) {
        match self.indices.last_created.get_mut(label) {
            Some(last) if *last > created => {}
            Some(last) => *last = created,
            None => {
                self.indices.last_created.insert(label.to_owned(), created);
            }
        }
    }

    /// Both indices hold exactly the same microservices.
    #[cfg(test)]
    pub(crate) fn is_consistent(&self) -> bool {
        self.indices.by_label.len() == self.indices.by_id.len()
            && self.indices.by_label.iter().all(|(label, ms)| {
                ms.label == *label && self.indices.by_id.get(&ms.container_id) == Some(ms)
            })
    }
}
