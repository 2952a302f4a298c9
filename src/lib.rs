//! Microservice discovery for a container networking agent.
//!
//! A single [`Tracker`](tracker::Tracker) polls the container runtime,
//! keeps the [`Registry`](registry::Registry) of labelled containers up to
//! date and notifies the interface configurator whenever a microservice
//! appears or goes away.

pub mod config;
pub mod namespace;
pub mod registry;
pub mod runtime;
pub mod tracker;
pub mod types;
