//! Microservice tracker daemon entry point.

use log::{error, info};
use tokio::signal;
use tokio_util::sync::CancellationToken;

use ms_tracker::config::Config;
use ms_tracker::runtime::DockerRuntime;
use ms_tracker::tracker::{notification_channel, Tracker, TrackerSettings};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    env_logger::init();

    // Load configuration
    let cfg = Config::load()?;
    info!("Starting microservice tracker with config: {:?}", cfg);

    // Container Runtime (Docker)
    let runtime = DockerRuntime::connect(cfg.docker_socket.as_deref())?;

    // Notification channel towards the interface configurator
    let (event_tx, mut event_rx) = notification_channel(cfg.channel_capacity);

    let cancel = CancellationToken::new();
    let mut tracker = Tracker::new(runtime, TrackerSettings::from(&cfg), event_tx, cancel.clone());
    let registry = tracker.registry();
    info!(
        "Namespace origin: {}",
        tracker.namespace_context().origin().display()
    );
    let tracker_handle = tokio::spawn(async move { tracker.run().await });

    // Interface configurator stand-in
    let consumer_handle = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            match serde_json::to_string(&event) {
                Ok(json) => info!("Microservice event {}: {}", event.kind, json),
                Err(e) => error!("Failed to serialize microservice event: {}", e),
            }
        }
        info!("Microservice event channel closed");
    });

    // Graceful Shutdown
    match signal::ctrl_c().await {
        Ok(()) => {
            info!("Received Ctrl+C, shutting down...");
        }
        Err(err) => {
            error!("Unable to listen for shutdown signal: {}", err);
        }
    }

    let known = registry.snapshot().await;
    info!("{} microservices tracked at shutdown", known.len());

    cancel.cancel();
    match tracker_handle.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("Microservice tracking failed: {}", e),
        Err(e) => error!("Microservice tracking task panicked: {}", e),
    }
    consumer_handle.abort();

    info!("Shutdown complete.");
    Ok(())
}
